use std::sync::{Arc, Mutex};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    firebase_provider::{FirebaseProvider, FirebaseProviderConfig},
    static_provider::{StaticProvider, StaticProviderConfig},
};
use crate::models::User;

/// Configuration options for the identity provider backing the session.
#[derive(Deserialize, Serialize, JsonSchema, Debug, Clone)]
#[serde(tag = "type")]
pub enum IdentityConfig {
    #[serde(rename = "firebase")]
    Firebase(FirebaseProviderConfig),
    #[serde(rename = "static")]
    Static(StaticProviderConfig),
}

/// A session-change notification emitted by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(User),
    SignedOut,
}

impl From<Option<User>> for SessionEvent {
    fn from(user: Option<User>) -> Self {
        match user {
            Some(user) => SessionEvent::SignedIn(user),
            None => SessionEvent::SignedOut,
        }
    }
}

/// Receiving end of a provider subscription.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no signed-in session")]
    Unauthenticated,
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("invalid identity token: {0}")]
    InvalidToken(String),
    #[error("session persistence failed: {0}")]
    Persistence(String),
    #[error("sign-in failed: {0}")]
    SignIn(String),
}

impl IdentityError {
    /// Message suitable for showing to the person signing in.
    pub fn user_message(&self) -> &'static str {
        match self {
            IdentityError::SignIn(_) => "Sign-in failed. Please try again.",
            IdentityError::Unauthenticated => "You are signed out. Please sign in.",
            _ => "Could not reach the sign-in service. Please try again later.",
        }
    }
}

/// An identity provider owns the signed-in account and hands out short-lived
/// bearer tokens for it.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    fn get_name(&self) -> &str;
    fn get_type(&self) -> &str;
    /// Subscribe to session changes. The current state is delivered first.
    fn subscribe(&self) -> SessionEvents;
    /// A bearer token for the current session; fails with `Unauthenticated` without one.
    async fn get_token(&self) -> Result<String, IdentityError>;
    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Create an identity provider from a given config.
pub fn create_identity_provider(config: &IdentityConfig) -> Arc<dyn IdentityProvider> {
    match config {
        IdentityConfig::Firebase(cfg) => Arc::new(FirebaseProvider::new(cfg)),
        IdentityConfig::Static(cfg) => Arc::new(StaticProvider::new(cfg)),
    }
}

struct BroadcastState {
    current: Option<User>,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

/// Fan-out of session events to every subscriber, shared by the providers.
pub struct SessionBroadcaster {
    state: Mutex<BroadcastState>,
}

impl SessionBroadcaster {
    pub fn new(initial: Option<User>) -> Self {
        Self {
            state: Mutex::new(BroadcastState {
                current: initial,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().expect("session broadcaster mutex poisoned");
        // The receiver was just created, so this send cannot fail.
        let _ = tx.send(SessionEvent::from(state.current.clone()));
        state.subscribers.push(tx);
        debug!(
            subscribers = state.subscribers.len(),
            "new session subscription"
        );
        rx
    }

    /// Record the new session user and notify subscribers; closed ones are dropped.
    pub fn emit(&self, user: Option<User>) {
        let mut state = self.state.lock().expect("session broadcaster mutex poisoned");
        info!(
            event_name = "identity.session.changed",
            event_domain = "identity",
            signed_in = user.is_some(),
            "session change emitted"
        );
        state.current = user.clone();
        let event = SessionEvent::from(user);
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn current(&self) -> Option<User> {
        self.state
            .lock()
            .expect("session broadcaster mutex poisoned")
            .current
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_replays_current_state() {
        let broadcaster = SessionBroadcaster::new(Some(User::new("u1", None, None, None)));
        let mut rx = broadcaster.subscribe();
        assert_eq!(
            rx.recv().await,
            Some(SessionEvent::SignedIn(User::new("u1", None, None, None)))
        );
    }

    #[tokio::test]
    async fn test_emit_reaches_all_subscribers_in_order() {
        let broadcaster = SessionBroadcaster::new(None);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        broadcaster.emit(Some(User::new("u1", None, None, None)));
        broadcaster.emit(None);

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await, Some(SessionEvent::SignedOut));
            assert!(matches!(rx.recv().await, Some(SessionEvent::SignedIn(_))));
            assert_eq!(rx.recv().await, Some(SessionEvent::SignedOut));
        }
    }

    #[tokio::test]
    async fn test_closed_subscribers_are_dropped() {
        let broadcaster = SessionBroadcaster::new(None);
        let rx = broadcaster.subscribe();
        drop(rx);
        broadcaster.emit(None);
        assert!(broadcaster.state.lock().unwrap().subscribers.is_empty());
    }
}
