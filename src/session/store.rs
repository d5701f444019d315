use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::identity::SessionEvent;
use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthState {
    /// Waiting for the identity provider's first notification.
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Snapshot of the signed-in state. `user` is set exactly when authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    auth_state: AuthState,
    user: Option<User>,
}

impl Session {
    pub fn loading() -> Self {
        Self {
            auth_state: AuthState::Loading,
            user: None,
        }
    }

    pub fn authenticated(user: User) -> Self {
        Self {
            auth_state: AuthState::Authenticated,
            user: Some(user),
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            auth_state: AuthState::Unauthenticated,
            user: None,
        }
    }

    /// The session a provider event leads to.
    pub fn from_event(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::SignedIn(user) => Self::authenticated(user.clone()),
            SessionEvent::SignedOut => Self::unauthenticated(),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_state == AuthState::Authenticated
    }
}

/// Read side of the session. Cheap to clone; every clone sees the same state.
#[derive(Clone, Debug)]
pub struct SessionStore {
    rx: watch::Receiver<Session>,
}

impl SessionStore {
    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    pub fn auth_state(&self) -> AuthState {
        self.rx.borrow().auth_state
    }

    pub fn user(&self) -> Option<User> {
        self.rx.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().is_authenticated()
    }

    /// A receiver for callers that want to react to every change.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.rx.clone()
    }

    /// Wait until the session satisfies `predicate`. Returns `None` if the
    /// synchronizer has gone away first.
    pub async fn wait_until(&self, predicate: impl FnMut(&Session) -> bool) -> Option<Session> {
        let mut rx = self.rx.clone();
        let result = rx.wait_for(predicate).await.ok().map(|s| s.clone());
        result
    }

    /// Like `wait_until`, giving up after `timeout`.
    pub async fn wait_until_timeout(
        &self,
        predicate: impl FnMut(&Session) -> bool,
        timeout: Duration,
    ) -> Option<Session> {
        tokio::time::timeout(timeout, self.wait_until(predicate))
            .await
            .ok()
            .flatten()
    }

    /// Wait for the first provider notification to arrive.
    pub async fn ready(&self) -> Option<Session> {
        self.wait_until(|s| s.auth_state() != AuthState::Loading)
            .await
    }
}

/// Write side of the session, owned by the synchronizer alone.
pub(crate) struct SessionWriter {
    tx: watch::Sender<Session>,
}

impl SessionWriter {
    pub(crate) fn apply(&self, event: &SessionEvent) -> Session {
        let next = Session::from_event(event);
        self.tx.send_replace(next.clone());
        next
    }
}

/// A fresh store in the `Loading` state and its only writer.
pub(crate) fn session_channel() -> (SessionWriter, SessionStore) {
    let (tx, rx) = watch::channel(Session::loading());
    (SessionWriter { tx }, SessionStore { rx })
}
