use std::sync::Mutex;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::base::{IdentityError, IdentityProvider, SessionBroadcaster, SessionEvents};
use crate::models::User;

/// A fixed account configured locally. Useful for development against a
/// local API and for tests.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct StaticProviderConfig {
    /// A friendly name for logs.
    pub name: String,
    /// Bearer token sent with every request. Absent means signed out.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<StaticUserEntry>,
}

#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct StaticUserEntry {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl From<&StaticUserEntry> for User {
    fn from(entry: &StaticUserEntry) -> Self {
        User::new(
            entry.uid.clone(),
            entry.email.clone(),
            entry.display_name.clone(),
            entry.photo_url.clone(),
        )
    }
}

/// A `StaticProvider` hands out whatever token it currently holds.
pub struct StaticProvider {
    config: StaticProviderConfig,
    token: Mutex<Option<String>>,
    events: SessionBroadcaster,
}

impl StaticProvider {
    pub fn new(config: &StaticProviderConfig) -> Self {
        info!("Creating static identity provider '{}'", config.name);
        let user = config.token.as_ref().map(|_| {
            config
                .user
                .as_ref()
                .map(User::from)
                .unwrap_or_else(|| User::new("local", None, None, None))
        });
        Self {
            config: config.clone(),
            token: Mutex::new(config.token.clone()),
            events: SessionBroadcaster::new(user),
        }
    }

    /// Sign in programmatically, replacing any current session.
    pub fn sign_in(&self, user: User, token: impl Into<String>) {
        debug!("Static provider '{}' signing in '{}'", self.config.name, user.uid);
        *self.token.lock().expect("static provider mutex poisoned") = Some(token.into());
        self.events.emit(Some(user));
    }

    /// Swap the token without a session change, as a provider refresh would.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.lock().expect("static provider mutex poisoned") = Some(token.into());
    }

    pub fn current_user(&self) -> Option<User> {
        self.events.current()
    }
}

#[async_trait]
impl IdentityProvider for StaticProvider {
    fn get_name(&self) -> &str {
        &self.config.name
    }

    fn get_type(&self) -> &str {
        "static"
    }

    fn subscribe(&self) -> SessionEvents {
        self.events.subscribe()
    }

    async fn get_token(&self) -> Result<String, IdentityError> {
        self.token
            .lock()
            .expect("static provider mutex poisoned")
            .clone()
            .ok_or(IdentityError::Unauthenticated)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        debug!("Static provider '{}' signing out", self.config.name);
        self.token
            .lock()
            .expect("static provider mutex poisoned")
            .take();
        self.events.emit(None);
        Ok(())
    }
}
