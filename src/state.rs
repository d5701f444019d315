//! Shared client state.
//!
//! Bundles the configuration, identity provider, session store and the
//! per-family resource clients that screens and commands work with.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::api::ApiClient;
use crate::cache::QueryCache;
use crate::config::ConfigV1;
use crate::identity::{IdentityError, IdentityProvider};
use crate::resources::{ExerciseClient, TrainingSessionClient, WorkoutClient};
use crate::session::{AuthState, SessionStore, SynchronizerHandle};

/// Everything a signed-in client needs, created by [`crate::startup::connect`].
pub struct ClientState {
    /// Configuration loaded at startup.
    pub config: Arc<ConfigV1>,
    pub identity: Arc<dyn IdentityProvider>,
    /// Read side of the global session; written only by the synchronizer.
    pub session: SessionStore,
    pub api: Arc<ApiClient>,
    /// Query cache shared by all resource families, bound to the session so
    /// it never serves one user's data to another.
    pub cache: QueryCache,
    pub exercises: ExerciseClient,
    pub training_sessions: TrainingSessionClient,
    pub workouts: WorkoutClient,
    synchronizer: SynchronizerHandle,
}

impl ClientState {
    pub(crate) fn new(
        config: Arc<ConfigV1>,
        identity: Arc<dyn IdentityProvider>,
        session: SessionStore,
        api: Arc<ApiClient>,
        cache: QueryCache,
        synchronizer: SynchronizerHandle,
    ) -> Self {
        Self {
            exercises: ExerciseClient::new(api.clone(), &cache),
            training_sessions: TrainingSessionClient::new(api.clone(), &cache),
            workouts: WorkoutClient::new(api.clone(), &cache),
            config,
            identity,
            session,
            api,
            cache,
            synchronizer,
        }
    }

    /// User-initiated sign-out: ends the provider session, drops every cached
    /// query and waits (bounded) for the session store to catch up.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        self.identity.sign_out().await?;
        self.cache.clear();
        let timeout = Duration::from_millis(self.config.api.sign_out_timeout_in_ms);
        self.session
            .wait_until_timeout(|s| s.auth_state() == AuthState::Unauthenticated, timeout)
            .await;
        info!(
            event_name = "session.signed_out",
            event_domain = "session",
            "user signed out"
        );
        Ok(())
    }

    /// Stop session synchronization. The store keeps its last value.
    pub async fn shutdown(self) {
        self.synchronizer.shutdown().await;
    }
}
