//! Client startup.
//!
//! Creates the identity provider from configuration, starts the auth
//! synchronizer and wires the request layer and resource clients on top.
//! [`sign_in`] establishes the persisted session the client later restores.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::cache::QueryCache;
use crate::config::ConfigV1;
use crate::identity::{
    create_identity_provider, FirebaseProvider, IdentityConfig, IdentityError, IdentityProvider,
    SignInCredential,
};
use crate::models::User;
use crate::session::AuthSynchronizer;
use crate::state::ClientState;

/// Connects a client using the identity provider named in `config`.
///
/// Must be called inside a Tokio runtime; the synchronizer runs as a task.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built.
pub async fn connect(config: Arc<ConfigV1>) -> Result<ClientState, ApiError> {
    let provider = create_identity_provider(&config.identity);
    connect_with_provider(config, provider).await
}

/// Like [`connect`], with a caller-supplied provider (tests, embedding apps).
pub async fn connect_with_provider(
    config: Arc<ConfigV1>,
    provider: Arc<dyn IdentityProvider>,
) -> Result<ClientState, ApiError> {
    info!(
        "Connecting to {} with identity provider '{}' ({})",
        config.api.base_url,
        provider.get_name(),
        provider.get_type()
    );

    let (session, synchronizer) = AuthSynchronizer::spawn(provider.clone());
    let cache = QueryCache::new(&config.cache).bound_to(session.clone());
    let api = Arc::new(ApiClient::new(
        &config.api,
        provider.clone(),
        session.clone(),
        cache.clone(),
    )?);

    Ok(ClientState::new(
        config,
        provider,
        session,
        api,
        cache,
        synchronizer,
    ))
}

/// Signs in with the identity provider named in `config` and persists the
/// resulting session, so a later [`connect`] starts out authenticated.
///
/// Only the Firebase provider supports interactive sign-in; a static
/// provider's session comes from its configuration.
pub async fn sign_in(
    config: &ConfigV1,
    credential: &SignInCredential,
) -> Result<User, IdentityError> {
    let cfg = match &config.identity {
        IdentityConfig::Firebase(cfg) => cfg,
        IdentityConfig::Static(cfg) => {
            return Err(IdentityError::SignIn(format!(
                "identity provider '{}' does not support interactive sign-in",
                cfg.name
            )))
        }
    };
    if cfg.persistence_path.is_none() {
        warn!(
            "Identity provider '{}' has no persistence_path; the session ends with this process",
            cfg.name
        );
    }

    let provider = FirebaseProvider::new(cfg);
    let user = provider.sign_in(credential).await?;
    info!(
        event_name = "session.signed_in",
        event_domain = "session",
        uid = user.uid.as_str(),
        "user signed in"
    );
    Ok(user)
}
