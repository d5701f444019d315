use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::lock::Mutex;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::base::{IdentityError, IdentityProvider, SessionBroadcaster, SessionEvents};
use crate::models::User;

/// Refresh the ID token this long before it actually expires.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// Config for a Firebase Authentication project.
#[derive(Deserialize, Serialize, Debug, JsonSchema, Clone)]
pub struct FirebaseProviderConfig {
    pub name: String,
    /// Web API key of the Firebase project.
    pub api_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_identity_uri")]
    pub identity_uri: String,
    /// `requestUri` sent with identity-provider sign-ins.
    #[serde(default = "default_request_uri")]
    pub request_uri: String,
    /// Where the signed-in session is kept between runs.
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
}

fn default_token_uri() -> String {
    "https://securetoken.googleapis.com/v1".to_string()
}

fn default_identity_uri() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}

fn default_request_uri() -> String {
    "http://localhost".to_string()
}

/// What survives a restart.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct PersistedSession {
    refresh_token: String,
    user: User,
}

struct ActiveSession {
    refresh_token: String,
    user: User,
    id_token: Option<(String, DateTime<Utc>)>,
}

impl ActiveSession {
    fn fresh_id_token(&self, now: DateTime<Utc>) -> Option<&str> {
        self.id_token
            .as_ref()
            .filter(|(_, expires_at)| *expires_at - Duration::seconds(EXPIRY_MARGIN_SECONDS) > now)
            .map(|(token, _)| token.as_str())
    }
}

/// Claims of a Firebase ID token that make up the user snapshot.
#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Build the user snapshot from an ID token. The signature is checked by the
/// API server, so only the payload is read here.
fn user_from_id_token(id_token: &str) -> Result<User, IdentityError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = decode::<IdTokenClaims>(id_token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| IdentityError::InvalidToken(e.to_string()))?
        .claims;

    Ok(User::new(
        claims.user_id.unwrap_or(claims.sub),
        claims.email,
        claims.name,
        claims.picture,
    ))
}

/// Response of the secure-token endpoint (fields are snake_case there).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

/// Response of `accounts:signInWithIdp` (camelCase there).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpSignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
}

fn expires_at(now: DateTime<Utc>, expires_in: &str) -> DateTime<Utc> {
    let seconds = expires_in.trim().parse::<i64>().unwrap_or(0);
    now + Duration::seconds(seconds)
}

/// Pull `error.message` out of a Google API error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Exchanges a refresh token for a fresh ID token at the secure-token endpoint.
async fn exchange_refresh_token(
    client: &reqwest::Client,
    config: &FirebaseProviderConfig,
    refresh_token: &str,
) -> Result<TokenResponse, IdentityError> {
    let url = format!("{}/token?key={}", config.token_uri, config.api_key);
    debug!("Exchanging refresh token at '{}'", config.token_uri);

    let resp = client
        .post(&url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .send()
        .await
        .map_err(|e| IdentityError::TokenExchange(format!("Failed to call token endpoint: {}", e)))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| IdentityError::TokenExchange(format!("Failed to read token response: {}", e)))?;

    if status.is_client_error() {
        // The refresh token itself was rejected (revoked, expired, user disabled).
        warn!("Refresh token rejected: {}", error_message(&body));
        return Err(IdentityError::Unauthenticated);
    }
    if !status.is_success() {
        return Err(IdentityError::TokenExchange(format!(
            "Unexpected status code {}: {}",
            status,
            error_message(&body)
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| IdentityError::TokenExchange(format!("Failed to parse token JSON: {}", e)))
}

fn load_persisted(path: &Path) -> Result<Option<PersistedSession>, IdentityError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        std::fs::read_to_string(path).map_err(|e| IdentityError::Persistence(e.to_string()))?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| IdentityError::Persistence(e.to_string()))
}

fn store_persisted(path: &Path, session: &PersistedSession) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| IdentityError::Persistence(e.to_string()))?;
    }
    let json =
        serde_json::to_string(session).map_err(|e| IdentityError::Persistence(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| IdentityError::Persistence(e.to_string()))
}

fn remove_persisted(path: &Path) -> Result<(), IdentityError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IdentityError::Persistence(e.to_string())),
    }
}

/// A credential accepted by [`FirebaseProvider::sign_in`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInCredential {
    /// ID token from a Google OAuth flow.
    GoogleIdToken(String),
    /// Firebase refresh token obtained elsewhere (e.g. another device).
    RefreshToken(String),
}

/// A provider backed by Firebase Authentication's REST endpoints.
pub struct FirebaseProvider {
    config: FirebaseProviderConfig,
    client: reqwest::Client,
    session: Mutex<Option<ActiveSession>>,
    events: SessionBroadcaster,
}

impl FirebaseProvider {
    /// Creates the provider, restoring a persisted session when one exists.
    pub fn new(config: &FirebaseProviderConfig) -> Self {
        info!("Creating Firebase identity provider '{}'", config.name);

        let restored = match config.persistence_path.as_deref().map(load_persisted) {
            Some(Ok(restored)) => restored,
            Some(Err(e)) => {
                warn!("Ignoring unreadable persisted session: {}", e);
                None
            }
            None => None,
        };
        if let Some(persisted) = &restored {
            info!("Restored persisted session for '{}'", persisted.user.uid);
        }

        let initial_user = restored.as_ref().map(|p| p.user.clone());
        let session = restored.map(|p| ActiveSession {
            refresh_token: p.refresh_token,
            user: p.user,
            id_token: None,
        });

        Self {
            config: config.clone(),
            client: reqwest::Client::new(),
            session: Mutex::new(session),
            events: SessionBroadcaster::new(initial_user),
        }
    }

    pub async fn sign_in(&self, credential: &SignInCredential) -> Result<User, IdentityError> {
        match credential {
            SignInCredential::GoogleIdToken(token) => self.sign_in_with_google(token).await,
            SignInCredential::RefreshToken(token) => self.sign_in_with_refresh_token(token).await,
        }
    }

    /// Sign in with a refresh token obtained elsewhere (e.g. another device).
    pub async fn sign_in_with_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<User, IdentityError> {
        let now = Utc::now();
        let result = match exchange_refresh_token(&self.client, &self.config, refresh_token).await
        {
            Ok(resp) => user_from_id_token(&resp.id_token).map(|user| ActiveSession {
                id_token: Some((resp.id_token, expires_at(now, &resp.expires_in))),
                refresh_token: resp.refresh_token,
                user,
            }),
            Err(e) => Err(e),
        };
        self.finish_sign_in(result).await
    }

    /// Sign in with a Google ID token (the credential from a Google OAuth flow).
    pub async fn sign_in_with_google(&self, google_id_token: &str) -> Result<User, IdentityError> {
        let now = Utc::now();
        let result = self
            .sign_in_with_idp(google_id_token)
            .await
            .map(|resp| ActiveSession {
                user: User::new(resp.local_id, resp.email, resp.display_name, resp.photo_url),
                id_token: Some((resp.id_token, expires_at(now, &resp.expires_in))),
                refresh_token: resp.refresh_token,
            });
        self.finish_sign_in(result).await
    }

    async fn sign_in_with_idp(
        &self,
        google_id_token: &str,
    ) -> Result<IdpSignInResponse, IdentityError> {
        let url = format!(
            "{}/accounts:signInWithIdp?key={}",
            self.config.identity_uri, self.config.api_key
        );
        let body = json!({
            "postBody": format!("id_token={}&providerId=google.com", google_id_token),
            "requestUri": self.config.request_uri,
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentityError::SignIn(format!("Failed to call signInWithIdp: {}", e)))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| IdentityError::SignIn(format!("Failed to read sign-in response: {}", e)))?;
        if !status.is_success() {
            return Err(IdentityError::SignIn(error_message(&text)));
        }
        serde_json::from_str(&text)
            .map_err(|e| IdentityError::SignIn(format!("Failed to parse sign-in JSON: {}", e)))
    }

    /// Install a new session or, on failure, leave the provider signed out.
    async fn finish_sign_in(
        &self,
        result: Result<ActiveSession, IdentityError>,
    ) -> Result<User, IdentityError> {
        let mut guard = self.session.lock().await;
        match result {
            Ok(active) => {
                let user = active.user.clone();
                self.persist(&active);
                *guard = Some(active);
                info!("Signed in as '{}'", user.uid);
                self.events.emit(Some(user.clone()));
                Ok(user)
            }
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                *guard = None;
                if let Err(e) = self.clear_persisted() {
                    warn!("Could not remove persisted session: {}", e);
                }
                self.events.emit(None);
                Err(match e {
                    IdentityError::SignIn(_) => e,
                    other => IdentityError::SignIn(other.to_string()),
                })
            }
        }
    }

    fn persist(&self, active: &ActiveSession) {
        let Some(path) = &self.config.persistence_path else {
            return;
        };
        let persisted = PersistedSession {
            refresh_token: active.refresh_token.clone(),
            user: active.user.clone(),
        };
        if let Err(e) = store_persisted(path, &persisted) {
            warn!("Could not persist session: {}", e);
        }
    }

    fn clear_persisted(&self) -> Result<(), IdentityError> {
        match &self.config.persistence_path {
            Some(path) => remove_persisted(path),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseProvider {
    fn get_name(&self) -> &str {
        &self.config.name
    }

    fn get_type(&self) -> &str {
        "firebase"
    }

    fn subscribe(&self) -> SessionEvents {
        self.events.subscribe()
    }

    /// Returns the cached ID token while it is fresh, refreshing it otherwise.
    async fn get_token(&self) -> Result<String, IdentityError> {
        let mut guard = self.session.lock().await;
        let active = guard.as_mut().ok_or(IdentityError::Unauthenticated)?;

        let now = Utc::now();
        if let Some(token) = active.fresh_id_token(now) {
            return Ok(token.to_string());
        }

        match exchange_refresh_token(&self.client, &self.config, &active.refresh_token).await {
            Ok(resp) => {
                debug!("Refreshed ID token for '{}'", active.user.uid);
                let rotated = active.refresh_token != resp.refresh_token;
                active.refresh_token = resp.refresh_token;
                active.id_token = Some((resp.id_token.clone(), expires_at(now, &resp.expires_in)));
                if rotated {
                    self.persist(active);
                }
                Ok(resp.id_token)
            }
            Err(IdentityError::Unauthenticated) => {
                *guard = None;
                if let Err(e) = self.clear_persisted() {
                    warn!("Could not remove persisted session: {}", e);
                }
                self.events.emit(None);
                Err(IdentityError::Unauthenticated)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let mut guard = self.session.lock().await;
        if let Some(active) = guard.take() {
            info!("Signing out '{}'", active.user.uid);
        }
        let persisted = self.clear_persisted();
        self.events.emit(None);
        persisted
    }
}
