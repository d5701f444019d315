use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ApiError;
use crate::cache::QueryCache;
use crate::config::ApiConfig;
use crate::identity::{IdentityError, IdentityProvider};
use crate::session::{AuthState, SessionStore};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Query parameters and JSON body of one request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }
}

/// Pull `message` out of an error body, falling back to the raw text and
/// then to the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value["message"].as_str() {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

fn decode_body<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Issues API requests on behalf of the signed-in user.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    identity: Arc<dyn IdentityProvider>,
    session: SessionStore,
    cache: QueryCache,
    sign_out_timeout: Duration,
}

impl ApiClient {
    pub fn new(
        config: &ApiConfig,
        identity: Arc<dyn IdentityProvider>,
        session: SessionStore,
        cache: QueryCache,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_in_ms))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            identity,
            session,
            cache,
            sign_out_timeout: Duration::from_millis(config.sign_out_timeout_in_ms),
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// Sends one request. The bearer token is read from the identity provider
    /// every time. A missing session or a 401 response signs the user out
    /// before the error is returned. A 204 decodes as JSON `null`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let token = match self.identity.get_token().await {
            Ok(token) => token,
            Err(IdentityError::Unauthenticated) => {
                warn!(
                    event_name = "api.request.unauthenticated",
                    event_domain = "api",
                    method = %method,
                    path,
                    "no session for request; forcing sign-out"
                );
                self.force_sign_out().await;
                return Err(ApiError::Unauthorized {
                    message: "Not authenticated".to_string(),
                });
            }
            Err(e) => return Err(ApiError::Identity(e.to_string())),
        };

        let request_id = Uuid::new_v4().to_string();
        let url = format!("{}{}", self.base_url, path);
        debug!(request_id = request_id.as_str(), "Sending {} request to: {}", method, url);

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&token)
            .header(REQUEST_ID_HEADER, request_id.as_str());
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            warn!(request_id = request_id.as_str(), "Error sending request: {}", e);
            ApiError::Transport(e.to_string())
        })?;
        let status = response.status();
        info!(
            event_name = "api.request.completed",
            event_domain = "api",
            request_id = request_id.as_str(),
            method = %method,
            path,
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "api request completed"
        );

        if status == StatusCode::UNAUTHORIZED {
            warn!(
                request_id = request_id.as_str(),
                "Server rejected credentials; forcing sign-out"
            );
            self.force_sign_out().await;
        }

        if status == StatusCode::NO_CONTENT {
            return decode_body(Value::Null);
        }

        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Error reading response body: {}", e)))?;

        if !status.is_success() {
            return Err(ApiError::from_status(status, error_message(status, &text)));
        }
        if text.trim().is_empty() {
            return decode_body(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PATCH, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, RequestOptions::new())
            .await
    }

    /// Sign out through the provider, drop the user's cached queries and
    /// wait (bounded) until the session store reflects it, so callers seeing
    /// the error also see the reset.
    async fn force_sign_out(&self) {
        if let Err(e) = self.identity.sign_out().await {
            warn!("Forced sign-out failed at provider: {}", e);
        }
        self.cache.clear();
        let settled = self
            .session
            .wait_until_timeout(
                |s| s.auth_state() == AuthState::Unauthenticated,
                self.sign_out_timeout,
            )
            .await;
        if settled.is_none() {
            warn!(
                "Session store did not report sign-out within {:?}",
                self.sign_out_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::identity::{StaticProvider, StaticProviderConfig};
    use crate::models::MessageResponse;
    use crate::session::{AuthSynchronizer, SynchronizerHandle};
    use mockito::{Matcher, Server};
    use serde_json::json;

    async fn client(
        base_url: &str,
        token: Option<&str>,
    ) -> (ApiClient, Arc<StaticProvider>, SynchronizerHandle) {
        let provider = Arc::new(StaticProvider::new(&StaticProviderConfig {
            name: "test".to_string(),
            token: token.map(str::to_string),
            user: None,
        }));
        let (session, handle) = AuthSynchronizer::spawn(provider.clone());
        session.ready().await.unwrap();
        let config = ApiConfig {
            base_url: base_url.to_string(),
            timeout_in_ms: 2_000,
            sign_out_timeout_in_ms: 1_000,
        };
        (
            ApiClient::new(
                &config,
                provider.clone(),
                session.clone(),
                QueryCache::new(&CacheConfig::default()).bound_to(session),
            )
            .unwrap(),
            provider,
            handle,
        )
    }

    #[test]
    fn test_error_message_prefers_message_field() {
        assert_eq!(
            error_message(StatusCode::CONFLICT, r#"{"message":"already exists"}"#),
            "already exists"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");
    }

    #[tokio::test]
    async fn test_attaches_bearer_token_and_query() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/api/v1/things")
            .match_header("authorization", "Bearer tok-1")
            .match_header(REQUEST_ID_HEADER, Matcher::Any)
            .match_query(Matcher::UrlEncoded("offset".into(), "20".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"ok"}"#)
            .create_async()
            .await;

        let (api, _provider, handle) = client(&server.url(), Some("tok-1")).await;
        let resp: MessageResponse = api
            .get("/api/v1/things", RequestOptions::new().query("offset", 20))
            .await
            .unwrap();
        m.assert_async().await;
        assert_eq!(resp.message, "ok");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_token_is_reread_for_every_request() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/a")
            .match_header("authorization", "Bearer first")
            .with_status(204)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/a")
            .match_header("authorization", "Bearer second")
            .with_status(204)
            .create_async()
            .await;

        let (api, provider, handle) = client(&server.url(), Some("first")).await;
        api.get::<()>("/a", RequestOptions::new()).await.unwrap();
        provider.set_token("second");
        api.get::<()>("/a", RequestOptions::new()).await.unwrap();
        first.assert_async().await;
        second.assert_async().await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_session_fails_without_network_call() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let (api, _provider, handle) = client(&server.url(), None).await;
        let err = api
            .get::<Value>("/api/v1/exercises", RequestOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(api.session().auth_state(), AuthState::Unauthenticated);
        m.assert_async().await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_401_response_forces_sign_out() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/api/v1/exercises")
            .with_status(401)
            .with_body(r#"{"message":"token revoked"}"#)
            .create_async()
            .await;

        let (api, provider, handle) = client(&server.url(), Some("revoked")).await;
        assert!(api.session().is_authenticated());

        let err = api
            .get::<Value>("/api/v1/exercises", RequestOptions::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::Unauthorized {
                message: "token revoked".to_string()
            }
        );
        assert_eq!(api.session().auth_state(), AuthState::Unauthenticated);
        assert!(provider.current_user().is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_body_message_and_status_are_surfaced() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("POST", "/api/v1/exercises")
            .match_body(Matcher::Json(json!({"name": ""})))
            .with_status(422)
            .with_body(r#"{"message":"name is required"}"#)
            .create_async()
            .await;

        let (api, _provider, handle) = client(&server.url(), Some("tok")).await;
        let err = api
            .post::<Value, _>("/api/v1/exercises", &json!({"name": ""}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.message(), "name is required");
        // Non-401 failures leave the session alone.
        assert!(api.session().is_authenticated());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_content_is_empty_success() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("DELETE", "/api/v1/training-sessions/s1")
            .with_status(204)
            .create_async()
            .await;

        let (api, _provider, handle) = client(&server.url(), Some("tok")).await;
        let result: Option<MessageResponse> =
            api.delete("/api/v1/training-sessions/s1").await.unwrap();
        assert!(result.is_none());
        handle.shutdown().await;
    }
}
