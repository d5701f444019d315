#![allow(dead_code)]

use std::sync::Arc;

use mockito::{Server, ServerGuard};
use serde_json::{json, Value};

use trainlog::config::{load_config_str, ConfigV1};
use trainlog::identity::{IdentityConfig, StaticProvider};
use trainlog::session::AuthState;
use trainlog::startup::connect_with_provider;
use trainlog::state::ClientState;

pub const TEST_TOKEN: &str = "test-token";

pub fn test_config(base_url: &str, token: Option<&str>) -> ConfigV1 {
    let token_line = token
        .map(|t| format!("  token: \"{}\"\n", t))
        .unwrap_or_default();
    let yaml = format!(
        r#"
version: "1.0.0"
logging:
  level: "debug"
  format: "json"
api:
  base_url: "{base_url}"
  timeout_in_ms: 3000
  sign_out_timeout_in_ms: 1000
cache:
  capacity: 64
  stale_time_in_ms: 60000
identity:
  type: "static"
  name: "test"
{token_line}  user:
    uid: "u1"
    email: "lifter@example.com"
    display_name: "Lifter"
"#
    );
    load_config_str(&yaml).expect("test config should parse")
}

pub struct TestClient {
    pub server: ServerGuard,
    pub provider: Arc<StaticProvider>,
    pub state: ClientState,
}

async fn build(token: Option<&str>) -> TestClient {
    let server = Server::new_async().await;
    let config = test_config(&server.url(), token);
    let provider = match &config.identity {
        IdentityConfig::Static(cfg) => Arc::new(StaticProvider::new(cfg)),
        _ => unreachable!("test config uses the static provider"),
    };
    let state = connect_with_provider(Arc::new(config), provider.clone())
        .await
        .expect("client should connect");
    state.session.ready().await.expect("session should settle");
    TestClient {
        server,
        provider,
        state,
    }
}

/// A client whose session is already authenticated as `u1`.
pub async fn signed_in_client() -> TestClient {
    let client = build(Some(TEST_TOKEN)).await;
    assert_eq!(client.state.session.auth_state(), AuthState::Authenticated);
    client
}

/// A client with no session at all.
pub async fn signed_out_client() -> TestClient {
    let client = build(None).await;
    assert_eq!(
        client.state.session.auth_state(),
        AuthState::Unauthenticated
    );
    client
}

pub fn session_json(id: &str, workout_ids: &[&str]) -> Value {
    let workouts: Vec<Value> = workout_ids
        .iter()
        .map(|wid| json!({"id": wid, "exerciseId": "e1", "sets": [{"weight": 60.0, "reps": 5}]}))
        .collect();
    json!({
        "id": id,
        "startedAt": "2024-05-01T10:00:00Z",
        "workouts": workouts,
    })
}

pub fn sessions_page(offset: u32, limit: u32, total: u32) -> Value {
    let end = (offset + limit).min(total);
    let items: Vec<Value> = (offset..end)
        .map(|i| session_json(&format!("S{}", i), &[]))
        .collect();
    json!({
        "items": items,
        "paging": {"offset": offset, "limit": limit, "total": total},
    })
}
