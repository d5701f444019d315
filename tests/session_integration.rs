mod common;

use std::time::Duration;

use mockito::Matcher;
use serde_json::json;

use common::{signed_in_client, signed_out_client};
use trainlog::api::ApiError;
use trainlog::models::User;
use trainlog::resources::ListParams;
use trainlog::session::AuthState;

#[tokio::test]
async fn test_any_401_resets_session() {
    let mut client = signed_in_client().await;
    client
        .server
        .mock("GET", "/api/v1/exercises")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body(json!({"message": "Token expired"}).to_string())
        .create_async()
        .await;

    let err = client
        .state
        .exercises
        .list(ListParams::default())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ApiError::Unauthorized {
            message: "Token expired".into()
        }
    );
    assert_eq!(client.state.session.auth_state(), AuthState::Unauthenticated);
    assert!(client.state.session.user().is_none());
}

#[tokio::test]
async fn test_request_without_session_never_reaches_network() {
    let mut client = signed_out_client().await;
    let any = client
        .server
        .mock("GET", Matcher::Any)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let err = client
        .state
        .training_sessions
        .get_by_id(Some("S1"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(client.state.session.auth_state(), AuthState::Unauthenticated);
    any.assert_async().await;
}

#[tokio::test]
async fn test_store_follows_provider_events() {
    let client = signed_out_client().await;
    let store = client.state.session.clone();

    client
        .provider
        .sign_in(User::new("u2", Some("second@example.com".into()), None, None), "t2");
    let session = store
        .wait_until_timeout(|s| s.is_authenticated(), Duration::from_secs(1))
        .await
        .expect("sign-in should reach the store");
    assert_eq!(session.user().map(|u| u.uid.as_str()), Some("u2"));

    client.state.sign_out().await.unwrap();
    assert_eq!(store.auth_state(), AuthState::Unauthenticated);
    assert!(store.user().is_none());
}

#[tokio::test]
async fn test_error_status_and_message_are_surfaced() {
    let mut client = signed_in_client().await;
    client
        .server
        .mock("GET", "/api/v1/training-sessions/missing")
        .with_status(404)
        .with_body(json!({"message": "Training session not found"}).to_string())
        .create_async()
        .await;
    client
        .server
        .mock("GET", "/api/v1/exercises/broken")
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;

    let err = client
        .state
        .training_sessions
        .get_by_id(Some("missing"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.message(), "Training session not found");

    let err = client
        .state
        .exercises
        .get_by_id(Some("broken"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.message(), "upstream unavailable");
    // errors do not sign the user out
    assert_eq!(client.state.session.auth_state(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_user_sign_out_clears_cache() {
    let mut client = signed_in_client().await;
    client
        .server
        .mock("GET", "/api/v1/exercises")
        .match_query(Matcher::Any)
        .with_body(json!({"items": [{"id": "e1", "name": "Squat"}]}).to_string())
        .create_async()
        .await;

    client
        .state
        .exercises
        .list(ListParams::default())
        .await
        .unwrap();
    assert!(!client.state.cache.is_empty());

    client.state.sign_out().await.unwrap();
    assert!(client.state.cache.is_empty());
    assert_eq!(client.state.session.auth_state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn test_forced_sign_out_does_not_leak_cache_to_next_user() {
    let mut client = signed_in_client().await;
    let first_user = client
        .server
        .mock("GET", "/api/v1/exercises")
        .match_query(Matcher::Any)
        .with_body(json!({"items": [{"id": "e1", "name": "u1 private lift"}]}).to_string())
        .expect(1)
        .create_async()
        .await;
    client
        .server
        .mock("GET", "/api/v1/training-sessions/S1")
        .with_status(401)
        .with_body(json!({"message": "Token revoked"}).to_string())
        .create_async()
        .await;

    let exercises = &client.state.exercises;
    let listed = exercises.list(ListParams::default()).await.unwrap();
    assert_eq!(listed.items[0].name, "u1 private lift");
    first_user.assert_async().await;
    first_user.remove_async().await;

    let err = client
        .state
        .training_sessions
        .get_by_id(Some("S1"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(client.state.session.auth_state(), AuthState::Unauthenticated);
    assert!(client.state.cache.is_empty());

    let second_user = client
        .server
        .mock("GET", "/api/v1/exercises")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer t2")
        .with_body(json!({"items": [{"id": "e7", "name": "u2 lift"}]}).to_string())
        .expect(1)
        .create_async()
        .await;
    client
        .provider
        .sign_in(User::new("u2", None, None, None), "t2");
    client
        .state
        .session
        .wait_until_timeout(|s| s.is_authenticated(), Duration::from_secs(1))
        .await
        .expect("second user should be signed in");

    let listed = exercises.list(ListParams::default()).await.unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].name, "u2 lift");
    second_user.assert_async().await;
}
