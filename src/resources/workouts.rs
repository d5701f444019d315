use std::collections::HashSet;
use std::sync::Arc;

use serde::de::IgnoredAny;
use serde_json::Value;
use tracing::info;

use super::client::require_id;
use crate::api::{ApiClient, ApiError, RequestOptions};
use crate::cache::{CachePartition, Family, QueryCache, Scope};
use crate::models::{
    MessageResponse, Workout, WorkoutAddRequest, WorkoutReorderRequest, WorkoutUpdateRequest,
};

const SESSIONS_PATH: &str = "/api/v1/training-sessions";
const WORKOUTS_PATH: &str = "/api/v1/workouts";

/// Workouts nested inside training sessions.
///
/// Workout entries live in the training-session cache partition. Every
/// mutation invalidates the owning session's detail entry and every session
/// listing page, since pages embed workouts too.
#[derive(Clone)]
pub struct WorkoutClient {
    api: Arc<ApiClient>,
    cache: CachePartition,
}

impl WorkoutClient {
    pub fn new(api: Arc<ApiClient>, cache: &QueryCache) -> Self {
        Self {
            api,
            cache: cache.partition(Family::TrainingSessions),
        }
    }

    pub fn cache(&self) -> &CachePartition {
        &self.cache
    }

    pub async fn add(
        &self,
        session_id: &str,
        input: &WorkoutAddRequest,
    ) -> Result<Workout, ApiError> {
        let session_id = require_id(Some(session_id), "sessionId")?;
        let workout: Workout = self
            .api
            .post(&format!("{}/{}/workouts", SESSIONS_PATH, session_id), input)
            .await?;
        self.invalidate_session(session_id);
        info!(
            event_name = "workout.added",
            event_domain = "resources",
            session_id,
            workout_id = workout.id.as_str(),
            "workout added"
        );
        Ok(workout)
    }

    pub async fn get_by_id(&self, workout_id: Option<&str>) -> Result<Workout, ApiError> {
        let workout_id = require_id(workout_id, "workoutId")?;
        let path = format!("{}/{}", WORKOUTS_PATH, workout_id);
        self.cache
            .fetch(Scope::ChildDetail, workout_id, || async {
                self.api.get::<Value>(&path, RequestOptions::new()).await
            })
            .await
    }

    pub async fn update(
        &self,
        session_id: &str,
        workout_id: &str,
        input: &WorkoutUpdateRequest,
    ) -> Result<Workout, ApiError> {
        let session_id = require_id(Some(session_id), "sessionId")?;
        let workout_id = require_id(Some(workout_id), "workoutId")?;
        let workout = self
            .api
            .put(&format!("{}/{}", WORKOUTS_PATH, workout_id), input)
            .await?;
        self.invalidate_session(session_id);
        self.cache.invalidate(Scope::ChildDetail, workout_id);
        Ok(workout)
    }

    pub async fn delete(&self, session_id: &str, workout_id: &str) -> Result<(), ApiError> {
        let session_id = require_id(Some(session_id), "sessionId")?;
        let workout_id = require_id(Some(workout_id), "workoutId")?;
        let _: IgnoredAny = self
            .api
            .delete(&format!(
                "{}/{}/workouts/{}",
                SESSIONS_PATH, session_id, workout_id
            ))
            .await?;
        self.invalidate_session(session_id);
        self.cache.evict(Scope::ChildDetail, workout_id);
        Ok(())
    }

    /// Replace the workout order of a session with `workout_ids`.
    ///
    /// The whole arrangement goes out in one request; the session detail is
    /// invalidated only once the server accepted it.
    pub async fn reorder(
        &self,
        session_id: &str,
        workout_ids: &[String],
    ) -> Result<MessageResponse, ApiError> {
        let session_id = require_id(Some(session_id), "sessionId")?;
        validate_arrangement(workout_ids)?;

        let body = WorkoutReorderRequest {
            workout_ids: workout_ids.to_vec(),
        };
        let response: Option<MessageResponse> = self
            .api
            .patch(
                &format!("{}/{}/workouts/reorder", SESSIONS_PATH, session_id),
                &body,
            )
            .await?;
        self.invalidate_session(session_id);
        info!(
            event_name = "workout.reordered",
            event_domain = "resources",
            session_id,
            count = workout_ids.len(),
            "workouts reordered"
        );
        Ok(response.unwrap_or_else(|| MessageResponse {
            message: "reordered".to_string(),
        }))
    }

    fn invalidate_session(&self, session_id: &str) {
        self.cache.invalidate(Scope::Detail, session_id);
        self.cache.invalidate_scope(Scope::List);
    }
}

fn validate_arrangement(workout_ids: &[String]) -> Result<(), ApiError> {
    if workout_ids.is_empty() {
        return Err(ApiError::bad_request("workoutIds must not be empty"));
    }
    let mut seen = HashSet::with_capacity(workout_ids.len());
    for id in workout_ids {
        if id.trim().is_empty() {
            return Err(ApiError::bad_request("workoutIds must not contain blank ids"));
        }
        if !seen.insert(id.as_str()) {
            return Err(ApiError::bad_request(format!(
                "workoutIds contains '{}' more than once",
                id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_arrangement_must_be_non_empty_and_unique() {
        assert!(validate_arrangement(&ids(&["c", "a", "b"])).is_ok());
        assert_eq!(
            validate_arrangement(&[]).unwrap_err().status(),
            Some(400)
        );
        assert!(validate_arrangement(&ids(&["a", "b", "a"])).is_err());
        assert!(validate_arrangement(&ids(&["a", " "])).is_err());
    }
}
