use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One visit to the gym, holding its workouts in display order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub workouts: Vec<Workout>,
}

impl TrainingSession {
    /// Workout ids in their current order.
    pub fn workout_ids(&self) -> Vec<&str> {
        self.workouts.iter().map(|w| w.id.as_str()).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSessionCreateRequest {
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Partial update; absent fields are left unchanged by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSessionUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// An exercise performed within a training session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workout {
    pub id: String,
    pub exercise_id: String,
    #[serde(default)]
    pub exercise_name: Option<String>,
    #[serde(default)]
    pub sets: Vec<WorkoutSet>,
    #[serde(default)]
    pub memo: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct WorkoutSet {
    pub weight: f64,
    pub reps: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutAddRequest {
    pub exercise_id: String,
    #[serde(default)]
    pub sets: Vec<WorkoutSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sets: Option<Vec<WorkoutSet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// The complete target order of a session's workouts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkoutReorderRequest {
    pub workout_ids: Vec<String>,
}
