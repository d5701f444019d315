use serde::{Deserialize, Serialize};

/// An exercise from the user's catalogue (e.g. "Bench press").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub body_part: Option<String>,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Body of `POST /exercises` and `PUT /exercises/{id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_part: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

/// Response of `GET /exercises`; the catalogue is not paginated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ExerciseList {
    #[serde(alias = "data", alias = "exercises")]
    pub items: Vec<Exercise>,
}
