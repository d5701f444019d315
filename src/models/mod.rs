pub mod exercise;
pub mod paging;
pub mod training_session;
pub mod user;

pub use exercise::{Exercise, ExerciseList, ExerciseRequest};
pub use paging::{MessageResponse, Page, Paging};
pub use training_session::{
    TrainingSession, TrainingSessionCreateRequest, TrainingSessionUpdateRequest, Workout,
    WorkoutAddRequest, WorkoutReorderRequest, WorkoutSet, WorkoutUpdateRequest,
};
pub use user::User;
