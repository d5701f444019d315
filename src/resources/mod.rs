pub mod client;
pub mod exercises;
pub mod training_sessions;
pub mod workouts;

pub use client::{ListParams, Resource, ResourceClient};
pub use exercises::{ExerciseClient, Exercises};
pub use training_sessions::{InfiniteSessions, TrainingSessionClient, TrainingSessions};
pub use workouts::WorkoutClient;
