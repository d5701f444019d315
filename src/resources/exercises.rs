use super::client::{Resource, ResourceClient};
use crate::cache::Family;
use crate::models::{Exercise, ExerciseList, ExerciseRequest, MessageResponse};

pub struct Exercises;

impl Resource for Exercises {
    const FAMILY: Family = Family::Exercises;
    const PATH: &'static str = "/api/v1/exercises";
    const ID_NAME: &'static str = "exerciseId";

    type Entity = Exercise;
    type List = ExerciseList;
    type CreateInput = ExerciseRequest;
    type UpdateInput = ExerciseRequest;
    type DeleteOutput = MessageResponse;
}

pub type ExerciseClient = ResourceClient<Exercises>;
