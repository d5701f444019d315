use tracing::debug;

use super::client::{ListParams, Resource, ResourceClient};
use crate::api::ApiError;
use crate::cache::Family;
use crate::models::{
    MessageResponse, Page, TrainingSession, TrainingSessionCreateRequest,
    TrainingSessionUpdateRequest,
};

pub struct TrainingSessions;

impl Resource for TrainingSessions {
    const FAMILY: Family = Family::TrainingSessions;
    const PATH: &'static str = "/api/v1/training-sessions";
    const ID_NAME: &'static str = "sessionId";

    type Entity = TrainingSession;
    type List = Page<TrainingSession>;
    type CreateInput = TrainingSessionCreateRequest;
    type UpdateInput = TrainingSessionUpdateRequest;
    /// `204 No Content` decodes as `None`.
    type DeleteOutput = Option<MessageResponse>;
}

pub type TrainingSessionClient = ResourceClient<TrainingSessions>;

impl ResourceClient<TrainingSessions> {
    /// Load-more cursor over the session listing, starting at offset 0.
    pub fn infinite(&self) -> InfiniteSessions {
        InfiniteSessions::new(self.clone())
    }
}

/// Accumulates listing pages one "load more" at a time.
///
/// The next offset comes only from the last fetched page's paging block.
/// Pages go through the regular listing cache, so a create, update or delete
/// of a session makes the next fetch of each offset hit the network.
pub struct InfiniteSessions {
    client: TrainingSessionClient,
    pages: Vec<Page<TrainingSession>>,
    next_offset: Option<u32>,
}

impl InfiniteSessions {
    pub fn new(client: TrainingSessionClient) -> Self {
        Self {
            client,
            pages: Vec::new(),
            next_offset: Some(0),
        }
    }

    pub fn has_next_page(&self) -> bool {
        self.next_offset.is_some()
    }

    pub fn next_offset(&self) -> Option<u32> {
        self.next_offset
    }

    /// Fetch the next page. `Ok(None)` once the listing is exhausted; a
    /// failed fetch leaves the cursor where it was.
    pub async fn fetch_next_page(&mut self) -> Result<Option<&Page<TrainingSession>>, ApiError> {
        let Some(offset) = self.next_offset else {
            return Ok(None);
        };
        let page = self.client.list(ListParams::at_offset(offset)).await?;
        self.next_offset = page.paging.next_offset();
        debug!(
            "Loaded sessions page at offset {} ({} items, next: {:?})",
            offset,
            page.items.len(),
            self.next_offset
        );
        self.pages.push(page);
        Ok(self.pages.last())
    }

    pub fn pages(&self) -> &[Page<TrainingSession>] {
        &self.pages
    }

    pub fn sessions(&self) -> impl Iterator<Item = &TrainingSession> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    /// Forget loaded pages and start again from offset 0.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.next_offset = Some(0);
    }
}
