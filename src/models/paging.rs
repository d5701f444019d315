use serde::{Deserialize, Serialize};

/// Position of one page inside a listing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub offset: u32,
    pub limit: u32,
    pub total: u32,
}

impl Paging {
    /// Offset of the page after this one, or `None` once `offset + limit >= total`.
    pub fn next_offset(&self) -> Option<u32> {
        let next = self.offset.saturating_add(self.limit);
        // A zero limit would never advance.
        if self.limit == 0 || next >= self.total {
            None
        } else {
            Some(next)
        }
    }
}

/// One page of a listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    #[serde(alias = "data")]
    pub items: Vec<T>,
    pub paging: Paging,
}

/// Generic `{message}` payload returned by some mutations and by every error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}
