use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::api::{ApiClient, ApiError, RequestOptions};
use crate::cache::{CachePartition, Family, QueryCache, Scope};

/// Endpoint and payload types of one resource family.
pub trait Resource: Send + Sync + 'static {
    const FAMILY: Family;
    /// Collection path, e.g. `/api/v1/exercises`.
    const PATH: &'static str;
    /// Name used in "`<ID_NAME>` is required" errors.
    const ID_NAME: &'static str;

    type Entity: DeserializeOwned + Send;
    type List: DeserializeOwned + Send;
    type CreateInput: Serialize + Sync;
    type UpdateInput: Serialize + Sync;
    type DeleteOutput: DeserializeOwned + Send;
}

/// Listing parameters. Each distinct value is cached separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ListParams {
    pub offset: Option<u32>,
}

impl ListParams {
    pub fn at_offset(offset: u32) -> Self {
        Self {
            offset: Some(offset),
        }
    }

    pub(crate) fn cache_params(&self) -> String {
        match self.offset {
            Some(offset) => format!("offset={}", offset),
            None => String::new(),
        }
    }

    pub(crate) fn request_options(&self) -> RequestOptions {
        let options = RequestOptions::new();
        match self.offset {
            Some(offset) => options.query("offset", offset),
            None => options,
        }
    }
}

/// Reject missing, blank or padded ids before anything goes over the wire.
/// Ids are used verbatim in paths and cache keys, so they are never trimmed.
pub(crate) fn require_id<'a>(id: Option<&'a str>, name: &str) -> Result<&'a str, ApiError> {
    match id {
        Some(id) if id.trim().is_empty() => {
            Err(ApiError::bad_request(format!("{} is required", name)))
        }
        Some(id) if id.trim() != id => Err(ApiError::bad_request(format!(
            "{} must not have surrounding whitespace",
            name
        ))),
        Some(id) => Ok(id),
        None => Err(ApiError::bad_request(format!("{} is required", name))),
    }
}

/// Cached CRUD operations for one resource family.
///
/// Mutations invalidate the family's cache entries before returning, so a
/// caller that reads right after a successful mutation gets fresh data:
/// `create` invalidates every listing, `update` also invalidates the
/// entity's detail entry, `delete` evicts it.
pub struct ResourceClient<R: Resource> {
    api: Arc<ApiClient>,
    cache: CachePartition,
    _resource: PhantomData<fn() -> R>,
}

impl<R: Resource> Clone for ResourceClient<R> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            cache: self.cache.clone(),
            _resource: PhantomData,
        }
    }
}

impl<R: Resource> ResourceClient<R> {
    pub fn new(api: Arc<ApiClient>, cache: &QueryCache) -> Self {
        Self {
            api,
            cache: cache.partition(R::FAMILY),
            _resource: PhantomData,
        }
    }

    pub fn cache(&self) -> &CachePartition {
        &self.cache
    }

    pub async fn list(&self, params: ListParams) -> Result<R::List, ApiError> {
        self.cache
            .fetch(Scope::List, &params.cache_params(), || async {
                self.api
                    .get::<Value>(R::PATH, params.request_options())
                    .await
            })
            .await
    }

    pub async fn get_by_id(&self, id: Option<&str>) -> Result<R::Entity, ApiError> {
        let id = require_id(id, R::ID_NAME)?;
        let path = format!("{}/{}", R::PATH, id);
        self.cache
            .fetch(Scope::Detail, id, || async {
                self.api.get::<Value>(&path, RequestOptions::new()).await
            })
            .await
    }

    pub async fn create(&self, input: &R::CreateInput) -> Result<R::Entity, ApiError> {
        let created = self.api.post(R::PATH, input).await?;
        self.cache.invalidate_scope(Scope::List);
        info!(
            event_name = "resource.created",
            event_domain = "resources",
            family = R::FAMILY.as_str(),
            "resource created"
        );
        Ok(created)
    }

    pub async fn update(&self, id: &str, input: &R::UpdateInput) -> Result<R::Entity, ApiError> {
        let id = require_id(Some(id), R::ID_NAME)?;
        let updated = self
            .api
            .put(&format!("{}/{}", R::PATH, id), input)
            .await?;
        self.cache.invalidate_scope(Scope::List);
        self.cache.invalidate(Scope::Detail, id);
        info!(
            event_name = "resource.updated",
            event_domain = "resources",
            family = R::FAMILY.as_str(),
            id,
            "resource updated"
        );
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<R::DeleteOutput, ApiError> {
        let id = require_id(Some(id), R::ID_NAME)?;
        let output = self.api.delete(&format!("{}/{}", R::PATH, id)).await?;
        self.cache.invalidate_scope(Scope::List);
        self.cache.evict(Scope::Detail, id);
        info!(
            event_name = "resource.deleted",
            event_domain = "resources",
            family = R::FAMILY.as_str(),
            id,
            "resource deleted"
        );
        Ok(output)
    }
}
