//! Request cache repository.

use crate::error::MetadataResult;
use crate::models::CachedRequest;
use async_trait::async_trait;
use hitspool_core::{HostPhase, Request, RequestStatus};
use time::OffsetDateTime;

/// Durable mirror of the RequestMonitor's state.
#[async_trait]
pub trait RequestRepo: Send + Sync {
    /// Record a newly admitted request.
    /// Fails with `AlreadyExists` if the ID is already cached.
    async fn insert_request(
        &self,
        request: &Request,
        phase: RequestStatus,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    async fn get_request(&self, id: &str) -> MetadataResult<Option<CachedRequest>>;

    /// Every cached request with its host rows, ordered by `start_tick`.
    async fn list_requests(&self) -> MetadataResult<Vec<CachedRequest>>;

    /// Change the request-level phase.
    async fn set_request_phase(
        &self,
        id: &str,
        phase: RequestStatus,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Insert or replace one host's phase.
    async fn upsert_host(
        &self,
        id: &str,
        host: &str,
        phase: HostPhase,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Remove the request and all of its host rows.
    /// Returns whether anything was removed.
    async fn delete_request(&self, id: &str) -> MetadataResult<bool>;
}
