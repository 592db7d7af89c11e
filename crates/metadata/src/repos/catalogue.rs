//! Hitspool catalogue repository.

use crate::error::MetadataResult;
use crate::models::HitspoolFileRow;
use async_trait::async_trait;
use hitspool_core::Tick;

/// Read access to one hub's hitspool catalogue.
#[async_trait]
pub trait CatalogueRepo: Send + Sync {
    /// Files with `stop_tick >= start` and `start_tick <= stop`, ordered by
    /// `start_tick`.
    async fn files_in_range(&self, start: Tick, stop: Tick) -> MetadataResult<Vec<HitspoolFileRow>>;

    /// `(min(start_tick), max(stop_tick))` over the whole catalogue, or
    /// `None` when it is empty.
    async fn span(&self) -> MetadataResult<Option<(Tick, Tick)>>;
}
