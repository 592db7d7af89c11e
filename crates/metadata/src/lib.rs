//! Catalogue access and the durable request cache.
//!
//! - [`HitspoolCatalogue`]: read-only view of one hub's ring index
//! - [`SqliteStore`]: the RequestMonitor's persistent state

pub mod catalogue;
pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use catalogue::HitspoolCatalogue;
pub use error::{MetadataError, MetadataResult};
pub use repos::{CatalogueRepo, RequestRepo};
pub use store::{SqliteStore, StateStore};

use std::path::Path;
use std::sync::Arc;

/// Open the request cache at `path`.
pub async fn open_cache(path: impl AsRef<Path>) -> MetadataResult<Arc<dyn StateStore>> {
    let store = SqliteStore::new(path).await?;
    Ok(Arc::new(store) as Arc<dyn StateStore>)
}
