//! File transport for staged hitspool data.
//!
//! This crate provides:
//! - The [`FileTransport`] trait and destination parsing
//! - Backends: rsync and scp
//! - Parsers that pull per-file and total figures out of their output

pub mod backends;
pub mod error;
pub mod output;
pub mod traits;

pub use backends::{rsync::RsyncBackend, scp::ScpBackend};
pub use error::{TransportError, TransportResult};
pub use traits::{Destination, FileReport, FileTransport, TransferSummary};

use hitspool_core::config::{TransportConfig, TransportKind};
use std::sync::Arc;

/// Build the configured backends, in the order they should be tried.
pub fn from_config(config: &TransportConfig) -> TransportResult<Vec<Arc<dyn FileTransport>>> {
    config.validate().map_err(TransportError::Config)?;

    Ok(config
        .backends
        .iter()
        .map(|kind| -> Arc<dyn FileTransport> {
            match kind {
                TransportKind::Rsync => Arc::new(RsyncBackend::new(
                    &config.rsync_program,
                    config.bwlimit_kbps,
                    config.create_remote_dir,
                )),
                TransportKind::Scp => Arc::new(ScpBackend::new(
                    &config.scp_program,
                    &config.ssh_program,
                    config.bwlimit_kbps,
                    config.create_remote_dir,
                )),
            }
        })
        .collect())
}
