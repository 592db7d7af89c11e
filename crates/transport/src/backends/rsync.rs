//! rsync backend.

use super::{run_tool, shell_quote, undelivered};
use crate::error::{TransportError, TransportResult};
use crate::output::{RsyncParser, rsync_out_format, warn_if_noisy};
use crate::traits::{Destination, FileTransport, TransferSummary};
use async_trait::async_trait;
use std::path::PathBuf;

/// Copies with `rsync -av`, recursing into directories.
pub struct RsyncBackend {
    program: String,
    bwlimit_kbps: u64,
    create_remote_dir: bool,
}

impl RsyncBackend {
    pub fn new(program: impl Into<String>, bwlimit_kbps: u64, create_remote_dir: bool) -> Self {
        Self {
            program: program.into(),
            bwlimit_kbps,
            create_remote_dir,
        }
    }

    /// Command-line arguments for copying `files` to `destination`.
    pub fn args(&self, files: &[PathBuf], destination: &Destination) -> Vec<String> {
        let mut args = vec![
            "-av".to_string(),
            format!("--out-format={}", rsync_out_format()),
        ];
        if self.bwlimit_kbps > 0 {
            args.push(format!("--bwlimit={}", self.bwlimit_kbps));
        }
        if self.create_remote_dir
            && let Destination::Remote { path, .. } = destination
        {
            args.push(format!("--rsync-path=mkdir -p {} && rsync", shell_quote(path)));
        }
        args.extend(files.iter().map(|f| f.display().to_string()));
        args.push(destination.to_string());
        args
    }
}

#[async_trait]
impl FileTransport for RsyncBackend {
    fn name(&self) -> &'static str {
        "rsync"
    }

    async fn copy(&self, files: &[PathBuf], destination: &Destination) -> TransportResult<TransferSummary> {
        if files.is_empty() {
            return Ok(TransferSummary::default());
        }
        if self.create_remote_dir
            && let Destination::Local(dir) = destination
        {
            tokio::fs::create_dir_all(dir).await?;
        }

        let output = run_tool(&self.program, &self.args(files, destination)).await?;
        let mut parser = RsyncParser::new();
        for line in &output.lines {
            parser.feed(line);
        }
        let summary = parser.finish();
        warn_if_noisy(self.name(), &summary);

        if !output.success {
            let mut failed = undelivered(files, &summary.files);
            if failed.is_empty() {
                failed = files.iter().map(|f| f.display().to_string()).collect();
            }
            return Err(TransportError::Failed {
                backend: self.name(),
                status: output.status.unwrap_or(-1),
                failed,
            });
        }

        tracing::debug!(
            destination = %destination,
            files = summary.file_count(),
            bytes_sent = summary.bytes_sent,
            "rsync finished"
        );
        Ok(summary)
    }
}
