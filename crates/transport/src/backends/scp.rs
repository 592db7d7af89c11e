//! scp backend.

use super::{run_tool, shell_quote, undelivered};
use crate::error::{TransportError, TransportResult};
use crate::output::{ScpParser, warn_if_noisy};
use crate::traits::{Destination, FileTransport, TransferSummary};
use async_trait::async_trait;
use std::path::PathBuf;

/// Copies with `scp -v -r`. Cannot reach rsync daemon modules.
pub struct ScpBackend {
    program: String,
    ssh_program: String,
    bwlimit_kbps: u64,
    create_remote_dir: bool,
}

impl ScpBackend {
    pub fn new(
        program: impl Into<String>,
        ssh_program: impl Into<String>,
        bwlimit_kbps: u64,
        create_remote_dir: bool,
    ) -> Self {
        Self {
            program: program.into(),
            ssh_program: ssh_program.into(),
            bwlimit_kbps,
            create_remote_dir,
        }
    }

    /// Command-line arguments for copying `files` to `destination`.
    pub fn args(&self, files: &[PathBuf], destination: &Destination) -> Vec<String> {
        let mut args = vec!["-v".to_string(), "-r".to_string(), "-B".to_string()];
        if self.bwlimit_kbps > 0 {
            // scp limits in Kbit/s
            args.push("-l".to_string());
            args.push((self.bwlimit_kbps * 8).to_string());
        }
        args.extend(files.iter().map(|f| f.display().to_string()));
        args.push(destination.to_string());
        args
    }

    async fn make_dir(&self, destination: &Destination) -> TransportResult<()> {
        match destination {
            Destination::Local(dir) => Ok(tokio::fs::create_dir_all(dir).await?),
            Destination::Remote { path, .. } => {
                let login = destination.login().unwrap_or_default();
                let args = vec![
                    "-o".to_string(),
                    "BatchMode=yes".to_string(),
                    login,
                    format!("mkdir -p {}", shell_quote(path)),
                ];
                let output = run_tool(&self.ssh_program, &args).await?;
                if !output.success {
                    tracing::warn!(
                        destination = %destination,
                        status = output.status.unwrap_or(-1),
                        "could not create remote directory"
                    );
                }
                Ok(())
            }
            Destination::Daemon { .. } => Ok(()),
        }
    }
}

#[async_trait]
impl FileTransport for ScpBackend {
    fn name(&self) -> &'static str {
        "scp"
    }

    async fn copy(&self, files: &[PathBuf], destination: &Destination) -> TransportResult<TransferSummary> {
        if let Destination::Daemon { .. } = destination {
            return Err(TransportError::InvalidDestination(format!(
                "scp cannot copy to rsync module {destination}"
            )));
        }
        if files.is_empty() {
            return Ok(TransferSummary::default());
        }
        if self.create_remote_dir {
            self.make_dir(destination).await?;
        }

        let output = run_tool(&self.program, &self.args(files, destination)).await?;
        let mut parser = ScpParser::new();
        for line in &output.lines {
            parser.feed(line);
        }
        let summary = parser.finish();
        warn_if_noisy(self.name(), &summary);

        if !output.success {
            return Err(TransportError::Failed {
                backend: self.name(),
                status: output.status.unwrap_or(-1),
                failed: files.iter().map(|f| f.display().to_string()).collect(),
            });
        }

        // scp names files without their directory, so a directory copy
        // never matches by name; only flag plain files that went missing.
        let missing: Vec<String> = undelivered(files, &summary.files)
            .into_iter()
            .filter(|name| files.iter().any(|f| f.is_file() && f.ends_with(name)))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "scp did not report every file");
        }

        tracing::debug!(
            destination = %destination,
            files = summary.file_count(),
            bytes_sent = summary.bytes_sent,
            "scp finished"
        );
        Ok(summary)
    }
}
