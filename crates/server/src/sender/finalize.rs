//! Delivery of a hub's staged directory into its dropbox and, for archived
//! categories, into the archival queue.

use crate::error::{ServiceError, ServiceResult};
use async_compression::tokio::write::BzEncoder;
use hitspool_core::config::{ArchiveMetadata, SenderConfig};
use hitspool_core::{HostReport, Prefix, Request, StagedName, TickClock};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

pub struct Finalizer {
    archive_dir: PathBuf,
    metadata: ArchiveMetadata,
    archived: Vec<Prefix>,
    clock: Arc<TickClock>,
}

impl Finalizer {
    pub fn new(
        archive_dir: impl Into<PathBuf>,
        metadata: ArchiveMetadata,
        archived: Vec<Prefix>,
        clock: Arc<TickClock>,
    ) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            metadata,
            archived,
            clock,
        }
    }

    pub fn from_config(config: &SenderConfig, clock: Arc<TickClock>) -> Self {
        Self::new(
            config.archive_dir.clone(),
            config.archive_metadata,
            config.archived_prefixes.clone(),
            clock,
        )
    }

    /// Move the reported directory into the request's destination.
    ///
    /// Returns the final location. Fails with `MoveFailed` when the name is
    /// off-pattern or the move fails, and with `ArchiveFailed` when the
    /// tarball or its metadata cannot be written.
    pub async fn finalize(&self, report: &HostReport) -> ServiceResult<PathBuf> {
        let source = PathBuf::from(&report.copy_dir);
        let base = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ServiceError::MoveFailed(format!("no staged directory in {:?}", report.copy_dir)))?
            .to_string();
        let name = StagedName::parse(&base).map_err(|e| ServiceError::MoveFailed(e.to_string()))?;

        let target = Path::new(&report.request.destination_dir).join(&base);
        move_dir(&source, &target)
            .await
            .map_err(|e| ServiceError::MoveFailed(format!("{} -> {}: {e}", source.display(), target.display())))?;
        tracing::info!(
            request_id = %report.request.id,
            hub = %report.host,
            target = %target.display(),
            "delivered"
        );

        if self.archived.contains(&name.prefix) {
            let tarball = self
                .archive(&target, &name, &report.request)
                .await
                .map_err(|e| ServiceError::ArchiveFailed(format!("{name}: {e}")))?;
            tracing::info!(
                request_id = %report.request.id,
                tarball = %tarball.display(),
                "queued for archival"
            );
        }

        Ok(target)
    }

    async fn archive(&self, dir: &Path, name: &StagedName, request: &Request) -> io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.archive_dir).await?;
        let stem = format!("HS_{name}");
        let tarball = self.archive_dir.join(format!("{stem}.dat.tar.bz2"));

        let staging = self.archive_dir.join(format!(".{stem}.tar.part"));
        let result = write_tarball(dir, &name.to_string(), &staging, &tarball).await;
        if let Err(e) = tokio::fs::remove_file(&staging).await
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(path = %staging.display(), error = %e, "could not remove tar staging file");
        }
        result?;

        let semaphore = self.archive_dir.join(format!("{stem}.sem"));
        match self.metadata {
            ArchiveMetadata::MetaXml => {
                let xml_path = self.archive_dir.join(format!("{stem}.meta.xml"));
                let xml = self.meta_xml(name, request, &tarball);
                if let Err(e) = tokio::fs::write(&xml_path, xml).await {
                    tracing::warn!(path = %xml_path.display(), error = %e, "metadata write failed, using semaphore");
                    tokio::fs::write(&semaphore, b"").await?;
                }
            }
            ArchiveMetadata::Semaphore => tokio::fs::write(&semaphore, b"").await?,
        }
        Ok(tarball)
    }

    fn meta_xml(&self, name: &StagedName, request: &Request, tarball: &Path) -> String {
        let utc = |tick| {
            self.clock
                .ticks_to_utc(tick)
                .map(|t| t.to_string())
                .unwrap_or_else(|_| tick.to_string())
        };
        let file = tarball
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<DIF_Plus>
  <DIF>
    <Entry_ID>HS_{name}</Entry_ID>
    <Entry_Title>IceCube HitSpool data from {hub}</Entry_Title>
    <Temporal_Coverage>
      <Start_Date>{start}</Start_Date>
      <Stop_Date>{stop}</Stop_Date>
    </Temporal_Coverage>
  </DIF>
  <Plus>
    <Start_DateTime>{start}</Start_DateTime>
    <End_DateTime>{stop}</End_DateTime>
    <Category>{category}</Category>
    <Subcategory>{hub}</Subcategory>
    <File_Name>{file}</File_Name>
  </Plus>
</DIF_Plus>
"#,
            hub = name.hub,
            start = utc(request.start_tick),
            stop = utc(request.stop_tick),
            category = name.prefix,
        )
    }
}

/// Tar `dir` as `entry` into `staging`, then stream it through bzip2 into
/// `tarball`. Neither step holds the archive in memory.
async fn write_tarball(dir: &Path, entry: &str, staging: &Path, tarball: &Path) -> io::Result<()> {
    let (dir_owned, entry, staging_owned) = (dir.to_path_buf(), entry.to_string(), staging.to_path_buf());
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let file = std::fs::File::create(&staging_owned)?;
        let mut builder = tar::Builder::new(std::io::BufWriter::new(file));
        builder.append_dir_all(&entry, &dir_owned)?;
        let mut writer = builder.into_inner()?;
        std::io::Write::flush(&mut writer)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)??;

    let mut source = tokio::io::BufReader::new(tokio::fs::File::open(staging).await?);
    let mut encoder = BzEncoder::new(tokio::fs::File::create(tarball).await?);
    tokio::io::copy(&mut source, &mut encoder).await?;
    encoder.shutdown().await?;
    Ok(())
}

/// Rename `source` to `target`, replacing any existing target. Falls back
/// to copy and delete across filesystems.
async fn move_dir(source: &Path, target: &Path) -> io::Result<()> {
    if source == target {
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::try_exists(target).await? {
        tracing::warn!(target = %target.display(), "replacing earlier delivery");
        tokio::fs::remove_dir_all(target).await?;
    }

    match tokio::fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            tracing::debug!(error = %e, "rename failed, copying instead");
            let (from, to) = (source.to_path_buf(), target.to_path_buf());
            tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                .await
                .map_err(io::Error::other)??;
            tokio::fs::remove_dir_all(source).await
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), dest)?;
        }
    }
    Ok(())
}
