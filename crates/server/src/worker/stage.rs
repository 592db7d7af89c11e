//! Staging of catalogue files into a per-request directory.

use crate::error::{ServiceError, ServiceResult};
use hitspool_core::Request;
use hitspool_core::hits::{extract_file_name, extract_hits};
use hitspool_metadata::models::HitspoolFileRow;
use std::path::{Path, PathBuf};

/// What ended up in the staging directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Staged {
    pub files: usize,
    pub bytes: u64,
}

/// Fill `dir` with the data for `request`.
///
/// Ring files are hardlinked so a concurrent overwrite of the ring cannot
/// change the staged copy. With `extract`, matching records are filtered
/// into a single `hits_<start>_<stop>.dat` instead.
pub async fn stage_files(
    request: &Request,
    files: &[HitspoolFileRow],
    hitspool_dir: &Path,
    dir: &Path,
    extract: bool,
) -> ServiceResult<Staged> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tracing::warn!(dir = %dir.display(), "staging directory exists, replacing it");
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await?;

    let sources: Vec<PathBuf> = files.iter().map(|f| hitspool_dir.join(&f.filename)).collect();

    if extract {
        let output = dir.join(extract_file_name(request.start_tick, request.stop_tick));
        let (start, stop) = (request.start_tick, request.stop_tick);
        let summary = tokio::task::spawn_blocking(move || extract_hits(&sources, start, stop, &output))
            .await
            .map_err(|e| ServiceError::ExtractFailed(e.to_string()))?
            .map_err(|e| ServiceError::ExtractFailed(e.to_string()))?;
        tracing::debug!(
            records_read = summary.records_read,
            records_kept = summary.records_kept,
            "hits extracted"
        );
    } else {
        for (source, row) in sources.iter().zip(files) {
            let target = dir.join(&row.filename);
            tokio::fs::hard_link(source, &target)
                .await
                .map_err(|e| ServiceError::LinkFailed(format!("{}: {e}", source.display())))?;
        }
    }

    measure(dir).await
}

async fn measure(dir: &Path) -> ServiceResult<Staged> {
    let mut staged = Staged::default();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() {
            staged.files += 1;
            staged.bytes += meta.len();
        }
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hitspool_core::{HubSet, Prefix};

    fn request() -> Request {
        Request {
            id: "s1".to_string(),
            username: "u".to_string(),
            prefix: Prefix::Anon,
            start_tick: 0,
            stop_tick: 10,
            destination_dir: "/tmp".to_string(),
            hubs: HubSet::all(),
            extract: false,
        }
    }

    #[tokio::test]
    async fn missing_source_is_a_link_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let rows = vec![HitspoolFileRow {
            filename: "HitSpool-9.dat".to_string(),
            start_tick: 0,
            stop_tick: 10,
        }];
        let err = stage_files(&request(), &rows, tmp.path(), &tmp.path().join("stage"), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "link_failed");
    }

    #[tokio::test]
    async fn stale_staging_directory_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("HitSpool-1.dat"), b"abcd").unwrap();
        let dir = tmp.path().join("stage");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("leftover"), b"old").unwrap();

        let rows = vec![HitspoolFileRow {
            filename: "HitSpool-1.dat".to_string(),
            start_tick: 0,
            stop_tick: 10,
        }];
        let staged = stage_files(&request(), &rows, tmp.path(), &dir, false).await.unwrap();
        assert_eq!(staged, Staged { files: 1, bytes: 4 });
        assert!(!dir.join("leftover").exists());
    }
}
