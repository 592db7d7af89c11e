//! Hub and cluster fixtures.
//!
//! A fixture hub holds a short ring of hitspool files, one hit per second,
//! with a catalogue describing them.

use hitspool_core::config::{AppConfig, WorkerConfig};
use hitspool_core::hits::HitRecord;
use hitspool_core::ticks::{TICKS_PER_SECOND, seconds_to_ticks};
use hitspool_core::{HubSet, LeapSeconds, Prefix, Request, Tick, TickClock};
use hitspool_metadata::models::HitspoolFileRow;
use hitspool_metadata::{CatalogueRepo, HitspoolCatalogue};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Start of the first ring file.
pub const T0: Tick = 157_890_067_960_246_236;

pub const SECOND: Tick = TICKS_PER_SECOND;

/// Ticks covered by one ring file.
pub const FILE_TICKS: Tick = seconds_to_ticks(15);

/// Hits written per ring file.
pub const HITS_PER_FILE: i64 = 15;

pub fn clock() -> Arc<TickClock> {
    Arc::new(TickClock::with_year(LeapSeconds::builtin(), 2026))
}

/// A hub with `files` ring files starting at [`T0`].
pub struct HubFixture {
    pub dir: TempDir,
    pub config: WorkerConfig,
    pub catalogue: Arc<dyn CatalogueRepo>,
    pub files: Vec<HitspoolFileRow>,
}

impl HubFixture {
    pub async fn with_files(count: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_testing().worker;
        config.spool_root = dir.path().join("pdaqlocal");
        config.tmp_dir = dir.path().join("pdaqlocal/tmp");

        let hitspool_dir = config.hitspool_dir();
        std::fs::create_dir_all(&hitspool_dir).unwrap();

        let mut files = Vec::with_capacity(count);
        for n in 0..count {
            let start = T0 + n as i64 * FILE_TICKS;
            let filename = format!("HitSpool-{}.dat", n + 1);
            write_ring_file(&hitspool_dir.join(&filename), start);
            files.push(HitspoolFileRow {
                filename,
                start_tick: start,
                stop_tick: start + FILE_TICKS,
            });
        }

        let catalogue = HitspoolCatalogue::create(config.catalogue_path(), &files)
            .await
            .unwrap();

        Self {
            dir,
            config,
            catalogue: Arc::new(catalogue),
            files,
        }
    }

    /// Where deliveries from this hub land.
    pub fn receive_dir(&self) -> PathBuf {
        self.dir.path().join("recv")
    }

    /// Entries left in the staging directory.
    #[allow(dead_code)]
    pub fn staging_entries(&self) -> usize {
        match std::fs::read_dir(&self.config.tmp_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

/// One hit per second, [`HITS_PER_FILE`] per file.
pub fn write_ring_file(path: &Path, start: Tick) {
    let mut out = BufWriter::new(std::fs::File::create(path).unwrap());
    for k in 0..HITS_PER_FILE {
        HitRecord::new(2, start + k * SECOND, vec![k as u8; 24])
            .write_to(&mut out)
            .unwrap();
    }
    out.flush().unwrap();
}

pub fn request(id: &str, prefix: Prefix, start: Tick, stop: Tick, destination: &Path) -> Request {
    Request {
        id: id.to_string(),
        username: "tester".to_string(),
        prefix,
        start_tick: start,
        stop_tick: stop,
        destination_dir: destination.display().to_string(),
        hubs: HubSet::all(),
        extract: false,
    }
}

/// A cluster of `hubs` with every Sender path under `root`.
#[allow(dead_code)]
pub fn cluster_config(root: &Path, hubs: &[&str]) -> AppConfig {
    let mut config = AppConfig::for_testing();
    config.cluster.hubs = hubs.iter().map(|h| h.to_string()).collect();
    config.sender.receive_dir = root.join("recv");
    config.sender.archive_dir = root.join("spade");
    config.sender.cache_path = Some(root.join("hitspool_state.db"));
    config
}

/// Lay out a staged directory the way a Worker delivers it.
#[allow(dead_code)]
pub fn stage_delivery(receive_dir: &Path, name: &str) -> PathBuf {
    let dir = receive_dir.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    write_ring_file(&dir.join("HitSpool-1.dat"), T0);
    dir
}
