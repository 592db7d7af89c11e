//! Configuration types shared across crates.

use crate::request::Prefix;
use crate::leapsec::LeapSeconds;
use crate::ticks::TickClock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Cluster-wide identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Account the hubs use to copy into the Sender's receive area.
    #[serde(default = "default_rsync_user")]
    pub rsync_user: String,
    /// Host running the Sender.
    #[serde(default = "default_rsync_host")]
    pub rsync_host: String,
    /// Every hub expected to answer an unrestricted request.
    /// Empty means completion is judged on the hubs that report.
    #[serde(default)]
    pub hubs: Vec<String>,
}

fn default_rsync_user() -> String {
    "pdaq".to_string()
}

fn default_rsync_host() -> String {
    "2ndbuild".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            rsync_user: default_rsync_user(),
            rsync_host: default_rsync_host(),
            hubs: Vec::new(),
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.rsync_user.is_empty() || self.rsync_host.is_empty() {
            return Err("cluster.rsync_user and cluster.rsync_host must be set".to_string());
        }
        Ok(())
    }
}

/// Client-facing request ingress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Request-reply listener for clients.
    #[serde(default = "default_publisher_bind")]
    pub bind: String,
    /// Sender pull listener, used when the Publisher runs in its own process.
    #[serde(default = "default_sender_addr")]
    pub sender_addr: String,
    /// Longest wait between reconnect attempts to the Sender.
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
}

fn default_publisher_bind() -> String {
    "0.0.0.0:55557".to_string()
}

fn default_sender_addr() -> String {
    "127.0.0.1:55560".to_string()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            bind: default_publisher_bind(),
            sender_addr: default_sender_addr(),
            reconnect_max_secs: default_reconnect_max_secs(),
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bind.is_empty() {
            return Err("publisher.bind must be set".to_string());
        }
        if self.reconnect_max_secs == 0 {
            return Err("publisher.reconnect_max_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }
}

/// How an archived tarball is announced to the archival pipeline.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMetadata {
    /// `.meta.xml`, falling back to `.sem` if it cannot be written.
    #[default]
    MetaXml,
    /// Empty `.sem` semaphore only.
    Semaphore,
}

/// Sender and RequestMonitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Pull listener for worker reports (and Publisher hand-offs).
    #[serde(default = "default_pull_bind")]
    pub pull_bind: String,
    /// Broadcast listener workers subscribe to.
    #[serde(default = "default_pub_bind")]
    pub pub_bind: String,
    /// Directory the hubs copy staged data into.
    #[serde(default = "default_receive_dir")]
    pub receive_dir: PathBuf,
    /// Request cache. Defaults to `$HOME/.hitspool_state.db`.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    /// Quiet time after which a request is declared failed.
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,
    /// Capacity of the monitor's inbound queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Archival queue directory.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default)]
    pub archive_metadata: ArchiveMetadata,
    /// Prefixes whose deliveries are tarred into the archival queue.
    #[serde(default = "default_archived_prefixes")]
    pub archived_prefixes: Vec<Prefix>,
    /// Prometheus endpoint. Disabled when unset.
    #[serde(default)]
    pub metrics_bind: Option<String>,
}

fn default_pull_bind() -> String {
    "0.0.0.0:55560".to_string()
}

fn default_pub_bind() -> String {
    "0.0.0.0:55561".to_string()
}

fn default_receive_dir() -> PathBuf {
    PathBuf::from("/mnt/data/pdaqlocal/HsDataCopy")
}

fn default_expire_secs() -> u64 {
    3600
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("/mnt/data/HitSpool")
}

fn default_archived_prefixes() -> Vec<Prefix> {
    vec![Prefix::SnAlert]
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            pull_bind: default_pull_bind(),
            pub_bind: default_pub_bind(),
            receive_dir: default_receive_dir(),
            cache_path: None,
            expire_secs: default_expire_secs(),
            queue_capacity: default_queue_capacity(),
            archive_dir: default_archive_dir(),
            archive_metadata: ArchiveMetadata::default(),
            archived_prefixes: default_archived_prefixes(),
            metrics_bind: None,
        }
    }
}

impl SenderConfig {
    pub fn expire(&self) -> Duration {
        Duration::from_secs(self.expire_secs)
    }

    /// Cache path, resolving the home-directory default.
    pub fn cache_path(&self) -> PathBuf {
        match &self.cache_path {
            Some(path) => path.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".hitspool_state.db"),
        }
    }

    pub fn archives(&self, prefix: Prefix) -> bool {
        self.archived_prefixes.contains(&prefix)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.expire_secs == 0 {
            return Err("sender.expire_secs cannot be 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("sender.queue_capacity cannot be 0".to_string());
        }
        if !self.receive_dir.is_absolute() {
            return Err(format!(
                "sender.receive_dir must be absolute, got {}",
                self.receive_dir.display()
            ));
        }
        Ok(())
    }
}

/// Transport backend selector.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Rsync,
    Scp,
}

/// File transport settings for the worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Backends in the order they are tried.
    #[serde(default = "default_backends")]
    pub backends: Vec<TransportKind>,
    /// Bandwidth cap in Kbytes/s. 0 is uncapped.
    #[serde(default)]
    pub bwlimit_kbps: u64,
    /// Create the remote directory before copying.
    #[serde(default = "default_true")]
    pub create_remote_dir: bool,
    #[serde(default = "default_rsync_program")]
    pub rsync_program: String,
    #[serde(default = "default_scp_program")]
    pub scp_program: String,
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
}

fn default_backends() -> Vec<TransportKind> {
    vec![TransportKind::Rsync, TransportKind::Scp]
}

fn default_true() -> bool {
    true
}

fn default_rsync_program() -> String {
    "rsync".to_string()
}

fn default_scp_program() -> String {
    "scp".to_string()
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            bwlimit_kbps: 0,
            create_remote_dir: true,
            rsync_program: default_rsync_program(),
            scp_program: default_scp_program(),
            ssh_program: default_ssh_program(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("worker.transport.backends cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Per-hub worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Sender broadcast listener carrying REQUEST envelopes.
    #[serde(default = "default_subscribe_addr")]
    pub subscribe_addr: String,
    /// Sender pull listener for reports.
    #[serde(default = "default_sender_addr")]
    pub sender_addr: String,
    /// Directory holding `hitspool/` with the ring and its catalogue.
    #[serde(default = "default_spool_root")]
    pub spool_root: PathBuf,
    /// Hub-local staging area.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    /// Override the hub name derived from the host name.
    #[serde(default)]
    pub hub_name: Option<String>,
    /// Duration covered by one ring file.
    #[serde(default = "default_file_interval_secs")]
    pub file_interval_secs: u64,
    /// Number of files in the ring.
    #[serde(default = "default_max_files")]
    pub max_files: u32,
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// Interval between WORKING keep-alives while sleeping.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Upper bound for the reconnect backoff.
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_subscribe_addr() -> String {
    "127.0.0.1:55561".to_string()
}

fn default_spool_root() -> PathBuf {
    PathBuf::from("/mnt/data/pdaqlocal")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/mnt/data/pdaqlocal/tmp")
}

fn default_file_interval_secs() -> u64 {
    15
}

fn default_max_files() -> u32 {
    1000
}

fn default_min_delay_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    1200
}

fn default_heartbeat_secs() -> u64 {
    300
}

fn default_reconnect_max_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            subscribe_addr: default_subscribe_addr(),
            sender_addr: default_sender_addr(),
            spool_root: default_spool_root(),
            tmp_dir: default_tmp_dir(),
            hub_name: None,
            file_interval_secs: default_file_interval_secs(),
            max_files: default_max_files(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            transport: TransportConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Directory holding the ring files and `hitspool.db`.
    pub fn hitspool_dir(&self) -> PathBuf {
        self.spool_root.join("hitspool")
    }

    pub fn catalogue_path(&self) -> PathBuf {
        self.hitspool_dir().join("hitspool.db")
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.file_interval_secs == 0 {
            return Err("worker.file_interval_secs cannot be 0".to_string());
        }
        if self.max_files == 0 {
            return Err("worker.max_files cannot be 0".to_string());
        }
        if self.heartbeat_secs == 0 {
            return Err("worker.heartbeat_secs cannot be 0".to_string());
        }
        if self.min_delay_secs > self.max_delay_secs {
            return Err(format!(
                "worker.min_delay_secs ({}) exceeds worker.max_delay_secs ({})",
                self.min_delay_secs, self.max_delay_secs
            ));
        }
        self.transport.validate()
    }
}

/// Alert recipients by request category.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecipientsConfig {
    #[serde(default)]
    pub snalert: Vec<String>,
    #[serde(default)]
    pub hese: Vec<String>,
    /// Everyone else, and the fallback when a category list is empty.
    #[serde(default)]
    pub default: Vec<String>,
}

impl RecipientsConfig {
    pub fn for_prefix(&self, prefix: Prefix) -> &[String] {
        let list = match prefix {
            Prefix::SnAlert => &self.snalert,
            Prefix::Hese => &self.hese,
            Prefix::Anon | Prefix::Live => &self.default,
        };
        if list.is_empty() { &self.default } else { list }
    }
}

/// Monitoring sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LiveConfig {
    /// `host:port` of the dashboard endpoint. Messages are dropped when unset.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub recipients: RecipientsConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            address: None,
            queue_capacity: default_queue_capacity(),
            recipients: RecipientsConfig::default(),
        }
    }
}

impl LiveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("live.queue_capacity cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Tick conversion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TicksConfig {
    /// Pin conversions to this observing year instead of the current one.
    #[serde(default)]
    pub year: Option<i32>,
}

impl TicksConfig {
    pub fn clock(&self) -> TickClock {
        match self.year {
            Some(year) => TickClock::with_year(LeapSeconds::builtin(), year),
            None => TickClock::new(LeapSeconds::builtin()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub ticks: TicksConfig,
}

impl AppConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** Every listener binds an ephemeral loopback
    /// port and the observing year is pinned to 2026.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.publisher.bind = "127.0.0.1:0".to_string();
        config.sender.pull_bind = "127.0.0.1:0".to_string();
        config.sender.pub_bind = "127.0.0.1:0".to_string();
        config.worker.min_delay_secs = 0;
        config.worker.max_delay_secs = 0;
        config.ticks.year = Some(2026);
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        self.cluster.validate()?;
        self.publisher.validate()?;
        self.sender.validate()?;
        self.worker.validate()?;
        self.live.validate()
    }
}
