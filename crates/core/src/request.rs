//! Request model and lifecycle.

use crate::error::{Error, Result};
use crate::hub::HubSet;
use crate::ticks::{Tick, seconds_to_ticks};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Longest window a request may ask for.
pub const MAX_REQUEST_TICKS: Tick = seconds_to_ticks(3610);

/// Windows longer than this are accepted with a warning.
pub const WARN_REQUEST_TICKS: Tick = seconds_to_ticks(1800);

/// SNALERT staging names are tagged 30 s after the requested start.
pub const SNALERT_TIMETAG_OFFSET: Tick = seconds_to_ticks(30);

/// Destination directory suffix that identifies a supernova alert dropbox.
const SNALERT_DROPBOX: &str = "HsDataCopy";

/// Request category. Governs destination naming and alert recipients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prefix {
    #[serde(rename = "ANON")]
    Anon,
    #[serde(rename = "HESE")]
    Hese,
    #[serde(rename = "SNALERT")]
    SnAlert,
    #[serde(rename = "i3live")]
    Live,
}

impl Prefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anon => "ANON",
            Self::Hese => "HESE",
            Self::SnAlert => "SNALERT",
            Self::Live => "i3live",
        }
    }

    /// Guess the category from a destination directory.
    pub fn from_destination(destination: &str) -> Self {
        let trimmed = destination.trim_end_matches('/');
        if trimmed.ends_with(SNALERT_DROPBOX) {
            Self::SnAlert
        } else if trimmed.to_ascii_lowercase().contains("hese") {
            Self::Hese
        } else {
            Self::Anon
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Prefix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ANON" => Ok(Self::Anon),
            "HESE" => Ok(Self::Hese),
            "SNALERT" => Ok(Self::SnAlert),
            "I3LIVE" => Ok(Self::Live),
            _ => Err(Error::BadRequest(format!("unknown prefix {s:?}"))),
        }
    }
}

static REQUEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a request ID: hex of `unix_seconds << 24 | counter`.
pub fn generate_request_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;
    format!("{:x}", (seconds << 24) | u64::from(counter))
}

/// Login name of the invoking user.
pub fn current_username() -> String {
    whoami::username()
}

/// A validated request for hitspool data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub username: String,
    pub prefix: Prefix,
    pub start_tick: Tick,
    pub stop_tick: Tick,
    /// Dropbox directory, already stripped of any `user@host:`.
    pub destination_dir: String,
    #[serde(default)]
    pub hubs: HubSet,
    #[serde(default)]
    pub extract: bool,
}

impl Request {
    /// Window length in ticks.
    pub fn duration(&self) -> Tick {
        self.stop_tick - self.start_tick
    }

    /// Check the window and destination.
    pub fn validate(&self) -> Result<()> {
        check_window(self.start_tick, self.stop_tick)?;
        if self.destination_dir.trim().is_empty() {
            return Err(Error::BadRequest("empty destination directory".to_string()));
        }
        if self.id.trim().is_empty() {
            return Err(Error::BadRequest("empty request ID".to_string()));
        }
        Ok(())
    }

    /// Tick used to name staged and archived data for this request.
    pub fn timetag_tick(&self) -> Tick {
        match self.prefix {
            Prefix::SnAlert => self.start_tick + SNALERT_TIMETAG_OFFSET,
            _ => self.start_tick,
        }
    }
}

/// Reject inverted, empty or overlong windows.
pub fn check_window(start: Tick, stop: Tick) -> Result<()> {
    if stop <= start {
        return Err(Error::TimeRange(format!(
            "stop {stop} is not after start {start}"
        )));
    }
    let duration = stop - start;
    if duration > MAX_REQUEST_TICKS {
        return Err(Error::TimeRange(format!(
            "window of {duration} ticks exceeds the maximum of {MAX_REQUEST_TICKS}"
        )));
    }
    Ok(())
}

/// Name of a staged per-hub directory: `<prefix>_<YYYYMMDD_HHMMSS>_<hub>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedName {
    pub prefix: Prefix,
    pub timetag: String,
    pub hub: String,
}

impl StagedName {
    pub fn new(prefix: Prefix, timetag: impl Into<String>, hub: impl Into<String>) -> Self {
        Self {
            prefix,
            timetag: timetag.into(),
            hub: hub.into(),
        }
    }

    /// Parse a directory base name, rejecting anything off-pattern.
    pub fn parse(name: &str) -> Result<Self> {
        let bad = || Error::BadRequest(format!("{name:?} is not <prefix>_<YYYYMMDD_HHMMSS>_<hub>"));

        let mut parts = name.splitn(4, '_');
        let (Some(prefix), Some(day), Some(clock), Some(hub)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };

        let prefix: Prefix = prefix.parse().map_err(|_| bad())?;
        let digits = |s: &str, n: usize| s.len() == n && s.chars().all(|c| c.is_ascii_digit());
        if !digits(day, 8) || !digits(clock, 6) {
            return Err(bad());
        }
        if hub.is_empty() || hub.contains(['/', '_']) {
            return Err(bad());
        }

        Ok(Self::new(prefix, format!("{day}_{clock}"), hub))
    }
}

impl fmt::Display for StagedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.prefix, self.timetag, self.hub)
    }
}

/// Per-hub phase of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostPhase {
    Initial,
    Queued,
    Started,
    Working,
    Done,
    Failed,
    Ignored,
}

impl HostPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Queued => "QUEUED",
            Self::Started => "START",
            Self::Working => "WORKING",
            Self::Done => "DONE",
            Self::Failed => "ERROR",
            Self::Ignored => "IGNORED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INITIAL" => Ok(Self::Initial),
            "QUEUED" => Ok(Self::Queued),
            "START" | "STARTED" => Ok(Self::Started),
            "WORKING" => Ok(Self::Working),
            "DONE" => Ok(Self::Done),
            "ERROR" | "FAILED" => Ok(Self::Failed),
            "IGNORED" => Ok(Self::Ignored),
            other => Err(Error::UnknownPhase(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Ignored)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Started | Self::Working)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Initial => 0,
            Self::Queued => 1,
            Self::Started => 2,
            Self::Working => 3,
            Self::Done | Self::Failed | Self::Ignored => 4,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Repeating a non-terminal phase is allowed (WORKING heartbeats).
    pub fn can_advance_to(&self, next: HostPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl fmt::Display for HostPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of a request across all participating hubs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "REQUEST_ERROR")]
    RequestError,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::Fail => "FAIL",
            Self::RequestError => "REQUEST_ERROR",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SUCCESS" => Ok(Self::Success),
            "PARTIAL" => Ok(Self::Partial),
            "FAIL" => Ok(Self::Fail),
            "REQUEST_ERROR" => Ok(Self::RequestError),
            other => Err(Error::UnknownPhase(other.to_string())),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Fail)
    }

    /// Derive the aggregate from per-hub phases.
    pub fn aggregate<I>(phases: I) -> Self
    where
        I: IntoIterator<Item = HostPhase>,
    {
        let (mut any, mut running, mut pending, mut done, mut failed) =
            (false, false, false, 0usize, 0usize);
        for phase in phases {
            any = true;
            match phase {
                HostPhase::Initial | HostPhase::Queued => pending = true,
                HostPhase::Started | HostPhase::Working => running = true,
                HostPhase::Done => done += 1,
                HostPhase::Failed => failed += 1,
                HostPhase::Ignored => {}
            }
        }

        if !any || (pending && !running && done == 0 && failed == 0) {
            Self::Queued
        } else if running || pending {
            Self::InProgress
        } else if done > 0 && failed == 0 {
            Self::Success
        } else if done > 0 {
            Self::Partial
        } else {
            Self::Fail
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
