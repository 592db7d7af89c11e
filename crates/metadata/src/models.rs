//! Database models mapping to the catalogue and cache schemas.

use crate::error::MetadataResult;
use hitspool_core::{HostPhase, HubSet, Request, RequestStatus, Tick};
use sqlx::FromRow;
use std::collections::BTreeMap;
use time::OffsetDateTime;

// =============================================================================
// Hitspool catalogue
// =============================================================================

/// One ring file and the ticks it covers.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HitspoolFileRow {
    pub filename: String,
    pub start_tick: Tick,
    pub stop_tick: Tick,
}

// =============================================================================
// Request cache
// =============================================================================

/// Per-host progress row.
#[derive(Debug, Clone, FromRow)]
pub struct HostRow {
    pub id: String,
    pub host: String,
    pub phase: String,
    pub update_time: OffsetDateTime,
}

/// Request description row.
#[derive(Debug, Clone, FromRow)]
pub struct RequestDetailRow {
    pub id: String,
    pub username: String,
    pub prefix: String,
    pub start_tick: Tick,
    pub stop_tick: Tick,
    pub destination: String,
    pub hubs: String,
    pub extract: bool,
    pub phase: String,
    pub update_time: OffsetDateTime,
}

impl RequestDetailRow {
    pub fn new(request: &Request, phase: RequestStatus, update_time: OffsetDateTime) -> Self {
        Self {
            id: request.id.clone(),
            username: request.username.clone(),
            prefix: request.prefix.as_str().to_string(),
            start_tick: request.start_tick,
            stop_tick: request.stop_tick,
            destination: request.destination_dir.clone(),
            hubs: request.hubs.to_string(),
            extract: request.extract,
            phase: phase.as_str().to_string(),
            update_time,
        }
    }

    pub fn to_request(&self) -> MetadataResult<Request> {
        Ok(Request {
            id: self.id.clone(),
            username: self.username.clone(),
            prefix: self.prefix.parse()?,
            start_tick: self.start_tick,
            stop_tick: self.stop_tick,
            destination_dir: self.destination.clone(),
            hubs: HubSet::parse(&self.hubs)?,
            extract: self.extract,
        })
    }
}

/// Last reported phase of one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostState {
    pub phase: HostPhase,
    pub update_time: OffsetDateTime,
}

/// A request with every host that has reported on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRequest {
    pub request: Request,
    pub phase: RequestStatus,
    /// When the request itself was admitted or last changed phase.
    pub update_time: OffsetDateTime,
    pub hosts: BTreeMap<String, HostState>,
}

impl CachedRequest {
    pub fn new(request: Request, now: OffsetDateTime) -> Self {
        Self {
            request,
            phase: RequestStatus::Queued,
            update_time: now,
            hosts: BTreeMap::new(),
        }
    }

    /// Rebuild from stored rows.
    pub fn from_rows(detail: &RequestDetailRow, hosts: &[HostRow]) -> MetadataResult<Self> {
        let mut map = BTreeMap::new();
        for row in hosts {
            map.insert(
                row.host.clone(),
                HostState {
                    phase: HostPhase::parse(&row.phase)?,
                    update_time: row.update_time,
                },
            );
        }
        Ok(Self {
            request: detail.to_request()?,
            phase: RequestStatus::parse(&detail.phase)?,
            update_time: detail.update_time,
            hosts: map,
        })
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    /// Most recent activity on the request or any of its hosts.
    pub fn last_update(&self) -> OffsetDateTime {
        self.hosts
            .values()
            .map(|h| h.update_time)
            .fold(self.update_time, |a, b| a.max(b))
    }

    /// Hosts whose last phase is `phase`, in name order.
    pub fn hosts_in(&self, phase: HostPhase) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|(_, state)| state.phase == phase)
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Aggregate status from the per-host phases.
    pub fn aggregate(&self) -> RequestStatus {
        RequestStatus::aggregate(self.hosts.values().map(|h| h.phase))
    }
}
