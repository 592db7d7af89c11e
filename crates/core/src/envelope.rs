//! Wire envelopes exchanged between the Publisher, RequestMonitor and Workers.
//!
//! On the wire every message is the same flat JSON object with a `msgtype`
//! tag. [`WireEnvelope`] is that object with every field optional; it only
//! lives at the socket boundary. Everything past the parse layer uses the
//! typed [`Envelope`].

use crate::error::{Error, Result};
use crate::hub::HubSet;
use crate::request::{Prefix, Request};
use crate::ticks::{Tick, TickClock};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current envelope schema version.
pub const ENVELOPE_VERSION: u32 = 2;

/// Message type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MsgType {
    Initial,
    Request,
    Started,
    Working,
    Done,
    Failed,
    Ignored,
    Delete,
}

impl MsgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::Request => "REQUEST",
            Self::Started => "STARTED",
            Self::Working => "WORKING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Ignored => "IGNORED",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The flat JSON object as it travels on the wire.
///
/// Version 1 senders use `start_time`/`stop_time` strings instead of
/// `start_ticks`/`stop_ticks`; both are accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub msgtype: Option<MsgType>,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ticks: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_ticks: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<String>,
    #[serde(default)]
    pub destination_dir: Option<String>,
    #[serde(default)]
    pub copy_dir: Option<String>,
    #[serde(default)]
    pub extract: Option<bool>,
    #[serde(default)]
    pub hubs: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    /// Free-text failure reason; absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WireEnvelope {
    /// Parse one JSON document.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input.trim_end_matches('\0').trim())
            .map_err(|e| Error::BadEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
        field
            .as_deref()
            .ok_or_else(|| Error::BadEnvelope(format!("missing field {name}")))
    }

    fn tick(&self, ticks: Option<Tick>, time: &Option<String>, name: &str, clock: &TickClock) -> Result<Tick> {
        match (ticks, time) {
            (Some(t), _) => Ok(t),
            (None, Some(s)) => clock.string_to_ticks(s),
            (None, None) => Err(Error::BadTime(format!("missing {name} time"))),
        }
    }

    /// Rebuild the request these fields describe. Does not validate the window.
    pub fn request(&self, clock: &TickClock) -> Result<Request> {
        let id = Self::required(&self.request_id, "request_id")?.to_string();
        let start_tick = self.tick(self.start_ticks, &self.start_time, "start", clock)?;
        let stop_tick = self.tick(self.stop_ticks, &self.stop_time, "stop", clock)?;
        let destination_dir = self.destination_dir.clone().unwrap_or_default();
        let prefix = match self.prefix.as_deref() {
            Some(p) if !p.is_empty() => p.parse()?,
            _ => Prefix::from_destination(&destination_dir),
        };
        let hubs = match self.hubs.as_deref() {
            Some(h) => HubSet::parse(h)?,
            None => HubSet::all(),
        };

        Ok(Request {
            id,
            username: self.username.clone().unwrap_or_default(),
            prefix,
            start_tick,
            stop_tick,
            destination_dir,
            hubs,
            extract: self.extract.unwrap_or(false),
        })
    }

    /// Convert into the typed envelope.
    pub fn into_envelope(self, clock: &TickClock) -> Result<Envelope> {
        let msgtype = self
            .msgtype
            .ok_or_else(|| Error::BadEnvelope("missing msgtype".to_string()))?;

        if msgtype == MsgType::Delete {
            return Ok(Envelope::Delete {
                request_id: Self::required(&self.request_id, "request_id")?.to_string(),
                username: self.username.unwrap_or_default(),
            });
        }

        let request = self.request(clock)?;
        let copy_dir = self.copy_dir.unwrap_or_default();
        let report = |request: Request| -> Result<HostReport> {
            Ok(HostReport {
                request,
                host: self
                    .host
                    .clone()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| Error::BadEnvelope("missing host".to_string()))?,
                copy_dir: copy_dir.clone(),
                detail: self.detail.clone(),
            })
        };

        Ok(match msgtype {
            MsgType::Initial => Envelope::Initial(request),
            MsgType::Request => Envelope::Request {
                request,
                copy_dir: copy_dir.clone(),
            },
            MsgType::Started => Envelope::Started(report(request)?),
            MsgType::Working => Envelope::Working(report(request)?),
            MsgType::Done => Envelope::Done(report(request)?),
            MsgType::Failed => Envelope::Failed(report(request)?),
            MsgType::Ignored => Envelope::Ignored(report(request)?),
            MsgType::Delete => {
                return Err(Error::BadEnvelope("DELETE carries no request".to_string()));
            }
        })
    }
}

/// A per-hub report from a Worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostReport {
    pub request: Request,
    /// Short name of the reporting hub.
    pub host: String,
    /// Where the hub's staged data was delivered, when it got that far.
    pub copy_dir: String,
    pub detail: Option<String>,
}

impl HostReport {
    pub fn new(request: Request, host: impl Into<String>) -> Self {
        Self {
            request,
            host: host.into(),
            copy_dir: String::new(),
            detail: None,
        }
    }

    pub fn with_copy_dir(mut self, copy_dir: impl Into<String>) -> Self {
        self.copy_dir = copy_dir.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Typed request lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// A new request handed from the Publisher to the RequestMonitor.
    Initial(Request),
    /// A request fanned out from the RequestMonitor to every Worker.
    Request { request: Request, copy_dir: String },
    Started(HostReport),
    Working(HostReport),
    Done(HostReport),
    Failed(HostReport),
    Ignored(HostReport),
    /// Withdraw a request that is still queued.
    Delete { request_id: String, username: String },
}

impl Envelope {
    pub fn msgtype(&self) -> MsgType {
        match self {
            Self::Initial(_) => MsgType::Initial,
            Self::Request { .. } => MsgType::Request,
            Self::Started(_) => MsgType::Started,
            Self::Working(_) => MsgType::Working,
            Self::Done(_) => MsgType::Done,
            Self::Failed(_) => MsgType::Failed,
            Self::Ignored(_) => MsgType::Ignored,
            Self::Delete { .. } => MsgType::Delete,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::Initial(r) | Self::Request { request: r, .. } => &r.id,
            Self::Started(h) | Self::Working(h) | Self::Done(h) | Self::Failed(h) | Self::Ignored(h) => {
                &h.request.id
            }
            Self::Delete { request_id, .. } => request_id,
        }
    }

    /// Flatten to the wire form.
    pub fn to_wire(&self) -> WireEnvelope {
        let mut wire = WireEnvelope {
            msgtype: Some(self.msgtype()),
            version: Some(ENVELOPE_VERSION),
            ..WireEnvelope::default()
        };

        let (request, copy_dir, host, detail) = match self {
            Self::Initial(r) => (Some(r), None, None, None),
            Self::Request { request, copy_dir } => (Some(request), Some(copy_dir), None, None),
            Self::Started(h) | Self::Working(h) | Self::Done(h) | Self::Failed(h) | Self::Ignored(h) => {
                (Some(&h.request), Some(&h.copy_dir), Some(&h.host), h.detail.as_ref())
            }
            Self::Delete { request_id, username } => {
                wire.request_id = Some(request_id.clone());
                wire.username = Some(username.clone());
                (None, None, None, None)
            }
        };

        if let Some(r) = request {
            wire.request_id = Some(r.id.clone());
            wire.username = Some(r.username.clone());
            wire.prefix = Some(r.prefix.as_str().to_string());
            wire.start_ticks = Some(r.start_tick);
            wire.stop_ticks = Some(r.stop_tick);
            wire.destination_dir = Some(r.destination_dir.clone());
            wire.extract = Some(r.extract);
            wire.hubs = Some(r.hubs.to_string());
            wire.copy_dir = Some(copy_dir.cloned().unwrap_or_default());
            wire.host = Some(host.cloned().unwrap_or_default());
        }
        wire.detail = detail.cloned();
        wire
    }

    pub fn to_json(&self) -> Result<String> {
        self.to_wire().to_json()
    }

    /// Parse and type one JSON document.
    pub fn from_json(input: &str, clock: &TickClock) -> Result<Self> {
        WireEnvelope::from_json(input)?.into_envelope(clock)
    }
}
