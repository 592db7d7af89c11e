//! Requests as clients send them to the Publisher.
//!
//! Two submission forms are accepted. The legacy form carries times in
//! nanoseconds (`ticks / 10`) and a combined `copy` target:
//!
//! ```json
//! {"start": 15789006796024623, "stop": 15789007296024623, "copy": "pdaq@2ndbuild:/data/HsDataCopy"}
//! ```
//!
//! The current form names each field and takes times either as integer
//! ticks or as `YYYY-MM-DD HH:MM:SS[.ffffff]` strings. A third shape,
//! `{"msgtype": "DELETE", "request_id": ...}`, withdraws a queued request.

use crate::error::{Error, Result};
use crate::hub::HubSet;
use crate::request::Prefix;
use crate::ticks::{TICKS_PER_NANOSECOND, Tick, TickClock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A time as the client wrote it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Integer(i64),
    Text(String),
}

impl TimeValue {
    /// Resolve to ticks. Integers are taken as ticks.
    pub fn to_ticks(&self, clock: &TickClock) -> Result<Tick> {
        match self {
            Self::Integer(t) => Ok(*t),
            Self::Text(s) => clock.string_to_ticks(s),
        }
    }

    /// Resolve a legacy value, where integers count nanoseconds.
    fn legacy_to_ticks(&self, clock: &TickClock) -> Result<Tick> {
        let nanos = match self {
            Self::Integer(ns) => *ns,
            Self::Text(s) => match s.trim().parse::<i64>() {
                Ok(ns) => ns,
                Err(_) => return clock.string_to_ticks(s),
            },
        };
        nanos
            .checked_mul(TICKS_PER_NANOSECOND)
            .ok_or_else(|| Error::BadTime(format!("{nanos} ns is out of tick range")))
    }
}

impl From<&str> for TimeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// The current submission form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub start_time: Option<TimeValue>,
    pub stop_time: Option<TimeValue>,
    #[serde(default)]
    pub destination_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hubs: Option<String>,
    #[serde(default)]
    pub extract: bool,
}

#[derive(Debug, Deserialize)]
struct LegacySubmission {
    start: Option<TimeValue>,
    stop: Option<TimeValue>,
    #[serde(default)]
    copy: String,
}

#[derive(Debug, Deserialize)]
struct Withdrawal {
    request_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// A submission with times resolved to ticks. Not yet validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedSubmission {
    pub start_tick: Tick,
    pub stop_tick: Tick,
    /// Destination exactly as sent, possibly `user@host:path`.
    pub destination: String,
    pub prefix: Option<Prefix>,
    pub request_id: Option<String>,
    pub username: Option<String>,
    pub hubs: HubSet,
    pub extract: bool,
}

/// One parsed client message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientRequest {
    Submit(ParsedSubmission),
    Delete {
        request_id: String,
        username: Option<String>,
    },
}

fn time(value: Option<TimeValue>, name: &str) -> Result<TimeValue> {
    value.ok_or_else(|| Error::BadTime(format!("missing {name} time")))
}

impl ClientRequest {
    /// Parse one client message in any accepted form.
    pub fn parse(input: &str, clock: &TickClock) -> Result<Self> {
        let value: Value = serde_json::from_str(input.trim_end_matches('\0').trim())
            .map_err(|e| Error::BadRequest(format!("unparseable request: {e}")))?;
        let Value::Object(fields) = value else {
            return Err(Error::BadRequest("request is not a JSON object".to_string()));
        };

        if fields.get("msgtype").and_then(Value::as_str) == Some("DELETE") {
            let w: Withdrawal = from_fields(fields)?;
            let request_id = w
                .request_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Error::BadRequest("DELETE without request_id".to_string()))?;
            return Ok(Self::Delete {
                request_id,
                username: w.username,
            });
        }

        if fields.contains_key("start_time") || fields.contains_key("destination_dir") {
            let s: Submission = from_fields(fields)?;
            let hubs = match s.hubs.as_deref() {
                Some(h) => HubSet::parse(h)?,
                None => HubSet::all(),
            };
            let prefix = match s.prefix.as_deref() {
                Some(p) if !p.is_empty() => Some(p.parse()?),
                _ => None,
            };
            return Ok(Self::Submit(ParsedSubmission {
                start_tick: time(s.start_time, "start")?.to_ticks(clock)?,
                stop_tick: time(s.stop_time, "stop")?.to_ticks(clock)?,
                destination: s.destination_dir,
                prefix,
                request_id: s.request_id.filter(|id| !id.is_empty()),
                username: s.username.filter(|u| !u.is_empty()),
                hubs,
                extract: s.extract,
            }));
        }

        if fields.contains_key("start") || fields.contains_key("copy") {
            let l: LegacySubmission = from_fields(fields)?;
            return Ok(Self::Submit(ParsedSubmission {
                start_tick: time(l.start, "start")?.legacy_to_ticks(clock)?,
                stop_tick: time(l.stop, "stop")?.legacy_to_ticks(clock)?,
                destination: l.copy,
                prefix: None,
                request_id: None,
                username: None,
                hubs: HubSet::all(),
                extract: false,
            }));
        }

        Err(Error::BadRequest(
            "request has neither start_time nor start".to_string(),
        ))
    }
}

impl Submission {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Body of a DELETE request.
pub fn delete_json(request_id: &str, username: &str) -> Result<String> {
    Ok(serde_json::to_string(&serde_json::json!({
        "msgtype": "DELETE",
        "request_id": request_id,
        "username": username,
    }))?)
}

fn from_fields<T: for<'de> Deserialize<'de>>(fields: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| Error::BadRequest(format!("malformed request: {e}")))
}
