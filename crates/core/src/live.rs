//! Documents sent to the monitoring system.

use crate::request::{Request, RequestStatus};
use crate::ticks::{Tick, UtcTime};
use serde::{Deserialize, Serialize};

pub const REQUEST_INFO_SERVICE: &str = "hitspool";
pub const REQUEST_INFO_VARNAME: &str = "hsrequest_info";
pub const ALERT_SERVICE: &str = "HSiface";
pub const ALERT_VARNAME: &str = "alert";

/// Monitoring priority. Lower numbers are more urgent.
pub const PRIO_ITS: u8 = 1;
pub const PRIO_EMAIL: u8 = 2;
pub const PRIO_SCP: u8 = 3;

/// Per-request status snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub request_id: String,
    pub username: String,
    pub prefix: String,
    /// Window start in ticks.
    pub start_time: Tick,
    pub stop_time: Tick,
    pub destination_dir: String,
    pub update_time: String,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<String>>,
}

impl RequestInfo {
    pub fn new(request: &Request, status: RequestStatus) -> Self {
        Self {
            request_id: request.id.clone(),
            username: request.username.clone(),
            prefix: request.prefix.as_str().to_string(),
            start_time: request.start_tick,
            stop_time: request.stop_tick,
            destination_dir: request.destination_dir.clone(),
            update_time: UtcTime::now().to_string(),
            status,
            success: None,
            failed: None,
        }
    }

    /// Attach the hubs that finished and failed.
    pub fn with_hosts(mut self, success: Vec<String>, failed: Vec<String>) -> Self {
        self.success = Some(success);
        self.failed = Some(failed);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notify {
    pub receiver: String,
    pub notifies_header: String,
    pub notifies_txt: String,
}

/// Operator notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub condition: String,
    pub desc: String,
    pub notifies: Vec<Notify>,
    pub short_subject: String,
    pub quiet: bool,
}

impl Alert {
    /// An alert mailed to each of `receivers` with the same header and text.
    pub fn new<I, S>(subject: &str, body: &str, receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let notifies = receivers
            .into_iter()
            .map(|r| Notify {
                receiver: r.into(),
                notifies_header: subject.to_string(),
                notifies_txt: body.to_string(),
            })
            .collect();
        Self {
            condition: subject.to_string(),
            desc: "HitSpool Data Request".to_string(),
            notifies,
            short_subject: "true".to_string(),
            quiet: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiveValue {
    RequestInfo(RequestInfo),
    Alert(Alert),
}

/// One monitoring document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub service: String,
    pub varname: String,
    pub value: LiveValue,
    pub prio: u8,
    pub time: String,
}

impl LiveMessage {
    pub fn request_info(info: RequestInfo) -> Self {
        Self {
            service: REQUEST_INFO_SERVICE.to_string(),
            varname: REQUEST_INFO_VARNAME.to_string(),
            value: LiveValue::RequestInfo(info),
            prio: PRIO_ITS,
            time: UtcTime::now().to_string(),
        }
    }

    pub fn alert(alert: Alert, prio: u8) -> Self {
        Self {
            service: ALERT_SERVICE.to_string(),
            varname: ALERT_VARNAME.to_string(),
            value: LiveValue::Alert(alert),
            prio,
            time: UtcTime::now().to_string(),
        }
    }

    /// Status carried by a request info document.
    pub fn status(&self) -> Option<RequestStatus> {
        match &self.value {
            LiveValue::RequestInfo(info) => Some(info.status),
            LiveValue::Alert(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match &self.value {
            LiveValue::RequestInfo(info) => Some(&info.request_id),
            LiveValue::Alert(_) => None,
        }
    }
}
