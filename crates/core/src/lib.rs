//! Core domain types and shared logic for the hitspool request system.
//!
//! This crate defines the data model used across all other crates:
//! - Detector ticks and their conversion to and from UTC
//! - Requests, hub restriction sets and the request lifecycle
//! - Wire envelopes and client request forms
//! - Monitoring documents
//! - Hit record framing

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod hits;
pub mod hub;
pub mod leapsec;
pub mod live;
pub mod request;
pub mod ticks;

pub use client::{ClientRequest, ParsedSubmission, Submission, TimeValue};
pub use envelope::{Envelope, HostReport, MsgType, WireEnvelope};
pub use error::{Error, Result};
pub use hub::HubSet;
pub use leapsec::LeapSeconds;
pub use live::{Alert, LiveMessage, RequestInfo};
pub use request::{HostPhase, Prefix, Request, RequestStatus, StagedName};
pub use ticks::{Tick, TickClock, UtcTime};
