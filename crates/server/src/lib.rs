//! Hitspool services.
//!
//! This crate provides the three long-running components and their fabric:
//! - Publisher: admits client requests
//! - Worker: stages and ships one hub's data for each request
//! - Sender: receives reports, delivers data and runs the RequestMonitor
//! - Monitoring sink and Prometheus metrics

pub mod error;
pub mod live;
pub mod metrics;
pub mod publisher;
pub mod routes;
pub mod sender;
pub mod wire;
pub mod worker;

pub use error::{ServiceError, ServiceResult};
pub use live::{LiveSink, TcpLiveSink};
pub use publisher::Publisher;
pub use routes::create_router;
pub use sender::{SenderHandle, start_sender};
pub use wire::{Broadcaster, Fanout, Outbox, PullListener, PushClient, Subscriber};
pub use worker::{Worker, WorkerDeps};
