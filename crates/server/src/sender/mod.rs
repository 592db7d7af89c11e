//! Sender: receives per-hub reports, delivers staged data and owns the
//! request queue through the [`RequestMonitor`].

pub mod finalize;
pub mod monitor;

pub use finalize::Finalizer;
pub use monitor::{MonitorDeps, RequestMonitor};

use crate::error::ServiceResult;
use crate::live::LiveSink;
use crate::wire::{Broadcaster, PullListener};
use hitspool_core::config::AppConfig;
use hitspool_core::{Envelope, TickClock};
use hitspool_metadata::StateStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A running Sender.
pub struct SenderHandle {
    /// In-process intake for the local Publisher.
    pub intake: mpsc::Sender<Envelope>,
    pub monitor: JoinHandle<()>,
    fanout: Arc<Broadcaster>,
    pull: PullListener,
}

impl SenderHandle {
    /// Address Workers subscribe to for REQUESTs.
    pub fn fanout_addr(&self) -> SocketAddr {
        self.fanout.local_addr()
    }

    /// Address Workers push their reports to.
    pub fn intake_addr(&self) -> SocketAddr {
        self.pull.local_addr()
    }

    pub fn subscribers(&self) -> usize {
        self.fanout.subscribers()
    }
}

/// Bind the Sender's sockets, load the request cache and start the
/// RequestMonitor.
pub async fn start_sender(
    config: &AppConfig,
    clock: Arc<TickClock>,
    store: Arc<dyn StateStore>,
    live: Arc<dyn LiveSink>,
) -> ServiceResult<SenderHandle> {
    let fanout = Arc::new(Broadcaster::bind(&config.sender.pub_bind).await?);
    let (intake, rx) = mpsc::channel(config.sender.queue_capacity);
    let pull = PullListener::bind(&config.sender.pull_bind, clock.clone(), intake.clone()).await?;

    let mut monitor = RequestMonitor::new(
        config,
        clock,
        MonitorDeps {
            store,
            fanout: fanout.clone(),
            live,
        },
    );
    monitor.resume().await?;
    let monitor = tokio::spawn(monitor.run(rx));

    Ok(SenderHandle {
        intake,
        monitor,
        fanout,
        pull,
    })
}
