//! Fire-and-forget monitoring sink.

use crate::metrics::LIVE_DROPPED;
use hitspool_core::LiveMessage;
use hitspool_core::config::LiveConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Destination for request status documents and operator alerts.
///
/// Sending never blocks and never fails; undeliverable messages are dropped.
pub trait LiveSink: Send + Sync {
    fn send(&self, message: LiveMessage);
}

/// Sink that writes newline-delimited JSON to a TCP endpoint.
///
/// Messages go through a bounded queue drained by a background task. The
/// task connects lazily and drops messages while the endpoint is down.
pub struct TcpLiveSink {
    tx: Option<mpsc::Sender<LiveMessage>>,
}

impl TcpLiveSink {
    /// Start the writer task. With no address configured every message is dropped.
    pub fn spawn(config: &LiveConfig) -> Self {
        let Some(address) = config.address.clone() else {
            tracing::info!("no monitoring endpoint configured, status messages are dropped");
            return Self { tx: None };
        };

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(write_loop(address, rx));
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }
}

impl LiveSink for TcpLiveSink {
    fn send(&self, message: LiveMessage) {
        let Some(tx) = &self.tx else {
            LIVE_DROPPED.inc();
            tracing::debug!(varname = %message.varname, "monitoring disabled, message dropped");
            return;
        };
        match tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                LIVE_DROPPED.inc();
                tracing::warn!(varname = %message.varname, "monitoring queue full, message dropped");
            }
            Err(TrySendError::Closed(_)) => {
                LIVE_DROPPED.inc();
                tracing::warn!("monitoring writer stopped, message dropped");
            }
        }
    }
}

async fn write_loop(address: String, mut rx: mpsc::Receiver<LiveMessage>) {
    let mut stream: Option<TcpStream> = None;

    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "unencodable monitoring message");
                continue;
            }
        };
        line.push(b'\n');

        if stream.is_none() {
            match TcpStream::connect(&address).await {
                Ok(s) => stream = Some(s),
                Err(e) => {
                    LIVE_DROPPED.inc();
                    tracing::warn!(address, error = %e, "monitoring endpoint unreachable, message dropped");
                    continue;
                }
            }
        }

        if let Some(s) = stream.as_mut()
            && let Err(e) = s.write_all(&line).await
        {
            LIVE_DROPPED.inc();
            tracing::warn!(address, error = %e, "monitoring write failed, message dropped");
            stream = None;
        }
    }
}
