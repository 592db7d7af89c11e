//! Publisher: the cluster's single admission point for client requests.
//!
//! A client request is parsed, normalised and validated, then handed to the
//! RequestMonitor as an INITIAL envelope. The Publisher keeps no per-hub state
//! and never talks to Workers; fan-out happens when the monitor releases the
//! request.

use crate::error::{ServiceError, ServiceResult};
use crate::live::LiveSink;
use crate::metrics::{REQUESTS_ADMITTED, REQUESTS_REJECTED};
use crate::wire::{Outbox, reply_line};
use hitspool_core::config::ClusterConfig;
use hitspool_core::hub::short_host_name;
use hitspool_core::request::{WARN_REQUEST_TICKS, check_window, current_username, generate_request_id};
use hitspool_core::{
    ClientRequest, Envelope, LiveMessage, ParsedSubmission, Prefix, Request, RequestInfo, RequestStatus, TickClock,
    UtcTime,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub struct Publisher {
    cluster: ClusterConfig,
    clock: Arc<TickClock>,
    outbox: Arc<dyn Outbox>,
    live: Arc<dyn LiveSink>,
    admission: Mutex<()>,
}

impl Publisher {
    pub fn new(
        cluster: ClusterConfig,
        clock: Arc<TickClock>,
        outbox: Arc<dyn Outbox>,
        live: Arc<dyn LiveSink>,
    ) -> Self {
        Self {
            cluster,
            clock,
            outbox,
            live,
            admission: Mutex::new(()),
        }
    }

    /// Handle one client message. Returns whether the reply is DONE.
    ///
    /// Requests are admitted one at a time.
    pub async fn handle(&self, body: &str) -> bool {
        let _admission = self.admission.lock().await;

        match self.admit(body).await {
            Ok(()) => true,
            Err(e) => {
                REQUESTS_REJECTED.inc();
                tracing::warn!(kind = e.kind(), error = %e, "request rejected");
                self.live
                    .send(LiveMessage::request_info(rejection_info(body)));
                false
            }
        }
    }

    async fn admit(&self, body: &str) -> ServiceResult<()> {
        match ClientRequest::parse(body, &self.clock)? {
            ClientRequest::Delete { request_id, username } => {
                tracing::info!(request_id = %request_id, "forwarding DELETE");
                self.outbox
                    .send(Envelope::Delete {
                        request_id,
                        username: username.unwrap_or_else(current_username),
                    })
                    .await
            }
            ClientRequest::Submit(submission) => {
                let request = self.build_request(submission)?;
                tracing::info!(
                    request_id = %request.id,
                    username = %request.username,
                    prefix = %request.prefix,
                    start_tick = request.start_tick,
                    stop_tick = request.stop_tick,
                    destination = %request.destination_dir,
                    hubs = %request.hubs,
                    "request admitted"
                );
                self.outbox.send(Envelope::Initial(request)).await?;
                REQUESTS_ADMITTED.inc();
                Ok(())
            }
        }
    }

    fn build_request(&self, submission: ParsedSubmission) -> ServiceResult<Request> {
        let destination_dir = normalize_destination(&submission.destination, &self.cluster)?;
        if destination_dir.is_empty() {
            return Err(ServiceError::BadRequest("empty destination directory".to_string()));
        }

        check_window(submission.start_tick, submission.stop_tick)?;
        let duration = submission.stop_tick - submission.start_tick;
        if duration > WARN_REQUEST_TICKS {
            tracing::warn!(
                duration_ticks = duration,
                "unusually long request window"
            );
        }

        let prefix = submission
            .prefix
            .unwrap_or_else(|| Prefix::from_destination(&destination_dir));
        let request = Request {
            id: submission.request_id.unwrap_or_else(generate_request_id),
            username: submission.username.unwrap_or_else(current_username),
            prefix,
            start_tick: submission.start_tick,
            stop_tick: submission.stop_tick,
            destination_dir,
            hubs: submission.hubs,
            extract: submission.extract,
        };
        request.validate()?;
        Ok(request)
    }

    /// Bind the request-reply listener and serve clients in the background.
    pub async fn listen(self: Arc<Self>, addr: &str) -> ServiceResult<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "publisher listening");
        Ok((local_addr, tokio::spawn(self.serve(listener))))
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(self.clone().serve_client(stream, peer));
                }
                Err(e) => tracing::warn!(error = %e, "client accept failed"),
            }
        }
    }

    async fn serve_client(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "client read failed");
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let ok = self.handle(&line).await;
            if let Err(e) = write.write_all(&reply_line(ok)).await {
                tracing::debug!(%peer, error = %e, "client went away before the reply");
                return;
            }
        }
    }
}

/// Strip `user@host:` from a destination, refusing other clusters' hosts.
///
/// A destination without a colon is a local path and is accepted as is.
pub fn normalize_destination(raw: &str, cluster: &ClusterConfig) -> ServiceResult<String> {
    let raw = raw.trim();
    let Some((login, path)) = raw.split_once(':') else {
        return Ok(raw.to_string());
    };

    let (user, host) = match login.split_once('@') {
        Some((user, host)) => (Some(user), host),
        None => (None, login),
    };
    if let Some(user) = user
        && user != cluster.rsync_user
    {
        return Err(ServiceError::BadRequest(format!(
            "destination user {user:?} is not {:?}",
            cluster.rsync_user
        )));
    }
    if short_host_name(host) != short_host_name(&cluster.rsync_host) {
        return Err(ServiceError::BadRequest(format!(
            "destination host {host:?} is not {:?}",
            cluster.rsync_host
        )));
    }
    Ok(path.to_string())
}

/// Best-effort status document for a request that never became valid.
fn rejection_info(body: &str) -> RequestInfo {
    let fields: Value = serde_json::from_str(body.trim_end_matches('\0')).unwrap_or_default();
    let text = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let tick = |key: &str| fields.get(key).and_then(Value::as_i64).unwrap_or(0);

    let destination_dir = match text("destination_dir") {
        d if d.is_empty() => text("copy"),
        d => d,
    };
    RequestInfo {
        request_id: text("request_id"),
        username: text("username"),
        prefix: text("prefix"),
        start_time: tick("start_time"),
        stop_time: tick("stop_time"),
        destination_dir,
        update_time: UtcTime::now().to_string(),
        status: RequestStatus::RequestError,
        success: None,
        failed: None,
    }
}
