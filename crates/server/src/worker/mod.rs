//! Worker: one per hub.
//!
//! For every REQUEST it reports STARTED, zero or more WORKING heartbeats,
//! then exactly one of DONE, FAILED or IGNORED. Requests are handled one
//! at a time in arrival order.

pub mod delay;
pub mod stage;

use crate::error::{ServiceError, ServiceResult};
use crate::live::LiveSink;
use crate::metrics::{TRANSPORT_FALLBACKS, WORKER_OUTCOMES};
use crate::wire::{Outbox, Subscriber};
use delay::{split_delay, transfer_delay};
use hitspool_core::config::{RecipientsConfig, WorkerConfig};
use hitspool_core::live::PRIO_EMAIL;
use hitspool_core::request::MAX_REQUEST_TICKS;
use hitspool_core::ticks::seconds_to_ticks;
use hitspool_core::{Alert, Envelope, HostReport, LiveMessage, MsgType, Request, StagedName, TickClock};
use hitspool_metadata::CatalogueRepo;
use hitspool_transport::{Destination, FileTransport, TransferSummary};
use stage::{Staged, stage_files};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators a Worker talks to.
pub struct WorkerDeps {
    pub catalogue: Arc<dyn CatalogueRepo>,
    /// Tried in order until one succeeds.
    pub transports: Vec<Arc<dyn FileTransport>>,
    pub outbox: Arc<dyn Outbox>,
    pub live: Arc<dyn LiveSink>,
}

pub struct Worker {
    hub: String,
    config: WorkerConfig,
    clock: Arc<TickClock>,
    deps: WorkerDeps,
    recipients: RecipientsConfig,
    default_copy_dir: String,
}

enum Outcome {
    Ignored,
    Delivered { copy_dir: String, detail: String },
}

impl Worker {
    pub fn new(hub: impl Into<String>, config: WorkerConfig, clock: Arc<TickClock>, deps: WorkerDeps) -> Self {
        Self {
            hub: hub.into(),
            config,
            clock,
            deps,
            recipients: RecipientsConfig::default(),
            default_copy_dir: String::new(),
        }
    }

    /// Alert recipients for NoData diagnostics.
    pub fn with_recipients(mut self, recipients: RecipientsConfig) -> Self {
        self.recipients = recipients;
        self
    }

    /// Destination used when a REQUEST carries no `copy_dir`.
    pub fn with_default_copy_dir(mut self, copy_dir: impl Into<String>) -> Self {
        self.default_copy_dir = copy_dir.into();
        self
    }

    pub fn hub(&self) -> &str {
        &self.hub
    }

    /// Serve requests from the publisher until the task is dropped.
    pub async fn run(&self, mut subscriber: Subscriber) {
        tracing::info!(hub = %self.hub, "worker ready");
        loop {
            match subscriber.next().await {
                Envelope::Request { request, copy_dir } => {
                    self.handle_request(request, &copy_dir).await;
                }
                other => {
                    tracing::debug!(msgtype = %other.msgtype(), "ignoring non-REQUEST envelope");
                }
            }
        }
    }

    /// Service one request and return the terminal message type sent.
    pub async fn handle_request(&self, request: Request, copy_dir: &str) -> MsgType {
        let base = HostReport::new(request.clone(), &self.hub);
        let copy_dir = if copy_dir.is_empty() {
            self.default_copy_dir.as_str()
        } else {
            copy_dir
        };

        let terminal = match self.process(&request, copy_dir).await {
            Ok(Outcome::Ignored) => {
                tracing::info!(request_id = %request.id, hub = %self.hub, "hub not requested, ignoring");
                Envelope::Ignored(base)
            }
            Ok(Outcome::Delivered { copy_dir, detail }) => {
                tracing::info!(request_id = %request.id, hub = %self.hub, %copy_dir, %detail, "request done");
                Envelope::Done(base.with_copy_dir(copy_dir).with_detail(detail))
            }
            Err(e) => {
                tracing::warn!(request_id = %request.id, hub = %self.hub, kind = e.kind(), error = %e, "request failed");
                if matches!(e, ServiceError::NoData(_)) {
                    self.alert_no_data(&request, &e);
                }
                Envelope::Failed(base.with_detail(e.to_string()))
            }
        };

        let msgtype = terminal.msgtype();
        WORKER_OUTCOMES.with_label_values(&[msgtype.as_str()]).inc();
        self.report(terminal).await;
        msgtype
    }

    async fn process(&self, request: &Request, copy_dir: &str) -> ServiceResult<Outcome> {
        check_request(request)?;

        if !request.hubs.includes(&self.hub) {
            return Ok(Outcome::Ignored);
        }

        let files = self
            .deps
            .catalogue
            .files_in_range(request.start_tick, request.stop_tick)
            .await?;
        if files.is_empty() {
            return Err(ServiceError::NoData(self.describe_span().await));
        }

        self.report(Envelope::Started(HostReport::new(request.clone(), &self.hub)))
            .await;

        let timetag = self
            .clock
            .ticks_to_utc(request.timetag_tick())
            .map_err(|e| ServiceError::BadTime(e.to_string()))?
            .timetag();
        let name = StagedName::new(request.prefix, timetag, &self.hub).to_string();
        let dir = self.config.tmp_dir.join(&name);

        let extract_limit = seconds_to_ticks(2 * self.config.file_interval_secs as i64);
        let extract = request.extract && request.duration() <= extract_limit;
        if request.extract && !extract {
            tracing::info!(
                request_id = %request.id,
                "window too long to extract, staging whole files"
            );
        }

        let result = async {
            let staged = stage_files(request, &files, &self.config.hitspool_dir(), &dir, extract).await?;
            self.deliver(request, &dir, &name, copy_dir, staged).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            let e = ServiceError::CleanupFailed(format!("{}: {e}", dir.display()));
            tracing::warn!(request_id = %request.id, error = %e, "staging directory left behind");
        }
        result
    }

    async fn deliver(
        &self,
        request: &Request,
        dir: &Path,
        name: &str,
        copy_dir: &str,
        staged: Staged,
    ) -> ServiceResult<Outcome> {
        let delay = transfer_delay(
            staged.bytes,
            Duration::from_secs(self.config.min_delay_secs),
            Duration::from_secs(self.config.max_delay_secs),
        );
        let (pre, post) = split_delay(delay, &mut rand::rng());
        tracing::debug!(
            request_id = %request.id,
            files = staged.files,
            bytes = staged.bytes,
            pre_delay_secs = pre.as_secs_f64(),
            post_delay_secs = post.as_secs_f64(),
            "staged"
        );

        self.sleep_with_heartbeat(request, pre).await;
        let destination =
            Destination::parse(copy_dir).map_err(|e| ServiceError::TransportFailed(e.to_string()))?;
        let summary = self.transfer(dir, &destination).await?;
        self.sleep_with_heartbeat(request, post).await;

        Ok(Outcome::Delivered {
            copy_dir: destination.join(name).path(),
            detail: format!(
                "{} files, {} bytes",
                staged.files,
                summary.total_size.unwrap_or(staged.bytes)
            ),
        })
    }

    /// Copy the staging directory, falling back to the next backend on failure.
    async fn transfer(&self, dir: &Path, destination: &Destination) -> ServiceResult<TransferSummary> {
        let files = vec![dir.to_path_buf()];
        let mut last_error = None;

        for (attempt, backend) in self.deps.transports.iter().enumerate() {
            if attempt > 0 {
                TRANSPORT_FALLBACKS.inc();
                tracing::warn!(backend = backend.name(), "retrying with fallback transport");
            }
            match backend.copy(&files, destination).await {
                Ok(summary) => {
                    tracing::info!(
                        backend = backend.name(),
                        files = summary.file_count(),
                        bytes_sent = summary.bytes_sent,
                        "transfer complete"
                    );
                    return Ok(summary);
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "transfer failed");
                    last_error = Some(format!("{}: {e}", backend.name()));
                }
            }
        }

        Err(ServiceError::TransportFailed(
            last_error.unwrap_or_else(|| "no transport configured".to_string()),
        ))
    }

    /// Wait `total`, sending a WORKING heartbeat before each slice.
    async fn sleep_with_heartbeat(&self, request: &Request, total: Duration) {
        let heartbeat = self.config.heartbeat().max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() {
            self.report(Envelope::Working(HostReport::new(request.clone(), &self.hub)))
                .await;
            let step = remaining.min(heartbeat);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }

    async fn describe_span(&self) -> String {
        let span = match self.deps.catalogue.span().await {
            Ok(Some(span)) => span,
            Ok(None) => return "hitspool catalogue is empty".to_string(),
            Err(e) => return format!("hitspool catalogue unreadable: {e}"),
        };
        let utc = |tick| {
            self.clock
                .ticks_to_utc(tick)
                .map(|t| t.to_string())
                .unwrap_or_else(|_| tick.to_string())
        };
        format!(
            "no hitspool files in range; buffer holds {} to {} (ticks {} to {})",
            utc(span.0),
            utc(span.1),
            span.0,
            span.1
        )
    }

    fn alert_no_data(&self, request: &Request, error: &ServiceError) {
        let subject = format!("HitSpool request {} found no data on {}", request.id, self.hub);
        let body = format!(
            "Request {} from {} for ticks {} to {}: {error}",
            request.id, request.username, request.start_tick, request.stop_tick
        );
        let alert = Alert::new(&subject, &body, self.recipients.for_prefix(request.prefix).iter().cloned());
        self.deps.live.send(LiveMessage::alert(alert, PRIO_EMAIL));
    }

    async fn report(&self, envelope: Envelope) {
        let msgtype = envelope.msgtype();
        if let Err(e) = self.deps.outbox.send(envelope).await {
            tracing::error!(hub = %self.hub, %msgtype, error = %e, "could not report to sender");
        }
    }
}

/// Worker-side window checks.
fn check_request(request: &Request) -> ServiceResult<()> {
    if request.stop_tick <= request.start_tick {
        return Err(ServiceError::BadTime(format!(
            "stop {} is not after start {}",
            request.stop_tick, request.start_tick
        )));
    }
    if request.duration() > MAX_REQUEST_TICKS {
        return Err(ServiceError::TooLong(format!(
            "{} ticks exceeds {MAX_REQUEST_TICKS}",
            request.duration()
        )));
    }
    Ok(())
}
