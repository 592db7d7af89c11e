//! RequestMonitor: the single owner of request state on the Sender.
//!
//! One task drains a bounded queue of envelopes and handles them in order.
//! Every change is mirrored to the durable cache before the next envelope
//! is taken. At most one request is active (fanned out to Workers) at a
//! time; queued requests are released in `start_tick` order.

use crate::error::{ServiceError, ServiceResult};
use crate::live::LiveSink;
use crate::metrics::{
    FINALIZE_ERRORS, HOST_REPORTS, QUEUED_REQUESTS, REQUESTS_EXPIRED, record_finished,
};
use crate::sender::finalize::Finalizer;
use crate::wire::Fanout;
use hitspool_core::config::{AppConfig, RecipientsConfig};
use hitspool_core::live::PRIO_EMAIL;
use hitspool_core::{
    Alert, Envelope, HostPhase, HostReport, LiveMessage, Request, RequestInfo, RequestStatus, TickClock,
};
use hitspool_metadata::StateStore;
use hitspool_metadata::models::{CachedRequest, HostState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Collaborators of the RequestMonitor.
pub struct MonitorDeps {
    pub store: Arc<dyn StateStore>,
    pub fanout: Arc<dyn Fanout>,
    pub live: Arc<dyn LiveSink>,
}

pub struct RequestMonitor {
    deps: MonitorDeps,
    finalizer: Finalizer,
    requests: BTreeMap<String, CachedRequest>,
    active: Option<String>,
    /// Whether IN_PROGRESS went out for the active request.
    announced: bool,
    expire: Duration,
    copy_dir: String,
    fleet: Vec<String>,
    recipients: RecipientsConfig,
}

impl RequestMonitor {
    pub fn new(config: &AppConfig, clock: Arc<TickClock>, deps: MonitorDeps) -> Self {
        // Workers deliver to `rsync_user@rsync_host:receive_dir`.
        let copy_dir = format!(
            "{}@{}:{}",
            config.cluster.rsync_user,
            config.cluster.rsync_host,
            config.sender.receive_dir.display()
        );
        Self {
            deps,
            finalizer: Finalizer::from_config(&config.sender, clock),
            requests: BTreeMap::new(),
            active: None,
            announced: false,
            expire: config.sender.expire(),
            copy_dir,
            fleet: config.cluster.hubs.clone(),
            recipients: config.live.recipients.clone(),
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn cached(&self, id: &str) -> Option<&CachedRequest> {
        self.requests.get(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Load the durable cache and pick the active request back up.
    ///
    /// A cache that cannot be read is fatal for the Sender.
    pub async fn resume(&mut self) -> ServiceResult<()> {
        let cached = self.deps.store.list_requests().await?;

        let mut started = Vec::new();
        for entry in cached {
            if entry.phase == RequestStatus::InProgress || !entry.hosts.is_empty() {
                started.push(entry.id().to_string());
            }
            self.requests.insert(entry.id().to_string(), entry);
        }

        if let Some((first, extra)) = started.split_first() {
            self.active = Some(first.clone());
            self.announced = self.requests.get(first).is_some_and(|r| !r.hosts.is_empty());
            tracing::info!(request_id = %first, "resuming active request");
            for id in extra {
                tracing::warn!(
                    request_id = %id,
                    active = %first,
                    "cache holds another in-progress request; leaving it to expire"
                );
            }
        }

        tracing::info!(requests = self.requests.len(), "request cache loaded");
        QUEUED_REQUESTS.set(self.requests.len() as i64);

        if let Some(id) = self.active.clone() {
            self.check_completion(&id).await;
        }
        Ok(())
    }

    /// Drain `intake` until it closes.
    pub async fn run(mut self, mut intake: mpsc::Receiver<Envelope>) {
        loop {
            self.release_next().await;
            match tokio::time::timeout(self.expire, intake.recv()).await {
                Ok(Some(envelope)) => self.handle(envelope).await,
                Ok(None) => {
                    tracing::info!("envelope intake closed, request monitor stopping");
                    return;
                }
                Err(_) => {}
            }
            self.expire_stale_at(OffsetDateTime::now_utc()).await;
        }
    }

    /// Fan out the earliest queued request if nothing is active.
    pub async fn release_next(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(id) = self
            .requests
            .values()
            .filter(|r| r.phase == RequestStatus::Queued && r.hosts.is_empty())
            .min_by_key(|r| (r.request.start_tick, r.update_time))
            .map(|r| r.id().to_string())
        else {
            return;
        };

        let now = OffsetDateTime::now_utc();
        if let Err(e) = self
            .deps
            .store
            .set_request_phase(&id, RequestStatus::InProgress, now)
            .await
        {
            tracing::error!(request_id = %id, error = %e, "cache update failed, request not released");
            return;
        }
        let Some(cached) = self.requests.get_mut(&id) else {
            return;
        };
        cached.phase = RequestStatus::InProgress;
        cached.update_time = now;
        let request = cached.request.clone();

        let envelope = Envelope::Request {
            request: request.clone(),
            copy_dir: self.copy_dir.clone(),
        };
        match self.deps.fanout.publish(&envelope) {
            Ok(workers) => tracing::info!(request_id = %id, workers, "request released"),
            Err(e) => tracing::error!(request_id = %id, error = %e, "request fan-out failed"),
        }
        self.active = Some(id);
        self.announced = false;
        self.alert_release(&request);
    }

    /// Apply one envelope.
    pub async fn handle(&mut self, envelope: Envelope) {
        HOST_REPORTS
            .with_label_values(&[envelope.msgtype().as_str()])
            .inc();

        match envelope {
            Envelope::Initial(request) => self.admit(request).await,
            Envelope::Request { request, .. } => {
                tracing::warn!(request_id = %request.id, "unexpected REQUEST at the sender, ignoring");
            }
            Envelope::Started(report) => {
                let id = report.request.id.clone();
                if self.active.as_deref() != Some(id.as_str()) {
                    tracing::warn!(request_id = %id, hub = %report.host, "STARTED for a request that is not active");
                }
                if self.record(&report, HostPhase::Started).await
                    && self.active.as_deref() == Some(id.as_str())
                    && !self.announced
                {
                    self.announced = true;
                    if let Some(cached) = self.requests.get(&id) {
                        self.publish_status(&cached.request, RequestStatus::InProgress);
                    }
                }
            }
            Envelope::Working(report) => {
                self.record(&report, HostPhase::Working).await;
            }
            Envelope::Ignored(report) => {
                self.record(&report, HostPhase::Ignored).await;
                self.check_completion(&report.request.id).await;
            }
            Envelope::Done(report) => {
                let phase = if !self.requests.contains_key(&report.request.id) {
                    HostPhase::Done
                } else {
                    match self.finalizer.finalize(&report).await {
                        Ok(_) => HostPhase::Done,
                        Err(e) => {
                            FINALIZE_ERRORS.with_label_values(&[e.kind()]).inc();
                            tracing::warn!(
                                request_id = %report.request.id,
                                hub = %report.host,
                                kind = e.kind(),
                                error = %e,
                                "delivery failed, marking hub as failed"
                            );
                            HostPhase::Failed
                        }
                    }
                };
                self.record(&report, phase).await;
                self.check_completion(&report.request.id).await;
            }
            Envelope::Failed(report) => {
                tracing::info!(
                    request_id = %report.request.id,
                    hub = %report.host,
                    detail = report.detail.as_deref().unwrap_or(""),
                    "hub failed"
                );
                self.record(&report, HostPhase::Failed).await;
                self.check_completion(&report.request.id).await;
            }
            Envelope::Delete { request_id, username } => self.withdraw(&request_id, &username).await,
        }
    }

    async fn admit(&mut self, request: Request) {
        if self.requests.contains_key(&request.id) {
            tracing::warn!(request_id = %request.id, "duplicate request ID, ignoring");
            return;
        }

        let now = OffsetDateTime::now_utc();
        if let Err(e) = self
            .deps
            .store
            .insert_request(&request, RequestStatus::Queued, now)
            .await
        {
            tracing::error!(request_id = %request.id, error = %e, "cache insert failed, request dropped");
            return;
        }

        tracing::info!(request_id = %request.id, start_tick = request.start_tick, "request queued");
        self.publish_status(&request, RequestStatus::Queued);
        self.requests
            .insert(request.id.clone(), CachedRequest::new(request, now));
        QUEUED_REQUESTS.set(self.requests.len() as i64);
    }

    async fn withdraw(&mut self, id: &str, username: &str) {
        let Some(cached) = self.requests.get(id) else {
            tracing::warn!(request_id = %id, "DELETE for unknown request");
            return;
        };
        if self.active.as_deref() == Some(id) || !cached.hosts.is_empty() || cached.phase != RequestStatus::Queued {
            tracing::warn!(request_id = %id, "DELETE refused, request already started");
            return;
        }

        tracing::info!(request_id = %id, username, "request withdrawn");
        self.finish(id, false).await;
    }

    /// Record a host phase. Returns false when the report was not applied.
    async fn record(&mut self, report: &HostReport, phase: HostPhase) -> bool {
        let id = report.request.id.as_str();
        let Some(cached) = self.requests.get(id) else {
            tracing::warn!(request_id = %id, hub = %report.host, %phase, "report for unknown request, ignoring");
            return false;
        };
        if let Some(current) = cached.hosts.get(&report.host)
            && !current.phase.can_advance_to(phase)
        {
            tracing::warn!(
                request_id = %id,
                hub = %report.host,
                from = %current.phase,
                to = %phase,
                "out-of-order report, ignoring"
            );
            return false;
        }

        let now = OffsetDateTime::now_utc();
        if let Err(e) = self.deps.store.upsert_host(id, &report.host, phase, now).await {
            tracing::error!(request_id = %id, hub = %report.host, error = %e, "cache update failed");
            return false;
        }
        if let Some(cached) = self.requests.get_mut(id) {
            cached.hosts.insert(
                report.host.clone(),
                HostState {
                    phase,
                    update_time: now,
                },
            );
        }
        true
    }

    /// Hubs whose report the request waits for.
    fn expected_hubs<'a>(&'a self, cached: &'a CachedRequest) -> Vec<&'a str> {
        if !cached.request.hubs.is_empty() {
            cached.request.hubs.iter().collect()
        } else {
            self.fleet.iter().map(String::as_str).collect()
        }
    }

    fn is_complete(&self, cached: &CachedRequest) -> bool {
        if cached.hosts.is_empty() {
            return false;
        }
        let reported_done = cached.hosts.values().all(|h| h.phase.is_terminal());
        let expected_done = self
            .expected_hubs(cached)
            .iter()
            .all(|hub| cached.hosts.get(*hub).is_some_and(|h| h.phase.is_terminal()));
        reported_done && expected_done
    }

    async fn check_completion(&mut self, id: &str) {
        let complete = self.requests.get(id).is_some_and(|c| self.is_complete(c));
        if complete {
            self.finish(id, false).await;
        }
    }

    /// Emit the final status and forget the request.
    async fn finish(&mut self, id: &str, expired: bool) {
        let Some(cached) = self.requests.remove(id) else {
            return;
        };

        let status = match cached.aggregate() {
            status if !expired && status.is_final() => status,
            _ => RequestStatus::Fail,
        };
        let success = cached.hosts_in(HostPhase::Done);
        let failed = cached.hosts_in(HostPhase::Failed);
        tracing::info!(
            request_id = %id,
            %status,
            success = success.len(),
            failed = failed.len(),
            "request finished"
        );
        self.deps.live.send(LiveMessage::request_info(
            RequestInfo::new(&cached.request, status).with_hosts(success, failed),
        ));
        record_finished(status);

        if let Err(e) = self.deps.store.delete_request(id).await {
            tracing::error!(request_id = %id, error = %e, "cache delete failed");
        }
        if self.active.as_deref() == Some(id) {
            self.active = None;
            self.announced = false;
        }
        QUEUED_REQUESTS.set(self.requests.len() as i64);
    }

    /// Fail every cached request, queued or released, quiet for longer
    /// than the expiry window.
    pub async fn expire_stale_at(&mut self, now: OffsetDateTime) {
        let stale: Vec<String> = self
            .requests
            .values()
            .filter(|r| (now - r.last_update()) > self.expire)
            .map(|r| r.id().to_string())
            .collect();

        for id in stale {
            let e = ServiceError::Expired {
                request_id: id.clone(),
            };
            tracing::warn!(error = %e, "request expired");
            REQUESTS_EXPIRED.inc();
            self.finish(&id, true).await;
        }
    }

    fn publish_status(&self, request: &Request, status: RequestStatus) {
        self.deps
            .live
            .send(LiveMessage::request_info(RequestInfo::new(request, status)));
    }

    fn alert_release(&self, request: &Request) {
        let recipients = self.recipients.for_prefix(request.prefix);
        if recipients.is_empty() {
            return;
        }
        let subject = format!("HitSpool request {} started", request.id);
        let body = format!(
            "Request {} from {} ({}) for ticks {} to {} was sent to the hubs; data goes to {}.",
            request.id,
            request.username,
            request.prefix,
            request.start_tick,
            request.stop_tick,
            request.destination_dir
        );
        let alert = Alert::new(&subject, &body, recipients.iter().cloned());
        self.deps.live.send(LiveMessage::alert(alert, PRIO_EMAIL));
    }
}
