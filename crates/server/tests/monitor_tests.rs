//! RequestMonitor: queueing, completion, delivery, expiry and restart.

mod common;

use common::*;
use hitspool_core::config::AppConfig;
use hitspool_core::{Envelope, HostPhase, HostReport, Prefix, Request, RequestStatus, StagedName};
use hitspool_metadata::{SqliteStore, StateStore};
use hitspool_server::sender::{MonitorDeps, RequestMonitor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;

struct Harness {
    monitor: RequestMonitor,
    fanout: Arc<RecordingFanout>,
    sink: Arc<RecordingSink>,
    store: Arc<dyn StateStore>,
    config: AppConfig,
    dir: TempDir,
}

impl Harness {
    async fn new(hubs: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = cluster_config(dir.path(), hubs);
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::in_memory().await.unwrap());
        Self::with_store(dir, config, store)
    }

    fn with_store(dir: TempDir, config: AppConfig, store: Arc<dyn StateStore>) -> Self {
        let fanout = Arc::new(RecordingFanout::default());
        let sink = Arc::new(RecordingSink::default());
        let monitor = RequestMonitor::new(
            &config,
            clock(),
            MonitorDeps {
                store: store.clone(),
                fanout: fanout.clone(),
                live: sink.clone(),
            },
        );
        Self {
            monitor,
            fanout,
            sink,
            store,
            config,
            dir,
        }
    }

    fn drop_dir(&self) -> PathBuf {
        self.dir.path().join("drop")
    }

    fn request(&self, id: &str, prefix: Prefix, start_secs: i64, stop_secs: i64) -> Request {
        request(
            id,
            prefix,
            T0 + start_secs * SECOND,
            T0 + stop_secs * SECOND,
            &self.drop_dir(),
        )
    }

    fn staged_name(&self, request: &Request, hub: &str) -> String {
        let timetag = clock().ticks_to_utc(request.timetag_tick()).unwrap().timetag();
        StagedName::new(request.prefix, timetag, hub).to_string()
    }

    /// A DONE whose staged directory exists in the receive directory.
    fn done(&self, request: &Request, hub: &str) -> Envelope {
        let staged = stage_delivery(&self.config.sender.receive_dir, &self.staged_name(request, hub));
        Envelope::Done(HostReport::new(request.clone(), hub).with_copy_dir(staged.display().to_string()))
    }

    async fn submit_and_release(&mut self, request: &Request) {
        self.monitor.handle(Envelope::Initial(request.clone())).await;
        self.monitor.release_next().await;
        assert_eq!(self.monitor.active(), Some(request.id.as_str()));
    }
}

fn started(request: &Request, hub: &str) -> Envelope {
    Envelope::Started(HostReport::new(request.clone(), hub))
}

fn working(request: &Request, hub: &str) -> Envelope {
    Envelope::Working(HostReport::new(request.clone(), hub))
}

fn failed(request: &Request, hub: &str) -> Envelope {
    Envelope::Failed(HostReport::new(request.clone(), hub).with_detail("transfer failed"))
}

fn ignored(request: &Request, hub: &str) -> Envelope {
    Envelope::Ignored(HostReport::new(request.clone(), hub))
}

#[tokio::test]
async fn queued_requests_release_one_at_a_time_by_start() {
    let mut h = Harness::new(&["ichub01", "ichub02"]).await;
    let later = h.request("r2", Prefix::Anon, 30, 35);
    let earlier = h.request("r1", Prefix::Anon, 1, 5);

    h.monitor.handle(Envelope::Initial(later.clone())).await;
    h.monitor.handle(Envelope::Initial(earlier.clone())).await;
    h.monitor.release_next().await;
    h.monitor.release_next().await;
    assert_eq!(h.fanout.released_ids(), vec!["r1"]);

    for hub in ["ichub01", "ichub02"] {
        h.monitor.handle(started(&earlier, hub)).await;
        let done = h.done(&earlier, hub);
        h.monitor.handle(done).await;
    }
    assert_eq!(h.monitor.active(), None);

    h.monitor.release_next().await;
    assert_eq!(h.fanout.released_ids(), vec!["r1", "r2"]);
    for hub in ["ichub01", "ichub02"] {
        let done = h.done(&later, hub);
        h.monitor.handle(done).await;
    }

    assert_eq!(
        h.sink.statuses("r1"),
        vec![RequestStatus::Queued, RequestStatus::InProgress, RequestStatus::Success]
    );
    assert_eq!(h.sink.final_info("r2").unwrap().status, RequestStatus::Success);
    assert!(h.monitor.is_empty());
    assert!(h.store.list_requests().await.unwrap().is_empty());

    for hub in ["ichub01", "ichub02"] {
        assert!(h.drop_dir().join(h.staged_name(&earlier, hub)).join("HitSpool-1.dat").exists());
    }
}

#[tokio::test]
async fn released_request_carries_the_receive_location() {
    let mut h = Harness::new(&["ichub01"]).await;
    let req = h.request("loc", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;

    match h.fanout.published().first() {
        Some(Envelope::Request { request, copy_dir }) => {
            assert_eq!(request, &req);
            let receive_dir = h.config.sender.receive_dir.display().to_string();
            assert_eq!(copy_dir, &format!("pdaq@2ndbuild:{receive_dir}"));
        }
        other => panic!("expected REQUEST, got {other:?}"),
    }
}

#[tokio::test]
async fn mixed_outcome_is_partial() {
    let mut h = Harness::new(&["ichub01", "ichub02"]).await;
    let req = h.request("s7", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;

    h.monitor.handle(started(&req, "ichub01")).await;
    h.monitor.handle(started(&req, "ichub02")).await;
    let done = h.done(&req, "ichub01");
    h.monitor.handle(done).await;
    assert_eq!(h.monitor.active(), Some("s7"));
    h.monitor.handle(failed(&req, "ichub02")).await;

    let info = h.sink.final_info("s7").unwrap();
    assert_eq!(info.status, RequestStatus::Partial);
    assert_eq!(info.success, Some(vec!["ichub01".to_string()]));
    assert_eq!(info.failed, Some(vec!["ichub02".to_string()]));
    assert_eq!(
        h.sink
            .statuses("s7")
            .iter()
            .filter(|s| **s == RequestStatus::InProgress)
            .count(),
        1
    );
}

#[tokio::test]
async fn lone_failed_hub_fails_the_request() {
    let mut h = Harness::new(&["ichub01"]).await;
    let req = h.request("s4", Prefix::Anon, -6, 0);
    h.submit_and_release(&req).await;

    h.monitor.handle(failed(&req, "ichub01")).await;

    let info = h.sink.final_info("s4").unwrap();
    assert_eq!(info.status, RequestStatus::Fail);
    assert_eq!(info.success, Some(vec![]));
    assert_eq!(info.failed, Some(vec!["ichub01".to_string()]));
    assert!(h.store.list_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn ignoring_hubs_do_not_block_completion() {
    let mut h = Harness::new(&["ichub01", "ichub02"]).await;
    let req = h.request("ig", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;

    h.monitor.handle(ignored(&req, "ichub02")).await;
    assert_eq!(h.monitor.active(), Some("ig"));
    let done = h.done(&req, "ichub01");
    h.monitor.handle(done).await;

    assert_eq!(h.sink.final_info("ig").unwrap().status, RequestStatus::Success);
}

#[tokio::test]
async fn every_hub_ignoring_is_a_failure() {
    let mut h = Harness::new(&["ichub01", "ichub02"]).await;
    let req = h.request("none", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;

    h.monitor.handle(ignored(&req, "ichub01")).await;
    h.monitor.handle(ignored(&req, "ichub02")).await;

    assert_eq!(h.sink.final_info("none").unwrap().status, RequestStatus::Fail);
}

#[tokio::test]
async fn snalert_delivery_is_queued_for_archival() {
    let mut h = Harness::new(&["ichub01"]).await;
    let req = h.request("s1", Prefix::SnAlert, 1, 5);
    h.submit_and_release(&req).await;

    let name = h.staged_name(&req, "ichub01");
    h.monitor.handle(started(&req, "ichub01")).await;
    let done = h.done(&req, "ichub01");
    h.monitor.handle(done).await;

    assert_eq!(h.sink.final_info("s1").unwrap().status, RequestStatus::Success);
    assert!(h.drop_dir().join(&name).join("HitSpool-1.dat").exists());
    assert!(!h.config.sender.receive_dir.join(&name).exists());

    let spade = &h.config.sender.archive_dir;
    assert!(spade.join(format!("HS_{name}.dat.tar.bz2")).exists());
    let xml = std::fs::read_to_string(spade.join(format!("HS_{name}.meta.xml"))).unwrap();
    assert!(xml.contains("<DIF_Plus>"));
    assert!(xml.contains("ichub01"));
}

#[tokio::test]
async fn failed_move_marks_the_hub_failed() {
    let mut h = Harness::new(&["ichub01"]).await;
    let req = h.request("mv", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;

    let bogus = h.config.sender.receive_dir.join("not_a_staged_directory");
    h.monitor
        .handle(Envelope::Done(
            HostReport::new(req.clone(), "ichub01").with_copy_dir(bogus.display().to_string()),
        ))
        .await;

    let info = h.sink.final_info("mv").unwrap();
    assert_eq!(info.status, RequestStatus::Fail);
    assert_eq!(info.failed, Some(vec!["ichub01".to_string()]));
}

#[tokio::test]
async fn quiet_released_request_expires() {
    let mut h = Harness::new(&["ichub01", "ichub02"]).await;
    let req = h.request("old", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;
    h.monitor.handle(started(&req, "ichub01")).await;

    h.monitor.expire_stale_at(OffsetDateTime::now_utc()).await;
    assert_eq!(h.monitor.active(), Some("old"));

    let later = OffsetDateTime::now_utc() + Duration::from_secs(h.config.sender.expire_secs + 1);
    h.monitor.expire_stale_at(later).await;

    assert_eq!(h.sink.final_info("old").unwrap().status, RequestStatus::Fail);
    assert_eq!(h.monitor.active(), None);
    assert!(h.monitor.cached("old").is_none());
    assert!(h.store.get_request("old").await.unwrap().is_none());
}

#[tokio::test]
async fn quiet_queued_request_expires_too() {
    let mut h = Harness::new(&["ichub01"]).await;
    let active = h.request("active", Prefix::Anon, 1, 5);
    h.submit_and_release(&active).await;
    let queued = h.request("queued", Prefix::Anon, 30, 35);
    h.monitor.handle(Envelope::Initial(queued)).await;

    let later = OffsetDateTime::now_utc() + Duration::from_secs(5 * h.config.sender.expire_secs);
    h.monitor.expire_stale_at(later).await;

    for id in ["active", "queued"] {
        assert_eq!(h.sink.final_info(id).unwrap().status, RequestStatus::Fail, "{id}");
        assert!(h.monitor.cached(id).is_none(), "{id}");
        assert!(h.store.get_request(id).await.unwrap().is_none(), "{id}");
    }
    assert!(h.monitor.is_empty());

    h.monitor.release_next().await;
    assert_eq!(h.fanout.released_ids(), vec!["active"]);
}

#[tokio::test]
async fn duplicate_initial_is_ignored() {
    let mut h = Harness::new(&["ichub01"]).await;
    let req = h.request("dup", Prefix::Anon, 1, 5);

    h.monitor.handle(Envelope::Initial(req.clone())).await;
    h.monitor.handle(Envelope::Initial(req)).await;

    assert_eq!(h.monitor.len(), 1);
    assert_eq!(h.sink.statuses("dup"), vec![RequestStatus::Queued]);
}

#[tokio::test]
async fn delete_withdraws_only_queued_requests() {
    let mut h = Harness::new(&["ichub01"]).await;
    let active = h.request("a", Prefix::Anon, 1, 5);
    let queued = h.request("q", Prefix::Anon, 30, 35);
    h.submit_and_release(&active).await;
    h.monitor.handle(Envelope::Initial(queued)).await;

    for id in ["q", "a"] {
        h.monitor
            .handle(Envelope::Delete {
                request_id: id.to_string(),
                username: "tester".to_string(),
            })
            .await;
    }

    assert!(h.monitor.cached("q").is_none());
    assert_eq!(h.sink.final_info("q").unwrap().status, RequestStatus::Fail);
    assert!(h.monitor.cached("a").is_some());
    assert_eq!(h.monitor.active(), Some("a"));
}

#[tokio::test]
async fn host_phases_never_move_backwards() {
    let mut h = Harness::new(&["ichub01", "ichub02"]).await;
    let req = h.request("mono", Prefix::Anon, 1, 5);
    h.submit_and_release(&req).await;

    let done = h.done(&req, "ichub01");
    h.monitor.handle(done).await;
    h.monitor.handle(working(&req, "ichub01")).await;
    h.monitor.handle(started(&req, "ichub01")).await;

    let cached = h.monitor.cached("mono").unwrap();
    assert_eq!(cached.hosts["ichub01"].phase, HostPhase::Done);
    let stored = h.store.get_request("mono").await.unwrap().unwrap();
    assert_eq!(stored.hosts["ichub01"].phase, HostPhase::Done);
}

#[tokio::test]
async fn reports_for_unknown_requests_are_dropped() {
    let mut h = Harness::new(&["ichub01"]).await;
    let stray = h.request("stray", Prefix::Anon, 1, 5);

    h.monitor.handle(started(&stray, "ichub01")).await;
    h.monitor.handle(failed(&stray, "ichub01")).await;

    assert!(h.monitor.is_empty());
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn restart_resumes_the_active_request() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), &["ichub01", "ichub02"]);
    let cache_path = config.sender.cache_path();

    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::new(&cache_path).await.unwrap());
    let mut first = Harness::with_store(dir, config, store);
    let active = first.request("live", Prefix::Anon, 1, 5);
    let queued = first.request("wait", Prefix::Anon, 30, 35);
    first.submit_and_release(&active).await;
    first.monitor.handle(Envelope::Initial(queued)).await;
    first.monitor.handle(started(&active, "ichub01")).await;

    let Harness { dir, config, .. } = first;
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::new(&cache_path).await.unwrap());
    let mut second = Harness::with_store(dir, config, store);
    second.monitor.resume().await.unwrap();

    assert_eq!(second.monitor.active(), Some("live"));
    assert_eq!(second.monitor.len(), 2);
    assert_eq!(
        second.monitor.cached("live").unwrap().hosts["ichub01"].phase,
        HostPhase::Started
    );
    second.monitor.release_next().await;
    assert!(second.fanout.published().is_empty());

    for hub in ["ichub01", "ichub02"] {
        let done = second.done(&active, hub);
        second.monitor.handle(done).await;
    }
    assert_eq!(second.sink.statuses("live"), vec![RequestStatus::Success]);

    second.monitor.release_next().await;
    assert_eq!(second.fanout.released_ids(), vec!["wait"]);
}
