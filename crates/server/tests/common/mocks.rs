//! In-process stand-ins for the monitoring sink, the message fabric and
//! file transports.

use async_trait::async_trait;
use hitspool_core::live::LiveValue;
use hitspool_core::{Alert, Envelope, LiveMessage, MsgType, RequestInfo, RequestStatus};
use hitspool_server::{Fanout, LiveSink, Outbox, ServiceResult};
use hitspool_transport::{Destination, FileReport, FileTransport, TransferSummary, TransportError, TransportResult};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps every monitoring document.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<LiveMessage>>,
}

impl LiveSink for RecordingSink {
    fn send(&self, message: LiveMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn messages(&self) -> Vec<LiveMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Statuses published for one request, in order.
    pub fn statuses(&self, request_id: &str) -> Vec<RequestStatus> {
        self.infos(request_id).into_iter().map(|i| i.status).collect()
    }

    pub fn infos(&self, request_id: &str) -> Vec<RequestInfo> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m.value {
                LiveValue::RequestInfo(info) if info.request_id == request_id => Some(info),
                _ => None,
            })
            .collect()
    }

    /// The last final status document for a request.
    pub fn final_info(&self, request_id: &str) -> Option<RequestInfo> {
        self.infos(request_id)
            .into_iter()
            .rev()
            .find(|i| i.status.is_final())
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m.value {
                LiveValue::Alert(alert) => Some(alert),
                _ => None,
            })
            .collect()
    }
}

/// Keeps every envelope sent.
#[derive(Default)]
pub struct RecordingOutbox {
    sent: Mutex<Vec<Envelope>>,
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send(&self, envelope: Envelope) -> ServiceResult<()> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

#[allow(dead_code)]
impl RecordingOutbox {
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn msgtypes(&self) -> Vec<MsgType> {
        self.sent().iter().map(Envelope::msgtype).collect()
    }

    pub fn last(&self) -> Option<Envelope> {
        self.sent().pop()
    }
}

/// Keeps every REQUEST fanned out and reports one listening Worker.
#[derive(Default)]
pub struct RecordingFanout {
    published: Mutex<Vec<Envelope>>,
}

impl Fanout for RecordingFanout {
    fn publish(&self, envelope: &Envelope) -> ServiceResult<usize> {
        self.published.lock().unwrap().push(envelope.clone());
        Ok(1)
    }
}

#[allow(dead_code)]
impl RecordingFanout {
    pub fn published(&self) -> Vec<Envelope> {
        self.published.lock().unwrap().clone()
    }

    /// Request IDs in release order.
    pub fn released_ids(&self) -> Vec<String> {
        self.published()
            .iter()
            .map(|e| e.request_id().to_string())
            .collect()
    }
}

/// Copies into the destination's directory on this machine, whatever its
/// form.
#[derive(Default)]
pub struct LocalCopyTransport {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl LocalCopyTransport {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileTransport for LocalCopyTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn copy(&self, files: &[PathBuf], destination: &Destination) -> TransportResult<TransferSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target = PathBuf::from(destination.path());
        let mut summary = TransferSummary::default();
        for file in files {
            let name = file
                .file_name()
                .ok_or_else(|| TransportError::InvalidDestination(file.display().to_string()))?;
            let bytes = copy_tree(file, &target.join(name))?;
            summary.bytes_sent += bytes;
            summary.files.push(FileReport {
                filename: name.to_string_lossy().into_owned(),
                bytes_sent: bytes,
                ..Default::default()
            });
        }
        summary.total_size = Some(summary.bytes_sent);
        Ok(summary)
    }
}

/// Always fails, like a tool exiting non-zero.
#[derive(Default)]
pub struct FailingTransport {
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FailingTransport {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileTransport for FailingTransport {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn copy(&self, files: &[PathBuf], _destination: &Destination) -> TransportResult<TransferSummary> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Failed {
            backend: "failing",
            status: 12,
            failed: files.iter().map(|f| f.display().to_string()).collect(),
        })
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<u64> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        return std::fs::copy(from, to);
    }
    std::fs::create_dir_all(to)?;
    let mut bytes = 0;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        bytes += copy_tree(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(bytes)
}
