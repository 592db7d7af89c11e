//! Newline-delimited JSON socket fabric.
//!
//! Three patterns run over plain TCP, one JSON document per line:
//! - publish-subscribe: [`Broadcaster`] sends every REQUEST to every
//!   connected [`Subscriber`]
//! - push-pull: many [`PushClient`]s feed one [`PullListener`], which merges
//!   them into a bounded queue
//! - request-reply: a client writes one request line and reads back
//!   `DONE\0` or `ERROR\0`

use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use hitspool_core::{Envelope, TickClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

pub const REPLY_DONE: &str = "DONE";
pub const REPLY_ERROR: &str = "ERROR";

/// Buffered REQUEST lines per subscriber before it is considered lagging.
const BROADCAST_CAPACITY: usize = 64;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Encode one envelope as a newline-terminated JSON line.
pub fn encode_line(envelope: &Envelope) -> ServiceResult<Vec<u8>> {
    let mut bytes = envelope.to_json()?.into_bytes();
    bytes.push(b'\n');
    Ok(bytes)
}

/// Encode a request-reply answer.
pub fn reply_line(ok: bool) -> Vec<u8> {
    let word = if ok { REPLY_DONE } else { REPLY_ERROR };
    format!("{word}\0\n").into_bytes()
}

/// Whether a reply line reports success.
pub fn reply_is_done(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).trim_end_matches('\0') == REPLY_DONE
}

/// Connect to `addr`, doubling the delay between attempts up to `max_backoff`.
pub async fn connect_with_backoff(addr: &str, max_backoff: Duration) -> TcpStream {
    let mut delay = INITIAL_BACKOFF.min(max_backoff.max(INITIAL_BACKOFF));
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(e) => {
                tracing::warn!(addr, error = %e, retry_in_ms = delay.as_millis() as u64, "connect failed");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_backoff.max(INITIAL_BACKOFF));
            }
        }
    }
}

/// Where a component sends the envelopes it produces.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, envelope: Envelope) -> ServiceResult<()>;
}

/// In-process hand-off straight into the RequestMonitor's queue.
#[async_trait]
impl Outbox for mpsc::Sender<Envelope> {
    async fn send(&self, envelope: Envelope) -> ServiceResult<()> {
        mpsc::Sender::send(self, envelope)
            .await
            .map_err(|_| ServiceError::Closed("request monitor queue".to_string()))
    }
}

/// Fan-out of released requests to every Worker.
pub trait Fanout: Send + Sync {
    /// Publish one envelope; returns how many subscribers it was queued for.
    fn publish(&self, envelope: &Envelope) -> ServiceResult<usize>;
}

/// Publish side of the publish-subscribe channel.
pub struct Broadcaster {
    tx: broadcast::Sender<Arc<[u8]>>,
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
}

impl Broadcaster {
    pub async fn bind(addr: &str) -> ServiceResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, _) = broadcast::channel::<Arc<[u8]>>(BROADCAST_CAPACITY);

        let accept_tx = tx.clone();
        let accept = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "subscriber accept failed");
                        continue;
                    }
                };
                tracing::info!(%peer, "worker subscribed");
                let rx = accept_tx.subscribe();
                tokio::spawn(feed_subscriber(stream, peer, rx));
            }
        });

        tracing::info!(addr = %local_addr, "request fan-out listening");
        Ok(Self {
            tx,
            local_addr,
            accept,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently connected subscribers.
    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Fanout for Broadcaster {
    fn publish(&self, envelope: &Envelope) -> ServiceResult<usize> {
        let line: Arc<[u8]> = encode_line(envelope)?.into();
        // No receivers is not an error; the request is simply unheard.
        Ok(self.tx.send(line).unwrap_or(0))
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn feed_subscriber(mut stream: TcpStream, peer: SocketAddr, mut rx: broadcast::Receiver<Arc<[u8]>>) {
    loop {
        match rx.recv().await {
            Ok(line) => {
                if let Err(e) = stream.write_all(&line).await {
                    tracing::info!(%peer, error = %e, "worker unsubscribed");
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(%peer, missed, "subscriber lagged, requests dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Pull side of the push-pull channel.
pub struct PullListener {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
}

impl PullListener {
    /// Accept pushes on `addr` and forward every valid envelope into `queue`.
    ///
    /// Lines that do not parse are logged and skipped. A full queue
    /// applies backpressure to the pushing connection.
    pub async fn bind(addr: &str, clock: Arc<TickClock>, queue: mpsc::Sender<Envelope>) -> ServiceResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let accept = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "push accept failed");
                        continue;
                    }
                };
                tracing::debug!(%peer, "push connection");
                tokio::spawn(drain_pushes(stream, peer, clock.clone(), queue.clone()));
            }
        });

        tracing::info!(addr = %local_addr, "envelope intake listening");
        Ok(Self { local_addr, accept })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for PullListener {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn drain_pushes(stream: TcpStream, peer: SocketAddr, clock: Arc<TickClock>, queue: mpsc::Sender<Envelope>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "push connection closed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Envelope::from_json(&line, &clock) {
            Ok(envelope) => {
                if queue.send(envelope).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(%peer, error = %e, "discarding malformed envelope"),
        }
    }
}

/// Push side of the push-pull channel. Reconnects on demand.
pub struct PushClient {
    addr: String,
    max_backoff: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl PushClient {
    pub fn new(addr: impl Into<String>, max_backoff: Duration) -> Self {
        Self {
            addr: addr.into(),
            max_backoff,
            stream: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Outbox for PushClient {
    async fn send(&self, envelope: Envelope) -> ServiceResult<()> {
        let line = encode_line(&envelope)?;
        let mut guard = self.stream.lock().await;

        // One retry on a fresh connection; a stale socket usually fails on
        // the first write after the peer restarted.
        for attempt in 0..2 {
            if guard.is_none() {
                *guard = Some(connect_with_backoff(&self.addr, self.max_backoff).await);
            }
            if let Some(stream) = guard.as_mut() {
                match stream.write_all(&line).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(addr = %self.addr, attempt, error = %e, "push failed, reconnecting");
                        *guard = None;
                    }
                }
            }
        }
        Err(ServiceError::Closed(format!("push to {}", self.addr)))
    }
}

/// Subscribe side of the publish-subscribe channel.
pub struct Subscriber {
    addr: String,
    max_backoff: Duration,
    clock: Arc<TickClock>,
    reader: Option<BufReader<OwnedReadHalf>>,
}

impl Subscriber {
    pub fn new(addr: impl Into<String>, max_backoff: Duration, clock: Arc<TickClock>) -> Self {
        Self {
            addr: addr.into(),
            max_backoff,
            clock,
            reader: None,
        }
    }

    /// Next envelope from the publisher, reconnecting as needed.
    pub async fn next(&mut self) -> Envelope {
        loop {
            if self.reader.is_none() {
                let stream = connect_with_backoff(&self.addr, self.max_backoff).await;
                tracing::info!(addr = %self.addr, "subscribed to requests");
                let (read, _write) = stream.into_split();
                self.reader = Some(BufReader::new(read));
            }
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };

            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    tracing::warn!(addr = %self.addr, "publisher went away");
                    self.reader = None;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Envelope::from_json(&line, &self.clock) {
                        Ok(envelope) => return envelope,
                        Err(e) => tracing::warn!(error = %e, "discarding malformed request"),
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %self.addr, error = %e, "subscription read failed");
                    self.reader = None;
                }
            }
        }
    }
}

/// Send one request line and wait for the reply.
pub async fn request_reply(addr: &str, body: &str) -> ServiceResult<bool> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(reply_is_done(&line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hitspool_core::{HubSet, LeapSeconds, Prefix, Request};

    fn clock() -> Arc<TickClock> {
        Arc::new(TickClock::with_year(LeapSeconds::builtin(), 2026))
    }

    fn request() -> Request {
        Request {
            id: "wire1".to_string(),
            username: "tester".to_string(),
            prefix: Prefix::Anon,
            start_tick: 10,
            stop_tick: 20,
            destination_dir: "/tmp/drop".to_string(),
            hubs: HubSet::all(),
            extract: false,
        }
    }

    #[test]
    fn reply_lines_carry_a_nul() {
        assert_eq!(reply_line(true), b"DONE\0\n".to_vec());
        assert!(reply_is_done("DONE\0\n"));
        assert!(!reply_is_done("ERROR\0\n"));
    }

    #[tokio::test]
    async fn push_reaches_pull_queue() {
        let (tx, mut rx) = mpsc::channel(4);
        let pull = PullListener::bind("127.0.0.1:0", clock(), tx).await.unwrap();
        let push = PushClient::new(pull.local_addr().to_string(), Duration::from_millis(200));

        push.send(Envelope::Initial(request())).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got, Envelope::Initial(request()));
    }

    #[tokio::test]
    async fn broadcast_reaches_subscriber() {
        let fanout = Broadcaster::bind("127.0.0.1:0").await.unwrap();
        let mut sub = Subscriber::new(fanout.local_addr().to_string(), Duration::from_millis(200), clock());

        let envelope = Envelope::Request {
            request: request(),
            copy_dir: "/tmp/receive".to_string(),
        };
        let reader = tokio::spawn(async move { sub.next().await });
        while fanout.subscribers() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        fanout.publish(&envelope).unwrap();

        assert_eq!(reader.await.unwrap(), envelope);
    }
}
