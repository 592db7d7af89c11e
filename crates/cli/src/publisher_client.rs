use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Reply sent by the Publisher when a request is admitted.
const REPLY_DONE: &str = "DONE";

/// One-shot request-reply connection to the Publisher.
#[derive(Clone, Debug)]
pub struct PublisherClient {
    addr: String,
    timeout: Duration,
}

impl PublisherClient {
    pub fn new(addr: &str, timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one request body. Returns whether the Publisher answered `DONE`.
    pub async fn send(&self, body: &str) -> Result<bool> {
        tokio::time::timeout(self.timeout, self.exchange(body))
            .await
            .with_context(|| {
                format!(
                    "no reply from publisher at {} within {}s",
                    self.addr,
                    self.timeout.as_secs()
                )
            })?
    }

    async fn exchange(&self, body: &str) -> Result<bool> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .with_context(|| format!("failed to connect to publisher at {}", self.addr))?;
        stream.write_all(body.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).await?;
        if line.is_empty() {
            anyhow::bail!("publisher at {} closed the connection without replying", self.addr);
        }
        tracing::debug!(reply = %line.trim_end(), "publisher replied");
        Ok(reply_is_done(&line))
    }
}

fn reply_is_done(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).trim_end_matches('\0') == REPLY_DONE
}
