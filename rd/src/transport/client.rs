//! Socket client used by the CLI

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tracing::debug;

use super::messages::{RelayEvent, RelayRequest};
use super::{MAX_MESSAGE_SIZE, REQUEST_TIMEOUT, read_json_line};

/// Client for talking to a running relay
#[derive(Debug, Clone)]
pub struct RelayClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl RelayClient {
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Bound connecting and the short request/response exchanges
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the relay socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if the relay is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("RelayClient: pinging relay");
        match self.request(RelayRequest::Ping).await? {
            RelayEvent::Pong { version } => Ok(version),
            RelayEvent::Error { message } => Err(eyre::eyre!("Relay error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Request the relay to stop gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("RelayClient: requesting shutdown");
        match self.request(RelayRequest::Shutdown).await? {
            RelayEvent::Ok => Ok(()),
            RelayEvent::Error { message } => Err(eyre::eyre!("Relay error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Send a message and collect the replies
    ///
    /// Every event is passed to `on_event` as it arrives. There is no read
    /// timeout here: long jobs can legitimately run for many minutes.
    pub async fn send<F>(&self, request: RelayRequest, mut on_event: F) -> Result<Vec<String>>
    where
        F: FnMut(&RelayEvent),
    {
        let mut reader = self.open(&request).await?;
        let mut replies = Vec::new();

        loop {
            let event = read_event(&mut reader).await?;
            on_event(&event);
            match event {
                RelayEvent::Reply { text } => replies.push(text),
                RelayEvent::Typing => {}
                RelayEvent::Done => return Ok(replies),
                RelayEvent::Error { message } => return Err(eyre::eyre!("Relay error: {}", message)),
                other => return Err(eyre::eyre!("Unexpected response: {:?}", other)),
            }
        }
    }

    /// Single request, single response, bounded by the client timeout
    async fn request(&self, request: RelayRequest) -> Result<RelayEvent> {
        let mut reader = self.open(&request).await?;
        tokio::time::timeout(self.timeout, read_event(&mut reader))
            .await
            .context("Read timeout")?
    }

    /// Connect and write the request line, returning the read side
    async fn open(&self, request: &RelayRequest) -> Result<BufReader<OwnedReadHalf>> {
        debug!(socket = ?self.socket_path, ?request, "RelayClient: sending request");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to relay socket")?;

        let mut line = serde_json::to_string(request).context("Failed to serialize request")?;
        if line.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", line.len()));
        }
        line.push('\n');

        let (read_half, mut write_half) = stream.into_split();
        tokio::time::timeout(self.timeout, async {
            write_half.write_all(line.as_bytes()).await.context("Failed to write request")?;
            write_half.flush().await.context("Failed to flush request")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        Ok(BufReader::new(read_half))
    }
}

async fn read_event(reader: &mut BufReader<OwnedReadHalf>) -> Result<RelayEvent> {
    let event: Option<RelayEvent> = read_json_line(reader).await.context("Failed to read relay response")?;
    let event = event.ok_or_else(|| eyre::eyre!("Relay closed the connection"))?;
    debug!(?event, "RelayClient: received event");
    Ok(event)
}
