//! Inbound message transport
//!
//! The relay only sees a transport through two narrow traits: a
//! [`MessageHandler`] that receives one decoded [`InboundMessage`] at a time,
//! and the [`Conversation`] it answers on. [`SocketListener`] is the local
//! Unix-socket transport used by the `rd` CLI.
//!
//! Wire format is JSON-over-newline: each request and event is one line.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use uuid::Uuid;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::RelayClient;
pub use listener::{SocketListener, cleanup_socket};
pub use messages::{RelayEvent, RelayRequest};

/// Largest accepted line (one request or event)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default deadline for short socket exchanges
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    /// The previous connection has not been released yet
    #[error("Previous connection still held: {0}")]
    Conflict(String),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// Check if this is the transient startup conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransportError::Conflict(_))
    }
}

/// One decoded inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    /// Local path of an attached file, if any
    pub attachment: Option<PathBuf>,
    /// Extra context supplied alongside the message
    pub context: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            sender: sender.into(),
            text: text.into(),
            attachment: None,
            context: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Option<PathBuf>) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }
}

/// Reply side of a conversation with one sender
#[async_trait]
pub trait Conversation: Send {
    /// Deliver one outbound message
    async fn reply(&mut self, text: &str) -> Result<(), TransportError>;

    /// Show the "working" indicator
    async fn typing(&mut self) -> Result<(), TransportError>;
}

/// Receives inbound messages from a transport
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage, conversation: &mut dyn Conversation) -> Result<(), TransportError>;
}

/// Read one JSON line, rejecting lines over [`MAX_MESSAGE_SIZE`]
///
/// Returns `Ok(None)` at end of stream.
pub(crate) async fn read_json_line<T, R>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    T: DeserializeOwned,
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let bytes_read = reader.take(MAX_MESSAGE_SIZE as u64 + 1).read_line(&mut line).await?;

    if bytes_read == 0 {
        return Ok(None);
    }
    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(TransportError::Protocol(format!("Message too large: over {} bytes", MAX_MESSAGE_SIZE)));
    }

    Ok(Some(serde_json::from_str(line.trim())?))
}
