//! Unix socket listener for the relay side
//!
//! Connections are served one at a time, so messages are answered in the
//! order they arrive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{RelayEvent, RelayRequest};
use super::{Conversation, InboundMessage, MessageHandler, REQUEST_TIMEOUT, TransportError, read_json_line};
use crate::lock::VERSION;

/// What the accept loop should do after a connection
enum Control {
    Continue,
    Shutdown,
}

/// Listens on a Unix socket and feeds requests to a [`MessageHandler`]
pub struct SocketListener {
    socket_path: PathBuf,
    shutdown: CancellationToken,
    read_timeout: Duration,
}

impl SocketListener {
    pub fn new(socket_path: impl Into<PathBuf>, shutdown: CancellationToken) -> Self {
        Self {
            socket_path: socket_path.into(),
            shutdown,
            read_timeout: REQUEST_TIMEOUT,
        }
    }

    /// How long a peer may take to send its request line
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind and serve until shutdown
    ///
    /// Returns `Ok` on a `Shutdown` request or when the token is cancelled,
    /// and [`TransportError::Conflict`] when another listener still answers on
    /// the socket path.
    pub async fn listen(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        let listener = self.bind().await?;
        let _socket = BoundSocket(&self.socket_path);
        info!(socket = %self.socket_path.display(), "Listening for messages");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("SocketListener::listen: shutdown token cancelled");
                    break;
                }
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    match self.serve(stream, handler.as_ref()).await {
                        Ok(Control::Continue) => {}
                        Ok(Control::Shutdown) => {
                            info!("Shutdown requested over socket");
                            self.shutdown.cancel();
                            break;
                        }
                        Err(e) => warn!(error = %e, "Connection failed"),
                    }
                }
            }
        }

        Ok(())
    }

    async fn bind(&self) -> Result<UnixListener, TransportError> {
        debug!(socket = ?self.socket_path, "SocketListener::bind: called");

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            if UnixStream::connect(&self.socket_path).await.is_ok() {
                return Err(TransportError::Conflict(format!(
                    "{} is still accepting connections",
                    self.socket_path.display()
                )));
            }
            debug!(socket = ?self.socket_path, "SocketListener::bind: removing stale socket");
            std::fs::remove_file(&self.socket_path)?;
        }

        UnixListener::bind(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::Conflict(format!("{} is in use", self.socket_path.display()))
            } else {
                TransportError::Io(e)
            }
        })
    }

    async fn serve(&self, stream: UnixStream, handler: &dyn MessageHandler) -> Result<Control, TransportError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut conversation = SocketConversation { writer: write_half };

        // Only the request line is bounded; the handler may run for as long as the job takes
        let read = tokio::time::timeout(self.read_timeout, read_json_line(&mut reader))
            .await
            .unwrap_or_else(|_| {
                Err(TransportError::Protocol(format!(
                    "No request received within {}ms",
                    self.read_timeout.as_millis()
                )))
            });
        let request: RelayRequest = match read {
            Ok(Some(request)) => request,
            Ok(None) => return Err(TransportError::Protocol("Empty message received".to_string())),
            Err(e) => {
                let _ = conversation.send(&RelayEvent::Error { message: e.to_string() }).await;
                return Err(e);
            }
        };
        debug!(?request, "SocketListener::serve: request received");

        match request {
            RelayRequest::Ping => {
                conversation
                    .send(&RelayEvent::Pong {
                        version: VERSION.to_string(),
                    })
                    .await?;
                Ok(Control::Continue)
            }
            RelayRequest::Shutdown => {
                conversation.send(&RelayEvent::Ok).await?;
                Ok(Control::Shutdown)
            }
            RelayRequest::Message {
                sender,
                text,
                attachment,
                context,
            } => {
                let message = InboundMessage::new(sender, text)
                    .with_attachment(attachment)
                    .with_context(context);
                let id = message.id.clone();
                match handler.handle(message, &mut conversation).await {
                    Ok(()) => conversation.send(&RelayEvent::Done).await?,
                    Err(e) => {
                        warn!(%id, error = %e, "Handler failed");
                        conversation.send(&RelayEvent::Error { message: e.to_string() }).await?;
                    }
                }
                Ok(Control::Continue)
            }
        }
    }
}

/// Removes the socket file when the listener stops, including when the
/// `listen` future is dropped mid-flight
struct BoundSocket<'a>(&'a Path);

impl Drop for BoundSocket<'_> {
    fn drop(&mut self) {
        cleanup_socket(self.0);
    }
}

/// Conversation over one socket connection
struct SocketConversation {
    writer: OwnedWriteHalf,
}

impl SocketConversation {
    async fn send(&mut self, event: &RelayEvent) -> Result<(), TransportError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Conversation for SocketConversation {
    async fn reply(&mut self, text: &str) -> Result<(), TransportError> {
        self.send(&RelayEvent::Reply { text: text.to_string() }).await
    }

    async fn typing(&mut self) -> Result<(), TransportError> {
        self.send(&RelayEvent::Typing).await
    }
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}
