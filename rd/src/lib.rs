//! RelayDaemon - session-aware relay to a headless reasoning CLI
//!
//! Accepts inbound messages from a transport, forwards each one to an external
//! command-line reasoning process, and delivers the answer back in chunks the
//! transport can carry. Conversation continuity is kept across restarts with a
//! persisted continuity token.
//!
//! # Modules
//!
//! - [`lock`] - Single-instance lock with stale-owner reclamation
//! - [`session`] - Continuity token persistence with a 12 hour expiry
//! - [`executor`] - Runs the external process under a deadline
//! - [`recovery`] - Turns execution outcomes into text, retrying stale sessions
//! - [`chunker`] - Splits responses to the transport's message limit
//! - [`supervisor`] - Restarts the listener on startup conflicts
//! - [`transport`] - Message handler traits and the Unix socket transport
//! - [`relay`] - The message pipeline tying the above together
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod chunker;
pub mod cli;
pub mod config;
pub mod executor;
pub mod lock;
pub mod memory;
pub mod prompts;
pub mod recovery;
pub mod relay;
pub mod session;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use executor::{CommandExecutor, ExecutionRequest, ExecutionResult, Executor};
pub use lock::{InstanceLock, LockError, LockGuard, VERSION};
pub use prompts::{PromptBuilder, PromptError, PromptInput};
pub use recovery::RecoveryController;
pub use relay::Relay;
pub use session::{Session, SessionStore};
pub use supervisor::ConnectionSupervisor;
pub use transport::{
    Conversation, InboundMessage, MessageHandler, RelayClient, RelayEvent, RelayRequest, SocketListener,
    TransportError,
};
