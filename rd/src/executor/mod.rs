//! External process execution
//!
//! One [`ExecutionRequest`] maps to exactly one invocation of the external
//! reasoning process. The outcome is classified into an [`ExecutionResult`]
//! that the recovery controller turns into user-facing text.

mod command;
mod output;

use async_trait::async_trait;

use crate::session::Session;

pub use command::CommandExecutor;
pub use output::{ParsedOutput, parse_output};

/// Prompts containing this marker reference an attached file
pub const FILE_MARKER: &str = "[File:";

/// Stderr substring the external process prints for an unknown continuity token
pub const STALE_SESSION_MARKER: &str = "No conversation found";

/// One invocation of the external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub prompt: String,
    /// Pass the session's continuity token, if there is one
    pub resume: bool,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>, resume: bool) -> Self {
        Self {
            prompt: prompt.into(),
            resume,
        }
    }

    /// File analysis or a long prompt, which gets the extended timeout
    pub fn is_long_job(&self, long_prompt_chars: usize) -> bool {
        self.prompt.contains(FILE_MARKER) || self.prompt.chars().count() >= long_prompt_chars
    }
}

/// Classified outcome of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Process exited zero; the response text
    Success(String),
    /// The deadline passed and the process was killed
    TimedOut,
    /// Process could not start or exited non-zero
    ProcessFailed { stderr: String, exit_code: Option<i32> },
    /// The continuity token is no longer recognized
    StaleSession { stderr: String },
}

/// Runs a request against the external process
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute once, updating `session` when the process reports a new token
    async fn execute(&self, request: &ExecutionRequest, session: &mut Session) -> ExecutionResult;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_prompt_is_not_long_job() {
        let request = ExecutionRequest::new("hello there", true);
        assert!(!request.is_long_job(5000));
    }

    #[test]
    fn test_file_marker_is_long_job() {
        let request = ExecutionRequest::new("[File: /tmp/photo.jpg]\nWhat is in this picture?", true);
        assert!(request.is_long_job(5000));
    }

    #[test]
    fn test_length_threshold() {
        assert!(!ExecutionRequest::new("a".repeat(4999), true).is_long_job(5000));
        assert!(ExecutionRequest::new("a".repeat(5000), true).is_long_job(5000));
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 2000 characters, 6000 bytes
        let request = ExecutionRequest::new("€".repeat(2000), true);
        assert!(!request.is_long_job(5000));
    }
}
