//! Structured output parsing
//!
//! With `--output-format json` the external process prints one JSON record
//! holding the response text and the continuity token. Anything that does not
//! parse falls back to the raw stdout.

use serde::Deserialize;
use tracing::debug;

/// Response text and token extracted from stdout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedOutput {
    pub text: String,
    pub session_id: Option<String>,
    /// False when the raw stdout was used as the text
    pub structured: bool,
}

/// Fields read from the structured record; everything else is ignored
#[derive(Debug, Deserialize)]
struct RawRecord {
    result: Option<String>,
    session_id: Option<String>,
}

/// Parse stdout from a successful invocation
pub fn parse_output(stdout: &str) -> ParsedOutput {
    let trimmed = stdout.trim();
    match serde_json::from_str::<RawRecord>(trimmed) {
        Ok(RawRecord {
            result: Some(result),
            session_id,
        }) => ParsedOutput {
            text: result,
            session_id: session_id.filter(|s| !s.is_empty()),
            structured: true,
        },
        Ok(RawRecord { result: None, session_id }) => {
            debug!("parse_output: record has no result field, using raw stdout");
            ParsedOutput {
                text: trimmed.to_string(),
                session_id: session_id.filter(|s| !s.is_empty()),
                structured: false,
            }
        }
        Err(e) => {
            debug!(error = %e, "parse_output: not a structured record, using raw stdout");
            ParsedOutput {
                text: trimmed.to_string(),
                session_id: None,
                structured: false,
            }
        }
    }
}
