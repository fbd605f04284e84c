//! Embedded prompts
//!
//! Compiled into the binary from .pmt files at build time.

/// Template name used for relay prompts
pub const RELAY_NAME: &str = "relay";

/// Default relay prompt
pub const RELAY: &str = include_str!("../../prompts/relay.pmt");
