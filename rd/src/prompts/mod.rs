//! Prompt templates
//!
//! Renders `.pmt` (prompt template) files with Handlebars. Template loading
//! chain:
//! 1. `{template-dir}/relay.pmt` (user override, from config)
//! 2. Embedded fallback in code

pub mod embedded;
mod builder;

pub use builder::{PromptBuilder, PromptError, PromptInput};
