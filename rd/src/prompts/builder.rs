//! Prompt builder
//!
//! Turns an inbound message plus remembered context into the prompt text
//! handed to the executor.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::embedded;
use crate::transport::InboundMessage;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompt {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid prompt template: {0}")]
    Template(#[from] Box<handlebars::TemplateError>),

    #[error("Failed to render prompt: {0}")]
    Render(#[from] Box<handlebars::RenderError>),
}

/// Values available to the template
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptInput {
    pub sender: String,
    pub text: String,
    pub attachment: Option<String>,
    pub context: Option<String>,
    /// Remembered lines, oldest first
    pub memory: Vec<String>,
}

impl PromptInput {
    pub fn from_message(message: &InboundMessage, memory: Vec<String>) -> Self {
        Self {
            sender: message.sender.clone(),
            text: message.text.clone(),
            attachment: message.attachment.as_ref().map(|p| p.display().to_string()),
            context: message.context.clone(),
            memory,
        }
    }
}

/// Renders the relay prompt
pub struct PromptBuilder {
    hbs: Handlebars<'static>,
    source: String,
}

impl PromptBuilder {
    /// Load the relay template, preferring `template_dir/relay.pmt` when present
    pub fn new(template_dir: Option<&Path>) -> Result<Self, PromptError> {
        debug!(?template_dir, "PromptBuilder::new: called");
        let name = embedded::RELAY_NAME;

        let (template, source) = match template_dir.map(|dir| dir.join(format!("{}.pmt", name))) {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path).map_err(|source| PromptError::Read {
                    path: path.clone(),
                    source,
                })?;
                (content, path.display().to_string())
            }
            _ => (embedded::RELAY.to_string(), "embedded".to_string()),
        };

        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        hbs.register_template_string(name, template).map_err(Box::new)?;
        info!(%source, "Loaded relay prompt");

        Ok(Self { hbs, source })
    }

    /// Builder backed only by the embedded template
    pub fn embedded() -> Result<Self, PromptError> {
        Self::new(None)
    }

    /// Where the template came from: a file path or `embedded`
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn build(&self, input: &PromptInput) -> Result<String, PromptError> {
        debug!(sender = %input.sender, memory = input.memory.len(), "PromptBuilder::build: called");
        let prompt = self.hbs.render(embedded::RELAY_NAME, input).map_err(Box::new)?;
        Ok(prompt)
    }
}
