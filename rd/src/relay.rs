//! Relay pipeline
//!
//! Glues a transport to the recovery controller: build the prompt, keep the
//! typing indicator alive while the process runs, strip memory tags and
//! deliver the response in chunks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::chunker;
use crate::config::RelayConfig;
use crate::executor::FILE_MARKER;
use crate::memory::{self, MemoryLog};
use crate::prompts::{PromptBuilder, PromptInput};
use crate::recovery::RecoveryController;
use crate::transport::{Conversation, InboundMessage, MessageHandler, TransportError};

/// Reply sent when the response was empty after tag removal
pub const EMPTY_RESPONSE: &str = "Done. (nothing to add)";

/// Answers inbound messages through the recovery controller
pub struct Relay {
    controller: Arc<RecoveryController>,
    prompts: PromptBuilder,
    config: RelayConfig,
    memory: Mutex<MemoryLog>,
}

impl Relay {
    pub fn new(controller: Arc<RecoveryController>, prompts: PromptBuilder, config: RelayConfig) -> Self {
        debug!(?config, "Relay::new: called");
        let memory = Mutex::new(MemoryLog::new(config.memory_capacity));
        Self {
            controller,
            prompts,
            config,
            memory,
        }
    }

    /// Remembered lines, oldest first
    pub async fn memory_lines(&self) -> Vec<String> {
        self.memory.lock().await.lines()
    }

    async fn build_prompt(&self, message: &InboundMessage) -> String {
        let input = PromptInput::from_message(message, self.memory_lines().await);
        match self.prompts.build(&input) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, source = %self.prompts.source(), "Prompt template failed, sending raw text");
                match &message.attachment {
                    Some(path) => format!("{}\n\n{} {}]", message.text, FILE_MARKER, path.display()),
                    None => message.text.clone(),
                }
            }
        }
    }

    /// Run the prompt, re-sending typing until the response is ready
    async fn respond_with_typing(&self, prompt: &str, conversation: &mut dyn Conversation) -> String {
        let respond = self.controller.respond(prompt);
        tokio::pin!(respond);

        let mut ticker = tokio::time::interval(self.config.typing_interval());
        ticker.tick().await;

        loop {
            tokio::select! {
                text = &mut respond => return text,
                _ = ticker.tick() => {
                    if let Err(e) = conversation.typing().await {
                        debug!(error = %e, "Relay: typing refresh failed");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Relay {
    async fn handle(&self, message: InboundMessage, conversation: &mut dyn Conversation) -> Result<(), TransportError> {
        info!(id = %message.id, sender = %message.sender, chars = message.text.chars().count(), "Message received");
        conversation.typing().await?;

        let prompt = self.build_prompt(&message).await;
        let response = self.respond_with_typing(&prompt, conversation).await;

        let processed = memory::process(&response);
        if !processed.intents.is_empty() {
            let mut log = self.memory.lock().await;
            for intent in processed.intents {
                info!(%intent, "Memory intent recorded");
                log.record(intent);
            }
            debug!(remembered = log.len(), "Relay: memory updated");
        }

        let text = if processed.text.trim().is_empty() {
            EMPTY_RESPONSE.to_string()
        } else {
            processed.text
        };

        let chunks = chunker::split(&text, self.config.chunk_limit);
        debug!(id = %message.id, chunks = chunks.len(), "Relay: sending reply");
        for chunk in chunks {
            conversation.reply(&chunk).await?;
        }
        Ok(())
    }
}
