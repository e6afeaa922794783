use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::chat::types::ReplyLength;
use crate::chat::ChatEngine;
use crate::library::Library;
use crate::llm::{CompletionParams, LlmClient};

/// Oracle parameters and defaults (admins can modify at runtime).
pub struct ChatConfig {
    pub max_tokens: u32,
    /// Sampling temperature in hundredths (10 = 0.1).
    pub temperature_hundredths: u32,
    pub default_reply_length: ReplyLength,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tokens: 64000,
            temperature_hundredths: 10,
            default_reply_length: ReplyLength::Detailed,
        }
    }
}

impl ChatConfig {
    pub fn params(&self) -> CompletionParams {
        CompletionParams {
            max_tokens: self.max_tokens,
            temperature: f64::from(self.temperature_hundredths) / 100.0,
        }
    }
}

pub struct AppState {
    pub library: Arc<Library>,
    pub llm: Arc<LlmClient>,
    pub chat: Arc<ChatEngine>,
    pub admin_ids: HashSet<u64>,
    pub chat_config: Arc<RwLock<ChatConfig>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
