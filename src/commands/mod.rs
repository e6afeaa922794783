mod ask;
mod config;
mod import;
mod library;
mod manage;
mod options;

use crate::chat::types::Language;
use crate::state::Context;

/// Discord messages are capped at 2000 characters.
const CHUNK_LIMIT: usize = 1990;

/// Goethe - ask about the Italian Journey
#[poise::command(
    slash_command,
    subcommands(
        "ask::ask",
        "ask::followup",
        "manage::new",
        "manage::history",
        "manage::chats",
        "manage::resume",
        "manage::archive",
        "manage::language",
        "manage::export",
        "library::references",
        "library::topics",
        "options::select_reference",
        "options::select_topic",
        "options::length",
        "options::options",
        "options::clear_options",
        "import::import",
        "import::seed_topics",
        "config::config"
    )
)]
pub async fn goethe(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Pick the Arabic or English variant of a UI string.
fn tr(language: Language, ar: &'static str, en: &'static str) -> &'static str {
    match language {
        Language::Arabic => ar,
        Language::English => en,
    }
}

async fn user_language(ctx: &Context<'_>) -> Language {
    ctx.data()
        .library
        .preferences(ctx.author().id.get())
        .await
        .map(|p| p.language)
        .unwrap_or_default()
}

/// Split text into Discord-sized chunks, preferring newline then space boundaries.
/// Never splits inside a UTF-8 character.
fn split_chunks(text: &str, limit: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= limit {
            chunks.push(remaining);
            break;
        }
        let mut end = limit;
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = remaining.chars().next().map_or(remaining.len(), char::len_utf8);
        }
        let window = &remaining[..end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .filter(|&i| i > 0)
            .unwrap_or(end);
        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    chunks
}

/// Send a message in Discord-safe chunks.
/// Uses ctx.say() for all chunks: poise routes follow-ups through the
/// interaction webhook, which doesn't require Send Messages channel permission.
async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in split_chunks(text, CHUNK_LIMIT) {
        ctx.say(chunk).await?;
    }
    Ok(())
}
