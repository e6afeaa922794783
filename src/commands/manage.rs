use poise::serenity_prelude as serenity;
use tracing::info;

use super::{send_chunked, tr, user_language};
use crate::chat::types::{Language, Role};
use crate::library::types::{ChatRecord, MessageRecord};
use crate::state::Context;

const HISTORY_PREVIEW_CHARS: usize = 300;

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(HISTORY_PREVIEW_CHARS).collect();
    if text.chars().count() > HISTORY_PREVIEW_CHARS {
        out.push('…');
    }
    out
}

/// Start a new conversation (the next question opens a fresh chat)
#[poise::command(slash_command, guild_only)]
pub async fn new(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    ctx.data()
        .library
        .clear_active_chat(ctx.author().id.get(), ctx.channel_id().get())
        .await?;
    ctx.say(tr(
        language,
        "بدأت محادثة جديدة. سؤالك التالي سيفتحها.",
        "New chat started. Your next question opens it.",
    ))
    .await?;
    Ok(())
}

/// Show the turns of the current conversation
#[poise::command(slash_command, guild_only)]
pub async fn history(
    ctx: Context<'_>,
    #[description = "Max turns to show (newest)"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let Some(chat) = library
        .active_chat(ctx.author().id.get(), ctx.channel_id().get())
        .await?
    else {
        ctx.say(tr(
            language,
            "لا توجد محادثة جارية. استخدم `/goethe ask` للبدء.",
            "No conversation yet. Use `/goethe ask` to start one.",
        ))
        .await?;
        return Ok(());
    };

    let messages = library.messages(&chat.id).await?;
    let limit = limit.unwrap_or(10) as usize;
    let skip = messages.len().saturating_sub(limit);

    let mut output = format!("**{}** — `{}`\n\n", chat.title(language), chat.id);
    for m in &messages[skip..] {
        let label = match (m.role, language) {
            (Role::User, Language::Arabic) => "المستخدم",
            (Role::Assistant, Language::Arabic) => "المساعد",
            (role, Language::English) => role.label(),
        };
        output.push_str(&format!("**{}:** {}\n\n", label, preview(&m.content)));
    }

    send_chunked(&ctx, &output).await
}

/// List your conversations
#[poise::command(slash_command, guild_only)]
pub async fn chats(
    ctx: Context<'_>,
    #[description = "Max chats to show"] limit: Option<u32>,
    #[description = "Include archived chats"] archived: Option<bool>,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let limit = limit.unwrap_or(20) as usize;
    let chats = ctx
        .data()
        .library
        .list_chats(ctx.author().id.get(), limit, archived.unwrap_or(false))
        .await?;

    if chats.is_empty() {
        ctx.say(tr(language, "لا توجد محادثات بعد.", "No chats yet."))
            .await?;
        return Ok(());
    }

    let mut output = format!("**{}**\n\n", tr(language, "محادثاتك", "Your chats"));
    for chat in &chats {
        let date = chrono::DateTime::<chrono::Utc>::from_timestamp(chat.updated_at, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        output.push_str(&format!(
            "- {}{} — {} ({} msgs) — `{}`\n",
            chat.title(language),
            if chat.is_archived { " [archived]" } else { "" },
            date,
            chat.message_count,
            chat.id
        ));
    }

    send_chunked(&ctx, &output).await
}

/// Continue an earlier conversation in this channel
#[poise::command(slash_command, guild_only)]
pub async fn resume(
    ctx: Context<'_>,
    #[description = "Chat ID (from /goethe chats)"] chat_id: String,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let user_id = ctx.author().id.get();
    let library = &ctx.data().library;

    let chat = library
        .get_chat(chat_id.trim())
        .await?
        .filter(|c| c.user_id == user_id && !c.is_archived);
    let Some(chat) = chat else {
        ctx.say(tr(
            language,
            "لم أجد هذه المحادثة.",
            "Chat not found (or archived).",
        ))
        .await?;
        return Ok(());
    };

    library
        .set_active_chat(user_id, ctx.channel_id().get(), &chat.id)
        .await?;
    info!(chat_id = %chat.id, user_id, "Chat resumed");
    ctx.say(format!(
        "{} **{}**",
        tr(language, "تابع المحادثة:", "Resumed:"),
        chat.title(language)
    ))
    .await?;
    Ok(())
}

/// Archive the current conversation
#[poise::command(slash_command, guild_only)]
pub async fn archive(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let Some(chat) = library
        .active_chat(ctx.author().id.get(), ctx.channel_id().get())
        .await?
    else {
        ctx.say(tr(language, "لا توجد محادثة جارية.", "No active chat."))
            .await?;
        return Ok(());
    };

    library.archive_chat(&chat.id).await?;
    ctx.say(format!(
        "{} **{}**",
        tr(language, "أُرشفت:", "Archived:"),
        chat.title(language)
    ))
    .await?;
    Ok(())
}

/// Markdown transcript of a chat, oldest turn first.
fn render_transcript(
    chat: &ChatRecord,
    messages: &[MessageRecord],
    language: Language,
    include_thinking: bool,
) -> String {
    let date = chrono::DateTime::<chrono::Utc>::from_timestamp(chat.created_at, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    let mut out = format!(
        "# Goethe's Italian Journey - Chat Export\n\n**Chat Title:** {}\n**Date:** {}\n\n",
        chat.title(language),
        date
    );

    for m in messages {
        out.push_str(&format!("## {}\n\n", m.role.label()));
        if include_thinking {
            if let Some(thinking) = m.thinking_block.as_deref().filter(|t| !t.is_empty()) {
                out.push_str("**Reasoning:**\n\n");
                for line in thinking.lines() {
                    out.push_str("> ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
            }
        }
        out.push_str(m.content.trim());
        out.push_str("\n\n");
        if !m.follow_up_questions.is_empty() {
            for (i, q) in m.follow_up_questions.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, q));
            }
            out.push('\n');
        }
    }
    out
}

/// Export a conversation as a markdown file
#[poise::command(slash_command, guild_only)]
pub async fn export(
    ctx: Context<'_>,
    #[description = "Chat ID (defaults to the current chat)"] chat_id: Option<String>,
    #[description = "Include the reasoning of each answer"] include_thinking: Option<bool>,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let user_id = ctx.author().id.get();
    let library = &ctx.data().library;

    let chat = match chat_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => library
            .get_chat(id)
            .await?
            .filter(|c| c.user_id == user_id),
        None => library.active_chat(user_id, ctx.channel_id().get()).await?,
    };
    let Some(chat) = chat else {
        ctx.say(tr(language, "لم أجد هذه المحادثة.", "Chat not found."))
            .await?;
        return Ok(());
    };

    let messages = library.messages(&chat.id).await?;
    let transcript = render_transcript(&chat, &messages, language, include_thinking.unwrap_or(false));
    info!(chat_id = %chat.id, messages = messages.len(), "Chat exported");

    let attachment =
        serenity::CreateAttachment::bytes(transcript.into_bytes(), format!("chat-{}.md", chat.id));
    ctx.send(
        poise::CreateReply::default()
            .content(format!("**{}**", chat.title(language)))
            .attachment(attachment),
    )
    .await?;
    Ok(())
}

/// Set your language: ar or en
#[poise::command(slash_command, guild_only)]
pub async fn language(
    ctx: Context<'_>,
    #[description = "ar | en"] code: String,
) -> Result<(), anyhow::Error> {
    let language = match code.parse::<Language>() {
        Ok(l) => l,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    ctx.data()
        .library
        .set_language(ctx.author().id.get(), language)
        .await?;
    ctx.say(tr(
        language,
        "ستصلك الإجابات بالعربية.",
        "Answers will be in English.",
    ))
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, content: &str, thinking: Option<&str>) -> MessageRecord {
        MessageRecord {
            chat_id: "c1".to_string(),
            seq: 0,
            role,
            content: content.to_string(),
            thinking_block: thinking.map(|t| t.to_string()),
            follow_up_questions: vec![],
            reply_length: None,
            token_count: None,
            reference_ids: vec![],
            topic_ids: vec![],
            created_at: 0,
        }
    }

    #[test]
    fn test_transcript_thinking_is_optional() {
        let chat = crate::library::new_chat(1, 2, "Why Rome?");
        let mut answer = message(Role::Assistant, "Because of antiquity.", Some("step one\nstep two"));
        answer.follow_up_questions = vec!["What about Naples?".to_string()];
        let messages = vec![message(Role::User, "Why Rome?", None), answer];

        let plain = render_transcript(&chat, &messages, Language::English, false);
        assert!(plain.contains("**Chat Title:** Why Rome?"));
        assert!(plain.contains("## User\n\nWhy Rome?"));
        assert!(plain.contains("## Assistant\n\nBecause of antiquity."));
        assert!(plain.contains("1. What about Naples?"));
        assert!(!plain.contains("step one"));

        let full = render_transcript(&chat, &messages, Language::English, true);
        assert!(full.contains("**Reasoning:**\n\n> step one\n> step two\n"));
        assert!(full.find("step two").unwrap() < full.find("Because of antiquity.").unwrap());
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("short"), "short");
        let long = "ب".repeat(HISTORY_PREVIEW_CHARS + 5);
        let p = preview(&long);
        assert_eq!(p.chars().count(), HISTORY_PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
    }
}
