use tracing::info;

use super::{tr, user_language};
use crate::chat::types::{Language, ReplyLength};
use crate::library::types::{ReferenceRecord, TopicRecord};
use crate::state::Context;

/// Pick the reference the user meant: exact ID, exact title, or a unique partial match.
fn resolve_reference<'a>(input: &str, candidates: &'a [ReferenceRecord]) -> Option<&'a ReferenceRecord> {
    let needle = input.trim().to_lowercase();
    if let Some(r) = candidates.iter().find(|r| r.id == input.trim()) {
        return Some(r);
    }
    if let Some(r) = candidates.iter().find(|r| r.title.to_lowercase() == needle) {
        return Some(r);
    }
    let mut partial = candidates
        .iter()
        .filter(|r| r.title.to_lowercase().contains(&needle));
    match (partial.next(), partial.next()) {
        (Some(r), None) => Some(r),
        _ => None,
    }
}

/// Match a topic by its name in either language.
fn resolve_topic<'a>(input: &str, topics: &'a [TopicRecord]) -> Option<&'a TopicRecord> {
    let needle = input.trim().to_lowercase();
    topics.iter().find(|t| {
        t.id == input.trim() || t.name_ar.trim() == input.trim() || t.name_en.to_lowercase() == needle
    })
}

/// Toggle a reference for your next questions
#[poise::command(slash_command, guild_only)]
pub async fn select_reference(
    ctx: Context<'_>,
    #[description = "Reference title"]
    #[autocomplete = "autocomplete_reference"]
    reference: String,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let candidates = library.search_references(&reference, 25).await?;
    let resolved = match resolve_reference(&reference, &candidates) {
        Some(r) => Some(r.clone()),
        // IDs never match a title search
        None => library.get_reference(reference.trim()).await?,
    };

    let Some(r) = resolved else {
        ctx.say(tr(
            language,
            "لم أجد هذا المرجع، أو أن الاسم يطابق أكثر من مرجع.",
            "Reference not found, or the name matches more than one.",
        ))
        .await?;
        return Ok(());
    };

    let selected = library
        .toggle_reference(ctx.author().id.get(), &r.id)
        .await?;
    info!(reference_id = %r.id, selected, "Reference toggled");
    let verb = if selected {
        tr(language, "أضيف:", "Selected:")
    } else {
        tr(language, "أزيل:", "Removed:")
    };
    ctx.say(format!("{} **{}**", verb, r.title)).await?;
    Ok(())
}

/// Toggle a topic for your next questions
#[poise::command(slash_command, guild_only)]
pub async fn select_topic(
    ctx: Context<'_>,
    #[description = "Topic name"]
    #[autocomplete = "autocomplete_topic"]
    topic: String,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let topics = library.list_topics().await?;

    let Some(t) = resolve_topic(&topic, &topics) else {
        ctx.say(tr(language, "لم أجد هذا الموضوع.", "Topic not found."))
            .await?;
        return Ok(());
    };

    let selected = library.toggle_topic(ctx.author().id.get(), &t.id).await?;
    info!(topic_id = %t.id, selected, "Topic toggled");
    let verb = if selected {
        tr(language, "أضيف:", "Selected:")
    } else {
        tr(language, "أزيل:", "Removed:")
    };
    ctx.say(format!("{} **{}**", verb, t.display_name(language)))
        .await?;
    Ok(())
}

/// Set your preferred reply length: short, detailed or article
#[poise::command(slash_command, guild_only)]
pub async fn length(
    ctx: Context<'_>,
    #[description = "short | detailed | article"]
    #[autocomplete = "autocomplete_length"]
    reply_length: String,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let reply_length = match reply_length.parse::<ReplyLength>() {
        Ok(l) => l,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    ctx.data()
        .library
        .set_reply_length(ctx.author().id.get(), reply_length)
        .await?;
    ctx.say(format!(
        "{} **{}** ({} {})",
        tr(language, "طول الإجابة:", "Reply length:"),
        reply_length,
        reply_length.word_band(),
        tr(language, "كلمة", "words")
    ))
    .await?;
    Ok(())
}

/// Show your selected references, topics and reply length
#[poise::command(slash_command, guild_only)]
pub async fn options(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let selection = library.selection(ctx.author().id.get()).await?;
    let refs = library.references_by_id(&selection.reference_ids).await?;
    let topics = library.topics_by_id(&selection.topic_ids).await?;

    let default_length = ctx.data().chat_config.read().await.default_reply_length;
    let output = render_options(
        language,
        &refs,
        &topics,
        selection.reply_length.unwrap_or(default_length),
    );
    ctx.say(output).await?;
    Ok(())
}

fn render_options(
    language: Language,
    refs: &[ReferenceRecord],
    topics: &[TopicRecord],
    reply_length: ReplyLength,
) -> String {
    let none = tr(language, "لا شيء", "none");
    let ref_list = if refs.is_empty() {
        none.to_string()
    } else {
        refs.iter()
            .map(|r| r.title.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };
    let topic_list = if topics.is_empty() {
        none.to_string()
    } else {
        topics
            .iter()
            .map(|t| t.display_name(language))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "**{}**\n{} {}\n{} {}\n{} {} ({})",
        tr(language, "خيارات السؤال", "Question options"),
        tr(language, "المراجع:", "References:"),
        ref_list,
        tr(language, "الموضوعات:", "Topics:"),
        topic_list,
        tr(language, "الطول:", "Length:"),
        reply_length,
        reply_length.word_band()
    )
}

/// Clear selected references and topics
#[poise::command(slash_command, guild_only)]
pub async fn clear_options(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let user_id = ctx.author().id.get();
    if library.selection(user_id).await?.is_empty() {
        ctx.say(tr(
            language,
            "لا توجد مراجع أو موضوعات مختارة.",
            "Nothing selected.",
        ))
        .await?;
        return Ok(());
    }

    library.clear_selection(user_id).await?;
    ctx.say(tr(
        language,
        "مُسحت المراجع والموضوعات المختارة.",
        "Selected references and topics cleared.",
    ))
    .await?;
    Ok(())
}

async fn autocomplete_reference(ctx: Context<'_>, partial: &str) -> Vec<String> {
    ctx.data()
        .library
        .search_references(partial, 25)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.title.chars().take(100).collect())
        .collect()
}

async fn autocomplete_topic(ctx: Context<'_>, partial: &str) -> Vec<String> {
    let language = user_language(&ctx).await;
    let topics = ctx.data().library.list_topics().await.unwrap_or_default();

    topics
        .iter()
        .map(|t| t.display_name(language).to_string())
        .filter(|name| name.to_lowercase().contains(&partial.to_lowercase()))
        .take(25)
        .collect()
}

async fn autocomplete_length(_ctx: Context<'_>, partial: &str) -> Vec<String> {
    ReplyLength::ALL
        .iter()
        .map(|l| l.as_str().to_string())
        .filter(|l| l.starts_with(&partial.to_lowercase()))
        .collect()
}
