use super::{send_chunked, tr, user_language};
use crate::library::types::ReferenceRecord;
use crate::state::Context;

fn reference_line(r: &ReferenceRecord, selected: bool) -> String {
    let year = r.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".to_string());
    let author = r.author.as_deref().unwrap_or("Unknown");
    let mark = if selected { "✓ " } else { "" };
    match &r.url {
        Some(url) => format!("- {}[{}]({}) — {} ({})\n", mark, r.title, url, author, year),
        None => format!("- {}{} — {} ({})\n", mark, r.title, author, year),
    }
}

/// List or search the bibliography
#[poise::command(slash_command, guild_only)]
pub async fn references(
    ctx: Context<'_>,
    #[description = "Filter by title or author"] search: Option<String>,
    #[description = "Max references to show"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let limit = limit.unwrap_or(20) as usize;
    let library = &ctx.data().library;

    let refs = match search.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(query) => library.search_references(query, limit).await?,
        None => library.list_references(limit).await?,
    };

    if refs.is_empty() {
        ctx.say(tr(
            language,
            "لا توجد مراجع. يمكن للمشرف استيرادها عبر `/goethe import`.",
            "No references found. An admin can add some with `/goethe import`.",
        ))
        .await?;
        return Ok(());
    }

    let selection = library.selection(ctx.author().id.get()).await?;

    // Group by category
    let mut by_category: std::collections::BTreeMap<&str, Vec<&ReferenceRecord>> =
        std::collections::BTreeMap::new();
    for r in &refs {
        by_category.entry(r.category.as_str()).or_default().push(r);
    }

    let mut output = format!("**{}**\n\n", tr(language, "المراجع", "References"));
    for (category, items) in &by_category {
        output.push_str(&format!("**{}**\n", category));
        for r in items {
            output.push_str(&reference_line(r, selection.reference_ids.contains(&r.id)));
        }
        output.push('\n');
    }

    send_chunked(&ctx, &output).await
}

/// List topics in your language
#[poise::command(slash_command, guild_only)]
pub async fn topics(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let library = &ctx.data().library;
    let topics = library.list_topics().await?;

    if topics.is_empty() {
        ctx.say(tr(
            language,
            "لا توجد موضوعات. يمكن للمشرف إضافتها عبر `/goethe seed_topics`.",
            "No topics yet. An admin can add them with `/goethe seed_topics`.",
        ))
        .await?;
        return Ok(());
    }

    let selection = library.selection(ctx.author().id.get()).await?;
    let mut output = format!("**{}**\n\n", tr(language, "الموضوعات", "Topics"));
    for t in &topics {
        let mark = if selection.topic_ids.contains(&t.id) { "✓ " } else { "" };
        output.push_str(&format!("- {}{}\n", mark, t.display_name(language)));
    }

    send_chunked(&ctx, &output).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_line_defaults() {
        let r = ReferenceRecord {
            id: "x".to_string(),
            category: "Secondary".to_string(),
            author: None,
            title: "Letters".to_string(),
            year: None,
            language: None,
            url: None,
            source_type: None,
            format: None,
            subject_focus: None,
            created_at: 0,
        };
        assert_eq!(reference_line(&r, false), "- Letters — Unknown (n.d.)\n");
        assert!(reference_line(&r, true).starts_with("- ✓ Letters"));
    }
}
