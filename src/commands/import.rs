use tracing::info;

use super::config::is_admin;
use crate::library::import as library_import;
use crate::state::Context;

/// Import a bibliography markdown table from a URL (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn import(
    ctx: Context<'_>,
    #[description = "URL of the bibliography markdown file"] url: String,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }
    ctx.defer().await?;

    info!(user = %ctx.author().name, url, "Bibliography import started");

    let count = library_import::import_bibliography_url(&ctx.data().library, &url).await?;
    if count == 0 {
        ctx.say("No references found. The file needs a `| Category | Author(s) | Title | ... |` table.")
            .await?;
    } else {
        ctx.say(format!("Imported **{}** references from <{}>", count, url))
            .await?;
    }
    Ok(())
}

/// Store the default bilingual topics (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn seed_topics(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    let count = library_import::seed_topics(&ctx.data().library).await?;
    ctx.say(format!("Seeded **{}** topics.", count)).await?;
    Ok(())
}
