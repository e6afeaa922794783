use crate::chat::types::ReplyLength;
use crate::state::{ChatConfig, Context};

pub fn is_admin(ctx: &Context<'_>) -> bool {
    ctx.data().is_admin(ctx.author().id.get())
}

/// Apply one `param = value` change. Returns the confirmation text.
fn apply(config: &mut ChatConfig, key: &str, value: &str) -> Result<String, String> {
    match key {
        "max_tokens" => {
            let val = value
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| "`max_tokens` must be a positive integer".to_string())?;
            config.max_tokens = val;
            Ok(format!("`max_tokens` set to {}", val))
        }
        "temperature" => {
            let val = value
                .parse::<u32>()
                .ok()
                .filter(|v| *v <= 100)
                .ok_or_else(|| "`temperature` is in hundredths, 0-100".to_string())?;
            config.temperature_hundredths = val;
            Ok(format!("`temperature` set to {:.2}", f64::from(val) / 100.0))
        }
        "default_reply_length" => {
            let val = value.parse::<ReplyLength>().map_err(|e| e.to_string())?;
            config.default_reply_length = val;
            Ok(format!("`default_reply_length` set to {}", val))
        }
        _ => Err(format!(
            "Unknown param `{}`. Valid: `max_tokens`, `temperature`, `default_reply_length`",
            key
        )),
    }
}

/// Configure oracle parameters (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "max_tokens | temperature | default_reply_length"] param: Option<String>,
    #[description = "New value (temperature in hundredths)"] value: Option<String>,
) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }

    match (param.as_deref(), value) {
        // Show current config
        (None, _) => {
            let config = ctx.data().chat_config.read().await;
            let text = format!(
                "**Chat Configuration:**\n\
                 `model`: {}\n\
                 `max_tokens`: {}\n\
                 `temperature`: {:.2}\n\
                 `default_reply_length`: {}",
                ctx.data().llm.model(),
                config.max_tokens,
                config.params().temperature,
                config.default_reply_length
            );
            drop(config);
            ctx.say(text).await?;
        }
        // Set a parameter
        (Some(key), Some(val)) => {
            let mut config = ctx.data().chat_config.write().await;
            let reply = match apply(&mut config, key, val.trim()) {
                Ok(msg) | Err(msg) => msg,
            };
            drop(config);
            ctx.say(reply).await?;
        }
        (Some(_), None) => {
            ctx.say("Provide both `param` and `value`. Example: `/goethe config temperature 20`")
                .await?;
        }
    }

    Ok(())
}
