use tracing::{error, info};

use super::{send_chunked, tr, user_language};
use crate::chat::error::ChatError;
use crate::chat::types::ReplyLength;
use crate::chat::{AskOutcome, AskRequest};
use crate::state::Context;

const DEBUG_REASONING_CHARS: usize = 1500;

/// Ask a question about Goethe's Italian Journey
#[poise::command(slash_command, guild_only)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question"] question: String,
    #[description = "short | detailed | article"]
    #[autocomplete = "autocomplete_reply_length"]
    reply_length: Option<String>,
    #[description = "Show the reasoning trace (admin only)"] debug: Option<bool>,
) -> Result<(), anyhow::Error> {
    let reply_length = match reply_length
        .as_deref()
        .map(str::parse::<ReplyLength>)
        .transpose()
    {
        Ok(length) => length,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    run_question(ctx, question, reply_length, debug.unwrap_or(false)).await
}

/// Ask one of the follow-up questions suggested by the last answer
#[poise::command(slash_command, guild_only)]
pub async fn followup(
    ctx: Context<'_>,
    #[description = "Follow-up number (1-3)"] number: u32,
    #[description = "Show the reasoning trace (admin only)"] debug: Option<bool>,
) -> Result<(), anyhow::Error> {
    let question = ctx
        .data()
        .chat
        .follow_up(ctx.author().id.get(), ctx.channel_id().get(), number as usize)
        .await?;

    match question {
        Some(question) => run_question(ctx, question, None, debug.unwrap_or(false)).await,
        None => {
            let language = user_language(&ctx).await;
            ctx.say(format!(
                "{} #{}",
                tr(
                    language,
                    "لا يوجد سؤال متابعة بهذا الرقم في آخر إجابة",
                    "No follow-up question with that number in the last answer"
                ),
                number
            ))
            .await?;
            Ok(())
        }
    }
}

async fn run_question(
    ctx: Context<'_>,
    question: String,
    reply_length: Option<ReplyLength>,
    debug: bool,
) -> Result<(), anyhow::Error> {
    let language = user_language(&ctx).await;
    let user_mention = format!("<@{}>", ctx.author().id);

    // Acknowledge immediately; the oracle can take a while for long tiers
    ctx.say(format!(
        "{} {}",
        tr(
            language,
            "جارٍ إعداد الإجابة، سأنبهك عند اكتمالها",
            "Working on it. I'll ping you when the answer is ready,"
        ),
        user_mention
    ))
    .await?;

    let show_debug = debug && ctx.data().is_admin(ctx.author().id.get());

    let config = ctx.data().chat_config.read().await;
    let params = config.params();
    let default_length = config.default_reply_length;
    drop(config);

    info!(
        user = %ctx.author().name,
        question = %question,
        show_debug,
        "Question received"
    );

    let request = AskRequest {
        user_id: ctx.author().id.get(),
        channel_id: ctx.channel_id().get(),
        question: question.clone(),
        reply_length,
    };

    let outcome = match ctx.data().chat.ask(request, &params, default_length).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(ChatError::InvalidArgument(msg)) = e.downcast_ref::<ChatError>() {
                ctx.say(msg.clone()).await?;
                return Ok(());
            }
            error!(error = %e, "Question failed");
            ctx.say(format!(
                "{} {}",
                user_mention,
                tr(
                    language,
                    "تعذر الحصول على إجابة. حاول مرة أخرى.",
                    "Sorry, I couldn't get an answer. Please try again."
                )
            ))
            .await?;
            return Ok(());
        }
    };

    let full = render_outcome(&user_mention, &question, &outcome, show_debug);
    send_chunked(&ctx, &full).await
}

fn render_outcome(mention: &str, question: &str, outcome: &AskOutcome, show_debug: bool) -> String {
    let language = outcome.language;
    let mut full = format!(
        "{}\n\n**{}** {}\n**{}** {} | **{}** {}\n\n{}",
        mention,
        tr(language, "السؤال:", "Q:"),
        question.trim(),
        tr(language, "الطول:", "Length:"),
        outcome.reply_length,
        tr(language, "الرموز (تقريبي):", "Tokens (approx.):"),
        outcome.token_count,
        outcome.parsed.answer
    );

    if !outcome.references.is_empty() {
        full.push_str(&format!("\n\n**{}**\n", tr(language, "المراجع:", "Sources:")));
        for r in &outcome.references {
            match &r.url {
                Some(url) => full.push_str(&format!("- [{}]({})\n", r.title, url)),
                None => full.push_str(&format!("- {}\n", r.title)),
            }
        }
    }

    if !outcome.topics.is_empty() {
        let names: Vec<&str> = outcome
            .topics
            .iter()
            .map(|t| t.display_name(language))
            .collect();
        full.push_str(&format!(
            "\n**{}** {}",
            tr(language, "الموضوعات:", "Topics:"),
            names.join(", ")
        ));
    }

    if !outcome.parsed.follow_ups.is_empty() {
        full.push_str(&format!(
            "\n\n**{}**\n",
            tr(language, "أسئلة للمتابعة:", "Follow-up questions:")
        ));
        for (i, q) in outcome.parsed.follow_ups.iter().enumerate() {
            full.push_str(&format!("{}. {}\n", i + 1, q));
        }
        full.push_str(tr(
            language,
            "_استخدم `/goethe followup` مع رقم السؤال._",
            "_Use `/goethe followup` with the question number._",
        ));
    }

    // Admin-only reasoning trace
    if show_debug && !outcome.parsed.reasoning.is_empty() {
        let reasoning: String = outcome
            .parsed
            .reasoning
            .chars()
            .take(DEBUG_REASONING_CHARS)
            .collect();
        full.push_str(&format!(
            "\n\n---\n**[Debug] Reasoning** (chat `{}`)\n```\n{}\n```",
            outcome.chat.id,
            fence_safe(&reasoning)
        ));
    }

    full
}

/// Break up backtick runs so the text cannot close a code fence early.
fn fence_safe(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_tick = false;
    for c in text.chars() {
        if c == '`' && prev_tick {
            out.push('\u{200b}');
        }
        prev_tick = c == '`';
        out.push(c);
    }
    out
}

async fn autocomplete_reply_length(_ctx: Context<'_>, partial: &str) -> Vec<String> {
    ReplyLength::ALL
        .iter()
        .map(|l| l.as_str().to_string())
        .filter(|l| l.starts_with(&partial.to_lowercase()))
        .collect()
}
