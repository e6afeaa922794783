//! Prompt compilation for the completion oracle.
//!
//! The template is a contract with the oracle: the tag names it asks for
//! are the ones [`super::extract`] looks for, and identical inputs must
//! always produce byte-identical output.

use super::error::{ChatError, Result};
use super::types::{ConversationTurn, Language, Reference, ReplyLength, Topic};

/// Bumped whenever the template wording changes.
pub const TEMPLATE_VERSION: &str = "italian-journey/v1";

pub const NO_REFERENCES: &str = "No specific references selected";
pub const NO_TOPICS: &str = "No specific topics selected";
pub const NO_HISTORY: &str = "No previous conversation";

/// Tag names the oracle is asked to emit.
pub const REASONING_TAG: &str = "thinking_block";
pub const ANSWER_TAG: &str = "answer";
pub const FOLLOW_UPS_TAG: &str = "follow_up_questions";

/// Compile a prompt that asks for a reply in Arabic.
pub fn compile(
    question: &str,
    references: &[Reference],
    topics: &[Topic],
    history: &[ConversationTurn],
    length: ReplyLength,
) -> Result<String> {
    compile_in(Language::Arabic, question, references, topics, history, length)
}

/// Compile a prompt for the given reply language.
pub fn compile_in(
    language: Language,
    question: &str,
    references: &[Reference],
    topics: &[Topic],
    history: &[ConversationTurn],
    length: ReplyLength,
) -> Result<String> {
    if question.trim().is_empty() {
        return Err(ChatError::InvalidArgument(
            "question must not be empty".to_string(),
        ));
    }

    Ok(render(
        language,
        question,
        &render_references(references),
        &render_topics(topics),
        &render_history(history),
        length,
    ))
}

fn render_references(references: &[Reference]) -> String {
    if references.is_empty() {
        return NO_REFERENCES.to_string();
    }
    references
        .iter()
        .map(|r| {
            format!(
                "- {} by {} ({}) - {}",
                r.title,
                r.author.as_deref().unwrap_or("Unknown"),
                r.year.map(|y| y.to_string()).as_deref().unwrap_or("N/A"),
                r.url.as_deref().unwrap_or("No URL"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_topics(topics: &[Topic]) -> String {
    if topics.is_empty() {
        return NO_TOPICS.to_string();
    }
    topics
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return NO_HISTORY.to_string();
    }
    history
        .iter()
        .map(|turn| format!("{}: {}", turn.role.label(), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render(
    language: Language,
    question: &str,
    references: &str,
    topics: &str,
    history: &str,
    length: ReplyLength,
) -> String {
    let style = language.reply_style();
    format!(
        r#"You are an AI agent specialized in answering questions about Goethe and his Italian Journey. You write in {style}. Your task is to answer the question using only the provided references and context.

First, review the following information:
1. References (use only these, do not use external sources):
<references>
{references}
</references>

2. Chat history for context:
<chat_history>
{history}
</chat_history>

3. The question:
<question>
{question}
</question>

4. Related topics to consider:
<related_topics>
{topics}
</related_topics>

5. Desired length of the reply:
<reply_length>
{tier}: approximately {band} words ({band_local} كلمة)
</reply_length>

Instructions:
1. Analysis and Planning:
   Think step by step before answering. Wrap this phase in <{reasoning_tag}> tags and work in {style}:
   a) Quote and number the passages from the references that bear on the question.
   b) Assess how each quote relates to the question.
   c) List the key themes and concepts of Goethe's Italian Journey involved.
   d) List key terms in the reply language, with equivalents for important German terms.
   e) Consider the cultural context and its relevance to the reader.
   f) Summarize the chat history briefly so the reply stays consistent with it.
   g) Pick the most relevant references and the most pertinent related topics.
   h) Plan the structure of the reply within the requested length, with an estimated word count per section.
   i) Decide which sources to cite and where to embed their links.
   j) Use only information stated explicitly in the references. Do not infer or extrapolate beyond them.

2. Crafting the Response:
   After the analysis, write the reply inside <{answer_tag}> tags:
   a) Write in {style}, in the refined register of the best travel literature.
   b) Keep a professional, formal tone.
   c) Quote or cite the provided sources specifically, embedding links to them.
   d) If the references cannot fully answer the question, say so and give the best answer they support.
   e) Keep to the requested length.

3. Follow-up Questions:
   After the reply, write 3 follow-up questions inside <{follow_ups_tag}> tags, one per line, numbered "1. ", "2. ", "3. ". They must:
   a) Open new areas related to the topic.
   b) Not repeat anything already covered in the chat history.
   c) Lead the reader further into the subject.

Your output must be structured exactly as follows:
<{reasoning_tag}>
[Your analysis and planning]
</{reasoning_tag}>

<{answer_tag}>
[Your reply, including embedded source links]
</{answer_tag}>

<{follow_ups_tag}>
1. [First follow-up question]
2. [Second follow-up question]
3. [Third follow-up question]
</{follow_ups_tag}>

Adhere strictly to the information in the references and add nothing beyond what the sources state explicitly."#,
        style = style,
        references = references,
        history = history,
        question = question,
        topics = topics,
        tier = length.as_str(),
        band = length.word_band(),
        band_local = length.localized_word_band(),
        reasoning_tag = REASONING_TAG,
        answer_tag = ANSWER_TAG,
        follow_ups_tag = FOLLOW_UPS_TAG,
    )
}
