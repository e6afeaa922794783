//! Splits a raw oracle completion into reasoning, answer and follow-ups.
//!
//! Matching is a single forward scan per tag: the first opening tag that
//! has a closing tag after it wins, and the inner text runs to the first
//! closing tag (non-greedy). When the oracle repeats a tag, only the first
//! occurrence is used. Nothing is parsed recursively.

use super::prompt::{ANSWER_TAG, FOLLOW_UPS_TAG, REASONING_TAG};
use super::types::ParsedCompletion;

/// Older prompts asked for `<reasoning>`; both names are accepted.
const REASONING_TAGS: &[&str] = &[REASONING_TAG, "reasoning"];

/// Total over all inputs: missing sections fall back to defaults.
pub fn extract(raw: &str) -> ParsedCompletion {
    let reasoning = first_section(raw, REASONING_TAGS)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let answer = match section(raw, ANSWER_TAG) {
        Some(inner) => inner.trim().to_string(),
        None => raw.trim().to_string(),
    };

    let follow_ups = section(raw, FOLLOW_UPS_TAG)
        .map(parse_follow_ups)
        .unwrap_or_default();

    ParsedCompletion {
        reasoning,
        answer,
        follow_ups,
    }
}

/// Whether the completion contained an explicit answer section.
pub fn has_answer_section(raw: &str) -> bool {
    section(raw, ANSWER_TAG).is_some()
}

/// Inner text of the first `<tag>...</tag>` pair, if any.
fn section<'a>(raw: &'a str, tag: &str) -> Option<&'a str> {
    section_at(raw, tag).map(|(_, inner)| inner)
}

fn section_at<'a>(raw: &'a str, tag: &str) -> Option<(usize, &'a str)> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);

    let start = raw.find(&open)?;
    let body_start = start + open.len();
    let len = raw[body_start..].find(&close)?;
    Some((start, &raw[body_start..body_start + len]))
}

/// Earliest section among several accepted names for the same field.
fn first_section<'a>(raw: &'a str, tags: &[&str]) -> Option<&'a str> {
    tags.iter()
        .filter_map(|tag| section_at(raw, tag))
        .min_by_key(|(start, _)| *start)
        .map(|(_, inner)| inner)
}

/// Keep lines of the form `N. text`, in order of appearance.
fn parse_follow_ups(block: &str) -> Vec<String> {
    block
        .lines()
        .filter_map(strip_ordinal)
        .map(|q| q.to_string())
        .collect()
}

fn strip_ordinal(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = line[digits..].strip_prefix('.')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let question = rest.trim();
    if question.is_empty() {
        None
    } else {
        Some(question)
    }
}
