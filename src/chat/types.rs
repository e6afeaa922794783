use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{ChatError, Result};

/// A citation offered to the oracle. Only used for display inside the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub title: String,
    pub author: Option<String>,
    pub year: Option<i32>,
    pub url: Option<String>,
}

/// A topic label, already resolved to the reply language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Label used when rendering history into the prompt.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ChatError::InvalidArgument(format!(
                "unknown role '{}' (expected user or assistant)",
                other
            ))),
        }
    }
}

/// One prior message of the conversation, oldest first when in a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Target size of the oracle's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyLength {
    Short,
    Detailed,
    Article,
}

impl ReplyLength {
    pub const ALL: [ReplyLength; 3] = [ReplyLength::Short, ReplyLength::Detailed, ReplyLength::Article];

    pub fn as_str(self) -> &'static str {
        match self {
            ReplyLength::Short => "short",
            ReplyLength::Detailed => "detailed",
            ReplyLength::Article => "article",
        }
    }

    /// Word-count band echoed into the prompt.
    pub fn word_band(self) -> &'static str {
        match self {
            ReplyLength::Short => "200-400",
            ReplyLength::Detailed => "700-1200",
            ReplyLength::Article => "3000-5000",
        }
    }

    /// The same band written with Arabic-Indic digits.
    pub fn localized_word_band(self) -> String {
        self.word_band()
            .chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => char::from_u32(0x0660 + d).unwrap_or(c),
                None => c,
            })
            .collect()
    }
}

impl fmt::Display for ReplyLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplyLength {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "short" => Ok(ReplyLength::Short),
            "detailed" => Ok(ReplyLength::Detailed),
            "article" => Ok(ReplyLength::Article),
            other => Err(ChatError::InvalidArgument(format!(
                "unknown reply length '{}' (expected short, detailed or article)",
                other
            ))),
        }
    }
}

/// Reply language. Arabic is the product default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "ar")]
    Arabic,
    #[serde(rename = "en")]
    English,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Arabic => "ar",
            Language::English => "en",
        }
    }

    /// How the reply language is described to the oracle.
    pub fn reply_style(self) -> &'static str {
        match self {
            Language::Arabic => "classical modern Arabic",
            Language::English => "formal literary English",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "ar" => Ok(Language::Arabic),
            "en" => Ok(Language::English),
            other => Err(ChatError::InvalidArgument(format!(
                "unknown language '{}' (expected ar or en)",
                other
            ))),
        }
    }
}

/// The three fields recovered from a raw completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCompletion {
    pub reasoning: String,
    pub answer: String,
    pub follow_ups: Vec<String>,
}

/// Rough token estimate: characters of prompt plus completion, divided by four.
///
/// This is not a tokenizer count and must not be compared with usage
/// figures reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApproxTokenCount(pub u32);

impl ApproxTokenCount {
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let chars = prompt.chars().count() + completion.chars().count();
        let tokens = chars.div_ceil(4);
        Self(u32::try_from(tokens).unwrap_or(u32::MAX))
    }
}

impl fmt::Display for ApproxTokenCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "~{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_length_rejects_unknown() {
        let err = "unknown".parse::<ReplyLength>().unwrap_err();
        assert!(matches!(err, ChatError::InvalidArgument(_)));
        assert!("Short".parse::<ReplyLength>().is_err());
        assert_eq!("article".parse::<ReplyLength>().unwrap(), ReplyLength::Article);
    }

    #[test]
    fn test_localized_band() {
        assert_eq!(ReplyLength::Short.localized_word_band(), "٢٠٠-٤٠٠");
        assert_eq!(ReplyLength::Article.localized_word_band(), "٣٠٠٠-٥٠٠٠");
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::English);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(ApproxTokenCount::estimate("", "").0, 0);
        assert_eq!(ApproxTokenCount::estimate("abcd", "e").0, 2);
        // counts characters, not bytes
        assert_eq!(ApproxTokenCount::estimate("جوته", "").0, 1);
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
    }
}
