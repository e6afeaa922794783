use serde::{Deserialize, Serialize};

use crate::chat::types::{Language, Reference, ReplyLength, Role, Topic};

/// Content-addressed record ID (blake3 hex hash, truncated).
pub type RecordId = String;

/// A bibliography entry that can be offered to the oracle as a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub id: RecordId,
    pub category: String,
    pub author: Option<String>,
    pub title: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub subject_focus: Option<String>,
    pub created_at: i64,
}

impl ReferenceRecord {
    pub fn to_reference(&self) -> Reference {
        Reference {
            title: self.title.clone(),
            author: self.author.clone(),
            year: self.year,
            url: self.url.clone(),
        }
    }
}

/// A bilingual topic label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub id: RecordId,
    pub name_ar: String,
    pub name_en: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description_ar: Option<String>,
    #[serde(default)]
    pub description_en: Option<String>,
    pub created_at: i64,
}

impl TopicRecord {
    pub fn display_name(&self, language: Language) -> &str {
        match language {
            Language::Arabic => &self.name_ar,
            Language::English => &self.name_en,
        }
    }

    pub fn to_topic(&self, language: Language) -> Topic {
        Topic {
            name: self.display_name(language).to_string(),
        }
    }
}

/// One conversation owned by a Discord user in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: RecordId,
    pub user_id: u64,
    pub channel_id: u64,
    pub title_ar: Option<String>,
    pub title_en: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    pub message_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChatRecord {
    pub fn title(&self, language: Language) -> &str {
        let (preferred, other) = match language {
            Language::Arabic => (&self.title_ar, &self.title_en),
            Language::English => (&self.title_en, &self.title_ar),
        };
        preferred
            .as_deref()
            .or(other.as_deref())
            .unwrap_or("Untitled")
    }
}

/// A persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub chat_id: RecordId,
    pub seq: u32,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub thinking_block: Option<String>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    #[serde(default)]
    pub reply_length: Option<ReplyLength>,
    /// Approximate; see `ApproxTokenCount`.
    #[serde(default)]
    pub token_count: Option<u32>,
    #[serde(default)]
    pub reference_ids: Vec<RecordId>,
    #[serde(default)]
    pub topic_ids: Vec<RecordId>,
    pub created_at: i64,
}

/// The options a user has toggled for their next questions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub reference_ids: Vec<RecordId>,
    #[serde(default)]
    pub topic_ids: Vec<RecordId>,
    #[serde(default)]
    pub reply_length: Option<ReplyLength>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.reference_ids.is_empty() && self.topic_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub language: Language,
}
