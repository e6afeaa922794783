pub mod import;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use cnidarium::{StateDelta, StateRead, StateWrite, Storage};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chat::types::{Language, ReplyLength};
use types::{
    ChatRecord, MessageRecord, RecordId, ReferenceRecord, Selection, TopicRecord, UserPreferences,
};

// Key prefixes, no trailing slashes
const REF_PREFIX: &str = "ref/meta";
const TOPIC_PREFIX: &str = "topic/meta";
const CHAT_PREFIX: &str = "chat/meta";
const OWNER_PREFIX: &str = "chat/owner";
const ACTIVE_PREFIX: &str = "chat/active";
const MSG_PREFIX: &str = "chat/msg";
const SELECT_PREFIX: &str = "select";
const PREF_PREFIX: &str = "pref";

const TITLE_CHARS: usize = 50;

fn ref_key(id: &str) -> String {
    format!("{}/{}", REF_PREFIX, id)
}
fn topic_key(id: &str) -> String {
    format!("{}/{}", TOPIC_PREFIX, id)
}
fn chat_key(id: &str) -> String {
    format!("{}/{}", CHAT_PREFIX, id)
}
fn owner_key(user_id: u64, chat_id: &str) -> String {
    format!("{}/{}:{}", OWNER_PREFIX, user_id, chat_id)
}
fn active_key(user_id: u64, channel_id: u64) -> String {
    format!("{}/{}:{}", ACTIVE_PREFIX, channel_id, user_id)
}
fn msg_key(chat_id: &str, seq: u32) -> String {
    format!("{}/{}/{:06}", MSG_PREFIX, chat_id, seq)
}
fn select_key(user_id: u64) -> String {
    format!("{}/{}", SELECT_PREFIX, user_id)
}
fn pref_key(user_id: u64) -> String {
    format!("{}/{}", PREF_PREFIX, user_id)
}

fn short_hash(input: &str) -> RecordId {
    blake3::hash(input.as_bytes()).to_hex()[..16].to_string()
}

/// Stable ID for a reference, so re-importing a bibliography is idempotent.
pub fn reference_id(title: &str, author: Option<&str>, year: Option<i32>) -> RecordId {
    short_hash(&format!(
        "{}\u{0}{}\u{0}{}",
        title.trim(),
        author.unwrap_or("").trim(),
        year.map(|y| y.to_string()).unwrap_or_default()
    ))
}

pub fn topic_id(name_en: &str) -> RecordId {
    short_hash(&format!("topic\u{0}{}", name_en.trim()))
}

/// Build an unsaved chat whose title is the start of its first question.
pub fn new_chat(user_id: u64, channel_id: u64, first_question: &str) -> ChatRecord {
    let now = chrono::Utc::now();
    let id = short_hash(&format!(
        "{}:{}:{}",
        user_id,
        channel_id,
        now.timestamp_nanos_opt().unwrap_or_default()
    ));
    let title: String = first_question.trim().chars().take(TITLE_CHARS).collect();
    ChatRecord {
        id,
        user_id,
        channel_id,
        title_ar: Some(title.clone()),
        title_en: Some(title),
        is_archived: false,
        message_count: 0,
        created_at: now.timestamp(),
        updated_at: now.timestamp(),
    }
}

fn toggle(ids: &mut Vec<RecordId>, id: &str) -> bool {
    if let Some(pos) = ids.iter().position(|x| x == id) {
        ids.remove(pos);
        false
    } else {
        ids.push(id.to_string());
        true
    }
}

/// Everything the chat needs to remember: bibliography, topics, conversations,
/// per-user option selections and preferences.
pub struct Library {
    storage: Storage,
    /// Serializes read-modify-write updates; cnidarium commits are last-writer-wins.
    writes: tokio::sync::Mutex<()>,
}

impl Library {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let prefixes = vec![
            REF_PREFIX.to_string(),
            TOPIC_PREFIX.to_string(),
            CHAT_PREFIX.to_string(),
            OWNER_PREFIX.to_string(),
            ACTIVE_PREFIX.to_string(),
            MSG_PREFIX.to_string(),
            SELECT_PREFIX.to_string(),
            PREF_PREFIX.to_string(),
        ];
        let storage = Storage::load(data_dir.to_path_buf(), prefixes)
            .await
            .context("Failed to init cnidarium storage")?;
        Ok(Self {
            storage,
            writes: tokio::sync::Mutex::new(()),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let snapshot = self.storage.latest_snapshot();
        match snapshot.get_raw(key).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).with_context(|| format!("decode {}", key))?,
            )),
            None => Ok(None),
        }
    }

    async fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let snapshot = self.storage.latest_snapshot();
        let mut stream = snapshot.prefix_raw(prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, value)) => match serde_json::from_slice::<T>(&value) {
                    Ok(record) => results.push(record),
                    Err(e) => warn!(key = %key, "Skipping undecodable record: {}", e),
                },
                Err(e) => {
                    warn!(prefix, "Error reading stream: {}", e);
                }
            }
        }

        Ok(results)
    }

    async fn put_json<T: Serialize>(&self, key: String, value: &T) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.put_raw(key, serde_json::to_vec(value).context("serialize record")?);
        self.storage.commit(delta).await?;
        Ok(())
    }

    // ── References ──────────────────────────────────────────────

    /// Store a batch of references in one commit. Existing IDs are overwritten.
    pub async fn put_references(&self, batch: &[ReferenceRecord]) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        for record in batch {
            delta.put_raw(
                ref_key(&record.id),
                serde_json::to_vec(record).context("serialize ReferenceRecord")?,
            );
        }
        self.storage.commit(delta).await?;
        debug!(count = batch.len(), "references stored");
        Ok(())
    }

    pub async fn get_reference(&self, id: &str) -> Result<Option<ReferenceRecord>> {
        self.get_json(&ref_key(id)).await
    }

    /// All references sorted by title.
    pub async fn list_references(&self, limit: usize) -> Result<Vec<ReferenceRecord>> {
        let mut results: Vec<ReferenceRecord> = self.scan_json(REF_PREFIX).await?;
        results.sort_by(|a, b| a.title.cmp(&b.title));
        results.truncate(limit);
        Ok(results)
    }

    /// Case-insensitive substring match over title and author.
    pub async fn search_references(&self, query: &str, limit: usize) -> Result<Vec<ReferenceRecord>> {
        let needle = query.trim().to_lowercase();
        let mut results: Vec<ReferenceRecord> = self
            .scan_json::<ReferenceRecord>(REF_PREFIX)
            .await?
            .into_iter()
            .filter(|r| {
                r.title.to_lowercase().contains(&needle)
                    || r
                        .author
                        .as_deref()
                        .is_some_and(|a| a.to_lowercase().contains(&needle))
            })
            .collect();
        results.sort_by(|a, b| a.title.cmp(&b.title));
        results.truncate(limit);
        Ok(results)
    }

    /// Resolve IDs to references, preserving the given order and skipping unknown IDs.
    pub async fn references_by_id(&self, ids: &[RecordId]) -> Result<Vec<ReferenceRecord>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_reference(id).await? {
                Some(record) => results.push(record),
                None => warn!(reference_id = %id, "Selected reference no longer exists"),
            }
        }
        Ok(results)
    }

    // ── Topics ──────────────────────────────────────────────────

    pub async fn put_topics(&self, batch: &[TopicRecord]) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        for record in batch {
            delta.put_raw(
                topic_key(&record.id),
                serde_json::to_vec(record).context("serialize TopicRecord")?,
            );
        }
        self.storage.commit(delta).await?;
        debug!(count = batch.len(), "topics stored");
        Ok(())
    }

    pub async fn get_topic(&self, id: &str) -> Result<Option<TopicRecord>> {
        self.get_json(&topic_key(id)).await
    }

    /// All topics sorted by English name.
    pub async fn list_topics(&self) -> Result<Vec<TopicRecord>> {
        let mut results: Vec<TopicRecord> = self.scan_json(TOPIC_PREFIX).await?;
        results.sort_by(|a, b| a.name_en.cmp(&b.name_en));
        Ok(results)
    }

    pub async fn topics_by_id(&self, ids: &[RecordId]) -> Result<Vec<TopicRecord>> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_topic(id).await? {
                Some(record) => results.push(record),
                None => warn!(topic_id = %id, "Selected topic no longer exists"),
            }
        }
        Ok(results)
    }

    // ── Chats and messages ──────────────────────────────────────

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        self.get_json(&chat_key(chat_id)).await
    }

    /// The chat a user is currently continuing in a channel, if any.
    pub async fn active_chat(&self, user_id: u64, channel_id: u64) -> Result<Option<ChatRecord>> {
        let Some(chat_id) = self.get_json::<RecordId>(&active_key(user_id, channel_id)).await? else {
            return Ok(None);
        };
        let chat = self.get_chat(&chat_id).await?;
        Ok(chat.filter(|c| !c.is_archived))
    }

    pub async fn set_active_chat(&self, user_id: u64, channel_id: u64, chat_id: &str) -> Result<()> {
        self.put_json(active_key(user_id, channel_id), &chat_id.to_string())
            .await
    }

    /// Forget the active chat so the next question starts a new one.
    pub async fn clear_active_chat(&self, user_id: u64, channel_id: u64) -> Result<()> {
        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);
        delta.delete(active_key(user_id, channel_id));
        self.storage.commit(delta).await?;
        Ok(())
    }

    /// A user's chats, newest activity first. Archived chats only on request.
    pub async fn list_chats(
        &self,
        user_id: u64,
        limit: usize,
        include_archived: bool,
    ) -> Result<Vec<ChatRecord>> {
        let snapshot = self.storage.latest_snapshot();
        let prefix = format!("{}/{}:", OWNER_PREFIX, user_id);
        let mut stream = snapshot.prefix_raw(&prefix);
        let mut results = Vec::new();

        while let Some(entry) = stream.next().await {
            match entry {
                Ok((key, _)) => {
                    // Key format: "chat/owner/{user_id}:{chat_id}"
                    if let Some(chat_id) = key.strip_prefix(&prefix) {
                        match self.get_chat(chat_id).await {
                            Ok(Some(chat)) if include_archived || !chat.is_archived => {
                                results.push(chat)
                            }
                            Ok(Some(_)) => {}
                            Ok(None) => warn!(chat_id, "Owner index points at missing chat"),
                            Err(e) => warn!("Failed to get chat {}: {}", chat_id, e),
                        }
                    }
                }
                Err(e) => {
                    warn!("Error reading owner index: {}", e);
                }
            }
        }

        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        results.truncate(limit);
        Ok(results)
    }

    pub async fn archive_chat(&self, chat_id: &str) -> Result<()> {
        let _writes = self.writes.lock().await;
        let mut chat = self
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chat not found: {}", chat_id))?;
        chat.is_archived = true;
        chat.updated_at = chrono::Utc::now().timestamp();
        self.put_json(chat_key(chat_id), &chat).await?;
        debug!(chat_id, "chat archived");
        Ok(())
    }

    /// Append turns to a chat (new or existing) in one commit, and make it
    /// the active chat for its owner and channel. Sequence numbers are assigned
    /// here, from the stored chat when it exists.
    pub async fn append_turns(
        &self,
        chat: ChatRecord,
        turns: Vec<MessageRecord>,
    ) -> Result<ChatRecord> {
        let _writes = self.writes.lock().await;
        // The caller's copy may predate another append
        let mut chat = self.get_chat(&chat.id).await?.unwrap_or(chat);

        let snapshot = self.storage.latest_snapshot();
        let mut delta = StateDelta::new(snapshot);

        for mut turn in turns {
            turn.chat_id = chat.id.clone();
            turn.seq = chat.message_count;
            chat.message_count += 1;
            delta.put_raw(
                msg_key(&chat.id, turn.seq),
                serde_json::to_vec(&turn).context("serialize MessageRecord")?,
            );
        }

        chat.updated_at = chrono::Utc::now().timestamp();
        delta.put_raw(
            chat_key(&chat.id),
            serde_json::to_vec(&chat).context("serialize ChatRecord")?,
        );
        // Owner index entry; presence is the index
        delta.put_raw(owner_key(chat.user_id, &chat.id), vec![]);
        delta.put_raw(
            active_key(chat.user_id, chat.channel_id),
            serde_json::to_vec(&chat.id).context("serialize chat id")?,
        );

        self.storage.commit(delta).await?;
        debug!(chat_id = %chat.id, messages = chat.message_count, "turns appended");
        Ok(chat)
    }

    /// Messages of a chat, oldest first.
    pub async fn messages(&self, chat_id: &str) -> Result<Vec<MessageRecord>> {
        let prefix = format!("{}/{}/", MSG_PREFIX, chat_id);
        let mut results: Vec<MessageRecord> = self.scan_json(&prefix).await?;
        results.sort_by_key(|m| m.seq);
        Ok(results)
    }

    // ── Selections and preferences ──────────────────────────────

    pub async fn selection(&self, user_id: u64) -> Result<Selection> {
        Ok(self
            .get_json(&select_key(user_id))
            .await?
            .unwrap_or_default())
    }

    /// Toggle a reference in the user's selection. Returns whether it is now selected.
    pub async fn toggle_reference(&self, user_id: u64, reference_id: &str) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let mut selection = self.selection(user_id).await?;
        let selected = toggle(&mut selection.reference_ids, reference_id);
        self.put_json(select_key(user_id), &selection).await?;
        Ok(selected)
    }

    /// Toggle a topic in the user's selection. Returns whether it is now selected.
    pub async fn toggle_topic(&self, user_id: u64, topic_id: &str) -> Result<bool> {
        let _writes = self.writes.lock().await;
        let mut selection = self.selection(user_id).await?;
        let selected = toggle(&mut selection.topic_ids, topic_id);
        self.put_json(select_key(user_id), &selection).await?;
        Ok(selected)
    }

    pub async fn set_reply_length(&self, user_id: u64, length: ReplyLength) -> Result<()> {
        let _writes = self.writes.lock().await;
        let mut selection = self.selection(user_id).await?;
        selection.reply_length = Some(length);
        self.put_json(select_key(user_id), &selection).await
    }

    /// Drop selected references and topics. The preferred reply length is kept.
    pub async fn clear_selection(&self, user_id: u64) -> Result<()> {
        let _writes = self.writes.lock().await;
        let selection = Selection {
            reply_length: self.selection(user_id).await?.reply_length,
            ..Selection::default()
        };
        self.put_json(select_key(user_id), &selection).await
    }

    pub async fn preferences(&self, user_id: u64) -> Result<UserPreferences> {
        Ok(self.get_json(&pref_key(user_id)).await?.unwrap_or_default())
    }

    pub async fn set_language(&self, user_id: u64, language: Language) -> Result<()> {
        let _writes = self.writes.lock().await;
        let mut prefs = self.preferences(user_id).await?;
        prefs.language = language;
        self.put_json(pref_key(user_id), &prefs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::Role;

    async fn library() -> (tempfile::TempDir, Library) {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::new(dir.path()).await.unwrap();
        (dir, library)
    }

    fn reference(title: &str, author: Option<&str>) -> ReferenceRecord {
        ReferenceRecord {
            id: reference_id(title, author, None),
            category: "Primary".to_string(),
            author: author.map(|s| s.to_string()),
            title: title.to_string(),
            year: None,
            language: None,
            url: None,
            source_type: None,
            format: None,
            subject_focus: None,
            created_at: 0,
        }
    }

    fn turn(role: Role, content: &str) -> MessageRecord {
        MessageRecord {
            chat_id: String::new(),
            seq: 0,
            role,
            content: content.to_string(),
            thinking_block: None,
            follow_up_questions: vec![],
            reply_length: None,
            token_count: None,
            reference_ids: vec![],
            topic_ids: vec![],
            created_at: 0,
        }
    }

    #[test]
    fn test_reference_id_is_stable() {
        let a = reference_id("Italian Journey", Some("Goethe"), Some(1816));
        let b = reference_id(" Italian Journey ", Some("Goethe"), Some(1816));
        assert_eq!(a, b);
        assert_ne!(a, reference_id("Italian Journey", None, Some(1816)));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_new_chat_title_truncated_by_chars() {
        let question = "س".repeat(80);
        let chat = new_chat(1, 2, &question);
        assert_eq!(chat.title_ar.as_deref().unwrap().chars().count(), 50);
        assert_eq!(chat.message_count, 0);
    }

    #[tokio::test]
    async fn test_references_search_and_lookup() {
        let (_dir, lib) = library().await;
        let refs = vec![
            reference("Italian Journey", Some("J. W. von Goethe")),
            reference("Faust", Some("J. W. von Goethe")),
            reference("Goethe in Rome", None),
        ];
        lib.put_references(&refs).await.unwrap();

        let all = lib.list_references(10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].title, "Faust");

        let hits = lib.search_references("goethe", 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        let hits = lib.search_references("rome", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let ids = vec![refs[2].id.clone(), "missing".to_string(), refs[0].id.clone()];
        let resolved = lib.references_by_id(&ids).await.unwrap();
        let titles: Vec<_> = resolved.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Goethe in Rome", "Italian Journey"]);
    }

    #[tokio::test]
    async fn test_append_turns_orders_and_activates() {
        let (_dir, lib) = library().await;
        assert!(lib.active_chat(7, 9).await.unwrap().is_none());

        let chat = new_chat(7, 9, "first question");
        let chat = lib
            .append_turns(
                chat,
                vec![turn(Role::User, "first question"), turn(Role::Assistant, "answer one")],
            )
            .await
            .unwrap();
        let chat = lib
            .append_turns(
                chat,
                vec![turn(Role::User, "second"), turn(Role::Assistant, "answer two")],
            )
            .await
            .unwrap();
        assert_eq!(chat.message_count, 4);

        let active = lib.active_chat(7, 9).await.unwrap().unwrap();
        assert_eq!(active.id, chat.id);

        let messages = lib.messages(&chat.id).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first question", "answer one", "second", "answer two"]);
        assert!(messages.iter().all(|m| m.chat_id == chat.id));

        assert_eq!(lib.list_chats(7, 10, false).await.unwrap().len(), 1);
        assert!(lib.list_chats(8, 10, false).await.unwrap().is_empty());

        lib.clear_active_chat(7, 9).await.unwrap();
        assert!(lib.active_chat(7, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_archived_chat_is_not_active() {
        let (_dir, lib) = library().await;
        let chat = lib
            .append_turns(new_chat(1, 1, "q"), vec![turn(Role::User, "q")])
            .await
            .unwrap();
        lib.archive_chat(&chat.id).await.unwrap();
        assert!(lib.active_chat(1, 1).await.unwrap().is_none());
        assert!(lib.get_chat(&chat.id).await.unwrap().unwrap().is_archived);
        assert!(lib.list_chats(1, 10, false).await.unwrap().is_empty());
        assert_eq!(lib.list_chats(1, 10, true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_with_stale_copy_keeps_all_turns() {
        let (_dir, lib) = library().await;
        let chat = lib
            .append_turns(new_chat(2, 3, "q"), vec![turn(Role::User, "q"), turn(Role::Assistant, "a")])
            .await
            .unwrap();

        // Both callers read the chat at message_count = 2
        let stale = chat.clone();
        lib.append_turns(chat, vec![turn(Role::User, "b1"), turn(Role::Assistant, "b2")])
            .await
            .unwrap();
        let chat = lib
            .append_turns(stale, vec![turn(Role::User, "c1"), turn(Role::Assistant, "c2")])
            .await
            .unwrap();
        assert_eq!(chat.message_count, 6);

        let messages = lib.messages(&chat.id).await.unwrap();
        let seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q", "a", "b1", "b2", "c1", "c2"]);
    }

    #[tokio::test]
    async fn test_concurrent_toggles_all_land() {
        let (_dir, lib) = library().await;
        let (a, b, c) = tokio::join!(
            lib.toggle_reference(4, "r1"),
            lib.toggle_reference(4, "r2"),
            lib.toggle_topic(4, "t1"),
        );
        assert!(a.unwrap() && b.unwrap() && c.unwrap());

        let selection = lib.selection(4).await.unwrap();
        let mut refs = selection.reference_ids.clone();
        refs.sort();
        assert_eq!(refs, vec!["r1", "r2"]);
        assert_eq!(selection.topic_ids, vec!["t1"]);
    }

    #[tokio::test]
    async fn test_selection_toggles() {
        let (_dir, lib) = library().await;
        assert!(lib.toggle_reference(3, "r1").await.unwrap());
        assert!(lib.toggle_topic(3, "t1").await.unwrap());
        assert!(lib.toggle_reference(3, "r2").await.unwrap());
        assert!(!lib.toggle_reference(3, "r1").await.unwrap());
        lib.set_reply_length(3, ReplyLength::Article).await.unwrap();

        let selection = lib.selection(3).await.unwrap();
        assert_eq!(selection.reference_ids, vec!["r2"]);
        assert_eq!(selection.topic_ids, vec!["t1"]);

        lib.clear_selection(3).await.unwrap();
        let selection = lib.selection(3).await.unwrap();
        assert!(selection.is_empty());
        assert_eq!(selection.reply_length, Some(ReplyLength::Article));
    }

    #[tokio::test]
    async fn test_language_preference() {
        let (_dir, lib) = library().await;
        assert_eq!(lib.preferences(5).await.unwrap().language, Language::Arabic);
        lib.set_language(5, Language::English).await.unwrap();
        assert_eq!(lib.preferences(5).await.unwrap().language, Language::English);
    }
}
