pub mod error;
pub mod extract;
pub mod prompt;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::library::types::{ChatRecord, MessageRecord, ReferenceRecord, TopicRecord};
use crate::library::{self, Library};
use crate::llm::{CompletionParams, LlmClient};

use error::ChatError;
use types::{ApproxTokenCount, ConversationTurn, Language, ParsedCompletion, ReplyLength, Role};

/// Anything that turns a prompt into a raw completion.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String>;
}

#[async_trait]
impl CompletionOracle for LlmClient {
    async fn complete(&self, prompt: &str, params: &CompletionParams) -> Result<String> {
        LlmClient::complete(self, prompt, params).await
    }
}

pub struct AskRequest {
    pub user_id: u64,
    pub channel_id: u64,
    pub question: String,
    /// Overrides the user's selected reply length for this question only.
    pub reply_length: Option<ReplyLength>,
}

pub struct AskOutcome {
    pub chat: ChatRecord,
    pub parsed: ParsedCompletion,
    pub token_count: ApproxTokenCount,
    pub reply_length: ReplyLength,
    pub language: Language,
    pub references: Vec<ReferenceRecord>,
    pub topics: Vec<TopicRecord>,
}

/// Runs one question through prompt, oracle and extractor, and records the exchange.
pub struct ChatEngine {
    oracle: Arc<dyn CompletionOracle>,
    library: Arc<Library>,
}

impl ChatEngine {
    pub fn new(oracle: Arc<dyn CompletionOracle>, library: Arc<Library>) -> Self {
        Self { oracle, library }
    }

    pub async fn ask(
        &self,
        req: AskRequest,
        params: &CompletionParams,
        default_length: ReplyLength,
    ) -> Result<AskOutcome> {
        let question = req.question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidArgument("question must not be empty".to_string()).into());
        }

        let language = self.library.preferences(req.user_id).await?.language;
        let selection = self.library.selection(req.user_id).await?;
        let reply_length = req
            .reply_length
            .or(selection.reply_length)
            .unwrap_or(default_length);

        let references = self
            .library
            .references_by_id(&selection.reference_ids)
            .await?;
        let topics = self.library.topics_by_id(&selection.topic_ids).await?;

        let active = self.library.active_chat(req.user_id, req.channel_id).await?;
        let history: Vec<ConversationTurn> = match &active {
            Some(chat) => self
                .library
                .messages(&chat.id)
                .await?
                .into_iter()
                .map(|m| ConversationTurn {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            None => Vec::new(),
        };

        let prompt = prompt::compile_in(
            language,
            question,
            &references.iter().map(|r| r.to_reference()).collect::<Vec<_>>(),
            &topics.iter().map(|t| t.to_topic(language)).collect::<Vec<_>>(),
            &history,
            reply_length,
        )?;

        info!(
            user_id = req.user_id,
            language = %language,
            reply_length = %reply_length,
            references = references.len(),
            topics = topics.len(),
            history = history.len(),
            prompt_len = prompt.len(),
            template = prompt::TEMPLATE_VERSION,
            "Compiled prompt"
        );

        let raw = self.oracle.complete(&prompt, params).await?;
        let parsed = extract::extract(&raw);
        let token_count = ApproxTokenCount::estimate(&prompt, &raw);

        if !extract::has_answer_section(&raw) {
            warn!(raw_len = raw.len(), "Completion had no answer section; using whole text");
        }
        if parsed.follow_ups.is_empty() {
            warn!("Completion had no follow-up questions");
        }
        debug!(
            reasoning_len = parsed.reasoning.len(),
            answer_len = parsed.answer.len(),
            follow_ups = parsed.follow_ups.len(),
            "Parsed completion"
        );

        let now = chrono::Utc::now().timestamp();
        let user_turn = MessageRecord {
            chat_id: String::new(),
            seq: 0,
            role: Role::User,
            content: question.to_string(),
            thinking_block: None,
            follow_up_questions: vec![],
            reply_length: Some(reply_length),
            token_count: None,
            reference_ids: references.iter().map(|r| r.id.clone()).collect(),
            topic_ids: topics.iter().map(|t| t.id.clone()).collect(),
            created_at: now,
        };
        let assistant_turn = MessageRecord {
            chat_id: String::new(),
            seq: 0,
            role: Role::Assistant,
            content: parsed.answer.clone(),
            thinking_block: Some(parsed.reasoning.clone()).filter(|r| !r.is_empty()),
            follow_up_questions: parsed.follow_ups.clone(),
            reply_length: None,
            token_count: Some(token_count.0),
            reference_ids: vec![],
            topic_ids: vec![],
            created_at: now,
        };

        let chat = active.unwrap_or_else(|| library::new_chat(req.user_id, req.channel_id, question));
        let chat = self
            .library
            .append_turns(chat, vec![user_turn, assistant_turn])
            .await?;

        info!(
            chat_id = %chat.id,
            messages = chat.message_count,
            tokens = token_count.0,
            "Turn recorded"
        );

        Ok(AskOutcome {
            chat,
            parsed,
            token_count,
            reply_length,
            language,
            references,
            topics,
        })
    }

    /// The `n`th (1-based) follow-up question of the last answer in the active chat.
    pub async fn follow_up(&self, user_id: u64, channel_id: u64, n: usize) -> Result<Option<String>> {
        let Some(chat) = self.library.active_chat(user_id, channel_id).await? else {
            return Ok(None);
        };
        let messages = self.library.messages(&chat.id).await?;
        let last_answer = messages.iter().rev().find(|m| m.role == Role::Assistant);
        Ok(last_answer.and_then(|m| {
            n.checked_sub(1)
                .and_then(|i| m.follow_up_questions.get(i))
                .cloned()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::library::import;

    /// Replays canned completions and records the prompts it was given.
    struct ScriptedOracle {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionOracle for ScriptedOracle {
        async fn complete(&self, prompt: &str, _params: &CompletionParams) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    const PARAMS: CompletionParams = CompletionParams {
        max_tokens: 1000,
        temperature: 0.1,
    };

    async fn setup(replies: Vec<Result<String>>) -> (tempfile::TempDir, Arc<Library>, Arc<ScriptedOracle>, ChatEngine) {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(Library::new(dir.path()).await.unwrap());
        let oracle = ScriptedOracle::new(replies);
        let engine = ChatEngine::new(oracle.clone(), library.clone());
        (dir, library, oracle, engine)
    }

    fn ask(question: &str) -> AskRequest {
        AskRequest {
            user_id: 1,
            channel_id: 2,
            question: question.to_string(),
            reply_length: None,
        }
    }

    const REPLY: &str = "<thinking_block>plan</thinking_block>\n<answer>Goethe reached Rome in 1786.</answer>\n<follow_up_questions>\n1. What did he draw?\n2. Whom did he meet?\n3. Why Naples?\n</follow_up_questions>";

    #[tokio::test]
    async fn test_ask_records_exchange() {
        let (_dir, library, oracle, engine) = setup(vec![Ok(REPLY.to_string())]).await;

        let outcome = engine
            .ask(ask("  When did Goethe reach Rome? "), &PARAMS, ReplyLength::Detailed)
            .await
            .unwrap();
        assert_eq!(outcome.parsed.answer, "Goethe reached Rome in 1786.");
        assert_eq!(outcome.reply_length, ReplyLength::Detailed);
        assert_eq!(outcome.chat.title_ar.as_deref(), Some("When did Goethe reach Rome?"));

        let prompt = oracle.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains(prompt::NO_HISTORY));
        assert!(prompt.contains("700-1200"));
        assert_eq!(outcome.token_count, ApproxTokenCount::estimate(&prompt, REPLY));

        let messages = library.messages(&outcome.chat.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "When did Goethe reach Rome?");
        assert_eq!(messages[1].thinking_block.as_deref(), Some("plan"));
        assert_eq!(messages[1].follow_up_questions.len(), 3);
        assert_eq!(messages[1].token_count, Some(outcome.token_count.0));
    }

    #[tokio::test]
    async fn test_second_question_sees_history_and_selection() {
        let (_dir, library, oracle, engine) =
            setup(vec![Ok(REPLY.to_string()), Ok("bare answer".to_string())]).await;
        import::seed_topics(&library).await.unwrap();
        let topic = library.list_topics().await.unwrap().remove(0);
        library.toggle_topic(1, &topic.id).await.unwrap();
        library.set_reply_length(1, ReplyLength::Short).await.unwrap();

        let first = engine.ask(ask("first"), &PARAMS, ReplyLength::Detailed).await.unwrap();
        let second = engine.ask(ask("second"), &PARAMS, ReplyLength::Detailed).await.unwrap();
        assert_eq!(first.chat.id, second.chat.id);
        assert_eq!(second.parsed.answer, "bare answer");
        assert_eq!(second.reply_length, ReplyLength::Short);

        let prompts = oracle.prompts.lock().unwrap().clone();
        assert!(prompts[1].contains("User: first\nAssistant: Goethe reached Rome in 1786."));
        assert!(prompts[1].contains(&topic.name_ar));
        assert!(prompts[1].contains("200-400"));

        let follow = engine.follow_up(1, 2, 1).await.unwrap();
        assert_eq!(follow, None, "last answer had no follow-ups");
    }

    #[tokio::test]
    async fn test_follow_up_lookup() {
        let (_dir, _library, _oracle, engine) = setup(vec![Ok(REPLY.to_string())]).await;
        engine.ask(ask("q"), &PARAMS, ReplyLength::Short).await.unwrap();
        assert_eq!(
            engine.follow_up(1, 2, 2).await.unwrap().as_deref(),
            Some("Whom did he meet?")
        );
        assert_eq!(engine.follow_up(1, 2, 0).await.unwrap(), None);
        assert_eq!(engine.follow_up(1, 2, 4).await.unwrap(), None);
        assert_eq!(engine.follow_up(1, 99, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_oracle_persists_nothing() {
        let (_dir, library, _oracle, engine) =
            setup(vec![Err(anyhow::anyhow!("Anthropic API error (529): overloaded"))]).await;
        assert!(engine.ask(ask("q"), &PARAMS, ReplyLength::Short).await.is_err());
        assert!(library.active_chat(1, 2).await.unwrap().is_none());
        assert!(library.list_chats(1, 10, true).await.unwrap().is_empty());
    }

    /// Answers "overlap A" slower than "overlap B", so the two asks overlap.
    struct SlowOracle;

    #[async_trait]
    impl CompletionOracle for SlowOracle {
        async fn complete(&self, prompt: &str, _params: &CompletionParams) -> Result<String> {
            let question = prompt
                .lines()
                .find(|l| l.starts_with("overlap "))
                .unwrap_or("?")
                .to_string();
            let delay = match question.as_str() {
                "overlap A" => 200,
                "overlap B" => 100,
                _ => 0,
            };
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            Ok(format!("<answer>re: {}</answer>", question))
        }
    }

    #[tokio::test]
    async fn test_overlapping_asks_keep_every_turn() {
        let dir = tempfile::tempdir().unwrap();
        let library = Arc::new(Library::new(dir.path()).await.unwrap());
        let engine = ChatEngine::new(Arc::new(SlowOracle), library.clone());

        let seed = engine.ask(ask("seed"), &PARAMS, ReplyLength::Short).await.unwrap();
        assert_eq!(seed.chat.message_count, 2);

        // Both read the chat at two messages before either answer arrives
        let (a, b) = tokio::join!(
            engine.ask(ask("overlap A"), &PARAMS, ReplyLength::Short),
            engine.ask(ask("overlap B"), &PARAMS, ReplyLength::Short),
        );
        assert_eq!(a.unwrap().chat.id, seed.chat.id);
        assert_eq!(b.unwrap().chat.id, seed.chat.id);

        let messages = library.messages(&seed.chat.id).await.unwrap();
        assert_eq!(messages.len(), 6);
        let seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["seed", "re: ?", "overlap B", "re: overlap B", "overlap A", "re: overlap A"]
        );
        assert_eq!(
            library.get_chat(&seed.chat.id).await.unwrap().unwrap().message_count,
            6
        );
    }

    #[tokio::test]
    async fn test_empty_question_rejected_before_oracle() {
        let (_dir, _library, oracle, engine) = setup(vec![]).await;
        let err = engine
            .ask(ask("   "), &PARAMS, ReplyLength::Short)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ChatError>(),
            Some(ChatError::InvalidArgument(_))
        ));
        assert!(oracle.prompts.lock().unwrap().is_empty());
    }
}
