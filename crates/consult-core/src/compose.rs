//! Grounded answer composition.
//!
//! The [`Composer`] turns a user question into an answer:
//!
//! 1. Retrieve the top-k documents above the similarity floor.
//! 2. Build a bounded prompt: a system instruction, the retrieved excerpts cut
//!    to a character budget, the most recent memory turns (oldest dropped
//!    first if the prompt would exceed its budget), then the question.
//! 3. Call the [`Generator`].
//! 4. Append the question, and the answer if one was produced, to memory.
//!
//! `answer` never fails. Any embedding, retrieval or generation error becomes
//! [`FALLBACK_ANSWER`] with `grounded = false`; the question is still
//! remembered so the next turn has continuity.
//!
//! The composer also produces the [`LeadSummary`] used for CRM comments and
//! manager notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::PipelineError;
use crate::memory::{recent, ConversationMemory};
use crate::models::{ConversationTurn, RetrievalResult, Role, UserProfile};
use crate::retrieve::Retriever;

/// Returned to the user whenever the pipeline cannot produce an answer.
pub const FALLBACK_ANSWER: &str = "Sorry, I cannot answer right now. Please try again \
in a moment or press \"Contact a manager\" and a specialist will help you.";

const SYSTEM_PROMPT: &str = "You are a consultant of an investment and wealth advisory firm. \
Answer the client's question using only the documents supplied below, plus general \
domain framing where needed. Be concise and professional, and answer in the language \
of the question. If the documents do not contain relevant information, say explicitly \
that you found no specific information on this in our materials and offer to connect \
the client with a manager. Never invent figures, terms or guarantees.";

const NO_CONTEXT: &str = "No relevant documents were found for this question.";

/// Per-question cap in a lead summary.
pub const SUMMARY_QUESTION_CHARS: usize = 300;
const SUMMARY_NARRATIVE_CHARS: usize = 1500;

const SUMMARY_PROMPT: &str = "Summarize the client's request for a sales manager in two or \
three sentences: what the client is interested in and which questions they asked. \
Do not add anything that is not in the conversation.";

// ============ Generator ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A chat-completion model.
///
/// Throttling maps to [`PipelineError::GenerationRateLimited`]; timeouts,
/// transport errors and empty or malformed responses map to
/// [`PipelineError::GenerationUnavailable`].
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, PipelineError>;
}

// ============ Composer ============

#[derive(Debug, Clone, Copy)]
pub struct ComposerSettings {
    /// Character budget for all document excerpts together.
    pub context_chars: usize,
    /// Memory turns offered to the model.
    pub memory_turns: usize,
    /// Character budget for the whole prompt.
    pub prompt_chars: usize,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            context_chars: 3000,
            memory_turns: 20,
            prompt_chars: 12_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// True iff at least one document cleared the floor and the model answered.
    pub grounded: bool,
    /// True when `text` is [`FALLBACK_ANSWER`].
    pub fallback: bool,
}

/// Structured description of a lead for the CRM and the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadSummary {
    pub service_code: String,
    pub service_title: String,
    pub client_name: Option<String>,
    pub phone: Option<String>,
    pub client_questions: Vec<String>,
    pub narrative: String,
}

impl LeadSummary {
    pub fn render(&self) -> String {
        let mut out = format!("Service: {}\n", self.service_title);
        if let Some(name) = &self.client_name {
            out.push_str(&format!("Client: {}\n", name));
        }
        if let Some(phone) = &self.phone {
            out.push_str(&format!("Phone: {}\n", phone));
        }
        out.push('\n');
        out.push_str(&self.narrative);
        if !self.client_questions.is_empty() {
            out.push_str("\n\nClient questions:");
            for q in &self.client_questions {
                out.push_str(&format!("\n- {}", q));
            }
        }
        out
    }
}

pub struct Composer {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
    memory: ConversationMemory,
    settings: ComposerSettings,
}

impl Composer {
    pub fn new(
        retriever: Retriever,
        generator: Arc<dyn Generator>,
        memory: ConversationMemory,
        settings: ComposerSettings,
    ) -> Self {
        Self {
            retriever,
            generator,
            memory,
            settings,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Answer `question` for `profile`, updating its memory.
    pub async fn answer(&self, question: &str, profile: &mut UserProfile) -> Answer {
        let outcome = self.try_answer(question, &profile.history).await;
        let now = Utc::now();
        self.memory.append(profile, Role::User, question, now);

        match outcome {
            Ok((text, hits)) => {
                self.memory.append(profile, Role::Assistant, &text, Utc::now());
                tracing::info!(
                    user_id = profile.user_id,
                    hits,
                    grounded = hits > 0,
                    "answer composed"
                );
                Answer {
                    text,
                    grounded: hits > 0,
                    fallback: false,
                }
            }
            Err(err) => {
                tracing::warn!(
                    user_id = profile.user_id,
                    kind = err.kind(),
                    error = %err,
                    "answer pipeline failed, using fallback"
                );
                Answer {
                    text: FALLBACK_ANSWER.to_string(),
                    grounded: false,
                    fallback: true,
                }
            }
        }
    }

    async fn try_answer(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<(String, usize), PipelineError> {
        let retrieved = self.retriever.retrieve(question).await?;
        let messages = self.build_messages(question, &retrieved, history);
        let text = self.generator.complete(&messages).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::GenerationUnavailable(
                "model returned an empty answer".into(),
            ));
        }
        Ok((text.to_string(), retrieved.len()))
    }

    /// Assemble the prompt within the configured budgets.
    pub fn build_messages(
        &self,
        question: &str,
        retrieved: &RetrievalResult,
        history: &[ConversationTurn],
    ) -> Vec<ChatMessage> {
        let context = if retrieved.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            build_context(retrieved, self.settings.context_chars)
        };
        let system = format!("{}\n\nDocuments:\n{}", SYSTEM_PROMPT, context);

        let fixed = system.chars().count() + question.chars().count();
        let mut turns = recent(history, self.settings.memory_turns);
        let mut total = fixed + turns.iter().map(|t| t.text.chars().count()).sum::<usize>();
        while total > self.settings.prompt_chars && !turns.is_empty() {
            total -= turns[0].text.chars().count();
            turns = &turns[1..];
        }

        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(ChatMessage::new(ChatRole::System, system));
        messages.extend(
            turns
                .iter()
                .map(|t| ChatMessage::new(t.role.into(), t.text.clone())),
        );
        messages.push(ChatMessage::new(ChatRole::User, question));
        messages
    }

    /// Summarize the conversation for a lead. Falls back to a fixed sentence
    /// when there is nothing to summarize or the model fails.
    pub async fn summarize_lead(
        &self,
        profile: &UserProfile,
        service_code: &str,
        service_title: &str,
    ) -> LeadSummary {
        let client_questions: Vec<String> = recent(&profile.history, self.settings.memory_turns)
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| clip(&t.text, SUMMARY_QUESTION_CHARS))
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let fallback = format!("Client interested in service {}.", service_title);
        let narrative = if profile.history.is_empty() {
            fallback
        } else {
            let transcript = recent(&profile.history, self.settings.memory_turns)
                .iter()
                .map(|t| format!("{}: {}", t.role.as_str(), t.text))
                .collect::<Vec<_>>()
                .join("\n");
            let messages = vec![
                ChatMessage::new(ChatRole::System, SUMMARY_PROMPT),
                ChatMessage::new(
                    ChatRole::User,
                    format!("Service: {}\n\nConversation:\n{}", service_title, transcript),
                ),
            ];
            match self.generator.complete(&messages).await {
                Ok(text) if !text.trim().is_empty() => clip(text.trim(), SUMMARY_NARRATIVE_CHARS),
                Ok(_) => fallback,
                Err(err) => {
                    tracing::warn!(
                        user_id = profile.user_id,
                        error = %err,
                        "lead summary generation failed, using fallback"
                    );
                    fallback
                }
            }
        };

        LeadSummary {
            service_code: service_code.to_string(),
            service_title: service_title.to_string(),
            client_name: profile.full_name.clone(),
            phone: profile.phone.clone(),
            client_questions,
            narrative,
        }
    }
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Format retrieved documents into one context block of at most `budget`
/// characters. The last excerpt that does not fit whole is cut.
pub fn build_context(retrieved: &RetrievalResult, budget: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for hit in &retrieved.hits {
        let header = format!(
            "[Document: {}, relevance: {:.2}]\n",
            hit.document.filename, hit.score
        );
        let header_len = header.chars().count();
        let separator = if out.is_empty() { 0 } else { 2 };
        if used + separator + header_len >= budget {
            break;
        }
        if separator > 0 {
            out.push_str("\n\n");
        }
        out.push_str(&header);
        used += separator + header_len;

        let room = budget - used;
        let content = hit.document.content.trim();
        let content_len = content.chars().count();
        if content_len <= room {
            out.push_str(content);
            used += content_len;
        } else {
            out.extend(content.chars().take(room));
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedder;
    use crate::models::{NewDocument, RetrievalHit, StoredDocument};
    use crate::retrieve::RetrievalSettings;
    use crate::store::memory::InMemoryDocumentStore;
    use crate::store::DocumentStore;
    use std::sync::Mutex;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, PipelineError> {
            if self.fail {
                Err(PipelineError::EmbeddingUnavailable("offline".into()))
            } else {
                Ok(vec![1.0, 0.0])
            }
        }
    }

    struct RecordingGenerator {
        fail: bool,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl RecordingGenerator {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, PipelineError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if self.fail {
                Err(PipelineError::GenerationRateLimited("429".into()))
            } else {
                Ok("Here is the answer.".into())
            }
        }
    }

    async fn composer(
        embed_fail: bool,
        gen: Arc<RecordingGenerator>,
        with_doc: bool,
    ) -> Composer {
        let store = Arc::new(InMemoryDocumentStore::new());
        if with_doc {
            let doc = NewDocument {
                filename: "vc_terms.md".into(),
                content: "The minimum investment is 100000 USD.".into(),
                file_type: Some("md".into()),
                byte_size: None,
                source_id: None,
            };
            store.add(&doc, &[1.0, 0.0]).await.unwrap();
        }
        let retriever = Retriever::new(
            Arc::new(FixedEmbedder { fail: embed_fail }),
            store,
            RetrievalSettings::default(),
        );
        Composer::new(
            retriever,
            gen,
            ConversationMemory::default(),
            ComposerSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_grounded_answer_appends_question_then_answer() {
        let gen = Arc::new(RecordingGenerator::new(false));
        let composer = composer(false, gen.clone(), true).await;
        let mut profile = UserProfile::new(1, Utc::now());

        let answer = composer
            .answer("What is the minimum investment?", &mut profile)
            .await;
        assert!(answer.grounded);
        assert_eq!(answer.text, "Here is the answer.");
        assert_eq!(profile.history.len(), 2);
        assert_eq!(profile.history[0].role, Role::User);
        assert_eq!(profile.history[1].role, Role::Assistant);

        let seen = gen.seen.lock().unwrap();
        assert!(seen[0][0].content.contains("[Document: vc_terms.md"));
    }

    #[tokio::test]
    async fn test_empty_store_is_ungrounded() {
        let gen = Arc::new(RecordingGenerator::new(false));
        let composer = composer(false, gen.clone(), false).await;
        let mut profile = UserProfile::new(1, Utc::now());
        let answer = composer.answer("Anything?", &mut profile).await;
        assert!(!answer.grounded);
        assert!(!answer.text.is_empty());
        let seen = gen.seen.lock().unwrap();
        assert!(seen[0][0].content.contains(NO_CONTEXT));
    }

    #[tokio::test]
    async fn test_failures_fall_back_and_keep_question() {
        for (embed_fail, gen_fail) in [(true, false), (false, true)] {
            let gen = Arc::new(RecordingGenerator::new(gen_fail));
            let composer = composer(embed_fail, gen, true).await;
            let mut profile = UserProfile::new(1, Utc::now());
            let answer = composer.answer("Question?", &mut profile).await;
            assert_eq!(answer.text, FALLBACK_ANSWER);
            assert!(!answer.grounded);
            assert!(answer.fallback);
            assert_eq!(profile.history.len(), 1);
            assert_eq!(profile.history[0].text, "Question?");
        }
    }

    #[tokio::test]
    async fn test_prompt_drops_oldest_turns_over_budget() {
        let gen = Arc::new(RecordingGenerator::new(false));
        let mut c = composer(false, gen, false).await;
        c.settings.prompt_chars = SYSTEM_PROMPT.len() + NO_CONTEXT.len() + 120;
        let mut profile = UserProfile::new(1, Utc::now());
        for i in 0..10 {
            c.memory
                .append(&mut profile, Role::User, &format!("{:0>40}", i), Utc::now());
        }
        let messages = c.build_messages("q", &RetrievalResult::default(), &profile.history);
        let kept: Vec<&str> = messages[1..messages.len() - 1]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert!(kept.len() < 10);
        assert_eq!(kept.last().copied(), Some(format!("{:0>40}", 9).as_str()));
    }

    #[test]
    fn test_context_respects_budget() {
        let doc = |name: &str, content: &str| StoredDocument {
            id: name.into(),
            seq: 0,
            filename: name.into(),
            content: content.into(),
            file_type: None,
            byte_size: None,
            source_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let retrieved = RetrievalResult {
            hits: vec![
                RetrievalHit {
                    document: doc("a.md", &"x".repeat(100)),
                    score: 0.9,
                },
                RetrievalHit {
                    document: doc("b.md", &"y".repeat(100)),
                    score: 0.8,
                },
            ],
        };
        let ctx = build_context(&retrieved, 200);
        assert!(ctx.chars().count() <= 200);
        assert!(ctx.starts_with("[Document: a.md, relevance: 0.90]"));
        assert!(ctx.contains("b.md"));
    }

    #[tokio::test]
    async fn test_lead_summary_fallback_without_history() {
        let gen = Arc::new(RecordingGenerator::new(true));
        let composer = composer(false, gen, false).await;
        let profile = UserProfile::new(1, Utc::now());
        let summary = composer
            .summarize_lead(&profile, "crypto", "Crypto Assets")
            .await;
        assert_eq!(summary.narrative, "Client interested in service Crypto Assets.");
        assert!(summary.render().starts_with("Service: Crypto Assets"));
    }

    #[tokio::test]
    async fn test_lead_summary_clips_long_questions() {
        let gen = Arc::new(RecordingGenerator::new(false));
        let composer = composer(false, gen, false).await;
        let mut profile = UserProfile::new(1, Utc::now());
        for i in 0..3 {
            let long = format!("{} {}", i, "a".repeat(3000));
            composer
                .memory
                .append(&mut profile, Role::User, &long, Utc::now());
        }
        composer
            .memory
            .append(&mut profile, Role::User, "short one", Utc::now());

        let summary = composer
            .summarize_lead(&profile, "crypto", "Crypto Assets")
            .await;
        assert_eq!(summary.client_questions.len(), 4);
        for q in &summary.client_questions[..3] {
            assert_eq!(q.chars().count(), SUMMARY_QUESTION_CHARS);
            assert!(q.ends_with("..."));
        }
        assert_eq!(summary.client_questions[3], "short one");
        assert!(summary.render().chars().count() < 2000);
    }
}
