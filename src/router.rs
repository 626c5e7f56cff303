//! Task router: the dispatch core behind `POST /agent-request`.
//!
//! A [`Task`] selects one of five behaviours:
//!
//! | Task | Memory | LLM | Result |
//! |------|--------|-----|--------|
//! | `save_to_memory` | upsert | - | fixed confirmation |
//! | `suggest_with_memory` | top-k query | system + context prompt | generated text |
//! | `improve` | - | editor persona | generated text |
//! | `summarize` | - | research-assistant persona | generated text |
//! | `review` | - | reviewer persona | generated text |
//!
//! Task names are parsed at the boundary ([`Task::from_str`]); an unknown
//! name never reaches [`TaskRouter::dispatch`]. The router holds no state of
//! its own; collaborators are injected at construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PromptsConfig;
use crate::llm::{ChatMessage, ChatModel, LlmError};
use crate::memory::{chunk_id, MemoryError, MemoryStore};

/// Response text for `save_to_memory`.
pub const SAVED_MESSAGE: &str = "Content saved to long-term memory.";

/// Response text for a task name outside [`Task::ALL`].
pub const UNKNOWN_TASK_MESSAGE: &str = "Task not recognized by the Router Agent.";

const SUGGEST_SYSTEM: &str = "You are a creative partner with a perfect memory of the entire book.";
const IMPROVE_SYSTEM: &str =
    "You are a meticulous editor. Rewrite the following text to improve it. Provide ONLY the improved text.";
const SUMMARIZE_SYSTEM: &str =
    "You are a research assistant. Provide a concise summary or citation for the text.";
const REVIEW_SYSTEM: &str =
    "You are a book reviewer. Provide a 2-3 sentence review of the following text's clarity, tone, and flow.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    SaveToMemory,
    SuggestWithMemory,
    Improve,
    Summarize,
    Review,
}

impl Task {
    pub const ALL: [Task; 5] = [
        Task::SaveToMemory,
        Task::SuggestWithMemory,
        Task::Improve,
        Task::Summarize,
        Task::Review,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Task::SaveToMemory => "save_to_memory",
            Task::SuggestWithMemory => "suggest_with_memory",
            Task::Improve => "improve",
            Task::Summarize => "summarize",
            Task::Review => "review",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Task::SaveToMemory => "Store the text in long-term memory",
            Task::SuggestWithMemory => "Creative suggestion informed by related saved passages",
            Task::Improve => "Rewrite the text to improve it",
            Task::Summarize => "Concise summary or citation of the text",
            Task::Review => "Short review of clarity, tone, and flow",
        }
    }

    pub fn uses_memory(self) -> bool {
        matches!(self, Task::SaveToMemory | Task::SuggestWithMemory)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task: {0}")]
pub struct UnknownTask(pub String);

impl FromStr for Task {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Task::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl RouterError {
    /// Machine-readable failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            RouterError::Memory(_) => "memory_unavailable",
            RouterError::Llm(_) => "llm_unavailable",
        }
    }
}

/// System prompts for the LLM-backed tasks.
#[derive(Debug, Clone)]
pub struct Personas {
    pub suggest: String,
    pub improve: String,
    pub summarize: String,
    pub review: String,
}

impl Default for Personas {
    fn default() -> Self {
        Self {
            suggest: SUGGEST_SYSTEM.to_string(),
            improve: IMPROVE_SYSTEM.to_string(),
            summarize: SUMMARIZE_SYSTEM.to_string(),
            review: REVIEW_SYSTEM.to_string(),
        }
    }
}

impl Personas {
    /// Defaults with any configured overrides applied.
    pub fn from_config(prompts: &PromptsConfig) -> Self {
        let defaults = Self::default();
        Self {
            suggest: prompts.suggest.clone().unwrap_or(defaults.suggest),
            improve: prompts.improve.clone().unwrap_or(defaults.improve),
            summarize: prompts.summarize.clone().unwrap_or(defaults.summarize),
            review: prompts.review.clone().unwrap_or(defaults.review),
        }
    }
}

/// Build the user prompt for `suggest_with_memory`.
pub fn suggestion_prompt(context_chunks: &[String], content: &str) -> String {
    let context = context_chunks.join("\n");
    format!(
        "CONTEXT FROM THE BOOK:\n---\n{context}\n---\nCURRENT TEXT:\n---\n{content}\n---\n\
         TASK: Based on the context and the current text, provide a creative suggestion."
    )
}

pub struct TaskRouter {
    memory: Arc<dyn MemoryStore>,
    chat: Arc<dyn ChatModel>,
    personas: Personas,
    top_k: usize,
}

impl TaskRouter {
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        chat: Arc<dyn ChatModel>,
        personas: Personas,
        top_k: usize,
    ) -> Self {
        Self {
            memory,
            chat,
            personas,
            top_k,
        }
    }

    /// Run one task over `payload` on behalf of `requested_by`.
    pub async fn dispatch(
        &self,
        task: Task,
        payload: &str,
        requested_by: &str,
    ) -> Result<String, RouterError> {
        info!(%task, user = requested_by, bytes = payload.len(), "router received task");

        let result = match task {
            Task::SaveToMemory => self.save_to_memory(payload).await,
            Task::SuggestWithMemory => self.suggest_with_memory(payload).await,
            Task::Improve => self.persona_reply(&self.personas.improve, payload).await,
            Task::Summarize => self.persona_reply(&self.personas.summarize, payload).await,
            Task::Review => self.persona_reply(&self.personas.review, payload).await,
        };

        if let Err(e) = &result {
            warn!(%task, error = %e, "task failed");
        }
        result
    }

    async fn save_to_memory(&self, payload: &str) -> Result<String, RouterError> {
        let id = chunk_id(payload);
        self.memory.upsert(&id, payload).await?;
        info!(chunk_id = %id, "saved to memory");
        Ok(SAVED_MESSAGE.to_string())
    }

    async fn suggest_with_memory(&self, payload: &str) -> Result<String, RouterError> {
        let context = self.memory.query(payload, self.top_k).await?;
        let prompt = suggestion_prompt(&context, payload);
        let messages = [
            ChatMessage::system(self.personas.suggest.as_str()),
            ChatMessage::user(prompt),
        ];
        Ok(self.chat.chat(&messages).await?)
    }

    async fn persona_reply(&self, system: &str, payload: &str) -> Result<String, RouterError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(payload)];
        Ok(self.chat.chat(&messages).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatRole;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMemory {
        chunks: Mutex<HashMap<String, String>>,
        fail: bool,
    }

    #[async_trait]
    impl MemoryStore for RecordingMemory {
        async fn upsert(&self, id: &str, text: &str) -> Result<(), MemoryError> {
            if self.fail {
                return Err(MemoryError::Embedding("offline".into()));
            }
            self.chunks
                .lock()
                .unwrap()
                .insert(id.to_string(), text.to_string());
            Ok(())
        }

        async fn query(&self, _text: &str, k: usize) -> Result<Vec<String>, MemoryError> {
            if self.fail {
                return Err(MemoryError::Embedding("offline".into()));
            }
            let mut texts: Vec<String> = self.chunks.lock().unwrap().values().cloned().collect();
            texts.sort();
            texts.truncate(k);
            Ok(texts)
        }
    }

    #[derive(Default)]
    struct RecordingChat {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatModel for RecordingChat {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            if self.fail {
                return Err(LlmError::Request("connection refused".into()));
            }
            Ok("generated".to_string())
        }
    }

    fn router(memory: Arc<RecordingMemory>, chat: Arc<RecordingChat>) -> TaskRouter {
        TaskRouter::new(memory, chat, Personas::default(), 3)
    }

    #[test]
    fn test_task_names_roundtrip() {
        for task in Task::ALL {
            assert_eq!(task.as_str().parse::<Task>().unwrap(), task);
            let json = serde_json::to_value(task).unwrap();
            assert_eq!(json, task.as_str());
        }
    }

    #[test]
    fn test_unknown_task_rejected_at_parse() {
        let err = "translate".parse::<Task>().unwrap_err();
        assert_eq!(err, UnknownTask("translate".to_string()));
        assert!("Improve".parse::<Task>().is_err());
        assert!(serde_json::from_str::<Task>("\"translate\"").is_err());
    }

    #[test]
    fn test_suggestion_prompt_layout() {
        let prompt = suggestion_prompt(&["a".into(), "b".into()], "now");
        assert_eq!(
            prompt,
            "CONTEXT FROM THE BOOK:\n---\na\nb\n---\nCURRENT TEXT:\n---\nnow\n---\n\
             TASK: Based on the context and the current text, provide a creative suggestion."
        );
    }

    #[test]
    fn test_persona_overrides() {
        let personas = Personas::from_config(&PromptsConfig {
            review: Some("Be brief.".into()),
            ..Default::default()
        });
        assert_eq!(personas.review, "Be brief.");
        assert_eq!(personas.improve, IMPROVE_SYSTEM);
    }

    #[tokio::test]
    async fn test_save_to_memory_is_idempotent() {
        let memory = Arc::new(RecordingMemory::default());
        let chat = Arc::new(RecordingChat::default());
        let router = router(memory.clone(), chat.clone());

        for _ in 0..2 {
            let reply = router
                .dispatch(Task::SaveToMemory, "The sky is blue.", "u")
                .await
                .unwrap();
            assert_eq!(reply, SAVED_MESSAGE);
        }

        let chunks = memory.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks.contains_key(&chunk_id("The sky is blue.")));
        assert!(chat.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_suggest_with_empty_memory() {
        let memory = Arc::new(RecordingMemory::default());
        let chat = Arc::new(RecordingChat::default());
        let router = router(memory, chat.clone());

        let reply = router
            .dispatch(Task::SuggestWithMemory, "What color is the sky?", "u")
            .await
            .unwrap();
        assert_eq!(reply, "generated");

        let calls = chat.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], ChatMessage::system(SUGGEST_SYSTEM));
        assert_eq!(calls[0][1].content, suggestion_prompt(&[], "What color is the sky?"));
    }

    #[tokio::test]
    async fn test_suggest_injects_saved_context() {
        let memory = Arc::new(RecordingMemory::default());
        let chat = Arc::new(RecordingChat::default());
        let router = router(memory, chat.clone());

        router
            .dispatch(Task::SaveToMemory, "The sky is blue.", "u")
            .await
            .unwrap();
        router
            .dispatch(Task::SuggestWithMemory, "What color is the sky?", "u")
            .await
            .unwrap();

        let calls = chat.calls.lock().unwrap();
        assert!(calls[0][1].content.contains("---\nThe sky is blue.\n---"));
    }

    #[tokio::test]
    async fn test_persona_tasks_send_system_then_payload() {
        let expected = [
            (Task::Improve, IMPROVE_SYSTEM),
            (Task::Summarize, SUMMARIZE_SYSTEM),
            (Task::Review, REVIEW_SYSTEM),
        ];
        for (task, system) in expected {
            let chat = Arc::new(RecordingChat::default());
            let router = router(Arc::new(RecordingMemory::default()), chat.clone());
            router.dispatch(task, "Some prose.", "u").await.unwrap();

            let calls = chat.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].len(), 2);
            assert_eq!(calls[0][0].role, ChatRole::System);
            assert_eq!(calls[0][0].content, system);
            assert_eq!(calls[0][1], ChatMessage::user("Some prose."));
        }
    }

    #[tokio::test]
    async fn test_failures_keep_their_kind() {
        let failing_memory = Arc::new(RecordingMemory {
            fail: true,
            ..Default::default()
        });
        let chat = Arc::new(RecordingChat::default());
        let err = router(failing_memory, chat.clone())
            .dispatch(Task::SuggestWithMemory, "x", "u")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "memory_unavailable");
        assert!(chat.calls.lock().unwrap().is_empty());

        let failing_chat = Arc::new(RecordingChat {
            fail: true,
            ..Default::default()
        });
        let err = router(Arc::new(RecordingMemory::default()), failing_chat)
            .dispatch(Task::Review, "x", "u")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "llm_unavailable");
    }
}
