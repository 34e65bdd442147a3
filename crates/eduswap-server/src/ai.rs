//! AI tutor integration.
//!
//! The provider is an opaque streaming text-completion service behind the
//! [`AiProvider`] trait: it takes an ordered list of role-tagged turns and
//! yields text fragments.  Provider failures degrade to "no reply" — the
//! chat stays usable without the bot.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use eduswap_shared::{MessageId, StudentId};
use eduswap_store::AiMessage;

use crate::error::ServerError;
use crate::gateway::Gateway;

const SYSTEM_PROMPT: &str = "You are an attentive and patient high-school tutor. \
    Your goal is to help the student understand the material. \
    Explain step by step, with examples and guiding questions. \
    Steer the student toward the right answer without giving it away.";

/// Keep the system prompt plus this many most recent turns when building the
/// provider request.
const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiRole {
    System,
    User,
    Assistant,
}

impl AiRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiRole::System => "system",
            AiRole::User => "user",
            AiRole::Assistant => "assistant",
        }
    }
}

/// One role-tagged conversation turn sent to the provider.
#[derive(Debug, Clone)]
pub struct AiTurn {
    pub role: AiRole,
    pub content: String,
}

/// Opaque completion service.  Implementations stream fragments through
/// `chunks` as they arrive and return the full completion text.
#[async_trait]
pub trait AiProvider: Send + Sync {
    async fn complete(
        &self,
        turns: Vec<AiTurn>,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<String, ServerError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible provider
// ---------------------------------------------------------------------------

/// Streams from an OpenAI-compatible `/chat/completions` endpoint over SSE.
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(endpoint: String, token: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
            model,
        }
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    async fn complete(
        &self,
        turns: Vec<AiTurn>,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<String, ServerError> {
        let token = self.token.as_deref().ok_or_else(|| {
            ServerError::AiProvider("no AI token configured (EDUSWAP_AI_TOKEN)".to_string())
        })?;

        let messages: Vec<serde_json::Value> = turns
            .iter()
            .map(|t| {
                serde_json::json!({
                    "role": t.role.as_str(),
                    "content": t.content,
                })
            })
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "stream": true,
            "messages": messages,
        });

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServerError::AiProvider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServerError::AiProvider(format!(
                "completion request failed with status {}",
                response.status()
            )));
        }

        // Server-sent events: `data: {json}` lines, terminated by `[DONE]`.
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ServerError::AiProvider(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(full);
                }

                if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(text) = value["choices"][0]["delta"]["content"].as_str() {
                        full.push_str(text);
                        let _ = chunks.send(text.to_string());
                    }
                }
            }
        }

        Ok(full)
    }
}

// ---------------------------------------------------------------------------
// Chat service
// ---------------------------------------------------------------------------

pub struct AiChatService {
    gateway: Arc<Gateway>,
    provider: Arc<dyn AiProvider>,
}

impl AiChatService {
    pub fn new(gateway: Arc<Gateway>, provider: Arc<dyn AiProvider>) -> Self {
        Self { gateway, provider }
    }

    /// A student's full conversation, oldest first.
    pub async fn conversation(&self, student: StudentId) -> Result<Vec<AiMessage>, ServerError> {
        self.gateway
            .run(move |db| db.ai_messages_for_student(student))
            .await
    }

    /// Persist a user prompt.
    pub async fn record_prompt(
        &self,
        student: StudentId,
        id: MessageId,
        content: String,
    ) -> Result<AiMessage, ServerError> {
        let message = AiMessage {
            id,
            student_id: student,
            sender_id: student,
            content,
            is_file: false,
            file_name: None,
            timestamp: Utc::now(),
            reply_to_message_id: None,
        };
        self.insert(message).await
    }

    /// Persist a file message (content is the `/files/...` link).
    pub async fn record_file(
        &self,
        student: StudentId,
        file_name: String,
        link: String,
    ) -> Result<AiMessage, ServerError> {
        let message = AiMessage {
            id: MessageId::new(),
            student_id: student,
            sender_id: student,
            content: link,
            is_file: true,
            file_name: Some(file_name),
            timestamp: Utc::now(),
            reply_to_message_id: None,
        };
        self.insert(message).await
    }

    /// Run the provider over the conversation history and persist its reply,
    /// paired to `prompt_id`.
    ///
    /// Returns `None` when generation produced nothing — including provider
    /// failure, which is logged and degraded rather than propagated.
    pub async fn generate_reply(
        &self,
        student: StudentId,
        prompt_id: MessageId,
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<Option<AiMessage>, ServerError> {
        let turns = self.history_turns(student).await?;

        let text = match self.provider.complete(turns, chunks).await {
            Ok(text) => text,
            Err(e) => {
                warn!(student = %student, error = %e, "AI completion failed, degrading to no reply");
                return Ok(None);
            }
        };
        if text.is_empty() {
            return Ok(None);
        }

        let reply = AiMessage {
            id: MessageId::new(),
            student_id: student,
            sender_id: StudentId::bot(),
            content: text,
            is_file: false,
            file_name: None,
            timestamp: Utc::now(),
            reply_to_message_id: Some(prompt_id),
        };
        let reply = self.insert(reply).await?;

        debug!(student = %student, reply = %reply.id, "AI reply stored");
        Ok(Some(reply))
    }

    /// Edit a user prompt.  The stale bot reply (if any) is retracted so the
    /// caller can regenerate; its id is returned for the delete broadcast.
    pub async fn edit_prompt(
        &self,
        student: StudentId,
        message_id: MessageId,
        new_content: String,
    ) -> Result<Option<MessageId>, ServerError> {
        let message = self
            .gateway
            .run(move |db| db.get_ai_message(message_id))
            .await?;

        if message.student_id != student {
            return Err(ServerError::NotFound(format!(
                "message {message_id} does not exist"
            )));
        }
        if message.sender_id != student {
            return Err(ServerError::Unauthorized(
                "only your own prompts can be edited".to_string(),
            ));
        }

        self.gateway
            .run(move |db| db.update_ai_message_content(message_id, &new_content))
            .await?;

        let stale = self
            .gateway
            .run(move |db| db.ai_reply_to(message_id))
            .await?;
        match stale {
            Some(reply) => {
                self.gateway
                    .run(move |db| db.delete_ai_message(reply.id))
                    .await?;
                Ok(Some(reply.id))
            }
            None => Ok(None),
        }
    }

    /// Conversation history as provider turns: the tutor system prompt plus
    /// the most recent messages.
    async fn history_turns(&self, student: StudentId) -> Result<Vec<AiTurn>, ServerError> {
        let conversation = self.conversation(student).await?;

        let start = conversation.len().saturating_sub(HISTORY_LIMIT);
        let mut turns = Vec::with_capacity(conversation.len() - start + 1);
        turns.push(AiTurn {
            role: AiRole::System,
            content: SYSTEM_PROMPT.to_string(),
        });
        for message in &conversation[start..] {
            turns.push(AiTurn {
                role: if message.sender_id.is_bot() {
                    AiRole::Assistant
                } else {
                    AiRole::User
                },
                content: message.content.clone(),
            });
        }
        Ok(turns)
    }

    async fn insert(&self, message: AiMessage) -> Result<AiMessage, ServerError> {
        self.gateway
            .run({
                let message = message.clone();
                move |db| db.insert_ai_message(&message)
            })
            .await?;
        Ok(message)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{FailingProvider, ScriptedProvider};
    use super::*;
    use std::time::Duration;

    use eduswap_store::Database;

    fn test_gateway() -> Arc<Gateway> {
        Arc::new(Gateway::new(
            Database::open_in_memory().unwrap(),
            Duration::from_secs(1),
        ))
    }

    fn service(provider: Arc<dyn AiProvider>) -> AiChatService {
        AiChatService::new(test_gateway(), provider)
    }

    #[tokio::test]
    async fn prompt_reply_pairing() {
        let ai = service(Arc::new(ScriptedProvider {
            reply: "a derivative measures change".to_string(),
        }));
        let student = StudentId::new();

        let prompt = ai
            .record_prompt(student, MessageId::new(), "what is a derivative?".to_string())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply = ai
            .generate_reply(student, prompt.id, tx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reply.reply_to_message_id, Some(prompt.id));
        assert!(reply.sender_id.is_bot());
        assert_eq!(reply.content, "a derivative measures change");

        // Chunks streamed and reassemble to the full reply.
        let mut streamed = String::new();
        while let Ok(chunk) = rx.try_recv() {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, reply.content);

        let conversation = ai.conversation(student).await.unwrap();
        assert_eq!(conversation.len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_no_reply() {
        let ai = service(Arc::new(FailingProvider));
        let student = StudentId::new();

        let prompt = ai
            .record_prompt(student, MessageId::new(), "hello?".to_string())
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let reply = ai.generate_reply(student, prompt.id, tx).await.unwrap();
        assert!(reply.is_none());

        // The chat is still usable: the prompt is stored.
        assert_eq!(ai.conversation(student).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn edit_retracts_stale_reply() {
        let ai = service(Arc::new(ScriptedProvider {
            reply: "stale answer".to_string(),
        }));
        let student = StudentId::new();

        let prompt = ai
            .record_prompt(student, MessageId::new(), "first question".to_string())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let reply = ai
            .generate_reply(student, prompt.id, tx)
            .await
            .unwrap()
            .unwrap();

        let deleted = ai
            .edit_prompt(student, prompt.id, "better question".to_string())
            .await
            .unwrap();
        assert_eq!(deleted, Some(reply.id));

        let conversation = ai.conversation(student).await.unwrap();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].content, "better question");
    }

    #[tokio::test]
    async fn edit_of_foreign_prompt_is_hidden() {
        let ai = service(Arc::new(ScriptedProvider {
            reply: "x".to_string(),
        }));
        let student = StudentId::new();
        let stranger = StudentId::new();

        let prompt = ai
            .record_prompt(student, MessageId::new(), "mine".to_string())
            .await
            .unwrap();

        // Another student cannot even observe the prompt's existence.
        assert!(matches!(
            ai.edit_prompt(stranger, prompt.id, "hijack".to_string()).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn history_is_capped() {
        let ai = service(Arc::new(ScriptedProvider {
            reply: "ok".to_string(),
        }));
        let student = StudentId::new();

        for i in 0..15 {
            ai.record_prompt(student, MessageId::new(), format!("q{i}"))
                .await
                .unwrap();
        }

        let turns = ai.history_turns(student).await.unwrap();
        // System prompt plus the ten most recent messages.
        assert_eq!(turns.len(), HISTORY_LIMIT + 1);
        assert_eq!(turns[0].role, AiRole::System);
        assert_eq!(turns.last().unwrap().content, "q14");
    }
}
