use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ResolvedAssistant;
use crate::error::VetError;
use crate::gateway::error_message;

const ANSWER_FIELDS: &[&str] = &["answer", "response", "message", "content", "text"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Set on assistant messages that stand in for a failed request.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

pub trait Assistant: Send + Sync {
    fn ask(&self, question: &str) -> Result<String, VetError>;
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
    top_k: u32,
    stream: bool,
}

#[derive(Clone)]
pub struct HttpAssistant {
    client: Client,
    endpoint: String,
    top_k: u32,
    timeout: Duration,
}

impl HttpAssistant {
    pub fn new(config: &ResolvedAssistant) -> Result<Self, VetError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("exovet/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| VetError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| VetError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            top_k: config.top_k,
            timeout: config.timeout,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> VetError {
        if err.is_timeout() {
            VetError::Timeout {
                after: self.timeout,
            }
        } else {
            VetError::Network(err.to_string())
        }
    }
}

impl Assistant for HttpAssistant {
    fn ask(&self, question: &str) -> Result<String, VetError> {
        debug!(endpoint = %self.endpoint, top_k = self.top_k, "assistant query");
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&QueryRequest {
                question,
                top_k: self.top_k,
                stream: false,
            })
            .send()
            .map_err(|err| self.map_error(err))?;

        let status = response.status();
        let body = response.text().map_err(|err| self.map_error(err))?;
        if !status.is_success() {
            return Err(VetError::Transport {
                status: status.as_u16(),
                message: error_message(&body).unwrap_or_else(|| status.to_string()),
            });
        }
        let value: Value =
            serde_json::from_str(&body).map_err(|err| VetError::Parse(err.to_string()))?;
        extract_answer(&value)
            .ok_or_else(|| VetError::Parse("assistant reply has no answer field".to_string()))
    }
}

/// Finds the reply text under any of the known field names, one level deep
/// for replies shaped like `{"message": {"content": "..."}}`.
pub fn extract_answer(value: &Value) -> Option<String> {
    if let Some(text) = value.as_str() {
        return Some(text.to_string());
    }
    ANSWER_FIELDS
        .iter()
        .filter_map(|key| value.get(key))
        .find_map(|field| match field {
            Value::String(text) => Some(text.clone()),
            Value::Object(_) => ANSWER_FIELDS
                .iter()
                .filter_map(|key| field.get(key))
                .find_map(|inner| inner.as_str().map(str::to_string)),
            _ => None,
        })
}

/// A question sent but not yet answered.
#[derive(Debug)]
#[must_use]
pub struct PendingTurn {
    question: String,
}

impl PendingTurn {
    pub fn question(&self) -> &str {
        &self.question
    }
}

/// Append-only conversation; one question may be outstanding at a time.
#[derive(Debug, Default)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    busy: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Records the user's message right away and marks the session busy.
    pub fn begin(&mut self, question: &str) -> Result<PendingTurn, VetError> {
        if self.busy {
            return Err(VetError::ChatBusy);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(VetError::EmptyQuestion);
        }
        self.push(Role::User, question.to_string(), false);
        self.busy = true;
        Ok(PendingTurn {
            question: question.to_string(),
        })
    }

    /// Appends the reply, or a stand-in message carrying the error text.
    pub fn complete(
        &mut self,
        _pending: PendingTurn,
        result: Result<String, VetError>,
    ) -> &ChatMessage {
        self.busy = false;
        match result {
            Ok(answer) => self.push(Role::Assistant, answer, false),
            Err(err) => self.push(Role::Assistant, err.user_message(), true),
        }
    }

    pub fn ask(
        &mut self,
        assistant: &dyn Assistant,
        question: &str,
    ) -> Result<&ChatMessage, VetError> {
        let pending = self.begin(question)?;
        let result = assistant.ask(pending.question());
        Ok(self.complete(pending, result))
    }

    fn push(&mut self, role: Role, content: String, failed: bool) -> &ChatMessage {
        let now = Utc::now();
        let timestamp = match self.messages.last() {
            Some(last) if now <= last.timestamp => last.timestamp + TimeDelta::microseconds(1),
            _ => now,
        };
        self.messages.push(ChatMessage {
            role,
            content,
            timestamp,
            failed,
        });
        &self.messages[self.messages.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    struct Echo;

    impl Assistant for Echo {
        fn ask(&self, question: &str) -> Result<String, VetError> {
            Ok(format!("you asked: {question}"))
        }
    }

    struct Down;

    impl Assistant for Down {
        fn ask(&self, _question: &str) -> Result<String, VetError> {
            Err(VetError::Transport {
                status: 503,
                message: "index is rebuilding".to_string(),
            })
        }
    }

    #[test]
    fn answer_field_variants() {
        assert_eq!(extract_answer(&json!({"answer": "a"})).as_deref(), Some("a"));
        assert_eq!(extract_answer(&json!({"response": "b"})).as_deref(), Some("b"));
        assert_eq!(
            extract_answer(&json!({"message": {"role": "assistant", "content": "c"}})).as_deref(),
            Some("c")
        );
        assert_eq!(extract_answer(&json!("d")).as_deref(), Some("d"));
        assert_eq!(extract_answer(&json!({"sources": []})), None);
    }

    #[test]
    fn busy_session_rejects_second_question() {
        let mut session = ChatSession::new();
        let pending = session.begin("What is a transit?").unwrap();
        assert!(session.is_busy());
        assert_eq!(session.messages().len(), 1);
        assert_matches!(session.begin("And a secondary eclipse?"), Err(VetError::ChatBusy));

        session.complete(pending, Ok("A dip in flux.".to_string()));
        assert!(!session.is_busy());
        assert_eq!(session.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn failure_becomes_assistant_message() {
        let mut session = ChatSession::new();
        let reply = session.ask(&Down, "hello").unwrap();
        assert!(reply.failed);
        assert_eq!(reply.content, "index is rebuilding");
        assert_eq!(session.messages().len(), 2);
        assert!(!session.is_busy());
    }

    #[test]
    fn timestamps_increase() {
        let mut session = ChatSession::new();
        for question in ["one", "two", "three"] {
            session.ask(&Echo, question).unwrap();
        }
        let stamps: Vec<_> = session.messages().iter().map(|m| m.timestamp).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn blank_question_is_not_recorded() {
        let mut session = ChatSession::new();
        assert_matches!(session.begin("   "), Err(VetError::EmptyQuestion));
        assert!(session.messages().is_empty());
    }
}
