//! Chat session management
//!
//! Each session keeps a bounded conversation history that is fed into answer
//! generation, plus the corpus the session last selected.
use crate::error::{RagError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded message buffer; the oldest message is evicted first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
}

impl ConversationHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    /// Record one question/answer pair
    pub fn push_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.push(ChatMessage::user(question));
        self.push(ChatMessage::assistant(answer));
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Render messages as `User: ...` / `Assistant: ...` lines
pub fn render_history(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            Role::User => format!("User: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One client conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    /// Corpus chosen with `select_corpus`, if any
    pub corpus_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub history: ConversationHistory,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, max_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            corpus_id: None,
            started_at: now,
            last_active: now,
            history: ConversationHistory::new(max_messages),
        }
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// Concurrent in-memory session store
pub struct SessionManager {
    sessions: DashMap<String, ChatSession>,
    max_messages: usize,
}

impl SessionManager {
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_messages,
        }
    }

    /// Return the id of an existing or newly created session
    pub fn get_or_create(&self, id: Option<&str>) -> String {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.sessions
            .entry(id.clone())
            .or_insert_with(|| ChatSession::new(id.clone(), self.max_messages))
            .touch();
        id
    }

    /// Snapshot of the session's history; empty for unknown sessions
    pub fn history(&self, id: &str) -> Vec<ChatMessage> {
        self.sessions
            .get(id)
            .map(|s| s.history.messages())
            .unwrap_or_default()
    }

    pub fn record_turn(&self, id: &str, question: &str, answer: &str) {
        let mut session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(id, self.max_messages));
        session.history.push_turn(question, answer);
        session.touch();
    }

    /// Bind the session to a corpus and start a fresh conversation
    pub fn select_corpus(&self, id: &str, corpus_id: &str) {
        let mut session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| ChatSession::new(id, self.max_messages));
        session.corpus_id = Some(corpus_id.to_string());
        session.history.clear();
        session.touch();
    }

    pub fn corpus_of(&self, id: &str) -> Option<String> {
        self.sessions.get(id).and_then(|s| s.corpus_id.clone())
    }

    pub fn clear(&self, id: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| RagError::SessionNotFound { id: id.to_string() })?;
        session.history.clear();
        session.touch();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<ChatSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_fifo_bounded() {
        let mut history = ConversationHistory::new(20);
        for turn in 0..11 {
            history.push_turn(format!("q{}", turn), format!("a{}", turn));
        }

        assert_eq!(history.len(), 20);
        let messages = history.messages();
        assert_eq!(messages[0], ChatMessage::user("q1"));
        assert_eq!(messages[19], ChatMessage::assistant("a10"));
    }

    #[test]
    fn test_render_history() {
        let rendered = render_history(&[ChatMessage::user("hi"), ChatMessage::assistant("hello")]);
        assert_eq!(rendered, "User: hi\nAssistant: hello");
        assert_eq!(render_history(&[]), "");
    }

    #[test]
    fn test_select_corpus_resets_history() {
        let manager = SessionManager::new(20);
        let id = manager.get_or_create(None);
        manager.record_turn(&id, "q", "a");
        assert_eq!(manager.history(&id).len(), 2);

        manager.select_corpus(&id, "papers");
        assert!(manager.history(&id).is_empty());
        assert_eq!(manager.corpus_of(&id).as_deref(), Some("papers"));
    }

    #[test]
    fn test_clear_unknown_session() {
        let manager = SessionManager::new(20);
        assert!(matches!(
            manager.clear("ghost"),
            Err(RagError::SessionNotFound { .. })
        ));
    }
}
