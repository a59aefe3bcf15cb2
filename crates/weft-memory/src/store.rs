//! Storage capability consumed by lists and the save scheduler

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use weft_message::{MessageInput, Turn, turn_to_flat};

/// The (thread, resource) pair a conversation is persisted under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    pub thread_id: String,
    pub resource_id: String,
}

impl ConversationKey {
    pub fn new(thread_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.thread_id)
    }
}

/// Shape turns are written in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageFormat {
    #[default]
    Canonical,
    /// One role per record, for older readers
    LegacyFlat,
}

impl StorageFormat {
    /// Encode turns as storage records for `key`.
    ///
    /// Flat records are written per turn, so every turn keeps its own ids,
    /// and carry the key so they read back as flat records.
    pub fn encode(self, turns: &[Turn], key: &ConversationKey) -> Vec<MessageInput> {
        match self {
            StorageFormat::Canonical => turns.iter().cloned().map(MessageInput::from).collect(),
            StorageFormat::LegacyFlat => turns
                .iter()
                .flat_map(turn_to_flat)
                .map(|mut record| {
                    record.thread_id = Some(key.thread_id.clone());
                    record.resource_id = Some(key.resource_id.clone());
                    MessageInput::from(record)
                })
                .collect(),
        }
    }
}

/// Conversation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Thread {
    pub fn new(id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            resource_id: resource_id.into(),
            title: None,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.id.clone(), self.resource_id.clone())
    }
}

/// Errors reported by a store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread exists under another resource
    #[error("Thread {thread_id} belongs to another resource")]
    ResourceMismatch { thread_id: String },

    /// Backend-specific failure
    #[error("{0}")]
    Backend(String),
}

/// Durable storage for turns and threads.
///
/// Writes must report failure distinctly; callers may retry them, so saving
/// the same turns twice must be safe.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist turns under a conversation key
    async fn save_messages(
        &self,
        turns: &[Turn],
        key: &ConversationKey,
        format: StorageFormat,
    ) -> Result<(), StoreError>;

    /// Stored records for a conversation, oldest first
    async fn load_messages(&self, key: &ConversationKey) -> Result<Vec<MessageInput>, StoreError>;

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError>;

    /// Create or update a thread
    async fn save_thread(&self, thread: Thread) -> Result<Thread, StoreError>;
}

/// Process-local store; records are upserted by id in insertion order
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<ConversationKey, Vec<MessageInput>>>,
    threads: Mutex<HashMap<String, Thread>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records stored for a key
    pub fn records(&self, key: &ConversationKey) -> Vec<MessageInput> {
        self.records.lock().get(key).cloned().unwrap_or_default()
    }
}

/// Replace records sharing an id, append the rest
pub fn upsert_records(stored: &mut Vec<MessageInput>, incoming: Vec<MessageInput>) {
    for record in incoming {
        let existing = record
            .id()
            .and_then(|id| stored.iter().position(|r| r.id() == Some(id)));
        match existing {
            Some(idx) => stored[idx] = record,
            None => stored.push(record),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn save_messages(
        &self,
        turns: &[Turn],
        key: &ConversationKey,
        format: StorageFormat,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        upsert_records(records.entry(key.clone()).or_default(), format.encode(turns, key));
        Ok(())
    }

    async fn load_messages(&self, key: &ConversationKey) -> Result<Vec<MessageInput>, StoreError> {
        Ok(self.records(key))
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.threads.lock().get(thread_id).cloned())
    }

    async fn save_thread(&self, mut thread: Thread) -> Result<Thread, StoreError> {
        let mut threads = self.threads.lock();
        if let Some(existing) = threads.get(&thread.id) {
            if existing.resource_id != thread.resource_id {
                return Err(StoreError::ResourceMismatch {
                    thread_id: thread.id,
                });
            }
            thread.created_at = existing.created_at;
        }
        thread.updated_at = Utc::now();
        threads.insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }
}
