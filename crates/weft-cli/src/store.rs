//! JSONL file store: one append-only file per thread

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use weft_memory::{ConversationKey, MessageStore, StorageFormat, StoreError, Thread};
use weft_message::{MessageInput, Turn};

/// Entry types for the JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEntry {
    /// Thread metadata; the latest entry wins
    Thread { thread: Thread },
    /// A stored record; later records replace earlier ones with the same id
    Message {
        message: MessageInput,
        timestamp: i64,
    },
}

/// Store writing `<root>/<thread>.jsonl`
#[derive(Debug, Clone)]
pub struct JsonlStore {
    root: PathBuf,
}

impl JsonlStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path of the file holding a thread; distinct ids never share a file
    pub fn thread_path(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", urlencoding::encode(thread_id)))
    }

    async fn read_entries(&self, thread_id: &str) -> Result<Vec<StoreEntry>, StoreError> {
        let path = self.thread_path(thread_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "Skipping unreadable entry"
                ),
            }
        }
        Ok(entries)
    }

    async fn append(&self, thread_id: &str, entries: &[StoreEntry]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.thread_path(thread_id))
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Fail if the thread is recorded under another resource
    async fn check_resource(&self, key: &ConversationKey) -> Result<(), StoreError> {
        match self.get_thread(&key.thread_id).await? {
            Some(thread) if thread.resource_id != key.resource_id => {
                Err(StoreError::ResourceMismatch {
                    thread_id: key.thread_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MessageStore for JsonlStore {
    async fn save_messages(
        &self,
        turns: &[Turn],
        key: &ConversationKey,
        format: StorageFormat,
    ) -> Result<(), StoreError> {
        self.check_resource(key).await?;

        let timestamp = chrono::Utc::now().timestamp_millis();
        let entries: Vec<StoreEntry> = format
            .encode(turns, key)
            .into_iter()
            .map(|message| StoreEntry::Message { message, timestamp })
            .collect();
        tracing::debug!(key = %key, records = entries.len(), "Appending records");
        self.append(&key.thread_id, &entries).await
    }

    async fn load_messages(&self, key: &ConversationKey) -> Result<Vec<MessageInput>, StoreError> {
        self.check_resource(key).await?;

        let mut records = Vec::new();
        for entry in self.read_entries(&key.thread_id).await? {
            let StoreEntry::Message { message, .. } = entry else {
                continue;
            };
            // Records bound to another thread do not belong to this file
            if message.thread_id().is_some_and(|id| id != key.thread_id) {
                tracing::warn!(key = %key, id = ?message.id(), "Skipping record of another thread");
                continue;
            }
            weft_memory::store::upsert_records(&mut records, vec![message]);
        }
        Ok(records)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let latest = self
            .read_entries(thread_id)
            .await?
            .into_iter()
            .filter_map(|entry| match entry {
                StoreEntry::Thread { thread } if thread.id == thread_id => Some(thread),
                _ => None,
            })
            .last();
        Ok(latest)
    }

    async fn save_thread(&self, mut thread: Thread) -> Result<Thread, StoreError> {
        if let Some(existing) = self.get_thread(&thread.id).await? {
            if existing.resource_id != thread.resource_id {
                return Err(StoreError::ResourceMismatch {
                    thread_id: thread.id,
                });
            }
            thread.created_at = existing.created_at;
        }
        thread.updated_at = chrono::Utc::now();
        self.append(
            &thread.id,
            &[StoreEntry::Thread {
                thread: thread.clone(),
            }],
        )
        .await?;
        Ok(thread)
    }
}
