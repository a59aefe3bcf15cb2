//! weft-memory: Conversation history, persistence scheduling and pipelines
//!
//! This crate provides the message list that merges incoming turns into an
//! ordered history, the scheduler that persists it, and the runner for
//! processor pipelines over new turns.

pub mod clock;
pub mod error;
pub mod message_list;
pub mod processor;
pub mod save_queue;
pub mod store;

pub use clock::Clock;
pub use error::{Error, Result};
pub use message_list::{MessageList, MessageSource, SystemMessage};
pub use processor::{Processor, ProcessorError, ProcessorRunner, Tripwire};
pub use save_queue::{SaveConfig, SaveScheduler, SharedMessageList};
pub use store::{
    ConversationKey, InMemoryStore, MessageStore, StorageFormat, StoreError, Thread,
};
