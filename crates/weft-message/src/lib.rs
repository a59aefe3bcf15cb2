//! weft-message: Canonical conversation turns and format conversion
//!
//! This crate defines the canonical turn representation used by the rest of
//! weft and converts it to and from the external message shapes it meets:
//! provider-neutral core messages, UI-rendering messages and legacy flat
//! storage records.

pub mod error;
pub mod formats;
pub mod payload;
pub mod stamp;
pub mod types;

pub use error::{Error, Result};
pub use formats::{
    InputShape, MessageInput, classify,
    core::{CoreContent, CoreMessage, CorePart, CoreRole},
    flat::{FlatKind, FlatMessage, turn_to_flat, turns_to_core, turns_to_flat},
    ui::{UiMessage, UiRole, turn_to_ui},
};
pub use payload::{DataContent, FilePayload};
pub use stamp::{DefaultStamper, TurnStamper};
pub use types::*;
