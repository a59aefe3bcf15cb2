//! External message shapes and their conversion to canonical turns

pub mod core;
pub mod flat;
pub mod ui;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    stamp::TurnStamper,
    types::{CONTENT_FORMAT, Turn},
};
use self::{core::CoreMessage, flat::FlatMessage, ui::UiMessage};

/// The shape an input was recognized as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    Canonical,
    LegacyFlat,
    Ui,
    Core,
}

/// Recognize the shape of a raw message.
///
/// Checks run in a fixed order; the first match wins.
pub fn classify(value: &Value) -> Result<InputShape> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::unrecognized("expected a JSON object"))?;

    let content = obj.get("content");
    let format = content.and_then(|c| c.get("format")).and_then(Value::as_u64);
    let has_parts = content
        .and_then(|c| c.get("parts"))
        .is_some_and(Value::is_array);
    if format == Some(u64::from(CONTENT_FORMAT)) && has_parts {
        return Ok(InputShape::Canonical);
    }

    if obj.contains_key("threadId") || obj.contains_key("resourceId") {
        return Ok(InputShape::LegacyFlat);
    }

    // Flat records always carry their record type, even when unbound
    let flat_type = obj.get("type").and_then(Value::as_str);
    if matches!(flat_type, Some("text" | "tool-call" | "tool-result")) && obj.contains_key("role") {
        return Ok(InputShape::LegacyFlat);
    }

    if obj.get("parts").is_some_and(Value::is_array) {
        return Ok(InputShape::Ui);
    }

    if obj.contains_key("role") && obj.contains_key("content") {
        return Ok(InputShape::Core);
    }

    Err(Error::unrecognized(
        "object has neither canonical content, UI parts nor role and content",
    ))
}

/// Any message shape accepted by the conversation list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageInput {
    Canonical(Turn),
    LegacyFlat(FlatMessage),
    Ui(UiMessage),
    Core(CoreMessage),
}

impl MessageInput {
    /// Classify and parse a raw message
    pub fn from_value(value: Value) -> Result<Self> {
        let shape = classify(&value)?;
        let parsed = match shape {
            InputShape::Canonical => serde_json::from_value(value).map(Self::Canonical),
            InputShape::LegacyFlat => serde_json::from_value(value).map(Self::LegacyFlat),
            InputShape::Ui => serde_json::from_value(value).map(Self::Ui),
            InputShape::Core => serde_json::from_value(value).map(Self::Core),
        };
        parsed.map_err(|e| Error::unrecognized(format!("malformed {:?} message: {}", shape, e)))
    }

    /// Id carried by the input, if its shape has one
    pub fn id(&self) -> Option<&str> {
        let id = match self {
            MessageInput::Canonical(turn) => &turn.id,
            MessageInput::LegacyFlat(message) => &message.id,
            MessageInput::Ui(message) => &message.id,
            MessageInput::Core(_) => return None,
        };
        Some(id.as_str()).filter(|id| !id.is_empty())
    }

    /// Thread the input says it belongs to, if its shape records one
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            MessageInput::Canonical(turn) => turn.thread_id.as_deref(),
            MessageInput::LegacyFlat(message) => message.thread_id.as_deref(),
            MessageInput::Ui(_) | MessageInput::Core(_) => None,
        }
    }

    pub fn shape(&self) -> InputShape {
        match self {
            MessageInput::Canonical(_) => InputShape::Canonical,
            MessageInput::LegacyFlat(_) => InputShape::LegacyFlat,
            MessageInput::Ui(_) => InputShape::Ui,
            MessageInput::Core(_) => InputShape::Core,
        }
    }

    /// Convert to a canonical turn
    pub fn into_turn(self, stamper: &mut dyn TurnStamper) -> Result<Turn> {
        match self {
            MessageInput::Canonical(mut turn) => {
                if turn.id.is_empty() {
                    turn.id = stamper.next_id();
                }
                turn.created_at = stamper.created_at(Some(turn.created_at));
                Ok(turn)
            }
            MessageInput::LegacyFlat(message) => message.into_turn(stamper),
            MessageInput::Ui(message) => message.into_turn(stamper),
            MessageInput::Core(message) => message.into_turn(stamper),
        }
    }
}

impl<'de> Deserialize<'de> for MessageInput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        MessageInput::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<Turn> for MessageInput {
    fn from(turn: Turn) -> Self {
        Self::Canonical(turn)
    }
}

impl From<FlatMessage> for MessageInput {
    fn from(message: FlatMessage) -> Self {
        Self::LegacyFlat(message)
    }
}

impl From<UiMessage> for MessageInput {
    fn from(message: UiMessage) -> Self {
        Self::Ui(message)
    }
}

impl From<CoreMessage> for MessageInput {
    fn from(message: CoreMessage) -> Self {
        Self::Core(message)
    }
}

/// Bare text is a user message
impl From<&str> for MessageInput {
    fn from(text: &str) -> Self {
        Self::Core(CoreMessage::user(text))
    }
}

impl From<String> for MessageInput {
    fn from(text: String) -> Self {
        Self::Core(CoreMessage::user(text))
    }
}
