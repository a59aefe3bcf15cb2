//! Canonical conversation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version tag carried by every canonical content payload
pub const CONTENT_FORMAT: u8 = 2;

/// Roles a canonical turn can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Lifecycle state of a tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// The model asked for the tool; no result yet
    Call,
    /// The result has been merged into the call
    Result,
}

impl ToolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolState::Call => "call",
            ToolState::Result => "result",
        }
    }
}

/// A tool call and, once resolved, its result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub state: ToolState,
    /// Logical response step that issued the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ToolInvocation {
    /// Create an unresolved call
    pub fn call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            state: ToolState::Call,
            step: None,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
            result: None,
        }
    }

    /// Create a resolved invocation. Args are unknown until merged into its call.
    pub fn result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self {
            state: ToolState::Result,
            step: None,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args: serde_json::Value::Object(Default::default()),
            result: Some(result),
        }
    }

    /// Set the step number
    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.state == ToolState::Result
    }

    /// Move this call to the result state. Args and step stay as issued.
    pub fn resolve(&mut self, result: Option<serde_json::Value>) {
        self.state = ToolState::Result;
        self.result = result;
    }
}

/// One entry in a reasoning part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReasoningDetail {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Provider-encrypted reasoning, carried opaquely
    Redacted { data: String },
}

/// Content fragments of a canonical turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Text content
    Text { text: String },
    /// Marks the start of a new response step
    StepStart,
    /// Tool call, resolved in place when its result arrives
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    /// Reasoning summary and its detail blocks
    Reasoning {
        reasoning: String,
        #[serde(default)]
        details: Vec<ReasoningDetail>,
    },
    /// Inline file (base64 encoded)
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool invocation part
    pub fn tool_invocation(tool_invocation: ToolInvocation) -> Self {
        Self::ToolInvocation { tool_invocation }
    }

    /// Create a reasoning part from a single signed text block
    pub fn reasoning(text: impl Into<String>, signature: Option<String>) -> Self {
        let text = text.into();
        Self::Reasoning {
            reasoning: text.clone(),
            details: vec![ReasoningDetail::Text { text, signature }],
        }
    }

    /// Create a reasoning part holding redacted data only
    pub fn redacted_reasoning(data: impl Into<String>) -> Self {
        Self::Reasoning {
            reasoning: String::new(),
            details: vec![ReasoningDetail::Redacted { data: data.into() }],
        }
    }

    /// Create an inline file part from base64 data
    pub fn file(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::File {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// The wire tag of this part
    pub fn kind(&self) -> &'static str {
        match self {
            Part::Text { .. } => "text",
            Part::StepStart => "step-start",
            Part::ToolInvocation { .. } => "tool-invocation",
            Part::Reasoning { .. } => "reasoning",
            Part::File { .. } => "file",
        }
    }

    /// Get text if this is a text part
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_invocation(&self) -> Option<&ToolInvocation> {
        match self {
            Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
            _ => None,
        }
    }

    pub fn is_step_start(&self) -> bool {
        matches!(self, Part::StepStart)
    }

    /// Fingerprint fragment: the type plus its salient length or identifier
    fn fingerprint_into(&self, out: &mut String) {
        out.push_str(self.kind());
        match self {
            Part::Text { text } => out.push_str(&format!(":{}", text.len())),
            Part::StepStart => {}
            Part::ToolInvocation { tool_invocation } => out.push_str(&format!(
                ":{}:{}",
                tool_invocation.tool_call_id,
                tool_invocation.state.as_str()
            )),
            Part::Reasoning { reasoning, details } => {
                out.push_str(&format!(":{}:{}", reasoning.len(), details.len()))
            }
            Part::File { mime_type, data } => {
                out.push_str(&format!(":{}:{}", mime_type, data.len()))
            }
        }
        out.push('|');
    }
}

/// A file shipped by reference instead of inline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Attachment {
    pub fn new(url: impl Into<String>, content_type: Option<String>) -> Self {
        Self {
            url: url.into(),
            content_type,
            name: None,
        }
    }
}

/// Version-tagged payload of a canonical turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnContent {
    /// Always [`CONTENT_FORMAT`] for this generation
    pub format: u8,
    /// Ordered parts; the source of truth
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(
        default,
        rename = "experimental_attachments",
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<Vec<Attachment>>,
    /// Flattened text kept for older flat-text consumers
    #[serde(default, rename = "content", skip_serializing_if = "Option::is_none")]
    pub legacy_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Vec<ToolInvocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Default for TurnContent {
    fn default() -> Self {
        Self::new(vec![])
    }
}

impl TurnContent {
    /// Create a payload holding only parts
    pub fn new(parts: Vec<Part>) -> Self {
        Self {
            format: CONTENT_FORMAT,
            parts,
            attachments: None,
            legacy_text: None,
            tool_invocations: None,
            reasoning: None,
            annotations: None,
            metadata: None,
        }
    }
}

/// A canonical conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub content: TurnContent,
}

/// Structural identity of a turn, used to tell corrections from repeats
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnFingerprint {
    role: Role,
    created_at_secs: i64,
    parts: String,
}

impl Turn {
    /// Create a turn from parts
    pub fn new(
        id: impl Into<String>,
        role: Role,
        created_at: DateTime<Utc>,
        parts: Vec<Part>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            created_at,
            thread_id: None,
            resource_id: None,
            content: TurnContent::new(parts),
        }
    }

    pub fn parts(&self) -> &[Part] {
        &self.content.parts
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.content
            .parts
            .iter()
            .filter_map(|p| p.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Text a UI shows for this turn: the legacy mirror when set, else the
    /// last text part (a streaming UI keeps replacing its visible content).
    pub fn display_text(&self) -> String {
        if let Some(text) = self.content.legacy_text.as_deref().filter(|t| !t.is_empty()) {
            return text.to_string();
        }
        self.content
            .parts
            .iter()
            .rev()
            .find_map(|p| p.as_text())
            .unwrap_or_default()
            .to_string()
    }

    /// All tool invocations in part order
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.content.parts.iter().filter_map(|p| p.as_tool_invocation())
    }

    /// Find the invocation part for a tool call id
    pub fn tool_invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.content.parts.iter_mut().find_map(|p| match p {
            Part::ToolInvocation { tool_invocation }
                if tool_invocation.tool_call_id == tool_call_id =>
            {
                Some(tool_invocation)
            }
            _ => None,
        })
    }

    /// Compute the structural fingerprint
    pub fn fingerprint(&self) -> TurnFingerprint {
        let mut parts = String::new();
        for part in &self.content.parts {
            part.fingerprint_into(&mut parts);
        }
        TurnFingerprint {
            role: self.role,
            created_at_secs: (self.created_at.timestamp_millis() + 500).div_euclid(1000),
            parts,
        }
    }

    /// Role, rounded timestamp and part structure all match
    pub fn content_eq(&self, other: &Turn) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}
