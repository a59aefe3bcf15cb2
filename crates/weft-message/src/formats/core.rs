//! Provider-neutral core messages

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    payload::{DataContent, FilePayload},
    stamp::TurnStamper,
    types::{Attachment, Part, ReasoningDetail, Role, ToolInvocation, Turn, TurnContent},
};

/// Media type used when neither the part nor a data URL declares one
pub(crate) const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Roles of provider-neutral messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content: a bare string or typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoreContent {
    Text(String),
    Parts(Vec<CorePart>),
}

/// Content parts of provider-neutral messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CorePart {
    Text {
        text: String,
    },
    Image {
        image: DataContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    File {
        data: DataContent,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    Reasoning {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedReasoning {
        data: String,
    },
}

impl CorePart {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool call part
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self::ToolCall {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        }
    }

    /// Create a tool result part
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            result,
            is_error: false,
        }
    }

    /// Create a file part
    pub fn file(data: impl Into<DataContent>, mime_type: impl Into<String>) -> Self {
        Self::File {
            data: data.into(),
            mime_type: mime_type.into(),
            filename: None,
        }
    }
}

/// A provider-neutral message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreMessage {
    pub role: CoreRole,
    pub content: CoreContent,
}

impl CoreMessage {
    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: CoreRole::User,
            content: CoreContent::Text(text.into()),
        }
    }

    /// Create an assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: CoreRole::Assistant,
            content: CoreContent::Text(text.into()),
        }
    }

    /// Create a message from parts
    pub fn with_parts(role: CoreRole, parts: Vec<CorePart>) -> Self {
        Self {
            role,
            content: CoreContent::Parts(parts),
        }
    }

    /// Convert to a canonical turn
    pub fn into_turn(self, stamper: &mut dyn TurnStamper) -> Result<Turn> {
        let role = canonical_role(self.role)?;
        let (parts, attachments) = convert_content(self.content)?;
        let mut turn = Turn::new(stamper.next_id(), role, stamper.created_at(None), parts);
        turn.content.attachments = non_empty(attachments);
        Ok(turn)
    }
}

/// Tool results fold into the assistant turn; system content is refused
pub(crate) fn canonical_role(role: CoreRole) -> Result<Role> {
    match role {
        CoreRole::System => Err(Error::SystemMessage),
        CoreRole::User => Ok(Role::User),
        CoreRole::Assistant | CoreRole::Tool => Ok(Role::Assistant),
    }
}

pub(crate) fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

/// Walk provider parts into canonical parts plus out-of-band attachments
pub(crate) fn convert_content(content: CoreContent) -> Result<(Vec<Part>, Vec<Attachment>)> {
    let parts = match content {
        CoreContent::Text(text) => return Ok((vec![Part::StepStart, Part::text(text)], vec![])),
        CoreContent::Parts(parts) => parts,
    };

    let mut out = Vec::with_capacity(parts.len());
    let mut attachments = Vec::new();

    for part in parts {
        match part {
            CorePart::Text { text } => out.push(Part::text(text)),
            CorePart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => out.push(Part::tool_invocation(ToolInvocation::call(
                tool_call_id,
                tool_name,
                args,
            ))),
            CorePart::ToolResult {
                tool_call_id,
                tool_name,
                result,
                ..
            } => out.push(Part::tool_invocation(ToolInvocation::result(
                tool_call_id,
                tool_name,
                result,
            ))),
            CorePart::Reasoning { text, signature } => {
                push_reasoning(&mut out, ReasoningDetail::Text { text, signature })
            }
            CorePart::RedactedReasoning { data } => {
                push_reasoning(&mut out, ReasoningDetail::Redacted { data })
            }
            CorePart::Image { image, mime_type } => {
                push_file(&mut out, &mut attachments, &image, mime_type)?
            }
            CorePart::File {
                data, mime_type, ..
            } => push_file(&mut out, &mut attachments, &data, Some(mime_type))?,
        }
    }

    Ok((out, attachments))
}

/// Consecutive reasoning blocks collapse into one reasoning part
fn push_reasoning(out: &mut Vec<Part>, detail: ReasoningDetail) {
    if let Some(Part::Reasoning { reasoning, details }) = out.last_mut() {
        if let ReasoningDetail::Text { text, .. } = &detail {
            reasoning.push_str(text);
        }
        details.push(detail);
        return;
    }

    let reasoning = match &detail {
        ReasoningDetail::Text { text, .. } => text.clone(),
        ReasoningDetail::Redacted { .. } => String::new(),
    };
    out.push(Part::Reasoning {
        reasoning,
        details: vec![detail],
    });
}

fn push_file(
    out: &mut Vec<Part>,
    attachments: &mut Vec<Attachment>,
    data: &DataContent,
    mime_type: Option<String>,
) -> Result<()> {
    match FilePayload::classify(data)? {
        FilePayload::Inline {
            data,
            mime_type: declared,
        } => out.push(Part::File {
            mime_type: mime_type
                .or(declared)
                .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string()),
            data,
        }),
        FilePayload::Reference { url } => attachments.push(Attachment::new(url, mime_type)),
    }
    Ok(())
}

/// Build canonical content from converted parts
pub(crate) fn content_from(parts: Vec<Part>, attachments: Vec<Attachment>) -> TurnContent {
    let mut content = TurnContent::new(parts);
    content.attachments = non_empty(attachments);
    content
}
