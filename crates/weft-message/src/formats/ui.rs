//! UI-rendering messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    stamp::TurnStamper,
    types::{Attachment, Part, Role, ToolInvocation, Turn},
};

/// Roles of UI messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRole {
    System,
    User,
    Assistant,
}

impl From<Role> for UiRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => UiRole::User,
            Role::Assistant => UiRole::Assistant,
        }
    }
}

/// A message as a chat UI renders it: visible text plus typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
    #[serde(default)]
    pub id: String,
    pub role: UiRole,
    /// Visible text
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_invocations: Option<Vec<ToolInvocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<serde_json::Value>>,
    #[serde(
        default,
        rename = "experimental_attachments",
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<Vec<Attachment>>,
}

impl UiMessage {
    /// Create a UI message from parts
    pub fn new(id: impl Into<String>, role: UiRole, parts: Vec<Part>) -> Self {
        Self {
            id: id.into(),
            role,
            content: String::new(),
            created_at: None,
            parts,
            tool_invocations: None,
            reasoning: None,
            annotations: None,
            attachments: None,
        }
    }

    /// Convert to a canonical turn. Parts carry over verbatim.
    pub fn into_turn(self, stamper: &mut dyn TurnStamper) -> Result<Turn> {
        let role = match self.role {
            UiRole::System => return Err(Error::SystemMessage),
            UiRole::User => Role::User,
            UiRole::Assistant => Role::Assistant,
        };

        let mut parts = self.parts;
        if parts.is_empty() && !self.content.is_empty() {
            parts.push(Part::text(self.content.clone()));
        }

        let id = if self.id.is_empty() {
            stamper.next_id()
        } else {
            self.id
        };
        let mut turn = Turn::new(id, role, stamper.created_at(self.created_at), parts);

        // Only keep the visible text when the parts can't reproduce it
        if !self.content.is_empty() && self.content != turn.display_text() {
            turn.content.legacy_text = Some(self.content);
        }
        turn.content.tool_invocations = self.tool_invocations.filter(|v| !v.is_empty());
        turn.content.reasoning = self.reasoning.filter(|r| !r.is_empty());
        turn.content.annotations = self.annotations.filter(|a| !a.is_empty());
        turn.content.attachments = self.attachments.filter(|a| !a.is_empty());

        Ok(turn)
    }
}

/// Project a canonical turn for rendering
pub fn turn_to_ui(turn: &Turn) -> UiMessage {
    UiMessage {
        id: turn.id.clone(),
        role: turn.role.into(),
        content: turn.display_text(),
        created_at: Some(turn.created_at),
        parts: turn.content.parts.clone(),
        tool_invocations: turn.content.tool_invocations.clone(),
        reasoning: turn.content.reasoning.clone(),
        annotations: turn.content.annotations.clone(),
        attachments: turn.content.attachments.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::DefaultStamper;
    use crate::types::{ReasoningDetail, ToolInvocation};
    use chrono::TimeZone;
    use serde_json::json;

    fn every_part_kind() -> Vec<Part> {
        let mut resolved = ToolInvocation::call("t1", "sum", json!({"a": 1, "b": 2})).with_step(0);
        resolved.resolve(Some(json!(3)));
        vec![
            Part::StepStart,
            Part::Reasoning {
                reasoning: "think".into(),
                details: vec![
                    ReasoningDetail::Text {
                        text: "think".into(),
                        signature: Some("sig".into()),
                    },
                    ReasoningDetail::Redacted {
                        data: "opaque".into(),
                    },
                ],
            },
            Part::text("calling"),
            Part::tool_invocation(resolved),
            Part::file("image/png", "AQID"),
            Part::text("done"),
        ]
    }

    #[test]
    fn test_round_trip_preserves_turn() {
        let mut turn = Turn::new(
            "m1",
            Role::Assistant,
            Utc.timestamp_millis_opt(5_000).unwrap(),
            every_part_kind(),
        );
        turn.content.attachments = Some(vec![Attachment::new(
            "https://example.com/a.png",
            Some("image/png".into()),
        )]);

        let ui = turn_to_ui(&turn);
        assert_eq!(ui.content, "done");

        let back = ui.into_turn(&mut DefaultStamper).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn test_round_trip_keeps_distinct_legacy_text() {
        let mut turn = Turn::new(
            "m1",
            Role::User,
            Utc.timestamp_millis_opt(0).unwrap(),
            vec![Part::text("hello")],
        );
        turn.content.legacy_text = Some("hello (edited)".into());
        let back = turn_to_ui(&turn).into_turn(&mut DefaultStamper).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn test_content_only_message_gets_text_part() {
        let mut msg = UiMessage::new("m1", UiRole::User, vec![]);
        msg.content = "hello".into();
        let turn = msg.into_turn(&mut DefaultStamper).unwrap();
        assert_eq!(turn.parts(), &[Part::text("hello")]);
        assert!(turn.content.legacy_text.is_none());
    }

    #[test]
    fn test_empty_mirrors_are_dropped() {
        let mut msg = UiMessage::new("m1", UiRole::Assistant, vec![Part::text("x")]);
        msg.tool_invocations = Some(vec![]);
        msg.reasoning = Some(String::new());
        msg.annotations = Some(vec![]);
        msg.attachments = Some(vec![]);
        let turn = msg.into_turn(&mut DefaultStamper).unwrap();
        assert!(turn.content.tool_invocations.is_none());
        assert!(turn.content.reasoning.is_none());
        assert!(turn.content.annotations.is_none());
        assert!(turn.content.attachments.is_none());
    }

    #[test]
    fn test_system_role_rejected() {
        let msg = UiMessage::new("s1", UiRole::System, vec![Part::text("rules")]);
        assert!(matches!(
            msg.into_turn(&mut DefaultStamper),
            Err(Error::SystemMessage)
        ));
    }

    #[test]
    fn test_missing_id_is_generated() {
        let msg = UiMessage::new("", UiRole::User, vec![Part::text("hi")]);
        let turn = msg.into_turn(&mut DefaultStamper).unwrap();
        assert!(!turn.id.is_empty());
    }
}
