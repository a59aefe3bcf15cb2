//! Legacy flat storage records
//!
//! Older storage keeps one role per record: an assistant turn that called
//! tools is stored as an assistant record with the calls followed by a
//! `tool` record with their results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::core::{
    CoreContent, CoreMessage, CorePart, CoreRole, FALLBACK_MIME_TYPE, canonical_role, content_from,
    convert_content,
};
use crate::{
    error::Result,
    payload::DataContent,
    stamp::TurnStamper,
    types::{Part, ReasoningDetail, Role, ToolInvocation, Turn},
};

/// What a flat record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlatKind {
    #[default]
    Text,
    ToolCall,
    ToolResult,
}

/// A legacy flat storage record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMessage {
    #[serde(default)]
    pub id: String,
    pub role: CoreRole,
    pub content: CoreContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FlatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_args: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_names: Option<Vec<String>>,
}

impl FlatMessage {
    /// Convert to a canonical turn, keeping the record's identity fields
    pub fn into_turn(self, stamper: &mut dyn TurnStamper) -> Result<Turn> {
        let role = canonical_role(self.role)?;
        let (parts, attachments) = convert_content(self.content)?;
        let id = if self.id.is_empty() {
            stamper.next_id()
        } else {
            self.id
        };
        Ok(Turn {
            id,
            role,
            created_at: stamper.created_at(self.created_at),
            thread_id: self.thread_id,
            resource_id: self.resource_id,
            content: content_from(parts, attachments),
        })
    }

    /// Drop storage identity, keeping role and content
    pub fn into_core(self) -> CoreMessage {
        CoreMessage {
            role: self.role,
            content: self.content,
        }
    }

    fn record_tool_calls(&mut self, calls: &[&ToolInvocation]) {
        if calls.is_empty() {
            return;
        }
        self.kind = FlatKind::ToolCall;
        self.tool_call_ids
            .get_or_insert_with(Vec::new)
            .extend(calls.iter().map(|c| c.tool_call_id.clone()));
        self.tool_call_args
            .get_or_insert_with(Vec::new)
            .extend(calls.iter().map(|c| c.args.clone()));
        self.tool_names
            .get_or_insert_with(Vec::new)
            .extend(calls.iter().map(|c| c.tool_name.clone()));
    }
}

/// Flatten one turn into legacy records
pub fn turn_to_flat(turn: &Turn) -> Vec<FlatMessage> {
    let mut flattener = Flattener::new(turn);
    match turn.role {
        Role::User => flattener.user(),
        Role::Assistant => flattener.assistant(),
    }
    flattener.records
}

/// Flatten a history, combining adjacent records of the same role
pub fn turns_to_flat(turns: &[Turn]) -> Vec<FlatMessage> {
    let mut out = Vec::new();
    for turn in turns {
        for record in turn_to_flat(turn) {
            push_or_combine(&mut out, record);
        }
    }
    out
}

/// Provider-neutral projection of a history
pub fn turns_to_core(turns: &[Turn]) -> Vec<CoreMessage> {
    turns_to_flat(turns)
        .into_iter()
        .map(FlatMessage::into_core)
        .collect()
}

/// Records after an assistant tool-call record keep the call/result framing
fn can_combine(prev: &FlatMessage, next: &FlatMessage) -> bool {
    prev.role == next.role
        && !(next.role == CoreRole::Assistant && prev.kind == FlatKind::ToolCall)
        && matches!(prev.content, CoreContent::Parts(_))
        && matches!(next.content, CoreContent::Parts(_))
}

fn push_or_combine(out: &mut Vec<FlatMessage>, record: FlatMessage) {
    match out.last_mut() {
        Some(prev) if can_combine(prev, &record) => combine_into(prev, record),
        _ => out.push(record),
    }
}

fn combine_into(prev: &mut FlatMessage, record: FlatMessage) {
    if let (CoreContent::Parts(into), CoreContent::Parts(parts)) = (&mut prev.content, record.content)
    {
        into.extend(parts);
    }
    if record.kind != FlatKind::Text {
        prev.kind = record.kind;
    }
    if let Some(ids) = record.tool_call_ids {
        prev.tool_call_ids.get_or_insert_with(Vec::new).extend(ids);
    }
    if let Some(args) = record.tool_call_args {
        prev.tool_call_args.get_or_insert_with(Vec::new).extend(args);
    }
    if let Some(names) = record.tool_names {
        prev.tool_names.get_or_insert_with(Vec::new).extend(names);
    }
}

struct Flattener<'a> {
    turn: &'a Turn,
    records: Vec<FlatMessage>,
    emitted: usize,
}

impl<'a> Flattener<'a> {
    fn new(turn: &'a Turn) -> Self {
        Self {
            turn,
            records: Vec::new(),
            emitted: 0,
        }
    }

    fn record(&mut self, role: CoreRole, content: CoreContent, kind: FlatKind) -> FlatMessage {
        let id = if self.emitted == 0 {
            self.turn.id.clone()
        } else {
            format!("{}__{}", self.turn.id, self.emitted)
        };
        self.emitted += 1;
        FlatMessage {
            id,
            role,
            content,
            created_at: Some(self.turn.created_at),
            thread_id: self.turn.thread_id.clone(),
            resource_id: self.turn.resource_id.clone(),
            kind,
            tool_call_ids: None,
            tool_call_args: None,
            tool_names: None,
        }
    }

    fn user(&mut self) {
        let turn = self.turn;
        let parts = turn.parts();
        let texts: Vec<&str> = parts.iter().filter_map(|p| p.as_text()).collect();
        let only_text = parts.iter().all(|p| p.as_text().is_some() || p.is_step_start());
        let attachments = turn.content.attachments.as_deref().unwrap_or_default();

        let content = if only_text && texts.len() <= 1 && attachments.is_empty() {
            let text = texts
                .first()
                .map(|t| t.to_string())
                .unwrap_or_else(|| turn.display_text());
            CoreContent::Text(text)
        } else {
            let mut out: Vec<CorePart> = parts.iter().flat_map(core_parts).collect();
            out.extend(attachments.iter().map(|a| CorePart::File {
                data: DataContent::Text(a.url.clone()),
                mime_type: a
                    .content_type
                    .clone()
                    .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string()),
                filename: a.name.clone(),
            }));
            CoreContent::Parts(out)
        };

        let record = self.record(CoreRole::User, content, FlatKind::Text);
        self.records.push(record);
    }

    fn assistant(&mut self) {
        let turn = self.turn;
        let mut block: Vec<&Part> = Vec::new();
        let mut block_has_tools = false;
        let mut current_step = 0;

        for part in turn.parts() {
            match part {
                Part::StepStart => {}
                Part::Text { .. } => {
                    // Text must precede the calls it textually precedes
                    if block_has_tools {
                        self.flush(&mut block);
                        block_has_tools = false;
                    }
                    block.push(part);
                }
                Part::File { .. } | Part::Reasoning { .. } => block.push(part),
                Part::ToolInvocation { tool_invocation } => {
                    let step = tool_invocation.step.unwrap_or(0);
                    if step != current_step {
                        self.flush(&mut block);
                    }
                    block.push(part);
                    block_has_tools = true;
                    current_step = step;
                }
            }
        }
        self.flush(&mut block);

        if self.records.is_empty() {
            if let Some(text) = turn.content.legacy_text.as_deref().filter(|t| !t.is_empty()) {
                tracing::debug!(id = %turn.id, "Assistant turn has no parts, storing its legacy text");
                let record = self.record(
                    CoreRole::Assistant,
                    CoreContent::Parts(vec![CorePart::text(text)]),
                    FlatKind::Text,
                );
                self.records.push(record);
            }
        }
    }

    fn flush(&mut self, block: &mut Vec<&Part>) {
        if block.is_empty() {
            return;
        }

        let calls: Vec<&ToolInvocation> =
            block.iter().filter_map(|p| p.as_tool_invocation()).collect();
        let content = block.iter().flat_map(|p| core_parts(p)).collect();
        let mut assistant = self.record(CoreRole::Assistant, CoreContent::Parts(content), FlatKind::Text);
        assistant.record_tool_calls(&calls);
        push_or_combine(&mut self.records, assistant);

        let results: Vec<CorePart> = calls
            .iter()
            .filter(|c| c.is_resolved())
            .map(|c| CorePart::ToolResult {
                tool_call_id: c.tool_call_id.clone(),
                tool_name: c.tool_name.clone(),
                result: c.result.clone().unwrap_or(serde_json::Value::Null),
                is_error: false,
            })
            .collect();
        if !results.is_empty() {
            let mut tool = self.record(CoreRole::Tool, CoreContent::Parts(results), FlatKind::ToolResult);
            tool.tool_call_ids = Some(
                calls
                    .iter()
                    .filter(|c| c.is_resolved())
                    .map(|c| c.tool_call_id.clone())
                    .collect(),
            );
            push_or_combine(&mut self.records, tool);
        }

        block.clear();
    }
}

/// Provider parts for one canonical part
fn core_parts(part: &Part) -> Vec<CorePart> {
    match part {
        Part::Text { text } => vec![CorePart::text(text.clone())],
        Part::StepStart => vec![],
        Part::File { mime_type, data } => vec![CorePart::file(data.clone(), mime_type.clone())],
        Part::ToolInvocation { tool_invocation } => vec![CorePart::tool_call(
            tool_invocation.tool_call_id.clone(),
            tool_invocation.tool_name.clone(),
            tool_invocation.args.clone(),
        )],
        Part::Reasoning { reasoning, details } if details.is_empty() => vec![CorePart::Reasoning {
            text: reasoning.clone(),
            signature: None,
        }],
        Part::Reasoning { details, .. } => details
            .iter()
            .map(|d| match d {
                ReasoningDetail::Text { text, signature } => CorePart::Reasoning {
                    text: text.clone(),
                    signature: signature.clone(),
                },
                ReasoningDetail::Redacted { data } => CorePart::RedactedReasoning { data: data.clone() },
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stamp::DefaultStamper;
    use crate::types::Attachment;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn call(id: &str, step: Option<u32>, result: Option<serde_json::Value>) -> Part {
        let mut inv = ToolInvocation::call(id, "sum", json!({"id": id}));
        inv.step = step;
        if result.is_some() {
            inv.resolve(result);
        }
        Part::tool_invocation(inv)
    }

    fn assistant(parts: Vec<Part>) -> Turn {
        Turn::new("a1", Role::Assistant, at(1_000), parts)
    }

    fn roles(records: &[FlatMessage]) -> Vec<CoreRole> {
        records.iter().map(|r| r.role).collect()
    }

    fn part_count(record: &FlatMessage) -> usize {
        match &record.content {
            CoreContent::Parts(parts) => parts.len(),
            CoreContent::Text(_) => 1,
        }
    }

    #[test]
    fn test_text_call_result_text() {
        let turn = assistant(vec![
            Part::StepStart,
            Part::text("calling tool"),
            call("t1", None, Some(json!(42))),
            Part::text("done"),
        ]);
        let records = turn_to_flat(&turn);
        assert_eq!(
            roles(&records),
            vec![CoreRole::Assistant, CoreRole::Tool, CoreRole::Assistant]
        );

        assert_eq!(records[0].id, "a1");
        assert_eq!(records[0].kind, FlatKind::ToolCall);
        assert_eq!(records[0].tool_call_ids.as_deref(), Some(&["t1".to_string()][..]));
        assert_eq!(
            records[0].content,
            CoreContent::Parts(vec![
                CorePart::text("calling tool"),
                CorePart::tool_call("t1", "sum", json!({"id": "t1"})),
            ])
        );

        assert_eq!(records[1].id, "a1__1");
        assert_eq!(records[1].kind, FlatKind::ToolResult);
        assert_eq!(
            records[1].content,
            CoreContent::Parts(vec![CorePart::tool_result("t1", "sum", json!(42))])
        );

        assert_eq!(records[2].id, "a1__2");
        assert_eq!(records[2].content, CoreContent::Parts(vec![CorePart::text("done")]));
    }

    #[test]
    fn test_unresolved_call_has_no_tool_record() {
        let turn = assistant(vec![Part::StepStart, call("t1", None, None)]);
        let records = turn_to_flat(&turn);
        assert_eq!(roles(&records), vec![CoreRole::Assistant]);
        assert_eq!(records[0].kind, FlatKind::ToolCall);
    }

    #[test]
    fn test_step_change_splits_blocks() {
        let turn = assistant(vec![
            call("t1", Some(0), Some(json!(1))),
            call("t2", Some(1), Some(json!(2))),
        ]);
        let records = turn_to_flat(&turn);
        assert_eq!(
            roles(&records),
            vec![
                CoreRole::Assistant,
                CoreRole::Tool,
                CoreRole::Assistant,
                CoreRole::Tool
            ]
        );
    }

    #[test]
    fn test_same_step_calls_share_a_block() {
        let turn = assistant(vec![
            call("t1", Some(0), Some(json!(1))),
            call("t2", Some(0), Some(json!(2))),
        ]);
        let records = turn_to_flat(&turn);
        assert_eq!(roles(&records), vec![CoreRole::Assistant, CoreRole::Tool]);
        assert_eq!(part_count(&records[0]), 2);
        assert_eq!(part_count(&records[1]), 2);
    }

    #[test]
    fn test_text_block_combines_with_following_call_block() {
        // Reasoning flushed alone on the step change, then folded into the call record
        let turn = assistant(vec![
            Part::reasoning("think", Some("sig".into())),
            call("t1", Some(1), None),
        ]);
        let records = turn_to_flat(&turn);
        assert_eq!(roles(&records), vec![CoreRole::Assistant]);
        assert_eq!(records[0].kind, FlatKind::ToolCall);
        assert_eq!(part_count(&records[0]), 2);
    }

    #[test]
    fn test_no_combine_after_tool_call_record() {
        let a = assistant(vec![Part::StepStart, call("t1", None, None)]);
        let mut b = assistant(vec![Part::StepStart, Part::text("later")]);
        b.id = "a2".into();
        let records = turns_to_flat(&[a, b]);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_adjacent_text_records_combine_across_turns() {
        let a = assistant(vec![Part::text("one")]);
        let mut b = assistant(vec![Part::text("two")]);
        b.id = "a2".into();
        let records = turns_to_flat(&[a, b]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a1");
        assert_eq!(part_count(&records[0]), 2);
    }

    #[test]
    fn test_user_text_is_string_content() {
        let turn = Turn::new("u1", Role::User, at(0), vec![Part::StepStart, Part::text("hi")]);
        let records = turn_to_flat(&turn);
        assert_eq!(records[0].content, CoreContent::Text("hi".into()));
        assert_eq!(records[0].role, CoreRole::User);
    }

    #[test]
    fn test_user_attachments_become_file_parts() {
        let mut turn = Turn::new("u1", Role::User, at(0), vec![Part::text("look")]);
        turn.content.attachments = Some(vec![Attachment::new(
            "https://example.com/a.png",
            Some("image/png".into()),
        )]);
        let records = turn_to_flat(&turn);
        let back = records[0].clone().into_turn(&mut DefaultStamper).unwrap();
        assert_eq!(back.parts(), &[Part::text("look")]);
        assert_eq!(back.content.attachments, turn.content.attachments);
    }

    #[test]
    fn test_untyped_attachment_gets_fallback_mime() {
        let mut turn = Turn::new("u1", Role::User, at(0), vec![Part::text("see file")]);
        turn.content.attachments = Some(vec![Attachment::new("https://example.com/blob", None)]);
        let records = turn_to_flat(&turn);
        let CoreContent::Parts(parts) = &records[0].content else {
            panic!("expected parts content");
        };
        assert!(parts.iter().any(|p| matches!(
            p,
            CorePart::File { mime_type, .. } if mime_type == "application/octet-stream"
        )));
    }

    #[test]
    fn test_flat_into_turn_keeps_identity() {
        let record: FlatMessage = serde_json::from_value(json!({
            "id": "m7",
            "role": "assistant",
            "content": [{"type": "text", "text": "hello"}],
            "createdAt": "2024-01-01T00:00:00Z",
            "threadId": "th",
            "resourceId": "res",
            "type": "text"
        }))
        .unwrap();
        let turn = record.into_turn(&mut DefaultStamper).unwrap();
        assert_eq!(turn.id, "m7");
        assert_eq!(turn.thread_id.as_deref(), Some("th"));
        assert_eq!(turn.resource_id.as_deref(), Some("res"));
        assert_eq!(turn.created_at, "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(turn.parts(), &[Part::text("hello")]);
    }

    #[test]
    fn test_reasoning_and_file_survive_flattening() {
        let turn = assistant(vec![
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
            Part::file("image/png", "AQID"),
        ]);
        let records = turn_to_flat(&turn);
        let back = records[0].clone().into_turn(&mut DefaultStamper).unwrap();
        assert_eq!(back.parts(), &turn.parts()[1..]);
    }

    #[test]
    fn test_turns_to_core_strips_identity() {
        let turn = Turn::new("u1", Role::User, at(0), vec![Part::text("hi")]);
        let core = turns_to_core(&[turn]);
        assert_eq!(core, vec![CoreMessage::user("hi")]);
    }
}
