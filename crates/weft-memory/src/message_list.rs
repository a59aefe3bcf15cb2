//! The message list: an ordered conversation history with merge semantics
//!
//! Inputs in any recognized shape are converted to canonical turns and
//! placed in call order. A turn whose id is already present replaces it in
//! place; consecutive assistant turns are merged into one, with tool
//! results resolving their calls.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use weft_message::{
    CoreMessage, CoreRole, FlatMessage, MessageInput, Part, Role, Turn, UiMessage,
    turn_to_ui, turns_to_core, turns_to_flat,
};

use crate::{
    clock::{Clock, ListStamper},
    error::{Error, Result},
    store::ConversationKey,
};

/// Where a turn in the list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// Loaded from storage
    Memory,
    /// New user input
    User,
    /// New model output
    Response,
    /// Ephemeral context, never persisted
    Context,
}

impl MessageSource {
    /// Whether turns from this source need to be written
    pub fn persists(self) -> bool {
        matches!(self, MessageSource::User | MessageSource::Response)
    }
}

/// A system instruction, kept apart from the turns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemMessage {
    pub text: String,
    pub tag: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    turn: Turn,
    source: MessageSource,
}

/// Ordered conversation history for one session
#[derive(Debug, Default)]
pub struct MessageList {
    entries: Vec<Entry>,
    /// Turn id to position in `entries`
    index: HashMap<String, usize>,
    clock: Clock,
    thread_id: Option<String>,
    resource_id: Option<String>,
    unsaved: HashSet<String>,
    system: Vec<SystemMessage>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list bound to a conversation key
    pub fn for_conversation(key: &ConversationKey) -> Self {
        Self::new()
            .with_thread_id(key.thread_id.clone())
            .with_resource_id(key.resource_id.clone())
    }

    /// Reject turns from any other thread
    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// Reject turns from any other resource
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Convert and place inputs in order.
    ///
    /// Every input is converted and checked before any is placed, so a
    /// failure leaves the list untouched.
    pub fn add<I>(&mut self, inputs: I, source: MessageSource) -> Result<&mut Self>
    where
        I: IntoIterator,
        I::Item: Into<MessageInput>,
    {
        let mut clock = self.clock.clone();
        let mut turns = Vec::new();
        {
            let mut stamper = ListStamper { clock: &mut clock };
            for input in inputs {
                let mut turn = input.into().into_turn(&mut stamper)?;
                self.bind_tenant(&mut turn)?;
                turns.push(turn);
            }
        }
        self.clock = clock;

        for turn in turns {
            self.place(turn, source);
        }
        Ok(self)
    }

    fn bind_tenant(&self, turn: &mut Turn) -> Result<()> {
        bind_field("thread", self.thread_id.as_deref(), &mut turn.thread_id)?;
        bind_field("resource", self.resource_id.as_deref(), &mut turn.resource_id)
    }

    fn place(&mut self, mut turn: Turn, source: MessageSource) {
        open_step(&mut turn);

        if let Some(&idx) = self.index.get(&turn.id) {
            self.replace_at(idx, turn, source);
            return;
        }

        if let Some(last) = self.entries.last_mut() {
            if last.turn.is_assistant() && turn.is_assistant() {
                debug!(into = %last.turn.id, from = %turn.id, "Merging assistant turn");
                merge_into(&mut last.turn, turn);
                if source.persists() {
                    self.unsaved.insert(last.turn.id.clone());
                }
                return;
            }
        }

        if source.persists() {
            self.unsaved.insert(turn.id.clone());
        }
        self.index.insert(turn.id.clone(), self.entries.len());
        self.entries.push(Entry { turn, source });
    }

    /// Swap the turn at `idx` for `turn` unless their content is equal
    fn replace_at(&mut self, idx: usize, turn: Turn, source: MessageSource) {
        let existing = &mut self.entries[idx].turn;
        if existing.content_eq(&turn) {
            debug!(id = %turn.id, "Turn unchanged, skipping");
            return;
        }
        debug!(id = %turn.id, position = idx, "Replacing turn in place");
        *existing = turn;
        if source.persists() {
            self.unsaved.insert(existing.id.clone());
        }
    }

    /// Put processed turns of `source` back where they came from.
    ///
    /// Turns whose id is present are replaced in place; turns of `source`
    /// missing from `turns` are removed; turns with new ids are placed as if
    /// added. Nothing changes if a turn fails the tenant check.
    pub fn replace_source(&mut self, turns: Vec<Turn>, source: MessageSource) -> Result<()> {
        let mut turns = turns;
        for turn in &mut turns {
            self.bind_tenant(turn)?;
        }

        let keep: HashSet<&str> = turns.iter().map(|t| t.id.as_str()).collect();
        let dropped =
            self.remove_where(|e| e.source == source && !keep.contains(e.turn.id.as_str()));
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "Processors dropped turns");
        }

        for mut turn in turns {
            open_step(&mut turn);
            match self.index.get(&turn.id) {
                Some(&idx) => self.replace_at(idx, turn, source),
                None => self.place(turn, source),
            }
        }
        Ok(())
    }

    /// All turns in order
    pub fn all(&self) -> Vec<Turn> {
        self.turns().cloned().collect()
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.entries.iter().map(|e| &e.turn)
    }

    pub fn get(&self, id: &str) -> Option<&Turn> {
        self.index.get(id).map(|&idx| &self.entries[idx].turn)
    }

    /// UI projection
    pub fn all_ui(&self) -> Vec<UiMessage> {
        self.turns().map(turn_to_ui).collect()
    }

    /// Legacy flat projection
    pub fn all_flat(&self) -> Vec<FlatMessage> {
        turns_to_flat(&self.all())
    }

    /// Provider-neutral projection
    pub fn all_core(&self) -> Vec<CoreMessage> {
        turns_to_core(&self.all())
    }

    pub fn by_source(&self, source: MessageSource) -> Vec<Turn> {
        self.entries
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.turn.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Text of the most recent user turn
    pub fn latest_user_text(&self) -> Option<String> {
        self.turns()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| match t.text() {
                text if text.is_empty() => t.display_text(),
                text => text,
            })
    }

    /// Add a system instruction. Returns false if the same text is already
    /// registered under this tag.
    pub fn add_system(&mut self, text: impl Into<String>, tag: Option<&str>) -> bool {
        let text = text.into();
        let tag = tag.map(str::to_string);
        if self.system.iter().any(|s| s.text == text && s.tag == tag) {
            return false;
        }
        self.system.push(SystemMessage { text, tag });
        true
    }

    /// System instructions registered under `tag` (`None` for untagged)
    pub fn system_messages(&self, tag: Option<&str>) -> Vec<&SystemMessage> {
        self.system
            .iter()
            .filter(|s| s.tag.as_deref() == tag)
            .collect()
    }

    /// Everything a model call needs: system instructions, untagged first,
    /// then the provider-neutral history
    pub fn prompt(&self) -> Vec<CoreMessage> {
        let untagged = self.system.iter().filter(|s| s.tag.is_none());
        let tagged = self.system.iter().filter(|s| s.tag.is_some());
        untagged
            .chain(tagged)
            .map(|s| CoreMessage {
                role: CoreRole::System,
                content: weft_message::CoreContent::Text(s.text.clone()),
            })
            .chain(self.all_core())
            .collect()
    }

    /// Remove turns by id, returning the removed turns in list order
    pub fn remove_by_ids(&mut self, ids: &[&str]) -> Vec<Turn> {
        let ids: HashSet<&str> = ids.iter().copied().collect();
        self.remove_where(|e| ids.contains(e.turn.id.as_str()))
    }

    /// Remove and return all turns from a source
    pub fn take_source(&mut self, source: MessageSource) -> Vec<Turn> {
        self.remove_where(|e| e.source == source)
    }

    fn remove_where(&mut self, mut pred: impl FnMut(&Entry) -> bool) -> Vec<Turn> {
        let (removed, kept): (Vec<Entry>, Vec<Entry>) =
            std::mem::take(&mut self.entries).into_iter().partition(|e| pred(e));
        self.entries = kept;
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.turn.id.clone(), idx))
            .collect();
        for entry in &removed {
            self.unsaved.remove(&entry.turn.id);
        }
        removed.into_iter().map(|e| e.turn).collect()
    }

    /// Return unsaved turns in list order and mark them saved
    pub fn drain_unsaved(&mut self) -> Vec<Turn> {
        if self.unsaved.is_empty() {
            return Vec::new();
        }
        let drained = self
            .entries
            .iter()
            .filter(|e| self.unsaved.contains(&e.turn.id))
            .map(|e| e.turn.clone())
            .collect();
        self.unsaved.clear();
        drained
    }

    pub fn has_unsaved(&self) -> bool {
        !self.unsaved.is_empty()
    }

    /// Creation time of the oldest unsaved turn
    pub fn earliest_unsaved_timestamp(&self) -> Option<DateTime<Utc>> {
        self.unsaved
            .iter()
            .filter_map(|id| self.get(id))
            .map(|t| t.created_at)
            .min()
    }

    /// Mark turns unsaved again after a failed write
    pub fn restore_unsaved<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            if self.index.contains_key(id) {
                self.unsaved.insert(id.to_string());
            }
        }
    }
}

fn bind_field(field: &'static str, bound: Option<&str>, value: &mut Option<String>) -> Result<()> {
    let Some(expected) = bound else {
        return Ok(());
    };
    match value {
        Some(actual) if actual != expected => Err(Error::TenantMismatch {
            field,
            expected: expected.to_string(),
            actual: actual.clone(),
        }),
        Some(_) => Ok(()),
        None => {
            *value = Some(expected.to_string());
            Ok(())
        }
    }
}

/// Assistant turns always open with a step marker
fn open_step(turn: &mut Turn) {
    if turn.is_assistant() && !turn.parts().first().is_some_and(Part::is_step_start) {
        turn.content.parts.insert(0, Part::StepStart);
    }
}

/// Fold an assistant turn into the one before it
fn merge_into(target: &mut Turn, incoming: Turn) {
    let mut parts = incoming.content.parts.into_iter().peekable();
    // The target already opened a step
    if parts.peek().is_some_and(Part::is_step_start) {
        parts.next();
    }

    for part in parts {
        let invocation = match part {
            Part::ToolInvocation { tool_invocation } => tool_invocation,
            other => {
                target.content.parts.push(other);
                continue;
            }
        };

        match target.tool_invocation_mut(&invocation.tool_call_id) {
            Some(call) if invocation.is_resolved() => call.resolve(invocation.result),
            Some(_) => {
                debug!(tool_call_id = %invocation.tool_call_id, "Duplicate tool call ignored")
            }
            None if invocation.is_resolved() => warn!(
                tool_call_id = %invocation.tool_call_id,
                tool_name = %invocation.tool_name,
                turn = %target.id,
                "Dropping tool result with no matching call"
            ),
            None => target.content.parts.push(Part::tool_invocation(invocation)),
        }
    }

    if incoming.created_at > target.created_at {
        target.created_at = incoming.created_at;
    }
    if let Some(attachments) = incoming.content.attachments {
        target
            .content
            .attachments
            .get_or_insert_with(Vec::new)
            .extend(attachments);
    }
}
