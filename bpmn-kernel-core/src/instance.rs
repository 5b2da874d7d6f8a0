use crate::events::RuntimeEvent;
use crate::graph::ProcessDefinition;
use crate::token::{Token, TokenTree};
use crate::types::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A wait-state task waiting for an external `complete_task`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub token: TokenId,
    pub node_id: String,
    pub created_at: Timestamp,
}

/// Queued by a call activity; the engine starts the called process after the
/// current dispatch commits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub token: TokenId,
    pub node_id: String,
    pub called_element: String,
}

/// Back-reference from a called instance to the token waiting in its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperExecution {
    pub instance_id: Uuid,
    pub token: TokenId,
}

/// A single process instance: owns the token tree for one run of a
/// definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub instance_id: Uuid,
    pub process_key: String,
    pub definition_version: [u8; 32],
    pub tokens: TokenTree,
    pub variables: Variables,
    /// True exactly when the root token has ended.
    pub ended: bool,
    pub ended_at: Option<Timestamp>,
    pub suspended: bool,
    /// Optimistic concurrency version, bumped on every committed dispatch.
    pub version: u64,
    pub work_items: Vec<WorkItem>,
    pub pending_calls: Vec<CallRequest>,
    pub super_execution: Option<SuperExecution>,
    /// Call-activity nesting depth (0 for a top-level instance).
    pub call_depth: u32,
    pub created_at: Timestamp,
    /// Events produced since the last flush.
    #[serde(skip)]
    pub(crate) journal: Vec<RuntimeEvent>,
}

impl ProcessInstance {
    pub fn new(definition: &ProcessDefinition, variables: Variables) -> Self {
        Self {
            instance_id: Uuid::now_v7(),
            process_key: definition.key.clone(),
            definition_version: definition.version,
            tokens: TokenTree::new(definition.start),
            variables,
            ended: false,
            ended_at: None,
            suspended: false,
            version: 0,
            work_items: Vec::new(),
            pending_calls: Vec::new(),
            super_execution: None,
            call_depth: 0,
            created_at: now_ms(),
            journal: Vec::new(),
        }
    }

    pub fn root(&self) -> &Token {
        self.tokens.root()
    }

    pub fn token(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(id)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Token waiting in the open work item for `node_id`, if exactly one
    /// token is parked there.
    pub fn open_task(&self, node_id: &str) -> Option<TokenId> {
        let mut matching = self.work_items.iter().filter(|w| w.node_id == node_id);
        match (matching.next(), matching.next()) {
            (Some(w), None) => Some(w.token),
            _ => None,
        }
    }

    /// Events recorded since the last flush.
    pub fn journal(&self) -> &[RuntimeEvent] {
        &self.journal
    }

    pub fn drain_journal(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.journal)
    }

    pub(crate) fn mark_ended(&mut self, at: Timestamp) {
        self.ended = true;
        self.ended_at = Some(at);
        self.work_items.clear();
        self.pending_calls.clear();
    }

    pub(crate) fn close_work_item(&mut self, token: TokenId) -> Option<WorkItem> {
        let pos = self.work_items.iter().position(|w| w.token == token)?;
        Some(self.work_items.remove(pos))
    }
}
