use crate::types::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime events: the audit trail for every process instance.
///
/// The kernel appends these to the instance journal while it runs; the engine
/// flushes the journal to the store once the dispatch has committed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    InstanceStarted {
        instance_id: Uuid,
        process_key: String,
        definition_version: [u8; 32],
        super_instance: Option<Uuid>,
    },
    TokenCreated {
        token: TokenId,
        parent: Option<TokenId>,
        name: Option<String>,
    },
    NodeEntered {
        token: TokenId,
        node_id: String,
    },
    NodeExecuted {
        token: TokenId,
        node_id: String,
    },
    NodeLeft {
        token: TokenId,
        node_id: String,
    },
    FlowTaken {
        token: TokenId,
        flow_id: String,
    },
    Forked {
        token: TokenId,
        node_id: String,
        children: Vec<TokenId>,
    },
    JoinArrived {
        token: TokenId,
        node_id: String,
    },
    JoinReleased {
        parent: TokenId,
        node_id: String,
    },
    Jumped {
        token: TokenId,
        from_node: String,
        to_node: String,
    },
    TokenSignalled {
        token: TokenId,
        node_id: String,
    },
    TokenEnded {
        token: TokenId,
        node_id: String,
    },
    WorkItemCreated {
        token: TokenId,
        node_id: String,
    },
    WorkItemClosed {
        token: TokenId,
        node_id: String,
    },
    ConnectorInvoked {
        token: TokenId,
        node_id: String,
        connector: String,
    },
    CallActivityStarted {
        token: TokenId,
        node_id: String,
        called_element: String,
        sub_instance: Uuid,
    },
    CallActivityCompleted {
        token: TokenId,
        sub_instance: Uuid,
    },
    VariablesUpdated {
        names: Vec<String>,
    },
    InstanceSuspended,
    InstanceResumed,
    InstanceEnded {
        at: Timestamp,
    },
}

impl RuntimeEvent {
    /// Token the event is about, if any.
    pub fn token(&self) -> Option<TokenId> {
        match self {
            RuntimeEvent::TokenCreated { token, .. }
            | RuntimeEvent::NodeEntered { token, .. }
            | RuntimeEvent::NodeExecuted { token, .. }
            | RuntimeEvent::NodeLeft { token, .. }
            | RuntimeEvent::FlowTaken { token, .. }
            | RuntimeEvent::Forked { token, .. }
            | RuntimeEvent::JoinArrived { token, .. }
            | RuntimeEvent::Jumped { token, .. }
            | RuntimeEvent::TokenSignalled { token, .. }
            | RuntimeEvent::TokenEnded { token, .. }
            | RuntimeEvent::WorkItemCreated { token, .. }
            | RuntimeEvent::WorkItemClosed { token, .. }
            | RuntimeEvent::ConnectorInvoked { token, .. }
            | RuntimeEvent::CallActivityStarted { token, .. }
            | RuntimeEvent::CallActivityCompleted { token, .. } => Some(*token),
            RuntimeEvent::JoinReleased { parent, .. } => Some(*parent),
            RuntimeEvent::InstanceStarted { .. }
            | RuntimeEvent::VariablesUpdated { .. }
            | RuntimeEvent::InstanceSuspended
            | RuntimeEvent::InstanceResumed
            | RuntimeEvent::InstanceEnded { .. } => None,
        }
    }
}
