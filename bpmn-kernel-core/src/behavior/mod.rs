//! Per-kind flow node behaviors.
//!
//! The token never branches on a node's kind: it resolves the behavior bound
//! to the kind from a [`BehaviorRegistry`] built once at engine construction
//! and calls through the [`FlowNodeBehavior`] trait.

mod event;
mod gateway;
mod subprocess;
mod task;

pub use event::{EndEventBehavior, StartEventBehavior, TerminateEndEventBehavior};
pub use gateway::{ExclusiveGatewayBehavior, InclusiveGatewayBehavior, ParallelGatewayBehavior};
pub use subprocess::{CallActivityBehavior, SubProcessBehavior};
pub use task::{ServiceTaskBehavior, UserTaskBehavior};

use crate::error::{KernelError, KernelResult};
use crate::graph::{FlowNode, NodeKind};
use crate::kernel::TokenContext;
use crate::types::FlowRef;
use std::collections::HashMap;
use std::sync::Arc;

pub trait FlowNodeBehavior: Send + Sync {
    /// Called right after the token arrives on the node.
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()>;

    /// External resumption point (task completion).
    fn execute(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        cx.leave()
    }

    /// Resumption after waiting on children or a called process.
    fn leave(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        cx.leave()
    }

    /// Drop node-local state held for the token. Runs on leave and on end.
    fn clean_data(&self, _cx: &mut TokenContext<'_>) -> KernelResult<()> {
        Ok(())
    }

    /// Gateway policy: narrow the satisfied outgoing flows to the ones the
    /// token continues on. The default takes every satisfied flow.
    fn select_flows(&self, _node: &FlowNode, satisfied: Vec<FlowRef>) -> Vec<FlowRef> {
        satisfied
    }
}

/// Kind-keyed strategy table.
#[derive(Clone)]
pub struct BehaviorRegistry {
    behaviors: HashMap<NodeKind, Arc<dyn FlowNodeBehavior>>,
}

impl BehaviorRegistry {
    pub fn empty() -> Self {
        Self {
            behaviors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(NodeKind::StartEvent, Arc::new(StartEventBehavior));
        registry.register(NodeKind::EndEvent, Arc::new(EndEventBehavior));
        registry.register(NodeKind::TerminateEndEvent, Arc::new(TerminateEndEventBehavior));
        registry.register(NodeKind::UserTask, Arc::new(UserTaskBehavior));
        registry.register(NodeKind::ServiceTask, Arc::new(ServiceTaskBehavior));
        registry.register(NodeKind::ExclusiveGateway, Arc::new(ExclusiveGatewayBehavior));
        registry.register(NodeKind::ParallelGateway, Arc::new(ParallelGatewayBehavior));
        registry.register(NodeKind::InclusiveGateway, Arc::new(InclusiveGatewayBehavior));
        registry.register(NodeKind::SubProcess, Arc::new(SubProcessBehavior));
        registry.register(NodeKind::CallActivity, Arc::new(CallActivityBehavior));
        registry
    }

    /// Bind (or replace) the behavior for `kind`.
    pub fn register(&mut self, kind: NodeKind, behavior: Arc<dyn FlowNodeBehavior>) {
        self.behaviors.insert(kind, behavior);
    }

    pub fn resolve(&self, kind: NodeKind) -> KernelResult<&dyn FlowNodeBehavior> {
        self.behaviors
            .get(&kind)
            .map(|b| b.as_ref())
            .ok_or(KernelError::MissingBehavior(kind))
    }
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.behaviors.keys().map(|k| format!("{k:?}")).collect();
        kinds.sort_unstable();
        f.debug_struct("BehaviorRegistry").field("kinds", &kinds).finish()
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
