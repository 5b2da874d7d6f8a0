//! The token kernel.
//!
//! [`TokenContext`] is a cursor on one token of one instance. It carries the
//! fork / join / end algorithms and the per-token event loop. Everything runs
//! synchronously on the caller's stack; the caller owns the transaction and
//! must discard its copy of the instance if any call returns an error.

use crate::behavior::{BehaviorRegistry, FlowNodeBehavior};
use crate::connector::ConnectorRegistry;
use crate::error::{KernelError, KernelResult};
use crate::events::RuntimeEvent;
use crate::graph::{FlowNode, ProcessDefinition, SequenceFlow};
use crate::instance::ProcessInstance;
use crate::token::{Token, TokenKind};
use crate::types::*;
use tracing::{debug, error, info};

/// Deploy-time collaborators shared by every dispatch.
#[derive(Clone, Debug)]
pub struct KernelEnv {
    pub behaviors: BehaviorRegistry,
    pub connectors: ConnectorRegistry,
    pub record_history: bool,
}

impl KernelEnv {
    pub fn new(connectors: ConnectorRegistry) -> Self {
        Self {
            behaviors: BehaviorRegistry::with_defaults(),
            connectors,
            record_history: true,
        }
    }
}

impl Default for KernelEnv {
    fn default() -> Self {
        Self::new(ConnectorRegistry::new())
    }
}

impl SequenceFlow {
    /// An absent guard is always satisfied.
    pub fn is_satisfied(&self, cx: &TokenContext<'_>) -> bool {
        match &self.guard {
            None => true,
            Some(guard) => guard.evaluate(cx.variables(), cx.token()),
        }
    }
}

/// Create the root token's first move: enter the definition's start node.
pub fn start_instance(
    instance: &mut ProcessInstance,
    definition: &ProcessDefinition,
    env: &KernelEnv,
) -> KernelResult<()> {
    let mut cx = TokenContext::new(instance, definition, env, TokenId::ROOT)?;
    cx.record(RuntimeEvent::InstanceStarted {
        instance_id: cx.instance.instance_id,
        process_key: definition.key.clone(),
        definition_version: definition.version,
        super_instance: cx.instance.super_execution.map(|s| s.instance_id),
    });
    cx.record(RuntimeEvent::TokenCreated {
        token: TokenId::ROOT,
        parent: None,
        name: None,
    });
    info!(
        instance_id = %cx.instance.instance_id,
        process_key = %definition.key,
        "process instance started"
    );
    cx.enter(definition.start)
}

pub struct TokenContext<'a> {
    instance: &'a mut ProcessInstance,
    definition: &'a ProcessDefinition,
    env: &'a KernelEnv,
    token: TokenId,
}

impl<'a> TokenContext<'a> {
    pub fn new(
        instance: &'a mut ProcessInstance,
        definition: &'a ProcessDefinition,
        env: &'a KernelEnv,
        token: TokenId,
    ) -> KernelResult<Self> {
        if instance.tokens.get(token).is_none() {
            return Err(KernelError::UnknownToken(token));
        }
        Ok(Self {
            instance,
            definition,
            env,
            token,
        })
    }

    /// Cursor on another token of the same instance.
    pub fn for_token(&mut self, token: TokenId) -> TokenContext<'_> {
        TokenContext {
            instance: &mut *self.instance,
            definition: self.definition,
            env: self.env,
            token,
        }
    }

    // ── Observation ──

    pub fn token_id(&self) -> TokenId {
        self.token
    }

    pub fn token(&self) -> &Token {
        &self.instance.tokens[self.token]
    }

    fn token_mut(&mut self) -> &mut Token {
        &mut self.instance.tokens[self.token]
    }

    pub fn instance(&self) -> &ProcessInstance {
        &*self.instance
    }

    pub(crate) fn instance_mut(&mut self) -> &mut ProcessInstance {
        &mut *self.instance
    }

    pub fn definition(&self) -> &'a ProcessDefinition {
        self.definition
    }

    /// Node the token currently sits on.
    pub fn node(&self) -> &'a FlowNode {
        let definition = self.definition;
        definition.node(self.token().current_node)
    }

    pub fn parent(&self) -> Option<TokenId> {
        self.token().parent
    }

    pub fn has_active_children(&self) -> bool {
        self.instance.tokens.has_active_children(self.token)
    }

    pub fn variables(&self) -> &Variables {
        &self.instance.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.instance.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.instance.variables.insert(name.into(), value.into());
    }

    /// Append to the instance journal when history recording is on.
    pub fn record(&mut self, event: RuntimeEvent) {
        if self.env.record_history {
            self.instance.journal.push(event);
        }
    }

    // ── Lifecycle ──

    pub fn enter(&mut self, node: NodeRef) -> KernelResult<()> {
        self.token_mut().current_node = node;
        debug!(token = %self.token().label(), node = %self.node().id, "enter");
        self.fire_event(LifecycleEvent::NodeEnter)?;
        let behavior = self.behavior_of(node)?;
        behavior.enter(self)
    }

    pub fn execute(&mut self) -> KernelResult<()> {
        self.fire_event(LifecycleEvent::NodeExecute)?;
        let behavior = self.behavior()?;
        behavior.execute(self)
    }

    /// Leave the current node: follow a pending jump, or route along the
    /// outgoing flows (continue, fork, or fail).
    pub fn leave(&mut self) -> KernelResult<()> {
        self.fire_event(LifecycleEvent::NodeLeave)?;
        let behavior = self.behavior()?;
        behavior.clean_data(self)?;

        let jump = self.token_mut().override_target.take();
        if let Some(target) = jump {
            let from = self.node();
            let definition = self.definition;
            let to = definition.node(target);
            debug!(
                token = %self.token().label(),
                from = %from.id,
                to = %to.id,
                "jump"
            );
            self.record(RuntimeEvent::Jumped {
                token: self.token,
                from_node: from.id.clone(),
                to_node: to.id.clone(),
            });
            return self.enter(target);
        }

        let node = self.node();
        let satisfied = self.satisfied_flows(node);
        let selected = behavior.select_flows(node, satisfied);
        match selected.as_slice() {
            [] => Err(self.dead_end(node)),
            [flow] => self.take(*flow),
            _ => self.fork(&selected),
        }
    }

    /// Move along `flow` and enter its target.
    pub fn take(&mut self, flow: FlowRef) -> KernelResult<()> {
        let definition = self.definition;
        let flow_def = definition.flow(flow);
        self.token_mut().incoming_flow = Some(flow);
        self.record(RuntimeEvent::FlowTaken {
            token: self.token,
            flow_id: flow_def.id.clone(),
        });
        self.enter(flow_def.target)
    }

    /// Resume by re-running the current node's `leave`.
    pub fn signal(&mut self) -> KernelResult<()> {
        self.record(RuntimeEvent::TokenSignalled {
            token: self.token,
            node_id: self.node().id.clone(),
        });
        let behavior = self.behavior()?;
        behavior.leave(self)
    }

    /// End this token and its unfinished descendants. With `cascade` the
    /// parent is notified afterwards. Ending an ended token is a no-op.
    pub fn end(&mut self, cascade: bool) -> KernelResult<()> {
        if self.token().ended {
            return Ok(());
        }
        {
            let token = self.token_mut();
            token.active = false;
            token.ended = true;
        }

        let children = self.token().children.clone();
        for child in children {
            if !self.instance.tokens[child].ended {
                self.for_token(child).end(false)?;
            }
        }

        let behavior = self.behavior()?;
        behavior.clean_data(self)?;
        self.record(RuntimeEvent::TokenEnded {
            token: self.token,
            node_id: self.node().id.clone(),
        });
        debug!(token = %self.token().label(), node = %self.node().id, cascade, "token ended");

        if cascade {
            self.notify_parent_of_end()?;
        }
        Ok(())
    }

    /// Stop counting this token as an active child without ending it.
    pub fn inactivate(&mut self) {
        self.token_mut().active = false;
    }

    /// Request a jump: the next `leave()` enters `target` directly.
    pub fn jump_to(&mut self, target: NodeRef) {
        self.token_mut().override_target = Some(target);
    }

    /// Reposition the token without raising events or running behavior.
    pub(crate) fn place_at(&mut self, node: NodeRef) {
        self.token_mut().current_node = node;
    }

    // ── Event dispatch loop ──

    /// Raise a lifecycle event for this token.
    ///
    /// While the loop is already draining for this token the event only
    /// replaces the pending slot and runs once the current one finishes.
    pub fn fire_event(&mut self, event: LifecycleEvent) -> KernelResult<()> {
        self.token_mut().pending_event = Some(event);
        if self.token().operating {
            return Ok(());
        }

        self.token_mut().operating = true;
        let outcome = self.drain_events();
        let token = self.token_mut();
        token.operating = false;
        if outcome.is_err() {
            token.pending_event = None;
        }
        outcome
    }

    fn drain_events(&mut self) -> KernelResult<()> {
        while let Some(event) = self.token_mut().pending_event.take() {
            self.dispatch_event(event)?;
        }
        Ok(())
    }

    fn dispatch_event(&mut self, event: LifecycleEvent) -> KernelResult<()> {
        let node = self.node();
        let token = self.token;
        let node_id = node.id.clone();
        self.record(match event {
            LifecycleEvent::NodeEnter => RuntimeEvent::NodeEntered { token, node_id },
            LifecycleEvent::NodeExecute => RuntimeEvent::NodeExecuted { token, node_id },
            LifecycleEvent::NodeLeave => RuntimeEvent::NodeLeft { token, node_id },
        });
        for binding in node.listeners.iter().filter(|l| l.event == event) {
            self.run_connector(&binding.connector)?;
        }
        Ok(())
    }

    /// Invoke a registered connector on this token.
    pub fn run_connector(&mut self, name: &str) -> KernelResult<()> {
        let env = self.env;
        let connector = env.connectors.resolve(name)?;
        self.record(RuntimeEvent::ConnectorInvoked {
            token: self.token,
            node_id: self.node().id.clone(),
            connector: name.to_string(),
        });
        connector.execute(self).map_err(KernelError::from_hook)
    }

    // ── Internals ──

    fn behavior(&self) -> KernelResult<&'a dyn FlowNodeBehavior> {
        self.behavior_of(self.token().current_node)
    }

    fn behavior_of(&self, node: NodeRef) -> KernelResult<&'a dyn FlowNodeBehavior> {
        let env = self.env;
        let definition = self.definition;
        env.behaviors.resolve(definition.node(node).kind)
    }

    /// Guards evaluated in declaration order. A default flow only counts when
    /// nothing else is satisfied.
    fn satisfied_flows(&self, node: &FlowNode) -> Vec<FlowRef> {
        let definition = self.definition;
        let mut satisfied: Vec<FlowRef> = node
            .outgoing
            .iter()
            .copied()
            .filter(|f| Some(*f) != node.default_flow)
            .filter(|f| definition.flow(*f).is_satisfied(self))
            .collect();
        if satisfied.is_empty() {
            satisfied.extend(node.default_flow);
        }
        satisfied
    }

    fn dead_end(&self, node: &FlowNode) -> KernelError {
        let token = self.token;
        if node.outgoing.is_empty() {
            error!(node = %node.id, name = %node.label(), %token, "node has no outgoing sequence flows");
            KernelError::NoOutgoingFlows {
                node_id: node.id.clone(),
                token,
            }
        } else {
            error!(
                node = %node.id,
                name = %node.label(),
                %token,
                "no outgoing sequence flow satisfied its guard"
            );
            KernelError::NoSatisfiedFlow {
                node_id: node.id.clone(),
                token,
            }
        }
    }

    /// Two-phase fork: register every child first, then advance each one.
    fn fork(&mut self, flows: &[FlowRef]) -> KernelResult<()> {
        let definition = self.definition;
        let parent = self.token;
        let at = self.token().current_node;
        let names: Vec<String> = flows
            .iter()
            .map(|f| definition.flow(*f).id.clone())
            .collect();

        let children = self
            .instance
            .tokens
            .register_children(parent, TokenKind::Forked, at, &names)
            .inspect_err(|e| {
                error!(node = %definition.node(at).id, token = %parent, error = %e, "fork rejected");
            })?;
        let join_at = definition.node(at).join;
        for child in &children {
            self.instance.tokens[*child].join_at = join_at;
        }

        for (child, name) in children.iter().zip(&names) {
            self.record(RuntimeEvent::TokenCreated {
                token: *child,
                parent: Some(parent),
                name: Some(name.clone()),
            });
        }
        self.record(RuntimeEvent::Forked {
            token: parent,
            node_id: definition.node(at).id.clone(),
            children: children.clone(),
        });
        debug!(token = %parent, node = %definition.node(at).id, branches = children.len(), "fork");

        for (child, flow) in children.into_iter().zip(flows) {
            // An earlier branch may have terminated the scope.
            if self.instance.tokens[child].ended {
                continue;
            }
            self.for_token(child).take(*flow)?;
        }
        Ok(())
    }

    /// Register a single sub-process root child at the current node, using
    /// the same registration step as a fork.
    pub(crate) fn spawn_sub_process_root(&mut self) -> KernelResult<TokenId> {
        let parent = self.token;
        let at = self.token().current_node;
        let name = format!("{}#{}", self.node().id, self.token().children.len());
        let child = self
            .instance
            .tokens
            .register_children(parent, TokenKind::SubProcessRoot, at, std::slice::from_ref(&name))?[0];
        self.record(RuntimeEvent::TokenCreated {
            token: child,
            parent: Some(parent),
            name: Some(name),
        });
        Ok(child)
    }

    fn notify_parent_of_end(&mut self) -> KernelResult<()> {
        let (parent, kind) = {
            let token = self.token();
            (token.parent, token.kind)
        };
        match parent {
            None => {
                self.end_instance();
                Ok(())
            }
            Some(parent) if kind.signals_parent() => self.for_token(parent).signal(),
            Some(parent) => {
                if self.instance.tokens.has_active_children(parent) {
                    Ok(())
                } else {
                    self.for_token(parent).end(true)
                }
            }
        }
    }

    fn end_instance(&mut self) {
        let at = now_ms();
        self.instance.mark_ended(at);
        self.record(RuntimeEvent::InstanceEnded { at });
        info!(
            instance_id = %self.instance.instance_id,
            process_key = %self.instance.process_key,
            "process instance ended"
        );
    }
}
