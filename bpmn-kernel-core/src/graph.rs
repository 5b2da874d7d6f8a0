//! Flow graph model.
//!
//! A `ProcessDefinition` is built once (by [`ProcessDefinitionBuilder`] or the
//! authoring layer) and shared immutably by every instance that runs it.
//! Nodes and flows live in flat vectors addressed by `NodeRef` / `FlowRef`;
//! sub-process contents are ordinary nodes whose `container` points at the
//! enclosing sub-process node.

use crate::error::KernelError;
use crate::guard::Guard;
use crate::types::{FlowRef, LifecycleEvent, NodeRef};
use petgraph::algo::dominators;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// ─── Node kinds ───────────────────────────────────────────────

/// Selects the behavior bound to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    StartEvent,
    EndEvent,
    TerminateEndEvent,
    UserTask,
    ServiceTask,
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    SubProcess,
    CallActivity,
}

impl NodeKind {
    pub fn is_gateway(self) -> bool {
        matches!(
            self,
            NodeKind::ExclusiveGateway | NodeKind::ParallelGateway | NodeKind::InclusiveGateway
        )
    }

    pub fn is_end(self) -> bool {
        matches!(self, NodeKind::EndEvent | NodeKind::TerminateEndEvent)
    }
}

/// Runs the named connector whenever `event` is raised on the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerBinding {
    pub event: LifecycleEvent,
    pub connector: String,
}

#[derive(Clone, Debug)]
pub struct FlowNode {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
    pub incoming: Vec<FlowRef>,
    pub outgoing: Vec<FlowRef>,
    pub default_flow: Option<FlowRef>,
    pub listeners: Vec<ListenerBinding>,
    /// Service-task connector name.
    pub connector: Option<String>,
    /// Call-activity target process key.
    pub called_element: Option<String>,
    /// Enclosing sub-process, `None` at top level.
    pub container: Option<NodeRef>,
    /// Inner start event of a sub-process.
    pub initial: Option<NodeRef>,
    /// For a diverging parallel or inclusive gateway: the merge its
    /// branches join at, i.e. its immediate post-dominator when that is a
    /// converging parallel or inclusive gateway.
    pub join: Option<NodeRef>,
}

impl FlowNode {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// More than one incoming flow: a gateway here acts as a join.
    pub fn is_converging(&self) -> bool {
        self.incoming.len() > 1
    }

    pub fn is_diverging(&self) -> bool {
        self.outgoing.len() > 1
    }
}

#[derive(Clone, Debug)]
pub struct SequenceFlow {
    pub id: String,
    pub name: Option<String>,
    pub source: NodeRef,
    pub target: NodeRef,
    pub guard: Option<Guard>,
}

// ─── Graph ────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    flows: Vec<SequenceFlow>,
    node_index: HashMap<String, NodeRef>,
}

impl FlowGraph {
    pub fn node(&self, node: NodeRef) -> &FlowNode {
        &self.nodes[node.index()]
    }

    pub fn flow(&self, flow: FlowRef) -> &SequenceFlow {
        &self.flows[flow.index()]
    }

    pub fn find_node(&self, id: &str) -> Option<NodeRef> {
        self.node_index.get(id).copied()
    }

    pub fn find_flow(&self, id: &str) -> Option<FlowRef> {
        self.flows
            .iter()
            .position(|f| f.id == id)
            .map(|i| FlowRef(i as u32))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeRef, &FlowNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeRef(i as u32), n))
    }

    pub fn flows(&self) -> impl Iterator<Item = (FlowRef, &SequenceFlow)> {
        self.flows
            .iter()
            .enumerate()
            .map(|(i, f)| (FlowRef(i as u32), f))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// A deployed, immutable process graph.
#[derive(Clone, Debug)]
pub struct ProcessDefinition {
    pub key: String,
    pub name: Option<String>,
    /// SHA-256 of the canonical graph description. Identifies the version.
    pub version: [u8; 32],
    pub graph: FlowGraph,
    pub start: NodeRef,
}

impl ProcessDefinition {
    pub fn node(&self, node: NodeRef) -> &FlowNode {
        self.graph.node(node)
    }

    pub fn flow(&self, flow: FlowRef) -> &SequenceFlow {
        self.graph.flow(flow)
    }

    pub fn find_node(&self, id: &str) -> Result<NodeRef, KernelError> {
        self.graph
            .find_node(id)
            .ok_or_else(|| KernelError::UnknownNode(id.to_string()))
    }
}

pub fn compute_hash(data: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.finalize().into()
}

// ─── Builder ──────────────────────────────────────────────────

struct PendingNode {
    id: String,
    name: Option<String>,
    kind: NodeKind,
    container: Option<String>,
    listeners: Vec<ListenerBinding>,
    connector: Option<String>,
    called_element: Option<String>,
    default_flow: Option<String>,
}

struct PendingFlow {
    id: String,
    name: Option<String>,
    from: String,
    to: String,
    guard: Option<Guard>,
}

/// Programmatic construction of a `ProcessDefinition`.
///
/// Mutators never fail; every reference is resolved in [`build`](Self::build),
/// which reports the first problem it finds.
pub struct ProcessDefinitionBuilder {
    key: String,
    name: Option<String>,
    nodes: Vec<PendingNode>,
    flows: Vec<PendingFlow>,
}

impl ProcessDefinitionBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            nodes: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn node(self, id: impl Into<String>, kind: NodeKind) -> Self {
        self.push_node(id.into(), kind, None)
    }

    /// Add a node inside the sub-process `container`.
    pub fn inner_node(self, container: &str, id: impl Into<String>, kind: NodeKind) -> Self {
        self.push_node(id.into(), kind, Some(container.to_string()))
    }

    fn push_node(mut self, id: String, kind: NodeKind, container: Option<String>) -> Self {
        self.nodes.push(PendingNode {
            id,
            name: None,
            kind,
            container,
            listeners: Vec::new(),
            connector: None,
            called_element: None,
            default_flow: None,
        });
        self
    }

    pub fn node_name(mut self, node: &str, name: impl Into<String>) -> Self {
        if let Some(n) = self.pending_mut(node) {
            n.name = Some(name.into());
        }
        self
    }

    pub fn flow(self, id: impl Into<String>, from: &str, to: &str) -> Self {
        self.push_flow(id.into(), from, to, None)
    }

    pub fn guarded_flow(self, id: impl Into<String>, from: &str, to: &str, guard: Guard) -> Self {
        self.push_flow(id.into(), from, to, Some(guard))
    }

    fn push_flow(mut self, id: String, from: &str, to: &str, guard: Option<Guard>) -> Self {
        self.flows.push(PendingFlow {
            id,
            name: None,
            from: from.to_string(),
            to: to.to_string(),
            guard,
        });
        self
    }

    pub fn flow_name(mut self, flow: &str, name: impl Into<String>) -> Self {
        if let Some(f) = self.flows.iter_mut().find(|f| f.id == flow) {
            f.name = Some(name.into());
        }
        self
    }

    pub fn default_flow(mut self, node: &str, flow: &str) -> Self {
        if let Some(n) = self.pending_mut(node) {
            n.default_flow = Some(flow.to_string());
        }
        self
    }

    pub fn listener(mut self, node: &str, event: LifecycleEvent, connector: &str) -> Self {
        if let Some(n) = self.pending_mut(node) {
            n.listeners.push(ListenerBinding {
                event,
                connector: connector.to_string(),
            });
        }
        self
    }

    pub fn connector(mut self, node: &str, connector: &str) -> Self {
        if let Some(n) = self.pending_mut(node) {
            n.connector = Some(connector.to_string());
        }
        self
    }

    pub fn called_element(mut self, node: &str, process_key: &str) -> Self {
        if let Some(n) = self.pending_mut(node) {
            n.called_element = Some(process_key.to_string());
        }
        self
    }

    fn pending_mut(&mut self, id: &str) -> Option<&mut PendingNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn build(self) -> Result<ProcessDefinition, KernelError> {
        let invalid = |msg: String| KernelError::InvalidDefinition(msg);

        let mut node_index: HashMap<String, NodeRef> = HashMap::new();
        for (i, n) in self.nodes.iter().enumerate() {
            if node_index.insert(n.id.clone(), NodeRef(i as u32)).is_some() {
                return Err(invalid(format!("duplicate node id '{}'", n.id)));
            }
        }

        let mut nodes: Vec<FlowNode> = Vec::with_capacity(self.nodes.len());
        for n in &self.nodes {
            let container = match &n.container {
                None => None,
                Some(c) => {
                    let r = *node_index
                        .get(c)
                        .ok_or_else(|| invalid(format!("node '{}': unknown container '{c}'", n.id)))?;
                    if self.nodes[r.index()].kind != NodeKind::SubProcess {
                        return Err(invalid(format!(
                            "node '{}': container '{c}' is not a sub-process",
                            n.id
                        )));
                    }
                    Some(r)
                }
            };
            nodes.push(FlowNode {
                id: n.id.clone(),
                name: n.name.clone(),
                kind: n.kind,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                default_flow: None,
                listeners: n.listeners.clone(),
                connector: n.connector.clone(),
                called_element: n.called_element.clone(),
                container,
                initial: None,
                join: None,
            });
        }

        let mut flows: Vec<SequenceFlow> = Vec::with_capacity(self.flows.len());
        for (i, f) in self.flows.into_iter().enumerate() {
            if flows.iter().any(|existing| existing.id == f.id) {
                return Err(invalid(format!("duplicate flow id '{}'", f.id)));
            }
            let resolve = |id: &str| {
                node_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| invalid(format!("flow '{}' references unknown node '{id}'", f.id)))
            };
            let source = resolve(&f.from)?;
            let target = resolve(&f.to)?;
            if nodes[source.index()].container != nodes[target.index()].container {
                return Err(invalid(format!(
                    "flow '{}' crosses a sub-process boundary",
                    f.id
                )));
            }
            let r = FlowRef(i as u32);
            nodes[source.index()].outgoing.push(r);
            nodes[target.index()].incoming.push(r);
            flows.push(SequenceFlow {
                id: f.id,
                name: f.name,
                source,
                target,
                guard: f.guard,
            });
        }

        for (i, pending) in self.nodes.iter().enumerate() {
            if let Some(default_id) = &pending.default_flow {
                let fr = flows
                    .iter()
                    .position(|f| &f.id == default_id)
                    .map(|p| FlowRef(p as u32))
                    .ok_or_else(|| {
                        invalid(format!("node '{}': unknown default flow '{default_id}'", pending.id))
                    })?;
                if flows[fr.index()].source != NodeRef(i as u32) {
                    return Err(invalid(format!(
                        "node '{}': default flow '{default_id}' does not leave it",
                        pending.id
                    )));
                }
                nodes[i].default_flow = Some(fr);
            }
        }

        // Exactly one start event per scope (top level and every sub-process).
        let mut start = None;
        for i in 0..nodes.len() {
            if nodes[i].kind != NodeKind::StartEvent {
                continue;
            }
            let r = NodeRef(i as u32);
            let id = nodes[i].id.clone();
            let container = nodes[i].container;
            let slot = match container {
                None => &mut start,
                Some(sub) => &mut nodes[sub.index()].initial,
            };
            if slot.replace(r).is_some() {
                return Err(invalid(format!(
                    "more than one start event in the scope of '{id}'"
                )));
            }
        }
        let start = start.ok_or_else(|| invalid("no top-level start event".to_string()))?;
        if let Some(sub) = nodes
            .iter()
            .find(|n| n.kind == NodeKind::SubProcess && n.initial.is_none())
        {
            return Err(invalid(format!("sub-process '{}' has no start event", sub.id)));
        }

        pair_joins(&mut nodes, &flows);
        let graph = FlowGraph {
            nodes,
            flows,
            node_index,
        };
        let version = compute_hash(&canonical_form(&self.key, &graph));

        Ok(ProcessDefinition {
            key: self.key,
            name: self.name,
            version,
            graph,
            start,
        })
    }
}

fn is_and_or(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::ParallelGateway | NodeKind::InclusiveGateway)
}

/// Pair every parallel/inclusive split with the merge that closes it.
///
/// Post-dominators are the dominators of the reversed flow graph rooted at
/// a virtual exit that every sink (end event, dangling node) flows into.
/// Sub-process bodies have no flows to their enclosing scope, so each
/// scope is paired on its own.
fn pair_joins(nodes: &mut [FlowNode], flows: &[SequenceFlow]) {
    let mut reversed: DiGraph<(), ()> = DiGraph::with_capacity(nodes.len() + 1, flows.len());
    for _ in 0..nodes.len() {
        reversed.add_node(());
    }
    let exit = reversed.add_node(());
    for f in flows {
        reversed.add_edge(
            NodeIndex::new(f.target.index()),
            NodeIndex::new(f.source.index()),
            (),
        );
    }
    for (i, n) in nodes.iter().enumerate() {
        if n.outgoing.is_empty() {
            reversed.add_edge(exit, NodeIndex::new(i), ());
        }
    }

    let post = dominators::simple_fast(&reversed, exit);
    for i in 0..nodes.len() {
        if !is_and_or(nodes[i].kind) || !nodes[i].is_diverging() {
            continue;
        }
        let Some(ipdom) = post.immediate_dominator(NodeIndex::new(i)) else {
            continue;
        };
        if ipdom == exit {
            continue;
        }
        let candidate = &nodes[ipdom.index()];
        if is_and_or(candidate.kind) && candidate.is_converging() {
            nodes[i].join = Some(NodeRef(ipdom.index() as u32));
        }
    }
}

fn canonical_form(key: &str, graph: &FlowGraph) -> String {
    let mut out = format!("process {key}\n");
    for (_, n) in graph.nodes() {
        let container = n
            .container
            .map(|c| graph.node(c).id.as_str())
            .unwrap_or("-");
        out.push_str(&format!("node {} {:?} in {container}\n", n.id, n.kind));
        for l in &n.listeners {
            out.push_str(&format!("  on {} -> {}\n", l.event, l.connector));
        }
        if let Some(c) = &n.connector {
            out.push_str(&format!("  connector {c}\n"));
        }
        if let Some(c) = &n.called_element {
            out.push_str(&format!("  calls {c}\n"));
        }
        if let Some(d) = n.default_flow {
            out.push_str(&format!("  default {}\n", graph.flow(d).id));
        }
    }
    for (_, f) in graph.flows() {
        let guard = f.guard.as_ref().map(Guard::canonical).unwrap_or_default();
        out.push_str(&format!(
            "flow {} {} -> {} [{guard}]\n",
            f.id,
            graph.node(f.source).id,
            graph.node(f.target).id
        ));
    }
    out
}
