use super::FlowNodeBehavior;
use crate::error::KernelResult;
use crate::events::RuntimeEvent;
use crate::graph::FlowNode;
use crate::kernel::TokenContext;
use crate::token::TokenKind;
use crate::types::{FlowRef, TokenId};
use tracing::debug;

/// XOR split: the first satisfied flow in declaration order wins.
/// Converging exclusive gateways pass every arrival through.
pub struct ExclusiveGatewayBehavior;

impl FlowNodeBehavior for ExclusiveGatewayBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        cx.leave()
    }

    fn select_flows(&self, _node: &FlowNode, mut satisfied: Vec<FlowRef>) -> Vec<FlowRef> {
        satisfied.truncate(1);
        satisfied
    }
}

/// AND split on every outgoing flow regardless of guards; AND join when
/// converging.
pub struct ParallelGatewayBehavior;

impl FlowNodeBehavior for ParallelGatewayBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        join_or_leave(cx)
    }

    fn select_flows(&self, node: &FlowNode, _satisfied: Vec<FlowRef>) -> Vec<FlowRef> {
        node.outgoing.clone()
    }
}

/// OR split on every satisfied flow; joins like the parallel gateway.
pub struct InclusiveGatewayBehavior;

impl FlowNodeBehavior for InclusiveGatewayBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        join_or_leave(cx)
    }
}

/// Only a forked token joins, and only at the merge paired with the fork
/// that created it. Every other arrival passes through.
fn join_or_leave(cx: &mut TokenContext<'_>) -> KernelResult<()> {
    let token = cx.token();
    let paired = token.join_at.map_or(true, |join| join == token.current_node);
    let joins = token.kind == TokenKind::Forked && paired && cx.node().is_converging();
    match cx.parent() {
        Some(parent) if joins => join(cx, parent),
        _ => cx.leave(),
    }
}

/// Park the arriving child. The last sibling to arrive ends every child
/// waiting here and moves the parent on from the join node.
fn join(cx: &mut TokenContext<'_>, parent: TokenId) -> KernelResult<()> {
    let at = cx.token().current_node;
    let node_id = cx.node().id.clone();

    cx.inactivate();
    cx.record(RuntimeEvent::JoinArrived {
        token: cx.token_id(),
        node_id: node_id.clone(),
    });

    if cx.instance().tokens.has_active_children(parent) {
        debug!(token = %cx.token_id(), node = %node_id, "join waiting");
        return Ok(());
    }

    let arrived: Vec<TokenId> = cx
        .instance()
        .tokens
        .children(parent)
        .filter(|c| !c.ended && c.current_node == at)
        .map(|c| c.id)
        .collect();
    for sibling in arrived {
        cx.for_token(sibling).end(false)?;
    }

    debug!(parent = %parent, node = %node_id, "join released");
    cx.record(RuntimeEvent::JoinReleased { parent, node_id });
    let mut parent_cx = cx.for_token(parent);
    parent_cx.place_at(at);
    parent_cx.leave()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    fn gateway(outgoing: u32) -> FlowNode {
        FlowNode {
            id: "gw".into(),
            name: None,
            kind: NodeKind::ExclusiveGateway,
            incoming: vec![],
            outgoing: (0..outgoing).map(FlowRef).collect(),
            default_flow: None,
            listeners: vec![],
            connector: None,
            called_element: None,
            container: None,
            initial: None,
            join: None,
        }
    }

    #[test]
    fn exclusive_keeps_first_satisfied() {
        let node = gateway(3);
        let picked = ExclusiveGatewayBehavior.select_flows(&node, vec![FlowRef(1), FlowRef(2)]);
        assert_eq!(picked, vec![FlowRef(1)]);
        assert!(ExclusiveGatewayBehavior.select_flows(&node, vec![]).is_empty());
    }

    #[test]
    fn parallel_ignores_guards() {
        let node = gateway(3);
        let picked = ParallelGatewayBehavior.select_flows(&node, vec![FlowRef(0)]);
        assert_eq!(picked, vec![FlowRef(0), FlowRef(1), FlowRef(2)]);
    }

    #[test]
    fn inclusive_keeps_all_satisfied() {
        let node = gateway(3);
        let picked = InclusiveGatewayBehavior.select_flows(&node, vec![FlowRef(0), FlowRef(2)]);
        assert_eq!(picked, vec![FlowRef(0), FlowRef(2)]);
    }
}
