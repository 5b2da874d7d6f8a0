use super::FlowNodeBehavior;
use crate::error::{KernelError, KernelResult};
use crate::instance::CallRequest;
use crate::kernel::TokenContext;
use crate::types::TokenId;
use tracing::debug;

/// Embedded sub-process: spawns one sub-process root child on the inner start
/// event and waits. The child's end signals this token, which then leaves.
pub struct SubProcessBehavior;

impl FlowNodeBehavior for SubProcessBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let node = cx.node();
        let initial = node.initial.ok_or_else(|| {
            KernelError::InvalidDefinition(format!("sub-process '{}' has no start event", node.id))
        })?;
        let child = cx.spawn_sub_process_root()?;
        debug!(token = %cx.token_id(), child = %child, node = %node.id, "sub-process entered");
        cx.for_token(child).enter(initial)
    }

    /// Leaving early (jump or termination) ends whatever still runs inside.
    fn clean_data(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let live: Vec<TokenId> = cx
            .instance()
            .tokens
            .children(cx.token_id())
            .filter(|c| c.is_sub_process_root() && !c.ended)
            .map(|c| c.id)
            .collect();
        for child in live {
            cx.for_token(child).end(false)?;
        }
        Ok(())
    }
}

/// Call activity: queues a call request and waits. The engine starts the
/// called process after the dispatch commits and signals this token when the
/// called instance ends.
pub struct CallActivityBehavior;

impl FlowNodeBehavior for CallActivityBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let node = cx.node();
        let called_element = node.called_element.clone().ok_or_else(|| {
            KernelError::InvalidDefinition(format!("call activity '{}' has no called element", node.id))
        })?;
        let token = cx.token_id();
        cx.instance_mut().pending_calls.push(CallRequest {
            token,
            node_id: node.id.clone(),
            called_element,
        });
        Ok(())
    }

    fn clean_data(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let token = cx.token_id();
        cx.instance_mut().pending_calls.retain(|c| c.token != token);
        Ok(())
    }
}
