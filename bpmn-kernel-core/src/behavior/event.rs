use super::FlowNodeBehavior;
use crate::error::KernelResult;
use crate::kernel::TokenContext;
use tracing::debug;

/// Passes straight through to its outgoing flow.
pub struct StartEventBehavior;

impl FlowNodeBehavior for StartEventBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        cx.leave()
    }
}

/// Ends the arriving token and notifies its parent.
pub struct EndEventBehavior;

impl FlowNodeBehavior for EndEventBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        cx.end(true)
    }
}

/// Ends the whole enclosing scope: the nearest sub-process, or the instance.
pub struct TerminateEndEventBehavior;

impl FlowNodeBehavior for TerminateEndEventBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let scope = cx.instance().tokens.scope_root(cx.token_id());
        debug!(
            token = %cx.token_id(),
            node = %cx.node().id,
            scope = %scope,
            "terminate"
        );
        cx.for_token(scope).end(true)
    }
}
