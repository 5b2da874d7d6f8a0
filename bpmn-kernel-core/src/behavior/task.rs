use super::FlowNodeBehavior;
use crate::error::KernelResult;
use crate::events::RuntimeEvent;
use crate::instance::WorkItem;
use crate::kernel::TokenContext;
use crate::types::now_ms;

/// Wait state: opens a work item and parks the token until `complete_task`.
pub struct UserTaskBehavior;

impl FlowNodeBehavior for UserTaskBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let token = cx.token_id();
        let node_id = cx.node().id.clone();
        cx.instance_mut().work_items.push(WorkItem {
            token,
            node_id: node_id.clone(),
            created_at: now_ms(),
        });
        cx.record(RuntimeEvent::WorkItemCreated { token, node_id });
        Ok(())
    }

    fn execute(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        cx.leave()
    }

    fn clean_data(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        let token = cx.token_id();
        if let Some(item) = cx.instance_mut().close_work_item(token) {
            cx.record(RuntimeEvent::WorkItemClosed {
                token,
                node_id: item.node_id,
            });
        }
        Ok(())
    }
}

/// Runs the node's bound connector synchronously, then leaves. A service task
/// without a connector behaves as a pass-through.
pub struct ServiceTaskBehavior;

impl FlowNodeBehavior for ServiceTaskBehavior {
    fn enter(&self, cx: &mut TokenContext<'_>) -> KernelResult<()> {
        if let Some(connector) = cx.node().connector.as_deref() {
            cx.run_connector(connector)?;
        }
        cx.leave()
    }
}
