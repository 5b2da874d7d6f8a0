use super::dto::*;
use super::validate::validate_dto;
use crate::graph::{NodeKind, ProcessDefinition, ProcessDefinitionBuilder};
use crate::guard::Guard;
use anyhow::{anyhow, Result};

/// Convert a ProcessDefinitionDto into an executable definition.
///
/// Runs `validate_dto` first and reports every rule violation at once;
/// whatever the builder still rejects surfaces as `InvalidDefinition`.
pub fn dto_to_definition(dto: &ProcessDefinitionDto) -> Result<ProcessDefinition> {
    let errors = validate_dto(dto);
    if !errors.is_empty() {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(anyhow!(
            "process '{}' failed validation:\n{}",
            dto.id,
            msgs.join("\n")
        ));
    }

    let mut builder = ProcessDefinitionBuilder::new(dto.id.clone());
    if let Some(name) = &dto.name {
        builder = builder.name(name.clone());
    }

    // Scopes come parents first, so every container exists before its body.
    let scopes = dto.scopes();
    for scope in &scopes {
        for node in scope.nodes {
            builder = add_node(builder, scope.container, node);
        }
    }
    for scope in &scopes {
        for flow in scope.flows {
            let id = flow.flow_id();
            builder = match &flow.condition {
                Some(cond) => builder.guarded_flow(id.clone(), &flow.from, &flow.to, Guard::Flag(cond.clone())),
                None => builder.flow(id.clone(), &flow.from, &flow.to),
            };
            if let Some(name) = &flow.name {
                builder = builder.flow_name(&id, name.clone());
            }
            if flow.is_default {
                builder = builder.default_flow(&flow.from, &id);
            }
        }
    }

    Ok(builder.build()?)
}

fn add_node(builder: ProcessDefinitionBuilder, container: Option<&str>, node: &NodeDto) -> ProcessDefinitionBuilder {
    let kind = match &node.spec {
        NodeSpec::Start => NodeKind::StartEvent,
        NodeSpec::End { terminate: false } => NodeKind::EndEvent,
        NodeSpec::End { terminate: true } => NodeKind::TerminateEndEvent,
        NodeSpec::UserTask => NodeKind::UserTask,
        NodeSpec::ServiceTask { .. } => NodeKind::ServiceTask,
        NodeSpec::ExclusiveGateway => NodeKind::ExclusiveGateway,
        NodeSpec::ParallelGateway => NodeKind::ParallelGateway,
        NodeSpec::InclusiveGateway => NodeKind::InclusiveGateway,
        NodeSpec::SubProcess { .. } => NodeKind::SubProcess,
        NodeSpec::CallActivity { .. } => NodeKind::CallActivity,
    };

    let mut builder = match container {
        None => builder.node(node.id.clone(), kind),
        Some(c) => builder.inner_node(c, node.id.clone(), kind),
    };
    if let Some(name) = &node.name {
        builder = builder.node_name(&node.id, name.clone());
    }
    match &node.spec {
        NodeSpec::ServiceTask {
            connector: Some(connector),
        } => builder = builder.connector(&node.id, connector),
        NodeSpec::CallActivity {
            called_element: Some(target),
        } => builder = builder.called_element(&node.id, target),
        _ => {}
    }
    for listener in &node.listeners {
        builder = builder.listener(&node.id, listener.event, &listener.connector);
    }
    builder
}
