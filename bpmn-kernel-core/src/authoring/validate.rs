use super::dto::*;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

fn err(errors: &mut Vec<ValidationError>, rule: &str, message: String) {
    errors.push(ValidationError {
        rule: rule.to_string(),
        message,
    });
}

fn scope_label(scope: &Scope<'_>) -> String {
    match scope.container {
        None => "process".to_string(),
        Some(id) => format!("sub-process {id}"),
    }
}

/// Validate a ProcessDefinitionDto before building. Returns all errors found.
pub fn validate_dto(dto: &ProcessDefinitionDto) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if dto.id.trim().is_empty() {
        err(&mut errors, "V0", "Process id must not be empty".to_string());
    }

    let scopes = dto.scopes();

    // V1: Node IDs unique across the whole definition (sub-processes included)
    let mut seen_nodes = HashSet::new();
    for scope in &scopes {
        for node in scope.nodes {
            if !seen_nodes.insert(node.id.as_str()) {
                err(&mut errors, "V1", format!("Duplicate node id: {}", node.id));
            }
        }
    }

    // V2: Flow IDs unique across the whole definition
    let mut seen_flows = HashSet::new();
    for scope in &scopes {
        for flow in scope.flows {
            let id = flow.flow_id();
            if !seen_flows.insert(id.clone()) {
                err(&mut errors, "V2", format!("Duplicate flow id: {id}"));
            }
        }
    }

    for scope in &scopes {
        validate_scope(scope, &mut errors);
    }

    errors
}

fn validate_scope(scope: &Scope<'_>, errors: &mut Vec<ValidationError>) {
    let label = scope_label(scope);
    let node_map: HashMap<&str, &NodeDto> = scope.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    // V3: Flow endpoints must be nodes of the same scope
    for flow in scope.flows {
        for (field, reference) in [("from", &flow.from), ("to", &flow.to)] {
            if !node_map.contains_key(reference.as_str()) {
                err(
                    errors,
                    "V3",
                    format!(
                        "Flow {} references unknown node '{}' ({field}) in {label}",
                        flow.flow_id(),
                        reference
                    ),
                );
            }
        }
    }

    // V4: Exactly one start event per scope
    let starts: Vec<&NodeDto> = scope.nodes.iter().filter(|n| n.spec.is_start()).collect();
    if starts.len() != 1 {
        err(
            errors,
            "V4",
            format!("Expected exactly one Start node in {label}, found {}", starts.len()),
        );
    }

    // V5: At least one end event per scope
    if !scope.nodes.iter().any(|n| n.spec.is_end()) {
        err(errors, "V5", format!("No End node found in {label}"));
    }

    // V6: Start has no incoming flows, End has no outgoing flows
    for flow in scope.flows {
        if node_map.get(flow.to.as_str()).is_some_and(|n| n.spec.is_start()) {
            err(errors, "V6", format!("Flow {} enters start event {}", flow.flow_id(), flow.to));
        }
        if node_map.get(flow.from.as_str()).is_some_and(|n| n.spec.is_end()) {
            err(errors, "V6", format!("Flow {} leaves end event {}", flow.flow_id(), flow.from));
        }
    }

    // V7: Default flows only on exclusive/inclusive gateways, at most one each
    let mut defaults: HashMap<&str, usize> = HashMap::new();
    for flow in scope.flows.iter().filter(|f| f.is_default) {
        *defaults.entry(flow.from.as_str()).or_default() += 1;
        if let Some(source) = node_map.get(flow.from.as_str()) {
            if !source.spec.is_gateway_with_default() {
                err(
                    errors,
                    "V7",
                    format!(
                        "Flow {}: default flows may only leave an exclusive or inclusive gateway, not {}",
                        flow.flow_id(),
                        source.id
                    ),
                );
            }
        }
    }
    for (node, count) in defaults {
        if count > 1 {
            err(errors, "V7", format!("Node {node}: {count} default flows, at most one allowed"));
        }
    }

    // V8: No flow has both condition and is_default
    for flow in scope.flows {
        if flow.condition.is_some() && flow.is_default {
            err(
                errors,
                "V8",
                format!("Flow {}: condition and is_default are mutually exclusive", flow.flow_id()),
            );
        }
    }

    // V9: Call activities name the process they call
    for node in scope.nodes {
        if let NodeSpec::CallActivity { called_element } = &node.spec {
            if called_element.as_deref().map_or(true, |s| s.trim().is_empty()) {
                err(errors, "V9", format!("CallActivity {}: called_element is required", node.id));
            }
        }
    }

    // V10: Every node reachable from the scope's start
    if let [start] = starts.as_slice() {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = scope
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
            .collect();
        for flow in scope.flows {
            if let (Some(&a), Some(&b)) = (index.get(flow.from.as_str()), index.get(flow.to.as_str())) {
                graph.add_edge(a, b, ());
            }
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, index[start.id.as_str()]);
        while let Some(ix) = dfs.next(&graph) {
            reached.insert(ix);
        }
        for node in scope.nodes {
            if !reached.contains(&index[node.id.as_str()]) {
                err(
                    errors,
                    "V10",
                    format!("Node {} is unreachable from {} in {label}", node.id, start.id),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::yaml::parse_process_yaml;

    fn rules(yaml: &str) -> Vec<String> {
        let dto = parse_process_yaml(yaml).unwrap();
        validate_dto(&dto).into_iter().map(|e| e.rule).collect()
    }

    #[test]
    fn test_valid_process_passes() {
        let yaml = r#"
id: ok
nodes:
  - { kind: Start, id: start }
  - { kind: ExclusiveGateway, id: gw }
  - { kind: UserTask, id: a }
  - { kind: UserTask, id: b }
  - { kind: End, id: end }
flows:
  - { from: start, to: gw }
  - { from: gw, to: a, condition: { flag: x, op: ">", value: 0 } }
  - { from: gw, to: b, is_default: true }
  - { from: a, to: end }
  - { from: b, to: end }
"#;
        assert!(rules(yaml).is_empty());
    }

    #[test]
    fn test_duplicate_ids_across_scopes() {
        let yaml = r#"
id: dup
nodes:
  - { kind: Start, id: start }
  - kind: SubProcess
    id: sub
    nodes:
      - { kind: Start, id: start }
      - { kind: End, id: inner_end }
    flows:
      - { from: start, to: inner_end }
  - { kind: End, id: end }
flows:
  - { from: start, to: sub }
  - { from: sub, to: end }
"#;
        assert!(rules(yaml).contains(&"V1".to_string()));
    }

    #[test]
    fn test_flow_crossing_scope_is_unknown_endpoint() {
        let yaml = r#"
id: cross
nodes:
  - { kind: Start, id: start }
  - kind: SubProcess
    id: sub
    nodes:
      - { kind: Start, id: s2 }
      - { kind: End, id: e2 }
    flows:
      - { from: s2, to: e2 }
  - { kind: End, id: end }
flows:
  - { from: start, to: s2 }
  - { from: start, to: sub }
  - { from: sub, to: end }
"#;
        assert!(rules(yaml).contains(&"V3".to_string()));
    }

    #[test]
    fn test_missing_start_and_end() {
        let yaml = r#"
id: empty
nodes:
  - { kind: UserTask, id: a }
"#;
        let found = rules(yaml);
        assert!(found.contains(&"V4".to_string()));
        assert!(found.contains(&"V5".to_string()));
    }

    #[test]
    fn test_default_flow_rules() {
        let yaml = r#"
id: defaults
nodes:
  - { kind: Start, id: start }
  - { kind: UserTask, id: a }
  - { kind: End, id: end }
flows:
  - { from: start, to: a, is_default: true }
  - { from: a, to: end, is_default: true, condition: { flag: x, op: "==", value: 1 } }
"#;
        let found = rules(yaml);
        assert!(found.contains(&"V7".to_string()));
        assert!(found.contains(&"V8".to_string()));
    }

    #[test]
    fn test_call_activity_needs_target() {
        let yaml = r#"
id: caller
nodes:
  - { kind: Start, id: start }
  - { kind: CallActivity, id: call }
  - { kind: End, id: end }
flows:
  - { from: start, to: call }
  - { from: call, to: end }
"#;
        assert_eq!(rules(yaml), vec!["V9".to_string()]);
    }

    #[test]
    fn test_unreachable_node() {
        let yaml = r#"
id: island
nodes:
  - { kind: Start, id: start }
  - { kind: UserTask, id: orphan }
  - { kind: End, id: end }
flows:
  - { from: start, to: end }
  - { from: orphan, to: end }
"#;
        let dto = parse_process_yaml(yaml).unwrap();
        let errors = validate_dto(&dto);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].rule, "V10");
        assert!(errors[0].message.contains("orphan"));
    }
}
