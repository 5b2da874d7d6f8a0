use super::dto::ProcessDefinitionDto;
use anyhow::{Context, Result};

/// Parse a YAML string into a ProcessDefinitionDto.
///
/// Validation is NOT performed here; `dto_to_definition()` validates before
/// building.
pub fn parse_process_yaml(yaml_str: &str) -> Result<ProcessDefinitionDto> {
    serde_yaml::from_str(yaml_str).context("invalid process YAML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authoring::dto::*;
    use crate::guard::FlagOp;
    use crate::types::{LifecycleEvent, Value};

    #[test]
    fn test_basic_yaml_parse() {
        let yaml = r#"
id: test-process
nodes:
  - kind: Start
    id: start
  - kind: ServiceTask
    id: task_a
    connector: do_work
  - kind: End
    id: end
flows:
  - from: start
    to: task_a
  - from: task_a
    to: end
"#;
        let dto = parse_process_yaml(yaml).unwrap();
        assert_eq!(dto.id, "test-process");
        assert_eq!(dto.nodes.len(), 3);
        assert_eq!(dto.flows.len(), 2);
        assert!(matches!(
            &dto.nodes[1].spec,
            NodeSpec::ServiceTask { connector: Some(c) } if c == "do_work"
        ));
    }

    #[test]
    fn test_yaml_with_conditions() {
        let yaml = r#"
id: xor-process
nodes:
  - kind: Start
    id: start
  - kind: ExclusiveGateway
    id: gw
  - kind: UserTask
    id: task_a
  - kind: UserTask
    id: task_b
  - kind: End
    id: end
flows:
  - from: start
    to: gw
  - id: approved
    from: gw
    to: task_a
    condition:
      flag: approved
      op: "=="
      value: true
  - from: gw
    to: task_b
    is_default: true
  - from: task_a
    to: end
  - from: task_b
    to: end
"#;
        let dto = parse_process_yaml(yaml).unwrap();
        assert_eq!(dto.nodes.len(), 5);

        let cond = dto.flows[1].condition.as_ref().unwrap();
        assert_eq!(cond.flag, "approved");
        assert_eq!(cond.op, FlagOp::Eq);
        assert_eq!(cond.value, Value::Bool(true));
        assert_eq!(dto.flows[1].flow_id(), "approved");
        assert!(dto.flows[2].is_default);
    }

    #[test]
    fn test_yaml_with_listeners_and_terminate() {
        let yaml = r#"
id: audited
nodes:
  - kind: Start
    id: start
    listeners:
      - event: node_leave
        connector: audit.log
  - kind: End
    id: stop
    terminate: true
flows:
  - { from: start, to: stop }
"#;
        let dto = parse_process_yaml(yaml).unwrap();
        assert_eq!(
            dto.nodes[0].listeners,
            vec![ListenerDto {
                event: LifecycleEvent::NodeLeave,
                connector: "audit.log".into(),
            }]
        );
        assert!(matches!(dto.nodes[1].spec, NodeSpec::End { terminate: true }));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = r#"
id: bad
nodes:
  - kind: TimerWait
    id: t
"#;
        assert!(parse_process_yaml(yaml).is_err());
    }
}
