use crate::guard::FlagCondition;
use crate::types::LifecycleEvent;
use serde::{Deserialize, Serialize};

// ── Helpers for serde ──

fn is_false(v: &bool) -> bool {
    !v
}

// ── Top-level DTO ──

/// Authoring form of a process definition, as written in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinitionDto {
    /// Process key.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub flows: Vec<FlowDto>,
}

// ── Flow ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDto {
    /// Defaults to `{from}->{to}`. Forked tokens are named after it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<FlagCondition>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_default: bool,
}

impl FlowDto {
    pub fn flow_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}->{}", self.from, self.to))
    }
}

// ── Node ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDto {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub spec: NodeSpec,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<ListenerDto>,
}

/// Kind-specific part of a node, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum NodeSpec {
    Start,
    End {
        #[serde(default, skip_serializing_if = "is_false")]
        terminate: bool,
    },
    UserTask,
    ServiceTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connector: Option<String>,
    },
    ExclusiveGateway,
    ParallelGateway,
    InclusiveGateway,
    SubProcess {
        nodes: Vec<NodeDto>,
        #[serde(default)]
        flows: Vec<FlowDto>,
    },
    CallActivity {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        called_element: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerDto {
    pub event: LifecycleEvent,
    pub connector: String,
}

impl NodeSpec {
    pub fn is_start(&self) -> bool {
        matches!(self, NodeSpec::Start)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeSpec::End { .. })
    }

    pub fn is_gateway_with_default(&self) -> bool {
        matches!(self, NodeSpec::ExclusiveGateway | NodeSpec::InclusiveGateway)
    }

    /// Connector bound to a service task, if any.
    pub fn connector(&self) -> Option<&str> {
        match self {
            NodeSpec::ServiceTask { connector } => connector.as_deref(),
            _ => None,
        }
    }
}

/// One level of nesting: the top-level process or one sub-process body.
pub struct Scope<'a> {
    /// Enclosing sub-process id, `None` at top level.
    pub container: Option<&'a str>,
    pub nodes: &'a [NodeDto],
    pub flows: &'a [FlowDto],
}

impl ProcessDefinitionDto {
    /// Every scope, parents before the sub-processes they contain.
    pub fn scopes(&self) -> Vec<Scope<'_>> {
        let mut scopes = vec![Scope {
            container: None,
            nodes: &self.nodes,
            flows: &self.flows,
        }];
        let mut i = 0;
        while i < scopes.len() {
            let nodes = scopes[i].nodes;
            for node in nodes {
                if let NodeSpec::SubProcess { nodes, flows } = &node.spec {
                    scopes.push(Scope {
                        container: Some(&node.id),
                        nodes,
                        flows,
                    });
                }
            }
            i += 1;
        }
        scopes
    }
}
