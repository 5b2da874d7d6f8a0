//! Authoring: YAML → DTO → validation → `ProcessDefinition`.

pub mod convert;
pub mod dto;
pub mod validate;
pub mod yaml;

pub use convert::dto_to_definition;
pub use dto::{FlowDto, ListenerDto, NodeDto, NodeSpec, ProcessDefinitionDto};
pub use validate::{validate_dto, ValidationError};
pub use yaml::parse_process_yaml;
