//! BPMN token kernel.
//!
//! Drives process instances over an immutable flow graph with a tree of
//! tokens: one root per instance, one child per parallel branch or running
//! sub-process. The kernel itself is synchronous and single-writer; the
//! [`engine`] module wraps it in an async service with a pluggable
//! [`store::ProcessStore`].
//!
//! ## Layers
//!
//! - `graph`, `guard`: the deployed, read-only process definition
//! - `token`, `instance`, `kernel`, `behavior`: execution
//! - `events`: the audit trail produced by execution
//! - `authoring`: YAML process files → definitions
//! - `engine`, `registry`, `store`, `config`: the service around the kernel

pub mod authoring;
pub mod behavior;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod guard;
pub mod instance;
pub mod kernel;
pub mod registry;
pub mod store;
pub mod store_memory;
pub mod token;
pub mod types;

pub use behavior::{BehaviorRegistry, FlowNodeBehavior};
pub use config::EngineConfig;
pub use connector::{Connector, ConnectorRegistry};
pub use engine::BpmnKernelEngine;
pub use error::{EngineError, KernelError, KernelResult};
pub use events::RuntimeEvent;
pub use graph::{FlowNode, NodeKind, ProcessDefinition, ProcessDefinitionBuilder, SequenceFlow};
pub use guard::{FlagCondition, FlagOp, Guard, GuardPredicate};
pub use instance::ProcessInstance;
pub use kernel::{start_instance, KernelEnv, TokenContext};
pub use registry::EngineRegistry;
pub use store::ProcessStore;
pub use store_memory::MemoryStore;
pub use token::{Token, TokenKind, TokenTree};
pub use types::{LifecycleEvent, TokenId, Value, Variables};
