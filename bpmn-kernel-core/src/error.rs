use crate::graph::NodeKind;
use crate::types::TokenId;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the token kernel.
///
/// Everything except [`KernelError::Business`] is structural: the dispatch is
/// aborted and the caller must discard its working copy of the instance.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("node '{node_id}' has no outgoing sequence flows (token {token})")]
    NoOutgoingFlows { node_id: String, token: TokenId },

    #[error("no outgoing sequence flow of node '{node_id}' satisfied its guard (token {token})")]
    NoSatisfiedFlow { node_id: String, token: TokenId },

    #[error("token {parent} already has a child named '{name}'")]
    DuplicateChild { parent: TokenId, name: String },

    #[error("token {token} cannot be operated on: {reason}")]
    TokenNotOperable { token: TokenId, reason: String },

    #[error("unknown flow node: {0}")]
    UnknownNode(String),

    #[error("unknown token: {0}")]
    UnknownToken(TokenId),

    #[error("no behavior registered for node kind {0:?}")]
    MissingBehavior(NodeKind),

    #[error("no connector registered under '{0}'")]
    UnknownConnector(String),

    #[error("invalid process definition: {0}")]
    InvalidDefinition(String),

    /// Failure raised by a connector or listener hook, passed through as-is.
    #[error(transparent)]
    Business(anyhow::Error),
}

impl KernelError {
    /// True for the error kinds that indicate a broken graph or token tree
    /// rather than a failing hook.
    pub fn is_structural(&self) -> bool {
        !matches!(self, KernelError::Business(_))
    }

    /// Classify an error returned by a connector. Kernel errors raised from
    /// inside the hook (e.g. a nested `leave()`) keep their kind.
    pub(crate) fn from_hook(err: anyhow::Error) -> Self {
        match err.downcast::<KernelError>() {
            Ok(kernel) => kernel,
            Err(other) => KernelError::Business(other),
        }
    }
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;

/// Errors raised by the engine service, its registry and stores.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine '{0}' is closed")]
    EngineClosed(String),

    #[error("engine '{0}' is already registered")]
    DuplicateEngine(String),

    #[error("no engine registered under '{0}'")]
    UnknownEngine(String),

    #[error("no process deployed under key '{0}'")]
    UnknownProcess(String),

    #[error("process instance {0} not found")]
    UnknownInstance(Uuid),

    #[error("process instance {0} has already ended")]
    InstanceEnded(Uuid),

    #[error("process instance {0} is suspended")]
    InstanceSuspended(Uuid),

    #[error("no open work item for task '{node_id}' in instance {instance_id}")]
    NoOpenTask { instance_id: Uuid, node_id: String },

    #[error("process instance {instance_id} was modified concurrently (expected version {expected}, found {actual})")]
    ConcurrentModification {
        instance_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("call activity nesting exceeds {limit} levels (calling '{process_key}')")]
    CallDepthExceeded { process_key: String, limit: u32 },
}
