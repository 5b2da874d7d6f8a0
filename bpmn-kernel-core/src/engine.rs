//! Engine service.
//!
//! Owns the deployed definitions and the connector table, and wraps every
//! kernel dispatch in a transaction: load the instance, run the dispatch on
//! a private copy, commit with an optimistic version check, then flush the
//! journal to the event log. A failed dispatch commits nothing.

use crate::authoring::{dto_to_definition, parse_process_yaml, ProcessDefinitionDto};
use crate::behavior::BehaviorRegistry;
use crate::config::EngineConfig;
use crate::connector::{Connector, ConnectorRegistry};
use crate::error::{EngineError, KernelError, KernelResult};
use crate::events::RuntimeEvent;
use crate::graph::ProcessDefinition;
use crate::instance::{ProcessInstance, SuperExecution};
use crate::kernel::{start_instance, KernelEnv, TokenContext};
use crate::store::ProcessStore;
use crate::types::*;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct DefinitionTable {
    by_version: HashMap<[u8; 32], Arc<ProcessDefinition>>,
    latest: HashMap<String, [u8; 32]>,
}

/// How strictly an instance is checked before a dispatch runs.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// External operations: the instance must be live and not suspended.
    External,
    /// Engine-internal follow-ups (call completion, resume).
    Internal,
}

type CommitFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A called instance already started on a private copy, waiting to be
/// committed after its caller.
struct PreparedCall {
    instance: ProcessInstance,
    calls: Vec<PreparedCall>,
}

pub struct BpmnKernelEngine {
    config: EngineConfig,
    store: Arc<dyn ProcessStore>,
    env: KernelEnv,
    definitions: RwLock<DefinitionTable>,
    closed: AtomicBool,
}

impl BpmnKernelEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn ProcessStore>) -> Self {
        let env = KernelEnv {
            record_history: config.record_history,
            ..KernelEnv::default()
        };
        Self {
            config,
            store,
            env,
            definitions: RwLock::new(DefinitionTable::default()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a connector before the engine is shared.
    pub fn with_connector(mut self, name: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        self.env.connectors.register(name, connector);
        self
    }

    pub fn with_connector_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut TokenContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.env.connectors.register_fn(name, f);
        self
    }

    pub fn with_connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.env.connectors = connectors;
        self
    }

    /// Replace the kind → behavior table.
    pub fn with_behaviors(mut self, behaviors: BehaviorRegistry) -> Self {
        self.env.behaviors = behaviors;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject every further operation. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(engine = %self.config.name, "engine closed");
        }
    }

    // ── Deployment ──

    pub fn deploy_yaml(&self, yaml: &str) -> Result<Arc<ProcessDefinition>> {
        let dto = parse_process_yaml(yaml)?;
        self.deploy_dto(&dto)
    }

    pub fn deploy_dto(&self, dto: &ProcessDefinitionDto) -> Result<Arc<ProcessDefinition>> {
        let definition = dto_to_definition(dto)?;
        self.deploy_definition(definition)
    }

    /// Make `definition` the latest version of its key. Every connector the
    /// definition references must already be registered.
    pub fn deploy_definition(&self, definition: ProcessDefinition) -> Result<Arc<ProcessDefinition>> {
        self.ensure_open()?;
        for (_, node) in definition.graph.nodes() {
            let referenced = node
                .connector
                .iter()
                .chain(node.listeners.iter().map(|l| &l.connector));
            for name in referenced {
                if !self.env.connectors.contains(name) {
                    return Err(KernelError::UnknownConnector(name.clone()).into());
                }
            }
        }

        let definition = Arc::new(definition);
        let mut table = self.definitions.write().map_err(|e| anyhow!("Lock: {}", e))?;
        table
            .by_version
            .entry(definition.version)
            .or_insert_with(|| definition.clone());
        table.latest.insert(definition.key.clone(), definition.version);
        info!(
            engine = %self.config.name,
            process_key = %definition.key,
            version = %hex::encode(&definition.version[..4]),
            nodes = definition.graph.node_count(),
            "process deployed"
        );
        Ok(definition)
    }

    /// Latest deployed definition for `process_key`.
    pub fn definition(&self, process_key: &str) -> Result<Arc<ProcessDefinition>> {
        let table = self.definitions.read().map_err(|e| anyhow!("Lock: {}", e))?;
        table
            .latest
            .get(process_key)
            .and_then(|v| table.by_version.get(v))
            .cloned()
            .ok_or_else(|| EngineError::UnknownProcess(process_key.to_string()).into())
    }

    fn definition_for(&self, instance: &ProcessInstance) -> Result<Arc<ProcessDefinition>> {
        let table = self.definitions.read().map_err(|e| anyhow!("Lock: {}", e))?;
        table
            .by_version
            .get(&instance.definition_version)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProcess(instance.process_key.clone()).into())
    }

    // ── Instance lifecycle ──

    /// Start the latest version of `process_key` and run it until every
    /// token waits or the instance ends. Returns the new instance id.
    pub async fn start_process(&self, process_key: &str, variables: Variables) -> Result<Uuid> {
        self.ensure_open()?;
        let definition = self.definition(process_key)?;
        let instance = ProcessInstance::new(&definition, variables);
        self.launch(instance, definition).await
    }

    /// Complete the open work item on `node_id`, merging `variables` first.
    pub async fn complete_task(&self, instance_id: Uuid, node_id: &str, variables: Variables) -> Result<()> {
        let node_id = node_id.to_string();
        self.dispatch(instance_id, Gate::External, move |instance, definition, env| {
            let token = instance.open_task(&node_id).ok_or_else(|| EngineError::NoOpenTask {
                instance_id: instance.instance_id,
                node_id: node_id.clone(),
            })?;
            ensure_operable(instance, token)?;
            merge_variables(env, instance, variables);
            TokenContext::new(instance, definition, env, token)?.execute()?;
            Ok(())
        })
        .await
    }

    /// Resume a waiting token by re-running its node's `leave`.
    pub async fn signal(&self, instance_id: Uuid, token: TokenId) -> Result<()> {
        self.dispatch(instance_id, Gate::External, move |instance, definition, env| {
            ensure_operable(instance, token)?;
            TokenContext::new(instance, definition, env, token)?.signal()?;
            Ok(())
        })
        .await
    }

    /// Move `token` straight to `target_node`, skipping flow evaluation.
    pub async fn jump(&self, instance_id: Uuid, token: TokenId, target_node: &str) -> Result<()> {
        let target_node = target_node.to_string();
        self.dispatch(instance_id, Gate::External, move |instance, definition, env| {
            ensure_operable(instance, token)?;
            let target = definition.find_node(&target_node)?;
            let mut cx = TokenContext::new(instance, definition, env, token)?;
            cx.jump_to(target);
            cx.leave()?;
            Ok(())
        })
        .await
    }

    pub async fn set_variables(&self, instance_id: Uuid, variables: Variables) -> Result<()> {
        self.dispatch(instance_id, Gate::External, move |instance, _, env| {
            merge_variables(env, instance, variables);
            Ok(())
        })
        .await
    }

    pub async fn suspend_instance(&self, instance_id: Uuid) -> Result<()> {
        self.dispatch(instance_id, Gate::External, |instance, _, env| {
            instance.suspended = true;
            for token in instance.tokens.iter_mut().filter(|t| !t.ended) {
                token.suspended = true;
            }
            record(env, instance, RuntimeEvent::InstanceSuspended);
            Ok(())
        })
        .await
    }

    pub async fn resume_instance(&self, instance_id: Uuid) -> Result<()> {
        self.dispatch(instance_id, Gate::Internal, |instance, _, env| {
            if !instance.suspended {
                return Ok(());
            }
            instance.suspended = false;
            for token in instance.tokens.iter_mut() {
                token.suspended = false;
            }
            record(env, instance, RuntimeEvent::InstanceResumed);
            Ok(())
        })
        .await
    }

    /// Locked tokens reject `complete_task`, `signal` and `jump`.
    pub async fn lock_token(&self, instance_id: Uuid, token: TokenId) -> Result<()> {
        self.set_lock(instance_id, token, true).await
    }

    pub async fn unlock_token(&self, instance_id: Uuid, token: TokenId) -> Result<()> {
        self.set_lock(instance_id, token, false).await
    }

    async fn set_lock(&self, instance_id: Uuid, token: TokenId, locked: bool) -> Result<()> {
        self.dispatch(instance_id, Gate::External, move |instance, _, _| {
            let t = instance
                .tokens
                .get_mut(token)
                .ok_or(KernelError::UnknownToken(token))?;
            if t.ended {
                return Err(KernelError::TokenNotOperable {
                    token,
                    reason: "token has ended".into(),
                }
                .into());
            }
            t.locked = locked;
            Ok(())
        })
        .await
    }

    // ── Observation ──

    pub async fn instance(&self, instance_id: Uuid) -> Result<ProcessInstance> {
        self.store
            .load_instance(instance_id)
            .await?
            .ok_or_else(|| EngineError::UnknownInstance(instance_id).into())
    }

    pub async fn list_instances(&self, process_key: Option<&str>) -> Result<Vec<Uuid>> {
        self.store.list_instances(process_key).await
    }

    pub async fn events(&self, instance_id: Uuid, from_seq: u64) -> Result<Vec<(u64, RuntimeEvent)>> {
        self.store.read_events(instance_id, from_seq).await
    }

    // ── Transactions ──

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::EngineClosed(self.config.name.clone()).into());
        }
        Ok(())
    }

    /// Run `op` against a private copy of the stored instance and commit it
    /// only if `op` succeeds.
    async fn dispatch<F>(&self, instance_id: Uuid, gate: Gate, op: F) -> Result<()>
    where
        F: FnOnce(&mut ProcessInstance, &ProcessDefinition, &KernelEnv) -> Result<()> + Send,
    {
        self.ensure_open()?;
        let mut working = self.instance(instance_id).await?;
        if working.ended {
            return Err(EngineError::InstanceEnded(instance_id).into());
        }
        if gate == Gate::External && working.suspended {
            return Err(EngineError::InstanceSuspended(instance_id).into());
        }
        let definition = self.definition_for(&working)?;

        if let Err(e) = op(&mut working, &definition, &self.env) {
            warn!(%instance_id, error = %e, "operation rejected, nothing committed");
            return Err(e);
        }
        self.finish(working).await
    }

    async fn launch(&self, mut instance: ProcessInstance, definition: Arc<ProcessDefinition>) -> Result<Uuid> {
        start_instance(&mut instance, &definition, &self.env)?;
        let instance_id = instance.instance_id;
        self.finish(instance).await?;
        Ok(instance_id)
    }

    /// Start every process `working` queued through its call activities,
    /// and the processes those queue in turn, on private copies. Nothing
    /// is committed: any failure here leaves the store untouched.
    fn prepare_calls(&self, working: &mut ProcessInstance) -> Result<Vec<PreparedCall>> {
        let mut prepared = Vec::new();
        for call in std::mem::take(&mut working.pending_calls) {
            let definition = self.definition(&call.called_element)?;
            let depth = working.call_depth + 1;
            if depth > self.config.max_call_depth {
                return Err(EngineError::CallDepthExceeded {
                    process_key: call.called_element,
                    limit: self.config.max_call_depth,
                }
                .into());
            }
            let mut called = ProcessInstance::new(&definition, working.variables.clone());
            called.super_execution = Some(SuperExecution {
                instance_id: working.instance_id,
                token: call.token,
            });
            called.call_depth = depth;
            record(
                &self.env,
                working,
                RuntimeEvent::CallActivityStarted {
                    token: call.token,
                    node_id: call.node_id,
                    called_element: call.called_element,
                    sub_instance: called.instance_id,
                },
            );
            start_instance(&mut called, &definition, &self.env)?;
            let calls = self.prepare_calls(&mut called)?;
            prepared.push(PreparedCall {
                instance: called,
                calls,
            });
        }
        Ok(prepared)
    }

    /// Commit a successfully dispatched instance together with the called
    /// processes its call activities started.
    async fn finish(&self, mut working: ProcessInstance) -> Result<()> {
        let calls = self.prepare_calls(&mut working)?;
        self.settle(working, calls).await
    }

    /// Commit `working`, then the called instances prepared for it, and if
    /// it ended as a called instance hand control back to its caller.
    ///
    /// Boxed because `settle` and `complete_call` reach each other through
    /// `dispatch`.
    fn settle(&self, mut working: ProcessInstance, calls: Vec<PreparedCall>) -> CommitFuture<'_> {
        Box::pin(async move {
            self.commit(&mut working).await?;

            for call in calls {
                debug!(
                    caller = %working.instance_id,
                    called = %call.instance.instance_id,
                    process_key = %call.instance.process_key,
                    "starting called process"
                );
                self.settle(call.instance, call.calls).await?;
            }

            if working.ended {
                if let Some(caller) = working.super_execution {
                    self.complete_call(caller, &working).await?;
                }
            }
            Ok(())
        })
    }

    async fn commit(&self, instance: &mut ProcessInstance) -> Result<()> {
        let expected = instance.version;
        let journal = instance.drain_journal();
        instance.version = self.store.save_instance(instance, expected).await?;
        for event in &journal {
            self.store.append_event(instance.instance_id, event).await?;
        }
        debug!(
            instance_id = %instance.instance_id,
            version = instance.version,
            events = journal.len(),
            "committed"
        );
        Ok(())
    }

    /// Copy the called instance's variables back and resume the caller token.
    async fn complete_call(&self, caller: SuperExecution, called: &ProcessInstance) -> Result<()> {
        let parent = self.instance(caller.instance_id).await?;
        let waiting = parent.token(caller.token).is_some_and(|t| !t.ended);
        if parent.ended || !waiting {
            debug!(
                caller = %caller.instance_id,
                token = %caller.token,
                "caller no longer waiting, called result dropped"
            );
            return Ok(());
        }

        let variables = called.variables.clone();
        let sub_instance = called.instance_id;
        self.dispatch(caller.instance_id, Gate::Internal, move |instance, definition, env| {
            merge_variables(env, instance, variables);
            let mut cx = TokenContext::new(instance, definition, env, caller.token)?;
            cx.record(RuntimeEvent::CallActivityCompleted {
                token: caller.token,
                sub_instance,
            });
            cx.signal()?;
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for BpmnKernelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpmnKernelEngine")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn record(env: &KernelEnv, instance: &mut ProcessInstance, event: RuntimeEvent) {
    if env.record_history {
        instance.journal.push(event);
    }
}

fn merge_variables(env: &KernelEnv, instance: &mut ProcessInstance, variables: Variables) {
    if variables.is_empty() {
        return;
    }
    let names = variables.keys().cloned().collect();
    instance.variables.extend(variables);
    record(env, instance, RuntimeEvent::VariablesUpdated { names });
}

fn ensure_operable(instance: &ProcessInstance, token: TokenId) -> KernelResult<()> {
    let t = instance.token(token).ok_or(KernelError::UnknownToken(token))?;
    let reason = if t.ended {
        "token has ended"
    } else if t.locked {
        "token is locked"
    } else if t.suspended {
        "token is suspended"
    } else {
        return Ok(());
    };
    Err(KernelError::TokenNotOperable {
        token,
        reason: reason.to_string(),
    })
}
