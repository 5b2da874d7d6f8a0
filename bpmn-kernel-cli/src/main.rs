//! bpmn-kernel - validate and dry-run YAML process definitions.
//!
//! Usage:
//!   bpmn-kernel validate --process onboarding.yaml
//!   bpmn-kernel run --process onboarding.yaml --var score=80 [--with credit.yaml] [--reverse]
//!
//! `run` deploys the process on an in-memory engine, binds a logging
//! connector to every connector name the files reference, then completes
//! open user tasks one at a time until nothing is left to do.

use anyhow::{bail, Context, Result};
use bpmn_kernel_core::authoring::{dto_to_definition, parse_process_yaml, validate_dto, ProcessDefinitionDto};
use bpmn_kernel_core::{
    BpmnKernelEngine, EngineConfig, MemoryStore, ProcessDefinition, ProcessInstance, TokenId, Value,
    Variables,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "bpmn-kernel")]
#[command(about = "BPMN token kernel: validate and dry-run process definitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a process file, print its version hash
    Validate {
        /// Process definition (YAML)
        #[arg(long)]
        process: PathBuf,
    },

    /// Run a process to completion, auto-completing user tasks
    Run {
        /// Process definition to start (YAML)
        #[arg(long)]
        process: PathBuf,
        /// Additional definitions deployed alongside (call activity targets)
        #[arg(long = "with")]
        with: Vec<PathBuf>,
        /// Engine config (YAML)
        #[arg(long, env = "BPMN_KERNEL_CONFIG")]
        config: Option<PathBuf>,
        /// Start variable, `name=value` (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, Value)>,
        /// Complete the most recently opened task first
        #[arg(long)]
        reverse: bool,
        /// Give up after this many task completions
        #[arg(long, default_value = "1000")]
        max_steps: usize,
        /// Print the event log as JSON lines
        #[arg(long)]
        events: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bpmn_kernel_core=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate { process } => validate(&process),
        Command::Run {
            process,
            with,
            config,
            vars,
            reverse,
            max_steps,
            events,
        } => {
            let config = match config {
                Some(path) => EngineConfig::load(path)?,
                None => EngineConfig::default(),
            };
            let opts = RunOptions {
                reverse,
                max_steps,
                events,
            };
            run(&process, &with, config, vars.into_iter().collect(), opts).await
        }
    }
}

fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    if name.trim().is_empty() {
        return Err(format!("empty variable name in '{raw}'"));
    }
    Ok((name.trim().to_string(), Value::parse_literal(value)))
}

fn load_dto(path: &Path) -> Result<ProcessDefinitionDto> {
    let yaml = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_process_yaml(&yaml).with_context(|| format!("parsing {}", path.display()))
}

// ── validate ──

fn validate(path: &Path) -> Result<()> {
    let dto = load_dto(path)?;
    let errors = validate_dto(&dto);
    if !errors.is_empty() {
        for e in &errors {
            println!("  {e}");
        }
        bail!("{}: {} validation error(s)", path.display(), errors.len());
    }
    let definition = dto_to_definition(&dto)?;
    println!(
        "{}: ok ({} nodes, version {})",
        definition.key,
        definition.graph.node_count(),
        hex::encode(definition.version)
    );
    Ok(())
}

// ── run ──

struct RunOptions {
    reverse: bool,
    max_steps: usize,
    events: bool,
}

async fn run(
    process: &Path,
    with: &[PathBuf],
    config: EngineConfig,
    variables: Variables,
    opts: RunOptions,
) -> Result<()> {
    let main = load_dto(process)?;
    let mut dtos = Vec::with_capacity(with.len() + 1);
    for path in with {
        dtos.push(load_dto(path)?);
    }
    dtos.push(main.clone());

    let mut engine = BpmnKernelEngine::new(config, Arc::new(MemoryStore::new()));
    for name in connector_names(&dtos) {
        let bound = name.clone();
        engine = engine.with_connector_fn(name, move |cx| {
            info!(
                connector = %bound,
                node = %cx.node().id,
                token = %cx.token().label(),
                "connector invoked"
            );
            Ok(())
        });
    }
    for dto in &dtos {
        engine.deploy_dto(dto)?;
    }

    let root = engine.start_process(&main.id, variables).await?;
    info!(instance_id = %root, process_key = %main.id, "started");

    let mut steps = 0;
    while let Some((instance_id, node_id, token)) = next_task(&engine, opts.reverse).await? {
        if steps == opts.max_steps {
            bail!("gave up after {steps} task completions");
        }
        steps += 1;
        let instance = engine.instance(instance_id).await?;
        if instance.open_task(&node_id).is_some() {
            engine.complete_task(instance_id, &node_id, Variables::new()).await?;
        } else {
            engine.signal(instance_id, token).await?;
        }
    }

    for id in engine.list_instances(None).await? {
        let instance = engine.instance(id).await?;
        let definition = engine.definition(&instance.process_key)?;
        print_instance(&instance, &definition);
        if opts.events {
            for (seq, event) in engine.events(id, 0).await? {
                println!("    {seq:>4} {}", serde_json::to_string(&event)?);
            }
        }
    }
    println!("{steps} task(s) completed");
    Ok(())
}

/// Every connector a set of definitions references, service tasks and
/// listeners alike.
fn connector_names(dtos: &[ProcessDefinitionDto]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for dto in dtos {
        for scope in dto.scopes() {
            for node in scope.nodes {
                if let Some(c) = node.spec.connector() {
                    names.insert(c.to_string());
                }
                names.extend(node.listeners.iter().map(|l| l.connector.clone()));
            }
        }
    }
    names
}

/// Oldest (or newest) open work item across every live instance.
async fn next_task(engine: &BpmnKernelEngine, reverse: bool) -> Result<Option<(Uuid, String, TokenId)>> {
    let mut open = Vec::new();
    for id in engine.list_instances(None).await? {
        let instance = engine.instance(id).await?;
        if instance.is_ended() || instance.suspended {
            continue;
        }
        open.extend(
            instance
                .work_items
                .iter()
                .map(|w| (w.created_at, id, w.node_id.clone(), w.token)),
        );
    }
    // Stable sort keeps arrival order for items opened in the same millisecond.
    open.sort_by_key(|(created_at, ..)| *created_at);
    let pick = if reverse { open.pop() } else { open.into_iter().next() };
    Ok(pick.map(|(_, id, node, token)| (id, node, token)))
}

fn print_instance(instance: &ProcessInstance, definition: &ProcessDefinition) {
    let state = if instance.is_ended() { "ended" } else { "waiting" };
    println!(
        "{} {} [{}] v{} def {}",
        instance.instance_id,
        instance.process_key,
        state,
        instance.version,
        hex::encode(&instance.definition_version[..4])
    );
    print_token(instance, definition, TokenId::ROOT, 1);
    for (name, value) in &instance.variables {
        println!("    {name} = {value}");
    }
}

fn print_token(instance: &ProcessInstance, definition: &ProcessDefinition, id: TokenId, depth: usize) {
    let Some(token) = instance.token(id) else {
        return;
    };
    let state = match (token.ended, token.active) {
        (true, _) => "ended",
        (false, true) => "active",
        (false, false) => "inactive",
    };
    println!(
        "{:indent$}{} @ {} ({state})",
        "",
        token.label(),
        definition.node(token.current_node).id,
        indent = depth * 2
    );
    for child in &token.children {
        print_token(instance, definition, *child, depth + 1);
    }
}
