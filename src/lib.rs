// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod reference;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, TaskRef};
use crate::config::loader::load_and_validate;
use crate::config::model::CatalogFile;
use crate::engine::{Pipeline, PipelineEvent};
use crate::exec::ExecutionRegistry;
use crate::store::{JsonFileStore, StateStore, Subject};

/// Store location used when `--store` is not given, relative to the
/// catalog's directory.
pub const DEFAULT_STORE_PATH: &str = ".sectiondag/state.json";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - catalog loading and validation
/// - the JSON state store
/// - execution units (one shell command per task)
/// - the pipeline operations behind each subcommand
pub async fn run(args: CliArgs) -> Result<()> {
    let catalog_path = PathBuf::from(&args.catalog);
    let cfg = load_and_validate(&catalog_path)?;

    if let Command::Catalog = args.command {
        print_catalog(&cfg);
        return Ok(());
    }

    let root = config_root_dir(&catalog_path);
    let store_path = args
        .store
        .clone()
        .unwrap_or_else(|| root.join(DEFAULT_STORE_PATH));
    debug!(store = ?store_path, "using JSON state store");
    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::new(store_path));

    let registry = ExecutionRegistry::from_catalog_file(&cfg);
    let pipeline = Pipeline::from_catalog_file(&cfg, &root, registry, Arc::clone(&store))?;

    match args.command {
        Command::Run { subject, phase } => run_phase(&pipeline, &subject, &phase).await,
        Command::Rerun(TaskRef { subject, task }) => {
            let event = pipeline.regenerate(&subject, &task).await?;
            println!("{}", serde_json::to_string(&event)?);
            if event.error.is_some() {
                bail!("task '{task}' failed");
            }
            Ok(())
        }
        Command::Lock(TaskRef { subject, task }) => {
            let run = pipeline.set_locked(&subject, &task, true).await?;
            println!("{}", serde_json::to_string(&run)?);
            Ok(())
        }
        Command::Unlock(TaskRef { subject, task }) => {
            let run = pipeline.set_locked(&subject, &task, false).await?;
            println!("{}", serde_json::to_string(&run)?);
            Ok(())
        }
        Command::Edit {
            target,
            content_file,
        } => {
            let content = std::fs::read_to_string(&content_file)
                .with_context(|| format!("reading content file {:?}", content_file))?;
            let run = pipeline
                .edit_content(&target.subject, &target.task, content)
                .await?;
            println!("{}", serde_json::to_string(&run)?);
            Ok(())
        }
        Command::Status { subject } => {
            let runs = pipeline.task_runs(&subject)?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
            Ok(())
        }
        Command::Subject { id, set } => {
            let subject = upsert_subject(store.as_ref(), &id, &set)?;
            println!("{}", serde_json::to_string_pretty(&subject)?);
            Ok(())
        }
        Command::Catalog => Ok(()),
    }
}

/// Run a phase, printing each event as one JSON line.
async fn run_phase(pipeline: &Pipeline, subject: &str, phase: &str) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<PipelineEvent>(64);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", event.to_json());
        }
    });

    let result = pipeline.run_phase(subject, phase, tx).await;
    // The sender is gone once `run_phase` returns, so the printer drains and
    // exits.
    printer.await.context("event printer task failed")?;

    let summary = result?;
    info!(
        subject = %summary.subject,
        phase = %summary.phase,
        failed = ?summary.failed,
        not_launched = ?summary.not_launched,
        "run complete"
    );
    Ok(())
}

fn upsert_subject(store: &dyn StateStore, id: &str, assignments: &[String]) -> Result<Subject> {
    let mut subject = store.get_subject(id)?.unwrap_or_else(|| Subject::new(id));
    for assignment in assignments {
        let Some((field, raw)) = assignment.split_once('=') else {
            bail!("invalid --set value {assignment:?}; expected FIELD=VALUE");
        };
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::from(raw));
        subject.fields.insert(field.trim().to_string(), value);
    }
    store.put_subject(subject.clone())?;
    Ok(subject)
}

/// Figure out the directory relative paths in the catalog resolve against.
///
/// - If the catalog path has a non-empty parent (e.g. "configs/Sectiondag.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Sectiondag.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Dry-run output: print phases, tasks, deps and commands.
fn print_catalog(cfg: &CatalogFile) {
    println!("sectiondag catalog");
    println!(
        "  config.on_dependency_failure = {:?}",
        cfg.config.on_dependency_failure
    );
    println!("  config.max_concurrency = {}", cfg.config.max_concurrency);
    println!("  config.stage_field = {}", cfg.config.stage_field);
    println!();

    let catalog = crate::dag::TaskCatalog::from_catalog_file(cfg);
    for phase in catalog.phases() {
        println!("phase {} (context: {:?}):", phase.name, phase.context);
        if let Some(ref s) = phase.start_stage {
            println!("  start_stage: {s}");
        }
        if let Some(ref s) = phase.terminal_stage {
            println!("  terminal_stage: {s}");
        }

        let Ok(tasks) = catalog.list_tasks(&phase.name) else {
            continue;
        };
        for task in tasks {
            println!("  - {} [{}] \"{}\"", task.key, task.order, task.label);
            if !task.depends_on.is_empty() {
                println!("      after: {:?}", task.depends_on);
            }
            if let Some(cmd) = cfg.task.get(&task.key).and_then(|t| t.cmd.as_deref()) {
                println!("      cmd: {cmd}");
            }
        }
    }

    if !cfg.projection.is_empty() {
        println!();
        println!("projections ({}):", cfg.projection.len());
        for p in cfg.projection.iter() {
            println!("  - {} -> {:?}", p.task, p.kind);
        }
    }

    debug!("catalog listing complete (no execution)");
}
