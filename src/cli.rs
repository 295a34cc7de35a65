// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `sectiondag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sectiondag",
    version,
    about = "Run dependency-ordered content generation tasks for a subject.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the catalog file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Sectiondag.toml", global = true)]
    pub catalog: String,

    /// Path to the JSON state store.
    ///
    /// Default: `.sectiondag/state.json` next to the catalog file.
    #[arg(long, value_name = "PATH", global = true)]
    pub store: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SECTIONDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run every task of a phase, printing one JSON event per line.
    Run {
        #[arg(long, value_name = "ID")]
        subject: String,
        #[arg(long, value_name = "NAME")]
        phase: String,
    },
    /// Unlock and regenerate a single task.
    Rerun(TaskRef),
    /// Lock a task so phase runs keep its stored content.
    Lock(TaskRef),
    /// Unlock a task.
    Unlock(TaskRef),
    /// Replace a task's content from a file (locks the task).
    Edit {
        #[command(flatten)]
        target: TaskRef,
        #[arg(long, value_name = "PATH")]
        content_file: PathBuf,
    },
    /// Print the stored task runs of a subject as JSON.
    Status {
        #[arg(long, value_name = "ID")]
        subject: String,
    },
    /// Create a subject or set fields on it.
    Subject {
        #[arg(long, value_name = "ID")]
        id: String,
        /// `field=value`; the value is parsed as JSON when possible.
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        set: Vec<String>,
    },
    /// Parse + validate the catalog and list phases and tasks without
    /// running anything.
    Catalog,
}

#[derive(Debug, Clone, Args)]
pub struct TaskRef {
    #[arg(long, value_name = "ID")]
    pub subject: String,
    #[arg(long, value_name = "KEY")]
    pub task: String,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
