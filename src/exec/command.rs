// src/exec/command.rs

//! Process-backed execution unit.
//!
//! The task's `cmd` runs through the platform shell. The request goes to the
//! child's stdin as JSON; stdout is the result.

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::unit::{
    ExecutionUnit, GenerationError, GenerationOutput, GenerationRequest, UnitFuture,
};
use crate::types::OutputFormat;

/// Number of trailing stderr bytes kept in error messages.
const STDERR_TAIL_BYTES: usize = 2048;

#[derive(Debug, Clone)]
pub struct CommandUnit {
    cmd: String,
    output: OutputFormat,
    timeout: Option<Duration>,
    generator: Option<String>,
}

/// stdout shape for `output = "json"`.
#[derive(Debug, Deserialize)]
struct JsonOutput {
    content: String,
    #[serde(default)]
    generator: Option<String>,
    #[serde(default)]
    tokens_used: u64,
}

impl CommandUnit {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            output: OutputFormat::Text,
            timeout: None,
            generator: None,
        }
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = Some(generator.into());
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    async fn run(&self, request: GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        let started = Instant::now();
        let key = request.task_key.clone();

        let stdin_json = serde_json::to_vec(&request.payload()).map_err(|e| {
            GenerationError::new(format!("serialising request for task '{key}': {e}"))
        })?;

        info!(task = %key, cmd = %self.cmd, "starting task process");

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            GenerationError::new(format!("spawning process for task '{key}': {e}"))
        })?;

        // stdin is written concurrently with draining stdout/stderr.
        if let Some(mut stdin) = child.stdin.take() {
            let task = key.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&stdin_json).await {
                    debug!(task = %task, error = %e, "child closed stdin early");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let collect = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let read_out = async {
                if let Some(s) = stdout.as_mut() {
                    let _ = s.read_to_end(&mut out).await;
                }
            };
            let read_err = async {
                if let Some(s) = stderr.as_mut() {
                    let _ = s.read_to_end(&mut err).await;
                }
            };
            tokio::join!(read_out, read_err);
            let status = child.wait().await;
            (status, out, err)
        };

        let (status, out, err) = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, collect).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(task = %key, timeout = ?limit, "task process timed out");
                    return Err(GenerationError::new(format!(
                        "task '{key}' timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => collect.await,
        };

        let status = status.map_err(|e| {
            GenerationError::new(format!("waiting for process of task '{key}': {e}"))
        })?;
        let stderr_tail = tail(&err);

        info!(
            task = %key,
            exit_code = status.code().unwrap_or(-1),
            success = status.success(),
            "task process exited"
        );

        if !status.success() {
            return Err(GenerationError::new(with_stderr(
                format!(
                    "task '{key}' exited with code {}",
                    status.code().unwrap_or(-1)
                ),
                &stderr_tail,
            )));
        }

        let stdout = String::from_utf8_lossy(&out).into_owned();
        let mut output = self.parse_stdout(&key, stdout, &stderr_tail)?;

        if output.generator_id.is_none() {
            output.generator_id = self.generator.clone();
        }
        output.duration_ms = started.elapsed().as_millis() as u64;
        Ok(output)
    }

    fn parse_stdout(
        &self,
        key: &str,
        stdout: String,
        stderr_tail: &str,
    ) -> Result<GenerationOutput, GenerationError> {
        let output = match self.output {
            OutputFormat::Text => GenerationOutput::new(stdout.trim_end().to_string()),
            OutputFormat::Json => {
                let parsed: JsonOutput = serde_json::from_str(stdout.trim()).map_err(|e| {
                    GenerationError::new(with_stderr(
                        format!("task '{key}' printed invalid JSON: {e}"),
                        stderr_tail,
                    ))
                })?;
                GenerationOutput {
                    content: parsed.content,
                    generator_id: parsed.generator,
                    tokens_used: parsed.tokens_used,
                    duration_ms: 0,
                }
            }
        };

        if output.content.trim().is_empty() {
            return Err(GenerationError::new(with_stderr(
                format!("task '{key}' produced no content"),
                stderr_tail,
            )));
        }

        Ok(output)
    }
}

impl ExecutionUnit for CommandUnit {
    fn execute(&self, request: GenerationRequest) -> UnitFuture<'_> {
        Box::pin(self.run(request))
    }
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

fn with_stderr(message: String, stderr_tail: &str) -> String {
    if stderr_tail.is_empty() {
        message
    } else {
        format!("{message}; stderr: {stderr_tail}")
    }
}
