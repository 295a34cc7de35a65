// src/exec/unit.rs

//! The execution unit abstraction.
//!
//! The runtime hands each launched task to an [`ExecutionUnit`] and only
//! looks at the returned [`GenerationOutput`] / [`GenerationError`]. Units
//! never touch the store or the completed-output map; all persistence goes
//! through the runtime.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::dag::DependencyContext;
use crate::reference::ReferenceBag;
use crate::store::Subject;

/// Everything a unit gets to see for one task launch.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task_key: String,
    pub phase: String,
    pub subject: Arc<Subject>,
    pub reference: ReferenceBag,
    pub context: DependencyContext,
}

/// JSON form of a [`GenerationRequest`], as written to a command's stdin.
#[derive(Debug, Serialize)]
pub struct RequestPayload<'a> {
    pub task: &'a str,
    pub phase: &'a str,
    pub subject: &'a Subject,
    pub reference: &'a std::collections::BTreeMap<String, String>,
    pub dependencies: &'a DependencyContext,
}

impl GenerationRequest {
    pub fn payload(&self) -> RequestPayload<'_> {
        RequestPayload {
            task: &self.task_key,
            phase: &self.phase,
            subject: &self.subject,
            reference: &self.reference,
            dependencies: &self.context,
        }
    }
}

/// Successful result of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutput {
    pub content: String,
    pub generator_id: Option<String>,
    pub tokens_used: u64,
    /// Wall-clock time reported by the unit. `0` lets the runtime fill in
    /// its own measurement.
    pub duration_ms: u64,
}

impl GenerationOutput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_generator(mut self, id: impl Into<String>) -> Self {
        self.generator_id = Some(id.into());
        self
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }
}

/// Per-task failure. Recorded on the task run, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type UnitFuture<'a> =
    Pin<Box<dyn Future<Output = Result<GenerationOutput, GenerationError>> + Send + 'a>>;

/// Performs the work of one task.
///
/// Must be safe to call concurrently for the same subject.
pub trait ExecutionUnit: Send + Sync {
    fn execute(&self, request: GenerationRequest) -> UnitFuture<'_>;
}

/// Wraps a synchronous function and runs it on Tokio's blocking pool.
pub struct BlockingUnit<F> {
    f: Arc<F>,
}

impl<F> BlockingUnit<F>
where
    F: Fn(&GenerationRequest) -> Result<GenerationOutput, GenerationError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl<F> ExecutionUnit for BlockingUnit<F>
where
    F: Fn(&GenerationRequest) -> Result<GenerationOutput, GenerationError> + Send + Sync + 'static,
{
    fn execute(&self, request: GenerationRequest) -> UnitFuture<'_> {
        let f = Arc::clone(&self.f);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || f(&request)).await {
                Ok(result) => result,
                Err(join_err) if join_err.is_panic() => {
                    Err(GenerationError::new("execution unit panicked"))
                }
                Err(join_err) => Err(GenerationError::new(format!(
                    "blocking execution unit did not finish: {join_err}"
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            task_key: "gate".into(),
            phase: "analysis".into(),
            subject: Arc::new(Subject::new("job-1").with_field("company", "Acme")),
            reference: Arc::new(BTreeMap::from([("resume".into(), "cv".into())])),
            context: DependencyContext::new()
                .with_entry("cleanup", Some("jd"))
                .with_entry("research", None),
        }
    }

    #[tokio::test]
    async fn blocking_unit_sees_request_and_returns_output() {
        let unit = BlockingUnit::new(|req: &GenerationRequest| {
            let jd = req.context.get_or("research", "[missing]");
            Ok(GenerationOutput::new(format!("{}:{}", req.task_key, jd)).with_tokens(3))
        });

        let out = unit.execute(request()).await.unwrap();
        assert_eq!(out.content, "gate:[missing]");
        assert_eq!(out.tokens_used, 3);
    }

    #[tokio::test]
    async fn blocking_unit_panic_becomes_generation_error() {
        let unit = BlockingUnit::new(|_: &GenerationRequest| -> Result<GenerationOutput, GenerationError> {
            panic!("boom")
        });
        let err = unit.execute(request()).await.unwrap_err();
        assert_eq!(err.message, "execution unit panicked");
    }

    #[test]
    fn payload_serialises_failed_dependencies_as_null() {
        let req = request();
        let json = serde_json::to_value(req.payload()).unwrap();
        assert_eq!(json["task"], "gate");
        assert_eq!(json["subject"]["fields"]["company"], "Acme");
        assert_eq!(json["reference"]["resume"], "cv");
        assert!(json["dependencies"]["research"].is_null());
        assert_eq!(json["dependencies"]["cleanup"], "jd");
    }
}
