use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sectiondag::dag::{DependencyContext, TaskCatalog};
use sectiondag::exec::{
    ExecutionRegistry, ExecutionUnit, GenerationError, GenerationOutput, GenerationRequest,
    UnitFuture,
};

/// What a scripted task does when executed.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(String),
    Fail(String),
    Panic,
}

/// One recorded call into the unit.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub key: String,
    pub phase: String,
    pub context: DependencyContext,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    invocations: Vec<Invocation>,
    in_flight_by_key: HashMap<String, usize>,
    overlapping_same_key: Vec<String>,
}

/// A fake execution unit that:
/// - records every invocation and the dependency context it saw
/// - returns a scripted success / failure (or panics) per task key
/// - optionally sleeps per task key to shape completion order
/// - tracks how many units were in flight at once
///
/// Unscripted keys succeed with `"<key> output"`.
#[derive(Clone, Default)]
pub struct ScriptedUnit {
    inner: Arc<Mutex<Inner>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(self, key: &str, content: &str) -> Self {
        self.script(key, Script::Succeed(content.to_string()))
    }

    pub fn fail(self, key: &str, message: &str) -> Self {
        self.script(key, Script::Fail(message.to_string()))
    }

    pub fn panic(self, key: &str) -> Self {
        self.script(key, Script::Panic)
    }

    pub fn delay(self, key: &str, delay: Duration) -> Self {
        self.inner
            .lock()
            .unwrap()
            .delays
            .insert(key.to_string(), delay);
        self
    }

    fn script(self, key: &str, script: Script) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(key.to_string(), script);
        self
    }

    /// A registry binding this unit to every task of `catalog`.
    pub fn registry_for(&self, catalog: &TaskCatalog) -> ExecutionRegistry {
        let mut registry = ExecutionRegistry::new();
        let unit: Arc<dyn ExecutionUnit> = Arc::new(self.clone());
        for key in catalog.keys() {
            registry.register_arc(key, Arc::clone(&unit));
        }
        registry
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.inner.lock().unwrap().invocations.clone()
    }

    /// Keys in the order their units were entered.
    pub fn executed_keys(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.key).collect()
    }

    pub fn times_executed(&self, key: &str) -> usize {
        self.invocations().iter().filter(|i| i.key == key).count()
    }

    pub fn context_of(&self, key: &str) -> Option<DependencyContext> {
        self.invocations()
            .into_iter()
            .rev()
            .find(|i| i.key == key)
            .map(|i| i.context)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Keys that were ever executing twice at the same time.
    pub fn overlapping_keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().overlapping_same_key.clone()
    }

    fn enter(&self, request: &GenerationRequest) -> (Script, Option<Duration>) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut inner = self.inner.lock().unwrap();
        inner.invocations.push(Invocation {
            key: request.task_key.clone(),
            phase: request.phase.clone(),
            context: request.context.clone(),
        });
        let count = inner
            .in_flight_by_key
            .entry(request.task_key.clone())
            .or_default();
        *count += 1;
        if *count > 1 {
            inner.overlapping_same_key.push(request.task_key.clone());
        }

        let script = inner
            .scripts
            .get(&request.task_key)
            .cloned()
            .unwrap_or_else(|| Script::Succeed(format!("{} output", request.task_key)));
        let delay = inner.delays.get(&request.task_key).copied();
        (script, delay)
    }

    fn leave(&self, key: &str) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if let Some(count) = inner.in_flight_by_key.get_mut(key) {
            *count = count.saturating_sub(1);
        }
    }
}

impl ExecutionUnit for ScriptedUnit {
    fn execute(&self, request: GenerationRequest) -> UnitFuture<'_> {
        Box::pin(async move {
            let (script, delay) = self.enter(&request);

            // Yield at least once so sibling tasks get a chance to start.
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => tokio::task::yield_now().await,
            }

            self.leave(&request.task_key);

            match script {
                Script::Succeed(content) => Ok(GenerationOutput::new(content)
                    .with_generator("scripted")
                    .with_tokens(1)),
                Script::Fail(message) => Err(GenerationError::new(message)),
                Script::Panic => panic!("scripted panic in task '{}'", request.task_key),
            }
        })
    }
}
