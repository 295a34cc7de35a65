pub mod builders;
pub mod fake_units;

use std::sync::{Arc, Once};

use sectiondag::dag::TaskCatalog;
use sectiondag::engine::{PipelineEvent, Runtime, TaskEvent};
use sectiondag::reference::ReferenceLoader;
use sectiondag::store::{MemoryStateStore, StateStore, Subject};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

pub use builders::{CatalogBuilder, TaskDefBuilder};
pub use fake_units::{Invocation, Script, ScriptedUnit};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// A memory store holding one empty subject.
pub fn store_with_subject(id: &str) -> Arc<MemoryStateStore> {
    let store = Arc::new(MemoryStateStore::new());
    store.put_subject(Subject::new(id)).unwrap();
    store
}

/// Runtime over `catalog` with every task bound to `unit` and no reference
/// material.
pub fn runtime_for(
    catalog: TaskCatalog,
    unit: &ScriptedUnit,
    store: Arc<MemoryStateStore>,
) -> Runtime {
    let registry = unit.registry_for(&catalog);
    Runtime::new(
        Arc::new(catalog),
        Arc::new(registry),
        store,
        Arc::new(ReferenceLoader::empty()),
    )
}

/// Unbounded-enough channel plus a collector for everything sent on it.
pub fn event_channel() -> (mpsc::Sender<PipelineEvent>, mpsc::Receiver<PipelineEvent>) {
    mpsc::channel(256)
}

/// Drain a receiver whose sender has been dropped.
pub async fn collect_events(mut rx: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    while let Some(ev) = rx.recv().await {
        out.push(ev);
    }
    out
}

/// Only the task events, in stream order.
pub fn task_events(events: &[PipelineEvent]) -> Vec<TaskEvent> {
    events.iter().filter_map(|e| e.as_task().cloned()).collect()
}
