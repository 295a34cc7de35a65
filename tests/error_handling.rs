// tests/error_handling.rs

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tempfile::{tempdir, NamedTempFile};

use sectiondag::config::{load_and_validate, CatalogFile};
use sectiondag::engine::{Pipeline, PipelineEvent};
use sectiondag::errors::SectionDagError;
use sectiondag::exec::ExecutionRegistry;
use sectiondag::fs::mock::MockFileSystem;
use sectiondag::store::{JsonFileStore, MemoryStateStore, StateStore, Subject};
use sectiondag_test_utils::builders::linear_chain;
use sectiondag_test_utils::{
    collect_events, event_channel, init_tracing, runtime_for, ScriptedUnit,
};

fn load(toml: &str) -> Result<CatalogFile, SectionDagError> {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{toml}").unwrap();
    load_and_validate(file.path())
}

fn pipeline_over(cfg: &CatalogFile, root: &Path, store: Arc<MemoryStateStore>) -> Pipeline {
    let registry = ExecutionRegistry::from_catalog_file(cfg);
    Pipeline::from_catalog_file(cfg, root, registry, store).unwrap()
}

#[test]
fn test_dag_cycle_returns_structured_error() {
    let result = load(
        r#"
[phase.p]

[task.A]
phase = "p"
cmd = "echo A"
after = ["B"]

[task.B]
phase = "p"
cmd = "echo B"
after = ["A"]
"#,
    );

    match result {
        Err(SectionDagError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"));
            assert!(msg.contains('A') || msg.contains('B'));
        }
        Err(e) => panic!("Expected DagCycle error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn test_unknown_dependency_returns_config_error() {
    let result = load(
        r#"
[phase.p]

[task.A]
phase = "p"
cmd = "echo A"
after = ["NonExistent"]
"#,
    );

    match result {
        Err(SectionDagError::ConfigError(msg)) => {
            assert!(msg.contains("unknown dependency"));
            assert!(msg.contains("NonExistent"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_cross_phase_dependency_is_rejected() {
    let result = load(
        r#"
[phase.analysis]
[phase.letter]

[task.research]
phase = "analysis"

[task.intro]
phase = "letter"
after = ["research"]
"#,
    );

    match result {
        Err(SectionDagError::ConfigError(msg)) => {
            assert!(msg.contains("another phase"));
            assert!(msg.contains("research"));
        }
        other => panic!("Expected ConfigError, got: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_undeclared_phase_and_bad_projection_are_rejected() {
    let err = load(
        r#"
[task.A]
phase = "nowhere"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SectionDagError::ConfigError(ref m) if m.contains("undeclared phase")));

    let err = load(
        r#"
[phase.p]

[task.A]
phase = "p"

[[projection]]
task = "ghost"
kind = "verdict"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SectionDagError::ConfigError(ref m) if m.contains("ghost")));
}

#[test]
fn test_invalid_toml_returns_toml_error() {
    let err = load("[task.A\nphase = ").unwrap_err();
    assert!(matches!(err, SectionDagError::TomlError(_)));
}

#[tokio::test]
async fn test_missing_execution_unit_fails_before_launch() {
    init_tracing();
    let cfg = load(
        r#"
[phase.p]
start_stage = "working"

[task.A]
phase = "p"
cmd = "echo A"

[task.B]
phase = "p"
after = ["A"]
"#,
    )
    .unwrap();

    let store = Arc::new(MemoryStateStore::new());
    store.put_subject(Subject::new("job-1")).unwrap();
    let pipeline = pipeline_over(&cfg, Path::new("."), Arc::clone(&store));

    let (tx, rx) = event_channel();
    let err = pipeline.run_phase("job-1", "p", tx).await.unwrap_err();
    assert!(matches!(err, SectionDagError::MissingExecutionUnit(ref k) if k == "B"));
    assert!(err.is_configuration());

    assert!(collect_events(rx).await.is_empty());
    assert!(pipeline.task_runs("job-1").unwrap().is_empty());
    let subject = store.get_subject("job-1").unwrap().unwrap();
    assert!(subject.field("pipeline_stage").is_none());
}

#[tokio::test]
async fn test_missing_reference_fails_before_launch() {
    let dir = tempdir().unwrap();
    let cfg = load(
        r#"
[reference]
resume = "resume.md"

[phase.p]

[task.A]
phase = "p"
cmd = "echo A"
"#,
    )
    .unwrap();

    let store = Arc::new(MemoryStateStore::new());
    store.put_subject(Subject::new("job-1")).unwrap();
    let pipeline = pipeline_over(&cfg, dir.path(), Arc::clone(&store));

    let (tx, rx) = event_channel();
    let err = pipeline.run_phase("job-1", "p", tx).await.unwrap_err();
    match err {
        SectionDagError::MissingReference { key, .. } => assert_eq!(key, "resume"),
        other => panic!("Expected MissingReference, got: {:?}", other),
    }
    assert!(collect_events(rx).await.is_empty());
}

#[tokio::test]
async fn test_store_write_failure_aborts_without_end_of_stream() {
    init_tracing();
    let fs = MockFileSystem::new();
    let path = Path::new("/state/doc.json");
    let store = Arc::new(JsonFileStore::with_fs(path, Arc::new(fs.clone())));
    store.put_subject(Subject::new("job-1")).unwrap();
    fs.deny_writes(path);

    let unit = ScriptedUnit::new();
    let registry = unit.registry_for(&linear_chain());
    let runtime = sectiondag::engine::Runtime::new(
        Arc::new(linear_chain()),
        Arc::new(registry),
        store,
        Arc::new(sectiondag::reference::ReferenceLoader::empty()),
    );

    let (tx, rx) = event_channel();
    let err = runtime
        .run_phase(Arc::new(Subject::new("job-1")), "p", tx)
        .await
        .unwrap_err();
    assert!(matches!(err, SectionDagError::Store(_)));

    let events = collect_events(rx).await;
    assert!(!events.contains(&PipelineEvent::EndOfStream));
    assert!(unit.invocations().is_empty());
}

#[tokio::test]
async fn test_unit_failures_are_not_invocation_errors() {
    let unit = ScriptedUnit::new().fail("A", "x").fail("B", "y").fail("C", "z");
    let store = Arc::new(MemoryStateStore::new());
    store.put_subject(Subject::new("job-1")).unwrap();
    let runtime = runtime_for(linear_chain(), &unit, store);

    let (tx, rx) = event_channel();
    let summary = runtime
        .run_phase(Arc::new(Subject::new("job-1")), "p", tx)
        .await
        .unwrap();
    assert_eq!(summary.failed, vec!["A", "B", "C"]);
    assert_eq!(collect_events(rx).await.last(), Some(&PipelineEvent::EndOfStream));
}
