// tests/pipeline_ops.rs

use std::error::Error;
use std::time::Duration;

use sectiondag::engine::{Pipeline, ProjectionTable, PromoteContent, TaskEvent};
use sectiondag::errors::SectionDagError;
use sectiondag::store::{StateStore, Subject, TaskRunPatch};
use sectiondag::types::TaskStatus;
use sectiondag_test_utils::builders::linear_chain;
use sectiondag_test_utils::{
    collect_events, event_channel, init_tracing, runtime_for, store_with_subject, task_events,
    with_timeout, ScriptedUnit,
};

type TestResult = Result<(), Box<dyn Error>>;

const SUBJECT: &str = "job-1";

fn pipeline(unit: &ScriptedUnit) -> (Pipeline, std::sync::Arc<sectiondag::store::MemoryStateStore>) {
    let store = store_with_subject(SUBJECT);
    let runtime = runtime_for(linear_chain(), unit, store.clone());
    (Pipeline::new(runtime), store)
}

#[tokio::test]
async fn regenerate_reruns_a_failed_task_with_stored_context() -> TestResult {
    init_tracing();
    let unit = ScriptedUnit::new().fail("B", "rate limited");
    let (pipeline, store) = pipeline(&unit);

    let (tx, _rx) = event_channel();
    pipeline.run_phase(SUBJECT, "p", tx).await?;
    assert_eq!(store.get_task_run(SUBJECT, "B")?.unwrap().status, TaskStatus::Failed);

    // Scripts are shared between clones.
    let _ = unit.clone().succeed("B", "B second try");

    let event = with_timeout(pipeline.regenerate(SUBJECT, "B")).await?;
    assert_eq!(event, TaskEvent::complete("B", "B second try"));
    assert_eq!(unit.times_executed("B"), 2);
    assert_eq!(unit.times_executed("C"), 1);

    let ctx = unit.context_of("B").unwrap();
    assert_eq!(ctx.get("A"), Some("A output"));
    assert!(!ctx.contains("C"));

    let b = store.get_task_run(SUBJECT, "B")?.unwrap();
    assert_eq!(b.status, TaskStatus::Complete);
    assert_eq!(b.content.as_deref(), Some("B second try"));
    assert!(b.error_message.is_none());
    Ok(())
}

#[tokio::test]
async fn regenerate_unlocks_a_locked_task() -> TestResult {
    let unit = ScriptedUnit::new();
    let (pipeline, store) = pipeline(&unit);

    pipeline.edit_content(SUBJECT, "A", "manual".to_string()).await?;
    assert!(store.get_task_run(SUBJECT, "A")?.unwrap().locked);

    let event = pipeline.regenerate(SUBJECT, "A").await?;
    assert_eq!(event.status, TaskStatus::Complete);

    let a = store.get_task_run(SUBJECT, "A")?.unwrap();
    assert!(!a.locked);
    assert_eq!(a.content.as_deref(), Some("A output"));
    Ok(())
}

#[tokio::test]
async fn failed_regeneration_keeps_previous_content() -> TestResult {
    let unit = ScriptedUnit::new();
    let (pipeline, store) = pipeline(&unit);

    let (tx, _rx) = event_channel();
    pipeline.run_phase(SUBJECT, "p", tx).await?;

    let _ = unit.clone().fail("C", "model unavailable");
    let event = pipeline.regenerate(SUBJECT, "C").await?;
    assert_eq!(event, TaskEvent::failed("C", "model unavailable"));

    let c = store.get_task_run(SUBJECT, "C")?.unwrap();
    assert_eq!(c.status, TaskStatus::Failed);
    assert_eq!(c.content.as_deref(), Some("C output"));
    assert_eq!(c.error_message.as_deref(), Some("model unavailable"));
    Ok(())
}

#[tokio::test]
async fn regenerate_applies_projections() -> TestResult {
    let unit = ScriptedUnit::new().succeed("A", "cleaned text");
    let store = store_with_subject(SUBJECT);
    let mut projections = ProjectionTable::new();
    projections.register("A", PromoteContent::new("jd_cleaned"));
    let runtime = runtime_for(linear_chain(), &unit, store.clone()).with_projections(projections);
    let pipeline = Pipeline::new(runtime);

    pipeline.regenerate(SUBJECT, "A").await?;

    let subject = store.get_subject(SUBJECT)?.unwrap();
    assert_eq!(subject.field_str("jd_cleaned"), Some("cleaned text"));
    Ok(())
}

#[tokio::test]
async fn unknown_task_and_subject_are_reported() -> TestResult {
    let unit = ScriptedUnit::new();
    let (pipeline, _store) = pipeline(&unit);

    let err = pipeline.regenerate(SUBJECT, "nope").await.unwrap_err();
    assert!(matches!(err, SectionDagError::TaskNotFound(ref k) if k == "nope"));

    let (tx, _rx) = event_channel();
    let err = pipeline.run_phase("job-404", "p", tx).await.unwrap_err();
    assert!(matches!(err, SectionDagError::SubjectNotFound(_)));

    let (tx, _rx) = event_channel();
    let err = pipeline.run_phase(SUBJECT, "nope", tx).await.unwrap_err();
    assert!(matches!(err, SectionDagError::UnknownPhase(_)));
    assert!(err.is_configuration());

    assert!(unit.invocations().is_empty());
    Ok(())
}

#[tokio::test]
async fn edited_content_is_locked_and_feeds_the_next_run() -> TestResult {
    init_tracing();
    let unit = ScriptedUnit::new();
    let (pipeline, store) = pipeline(&unit);

    let run = pipeline.edit_content(SUBJECT, "B", "hand-written B".to_string()).await?;
    assert_eq!(run.status, TaskStatus::Complete);
    assert_eq!(run.phase, "p");
    assert!(run.locked);

    let (tx, rx) = event_channel();
    let summary = pipeline.run_phase(SUBJECT, "p", tx).await?;
    let events = task_events(&collect_events(rx).await);

    assert_eq!(unit.times_executed("B"), 0);
    assert_eq!(summary.settled, vec!["B"]);
    assert_eq!(unit.context_of("C").unwrap().get("B"), Some("hand-written B"));
    assert_eq!(events[0], TaskEvent::complete("B", "hand-written B"));
    assert_eq!(
        store.get_task_run(SUBJECT, "B")?.unwrap().content.as_deref(),
        Some("hand-written B")
    );
    Ok(())
}

#[tokio::test]
async fn set_locked_requires_an_existing_run() -> TestResult {
    let unit = ScriptedUnit::new();
    let (pipeline, store) = pipeline(&unit);

    let err = pipeline.set_locked(SUBJECT, "A", true).await.unwrap_err();
    assert!(matches!(err, SectionDagError::TaskNotFound(_)));

    store.upsert_task_run(SUBJECT, "A", TaskRunPatch::completed("p", "x".into(), None, 0, 0))?;
    let run = pipeline.set_locked(SUBJECT, "A", true).await?;
    assert!(run.locked);
    assert_eq!(run.content.as_deref(), Some("x"));

    let run = pipeline.set_locked(SUBJECT, "A", false).await?;
    assert!(!run.locked);
    Ok(())
}

#[tokio::test]
async fn task_runs_and_definitions_are_listed() -> TestResult {
    let unit = ScriptedUnit::new();
    let (pipeline, _store) = pipeline(&unit);

    let keys: Vec<String> = pipeline.definitions().into_iter().map(|t| t.key).collect();
    assert_eq!(keys, vec!["A", "B", "C"]);

    assert!(pipeline.task_runs(SUBJECT)?.is_empty());
    let (tx, _rx) = event_channel();
    pipeline.run_phase(SUBJECT, "p", tx).await?;

    let runs = pipeline.task_runs(SUBJECT)?;
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == TaskStatus::Complete));
    Ok(())
}

#[tokio::test]
async fn invocations_for_the_same_subject_never_interleave() -> TestResult {
    init_tracing();
    let unit = ScriptedUnit::new();
    let (pipeline, store) = pipeline(&unit);
    store.put_subject(Subject::new("job-2"))?;

    let held = pipeline.locks().acquire(SUBJECT).await;

    let blocked = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let (tx, _rx) = event_channel();
            pipeline.run_phase(SUBJECT, "p", tx).await
        })
    };

    let (tx, _rx) = event_channel();
    with_timeout(pipeline.run_phase("job-2", "p", tx)).await?;
    assert_eq!(unit.invocations().len(), 3, "other subjects are not blocked");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!blocked.is_finished());
    assert_eq!(unit.invocations().len(), 3);

    drop(held);
    let summary = with_timeout(blocked).await??;
    assert_eq!(summary.subject, SUBJECT);
    assert_eq!(unit.invocations().len(), 6);
    Ok(())
}
