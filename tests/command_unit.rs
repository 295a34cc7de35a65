// tests/command_unit.rs

#![cfg(unix)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::tempdir;

use sectiondag::config::parse_and_validate;
use sectiondag::dag::DependencyContext;
use sectiondag::engine::Pipeline;
use sectiondag::exec::{CommandUnit, ExecutionRegistry, ExecutionUnit, GenerationRequest};
use sectiondag::store::{JsonFileStore, StateStore, Subject};
use sectiondag::types::{OutputFormat, TaskStatus};
use sectiondag_test_utils::{event_channel, init_tracing, with_timeout};

fn request(key: &str) -> GenerationRequest {
    let reference = [("resume".to_string(), "ten years of Rust".to_string())]
        .into_iter()
        .collect();
    GenerationRequest {
        task_key: key.to_string(),
        phase: "p".to_string(),
        subject: Arc::new(Subject::new("job-1").with_field("company", "Acme")),
        reference: Arc::new(reference),
        context: DependencyContext::new()
            .with_entry("A", Some("alpha"))
            .with_entry("B", None),
    }
}

#[tokio::test]
async fn text_output_is_trimmed_stdout() {
    let unit = CommandUnit::new("cat >/dev/null; printf 'hello world\\n\\n'").with_generator("shell");
    let out = unit.execute(request("k")).await.unwrap();
    assert_eq!(out.content, "hello world");
    assert_eq!(out.generator_id.as_deref(), Some("shell"));
}

#[tokio::test]
async fn request_is_written_to_stdin_as_json() {
    let unit = CommandUnit::new("cat");
    let out = unit.execute(request("draft")).await.unwrap();

    let payload: Value = serde_json::from_str(&out.content).unwrap();
    assert_eq!(payload["task"], "draft");
    assert_eq!(payload["phase"], "p");
    assert_eq!(payload["subject"]["id"], "job-1");
    assert_eq!(payload["subject"]["fields"]["company"], "Acme");
    assert_eq!(payload["reference"]["resume"], "ten years of Rust");
    assert_eq!(payload["dependencies"]["A"], "alpha");
    assert_eq!(payload["dependencies"]["B"], Value::Null);
}

#[tokio::test]
async fn json_output_carries_metadata() {
    let unit = CommandUnit::new(
        r#"cat >/dev/null; echo '{"content":"scored","generator":"model-x","tokens_used":42}'"#,
    )
    .with_output(OutputFormat::Json)
    .with_generator("fallback");
    let out = unit.execute(request("k")).await.unwrap();
    assert_eq!(out.content, "scored");
    assert_eq!(out.generator_id.as_deref(), Some("model-x"));
    assert_eq!(out.tokens_used, 42);
}

#[tokio::test]
async fn non_zero_exit_reports_code_and_stderr() {
    let unit = CommandUnit::new("cat >/dev/null; echo 'quota exceeded' >&2; exit 3");
    let err = unit.execute(request("k")).await.unwrap_err();
    assert!(err.message.contains("exited with code 3"), "{}", err.message);
    assert!(err.message.contains("quota exceeded"), "{}", err.message);
}

#[tokio::test]
async fn empty_output_and_bad_json_are_failures() {
    let err = CommandUnit::new("cat >/dev/null")
        .execute(request("k"))
        .await
        .unwrap_err();
    assert!(err.message.contains("produced no content"));

    let err = CommandUnit::new("cat >/dev/null; echo not-json")
        .with_output(OutputFormat::Json)
        .execute(request("k"))
        .await
        .unwrap_err();
    assert!(err.message.contains("invalid JSON"));
}

#[tokio::test]
async fn slow_command_times_out() {
    let unit = CommandUnit::new("sleep 5").with_timeout(Duration::from_millis(200));
    let err = with_timeout(unit.execute(request("k"))).await.unwrap_err();
    assert!(err.message.contains("timed out"), "{}", err.message);
}

#[tokio::test]
async fn catalog_file_pipeline_end_to_end() {
    init_tracing();
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("references")).unwrap();
    fs::write(dir.path().join("references/resume.md"), "resume text").unwrap();

    let cfg = parse_and_validate(
        r#"
[config]
stage_field = "stage"

[reference]
resume = "resume.md"

[phase.analysis]
start_stage = "analyzing"
terminal_stage = "analyzed"

[task.cleanup]
phase = "analysis"
order = 1
cmd = "cat >/dev/null; echo 'clean description'"

[task.verdict]
phase = "analysis"
order = 2
after = ["cleanup"]
cmd = "cat >/dev/null; printf 'Total Score: 64/100\nPURSUE\n'"

[task.echo]
phase = "analysis"
order = 3
after = ["cleanup"]
cmd = "cat"

[[projection]]
task = "cleanup"
kind = "promote"
field = "jd_cleaned"

[[projection]]
task = "verdict"
kind = "verdict"
"#,
    )
    .unwrap();

    let store = Arc::new(JsonFileStore::new(dir.path().join("state.json")));
    store.put_subject(Subject::new("job-1")).unwrap();

    let registry = ExecutionRegistry::from_catalog_file(&cfg);
    let pipeline =
        Pipeline::from_catalog_file(&cfg, dir.path(), registry, store.clone()).unwrap();

    let (tx, _rx) = event_channel();
    let summary = with_timeout(pipeline.run_phase("job-1", "analysis", tx))
        .await
        .unwrap();
    assert!(summary.all_complete(), "{summary:?}");

    let echo = store.get_task_run("job-1", "echo").unwrap().unwrap();
    assert_eq!(echo.status, TaskStatus::Complete);
    let payload: Value = serde_json::from_str(echo.content.as_deref().unwrap()).unwrap();
    assert_eq!(payload["dependencies"]["cleanup"], "clean description");
    assert_eq!(payload["reference"]["resume"], "resume text");

    // A fresh store instance reads the same document back.
    let reopened = JsonFileStore::new(dir.path().join("state.json"));
    let subject = reopened.get_subject("job-1").unwrap().unwrap();
    assert_eq!(subject.field_str("stage"), Some("analyzed"));
    assert_eq!(subject.field_str("jd_cleaned"), Some("clean description"));
    assert_eq!(subject.field("score"), Some(&Value::from(64)));
    assert_eq!(subject.field_str("verdict"), Some("PURSUE"));
}
