// tests/demo_catalog.rs

use sectiondag::config::load_and_validate;
use sectiondag::dag::TaskCatalog;
use sectiondag::engine::ProjectionTable;
use sectiondag::exec::ExecutionRegistry;
use sectiondag::types::{ContextScope, DependencyFailurePolicy};

#[test]
fn demo_catalog_loads_and_is_fully_wired() {
    let cfg = load_and_validate("demos/Sectiondag.toml").unwrap();
    assert_eq!(cfg.config.on_dependency_failure, DependencyFailurePolicy::PropagateEmpty);
    assert_eq!(cfg.config.effective_max_concurrency(), Some(4));

    let catalog = TaskCatalog::from_catalog_file(&cfg);
    let analysis: Vec<&str> = catalog
        .list_tasks("analysis")
        .unwrap()
        .iter()
        .map(|t| t.key.as_str())
        .collect();
    assert_eq!(
        analysis,
        vec!["evidence_cleanup", "role_fit", "hours_estimate", "final_verdict"]
    );
    assert_eq!(
        catalog.phase("letter").map(|p| p.context),
        Some(ContextScope::AllCompleted)
    );

    let registry = ExecutionRegistry::from_catalog_file(&cfg);
    registry.ensure_covers(catalog.all_tasks()).unwrap();

    let projections = ProjectionTable::from_catalog_file(&cfg).unwrap();
    assert!(projections.has("final_verdict"));
    let updates = projections.apply("hours_estimate", "{\"hours\": 45}");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].field, "hours");
}
