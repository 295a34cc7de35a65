// tests/scheduler_properties.rs

use std::collections::{BTreeSet, HashMap, HashSet};

use proptest::prelude::*;
use sectiondag::dag::{Scheduler, SchedulerOptions, TaskCatalog, TaskRunState};
use sectiondag::types::DependencyFailurePolicy;
use sectiondag_test_utils::builders::{CatalogBuilder, TaskDefBuilder};

// Acyclic by construction: task N only depends on tasks 0..N-1.
fn catalog_strategy(max_tasks: usize) -> impl Strategy<Value = (TaskCatalog, Vec<Vec<usize>>)> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw_deps| {
            let mut builder = CatalogBuilder::new();
            let mut deps_by_index = Vec::with_capacity(num_tasks);
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let mut task = TaskDefBuilder::new(&name(i), "p");
                let mut valid = BTreeSet::new();
                if i > 0 {
                    for d in potential {
                        valid.insert(d % i);
                    }
                }
                for d in valid.iter() {
                    task = task.after(&name(*d));
                }
                deps_by_index.push(valid.into_iter().collect());
                builder = builder.with_task(task);
            }
            (builder.build(), deps_by_index)
        })
    })
}

fn name(i: usize) -> String {
    format!("task_{i:02}")
}

fn policy_strategy() -> impl Strategy<Value = DependencyFailurePolicy> {
    prop_oneof![
        Just(DependencyFailurePolicy::PropagateEmpty),
        Just(DependencyFailurePolicy::SkipDependents),
        Just(DependencyFailurePolicy::FailRun),
    ]
}

/// Everything downstream of a failed task, by index.
fn downstream_of_failures(deps: &[Vec<usize>], failed: &HashSet<usize>) -> HashSet<usize> {
    let mut tainted: HashSet<usize> = HashSet::new();
    for (i, ds) in deps.iter().enumerate() {
        if ds.iter().any(|d| failed.contains(d) || tainted.contains(d)) {
            tainted.insert(i);
        }
    }
    tainted
}

proptest! {
    #[test]
    fn scheduler_runs_every_task_at_most_once_and_only_when_ready(
        (catalog, deps) in catalog_strategy(12),
        fail_mask in proptest::collection::vec(any::<bool>(), 12),
        picks in proptest::collection::vec(any::<usize>(), 64),
        policy in policy_strategy(),
        cap in proptest::option::of(1usize..4),
    ) {
        let n = deps.len();
        let options = SchedulerOptions { on_dependency_failure: policy, max_concurrency: cap };
        let mut s = Scheduler::new(&catalog, "p", options).unwrap();

        let index_of: HashMap<String, usize> = (0..n).map(|i| (name(i), i)).collect();
        let mut launched: Vec<usize> = Vec::new();
        let mut in_flight: Vec<String> = Vec::new();
        let mut failed: HashSet<usize> = HashSet::new();
        let mut picks = picks.into_iter().cycle();

        // Each round finishes one task, so 2n rounds is plenty.
        for _ in 0..(2 * n + 2) {
            for task in s.take_ready() {
                let i = index_of[&task.key];
                prop_assert!(!launched.contains(&i), "{} launched twice", task.key);
                for d in deps[i].iter() {
                    prop_assert!(
                        s.completed().is_settled(&name(*d)),
                        "{} launched before {} settled", task.key, name(*d)
                    );
                    prop_assert!(task.context.contains(&name(*d)));
                }
                launched.push(i);
                in_flight.push(task.key);
            }

            if let Some(max) = cap {
                prop_assert!(s.in_flight() <= max);
            }
            prop_assert_eq!(s.in_flight(), in_flight.len());

            if in_flight.is_empty() {
                break;
            }

            let pick = picks.next().unwrap_or(0) % in_flight.len();
            let key = in_flight.swap_remove(pick);
            let i = index_of[&key];
            let step = if fail_mask[i] {
                failed.insert(i);
                s.record_failure(&key)
            } else {
                s.record_success(&key, format!("{key} out"))
            };
            prop_assert!(step.accepted);
        }

        prop_assert!(in_flight.is_empty(), "scheduler did not drain");
        prop_assert_eq!(s.in_flight(), 0);
        prop_assert!(!s.has_pending() || s.is_stalled());

        match policy {
            DependencyFailurePolicy::PropagateEmpty => {
                prop_assert_eq!(launched.len(), n);
                prop_assert!(s.is_drained());
            }
            DependencyFailurePolicy::SkipDependents => {
                let tainted = downstream_of_failures(&deps, &failed);
                for i in 0..n {
                    let state = s.run_state_of(&name(i)).unwrap();
                    if tainted.contains(&i) {
                        prop_assert_eq!(state, TaskRunState::Skipped);
                    } else {
                        prop_assert!(launched.contains(&i), "{} never launched", name(i));
                    }
                }
            }
            DependencyFailurePolicy::FailRun => {
                if failed.is_empty() {
                    prop_assert_eq!(launched.len(), n);
                    prop_assert_eq!(s.halted_by(), None);
                } else {
                    prop_assert!(s.halted_by().is_some());
                }
            }
        }
    }

    #[test]
    fn locked_tasks_are_never_launched(
        (catalog, deps) in catalog_strategy(10),
        lock_mask in proptest::collection::vec(any::<bool>(), 10),
    ) {
        let n = deps.len();
        let mut s = Scheduler::new(&catalog, "p", SchedulerOptions::default()).unwrap();
        for i in (0..n).filter(|i| lock_mask[*i]) {
            let settled = s.settle_locked(&name(i), format!("stored {i}"));
            prop_assert!(settled);
        }

        let mut launched = HashSet::new();
        loop {
            let ready = s.take_ready();
            if ready.is_empty() {
                break;
            }
            for task in ready {
                prop_assert!(launched.insert(task.key.clone()));
                s.record_success(&task.key, String::new());
            }
        }

        prop_assert!(s.is_drained());
        for i in 0..n {
            prop_assert_eq!(launched.contains(&name(i)), !lock_mask[i]);
        }
    }
}
