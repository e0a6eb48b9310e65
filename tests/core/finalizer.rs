#[cfg(test)]
mod tests {
    use finalizer::core::config::FinalizerConfig;
    use finalizer::core::error::{ErrorClass, FinalizerError};
    use finalizer::core::graph::{NewInvocation, get_invocation, insert_invocation};
    use finalizer::core::store::Store;
    use finalizer::core::tasks::pending_tasks;
    use finalizer::InvocationState::{Active, Finalized, Finalizing};
    use finalizer::{
        ExportTarget, FinalizeOutcome, InvocationState, Task, finalize_invocation,
        try_finalize_invocation,
    };
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(temp_dir.path(), FinalizerConfig::default()).unwrap();
        (store, temp_dir)
    }

    fn add(store: &Store, id: &str, state: InvocationState, includes: &[&str]) {
        insert_invocation(store, &NewInvocation::new(id, state).including(includes)).unwrap();
    }

    fn retriggers(store: &Store) -> Vec<String> {
        let mut ids: Vec<String> = pending_tasks(store)
            .unwrap()
            .into_iter()
            .filter_map(|task| match task {
                Task::TryFinalizeInvocation { invocation_id } => Some(invocation_id),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    fn exports(store: &Store) -> Vec<(String, ExportTarget)> {
        pending_tasks(store)
            .unwrap()
            .into_iter()
            .filter_map(|task| match task {
                Task::ExportInvocationToBq {
                    invocation_id,
                    bq_export,
                } => Some((invocation_id, bq_export)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_finalize_retriggers_only_finalizing_parents() {
        let (store, _temp) = test_store();
        add(&store, "x", Finalizing, &[]);
        add(&store, "active", Active, &["x"]);
        add(&store, "finalizing1", Finalizing, &["x"]);
        add(&store, "finalizing2", Finalizing, &["x"]);

        let outcome = try_finalize_invocation(&store, "x").unwrap();
        match &outcome {
            FinalizeOutcome::Finalized { retriggered, .. } => {
                assert_eq!(retriggered, &vec!["finalizing1".to_string(), "finalizing2".to_string()]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let x = get_invocation(&store, "x").unwrap();
        assert_eq!(x.state, Finalized);
        let finalize_time = x.finalize_time.expect("finalized invocation has a finalize time");
        assert!(finalize_time.timestamp() > 0);

        assert_eq!(retriggers(&store), vec!["finalizing1", "finalizing2"]);
    }

    #[test]
    fn test_finalized_parent_is_not_retriggered() {
        let (store, _temp) = test_store();
        add(&store, "x", Finalizing, &[]);
        add(&store, "done", Finalized, &["x"]);

        let outcome = finalize_invocation(&store, "x").unwrap();
        assert!(matches!(
            outcome,
            FinalizeOutcome::Finalized { ref retriggered, .. } if retriggered.is_empty()
        ));
        assert!(retriggers(&store).is_empty());
    }

    #[test]
    fn test_exports_enqueued_once_per_target() {
        let (store, _temp) = test_store();
        let first = ExportTarget::new("project", "dataset", "table1");
        let second = ExportTarget::new("project2", "dataset", "table1");
        insert_invocation(
            &store,
            &NewInvocation::new("x", Finalizing)
                .exporting(first.clone())
                .exporting(second.clone()),
        )
        .unwrap();

        let outcome = try_finalize_invocation(&store, "x").unwrap();
        assert!(matches!(
            outcome,
            FinalizeOutcome::Finalized {
                exports_enqueued: 2,
                ..
            }
        ));

        let mut jobs = exports(&store);
        jobs.sort_by(|a, b| a.1.project.cmp(&b.1.project));
        assert_eq!(
            jobs,
            vec![("x".to_string(), first), ("x".to_string(), second)]
        );

        let again = try_finalize_invocation(&store, "x").unwrap();
        assert!(matches!(again, FinalizeOutcome::AlreadyFinalized { .. }));
        assert_eq!(exports(&store).len(), 2);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (store, _temp) = test_store();
        add(&store, "x", Finalizing, &[]);
        add(&store, "parent", Finalizing, &["x"]);

        let first = finalize_invocation(&store, "x").unwrap();
        let FinalizeOutcome::Finalized { finalize_time, .. } = first else {
            panic!("unexpected outcome: {first:?}");
        };

        for _ in 0..3 {
            let outcome = finalize_invocation(&store, "x").unwrap();
            assert_eq!(
                outcome,
                FinalizeOutcome::AlreadyFinalized {
                    finalize_time: Some(finalize_time)
                }
            );
            assert!(outcome.is_finalized());
        }

        assert_eq!(get_invocation(&store, "x").unwrap().finalize_time, Some(finalize_time));
        assert_eq!(retriggers(&store), vec!["parent"]);
    }

    #[test]
    fn test_active_invocation_is_a_noop() {
        let (store, _temp) = test_store();
        add(&store, "x", Active, &[]);

        assert_eq!(
            try_finalize_invocation(&store, "x").unwrap(),
            FinalizeOutcome::NotFinalizing
        );
        assert_eq!(
            finalize_invocation(&store, "x").unwrap(),
            FinalizeOutcome::NotFinalizing
        );
        assert_eq!(get_invocation(&store, "x").unwrap().state, Active);
    }

    #[test]
    fn test_transition_revalidates_readiness() {
        let (store, _temp) = test_store();
        add(&store, "x", Finalizing, &["child"]);
        add(&store, "child", Active, &[]);
        add(&store, "parent", Finalizing, &["x"]);

        // Skips the advisory scan, as a caller acting on a stale read would.
        let outcome = finalize_invocation(&store, "x").unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::NotReady {
                blocking: Some("child".to_string())
            }
        );

        let x = get_invocation(&store, "x").unwrap();
        assert_eq!(x.state, Finalizing);
        assert_eq!(x.finalize_time, None);
        assert!(pending_tasks(&store).unwrap().is_empty());
    }

    #[test]
    fn test_not_ready_is_not_an_error() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b"]);
        add(&store, "b", Finalizing, &["c"]);
        add(&store, "c", Active, &[]);

        let outcome = try_finalize_invocation(&store, "a").unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::NotReady {
                blocking: Some("c".to_string())
            }
        );
        assert!(!outcome.is_finalized());
    }

    #[test]
    fn test_cycle_members_finalize_and_retrigger_each_other() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b"]);
        add(&store, "b", Finalizing, &["a"]);

        let outcome = try_finalize_invocation(&store, "a").unwrap();
        assert!(matches!(
            outcome,
            FinalizeOutcome::Finalized { ref retriggered, .. } if retriggered == &vec!["b".to_string()]
        ));

        let outcome = try_finalize_invocation(&store, "b").unwrap();
        assert!(matches!(
            outcome,
            FinalizeOutcome::Finalized { ref retriggered, .. } if retriggered.is_empty()
        ));
    }

    #[test]
    fn test_self_inclusion_finalizes_without_retriggering_itself() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["a"]);

        let outcome = try_finalize_invocation(&store, "a").unwrap();
        assert!(matches!(
            outcome,
            FinalizeOutcome::Finalized { ref retriggered, .. } if retriggered.is_empty()
        ));
        assert!(pending_tasks(&store).unwrap().is_empty());
    }

    #[test]
    fn test_missing_inclusion_is_permanent() {
        let (store, _temp) = test_store();
        add(&store, "x", Finalizing, &["ghost"]);

        let err = try_finalize_invocation(&store, "x").unwrap_err();
        assert!(matches!(err, FinalizerError::MissingInclusion { .. }));
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert_eq!(get_invocation(&store, "x").unwrap().state, Finalizing);
    }

    #[test]
    fn test_unknown_invocation_is_permanent() {
        let (store, _temp) = test_store();
        let err = try_finalize_invocation(&store, "nobody").unwrap_err();
        assert!(matches!(err, FinalizerError::NotFound(_)));
        assert!(!err.is_transient());
    }
}
