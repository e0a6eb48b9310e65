#[cfg(test)]
mod tests {
    use finalizer::core::config::FinalizerConfig;
    use finalizer::core::error::{ErrorClass, FinalizerError};
    use finalizer::core::graph::{NewInvocation, insert_invocation};
    use finalizer::core::readiness::{is_ready_to_finalize, readiness_report};
    use finalizer::core::store::Store;
    use finalizer::InvocationState::{Active, Finalized, Finalizing};
    use finalizer::InvocationState;
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(temp_dir.path(), FinalizerConfig::default()).unwrap();
        (store, temp_dir)
    }

    fn add(store: &Store, id: &str, state: InvocationState, includes: &[&str]) {
        insert_invocation(store, &NewInvocation::new(id, state).including(includes)).unwrap();
    }

    #[test]
    fn test_active_children_block() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b", "c"]);
        add(&store, "b", Active, &[]);
        add(&store, "c", Active, &[]);

        assert!(!is_ready_to_finalize(&store, "a").unwrap());
    }

    #[test]
    fn test_one_active_child_blocks() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b", "c"]);
        add(&store, "b", Active, &[]);
        add(&store, "c", Finalized, &[]);

        let report = readiness_report(&store, "a").unwrap();
        assert!(!report.ready);
        assert_eq!(report.blocking.as_deref(), Some("b"));
    }

    #[test]
    fn test_active_sibling_of_finalizing_blocks() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b", "c"]);
        add(&store, "b", Active, &[]);
        add(&store, "c", Finalizing, &[]);

        assert!(!is_ready_to_finalize(&store, "a").unwrap());
    }

    #[test]
    fn test_transitive_active_blocks() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b"]);
        add(&store, "b", Finalizing, &["c"]);
        add(&store, "c", Active, &[]);

        let report = readiness_report(&store, "a").unwrap();
        assert!(!report.ready);
        assert_eq!(report.blocking.as_deref(), Some("c"));
        assert!(!is_ready_to_finalize(&store, "b").unwrap());
    }

    #[test]
    fn test_self_inclusion_is_ready() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["a"]);

        let report = readiness_report(&store, "a").unwrap();
        assert!(report.ready);
        assert_eq!(report.visited, 0);
    }

    #[test]
    fn test_two_node_cycle_both_ready() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b"]);
        add(&store, "b", Finalizing, &["a"]);

        assert!(is_ready_to_finalize(&store, "a").unwrap());
        assert!(is_ready_to_finalize(&store, "b").unwrap());
    }

    #[test]
    fn test_acyclic_finalized_leaves_ready() {
        let (store, _temp) = test_store();
        add(&store, "root", Finalizing, &["mid-1", "mid-2"]);
        add(&store, "mid-1", Finalized, &["leaf-1", "leaf-2"]);
        add(&store, "mid-2", Finalizing, &["leaf-2"]);
        add(&store, "leaf-1", Finalized, &[]);
        add(&store, "leaf-2", Finalized, &[]);

        let report = readiness_report(&store, "root").unwrap();
        assert!(report.ready);
        assert_eq!(report.blocking, None);
        // The shared leaf is read once.
        assert_eq!(report.visited, 4);
    }

    #[test]
    fn test_active_inside_cycle_blocks_every_member() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b"]);
        add(&store, "b", Finalizing, &["c"]);
        add(&store, "c", Active, &["a"]);

        assert!(!is_ready_to_finalize(&store, "a").unwrap());
        assert!(!is_ready_to_finalize(&store, "b").unwrap());
        // c's own state does not matter, only what it reaches.
        assert!(is_ready_to_finalize(&store, "c").unwrap());
    }

    #[test]
    fn test_disjoint_cycles_reached_through_a_chain() {
        let (store, _temp) = test_store();
        add(&store, "root", Finalizing, &["x1"]);
        add(&store, "x1", Finalizing, &["x2"]);
        add(&store, "x2", Finalizing, &["x1", "y1"]);
        add(&store, "y1", Finalized, &["y2"]);
        add(&store, "y2", Finalized, &["y1"]);

        let report = readiness_report(&store, "root").unwrap();
        assert!(report.ready);
        assert_eq!(report.visited, 4);
    }

    #[test]
    fn test_root_state_is_irrelevant() {
        let (store, _temp) = test_store();
        add(&store, "a", Active, &["b"]);
        add(&store, "b", Finalized, &[]);

        assert!(is_ready_to_finalize(&store, "a").unwrap());
    }

    #[test]
    fn test_dangling_edge_is_permanent_error() {
        let (store, _temp) = test_store();
        add(&store, "a", Finalizing, &["b"]);
        add(&store, "b", Finalizing, &["ghost"]);

        let err = is_ready_to_finalize(&store, "a").unwrap_err();
        match &err {
            FinalizerError::MissingInclusion { includer, included } => {
                assert_eq!(includer, "b");
                assert_eq!(included, "ghost");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_unknown_root_is_not_found() {
        let (store, _temp) = test_store();
        let err = is_ready_to_finalize(&store, "nobody").unwrap_err();
        assert!(matches!(err, FinalizerError::NotFound(_)));
    }
}
