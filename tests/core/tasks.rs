#[cfg(test)]
mod tests {
    use finalizer::core::config::{FinalizerConfig, QueueConfig};
    use finalizer::core::error::FinalizerError;
    use finalizer::core::store::Store;
    use finalizer::core::tasks::{
        LeasedTask, Task, TaskQueue, ack_task, dead_letter_task, enqueue_task, lease_task,
        list_dead_letters, list_pending, pending_count, retry_task,
    };
    use finalizer::core::time;
    use finalizer::ExportTarget;
    use rusqlite::params;
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = FinalizerConfig {
            queue: QueueConfig {
                lease_ms: 1_000,
                max_attempts: 3,
                base_backoff_ms: 200,
                max_backoff_ms: 1_000,
            },
            ..FinalizerConfig::default()
        };
        let store = Store::open_with_config(temp_dir.path(), config).unwrap();
        (store, temp_dir)
    }

    fn trigger(id: &str) -> Task {
        Task::TryFinalizeInvocation {
            invocation_id: id.to_string(),
        }
    }

    fn lease_at(store: &Store, worker: &str, now_ms: i64) -> Option<LeasedTask> {
        store
            .pool()
            .with_transaction("test.lease", |tx| {
                TaskQueue::new(tx, &store.config.queue).lease(worker, now_ms)
            })
            .unwrap()
    }

    #[test]
    fn test_lease_in_enqueue_order_then_ack() {
        let (store, _temp) = test_store();
        enqueue_task(&store, &trigger("a")).unwrap();
        enqueue_task(
            &store,
            &Task::ExportInvocationToBq {
                invocation_id: "b".to_string(),
                bq_export: ExportTarget::new("p", "d", "t"),
            },
        )
        .unwrap();
        assert_eq!(pending_count(&store).unwrap(), 2);

        let first = lease_task(&store, "w1").unwrap().unwrap();
        assert_eq!(first.task, trigger("a"));
        assert_eq!(first.attempts, 1);
        let second = lease_task(&store, "w2").unwrap().unwrap();
        assert_eq!(second.task.invocation_id(), "b");

        // Both are leased, nothing else is due.
        assert!(lease_task(&store, "w3").unwrap().is_none());

        assert!(ack_task(&store, &first).unwrap());
        assert!(ack_task(&store, &second).unwrap());
        assert_eq!(pending_count(&store).unwrap(), 0);
    }

    #[test]
    fn test_expired_lease_is_redelivered() {
        let (store, _temp) = test_store();
        enqueue_task(&store, &trigger("a")).unwrap();
        let now = time::now_ms();

        let first = lease_at(&store, "w1", now).unwrap();
        assert!(lease_at(&store, "w2", now + 999).is_none());

        let second = lease_at(&store, "w2", now + 1_000).unwrap();
        assert_eq!(second.task_id, first.task_id);
        assert_eq!(second.attempts, 2);

        // The first owner lost its lease and can no longer settle.
        assert!(!ack_task(&store, &first).unwrap());
        assert!(!retry_task(&store, &first, "late").unwrap());
        assert!(!dead_letter_task(&store, &first, "late").unwrap());
        assert!(ack_task(&store, &second).unwrap());
    }

    #[test]
    fn test_retry_schedules_with_backoff() {
        let (store, _temp) = test_store();
        enqueue_task(&store, &trigger("a")).unwrap();
        let now = time::now_ms();

        let leased = lease_at(&store, "w1", now).unwrap();
        let retried = store
            .pool()
            .with_transaction("test.retry", |tx| {
                TaskQueue::new(tx, &store.config.queue).retry(&leased, "database is locked", now)
            })
            .unwrap();
        assert!(retried);

        let pending = list_pending(&store).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].not_before_ms, now + 200);
        assert_eq!(pending[0].leased_by, None);
        assert_eq!(pending[0].last_error.as_deref(), Some("database is locked"));

        assert!(lease_at(&store, "w1", now + 199).is_none());
        let again = lease_at(&store, "w1", now + 200).unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let queue = QueueConfig {
            lease_ms: 1_000,
            max_attempts: 10,
            base_backoff_ms: 200,
            max_backoff_ms: 1_000,
        };
        let delays: Vec<u128> = (1..=5).map(|n| queue.backoff(n).as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn test_dead_letter_moves_task() {
        let (store, _temp) = test_store();
        enqueue_task(&store, &trigger("a")).unwrap();
        let leased = lease_task(&store, "w1").unwrap().unwrap();

        assert!(dead_letter_task(&store, &leased, "invocation a not found").unwrap());
        assert_eq!(pending_count(&store).unwrap(), 0);

        let dead = list_dead_letters(&store).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task_id, leased.task_id);
        assert_eq!(dead[0].kind, "try_finalize_invocation");
        assert_eq!(dead[0].invocation_id, "a");
        assert_eq!(dead[0].attempts, 1);
        assert_eq!(dead[0].error, "invocation a not found");
    }

    #[test]
    fn test_poison_payload_is_dead_lettered_on_lease() {
        let (store, _temp) = test_store();
        store
            .pool()
            .with_transaction("test.poison", |tx| {
                tx.execute(
                    "INSERT INTO tasks (task_id, kind, invocation_id, payload, attempts, not_before_ms, created_at)
                     VALUES ('poison', 'try_finalize_invocation', 'a', '{not json', 0, 0, ?1)",
                    params![time::to_rfc3339(&time::now())],
                )?;
                Ok::<_, FinalizerError>(())
            })
            .unwrap();
        enqueue_task(&store, &trigger("b")).unwrap();

        let leased = lease_task(&store, "w1").unwrap().unwrap();
        assert_eq!(leased.task, trigger("b"));

        let dead = list_dead_letters(&store).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].task_id, "poison");
        assert!(dead[0].error.contains("undecodable"));
    }

    #[test]
    fn test_enqueue_rolls_back_with_transaction() {
        let (store, _temp) = test_store();
        let result: Result<(), FinalizerError> = store.pool().with_transaction("test.rollback", |tx| {
            TaskQueue::new(tx, &store.config.queue).enqueue(&trigger("a"))?;
            Err(FinalizerError::ValidationError("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(pending_count(&store).unwrap(), 0);
    }
}
