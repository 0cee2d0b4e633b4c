    use super::*;
    use crate::scheduler::gate::ConcurrencyGate;

    #[tokio::test]
    async fn test_unregister_releases_slot() {
        let gate = ConcurrencyGate::new(Some(1));
        let detector = DeadlockDetector::new(20);
        let task_id = Uuid::new_v4();
        let execution_id = Uuid::new_v4();

        detector.register(task_id, "holder", execution_id, gate.acquire().await);
        assert_eq!(gate.available_slots(), Some(0));
        assert_eq!(detector.in_flight_count(), 1);

        // a different execution id does not own the entry
        assert!(!detector.unregister(task_id, Uuid::new_v4()));
        assert_eq!(gate.available_slots(), Some(0));

        assert!(detector.unregister(task_id, execution_id));
        assert_eq!(gate.available_slots(), Some(1));
        assert!(!detector.unregister(task_id, execution_id));
    }

    #[tokio::test]
    async fn test_stuck_entries_reported_once() {
        let gate = ConcurrencyGate::new(None);
        let detector = DeadlockDetector::new(20);
        let task_id = Uuid::new_v4();
        let execution_id = Uuid::new_v4();
        detector.register(task_id, "slow", execution_id, gate.acquire().await);

        let now = Utc::now();
        assert!(detector.stuck(now, Duration::from_secs(60)).is_empty());

        let later = now + chrono::Duration::seconds(120);
        let stuck = detector.stuck(later, Duration::from_secs(60));
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].task_id, task_id);
        assert_eq!(stuck[0].execution_id, execution_id);
        assert_eq!(stuck[0].name, "slow");
        assert!(stuck[0].running_for >= Duration::from_secs(119));

        assert!(detector.stuck(later, Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_health_score_rolls_over() {
        let detector = DeadlockDetector::new(4);
        let task_id = Uuid::new_v4();
        assert_eq!(detector.health_score(task_id), 1.0);

        detector.record_outcome(task_id, true);
        detector.record_outcome(task_id, false);
        assert_eq!(detector.health_score(task_id), 0.5);

        for _ in 0..4 {
            detector.record_outcome(task_id, false);
        }
        assert_eq!(detector.health_score(task_id), 1.0);

        detector.record_outcome(task_id, true);
        assert_eq!(detector.health_score(task_id), 0.75);

        detector.forget(task_id);
        assert_eq!(detector.health_score(task_id), 1.0);
    }

    #[tokio::test]
    async fn test_running_snapshot() {
        let gate = ConcurrencyGate::new(None);
        let detector = DeadlockDetector::new(20);
        let task_id = Uuid::new_v4();
        detector.register(task_id, "snap", Uuid::new_v4(), gate.acquire().await);

        let running = detector.running(Utc::now() + chrono::Duration::seconds(5));
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, task_id);
        assert_eq!(running[0].name, "snap");
        assert!(running[0].running_for_secs >= 4.0);
    }
