    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    fn time(trigger: TriggerConfig) -> TimeTrigger {
        match trigger {
            TriggerConfig::Time(time) => time,
            other => panic!("Expected Time trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_trigger_kinds() {
        assert_eq!(TriggerConfig::at(t0()).kind(), TriggerKind::Time);
        assert_eq!(TriggerConfig::delay(Duration::from_secs(2)).kind(), TriggerKind::Time);
        assert_eq!(TriggerConfig::event("message").kind(), TriggerKind::Event);
        assert_eq!(TriggerConfig::custom(|| Ok(true)).kind(), TriggerKind::Custom);
        assert_eq!(TriggerConfig::event("message").event_name(), Some("message"));
        assert_eq!(TriggerConfig::at(t0()).event_name(), None);
    }

    #[test]
    fn test_one_shot_at_fires_once_time_reached() {
        let trigger = time(TriggerConfig::at(t0() + secs(10)));
        let created = t0();

        assert!(!trigger.is_due(false, created, None, t0() + secs(9)));
        assert!(trigger.is_due(false, created, None, t0() + secs(10)));
        // re-armed after a failed attempt: due straight away
        assert!(trigger.is_due(false, created, Some(t0() + secs(10)), t0() + secs(16)));
    }

    #[test]
    fn test_recurring_at_rearms_from_last_fire() {
        let trigger = time(TriggerConfig::every(t0(), Duration::from_secs(60)));
        let created = t0() - secs(5);

        assert_eq!(trigger.next_fire(true, created, None), Some(t0()));

        // fired late; spacing is relative to the actual fire, not the t0 grid
        let fired = t0() + secs(7);
        assert_eq!(trigger.next_fire(true, created, Some(fired)), Some(fired + secs(60)));
        assert!(!trigger.is_due(true, created, Some(fired), t0() + secs(60)));
        assert!(trigger.is_due(true, created, Some(fired), t0() + secs(67)));
    }

    #[test]
    fn test_past_first_arm_fires_immediately() {
        let trigger = time(TriggerConfig::every(t0() - secs(3600), Duration::from_secs(60)));
        assert!(trigger.is_due(true, t0(), None, t0()));
    }

    #[test]
    fn test_delay_measured_from_created_then_last_fire() {
        let trigger = time(TriggerConfig::delay(Duration::from_secs(2)));
        let created = t0();

        assert_eq!(trigger.next_fire(true, created, None), Some(t0() + secs(2)));
        assert!(!trigger.is_due(true, created, None, t0() + secs(1)));
        assert!(trigger.is_due(true, created, None, t0() + secs(2)));

        let fired = t0() + secs(3);
        assert_eq!(trigger.next_fire(true, created, Some(fired)), Some(t0() + secs(5)));
    }

    #[test]
    fn test_validate_rejects_unfireable_configs() {
        assert!(TriggerConfig::at(t0()).validate(true).is_err());
        assert!(TriggerConfig::at(t0()).validate(false).is_ok());
        assert!(TriggerConfig::every(t0(), Duration::ZERO).validate(true).is_err());
        assert!(TriggerConfig::delay(Duration::ZERO).validate(true).is_err());
        assert!(TriggerConfig::delay(Duration::ZERO).validate(false).is_ok());
        assert!(TriggerConfig::event("  ").validate(false).is_err());
        assert!(TriggerConfig::event("wake").validate(true).is_ok());
    }

    #[test]
    fn test_snapshot() {
        let snap = TriggerConfig::delay(Duration::from_millis(1500)).snapshot();
        assert_eq!(snap["type"], "time");
        assert_eq!(snap["delay_secs"], 1.5);

        let snap = TriggerConfig::event("group_message").snapshot();
        assert_eq!(snap["event_name"], "group_message");

        let custom = CustomTrigger::new(predicate_fn(|| Ok(false))).with_description("flag set");
        let snap = TriggerConfig::Custom(custom).snapshot();
        assert_eq!(snap["type"], "custom");
        assert_eq!(snap["description"], "flag set");
    }

    #[tokio::test]
    async fn test_custom_evaluate_follows_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let seen = flag.clone();
        let trigger = CustomTrigger::new(predicate_fn(move || Ok(seen.load(Ordering::SeqCst))));

        assert!(!trigger.evaluate(Duration::from_secs(1), "flag").await);
        flag.store(true, Ordering::SeqCst);
        assert!(trigger.evaluate(Duration::from_secs(1), "flag").await);
    }

    #[tokio::test]
    async fn test_custom_evaluate_contains_failures() {
        let erroring = CustomTrigger::new(predicate_fn(|| Err(anyhow::anyhow!("nope"))));
        assert!(!erroring.evaluate(Duration::from_secs(1), "err").await);

        let panicking = CustomTrigger::new(predicate_fn(|| panic!("predicate exploded")));
        assert!(!panicking.evaluate(Duration::from_secs(1), "panic").await);

        let slow = CustomTrigger::new(predicate_async(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }));
        assert!(!slow.evaluate(Duration::from_millis(20), "slow").await);
    }

    #[tokio::test]
    async fn test_blocking_predicate_is_bounded_by_timeout() {
        let blocking = CustomTrigger::new(predicate_fn(|| {
            std::thread::sleep(Duration::from_millis(400));
            Ok(true)
        }));

        let started = std::time::Instant::now();
        assert!(!blocking.evaluate(Duration::from_millis(50), "blocking").await);
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_blocking_predicates_overrun_concurrently() {
        let triggers: Vec<_> = (0..3)
            .map(|_| {
                CustomTrigger::new(predicate_fn(|| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(true)
                }))
            })
            .collect();

        let started = std::time::Instant::now();
        let fired = futures::future::join_all(
            triggers
                .iter()
                .map(|t| t.evaluate(Duration::from_millis(50), "blocking")),
        )
        .await;
        assert!(fired.iter().all(|fire| !fire));
        assert!(started.elapsed() < Duration::from_millis(250));
    }
