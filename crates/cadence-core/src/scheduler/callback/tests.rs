    use super::*;
    use serde_json::json;

    fn context(params: Map<String, Value>) -> TaskContext {
        TaskContext {
            task_id: Uuid::new_v4(),
            task_name: "ctx".to_string(),
            execution_id: Uuid::new_v4(),
            attempt: 1,
            params,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_callback_fn_sees_params() {
        let cb = callback_fn(|ctx| async move {
            let who = ctx
                .param("who")
                .and_then(Value::as_str)
                .unwrap_or("nobody")
                .to_string();
            Ok(json!(format!("hello {}", who)))
        });

        let mut params = Map::new();
        params.insert("who".to_string(), json!("world"));

        let out = cb.execute(context(params)).await.unwrap();
        assert_eq!(out, json!("hello world"));
    }

    #[tokio::test]
    async fn test_callback_fn_propagates_error() {
        let cb = callback_fn(|_ctx| async move { Err(anyhow::anyhow!("boom")) });
        let err = cb.execute(context(Map::new())).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_context_cancellation_flag() {
        let ctx = context(Map::new());
        assert!(!ctx.is_cancelled());
        ctx.cancellation.cancel();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_predicate_adapters() {
        let yes = predicate_fn(|| Ok(true));
        assert!(yes.check().await.unwrap());

        let failing = predicate_fn(|| Err(anyhow::anyhow!("sensor offline")));
        assert!(failing.check().await.is_err());

        let later = predicate_async(|| async { Ok(false) });
        assert!(!later.check().await.unwrap());
    }
