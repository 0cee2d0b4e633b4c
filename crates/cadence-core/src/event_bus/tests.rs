use super::*;
use serde_json::{json, Map};
use tokio::sync::broadcast::error::RecvError;

#[tokio::test]
async fn test_publish_subscribe() {
    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();

    let mut params = Map::new();
    params.insert("path".to_string(), json!("/tmp/report.csv"));
    bus.publish("file_uploaded", params);

    let event = rx.recv().await.unwrap();
    assert_eq!(event.name, "file_uploaded");
    assert_eq!(event.params["path"], json!("/tmp/report.csv"));
}

#[tokio::test]
async fn test_multiple_subscribers() {
    let bus = EventBus::new(16);
    let mut rx1 = bus.subscribe();
    let mut rx2 = bus.subscribe();

    assert_eq!(bus.subscriber_count(), 2);

    let count = bus.publish_event(BusEvent::new("tick"));
    assert_eq!(count, 2);

    assert_eq!(rx1.recv().await.unwrap().name, "tick");
    assert_eq!(rx2.recv().await.unwrap().name, "tick");
}

#[test]
fn test_publish_no_subscribers() {
    let bus = EventBus::default();
    assert_eq!(bus.publish_event(BusEvent::new("nobody")), 0);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_lagging_subscriber() {
    let bus = EventBus::new(2);
    let mut rx = bus.subscribe();

    for i in 0..4 {
        bus.publish_event(BusEvent::new("burst").param("n", json!(i)));
    }

    assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
    assert_eq!(rx.recv().await.unwrap().params["n"], json!(2));
}

#[test]
fn test_event_serialization() {
    let event = BusEvent::new("deploy").param("env", json!("prod"));
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"name\":\"deploy\""));
    assert!(json.contains("\"env\":\"prod\""));

    let parsed: BusEvent = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
    assert_eq!(parsed, BusEvent::new("bare"));
}
