//! Event ingress
//!
//! Reads event notifications, one per line, and publishes them on the bus:
//!
//! ```text
//! uploaded {"file": "a.csv"}
//! nightly
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::io::BufRead;

use anyhow::{bail, Context, Result};
use cadence_core::{BusEvent, EventBus};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parse one line into an event; `Ok(None)` for blank lines and comments
pub fn parse_line(line: &str) -> Result<Option<BusEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let params = if rest.is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(rest)
            .with_context(|| format!("invalid parameters for event '{}'", name))?
        {
            Value::Object(map) => map,
            other => bail!("event parameters must be a JSON object, got {}", other),
        }
    };
    Ok(Some(BusEvent::with_params(name, params)))
}

/// Read stdin on a dedicated thread so a pending read never holds up shutdown.
///
/// The channel closes at end of input.
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("cadence-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read event input");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Publish incoming lines until the input closes or `shutdown` fires.
///
/// Returns the number of events published.
pub async fn forward_events(
    mut lines: mpsc::Receiver<String>,
    bus: &EventBus,
    shutdown: CancellationToken,
) -> usize {
    let mut published = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => match parse_line(&line) {
                    Ok(Some(event)) => {
                        let name = event.name.clone();
                        let receivers = bus.publish_event(event);
                        debug!(event = %name, receivers, "Event published");
                        published += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %format!("{:#}", e), "Ignoring malformed event line"),
                },
                None => {
                    info!(published, "Event input closed");
                    break;
                }
            },
        }
    }
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   # comment").unwrap(), None);
        assert_eq!(parse_line("nightly").unwrap(), Some(BusEvent::new("nightly")));

        let event = parse_line("uploaded   {\"file\": \"a.csv\", \"size\": 3}")
            .unwrap()
            .unwrap();
        assert_eq!(event.name, "uploaded");
        assert_eq!(event.params["file"], json!("a.csv"));
        assert_eq!(event.params["size"], json!(3));
    }

    #[test]
    fn test_parse_line_rejects_bad_params() {
        assert!(parse_line("uploaded {not json").is_err());
        assert!(parse_line("uploaded [1, 2]").is_err());
    }

    #[tokio::test]
    async fn test_forward_events_until_input_closes() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let (tx, lines) = mpsc::channel(8);

        for line in ["deploy {\"env\": \"prod\"}", "", "bad {", "# skip", "ping"] {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        let published = forward_events(lines, &bus, CancellationToken::new()).await;
        assert_eq!(published, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "deploy");
        assert_eq!(first.params["env"], json!("prod"));
        assert_eq!(rx.recv().await.unwrap().name, "ping");
    }

    #[tokio::test]
    async fn test_forward_events_stops_on_shutdown() {
        let bus = EventBus::default();
        let (_tx, lines) = mpsc::channel::<String>(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(forward_events(lines, &bus, shutdown).await, 0);
    }
}
