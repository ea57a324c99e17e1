//! Motion - Controller Event Feed
//!
//! ## Responsibilities
//!
//! - Poll the controller's motion event endpoint on a fixed interval
//! - De-duplicate by event timestamp across polls
//! - Fan events out to subscribers over a broadcast channel
//!
//! The poller is a feed only; subscribers decide what a motion event
//! means for them. Controller outages are logged and ridden out, the
//! loop never gives up on its own.

use crate::nvr_client::{MotionEvent, NvrClient};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;

/// Broadcast buffer; slow subscribers lose oldest events first.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct MotionPoller {
    nvr: Arc<NvrClient>,
    poll_interval: Duration,
    events: broadcast::Sender<MotionEvent>,
    running: Arc<RwLock<bool>>,
}

impl MotionPoller {
    pub fn new(nvr: Arc<NvrClient>, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            nvr,
            poll_interval,
            events,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Subscribe to the motion feed. Safe before or after `start`.
    pub fn subscribe(&self) -> broadcast::Receiver<MotionEvent> {
        self.events.subscribe()
    }

    /// Start the polling loop. A second call is a no-op.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Motion poller already running");
                return;
            }
            *running = true;
        }

        tracing::info!(
            interval_secs = self.poll_interval.as_secs(),
            "Starting motion poller"
        );

        let nvr = self.nvr.clone();
        let events = self.events.clone();
        let running = self.running.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            // Events before startup are history, not news.
            let started: DateTime<Utc> = Utc::now();
            let mut since = started;
            let mut delivered: HashMap<String, DateTime<Utc>> = HashMap::new();

            loop {
                ticker.tick().await;

                {
                    let is_running = running.read().await;
                    if !*is_running {
                        break;
                    }
                }

                match nvr.poll_motion_events(since).await {
                    Ok(batch) => {
                        for event in batch {
                            if event.timestamp <= started {
                                continue;
                            }
                            // The controller query is inclusive and batch
                            // order is not guaranteed; each camera keeps
                            // its own delivery watermark so a replay drops
                            // without starving a same-timestamp neighbor.
                            if let Some(&last) = delivered.get(&event.camera_id) {
                                if event.timestamp <= last {
                                    continue;
                                }
                            }
                            delivered.insert(event.camera_id.clone(), event.timestamp);
                            since = since.max(event.timestamp);
                            tracing::debug!(
                                camera_id = %event.camera_id,
                                score = event.score,
                                "Motion event"
                            );
                            let _ = events.send(event);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Motion poll failed");
                    }
                }
            }

            tracing::info!("Motion poller stopped");
        });
    }

    /// Stop the loop at its next tick.
    pub async fn shutdown(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Controller stub that serves each body once, in sequence, then
    /// repeats the last one.
    async fn stub_event_feed(bodies: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut served = 0usize;
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let body = bodies[served.min(bodies.len() - 1)].clone();
                served += 1;
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn event_json(camera_id: &str, timestamp: DateTime<Utc>, score: u32) -> serde_json::Value {
        serde_json::json!({
            "camera_id": camera_id,
            "timestamp": timestamp.to_rfc3339(),
            "score": score,
        })
    }

    #[tokio::test]
    async fn test_events_reach_subscribers_once() {
        let future_ts = Utc::now() + chrono::Duration::seconds(2);
        let body = serde_json::json!([
            event_json("cam-1", future_ts, 87),
        ])
        .to_string();
        // Same batch twice; the timestamp watermark must swallow the
        // replay.
        let url = stub_event_feed(vec![body.clone(), body]).await;

        let nvr = Arc::new(NvrClient::new(url, "test-key".to_string()));
        let poller = MotionPoller::new(nvr, Duration::from_millis(50));
        let mut feed = poller.subscribe();
        poller.start().await;

        let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .expect("no motion event")
            .expect("feed closed");
        assert_eq!(event.camera_id, "cam-1");
        assert_eq!(event.score, 87);

        // The duplicate batch must not surface again.
        let replay = tokio::time::timeout(Duration::from_millis(300), feed.recv()).await;
        assert!(replay.is_err());

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsorted_batch_with_shared_timestamps_delivers_all() {
        let shared = Utc::now() + chrono::Duration::seconds(2);
        let earlier = shared - chrono::Duration::milliseconds(500);
        // Two cameras on the same millisecond, a third listed out of
        // order behind them. All three are news.
        let body = serde_json::json!([
            event_json("cam-1", shared, 80),
            event_json("cam-2", shared, 81),
            event_json("cam-3", earlier, 82),
        ])
        .to_string();
        let url = stub_event_feed(vec![body.clone(), body]).await;

        let nvr = Arc::new(NvrClient::new(url, "test-key".to_string()));
        let poller = MotionPoller::new(nvr, Duration::from_millis(50));
        let mut feed = poller.subscribe();
        poller.start().await;

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
                .await
                .expect("motion event missing")
                .expect("feed closed");
            seen.push(event.camera_id);
        }
        seen.sort();
        assert_eq!(seen, vec!["cam-1", "cam-2", "cam-3"]);

        // The replayed batch must not surface anything again.
        let replay = tokio::time::timeout(Duration::from_millis(300), feed.recv()).await;
        assert!(replay.is_err());

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_failures_do_not_kill_the_loop() {
        // First response is garbage, second is a valid event.
        let future_ts = Utc::now() + chrono::Duration::seconds(2);
        let good = serde_json::json!([event_json("cam-2", future_ts, 55)]).to_string();
        let url = stub_event_feed(vec!["not json".to_string(), good]).await;

        let nvr = Arc::new(NvrClient::new(url, "test-key".to_string()));
        let poller = MotionPoller::new(nvr, Duration::from_millis(50));
        let mut feed = poller.subscribe();
        poller.start().await;

        let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .expect("loop died after bad response")
            .expect("feed closed");
        assert_eq!(event.camera_id, "cam-2");

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn test_double_start_is_harmless() {
        let url = stub_event_feed(vec!["[]".to_string()]).await;
        let nvr = Arc::new(NvrClient::new(url, "test-key".to_string()));
        let poller = MotionPoller::new(nvr, Duration::from_millis(50));

        poller.start().await;
        poller.start().await;
        poller.shutdown().await;
    }
}
