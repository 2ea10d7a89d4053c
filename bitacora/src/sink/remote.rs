//! Remote aggregation sink (Loki push API)
//!
//! Records are queued on a channel and delivered by a background flusher,
//! so callers never wait on the network. Delivery is best effort: failures
//! are logged and the batch is dropped, with no retries.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Line, Sink};
use crate::config::RemoteParams;
use crate::error::{Error, Result};

const PUSH_PATH: &str = "/loki/api/v1/push";

/// Records held for the flusher before new ones are dropped
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Queued {
    label: String,
    time: i64,
    text: String,
}

/// Batching push sink shared by both pipelines
#[derive(Debug)]
pub struct RemoteSink {
    tx: Option<mpsc::Sender<Queued>>,
    token: CancellationToken,
}

impl RemoteSink {
    /// Start the flusher on the current tokio runtime
    ///
    /// Without a runtime the sink is disabled and records are dropped.
    pub fn new(params: &RemoteParams, app_name: &str) -> Result<Self> {
        let token = CancellationToken::new();

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    url = %params.url,
                    "No tokio runtime available, remote log sink disabled"
                );
                return Ok(Self { tx: None, token });
            }
        };

        if params.url.trim().is_empty() {
            return Err(Error::Remote("empty remote sink url".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(params.timeout_secs))
            .build()?;

        let pusher = Pusher {
            client,
            url: format!("{}{}", params.url.trim_end_matches('/'), PUSH_PATH),
            application: app_name.to_string(),
            credentials: params
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        };

        let interval = params
            .batching
            .then(|| Duration::from_secs(params.batch_interval_secs.max(1)));

        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        handle.spawn(pusher.run(rx, token.child_token(), interval));

        tracing::debug!(url = %params.url, batching = params.batching, "Remote log sink started");
        Ok(Self {
            tx: Some(tx),
            token,
        })
    }

    /// Whether records are actually delivered
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }
}

impl Sink for RemoteSink {
    fn write(&self, line: &Line<'_>) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let queued = Queued {
            label: line.label.to_string(),
            time: line.time,
            text: line.text.to_string(),
        };
        match tx.try_send(queued) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(queued)) => {
                tracing::warn!(
                    label = %queued.label,
                    capacity = QUEUE_CAPACITY,
                    "Remote log sink queue full, record dropped"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Remote("remote sink flusher stopped".to_string()))
            }
        }
    }
}

impl Drop for RemoteSink {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[derive(Debug)]
struct Pusher {
    client: reqwest::Client,
    url: String,
    application: String,
    credentials: Option<(String, String)>,
}

impl Pusher {
    async fn run(
        self,
        mut rx: mpsc::Receiver<Queued>,
        token: CancellationToken,
        interval: Option<Duration>,
    ) {
        let mut pending = Vec::new();
        let mut ticker = tokio::time::interval(interval.unwrap_or(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    while let Ok(queued) = rx.try_recv() {
                        pending.push(queued);
                    }
                    self.flush(&mut pending).await;
                    tracing::debug!("Remote log sink stopped");
                    break;
                }
                received = rx.recv() => match received {
                    Some(queued) => {
                        pending.push(queued);
                        if interval.is_none() {
                            self.flush(&mut pending).await;
                        }
                    }
                    None => {
                        self.flush(&mut pending).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&mut pending).await;
                }
            }
        }
    }

    /// Push queued records grouped by label; the batch is dropped on failure
    async fn flush(&self, pending: &mut Vec<Queued>) {
        if pending.is_empty() {
            return;
        }
        let body = push_body(&self.application, pending.drain(..));

        let mut request = self.client.post(&self.url).json(&body);
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        match request.send().await {
            Ok(response) => {
                if !response.status().is_success() {
                    tracing::warn!(
                        url = %self.url,
                        status = %response.status(),
                        "Remote log sink returned non-success status"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    url = %self.url,
                    error = %e,
                    "Failed to push records to remote log sink"
                );
            }
        }
    }
}

fn push_body(application: &str, records: impl Iterator<Item = Queued>) -> Value {
    let mut streams: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for record in records {
        let nanos = i128::from(record.time) * 1_000_000;
        streams
            .entry(record.label)
            .or_default()
            .push(json!([nanos.to_string(), record.text]));
    }

    let streams: Vec<Value> = streams
        .into_iter()
        .map(|(label, values)| {
            json!({
                "stream": { "application": application, "level": label },
                "values": values,
            })
        })
        .collect();
    json!({ "streams": streams })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(label: &str, time: i64, text: &str) -> Queued {
        Queued {
            label: label.into(),
            time,
            text: text.into(),
        }
    }

    #[test]
    fn test_push_body_groups_by_label() {
        let body = push_body(
            "users-api",
            vec![
                queued("error", 1, "a"),
                queued("authentication", 2, "b"),
                queued("error", 3, "c"),
            ]
            .into_iter(),
        );
        let streams = body["streams"].as_array().unwrap();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0]["stream"]["level"], "authentication");
        assert_eq!(streams[1]["stream"]["application"], "users-api");
        assert_eq!(streams[1]["values"], json!([["1000000", "a"], ["3000000", "c"]]));
    }

    #[test]
    fn test_disabled_without_runtime() {
        let sink = RemoteSink::new(&RemoteParams::new("http://127.0.0.1:9"), "app").unwrap();
        assert!(!sink.is_enabled());
        let line = Line {
            level: 30,
            label: "info",
            time: 0,
            text: "{}",
        };
        assert!(sink.write(&line).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_swallowed() {
        let params = RemoteParams {
            batching: false,
            timeout_secs: 1,
            ..RemoteParams::new("http://127.0.0.1:9")
        };
        let sink = RemoteSink::new(&params, "app").unwrap();
        let line = Line {
            level: 50,
            label: "error",
            time: 0,
            text: "{}",
        };
        assert!(sink.write(&line).is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sink.write(&line).is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_growing() {
        let params = RemoteParams {
            batching: true,
            batch_interval_secs: 3600,
            ..RemoteParams::new("http://127.0.0.1:9")
        };
        let sink = RemoteSink::new(&params, "app").unwrap();
        let line = Line {
            level: 30,
            label: "info",
            time: 0,
            text: "{}",
        };
        // current-thread runtime: the flusher cannot drain until we yield
        for _ in 0..QUEUE_CAPACITY + 100 {
            assert!(sink.write(&line).is_ok());
        }
        let tx = sink.tx.as_ref().unwrap();
        assert_eq!(tx.capacity(), 0);
    }

    #[cfg(feature = "http")]
    #[tokio::test]
    async fn test_pushes_to_server() {
        use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
        use std::sync::{Arc, Mutex};

        type Received = Arc<Mutex<Vec<(Option<String>, Value)>>>;

        async fn push(
            State(received): State<Received>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> http::StatusCode {
            let auth = headers
                .get(http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            received.lock().unwrap().push((auth, body));
            http::StatusCode::NO_CONTENT
        }

        let received: Received = Arc::default();
        let app = Router::new()
            .route(PUSH_PATH, post(push))
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let params = RemoteParams {
            batching: false,
            username: Some("loki".into()),
            password: Some("secret".into()),
            ..RemoteParams::new(format!("http://{}/", addr))
        };
        let sink = RemoteSink::new(&params, "users-api").unwrap();
        sink.write(&Line {
            level: 40,
            label: "warn",
            time: 5,
            text: r#"{"level":40}"#,
        })
        .unwrap();

        let mut got = Vec::new();
        for _ in 0..100 {
            got = received.lock().unwrap().clone();
            if !got.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(got.len(), 1);
        let (auth, body) = &got[0];
        assert!(auth.as_deref().is_some_and(|a| a.starts_with("Basic ")));
        assert_eq!(body["streams"][0]["stream"]["level"], "warn");
        assert_eq!(body["streams"][0]["values"][0][0], "5000000");
        assert_eq!(body["streams"][0]["values"][0][1], r#"{"level":40}"#);
    }
}
