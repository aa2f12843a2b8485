//! Client-side progress adapter.
//!
//! A [`ProgressWatcher`] runs one background task that turns whichever
//! progress source is available into a single ordered stream of
//! [`ProgressUpdate`]s:
//!
//! - `Poll`: `GET /status` on a fixed interval, no backoff
//! - `WebSocket`: the server's progress socket, falling back to polling
//!   when the handshake fails or the socket closes early
//! - `Mock`: the scripted five-step sequence
//!
//! The task ends after a terminal update. Dropping the watcher (or calling
//! [`ProgressWatcher::stop`]) aborts it.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};

use crate::client::ApiClient;
use crate::mock;
use crate::types::ProgressUpdate;

/// Consecutive poll failures after which logging escalates to `error!`.
const FAILURE_ESCALATION: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    Poll,
    WebSocket,
    Mock,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub mode: WatchMode,
    /// Delay between status polls (default 2 s).
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Poll,
            poll_interval: Duration::from_secs(2),
        }
    }
}

pub struct ProgressWatcher {
    updates: UnboundedReceiverStream<ProgressUpdate>,
    task: JoinHandle<()>,
}

impl ProgressWatcher {
    /// Start watching `query_id`. A client in mock mode always uses the
    /// scripted sequence.
    pub fn spawn(client: Arc<ApiClient>, query_id: impl Into<String>, config: WatcherConfig) -> Self {
        let query_id = query_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mode = if client.is_mock() {
            WatchMode::Mock
        } else {
            config.mode
        };
        let interval = config.poll_interval;

        let task = tokio::spawn(async move {
            match mode {
                WatchMode::Mock => run_script(tx).await,
                WatchMode::Poll => poll_loop(&client, &query_id, interval, tx, None).await,
                WatchMode::WebSocket => ws_loop(&client, &query_id, interval, tx).await,
            }
        });

        Self {
            updates: UnboundedReceiverStream::new(rx),
            task,
        }
    }

    /// Next update, or `None` once the watch has ended.
    pub async fn next_update(&mut self) -> Option<ProgressUpdate> {
        self.updates.next().await
    }

    /// Abort the background task. Updates already queued stay readable.
    pub fn stop(&mut self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Stream for ProgressWatcher {
    type Item = ProgressUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.updates).poll_next(cx)
    }
}

impl Drop for ProgressWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Send `update`; `Ok(true)` when the watch should end.
fn emit(tx: &mpsc::UnboundedSender<ProgressUpdate>, update: ProgressUpdate) -> Result<bool, ()> {
    let terminal = update.status.is_terminal();
    tx.send(update).map_err(|_| ())?;
    Ok(terminal)
}

async fn run_script(tx: mpsc::UnboundedSender<ProgressUpdate>) {
    tokio::time::sleep(Duration::from_millis(mock::PROGRESS_START_MS)).await;
    for (update, delay) in mock::mock_progress_updates()
        .into_iter()
        .zip(mock::PROGRESS_DELAYS_MS)
    {
        match emit(&tx, update) {
            Ok(false) => tokio::time::sleep(Duration::from_millis(delay)).await,
            _ => return,
        }
    }
}

async fn poll_loop(
    client: &ApiClient,
    query_id: &str,
    interval: Duration,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
    mut last: Option<ProgressUpdate>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut consecutive_failures: u32 = 0;

    loop {
        ticker.tick().await;

        match client.query_status(query_id).await {
            Ok(report) => {
                consecutive_failures = 0;
                let update = ProgressUpdate::from(report);
                if last.as_ref() == Some(&update) {
                    continue;
                }
                last = Some(update.clone());
                match emit(&tx, update) {
                    Ok(false) => {}
                    _ => return,
                }
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);

                if consecutive_failures >= FAILURE_ESCALATION {
                    error!(
                        error = %e,
                        query_id = %query_id,
                        consecutive_failures,
                        "status poll failed repeatedly, will retry next tick"
                    );
                } else {
                    warn!(
                        error = %e,
                        query_id = %query_id,
                        "status poll failed, will retry next tick"
                    );
                }
            }
        }
    }
}

async fn ws_loop(
    client: &ApiClient,
    query_id: &str,
    interval: Duration,
    tx: mpsc::UnboundedSender<ProgressUpdate>,
) {
    let url = client.ws_url(query_id);
    let mut last: Option<ProgressUpdate> = None;

    match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => {
            debug!(url = %url, "progress websocket connected");
            let (_sink, mut read) = ws_stream.split();
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ProgressUpdate>(&text) {
                        Ok(update) => {
                            last = Some(update.clone());
                            match emit(&tx, update) {
                                Ok(false) => {}
                                _ => return,
                            }
                        }
                        Err(e) => debug!(error = %e, "ignoring malformed progress frame"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, url = %url, "progress websocket error");
                        break;
                    }
                }
            }
            debug!(query_id = %query_id, "websocket closed before completion, polling");
        }
        Err(e) => {
            warn!(error = %e, url = %url, "websocket unavailable, falling back to polling");
        }
    }

    poll_loop(client, query_id, interval, tx, last).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QueryStatus;

    #[tokio::test(start_paused = true)]
    async fn test_mock_script_runs_to_completion() {
        let client = Arc::new(ApiClient::builder("http://unused").mock(true).build());
        let mut watcher = ProgressWatcher::spawn(client, "q", WatcherConfig::default());

        let mut seen = Vec::new();
        while let Some(update) = watcher.next_update().await {
            seen.push(update);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0].message, "Starting LLM queries...");
        assert_eq!(seen[4].status, QueryStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_script_first_update_after_start_delay() {
        let client = Arc::new(ApiClient::builder("http://unused").mock(true).build());
        let started = tokio::time::Instant::now();
        let mut watcher = ProgressWatcher::spawn(client, "q", WatcherConfig::default());
        watcher.next_update().await.expect("first");
        assert!(started.elapsed() >= Duration::from_millis(mock::PROGRESS_START_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_stream() {
        let client = Arc::new(ApiClient::builder("http://unused").mock(true).build());
        let mut watcher = ProgressWatcher::spawn(client, "q", WatcherConfig::default());
        watcher.stop();
        assert!(watcher.next_update().await.is_none());
    }

    #[test]
    fn test_default_config_polls_every_two_seconds() {
        let c = WatcherConfig::default();
        assert_eq!(c.mode, WatchMode::Poll);
        assert_eq!(c.poll_interval, Duration::from_secs(2));
    }
}
