//! Tests for the progress hub and its WebSocket handler over a real socket.

use std::time::Duration;

use futures_util::StreamExt;
use llm_seo_eval::progress::{handle_ws, ProgressHub};
use llm_seo_eval::{ProgressUpdate, QueryStatus};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

fn update(status: QueryStatus, done: &[&str], total: usize) -> ProgressUpdate {
    ProgressUpdate::from_status(
        status,
        done.iter().map(|s| s.to_string()).collect(),
        total,
        status.message(),
    )
}

/// Accept one WebSocket on a loopback port and serve it with `handle_ws`.
async fn serve_one(hub: ProgressHub, query_id: &str, fallback: Option<ProgressUpdate>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let query_id = query_id.to_string();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream).await.expect("handshake");
        handle_ws(ws, hub, query_id, fallback).await;
    });
    format!("ws://{addr}/ws/queries/q/status")
}

/// Read text frames until the server closes.
async fn read_updates(url: &str, hub: &ProgressHub, after_connect: &[ProgressUpdate]) -> Vec<ProgressUpdate> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    let (_sink, mut read) = ws.split();

    // Wait for the server side to subscribe before publishing.
    for _ in 0..100 {
        if hub.subscriber_count("q") > 0 || after_connect.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for u in after_connect {
        hub.publish("q", u.clone());
    }

    let mut seen = Vec::new();
    let collect = async {
        while let Some(Ok(msg)) = read.next().await {
            match msg {
                Message::Text(text) => {
                    seen.push(serde_json::from_str::<ProgressUpdate>(&text).expect("json frame"))
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("socket did not close");
    seen
}

#[tokio::test]
async fn test_socket_streams_until_terminal() {
    let hub = ProgressHub::new();
    hub.publish("q", update(QueryStatus::Processing, &[], 2));
    let url = serve_one(hub.clone(), "q", None).await;

    let seen = read_updates(
        &url,
        &hub,
        &[
            update(QueryStatus::Processing, &["openai"], 2),
            update(QueryStatus::Analyzing, &["openai", "google"], 2),
            update(QueryStatus::Complete, &["openai", "google"], 2),
        ],
    )
    .await;

    let statuses: Vec<QueryStatus> = seen.iter().map(|u| u.status).collect();
    assert_eq!(
        statuses,
        vec![
            QueryStatus::Processing,
            QueryStatus::Processing,
            QueryStatus::Analyzing,
            QueryStatus::Complete
        ]
    );
    assert_eq!(seen[1].progress_percentage, 40);
}

#[tokio::test]
async fn test_finished_query_sends_fallback_and_closes() {
    let hub = ProgressHub::new();
    let done = update(QueryStatus::Complete, &["openai"], 1);
    let url = serve_one(hub.clone(), "q", Some(done.clone())).await;

    let seen = read_updates(&url, &hub, &[]).await;
    assert_eq!(seen, vec![done]);
}

#[tokio::test]
async fn test_snapshot_wins_over_fallback() {
    let hub = ProgressHub::new();
    hub.publish("q", update(QueryStatus::Error, &[], 2));
    let stale = update(QueryStatus::Pending, &[], 2);
    let url = serve_one(hub.clone(), "q", Some(stale)).await;

    let seen = read_updates(&url, &hub, &[]).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, QueryStatus::Error);
}

#[test]
fn test_percentages_follow_status() {
    assert_eq!(update(QueryStatus::Pending, &[], 4).progress_percentage, 0);
    assert_eq!(update(QueryStatus::Processing, &["a", "b"], 4).progress_percentage, 40);
    assert_eq!(update(QueryStatus::Analyzing, &["a"], 4).progress_percentage, 85);
    assert_eq!(update(QueryStatus::Complete, &[], 4).progress_percentage, 100);
    assert_eq!(update(QueryStatus::Processing, &["a"], 0).progress_percentage, 0);
}

#[test]
fn test_hub_clones_share_state() {
    let hub = ProgressHub::new();
    let other = hub.clone();
    other.publish("q", update(QueryStatus::Processing, &[], 1));
    assert_eq!(hub.snapshot("q").map(|u| u.status), Some(QueryStatus::Processing));
    let (_snap, _rx) = hub.subscribe("q");
    assert_eq!(other.subscriber_count("q"), 1);
}
