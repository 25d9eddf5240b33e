//! End-to-end push channel tests: mutations made through the REST API
//! arrive on every client's SSE stream and converge the local replicas.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::similar_names,
    clippy::redundant_clone
)]

use std::time::Duration;

use boardsync::api::{ApiClient, NewTask};
use boardsync::push::{PushChannel, SseParser};
use boardsync::reconcile::{self, CommentCollection, TaskCollection};
use boardsync_proto::entity::TaskStatus;
use boardsync_server::auth::UserDirectory;
use boardsync_server::routes::{self, AppState};
use futures_util::StreamExt;

async fn start_test_server() -> (std::net::SocketAddr, AppState) {
    let state = AppState::new(UserDirectory::demo());
    let (addr, _handle) = routes::start_server_with_state("127.0.0.1:0", state.clone())
        .await
        .expect("failed to start test server");
    (addr, state)
}

fn push_client(
    addr: std::net::SocketAddr,
    api_key: &str,
) -> (PushChannel, TaskCollection, CommentCollection) {
    let api = ApiClient::new(&format!("http://{addr}"), api_key).unwrap();
    let tasks = reconcile::shared();
    let comments = reconcile::shared();
    let (push, _assigned) = PushChannel::new(api, tasks.clone(), comments.clone());
    push.start();
    (push, tasks, comments)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 4s");
}

#[tokio::test]
async fn create_propagates_to_every_push_client() {
    let (addr, _state) = start_test_server().await;
    let (_push_a, tasks_a, _) = push_client(addr, "key-alice");
    let (_push_b, tasks_b, _) = push_client(addr, "key-bob");

    // Give both streams a moment to connect before mutating.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let api = ApiClient::new(&format!("http://{addr}"), "key-alice").unwrap();
    let created = api
        .create_task(&NewTask {
            title: "live update".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();

    wait_until(|| tasks_a.lock().get(created.id).is_some()).await;
    wait_until(|| tasks_b.lock().get(created.id).is_some()).await;
    assert_eq!(tasks_b.lock().get(created.id).unwrap().title, "live update");
}

#[tokio::test]
async fn full_lifecycle_converges_on_a_push_only_client() {
    let (addr, _state) = start_test_server().await;
    let (_push, tasks, comments) = push_client(addr, "key-bob");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let api = ApiClient::new(&format!("http://{addr}"), "key-alice").unwrap();
    let task = api
        .create_task(&NewTask {
            title: "lifecycle".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    api.change_status(task.id, TaskStatus::InProgress)
        .await
        .unwrap();
    let comment = api.create_comment(task.id, "progress!").await.unwrap();

    wait_until(|| {
        tasks
            .lock()
            .get(task.id)
            .is_some_and(|t| t.status == TaskStatus::InProgress)
    })
    .await;
    wait_until(|| comments.lock().get(comment.id).is_some()).await;

    // Tombstones leave the active view but remain in the replica.
    api.delete_task(task.id).await.unwrap();
    wait_until(|| tasks.lock().active_count() == 0).await;
    assert_eq!(tasks.lock().len(), 1);
}

#[tokio::test]
async fn heartbeats_flow_on_an_idle_stream() {
    let (addr, state) = start_test_server().await;
    state.hub.start_heartbeat(Duration::from_millis(50));

    let api = ApiClient::new(&format!("http://{addr}"), "key-carol").unwrap();
    let response = api.open_event_stream().await.unwrap();
    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();

    let mut heartbeats = 0;
    while heartbeats < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("stream went silent")
            .expect("stream ended")
            .unwrap();
        for message in parser.feed(&chunk) {
            assert!(message.id.is_some(), "every event carries a delivery id");
            let event = boardsync_proto::event::decode(&message.data).unwrap();
            if event.is_heartbeat() {
                heartbeats += 1;
            }
        }
    }
    state.hub.shutdown();
}

#[tokio::test]
async fn push_stream_requires_valid_key() {
    let (addr, _state) = start_test_server().await;
    let api = ApiClient::new(&format!("http://{addr}"), "key-mallory").unwrap();
    let result = api.open_event_stream().await;
    match result {
        Err(boardsync::api::ApiError::Status { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected 401, got {other:?}"),
    }
}

#[tokio::test]
async fn events_carry_distinct_delivery_ids() {
    let (addr, _state) = start_test_server().await;
    let api = ApiClient::new(&format!("http://{addr}"), "key-alice").unwrap();
    let response = api.open_event_stream().await.unwrap();
    let mut parser = SseParser::new();
    let mut body = response.bytes_stream();

    for i in 0..3 {
        api.create_task(&NewTask {
            title: format!("task {i}"),
            ..NewTask::default()
        })
        .await
        .unwrap();
    }

    let mut ids = Vec::new();
    while ids.len() < 3 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("stream went silent")
            .expect("stream ended")
            .unwrap();
        for message in parser.feed(&chunk) {
            ids.push(message.id.unwrap());
        }
    }
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
}
