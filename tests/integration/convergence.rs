//! Convergence tests: replicas reach the same state regardless of which
//! channels carried the snapshots, in what order, or how many times.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use boardsync::api::{ApiClient, NewTask};
use boardsync::poller::{BoardFeed, Poller};
use boardsync::push::PushChannel;
use boardsync::reconcile::{self, ReconciledCollection};
use boardsync_proto::entity::{Task, TaskStatus};
use boardsync_server::auth::UserDirectory;
use boardsync_server::routes::{self, AppState};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

fn snapshot(id: Uuid, title: &str, changed: DateTime<Utc>, deleted: bool) -> Task {
    Task {
        id,
        assignee_id: None,
        assignee_name: None,
        title: title.to_string(),
        description: String::new(),
        status: TaskStatus::ToDo,
        created_at: ts(0),
        updated_at: changed,
        deleted_at: deleted.then_some(changed),
    }
}

#[test]
fn duplicate_deliveries_are_idempotent() {
    let mut replica = ReconciledCollection::new();
    let id = Uuid::new_v4();
    let task = snapshot(id, "same", ts(10), false);

    // The same snapshot arriving over poll and push applies cleanly
    // any number of times.
    for _ in 0..3 {
        replica.apply(task.clone());
    }
    assert_eq!(replica.len(), 1);
    assert_eq!(replica.active_count(), 1);
}

#[test]
fn delete_applied_through_both_channels_stays_deleted() {
    let mut via_push = ReconciledCollection::new();
    let mut via_poll = ReconciledCollection::new();
    let id = Uuid::new_v4();

    let live = snapshot(id, "task", ts(10), false);
    let buried = snapshot(id, "task", ts(20), true);

    // Push sees live then the delete event; poll sees only the
    // tombstone in its catch-up.
    via_push.apply(live);
    via_push.apply(buried.clone());
    via_poll.apply(buried);

    assert_eq!(via_push.active_count(), 0);
    assert_eq!(via_poll.active_count(), 0);
    assert_eq!(via_push.len(), via_poll.len());
}

#[test]
fn create_then_duplicate_create_preserves_later_update() {
    let mut replica = ReconciledCollection::new();
    let id = Uuid::new_v4();

    // Push delivers the create, then an update. A poll catch-up later
    // re-delivers the original create; the guard keeps the update.
    assert!(replica.insert_if_absent(snapshot(id, "v1", ts(10), false)));
    replica.apply(snapshot(id, "v2", ts(20), false));
    assert!(!replica.insert_if_absent(snapshot(id, "v1", ts(10), false)));

    assert_eq!(replica.get(id).unwrap().title, "v2");
}

async fn start_test_server() -> (std::net::SocketAddr, AppState) {
    let state = AppState::new(UserDirectory::demo());
    let (addr, _handle) = routes::start_server_with_state("127.0.0.1:0", state.clone())
        .await
        .expect("failed to start test server");
    (addr, state)
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
async fn dual_channel_client_matches_the_server() {
    let (addr, state) = start_test_server().await;
    let writer = ApiClient::new(&format!("http://{addr}"), "key-alice").unwrap();

    // A client with both polling and push enabled: every mutation is
    // seen twice and must still converge to the server's state.
    let reader = ApiClient::new(&format!("http://{addr}"), "key-bob").unwrap();
    let tasks = reconcile::shared();
    let comments = reconcile::shared();
    let (push, _assigned) = PushChannel::new(reader.clone(), Arc::clone(&tasks), Arc::clone(&comments));
    push.start();
    let feed = BoardFeed::new(reader, Arc::clone(&tasks), Arc::clone(&comments));
    let poller = Poller::spawn(feed, Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let keep = writer
        .create_task(&NewTask {
            title: "keep me".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let doomed = writer
        .create_task(&NewTask {
            title: "bury me".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    writer
        .change_status(keep.id, TaskStatus::Completed)
        .await
        .unwrap();
    writer.delete_task(doomed.id).await.unwrap();

    wait_until(|| {
        let replica = tasks.lock();
        replica
            .get(keep.id)
            .is_some_and(|t| t.status == TaskStatus::Completed)
            && replica.get(doomed.id).is_some_and(|t| t.deleted_at.is_some())
    })
    .await;

    // The active view matches the server's live set exactly.
    let server_live = state
        .tasks
        .store()
        .find_all(boardsync_server::store::FindFilter::all());
    let replica_live = tasks.lock().active();
    assert_eq!(replica_live.len(), server_live.len());
    assert_eq!(replica_live[0].id, server_live[0].id);

    poller.stop();
    push.stop();
}

#[tokio::test]
async fn two_differently_configured_clients_converge_with_each_other() {
    let (addr, _state) = start_test_server().await;
    let writer = ApiClient::new(&format!("http://{addr}"), "key-alice").unwrap();

    // Client A: push only. Client B: poll only.
    let a_tasks = reconcile::shared();
    let a_comments = reconcile::shared();
    let (push, _assigned) = PushChannel::new(
        ApiClient::new(&format!("http://{addr}"), "key-bob").unwrap(),
        Arc::clone(&a_tasks),
        Arc::clone(&a_comments),
    );
    push.start();

    let b_tasks = reconcile::shared();
    let b_comments = reconcile::shared();
    let feed = BoardFeed::new(
        ApiClient::new(&format!("http://{addr}"), "key-carol").unwrap(),
        Arc::clone(&b_tasks),
        Arc::clone(&b_comments),
    );
    let poller = Poller::spawn(feed, Duration::from_millis(50));

    tokio::time::sleep(Duration::from_millis(100)).await;

    let task = writer
        .create_task(&NewTask {
            title: "seen by all".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    writer.create_comment(task.id, "agreed").await.unwrap();

    wait_until(|| a_tasks.lock().active_count() == 1 && b_tasks.lock().active_count() == 1).await;
    wait_until(|| a_comments.lock().active_count() == 1 && b_comments.lock().active_count() == 1)
        .await;

    let a = a_tasks.lock().active();
    let b = b_tasks.lock().active();
    assert_eq!(a[0].id, b[0].id);
    assert_eq!(a[0].title, b[0].title);

    poller.stop();
    push.stop();
}
