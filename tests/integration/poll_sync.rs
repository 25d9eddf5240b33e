//! Polling channel tests: catch-up pulls converge the replica, the
//! cursor never skips a mutation, and tombstones are discovered through
//! "changed since" queries.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use boardsync::api::{ApiClient, NewTask, SyncFilter, TaskPatch};
use boardsync::poller::{self, BoardFeed, Poller};
use boardsync::reconcile::{self, CommentCollection, TaskCollection};
use boardsync_proto::entity::TaskStatus;
use boardsync_server::auth::UserDirectory;
use boardsync_server::routes::{self, AppState};
use chrono::Utc;

async fn start_test_server() -> (std::net::SocketAddr, AppState) {
    let state = AppState::new(UserDirectory::demo());
    let (addr, _handle) = routes::start_server_with_state("127.0.0.1:0", state.clone())
        .await
        .expect("failed to start test server");
    (addr, state)
}

fn api(addr: std::net::SocketAddr, key: &str) -> ApiClient {
    ApiClient::new(&format!("http://{addr}"), key).unwrap()
}

fn polling_client(api: ApiClient) -> (Poller, TaskCollection, CommentCollection) {
    let tasks = reconcile::shared();
    let comments = reconcile::shared();
    let feed = BoardFeed::new(api, Arc::clone(&tasks), Arc::clone(&comments));
    let poller = Poller::spawn(feed, Duration::from_millis(50));
    (poller, tasks, comments)
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
async fn poll_only_client_converges() {
    let (addr, _state) = start_test_server().await;
    let writer = api(addr, "key-alice");
    let (poller, tasks, comments) = polling_client(api(addr, "key-bob"));

    let task = writer
        .create_task(&NewTask {
            title: "polled in".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    wait_until(|| tasks.lock().get(task.id).is_some()).await;

    writer
        .update_task(
            task.id,
            &TaskPatch {
                title: Some("renamed".to_string()),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();
    wait_until(|| {
        tasks
            .lock()
            .get(task.id)
            .is_some_and(|t| t.title == "renamed")
    })
    .await;

    let comment = writer.create_comment(task.id, "hello").await.unwrap();
    wait_until(|| comments.lock().get(comment.id).is_some()).await;
    poller.stop();
}

#[tokio::test]
async fn deletions_reach_the_poller_as_tombstones() {
    let (addr, _state) = start_test_server().await;
    let writer = api(addr, "key-alice");
    let (poller, tasks, _) = polling_client(api(addr, "key-bob"));

    let task = writer
        .create_task(&NewTask {
            title: "short lived".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    wait_until(|| tasks.lock().get(task.id).is_some()).await;

    writer.delete_task(task.id).await.unwrap();
    wait_until(|| tasks.lock().active_count() == 0).await;
    // The tombstone stays in the replica; only the active view shrinks.
    assert!(tasks.lock().get(task.id).unwrap().deleted_at.is_some());
    poller.stop();
}

#[tokio::test]
async fn mutations_during_a_pause_are_caught_up_after_resume() {
    let (addr, _state) = start_test_server().await;
    let writer = api(addr, "key-alice");
    let (poller, tasks, _) = polling_client(api(addr, "key-bob"));

    // Let the first pull land, then pause.
    wait_until(|| poller.cursor().is_some()).await;
    poller.pause();

    let created = writer
        .create_task(&NewTask {
            title: "while you were away".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let deleted = writer
        .create_task(&NewTask {
            title: "born and buried".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    writer.delete_task(deleted.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(tasks.lock().get(created.id).is_none());

    // Resume: one catch-up pull discovers both the create and the
    // delete that happened while paused.
    poller.resume();
    wait_until(|| tasks.lock().get(created.id).is_some()).await;
    wait_until(|| {
        tasks
            .lock()
            .get(deleted.id)
            .is_some_and(|t| t.deleted_at.is_some())
    })
    .await;
    poller.stop();
}

#[tokio::test]
async fn stopped_poller_receives_nothing() {
    let (addr, _state) = start_test_server().await;
    let writer = api(addr, "key-alice");
    let (poller, tasks, _) = polling_client(api(addr, "key-bob"));

    wait_until(|| poller.cursor().is_some()).await;
    poller.stop();

    let task = writer
        .create_task(&NewTask {
            title: "unseen".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(tasks.lock().get(task.id).is_none());
}

#[tokio::test]
async fn changed_since_is_exact_at_the_server() {
    let (addr, _state) = start_test_server().await;
    let writer = api(addr, "key-alice");

    let before = writer
        .create_task(&NewTask {
            title: "before cursor".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    let cursor = Utc::now();
    let after = writer
        .create_task(&NewTask {
            title: "after cursor".to_string(),
            status: Some(TaskStatus::Blocked),
            ..NewTask::default()
        })
        .await
        .unwrap();

    let comment = writer.create_comment(after.id, "late arrival").await.unwrap();

    let changed = writer.tasks(SyncFilter::since(cursor)).await.unwrap();
    let ids: Vec<_> = changed.iter().map(|t| t.id).collect();
    assert!(ids.contains(&after.id));
    assert!(!ids.contains(&before.id));

    let changed_comments = writer.comments(SyncFilter::since(cursor)).await.unwrap();
    let replica = reconcile::shared();
    replica.lock().apply_batch(changed_comments);
    assert!(replica.lock().get(comment.id).is_some());
}

#[tokio::test]
async fn manual_refresh_pulls_the_full_snapshot() {
    let (addr, _state) = start_test_server().await;
    let writer = api(addr, "key-alice");
    for i in 0..3 {
        writer
            .create_task(&NewTask {
                title: format!("task {i}"),
                ..NewTask::default()
            })
            .await
            .unwrap();
    }
    // A delete nobody observed live: the refresh must still deliver it
    // as a tombstone.
    let buried = writer
        .create_task(&NewTask {
            title: "deleted before anyone looked".to_string(),
            ..NewTask::default()
        })
        .await
        .unwrap();
    writer.delete_task(buried.id).await.unwrap();

    let tasks = reconcile::shared();
    let comments = reconcile::shared();
    let feed = BoardFeed::new(api(addr, "key-carol"), Arc::clone(&tasks), comments);
    let applied = poller::refresh(&feed).await.unwrap();
    assert_eq!(applied, 4);
    assert_eq!(tasks.lock().active_count(), 3);
    assert!(tasks.lock().get(buried.id).unwrap().deleted_at.is_some());
}
