//! Run against a Redis with the JSON module: `cargo test -- --ignored`.

use super::support::*;
use quill::{ContentRef, CounterMode, LikeRequest, NewComment, RedisStore, cleanup_pattern};
use serial_test::serial;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

async fn fresh_store(prefix: &str) -> Arc<RedisStore> {
    let client = redis::Client::open(redis_url()).expect("redis client");
    let mut conn = client.get_connection_manager().await.expect("connection manager");
    cleanup_pattern(&mut conn, &format!("{prefix}:*")).await.expect("cleanup");
    Arc::new(RedisStore::connect(&redis_url(), prefix).await.expect("connect"))
}

#[tokio::test]
#[ignore = "requires redis with RedisJSON"]
#[serial]
async fn redis_like_toggle_is_atomic_and_reversible() {
    let store = fresh_store("quill-test-likes").await;
    seed_book(store.as_ref(), "author").await;
    let services = Services::with_counter_mode(store.clone(), CounterMode::Atomic);
    let request = LikeRequest::new(ContentRef::Chapter("c1".into()), "ada")
        .in_book("b1")
        .by_author("author", "Dawn");

    assert!(services.likes.toggle_like("ada", &request).await.unwrap());
    assert_eq!(field(store.as_ref(), collections::CHAPTERS, "c1", "likeCount").await, json!(1));
    assert!(!services.likes.toggle_like("ada", &request).await.unwrap());
    assert_eq!(field(store.as_ref(), collections::CHAPTERS, "c1", "likeCount").await, json!(0));
    assert_eq!(field(store.as_ref(), collections::BOOKS, "b1", "totalLikes").await, json!(0));
}

#[tokio::test]
#[ignore = "requires redis with RedisJSON"]
#[serial]
async fn redis_preconditions_skip_the_whole_plan() {
    let store = fresh_store("quill-test-plans").await;
    seed(store.as_ref(), collections::BOOKS, "b1", json!({ "id": "b1", "totalReads": 0 })).await;

    let plan = WritePlan::new()
        .require_absent(collections::BOOKS, "b1")
        .increment(collections::BOOKS, "b1", "totalReads", 1);
    assert_eq!(store.commit(plan).await.unwrap(), CommitOutcome::Skipped);
    assert_eq!(field(store.as_ref(), collections::BOOKS, "b1", "totalReads").await, json!(0));

    let plan = WritePlan::new()
        .require_exists(collections::BOOKS, "b1")
        .increment(collections::BOOKS, "b1", "totalReads", 2)
        .increment(collections::BOOKS, "missing", "totalReads", 2);
    assert_eq!(store.commit(plan).await.unwrap(), CommitOutcome::Applied(1));
    assert_eq!(field(store.as_ref(), collections::BOOKS, "b1", "totalReads").await, json!(2));
    assert!(store.get(collections::BOOKS, "missing").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires redis with RedisJSON"]
#[serial]
async fn redis_change_feed_drives_live_threads() {
    let store = fresh_store("quill-test-feed").await;
    let services = Services::new(store.clone());
    let mut view = services.comments.observe_thread("c1");
    assert!(view.next().await.unwrap().unwrap().is_empty());

    let root = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "over the wire"))
        .await
        .unwrap();

    let thread = tokio::time::timeout(Duration::from_secs(5), view.next())
        .await
        .expect("change published")
        .unwrap()
        .unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].id(), root);
}

#[tokio::test]
#[ignore = "requires redis with RedisJSON"]
#[serial]
async fn redis_change_log_redelivers_until_acknowledged() {
    let store = fresh_store("quill-test-log").await;
    seed_book(store.as_ref(), "author").await;

    let logged = store.read_change_log("g", LogPosition::New, 10).await.unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[0].event.event_id, logged[0].log_id);
    assert_eq!(logged[0].event.collection, collections::BOOKS);
    assert!(store.read_change_log("g", LogPosition::New, 10).await.unwrap().is_empty());

    store.ack_changes("g", &[logged[0].log_id.clone()]).await.unwrap();
    let pending = store.read_change_log("g", LogPosition::Pending, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].log_id, logged[1].log_id);
}
