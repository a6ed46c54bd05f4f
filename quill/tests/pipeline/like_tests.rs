use super::support::*;
use quill::{ContentRef, CounterMode, LikeRequest, LikeState};

fn chapter_like(user: &str) -> LikeRequest {
    LikeRequest::new(ContentRef::Chapter("c1".into()), user)
        .in_book("b1")
        .by_author("author", "Dawn")
}

async fn toggle_twice_restores_state(mode: CounterMode) {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::with_counter_mode(store.clone(), mode);
    let request = chapter_like("ada");

    assert!(services.likes.toggle_like("ada", &request).await.expect("like"));
    assert_eq!(field(store.as_ref(), collections::CHAPTERS, "c1", "likeCount").await, json!(1));
    assert_eq!(field(store.as_ref(), collections::BOOKS, "b1", "totalLikes").await, json!(1));
    assert_eq!(
        services.likes.like_state(&request.content, "ada").await.unwrap(),
        LikeState { liked: true, count: 1 }
    );

    assert!(!services.likes.toggle_like("ada", &request).await.expect("unlike"));
    assert_eq!(field(store.as_ref(), collections::CHAPTERS, "c1", "likeCount").await, json!(0));
    assert_eq!(field(store.as_ref(), collections::BOOKS, "b1", "totalLikes").await, json!(0));
    assert_eq!(store.count(collections::LIKES), 0);
    assert!(!services.likes.is_liked(&request.content, "ada").await.unwrap());
}

#[tokio::test]
async fn best_effort_toggle_twice_restores_counters() {
    toggle_twice_restores_state(CounterMode::BestEffort).await;
}

#[tokio::test]
async fn atomic_toggle_twice_restores_counters() {
    toggle_twice_restores_state(CounterMode::Atomic).await;
}

#[tokio::test]
async fn concurrent_likes_by_different_users_count_once_each() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::with_counter_mode(store.clone(), CounterMode::Atomic);

    let mut tasks = Vec::new();
    for user in ["u1", "u2", "u3", "u4"] {
        let likes = services.likes.clone();
        tasks.push(tokio::spawn(async move {
            likes.toggle_like(user, &chapter_like(user)).await
        }));
    }
    for task in tasks {
        assert!(task.await.expect("join").expect("like"));
    }

    assert_eq!(field(store.as_ref(), collections::CHAPTERS, "c1", "likeCount").await, json!(4));
    assert_eq!(field(store.as_ref(), collections::BOOKS, "b1", "totalLikes").await, json!(4));
    let state = services
        .likes
        .like_state(&ContentRef::Chapter("c1".into()), "u1")
        .await
        .unwrap();
    assert_eq!(state, LikeState { liked: true, count: 4 });
}

#[tokio::test]
async fn like_on_behalf_of_someone_else_is_rejected() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let err = services
        .likes
        .toggle_like("mallory", &chapter_like("ada"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngagementError::Unauthorized { .. }));
    assert_eq!(store.count(collections::LIKES), 0);
}

#[tokio::test]
async fn chapter_like_notifies_author_once() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::new(store.clone());
    let request = chapter_like("ada");

    services.likes.toggle_like("ada", &request).await.unwrap();
    services.likes.toggle_like("ada", &request).await.unwrap();

    let received = notifications_for(store.as_ref(), "author").await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].kind, NotificationType::Like);
    assert_eq!(received[0].text, " liked your chapter \"Dawn\"");
    assert_eq!(received[0].chapter_id.as_deref(), Some("c1"));

    services
        .likes
        .toggle_like("author", &chapter_like("author"))
        .await
        .unwrap();
    // liking your own chapter is silent
    assert_eq!(notifications_for(store.as_ref(), "author").await.len(), 1);
}

#[tokio::test]
async fn counter_failures_do_not_fail_best_effort_likes() {
    let store = Arc::new(FlakyStore::new());
    seed_book(store.as_ref(), "author").await;
    store.break_collection(collections::CHAPTERS);
    store.break_collection(collections::BOOKS);
    let services = Services::new(store.clone());

    let request = chapter_like("ada");
    assert!(services.likes.toggle_like("ada", &request).await.expect("like"));
    assert_eq!(store.count(collections::LIKES), 1);
    assert_eq!(field(store.as_ref(), collections::CHAPTERS, "c1", "likeCount").await, json!(0));
}

#[tokio::test]
async fn comment_likes_count_on_the_comment() {
    let store = memory_store();
    seed(
        store.as_ref(),
        collections::COMMENTS,
        "k1",
        json!({ "id": "k1", "chapterId": "c1", "authorId": "grace", "text": "hi", "createdAt": 0, "likeCount": 0 }),
    )
    .await;
    let services = Services::new(store.clone());
    let request = LikeRequest::new(ContentRef::Comment("k1".into()), "ada");

    services.likes.toggle_like("ada", &request).await.unwrap();
    assert_eq!(field(store.as_ref(), collections::COMMENTS, "k1", "likeCount").await, json!(1));
    assert_eq!(store.count(collections::NOTIFICATIONS), 0);
}
