use super::support::*;
use quill::NewComment;

#[tokio::test]
async fn deleting_a_comment_removes_its_replies() {
    let store = memory_store();
    let services = Services::new(store.clone());
    seed_book(store.as_ref(), "author").await;

    let root = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "lovely opening"))
        .await
        .expect("root comment");
    let other = services
        .comments
        .add_comment(NewComment::new("c1", "grace", "agreed"))
        .await
        .expect("second root");
    for (author, text) in [("grace", "same"), ("linus", "+1")] {
        services
            .comments
            .add_comment(NewComment::new("c1", author, text).reply_to(&root))
            .await
            .expect("reply");
    }
    let kept_reply = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "thanks").reply_to(&other))
        .await
        .expect("reply to other");

    let removed = services.comments.delete_comment(&root, "ada").await.expect("delete");
    assert_eq!(removed, 3);

    let thread = services.comments.load_thread("c1").await.expect("thread");
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].id(), other);
    assert_eq!(thread[0].replies.len(), 1);
    assert_eq!(thread[0].replies[0].comment.id, kept_reply);
    assert_eq!(store.count(collections::COMMENTS), 2);
}

#[tokio::test]
async fn only_the_author_may_delete() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let id = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "mine"))
        .await
        .expect("comment");

    let err = services.comments.delete_comment(&id, "mallory").await.unwrap_err();
    assert!(matches!(err, EngagementError::Unauthorized { .. }));
    let err = services.comments.delete_comment("missing", "ada").await.unwrap_err();
    assert!(matches!(err, EngagementError::NotFound { .. }));
    assert_eq!(store.count(collections::COMMENTS), 1);
}

#[tokio::test]
async fn thread_groups_replies_under_their_parents_in_order() {
    let store = memory_store();
    let services = Services::new(store.clone());
    seed_user(store.as_ref(), "ada", "ada_l").await;

    let first = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "first").on_sentence("s-4"))
        .await
        .expect("first");
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = services
        .comments
        .add_comment(NewComment::new("c1", "grace", "second"))
        .await
        .expect("second");
    tokio::time::sleep(Duration::from_millis(2)).await;
    services
        .comments
        .add_comment(NewComment::new("c1", "grace", "reply one").reply_to(&first))
        .await
        .expect("reply one");
    tokio::time::sleep(Duration::from_millis(2)).await;
    services
        .comments
        .add_comment(NewComment::new("c1", "ada", "reply two").reply_to(&first))
        .await
        .expect("reply two");
    services
        .comments
        .add_comment(NewComment::new("c2", "ada", "elsewhere"))
        .await
        .expect("other chapter");

    let thread = services.comments.load_thread("c1").await.expect("thread");
    let ids: Vec<&str> = thread.iter().map(|entry| entry.id()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);

    let replies: Vec<&str> = thread[0].replies.iter().map(|reply| reply.comment.text.as_str()).collect();
    assert_eq!(replies, vec!["reply one", "reply two"]);
    assert!(thread[1].replies.is_empty());

    assert_eq!(thread[0].comment.comment.sentence_id.as_deref(), Some("s-4"));
    assert_eq!(thread[0].comment.author.username, "ada_l");
    assert_eq!(thread[1].comment.author.username, "Unknown");
}

#[tokio::test]
async fn replies_are_limited_to_two_levels() {
    let services = Services::new(memory_store());
    let root = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "root"))
        .await
        .expect("root");
    let reply = services
        .comments
        .add_comment(NewComment::new("c1", "grace", "reply").reply_to(&root))
        .await
        .expect("reply");

    let err = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "deeper").reply_to(&reply))
        .await
        .unwrap_err();
    assert!(matches!(err, EngagementError::InvalidArgument { .. }));

    let err = services
        .comments
        .add_comment(NewComment::new("c2", "ada", "wrong chapter").reply_to(&root))
        .await
        .unwrap_err();
    assert!(matches!(err, EngagementError::InvalidArgument { .. }));

    let err = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, EngagementError::InvalidArgument { .. }));
}

#[tokio::test]
async fn comment_notifies_chapter_author_and_reply_notifies_parent_author() {
    let store = memory_store();
    let services = Services::new(store.clone());
    seed_book(store.as_ref(), "author").await;

    let root = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "great chapter"))
        .await
        .expect("root");
    services
        .comments
        .add_comment(NewComment::new("c1", "grace", "indeed").reply_to(&root))
        .await
        .expect("reply");

    let to_author = notifications_for(store.as_ref(), "author").await;
    assert_eq!(to_author.len(), 1);
    assert_eq!(to_author[0].kind, NotificationType::NewComment);
    assert_eq!(to_author[0].text, "great chapter");
    assert_eq!(to_author[0].book_id.as_deref(), Some("b1"));
    assert_eq!(to_author[0].comment_id.as_deref(), Some(root.as_str()));

    let to_ada = notifications_for(store.as_ref(), "ada").await;
    assert_eq!(to_ada.len(), 1);
    assert_eq!(to_ada[0].kind, NotificationType::Reply);
    assert_eq!(to_ada[0].sender_id, "grace");
    assert!(!to_ada[0].read);
}

#[tokio::test]
async fn commenting_on_your_own_chapter_notifies_nobody() {
    let store = memory_store();
    let services = Services::new(store.clone());
    seed_book(store.as_ref(), "author").await;

    let root = services
        .comments
        .add_comment(NewComment::new("c1", "author", "author's note"))
        .await
        .expect("root");
    services
        .comments
        .add_comment(NewComment::new("c1", "author", "addendum").reply_to(&root))
        .await
        .expect("self reply");

    assert_eq!(store.count(collections::NOTIFICATIONS), 0);
}

#[tokio::test]
async fn notification_failure_does_not_fail_the_comment() {
    let store = Arc::new(FlakyStore::new());
    seed_book(store.as_ref(), "author").await;
    store.break_collection(collections::NOTIFICATIONS);
    let services = Services::new(store.clone());

    let id = services
        .comments
        .add_comment(NewComment::new("c1", "ada", "still saved"))
        .await
        .expect("comment survives notification failure");

    assert!(store.exists(collections::COMMENTS, &id).await.unwrap());
    assert_eq!(store.count(collections::NOTIFICATIONS), 0);
}

#[tokio::test]
async fn observed_thread_follows_new_comments() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let mut view = services.comments.observe_thread("c1");

    let initial = view.next().await.expect("initial snapshot").expect("thread");
    assert!(initial.is_empty());

    services
        .comments
        .add_comment(NewComment::new("c1", "ada", "hello"))
        .await
        .expect("comment");

    let updated = tokio::time::timeout(Duration::from_secs(2), view.next())
        .await
        .expect("update in time")
        .expect("snapshot")
        .expect("thread");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].comment.comment.text, "hello");
    view.cancel();
}
