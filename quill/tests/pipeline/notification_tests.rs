use super::support::*;
use quill::NotificationPayload;
use quill::notifications::{BOOK_TEXT, CHAPTER_TEXT};

#[tokio::test]
async fn inbox_lists_newest_first_with_sender() {
    let store = memory_store();
    seed_user(store.as_ref(), "ada", "ada_l").await;
    let services = Services::new(store.clone());

    for text in ["one", "two", "three"] {
        services
            .fanout
            .notify("grace", "ada", NotificationType::Reply, NotificationPayload::text(text))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let inbox = services.inbox.list("grace").await.unwrap();
    let texts: Vec<&str> = inbox.iter().map(|entry| entry.notification.text.as_str()).collect();
    assert_eq!(texts, vec!["three", "two", "one"]);
    assert!(inbox.iter().all(|entry| entry.sender.username == "ada_l"));
    assert_eq!(services.inbox.unread_count("grace").await.unwrap(), 3);
}

#[tokio::test]
async fn self_notifications_are_never_recorded() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let recorded = services
        .fanout
        .notify("ada", "ada", NotificationType::Like, NotificationPayload::text(" liked"))
        .await
        .unwrap();
    assert!(recorded.is_none());
    let recorded = services
        .fanout
        .notify("", "ada", NotificationType::Like, NotificationPayload::text(" liked"))
        .await
        .unwrap();
    assert!(recorded.is_none());
    assert_eq!(store.count(collections::NOTIFICATIONS), 0);
}

#[tokio::test]
async fn only_the_recipient_may_mark_read_or_delete() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let notification = services
        .fanout
        .notify("grace", "ada", NotificationType::Follow, NotificationPayload::text(" started following you"))
        .await
        .unwrap()
        .expect("recorded");

    let err = services.inbox.mark_read(&notification.id, "ada").await.unwrap_err();
    assert!(matches!(err, EngagementError::Unauthorized { .. }));
    let err = services.inbox.delete(&notification.id, "ada").await.unwrap_err();
    assert!(matches!(err, EngagementError::Unauthorized { .. }));
    let err = services.inbox.mark_read("missing", "grace").await.unwrap_err();
    assert!(matches!(err, EngagementError::NotFound { .. }));

    services.inbox.mark_read(&notification.id, "grace").await.unwrap();
    assert_eq!(field(store.as_ref(), collections::NOTIFICATIONS, &notification.id, "read").await, json!(true));
    assert_eq!(services.inbox.unread_count("grace").await.unwrap(), 0);

    services.inbox.delete(&notification.id, "grace").await.unwrap();
    assert_eq!(store.count(collections::NOTIFICATIONS), 0);
}

#[tokio::test]
async fn mark_all_read_touches_only_the_recipient() {
    let store = memory_store();
    let services = Services::new(store.clone());
    for recipient in ["grace", "grace", "linus"] {
        services
            .fanout
            .notify(recipient, "ada", NotificationType::Reply, NotificationPayload::text("hi"))
            .await
            .unwrap();
    }

    assert_eq!(services.inbox.mark_all_read("grace").await.unwrap(), 2);
    assert_eq!(services.inbox.mark_all_read("grace").await.unwrap(), 0);
    assert_eq!(services.inbox.unread_count("linus").await.unwrap(), 1);
}

#[tokio::test]
async fn followers_hear_about_new_chapters_and_books() {
    let store = memory_store();
    let services = Services::new(store.clone());
    services.follows.follow("grace", "author").await.unwrap();
    services.follows.follow("linus", "author").await.unwrap();
    services.follows.follow("grace", "author").await.unwrap();

    let follow_notes = notifications_for(store.as_ref(), "author").await;
    assert_eq!(follow_notes.len(), 2);
    assert!(follow_notes.iter().all(|note| note.kind == NotificationType::Follow));

    let sent = services.fanout.announce_chapter("author", "b1", "c2", "Dusk").await.unwrap();
    assert_eq!(sent, 2);
    let sent = services.fanout.announce_book("author", "b2", "Currents").await.unwrap();
    assert_eq!(sent, 2);

    let grace = notifications_for(store.as_ref(), "grace").await;
    let chapter = grace
        .iter()
        .find(|note| note.kind == NotificationType::Chapter)
        .expect("chapter announcement");
    assert_eq!(chapter.text, format!("{CHAPTER_TEXT}Dusk"));
    assert_eq!(chapter.chapter_id.as_deref(), Some("c2"));
    let book = grace
        .iter()
        .find(|note| note.kind == NotificationType::Book)
        .expect("book announcement");
    assert_eq!(book.text, format!("{BOOK_TEXT}Currents"));

    assert!(services.follows.unfollow("linus", "author").await.unwrap());
    assert_eq!(services.follows.followers("author").await.unwrap(), vec!["grace".to_string()]);
}

#[tokio::test]
async fn self_follow_is_rejected() {
    let services = Services::new(memory_store());
    let err = services.follows.follow("ada", "ada").await.unwrap_err();
    assert!(matches!(err, EngagementError::InvalidArgument { .. }));
}

#[tokio::test]
async fn preferences_record_opt_outs() {
    let services = Services::new(memory_store());
    assert!(services.preferences.delivery_enabled("grace", NotificationType::Reply).await.unwrap());

    services
        .preferences
        .set_preference("grace", NotificationType::Reply, false)
        .await
        .unwrap();
    assert!(!services.preferences.delivery_enabled("grace", NotificationType::Reply).await.unwrap());
    assert!(services.preferences.delivery_enabled("grace", NotificationType::Follow).await.unwrap());
}

#[tokio::test]
async fn unread_count_view_tracks_reads() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let note = services
        .fanout
        .notify("grace", "ada", NotificationType::Reply, NotificationPayload::text("hi"))
        .await
        .unwrap()
        .expect("recorded");

    let mut view = services.inbox.observe_unread_count("grace");
    assert_eq!(view.next().await.expect("snapshot").unwrap(), 1);

    services.inbox.mark_read(&note.id, "grace").await.unwrap();
    let next = tokio::time::timeout(Duration::from_secs(2), view.next())
        .await
        .expect("update in time")
        .expect("snapshot")
        .unwrap();
    assert_eq!(next, 0);
}
