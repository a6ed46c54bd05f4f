use super::support::*;
use quill::janitor::profile_image_prefix;
use quill::{LocalObjectStorage, RetentionJanitor, StoreAccountDirectory};
use std::path::Path;

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn janitor(store: &Arc<InMemoryStore>, root: &Path) -> RetentionJanitor {
    RetentionJanitor::new(
        store.clone(),
        Arc::new(StoreAccountDirectory::new(store.clone())),
        Arc::new(LocalObjectStorage::new(root)),
    )
}

async fn seed_notification(store: &dyn Store, id: &str, read: bool, created_at: DateTime<Utc>) {
    seed(
        store,
        collections::NOTIFICATIONS,
        id,
        json!({
            "id": id,
            "recipientId": "grace",
            "senderId": "ada",
            "type": "reply",
            "text": "hi",
            "read": read,
            "createdAt": created_at.timestamp_millis(),
        }),
    )
    .await;
}

async fn seed_account(store: &dyn Store, uid: &str, verified: bool, created_at: DateTime<Utc>) {
    seed(
        store,
        collections::ACCOUNTS,
        uid,
        json!({ "id": uid, "emailVerified": verified, "createdAt": created_at.timestamp_millis() }),
    )
    .await;
    seed_user(store, uid, uid).await;
    seed(store, collections::USERNAMES, uid, json!({ "uid": uid })).await;
}

fn write_avatar(root: &Path, uid: &str) {
    let dir = root.join(profile_image_prefix(uid));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("avatar.jpg"), b"jpeg").unwrap();
}

#[tokio::test]
async fn read_notifications_expire_after_three_days() {
    let store = memory_store();
    let dir = tempfile::tempdir().unwrap();
    let now = at("2024-05-10T12:00:00Z");
    let cutoff = now - TimeDelta::days(3);

    seed_notification(store.as_ref(), "old-read", true, cutoff - TimeDelta::seconds(1)).await;
    seed_notification(store.as_ref(), "fresh-read", true, cutoff + TimeDelta::seconds(1)).await;
    seed_notification(store.as_ref(), "old-unread", false, cutoff - TimeDelta::days(30)).await;

    let report = janitor(&store, dir.path()).purge_read_notifications(now).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.purged, 1);

    assert!(store.get(collections::NOTIFICATIONS, "old-read").await.unwrap().is_none());
    assert!(store.get(collections::NOTIFICATIONS, "fresh-read").await.unwrap().is_some());
    assert!(store.get(collections::NOTIFICATIONS, "old-unread").await.unwrap().is_some());
}

#[tokio::test]
async fn unverified_accounts_are_removed_after_the_grace_window() {
    let store = memory_store();
    let dir = tempfile::tempdir().unwrap();
    let now = at("2024-05-10T12:00:00Z");

    seed_account(store.as_ref(), "stale", false, now - TimeDelta::minutes(11)).await;
    seed_account(store.as_ref(), "recent", false, now - TimeDelta::minutes(9)).await;
    seed_account(store.as_ref(), "verified", true, now - TimeDelta::days(2)).await;
    for uid in ["stale", "recent", "verified"] {
        write_avatar(dir.path(), uid);
    }

    let report = janitor(&store, dir.path()).purge_unverified_accounts(now).await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.purged, 1);
    assert_eq!(report.failed, 0);

    assert!(store.get(collections::ACCOUNTS, "stale").await.unwrap().is_none());
    assert!(store.get(collections::USERS, "stale").await.unwrap().is_none());
    assert!(store.get(collections::USERNAMES, "stale").await.unwrap().is_none());
    assert!(!dir.path().join(profile_image_prefix("stale")).exists());

    for uid in ["recent", "verified"] {
        assert!(store.get(collections::ACCOUNTS, uid).await.unwrap().is_some());
        assert!(store.get(collections::USERNAMES, uid).await.unwrap().is_some());
        assert!(dir.path().join(profile_image_prefix(uid)).join("avatar.jpg").exists());
    }
}

#[tokio::test]
async fn old_trigger_receipts_are_purged() {
    let store = memory_store();
    let dir = tempfile::tempdir().unwrap();
    let now = at("2024-05-10T12:00:00Z");
    for (id, age) in [("old", TimeDelta::days(8)), ("recent", TimeDelta::days(1))] {
        seed(
            store.as_ref(),
            collections::TRIGGER_RECEIPTS,
            id,
            json!({
                "id": id,
                "trigger": "read_counts",
                "eventId": id,
                "createdAt": (now - age).timestamp_millis(),
            }),
        )
        .await;
    }

    let report = janitor(&store, dir.path()).purge_trigger_receipts(now).await.unwrap();
    assert_eq!(report.purged, 1);
    assert_eq!(store.count(collections::TRIGGER_RECEIPTS), 1);
    assert!(store.get(collections::TRIGGER_RECEIPTS, "recent").await.unwrap().is_some());
}

#[tokio::test]
async fn receipt_purge_trims_the_change_log_on_the_same_window() {
    let store = memory_store();
    let dir = tempfile::tempdir().unwrap();
    seed_book(store.as_ref(), "author").await;
    assert_eq!(store.change_log_len(), 2);

    let janitor = janitor(&store, dir.path());
    janitor.purge_trigger_receipts(Utc::now()).await.unwrap();
    assert_eq!(store.change_log_len(), 2);

    janitor.purge_trigger_receipts(Utc::now() + TimeDelta::days(8)).await.unwrap();
    assert_eq!(store.change_log_len(), 0);
}
