use super::support::*;
use quill::triggers::{ChangeHandler, TriggerRuntime};
use quill::{ProgressStatus, ReadCountTrigger};

async fn read_counts(store: &dyn Store) -> (Value, Value) {
    (
        field(store, collections::CHAPTERS, "c1", "readCount").await,
        field(store, collections::BOOKS, "b1", "totalReads").await,
    )
}

#[tokio::test]
async fn aggregate_tracks_transitions_even_with_duplicate_delivery() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::new(store.clone());
    let mut changes = store.subscribe();

    assert!(services.progress.ensure_opened("ada", "b1", "c1").await.unwrap());
    assert_eq!(
        services.progress.toggle_read("ada", "c1").await.unwrap(),
        Some(ProgressStatus::Read)
    );
    assert_eq!(
        services.progress.toggle_read("ada", "c1").await.unwrap(),
        Some(ProgressStatus::Partial)
    );
    assert_eq!(
        services.progress.toggle_read("ada", "c1").await.unwrap(),
        Some(ProgressStatus::Read)
    );

    let events: Vec<ChangeEvent> = drain(&mut changes)
        .into_iter()
        .filter(|event| event.collection == collections::PROGRESS)
        .collect();
    assert_eq!(events.len(), 4);

    let trigger = ReadCountTrigger::new(store.clone());
    for event in &events {
        trigger.handle(event).await.expect("first delivery");
        trigger.handle(event).await.expect("redelivery");
    }

    assert_eq!(read_counts(store.as_ref()).await, (json!(1), json!(1)));
    assert_eq!(
        services.progress.status("ada", "c1").await.unwrap(),
        ProgressStatus::Read
    );
}

#[tokio::test]
async fn reopening_a_read_chapter_changes_nothing() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::new(store.clone());

    services.progress.ensure_opened("ada", "b1", "c1").await.unwrap();
    services.progress.toggle_read("ada", "c1").await.unwrap();
    assert!(!services.progress.ensure_opened("ada", "b1", "c1").await.unwrap());
    assert_eq!(
        services.progress.status("ada", "c1").await.unwrap(),
        ProgressStatus::Read
    );
}

#[tokio::test]
async fn toggling_an_unopened_chapter_is_a_no_op() {
    let store = memory_store();
    let services = Services::new(store.clone());
    assert_eq!(services.progress.toggle_read("ada", "c1").await.unwrap(), None);
    assert_eq!(
        services.progress.status("ada", "c1").await.unwrap(),
        ProgressStatus::Unset
    );
    assert_eq!(store.count(collections::PROGRESS), 0);
}

#[tokio::test]
async fn counters_of_missing_chapters_are_not_created() {
    let store = memory_store();
    let services = Services::new(store.clone());
    let mut changes = store.subscribe();

    services.progress.ensure_opened("ada", "b9", "c9").await.unwrap();
    services.progress.toggle_read("ada", "c9").await.unwrap();

    let trigger = ReadCountTrigger::new(store.clone());
    for event in drain(&mut changes) {
        trigger.handle(&event).await.unwrap();
    }
    assert!(store.get(collections::CHAPTERS, "c9").await.unwrap().is_none());
    assert!(store.get(collections::BOOKS, "b9").await.unwrap().is_none());
}

#[tokio::test]
async fn running_trigger_runtime_updates_counts() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::new(store.clone());
    let handle = TriggerRuntime::new(store.clone())
        .register(ReadCountTrigger::new(store.clone()))
        .start();

    services.progress.ensure_opened("grace", "b1", "c1").await.unwrap();
    services.progress.toggle_read("grace", "c1").await.unwrap();

    let reached = eventually(|| {
        let store = store.clone();
        async move { read_counts(store.as_ref()).await == (json!(1), json!(1)) }
    })
    .await;
    assert!(reached, "read counts never reached 1");
    handle.stop();
}

async fn wait_for_counts(store: &dyn Store, expected: (Value, Value)) -> (Value, Value) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let counts = read_counts(store).await;
        if counts == expected || tokio::time::Instant::now() >= deadline {
            return counts;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn bursts_beyond_the_change_feed_capacity_are_all_counted() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::new(store.clone());
    let handle = TriggerRuntime::new(store.clone())
        .register(ReadCountTrigger::new(store.clone()))
        .start();

    let readers = quill::store::CHANGE_CHANNEL_CAPACITY + 76;
    for reader in 0..readers {
        let user = format!("reader{reader}");
        services.progress.ensure_opened(&user, "b1", "c1").await.unwrap();
        services.progress.toggle_read(&user, "c1").await.unwrap();
    }

    let expected = (json!(readers), json!(readers));
    assert_eq!(wait_for_counts(store.as_ref(), expected.clone()).await, expected);
    handle.stop();
}

#[tokio::test]
async fn changes_made_while_no_runtime_runs_are_applied_on_start() {
    let store = memory_store();
    seed_book(store.as_ref(), "author").await;
    let services = Services::new(store.clone());

    services.progress.ensure_opened("ada", "b1", "c1").await.unwrap();
    services.progress.toggle_read("ada", "c1").await.unwrap();
    assert_eq!(read_counts(store.as_ref()).await, (json!(0), json!(0)));

    let handle = TriggerRuntime::new(store.clone())
        .register(ReadCountTrigger::new(store.clone()))
        .start();
    let expected = (json!(1), json!(1));
    assert_eq!(wait_for_counts(store.as_ref(), expected.clone()).await, expected);
    handle.stop();

    // a second runtime on the same group finds nothing left to apply
    let handle = TriggerRuntime::new(store.clone())
        .register(ReadCountTrigger::new(store.clone()))
        .start();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(read_counts(store.as_ref()).await, expected);
    handle.stop();
}
