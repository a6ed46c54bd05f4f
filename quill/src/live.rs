//! Live views: a query re-evaluated every time a matching document changes.
//!
//! A [`LiveView`] owns a background task that subscribes to the store's change feed, emits an
//! initial snapshot and then a fresh snapshot after each relevant change. Dropping or cancelling
//! the view aborts that task, which also drops the change-feed receiver.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::errors::EngagementResult;
use crate::store::{ChangeEvent, Store};

/// Snapshots buffered for a slow consumer before the watch task waits.
const SNAPSHOT_BUFFER: usize = 16;

/// Decides whether a change event can affect a view.
pub trait ChangeFilter: Send + Sync + 'static {
    fn matches(&self, event: &ChangeEvent) -> bool;
}

impl<F> ChangeFilter for F
where
    F: Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
{
    fn matches(&self, event: &ChangeEvent) -> bool {
        self(event)
    }
}

/// Matches changes in `collection` whose document has `field == value` before or after the write.
#[derive(Debug, Clone)]
pub struct FieldWatch {
    pub collection: &'static str,
    pub field: &'static str,
    pub value: Value,
}

impl FieldWatch {
    pub fn new(collection: &'static str, field: &'static str, value: impl Into<Value>) -> Self {
        Self {
            collection,
            field,
            value: value.into(),
        }
    }
}

impl ChangeFilter for FieldWatch {
    fn matches(&self, event: &ChangeEvent) -> bool {
        event.collection == self.collection
            && [&event.before, &event.after]
                .into_iter()
                .flatten()
                .any(|document| document.get(self.field) == Some(&self.value))
    }
}

/// A cancellable stream of snapshots.
pub struct LiveView<T> {
    snapshots: mpsc::Receiver<EngagementResult<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> LiveView<T> {
    /// Start watching. `snapshot` is evaluated once immediately and again after every change
    /// accepted by `filter`. Changes that arrive while a snapshot is being computed are folded
    /// into the next evaluation.
    pub fn spawn<F, S, Fut>(store: Arc<dyn Store>, filter: F, snapshot: S) -> Self
    where
        F: ChangeFilter,
        S: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = EngagementResult<T>> + Send + 'static,
    {
        let (tx, snapshots) = mpsc::channel(SNAPSHOT_BUFFER);
        // Subscribe before the first read so no change between the two is missed.
        let mut changes = store.subscribe();

        let task = tokio::spawn(async move {
            loop {
                if tx.send(snapshot().await).await.is_err() {
                    debug!("live view consumer went away");
                    return;
                }
                if !wait_for_change(&mut changes, &filter).await {
                    return;
                }
            }
        });

        Self { snapshots, task }
    }

    /// Next snapshot, or `None` once the view has stopped.
    pub async fn next(&mut self) -> Option<EngagementResult<T>> {
        self.snapshots.recv().await
    }

    /// Stop watching. Pending snapshots are discarded.
    pub fn cancel(self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Blocks until a relevant change arrives, then drains whatever else is already queued. Returns
/// `false` when the change feed has closed.
async fn wait_for_change<F: ChangeFilter>(changes: &mut broadcast::Receiver<ChangeEvent>, filter: &F) -> bool {
    loop {
        match changes.recv().await {
            Ok(event) if filter.matches(&event) => break,
            Ok(_) => continue,
            // Missed events may have been relevant; re-evaluate.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("live view lagged behind the change feed by {skipped} event(s)");
                break;
            }
            Err(broadcast::error::RecvError::Closed) => return false,
        }
    }
    while let Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) = changes.try_recv() {}
    true
}
