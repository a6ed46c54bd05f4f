//! Server-side execution: change-event triggers and scheduled jobs.
//!
//! Both run with at-least-once semantics. A handler may see the same event more than once and
//! must be idempotent; handlers for different documents run concurrently with no ordering.
//!
//! Triggers read the store's durable change log under a consumer group and acknowledge a batch
//! only after its handlers ran, so a runtime that is stopped or crashes mid-batch picks the
//! unacknowledged entries up again, and changes written while no runtime was running are
//! delivered once one starts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveTime, TimeDelta, Utc};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::errors::{EngagementError, EngagementResult};
use crate::store::{ChangeEvent, LogPosition, LoggedChange, Store};

/// Consumer group the trigger runtime reads the change log under.
pub const TRIGGER_GROUP: &str = "quill-triggers";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_BATCH_SIZE: usize = 100;
const HANDLER_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Reacts to change events of one collection.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// Stable name, used in logs and receipt ids.
    fn name(&self) -> &'static str;

    fn collection(&self) -> &'static str;

    /// Narrow the events routed to [`handle`](Self::handle). Defaults to every change of
    /// [`collection`](Self::collection).
    fn accepts(&self, event: &ChangeEvent) -> bool {
        event.collection == self.collection()
    }

    async fn handle(&self, event: &ChangeEvent) -> EngagementResult<()>;
}

/// Routes store change events to registered handlers, one task per (event, handler).
pub struct TriggerRuntime {
    store: Arc<dyn Store>,
    handlers: Vec<Arc<dyn ChangeHandler>>,
    group: String,
    poll_interval: Duration,
    batch_size: usize,
}

impl TriggerRuntime {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            group: TRIGGER_GROUP.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Read the change log under a different consumer group. Each group sees every change.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Longest wait between change-log reads when no change notification arrives.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn register(mut self, handler: impl ChangeHandler + 'static) -> Self {
        info!("registered trigger {} on {}", handler.name(), handler.collection());
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    /// Run every accepting handler on `event` and wait for them. Failures are logged.
    pub async fn deliver(&self, event: &ChangeEvent) {
        for handler in &self.handlers {
            if handler.accepts(event) {
                run_handler(handler.as_ref(), event).await;
            }
        }
    }

    /// Start consuming the change log in the background.
    pub fn start(self) -> TriggerHandle {
        let TriggerRuntime {
            store,
            handlers,
            group,
            poll_interval,
            batch_size,
        } = self;
        let task = tokio::spawn(async move {
            let mut wake = store.subscribe();
            // a previous run may have stopped between claiming and acknowledging
            let mut position = LogPosition::Pending;
            loop {
                drain_notifications(&mut wake);
                let batch = match store.read_change_log(&group, position, batch_size).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        error!("trigger runtime could not read the change log: {err}");
                        position = LogPosition::Pending;
                        tokio::time::sleep(poll_interval).await;
                        continue;
                    }
                };
                if batch.is_empty() {
                    if position == LogPosition::Pending {
                        position = LogPosition::New;
                    } else {
                        wait_for_changes(&mut wake, poll_interval).await;
                    }
                    continue;
                }

                let log_ids = dispatch_batch(&handlers, batch).await;
                if let Err(err) = store.ack_changes(&group, &log_ids).await {
                    warn!("could not acknowledge {} change(s); they will be redelivered: {err}", log_ids.len());
                    position = LogPosition::Pending;
                    tokio::time::sleep(poll_interval).await;
                }
            }
        });
        TriggerHandle { task }
    }
}

/// Run the handlers of every entry concurrently and return the entries' log ids once all of them
/// finished.
async fn dispatch_batch(handlers: &[Arc<dyn ChangeHandler>], batch: Vec<LoggedChange>) -> Vec<String> {
    let mut tasks = JoinSet::new();
    let mut log_ids = Vec::with_capacity(batch.len());
    for LoggedChange { log_id, event } in batch {
        let event = Arc::new(event);
        for handler in handlers.iter().filter(|handler| handler.accepts(&event)) {
            let handler = handler.clone();
            let event = event.clone();
            tasks.spawn(async move { run_handler(handler.as_ref(), &event).await });
        }
        log_ids.push(log_id);
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!("trigger task aborted: {err}");
        }
    }
    log_ids
}

/// Discard queued change notifications; the change log is read next anyway.
fn drain_notifications(wake: &mut broadcast::Receiver<ChangeEvent>) {
    loop {
        match wake.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Empty) | Err(broadcast::error::TryRecvError::Closed) => return,
        }
    }
}

async fn wait_for_changes(wake: &mut broadcast::Receiver<ChangeEvent>, poll_interval: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(poll_interval) => {}
        received = wake.recv() => {
            if let Err(broadcast::error::RecvError::Closed) = received {
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn run_handler(handler: &dyn ChangeHandler, event: &ChangeEvent) {
    debug!(
        "trigger {} handling {:?} of {}/{}",
        handler.name(),
        event.kind,
        event.collection,
        event.document_id
    );
    for attempt in 1..=HANDLER_ATTEMPTS {
        match handler.handle(event).await {
            Ok(()) => return,
            Err(err) if attempt < HANDLER_ATTEMPTS => {
                warn!(
                    "trigger {} failed on event {} (attempt {attempt}/{HANDLER_ATTEMPTS}): {err}",
                    handler.name(),
                    event.event_id
                );
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(err) => error!(
                "trigger {} gave up on event {} after {HANDLER_ATTEMPTS} attempts: {err}",
                handler.name(),
                event.event_id
            ),
        }
    }
}

/// Background task of a started [`TriggerRuntime`].
pub struct TriggerHandle {
    task: JoinHandle<()>,
}

impl TriggerHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// When a scheduled job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval, first run one interval after start.
    Every(Duration),
    /// Once a day at a UTC wall-clock time.
    DailyAt(NaiveTime),
}

impl Schedule {
    /// Parse an `HH:MM` UTC time into [`Schedule::DailyAt`].
    pub fn daily_at(raw: &str) -> EngagementResult<Self> {
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(Schedule::DailyAt)
            .map_err(|err| EngagementError::invalid("daily_purge_at", format!("`{raw}` is not HH:MM: {err}")))
    }

    /// First run strictly after `now`.
    pub fn next_run(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Schedule::Every(period) => TimeDelta::from_std(*period)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Schedule::DailyAt(time) => {
                let today = now.date_naive().and_time(*time).and_utc();
                if today > now {
                    today
                } else {
                    today.checked_add_days(Days::new(1)).unwrap_or(today)
                }
            }
        }
    }
}

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self) -> EngagementResult<()>;
}

/// Runs [`ScheduledJob`]s on their schedules until stopped.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<(Schedule, Arc<dyn ScheduledJob>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, schedule: Schedule, job: impl ScheduledJob + 'static) -> Self {
        self.jobs.push((schedule, Arc::new(job)));
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn start(self) -> SchedulerHandle {
        let tasks = self
            .jobs
            .into_iter()
            .map(|(schedule, job)| {
                tokio::spawn(async move {
                    loop {
                        let now = Utc::now();
                        let next = schedule.next_run(now);
                        debug!("job {} next runs at {next}", job.name());
                        tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;
                        match job.run().await {
                            Ok(()) => debug!("job {} finished", job.name()),
                            Err(err) => error!("job {} failed: {err}", job.name()),
                        }
                    }
                })
            })
            .collect();
        SchedulerHandle { tasks }
    }
}

pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
