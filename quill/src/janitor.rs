//! Scheduled retention cleanup.
//!
//! Three independent purges: read notifications past their retention window, residue of
//! accounts that never verified their email, and trigger receipts old enough that their event can
//! no longer be redelivered.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::errors::{EngagementError, EngagementResult, StoreError};
use crate::store::{CommitOutcome, FilterOperator, MAX_PLAN_OPS, Query, Store, StoreExt, WritePlan};
use crate::triggers::ScheduledJob;
use crate::types::{AccountRecord, collections};

/// Largest number of deletes committed in one plan.
pub const PURGE_BATCH: usize = MAX_PLAN_OPS;

/// Lists and deletes identities of the authentication provider.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn list_accounts(&self) -> EngagementResult<Vec<AccountRecord>>;

    /// Delete identities in one call. Returns how many were removed.
    async fn delete_accounts(&self, ids: &[String]) -> EngagementResult<usize>;
}

/// Account directory backed by the `accounts` collection.
pub struct StoreAccountDirectory {
    store: Arc<dyn Store>,
}

impl StoreAccountDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccountDirectory for StoreAccountDirectory {
    async fn list_accounts(&self) -> EngagementResult<Vec<AccountRecord>> {
        Ok(self.store.find(&Query::new(collections::ACCOUNTS)).await?)
    }

    async fn delete_accounts(&self, ids: &[String]) -> EngagementResult<usize> {
        let mut removed = 0;
        for chunk in ids.chunks(PURGE_BATCH) {
            let plan = chunk
                .iter()
                .fold(WritePlan::new(), |plan, id| plan.delete(collections::ACCOUNTS, id.clone()));
            removed += applied_count(self.store.commit(plan).await?);
        }
        Ok(removed)
    }
}

/// Blob storage holding user uploads such as profile images.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Delete every object whose key starts with `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Object storage on the local filesystem; object keys are paths relative to `root`.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let (directory, name_prefix) = match prefix.rsplit_once('/') {
            Some((directory, name)) => (directory, name),
            None => ("", prefix),
        };
        if Path::new(directory)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(StoreError::backend(format!("object prefix `{prefix}` escapes the storage root")));
        }

        let directory = self.root.join(directory);
        let mut entries = match tokio::fs::read_dir(&directory).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_name().to_string_lossy().starts_with(name_prefix) {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }
        if name_prefix.is_empty() && directory != self.root {
            tokio::fs::remove_dir(&directory).await?;
        }
        Ok(removed)
    }
}

/// Retention windows applied by the janitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub read_notification_ttl: TimeDelta,
    pub unverified_grace: TimeDelta,
    pub receipt_ttl: TimeDelta,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            read_notification_ttl: TimeDelta::days(3),
            unverified_grace: TimeDelta::minutes(10),
            receipt_ttl: TimeDelta::days(7),
        }
    }
}

/// Result of one purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Candidates that matched the purge criteria.
    pub matched: usize,
    pub purged: usize,
    /// Candidates whose cleanup failed part-way.
    pub failed: usize,
}

pub struct RetentionJanitor {
    store: Arc<dyn Store>,
    accounts: Arc<dyn AccountDirectory>,
    storage: Arc<dyn ObjectStorage>,
    policy: RetentionPolicy,
}

impl RetentionJanitor {
    pub fn new(store: Arc<dyn Store>, accounts: Arc<dyn AccountDirectory>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            store,
            accounts,
            storage,
            policy: RetentionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Delete notifications that are read and were created before `now - read_notification_ttl`.
    pub async fn purge_read_notifications(&self, now: DateTime<Utc>) -> EngagementResult<PurgeReport> {
        let cutoff = now - self.policy.read_notification_ttl;
        let query = Query::new(collections::NOTIFICATIONS)
            .filter_eq("read", true)
            .filter("createdAt", FilterOperator::Lt, cutoff.timestamp_millis());
        let report = self.purge_matching(&query).await?;
        info!("purged {} read notification(s) older than {cutoff}", report.purged);
        Ok(report)
    }

    /// Delete trigger receipts created before `now - receipt_ttl`. Change-log entries of the same
    /// age are trimmed first, so no event can be redelivered once its receipts are gone.
    pub async fn purge_trigger_receipts(&self, now: DateTime<Utc>) -> EngagementResult<PurgeReport> {
        let cutoff = now - self.policy.receipt_ttl;
        let trimmed = self.store.trim_change_log(cutoff).await?;
        debug!("trimmed {trimmed} change log entr(ies) older than {cutoff}");
        let query = Query::new(collections::TRIGGER_RECEIPTS).filter(
            "createdAt",
            FilterOperator::Lt,
            cutoff.timestamp_millis(),
        );
        let report = self.purge_matching(&query).await?;
        info!("purged {} trigger receipt(s) older than {cutoff}", report.purged);
        Ok(report)
    }

    /// Remove every trace of accounts that are unverified and older than the grace window: the
    /// profile document, username reservations, stored profile images and finally the identity.
    /// A failure for one account is logged and does not stop the others.
    pub async fn purge_unverified_accounts(&self, now: DateTime<Utc>) -> EngagementResult<PurgeReport> {
        let cutoff = now - self.policy.unverified_grace;
        let stale: Vec<String> = self
            .accounts
            .list_accounts()
            .await?
            .into_iter()
            .filter(|account| !account.email_verified && account.created_at < cutoff)
            .map(|account| account.id)
            .collect();

        let mut report = PurgeReport {
            matched: stale.len(),
            ..Default::default()
        };
        if stale.is_empty() {
            debug!("no unverified accounts older than {cutoff}");
            return Ok(report);
        }

        for uid in &stale {
            match self.purge_account_residue(uid).await {
                Ok(()) => debug!("cleaned residue of unverified account {uid}"),
                Err(err) => {
                    warn!("failed to clean residue of unverified account {uid}: {err}");
                    report.failed += 1;
                }
            }
        }
        report.purged = self.accounts.delete_accounts(&stale).await?;
        info!("deleted {} unverified account(s)", report.purged);
        Ok(report)
    }

    async fn purge_account_residue(&self, uid: &str) -> EngagementResult<()> {
        let reservations = self
            .store
            .query(&Query::new(collections::USERNAMES).filter_eq("uid", uid))
            .await?;
        let plan = reservations
            .into_iter()
            .fold(WritePlan::new().delete(collections::USERS, uid), |plan, reservation| {
                plan.delete(collections::USERNAMES, reservation.id)
            });
        self.store.commit(plan).await?;

        let images = self.storage.delete_prefix(&profile_image_prefix(uid)).await?;
        debug!("removed {images} stored image(s) of {uid}");
        Ok(())
    }

    async fn purge_matching(&self, query: &Query) -> EngagementResult<PurgeReport> {
        let matched = self.store.query(query).await?;
        let mut report = PurgeReport {
            matched: matched.len(),
            ..Default::default()
        };
        for chunk in matched.chunks(PURGE_BATCH) {
            let plan = chunk.iter().fold(WritePlan::new(), |plan, document| {
                plan.delete(query.collection.clone(), document.id.clone())
            });
            report.purged += applied_count(self.store.commit(plan).await?);
        }
        Ok(report)
    }
}

/// Storage prefix holding a user's profile images.
pub fn profile_image_prefix(uid: &str) -> String {
    format!("profile_images/{uid}/")
}

fn applied_count(outcome: CommitOutcome) -> usize {
    match outcome {
        CommitOutcome::Applied(changed) => changed,
        CommitOutcome::Skipped => 0,
    }
}

/// The janitor's purges as schedulable jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JanitorTask {
    ReadNotifications,
    UnverifiedAccounts,
    TriggerReceipts,
}

pub struct JanitorJob {
    janitor: Arc<RetentionJanitor>,
    task: JanitorTask,
}

impl JanitorJob {
    pub fn new(janitor: Arc<RetentionJanitor>, task: JanitorTask) -> Self {
        Self { janitor, task }
    }
}

#[async_trait]
impl ScheduledJob for JanitorJob {
    fn name(&self) -> &'static str {
        match self.task {
            JanitorTask::ReadNotifications => "purge-read-notifications",
            JanitorTask::UnverifiedAccounts => "purge-unverified-accounts",
            JanitorTask::TriggerReceipts => "purge-trigger-receipts",
        }
    }

    async fn run(&self) -> EngagementResult<()> {
        let now = Utc::now();
        let report = match self.task {
            JanitorTask::ReadNotifications => self.janitor.purge_read_notifications(now).await?,
            JanitorTask::UnverifiedAccounts => self.janitor.purge_unverified_accounts(now).await?,
            JanitorTask::TriggerReceipts => self.janitor.purge_trigger_receipts(now).await?,
        };
        if report.failed > 0 {
            return Err(EngagementError::Store(StoreError::backend(format!(
                "{} of {} candidate(s) were not fully cleaned",
                report.failed, report.matched
            ))));
        }
        Ok(())
    }
}
