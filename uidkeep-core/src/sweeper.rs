use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::config::SweeperConfig;
use crate::error::StorageError;
use crate::mirror::{Mirror, MirrorAction};
use crate::record::Policy;
use crate::store::RecordStore;
use crate::task::BackgroundTask;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// UIDs removed from the store, in key order
    pub evicted: Vec<String>,
    /// Records left in place because their stored value could not be parsed
    pub skipped: usize,
    /// Unreadable UIDs that the previous sweep did not already report
    pub newly_unreadable: Vec<String>,
}

/// Periodically evicts expired records and revokes them upstream.
#[derive(Clone)]
pub struct Sweeper {
    store: RecordStore,
    mirror: Mirror,
    clock: Arc<dyn Clock>,
    /// Unreadable UIDs already warned about, so each is logged once
    reported_unreadable: Arc<Mutex<BTreeSet<String>>>,
}

impl Sweeper {
    pub fn new(store: RecordStore, mirror: Mirror, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            mirror,
            clock,
            reported_unreadable: Arc::default(),
        }
    }

    /// Runs one sweep.
    ///
    /// Selection and removal happen in a single locked read-modify-write
    /// with one clock reading. Remote revocations are sent after the lock is
    /// released and cannot undo the local removal.
    pub async fn sweep_once(&self) -> Result<SweepReport, StorageError> {
        let now = self.clock.now();

        let (mut report, unreadable) = self
            .store
            .update(|records| {
                let mut report = SweepReport::default();
                let mut unreadable = Vec::new();
                records.retain(|uid, raw| match Policy::parse(raw) {
                    Some(policy) if policy.is_expired_at(now) => {
                        report.evicted.push(uid.clone());
                        false
                    }
                    Some(_) => true,
                    None => {
                        unreadable.push((uid.clone(), raw.clone()));
                        true
                    }
                });
                report.skipped = unreadable.len();
                (report, unreadable)
            })
            .await?;

        report.newly_unreadable = self.note_unreadable(unreadable);

        for uid in &report.evicted {
            tracing::info!("Removed expired UID: {}", uid);
        }
        join_all(
            report
                .evicted
                .iter()
                .map(|uid| self.mirror.notify(MirrorAction::Remove, uid)),
        )
        .await;

        Ok(report)
    }

    /// Warns once per unreadable UID and forgets UIDs that are no longer
    /// unreadable. Returns the UIDs warned about this time.
    fn note_unreadable(&self, unreadable: Vec<(String, String)>) -> Vec<String> {
        let mut reported = self
            .reported_unreadable
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut newly = Vec::new();
        for (uid, raw) in &unreadable {
            if reported.contains(uid) {
                tracing::debug!("Still skipping UID {} with unreadable policy {:?}", uid, raw);
            } else {
                tracing::warn!("Skipping UID {} with unreadable policy {:?}", uid, raw);
                newly.push(uid.clone());
            }
        }
        *reported = unreadable.into_iter().map(|(uid, _)| uid).collect();
        newly
    }

    /// Starts the sweep loop. The first sweep runs immediately so records
    /// that expired while the process was down are evicted at startup.
    pub fn spawn(&self, config: &SweeperConfig) -> BackgroundTask {
        let sweeper = self.clone();
        BackgroundTask::spawn("expiry sweep", config.interval, true, move || {
            let sweeper = sweeper.clone();
            async move {
                if let Err(err) = sweeper.sweep_once().await {
                    tracing::error!("Sweep failed, retrying next interval: {}", err);
                }
            }
        })
    }
}
