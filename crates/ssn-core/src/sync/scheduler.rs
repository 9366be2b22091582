//! Periodic resynchronisation.

use super::engine::SyncEngine;
use crate::error::Result;
use crate::logging::RedactedOnion;
use crate::storage::{Contact, ContactStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::Instrument;

/// Contact states pulled on every sweep.
pub const RESYNC_STATUSES: [ContactStatus; 3] = [
    ContactStatus::Success,
    ContactStatus::Pending,
    ContactStatus::Following,
];

/// Summary of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResyncReport {
    /// Contacts selected for the sweep.
    pub contacts: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Tasks cancelled by `peer_task_timeout`.
    pub timed_out: usize,
    /// Posts stored across all contacts.
    pub posts: usize,
    pub profiles: usize,
}

enum TaskResult {
    Done { posts: usize, profiles: usize },
    Failed,
    TimedOut,
}

impl SyncEngine {
    /// Pull from every active contact on a bounded pool.
    ///
    /// Each contact gets its own task bounded by `peer_task_timeout`; a slow
    /// peer costs one slot, not the sweep. PENDING contacts are also sent a
    /// contact request.
    pub async fn resync_all(self: &Arc<Self>) -> Result<ResyncReport> {
        let contacts = self
            .store()
            .lock()
            .await
            .contacts_with_status(&RESYNC_STATUSES)?;

        let mut report = ResyncReport {
            contacts: contacts.len(),
            ..ResyncReport::default()
        };
        if contacts.is_empty() {
            tracing::debug!("No contacts to resync");
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.config().max_concurrent_pulls.max(1)));
        let budget = self.config().peer_task_timeout;
        let mut tasks = JoinSet::new();

        for contact in contacts {
            let engine = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let span = tracing::info_span!("resync", peer = %RedactedOnion(contact.onion.as_str()));
            tasks.spawn(
                async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => return TaskResult::Failed,
                    };
                    match timeout(budget, engine.resync_contact(&contact)).await {
                        Ok(Ok((posts, profiles))) => TaskResult::Done { posts, profiles },
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Resync failed");
                            TaskResult::Failed
                        }
                        Err(_) => {
                            tracing::warn!(budget_secs = budget.as_secs(), "Resync timed out");
                            TaskResult::TimedOut
                        }
                    }
                }
                .instrument(span),
            );
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(TaskResult::Done { posts, profiles }) => {
                    report.succeeded += 1;
                    report.posts += posts;
                    report.profiles += profiles;
                }
                Ok(TaskResult::Failed) => report.failed += 1,
                Ok(TaskResult::TimedOut) => report.timed_out += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Resync task panicked");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            contacts = report.contacts,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            posts = report.posts,
            "Resync sweep finished"
        );
        Ok(report)
    }

    async fn resync_contact(self: &Arc<Self>, contact: &Contact) -> Result<(usize, usize)> {
        let synced = self.sync_contact(contact).await;

        // Sent whether or not the pull worked.
        if contact.status == ContactStatus::Pending {
            if let Err(e) = self
                .send_contact_request(&contact.onion, &contact.request_message)
                .await
            {
                tracing::debug!(error = %e, "Contact request not delivered");
            }
        }

        let outcome = synced?;
        Ok((outcome.posts, outcome.profiles))
    }
}

/// Runs [`SyncEngine::resync_all`] now and then every `interval`.
///
/// Stopping consumes the scheduler; start a new one to resume.
pub struct ResyncScheduler {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<usize>,
}

impl ResyncScheduler {
    /// Start sweeping. `max_runs` bounds the number of sweeps.
    pub fn start(engine: Arc<SyncEngine>, period: Duration, max_runs: Option<usize>) -> Self {
        let (stop, mut stopped) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut runs = 0;

            loop {
                if max_runs.is_some_and(|max| runs >= max) {
                    break;
                }
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {}
                }

                tracing::debug!(run = runs + 1, "Starting resync sweep");
                tokio::select! {
                    _ = &mut stopped => break,
                    result = engine.resync_all() => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Resync sweep failed");
                        }
                    }
                }
                runs += 1;
            }

            tracing::info!(runs, "Resync scheduler stopped");
            runs
        });

        Self { stop, handle }
    }

    /// True once the run limit was reached or the task ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for a run-limited scheduler to finish. Returns the sweeps run.
    pub async fn join(self) -> usize {
        self.handle.await.unwrap_or(0)
    }

    /// Stop, abandoning any sweep in progress. Returns the sweeps completed.
    pub async fn stop(self) -> usize {
        let _ = self.stop.send(());
        self.handle.await.unwrap_or(0)
    }
}
