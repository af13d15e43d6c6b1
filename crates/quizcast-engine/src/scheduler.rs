//! Durable one-shot job scheduler.
//!
//! Each campaign job is persisted before its timer is armed, so the
//! schedule survives restarts: `restore()` re-arms every future pending
//! job and fails the ones whose window was missed. Timers are plain
//! duration-based `tokio::time::sleep` one-shots computed from the
//! absolute fire instant — no recurring-schedule primitive involved.
//!
//! A fired job is never retried: campaign delivery is not idempotent,
//! and a retry could double-send to users. A human operator reschedules.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::traits::Transport;
use quizcast_core::types::{CampaignDef, CampaignKind, JobStatus, ScheduledJob};

use crate::lifecycle::LifecycleManager;
use crate::persistence::CampaignDb;
use crate::sessions::{ActiveCampaign, SessionTracker};
use crate::validate;

/// Hard cap on destinations per scheduling request.
pub const MAX_SCHEDULE_DESTINATIONS: usize = 50;
/// Hard cap on campaign definitions per scheduling request.
pub const MAX_CAMPAIGNS_PER_REQUEST: usize = 30;

/// Owns the durable job records and the armed in-memory timers.
pub struct SchedulingEngine {
    db: Arc<CampaignDb>,
    transport: Arc<dyn Transport>,
    quiz_sessions: Arc<SessionTracker>,
    poll_sessions: Arc<SessionTracker>,
    lifecycle: Arc<LifecycleManager>,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

/// Summary returned by a successful scheduling request.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleReceipt {
    pub total_jobs: usize,
    pub destinations: usize,
    pub campaigns: usize,
    pub first_fire_at: DateTime<Utc>,
    pub last_fire_at: DateTime<Utc>,
}

/// What startup recovery found in the durable store.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RestoreReport {
    pub restored: usize,
    pub missed: usize,
}

/// Snapshot of scheduler state for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulingStats {
    pub total_pending: i64,
    pub total_sent: i64,
    pub total_failed: i64,
    pub total_cancelled: i64,
    pub armed_timers: usize,
    pub total_upcoming: usize,
    pub next_jobs: Vec<UpcomingJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingJob {
    pub id: String,
    pub destination: String,
    pub question: String,
    pub fire_at: DateTime<Utc>,
}

impl SchedulingEngine {
    pub fn new(
        db: Arc<CampaignDb>,
        transport: Arc<dyn Transport>,
        quiz_sessions: Arc<SessionTracker>,
        poll_sessions: Arc<SessionTracker>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            db,
            transport,
            quiz_sessions,
            poll_sessions,
            lifecycle,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule a series of campaigns: one job per (destination × def),
    /// the i-th def firing at `start_time + i * interval_minutes` for
    /// every destination. Existing pending jobs for the destinations are
    /// cancelled first — no campaign overlap per destination.
    pub async fn schedule_campaigns(
        &self,
        destinations: &[String],
        defs: &[CampaignDef],
        start_time: DateTime<Utc>,
        interval_minutes: i64,
    ) -> Result<ScheduleReceipt> {
        validate::bulk_limits(destinations.len(), MAX_SCHEDULE_DESTINATIONS, "chat ids")?;
        validate::bulk_limits(defs.len(), MAX_CAMPAIGNS_PER_REQUEST, "campaigns")?;
        for destination in destinations {
            validate::destination(destination)?;
        }
        for def in defs {
            validate::campaign_def(def)?;
        }
        validate::future_time(start_time, Utc::now())?;
        validate::interval_minutes(interval_minutes)?;

        let cancelled = self.cancel_jobs_for_destinations(destinations).await?;
        if cancelled > 0 {
            tracing::info!("Cancelled {cancelled} previously scheduled jobs before rescheduling");
        }

        let fire_times = validate::fire_times(start_time, interval_minutes, defs.len());
        let mut jobs = Vec::with_capacity(destinations.len() * defs.len());
        for destination in destinations {
            for (def, fire_at) in defs.iter().zip(&fire_times) {
                let job = ScheduledJob {
                    id: Uuid::new_v4().to_string(),
                    destination: destination.clone(),
                    question: def.question.clone(),
                    options: def.options.clone(),
                    correct_option_index: def.correct_option_index,
                    fire_at: *fire_at,
                    status: JobStatus::Pending,
                    created_at: Utc::now(),
                };
                self.db.insert_job(&job)?;
                jobs.push(job);
            }
        }

        for job in &jobs {
            self.arm(job.clone()).await;
        }

        tracing::info!(
            "Scheduled {} campaigns for {} destinations starting at {} with {interval_minutes}-minute intervals",
            defs.len(),
            destinations.len(),
            start_time.to_rfc3339(),
        );

        Ok(ScheduleReceipt {
            total_jobs: jobs.len(),
            destinations: destinations.len(),
            campaigns: defs.len(),
            first_fire_at: start_time,
            last_fire_at: fire_times.last().copied().unwrap_or(start_time),
        })
    }

    /// Cancel one job. Idempotent: cancelling an already-terminal job is
    /// a no-op; only an unknown id is an error.
    pub async fn cancel_job(&self, id: &str) -> Result<()> {
        let job = self
            .db
            .get_job(id)?
            .ok_or_else(|| QuizcastError::NotFound(format!("scheduled job {id}")))?;

        if let Some(handle) = self.timers.lock().await.remove(id) {
            handle.abort();
        }

        if job.status == JobStatus::Pending {
            // CAS: if the fire callback won the race meanwhile, leave the
            // terminal status in place.
            if self.db.transition(id, JobStatus::Cancelled)? {
                tracing::info!("Cancelled scheduled job {id}");
            }
        }
        Ok(())
    }

    /// Cancel every pending job for the given destinations. Returns how
    /// many jobs were cancelled.
    pub async fn cancel_jobs_for_destinations(&self, destinations: &[String]) -> Result<usize> {
        let ids = self.db.pending_ids_for_destinations(destinations)?;
        let mut cancelled = 0;
        let mut timers = self.timers.lock().await;
        for id in &ids {
            if let Some(handle) = timers.remove(id) {
                handle.abort();
            }
            if self.db.transition(id, JobStatus::Cancelled)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Move a pending job to a new future fire time and re-arm its timer.
    pub async fn reschedule_job(&self, id: &str, new_time: DateTime<Utc>) -> Result<()> {
        validate::future_time(new_time, Utc::now())?;

        let job = self
            .db
            .get_job(id)?
            .ok_or_else(|| QuizcastError::NotFound(format!("scheduled job {id}")))?;
        if job.status != JobStatus::Pending {
            return Err(QuizcastError::InvalidState(format!(
                "cannot reschedule job {id} in status {}",
                job.status.as_str()
            )));
        }

        if !self.db.update_fire_at(id, new_time)? {
            // The job reached a terminal status between the read and the
            // update.
            return Err(QuizcastError::InvalidState(format!(
                "job {id} is no longer pending"
            )));
        }

        if let Some(handle) = self.timers.lock().await.remove(id) {
            handle.abort();
        }
        let mut updated = job;
        updated.fire_at = new_time;
        self.arm(updated).await;

        tracing::info!("Rescheduled job {id} to {}", new_time.to_rfc3339());
        Ok(())
    }

    /// Pending jobs, optionally filtered by destination, ordered by fire
    /// time.
    pub fn get_pending_jobs(&self, destination: Option<&str>) -> Result<Vec<ScheduledJob>> {
        self.db.pending_jobs(destination)
    }

    /// Counts per status plus the next few upcoming jobs.
    pub async fn scheduling_stats(&self) -> Result<SchedulingStats> {
        let now = Utc::now();
        let upcoming: Vec<ScheduledJob> = self
            .db
            .pending_jobs(None)?
            .into_iter()
            .filter(|job| job.fire_at > now)
            .collect();
        let total_upcoming = upcoming.len();
        let next_jobs = upcoming
            .into_iter()
            .take(5)
            .map(|job| UpcomingJob {
                id: job.id,
                destination: job.destination,
                question: validate::truncate(&job.question, 50),
                fire_at: job.fire_at,
            })
            .collect();

        Ok(SchedulingStats {
            total_pending: self.db.count_status(JobStatus::Pending)?,
            total_sent: self.db.count_status(JobStatus::Sent)?,
            total_failed: self.db.count_status(JobStatus::Failed)?,
            total_cancelled: self.db.count_status(JobStatus::Cancelled)?,
            armed_timers: self.timers.lock().await.len(),
            total_upcoming,
            next_jobs,
        })
    }

    /// Startup recovery: re-arm every future pending job; mark jobs whose
    /// window already passed as failed (missed, not retried).
    pub async fn restore(&self) -> Result<RestoreReport> {
        let pending = self.db.pending_jobs(None)?;
        let now = Utc::now();
        let mut report = RestoreReport {
            restored: 0,
            missed: 0,
        };

        for job in pending {
            if job.fire_at <= now {
                if self.db.transition(&job.id, JobStatus::Failed)? {
                    tracing::warn!(
                        "Job {} missed its window at {} — marked failed",
                        job.id,
                        job.fire_at.to_rfc3339()
                    );
                    report.missed += 1;
                }
            } else {
                self.arm(job).await;
                report.restored += 1;
            }
        }

        tracing::info!(
            "Restored {} scheduled jobs, {} missed their window",
            report.restored,
            report.missed
        );
        Ok(report)
    }

    /// Abort every armed timer. Pending rows stay untouched for the next
    /// `restore()`.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        tracing::info!("Aborted {count} armed job timers");
    }

    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    /// Arm a one-shot timer for a pending job.
    async fn arm(&self, job: ScheduledJob) {
        let id = job.id.clone();
        let delay = (job.fire_at - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let db = Arc::clone(&self.db);
        let transport = Arc::clone(&self.transport);
        let quiz_sessions = Arc::clone(&self.quiz_sessions);
        let poll_sessions = Arc::clone(&self.poll_sessions);
        let lifecycle = Arc::clone(&self.lifecycle);
        let timers = Arc::clone(&self.timers);

        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(
                &task_id,
                db,
                transport,
                quiz_sessions,
                poll_sessions,
                lifecycle,
            )
            .await;
            timers.lock().await.remove(&task_id);
        });

        self.timers.lock().await.insert(id, handle);
    }
}

/// Execute one due job: send the campaign, register it for answer
/// tracking, hand it to the lifecycle manager, and settle the durable
/// status with a check-and-set.
async fn fire(
    id: &str,
    db: Arc<CampaignDb>,
    transport: Arc<dyn Transport>,
    quiz_sessions: Arc<SessionTracker>,
    poll_sessions: Arc<SessionTracker>,
    lifecycle: Arc<LifecycleManager>,
) {
    let job = match db.get_job(id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::error!("Timer fired for unknown job {id}");
            return;
        }
        Err(e) => {
            tracing::error!("Failed to load job {id} at fire time: {e}");
            return;
        }
    };
    if job.status != JobStatus::Pending {
        // Cancelled (or already settled) after the timer was armed.
        tracing::debug!("Job {id} no longer pending at fire time — skipping");
        return;
    }

    tracing::info!("Firing job {id} for destination {}", job.destination);

    match transport
        .send_interactive(
            &job.destination,
            &job.question,
            &job.options,
            job.correct_option_index,
        )
        .await
    {
        Ok(sent) => {
            let kind = job.kind();
            let tracker = match kind {
                CampaignKind::Quiz => quiz_sessions,
                CampaignKind::Poll => poll_sessions,
            };
            tracker
                .register(ActiveCampaign::new(
                    sent.campaign_id.clone(),
                    job.destination.clone(),
                    kind,
                    job.correct_option_index,
                    Some(sent.message_id),
                ))
                .await;
            lifecycle
                .watch(&sent.campaign_id, &job.destination, sent.message_id, tracker)
                .await;

            match db.transition(id, JobStatus::Sent) {
                Ok(true) => {
                    tracing::info!(
                        "Job {id} sent to {} (campaign {})",
                        job.destination,
                        sent.campaign_id
                    );
                }
                Ok(false) => {
                    // A concurrent cancel lost the race with the send; the
                    // message is out, only the stale timer handle was removed.
                    tracing::warn!("Job {id} was cancelled while its send was in flight");
                }
                Err(e) => {
                    tracing::error!("Failed to mark job {id} sent: {e}");
                }
            }
        }
        Err(e) => {
            // Terminal: no retry — a retry could double-send to users.
            tracing::error!("Job {id} failed to send: {e}");
            match db.transition(id, JobStatus::Failed) {
                Ok(_) => {}
                Err(db_err) => {
                    tracing::error!("Failed to mark job {id} failed: {db_err}");
                }
            }
        }
    }
}
