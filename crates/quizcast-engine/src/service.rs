//! The engine facade — one constructor wires the store, transport,
//! trackers, lifecycle manager, dispatcher, and scheduler into an
//! immutable dependency graph. Nothing can fire before its collaborators
//! exist.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use quizcast_core::error::Result;
use quizcast_core::traits::Transport;
use quizcast_core::types::{
    AnswerOutcome, Answerer, CampaignDef, DispatchReport, MessageButton, ScheduledJob,
};

use crate::dispatcher::BulkDispatcher;
use crate::lifecycle::LifecycleManager;
use crate::persistence::CampaignDb;
use crate::scheduler::{RestoreReport, ScheduleReceipt, SchedulingEngine, SchedulingStats};
use crate::sessions::SessionTracker;

/// Everything the rest of the application talks to.
pub struct CampaignService {
    scheduler: SchedulingEngine,
    dispatcher: BulkDispatcher,
    quiz_sessions: Arc<SessionTracker>,
    poll_sessions: Arc<SessionTracker>,
    lifecycle: Arc<LifecycleManager>,
}

impl CampaignService {
    pub fn new(db: Arc<CampaignDb>, transport: Arc<dyn Transport>, quiz_points: i64) -> Self {
        let quiz_sessions = Arc::new(SessionTracker::new(Arc::clone(&db), quiz_points));
        let poll_sessions = Arc::new(SessionTracker::new(Arc::clone(&db), quiz_points));
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&transport),
            Arc::clone(&db),
        ));
        let dispatcher = BulkDispatcher::new(
            Arc::clone(&transport),
            Arc::clone(&quiz_sessions),
            Arc::clone(&poll_sessions),
        );
        let scheduler = SchedulingEngine::new(
            db,
            transport,
            Arc::clone(&quiz_sessions),
            Arc::clone(&poll_sessions),
            Arc::clone(&lifecycle),
        );

        Self {
            scheduler,
            dispatcher,
            quiz_sessions,
            poll_sessions,
            lifecycle,
        }
    }

    // ─── Scheduling ──────────────────────────────────────

    pub async fn schedule_campaigns(
        &self,
        destinations: &[String],
        defs: &[CampaignDef],
        start_time: DateTime<Utc>,
        interval_minutes: i64,
    ) -> Result<ScheduleReceipt> {
        self.scheduler
            .schedule_campaigns(destinations, defs, start_time, interval_minutes)
            .await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<()> {
        self.scheduler.cancel_job(id).await
    }

    pub async fn cancel_jobs_for_destinations(&self, destinations: &[String]) -> Result<usize> {
        self.scheduler
            .cancel_jobs_for_destinations(destinations)
            .await
    }

    pub async fn reschedule_job(&self, id: &str, new_time: DateTime<Utc>) -> Result<()> {
        self.scheduler.reschedule_job(id, new_time).await
    }

    pub fn get_pending_jobs(&self, destination: Option<&str>) -> Result<Vec<ScheduledJob>> {
        self.scheduler.get_pending_jobs(destination)
    }

    pub async fn scheduling_stats(&self) -> Result<SchedulingStats> {
        self.scheduler.scheduling_stats().await
    }

    /// Startup recovery — call once before accepting traffic.
    pub async fn restore(&self) -> Result<RestoreReport> {
        self.scheduler.restore().await
    }

    // ─── Bulk dispatch ──────────────────────────────────────

    pub async fn send_bulk_message(
        &self,
        destinations: &[String],
        text: &str,
        button: Option<&MessageButton>,
    ) -> Result<DispatchReport> {
        self.dispatcher
            .send_bulk_message(destinations, text, button)
            .await
    }

    pub async fn send_bulk_image(
        &self,
        destinations: &[String],
        bytes: &[u8],
        caption: Option<&str>,
    ) -> Result<DispatchReport> {
        self.dispatcher
            .send_bulk_image(destinations, bytes, caption)
            .await
    }

    pub async fn send_bulk_poll(
        &self,
        destinations: &[String],
        def: &CampaignDef,
    ) -> Result<DispatchReport> {
        self.dispatcher.send_bulk_poll(destinations, def).await
    }

    /// Broadcast the week-scoped summary to every destination with
    /// recorded outcome activity.
    pub async fn broadcast_week_summary(&self) -> Result<(usize, usize)> {
        self.lifecycle.broadcast_week_summary().await
    }

    // ─── Answers ──────────────────────────────────────

    /// Route an incoming answer event. Quiz campaigns are tried first;
    /// anything they don't match falls through to the poll tracker.
    pub async fn record_answer(
        &self,
        campaign_id: &str,
        answerer: &Answerer,
        option_index: u32,
    ) -> AnswerOutcome {
        let outcome = self
            .quiz_sessions
            .record_answer(campaign_id, answerer, option_index)
            .await;
        if outcome.matched {
            return outcome;
        }

        let outcome = self
            .poll_sessions
            .record_answer(campaign_id, answerer, option_index)
            .await;
        if !outcome.matched {
            tracing::debug!("No active campaign matched answer for {campaign_id}");
        }
        outcome
    }

    /// Abort all armed timers for graceful shutdown. Durable state is
    /// untouched; the next `restore()` picks the schedule back up.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.lifecycle.shutdown().await;
        tracing::info!("Campaign service shut down");
    }
}
