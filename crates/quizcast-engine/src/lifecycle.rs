//! Message lifecycle — reminder and deletion timers armed at send time.
//!
//! Per sent campaign: Sent -> (after 5 min) ReminderSent -> (10 min from
//! Sent) Deleted. Timers are explicit tasks keyed by campaign id so
//! shutdown can enumerate and abort them. Every action here is
//! best-effort cleanup: transport failures are logged and never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use quizcast_core::traits::Transport;

use crate::persistence::{CampaignDb, SummaryRow};
use crate::sessions::SessionTracker;
use crate::tz;

const REMINDER_DELAY: Duration = Duration::from_secs(300);
const DELETE_DELAY: Duration = Duration::from_secs(600);

const REMINDER_TEXT: &str =
    "⏰ Only 5 minutes left to answer the quiz and claim your points! Jump in now! 🎯";

/// Owns the reminder/deletion timers of every watched campaign.
pub struct LifecycleManager {
    transport: Arc<dyn Transport>,
    db: Arc<CampaignDb>,
    timers: Arc<Mutex<HashMap<String, Vec<JoinHandle<()>>>>>,
    reminder_delay: Duration,
    delete_delay: Duration,
}

impl LifecycleManager {
    pub fn new(transport: Arc<dyn Transport>, db: Arc<CampaignDb>) -> Self {
        Self::with_delays(transport, db, REMINDER_DELAY, DELETE_DELAY)
    }

    pub fn with_delays(
        transport: Arc<dyn Transport>,
        db: Arc<CampaignDb>,
        reminder_delay: Duration,
        delete_delay: Duration,
    ) -> Self {
        Self {
            transport,
            db,
            timers: Arc::new(Mutex::new(HashMap::new())),
            reminder_delay,
            delete_delay,
        }
    }

    /// Arm the reminder and deletion timers for a just-sent campaign.
    pub async fn watch(
        &self,
        campaign_id: &str,
        destination: &str,
        message_id: i64,
        tracker: Arc<SessionTracker>,
    ) {
        let reminder = self.spawn_reminder(campaign_id, destination);
        let deletion = self.spawn_deletion(campaign_id, destination, message_id, tracker);

        self.timers
            .lock()
            .await
            .insert(campaign_id.to_string(), vec![reminder, deletion]);
        tracing::debug!("Lifecycle timers armed for campaign {campaign_id}");
    }

    fn spawn_reminder(&self, campaign_id: &str, destination: &str) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let campaign_id = campaign_id.to_string();
        let destination = destination.to_string();
        let delay = self.reminder_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match transport.send_text(&destination, REMINDER_TEXT, None).await {
                Ok(reminder_id) => {
                    tracing::info!("Reminder sent for campaign {campaign_id}");
                    // The reminder itself is cleaned up after another window.
                    tokio::time::sleep(delay).await;
                    if let Err(e) = transport.delete_message(&destination, reminder_id).await {
                        tracing::error!(
                            "Failed to delete reminder {reminder_id} in {destination}: {e}"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to send reminder for campaign {campaign_id}: {e}");
                }
            }
        })
    }

    fn spawn_deletion(
        &self,
        campaign_id: &str,
        destination: &str,
        message_id: i64,
        tracker: Arc<SessionTracker>,
    ) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let db = Arc::clone(&self.db);
        let timers = Arc::clone(&self.timers);
        let campaign_id = campaign_id.to_string();
        let destination = destination.to_string();
        let delay = self.delete_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Err(e) = transport.delete_message(&destination, message_id).await {
                tracing::error!("Failed to delete campaign message {message_id}: {e}");
            } else {
                tracing::info!("Campaign message {message_id} deleted from {destination}");
            }
            tracker.expire(&campaign_id).await;

            // Last campaign of the civil day for this destination triggers
            // the day summary.
            let now = Utc::now();
            let (day_start, day_end) = tz::day_bounds(now);
            match db.pending_count_in_window(&destination, now, day_end) {
                Ok(0) => {
                    send_day_summary(&*transport, &db, &destination, day_start, day_end).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Pending-today check failed for {destination}: {e}");
                }
            }

            timers.lock().await.remove(&campaign_id);
        })
    }

    /// Fan a week-scoped summary out to every destination with recorded
    /// outcome activity. Returns (sent, failed) counts; per-destination
    /// failures are logged and skipped like every other lifecycle action.
    pub async fn broadcast_week_summary(&self) -> quizcast_core::error::Result<(usize, usize)> {
        let destinations = self.db.destinations_with_outcomes()?;
        tracing::info!(
            "Broadcasting weekly summary to {} destinations",
            destinations.len()
        );

        let (_, day_end) = tz::day_bounds(Utc::now());
        let week_start = day_end - chrono::Duration::days(7);
        let mut sent = 0;
        let mut failed = 0;

        for destination in destinations {
            let rows = match self.db.day_summary(&destination, week_start, day_end, 10) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!("Failed to build weekly summary for {destination}: {e}");
                    failed += 1;
                    continue;
                }
            };
            let text = format_summary("🏆 Weekly Leaderboard 🏆", &rows);
            match self.transport.send_text(&destination, &text, None).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    tracing::error!("Failed to send weekly summary to {destination}: {e}");
                    failed += 1;
                }
            }
            // Gentle pacing; this is a low-priority broadcast.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        tracing::info!("Weekly summary broadcast completed: {sent} sent, {failed} failed");
        Ok((sent, failed))
    }

    /// Abort every armed timer. Called on shutdown.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        let count = timers.len();
        for (_, handles) in timers.drain() {
            for handle in handles {
                handle.abort();
            }
        }
        tracing::info!("Aborted lifecycle timers for {count} campaigns");
    }

    pub async fn watched_count(&self) -> usize {
        self.timers.lock().await.len()
    }
}

async fn send_day_summary(
    transport: &dyn Transport,
    db: &CampaignDb,
    destination: &str,
    day_start: chrono::DateTime<Utc>,
    day_end: chrono::DateTime<Utc>,
) {
    let rows = match db.day_summary(destination, day_start, day_end, 10) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("Failed to build day summary for {destination}: {e}");
            return;
        }
    };

    let text = format_summary("🏆 Daily Leaderboard 🏆", &rows);
    match transport.send_text(destination, &text, None).await {
        Ok(_) => tracing::info!("Day summary sent to {destination}"),
        Err(e) => tracing::error!("Failed to send day summary to {destination}: {e}"),
    }
}

fn format_summary(heading: &str, rows: &[SummaryRow]) -> String {
    let mut text = format!("{heading}\n\n");

    if rows.is_empty() {
        text.push_str(
            "No participants yet for today.\nGet started with our quizzes to claim your spot!",
        );
        return text;
    }

    text.push_str(&format!("Top {} Quiz Masters:\n\n", rows.len()));
    for (index, row) in rows.iter().enumerate() {
        let rank = index + 1;
        let name = row.name.as_deref().unwrap_or("Unknown");
        text.push_str(&format!(
            "{} {rank}. {name} - {} points\n",
            position_emoji(rank),
            row.points
        ));
    }
    text.push_str("\nKeep answering quizzes to climb the ranks! 🚀");
    text
}

fn position_emoji(rank: usize) -> &'static str {
    match rank {
        1 => "🥇",
        2 => "🥈",
        3 => "🥉",
        _ => "🔸",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockCall, MockTransport, scratch_db};
    use quizcast_core::types::{CampaignKind, OutcomeRecord};
    use crate::sessions::ActiveCampaign;

    fn fast_manager(
        transport: Arc<MockTransport>,
        db: Arc<CampaignDb>,
    ) -> LifecycleManager {
        LifecycleManager::with_delays(
            transport,
            db,
            Duration::from_millis(20),
            Duration::from_millis(60),
        )
    }

    async fn registered_tracker(db: &Arc<CampaignDb>) -> Arc<SessionTracker> {
        let tracker = Arc::new(SessionTracker::new(Arc::clone(db), 20));
        tracker
            .register(ActiveCampaign::new(
                "camp-1",
                "chat-1",
                CampaignKind::Quiz,
                Some(0),
                Some(42),
            ))
            .await;
        tracker
    }

    #[tokio::test]
    async fn test_reminder_sent_then_deleted() {
        let (db, dir) = scratch_db("lifecycle-reminder");
        let transport = Arc::new(MockTransport::new());
        let manager = fast_manager(Arc::clone(&transport), Arc::clone(&db));
        let tracker = registered_tracker(&db).await;

        manager.watch("camp-1", "chat-1", 42, tracker).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let texts = transport.texts_to("chat-1");
        assert!(texts.iter().any(|t| t.contains("5 minutes left")));
        // Campaign message + reminder message both deleted.
        assert_eq!(transport.delete_count(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_deletion_expires_tracker_and_sends_summary() {
        let (db, dir) = scratch_db("lifecycle-delete");
        db.insert_outcome(&OutcomeRecord {
            user_id: 7,
            username: None,
            first_name: Some("Ada".into()),
            last_name: None,
            destination: "chat-1".into(),
            campaign_id: "camp-1".into(),
            option_index: 0,
            points: 20,
            created_at: Utc::now(),
        })
        .unwrap();

        let transport = Arc::new(MockTransport::new());
        let manager = fast_manager(Arc::clone(&transport), Arc::clone(&db));
        let tracker = registered_tracker(&db).await;

        manager.watch("camp-1", "chat-1", 42, Arc::clone(&tracker)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!tracker.contains("camp-1").await);
        assert!(transport.calls().contains(&MockCall::Delete {
            destination: "chat-1".into(),
            message_id: 42,
        }));
        // No further pending jobs today -> day summary went out.
        let texts = transport.texts_to("chat-1");
        assert!(texts.iter().any(|t| t.contains("Daily Leaderboard")));
        assert!(texts.iter().any(|t| t.contains("Ada - 20 points")));
        assert_eq!(manager.watched_count().await, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_no_summary_while_jobs_remain_today() {
        let (db, dir) = scratch_db("lifecycle-pending");
        // A pending job later today suppresses the summary.
        db.insert_job(&quizcast_core::types::ScheduledJob {
            id: "j1".into(),
            destination: "chat-1".into(),
            question: "q".into(),
            options: vec!["a".into(), "b".into()],
            correct_option_index: Some(0),
            fire_at: Utc::now() + chrono::Duration::seconds(30),
            status: quizcast_core::types::JobStatus::Pending,
            created_at: Utc::now(),
        })
        .unwrap();

        let transport = Arc::new(MockTransport::new());
        let manager = fast_manager(Arc::clone(&transport), Arc::clone(&db));
        let tracker = registered_tracker(&db).await;

        manager.watch("camp-1", "chat-1", 42, tracker).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let texts = transport.texts_to("chat-1");
        assert!(!texts.iter().any(|t| t.contains("Daily Leaderboard")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_transport_failures_are_swallowed() {
        let (db, dir) = scratch_db("lifecycle-failure");
        let transport = Arc::new(MockTransport::failing(&["chat-1"]));
        let manager = fast_manager(Arc::clone(&transport), Arc::clone(&db));
        let tracker = registered_tracker(&db).await;

        manager.watch("camp-1", "chat-1", 42, Arc::clone(&tracker)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Best-effort: nothing sent, nothing panicked, tracker still cleaned.
        assert_eq!(transport.call_count(), 0);
        assert!(!tracker.contains("camp-1").await);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_shutdown_aborts_timers() {
        let (db, dir) = scratch_db("lifecycle-shutdown");
        let transport = Arc::new(MockTransport::new());
        let manager = LifecycleManager::with_delays(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&db),
            Duration::from_secs(60),
            Duration::from_secs(120),
        );
        let tracker = registered_tracker(&db).await;

        manager.watch("camp-1", "chat-1", 42, tracker).await;
        assert_eq!(manager.watched_count().await, 1);

        manager.shutdown().await;
        assert_eq!(manager.watched_count().await, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.call_count(), 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_summary_formatting() {
        let rows = vec![
            SummaryRow {
                user_id: 1,
                name: Some("Ada".into()),
                points: 60,
            },
            SummaryRow {
                user_id: 2,
                name: None,
                points: 20,
            },
        ];
        let text = format_summary("🏆 Daily Leaderboard 🏆", &rows);
        assert!(text.contains("🥇 1. Ada - 60 points"));
        assert!(text.contains("🥈 2. Unknown - 20 points"));

        let empty = format_summary("🏆 Daily Leaderboard 🏆", &[]);
        assert!(empty.contains("No participants yet"));
    }

    #[tokio::test]
    async fn test_week_summary_broadcast_fans_out() {
        let (db, dir) = scratch_db("lifecycle-week");
        for destination in ["chat-1", "chat-2"] {
            db.insert_outcome(&OutcomeRecord {
                user_id: 7,
                username: None,
                first_name: Some("Ada".into()),
                last_name: None,
                destination: destination.into(),
                campaign_id: "camp-1".into(),
                option_index: 0,
                points: 20,
                created_at: Utc::now(),
            })
            .unwrap();
        }

        let transport = Arc::new(MockTransport::new());
        let manager = fast_manager(Arc::clone(&transport), Arc::clone(&db));
        let (sent, failed) = manager.broadcast_week_summary().await.unwrap();
        assert_eq!((sent, failed), (2, 0));
        assert!(
            transport
                .texts_to("chat-2")
                .iter()
                .any(|t| t.contains("Weekly Leaderboard"))
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_week_summary_counts_failures() {
        let (db, dir) = scratch_db("lifecycle-week-fail");
        for destination in ["chat-1", "chat-2"] {
            db.insert_outcome(&OutcomeRecord {
                user_id: 7,
                username: None,
                first_name: None,
                last_name: None,
                destination: destination.into(),
                campaign_id: "camp-1".into(),
                option_index: 0,
                points: 20,
                created_at: Utc::now(),
            })
            .unwrap();
        }

        let transport = Arc::new(MockTransport::failing(&["chat-1"]));
        let manager = fast_manager(Arc::clone(&transport), Arc::clone(&db));
        let (sent, failed) = manager.broadcast_week_summary().await.unwrap();
        assert_eq!((sent, failed), (1, 1));
        std::fs::remove_dir_all(&dir).ok();
    }
}
