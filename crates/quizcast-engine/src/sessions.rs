//! In-memory registry of open campaigns awaiting answers.
//!
//! One tracker instance holds quizzes, another holds plain polls; an
//! unmatched answer returns `matched = false` so the caller can try the
//! next tracker. Per-campaign answer processing is serialized by the
//! registry lock: membership check, insertion, and the correctness
//! decision happen inside one critical section, so two concurrent
//! first-time answers from the same user cannot both score.
//!
//! This state is process-local and lost on crash by design — a campaign
//! still open at crash time may accept re-answers after restart (the
//! durable outcome rows are not consulted for dedup).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use quizcast_core::types::{AnswerOutcome, Answerer, CampaignKind, OutcomeRecord};

use crate::persistence::CampaignDb;

/// Default lifetime of an open campaign in the tracker.
const CAMPAIGN_TTL: Duration = Duration::from_secs(3600);

/// One open campaign: ids, the correct option, and who already answered.
#[derive(Debug, Clone)]
pub struct ActiveCampaign {
    pub campaign_id: String,
    pub destination: String,
    pub kind: CampaignKind,
    pub correct_option_index: Option<u32>,
    pub sent_message_id: Option<i64>,
    answered_users: HashSet<i64>,
}

impl ActiveCampaign {
    pub fn new(
        campaign_id: impl Into<String>,
        destination: impl Into<String>,
        kind: CampaignKind,
        correct_option_index: Option<u32>,
        sent_message_id: Option<i64>,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            destination: destination.into(),
            kind,
            correct_option_index,
            sent_message_id,
            answered_users: HashSet::new(),
        }
    }

    pub fn answered_count(&self) -> usize {
        self.answered_users.len()
    }
}

/// Registry of active campaigns with auto-expiry and answer dedup.
pub struct SessionTracker {
    campaigns: Arc<Mutex<HashMap<String, ActiveCampaign>>>,
    db: Arc<CampaignDb>,
    quiz_points: i64,
    ttl: Duration,
}

impl SessionTracker {
    pub fn new(db: Arc<CampaignDb>, quiz_points: i64) -> Self {
        Self::with_ttl(db, quiz_points, CAMPAIGN_TTL)
    }

    pub fn with_ttl(db: Arc<CampaignDb>, quiz_points: i64, ttl: Duration) -> Self {
        Self {
            campaigns: Arc::new(Mutex::new(HashMap::new())),
            db,
            quiz_points,
            ttl,
        }
    }

    /// Add an open campaign and schedule its removal after the TTL,
    /// regardless of lifecycle outcome.
    pub async fn register(&self, campaign: ActiveCampaign) {
        let id = campaign.campaign_id.clone();
        {
            let mut campaigns = self.campaigns.lock().await;
            if campaigns.insert(id.clone(), campaign).is_some() {
                tracing::warn!("Replaced already-active campaign {id}");
            }
        }
        tracing::info!("Registered active campaign {id}");

        let campaigns = Arc::clone(&self.campaigns);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if campaigns.lock().await.remove(&id).is_some() {
                tracing::debug!("Active campaign {id} expired after TTL");
            }
        });
    }

    /// Route one answer event. Unknown campaign → `matched = false` (the
    /// answer may belong to a campaign owned by another tracker). Repeat
    /// answers are idempotent: no second outcome row is ever written.
    pub async fn record_answer(
        &self,
        campaign_id: &str,
        answerer: &Answerer,
        option_index: u32,
    ) -> AnswerOutcome {
        let (correct, outcome_record) = {
            let mut campaigns = self.campaigns.lock().await;
            let Some(campaign) = campaigns.get_mut(campaign_id) else {
                return AnswerOutcome::unmatched();
            };

            if campaign.answered_users.contains(&answerer.user_id) {
                tracing::info!(
                    "User {} already answered campaign {campaign_id}",
                    answerer.user_id
                );
                return AnswerOutcome {
                    matched: true,
                    correct: false,
                    already_answered: true,
                };
            }
            campaign.answered_users.insert(answerer.user_id);

            let correct = match campaign.kind {
                CampaignKind::Quiz => campaign.correct_option_index == Some(option_index),
                // Every first vote on a plain poll counts.
                CampaignKind::Poll => true,
            };

            let record = correct.then(|| OutcomeRecord {
                user_id: answerer.user_id,
                username: answerer.username.clone(),
                first_name: answerer.first_name.clone(),
                last_name: answerer.last_name.clone(),
                destination: campaign.destination.clone(),
                campaign_id: campaign.campaign_id.clone(),
                option_index,
                points: match campaign.kind {
                    CampaignKind::Quiz => self.quiz_points,
                    CampaignKind::Poll => 0,
                },
                created_at: Utc::now(),
            });
            (correct, record)
        };

        if let Some(outcome_record) = outcome_record {
            tracing::info!(
                "User {} ({}) answered campaign {campaign_id}: recording {} points",
                answerer.user_id,
                answerer.display_name(),
                outcome_record.points
            );
            // The answered-set already guarantees at-most-once; a store
            // failure here loses the row but must not fail the answer path.
            if let Err(e) = self.db.insert_outcome(&outcome_record) {
                tracing::error!(
                    "Failed to persist outcome for user {} on campaign {campaign_id}: {e}",
                    answerer.user_id
                );
            }
        } else {
            tracing::info!(
                "User {} answered campaign {campaign_id} incorrectly",
                answerer.user_id
            );
        }

        AnswerOutcome {
            matched: true,
            correct,
            already_answered: false,
        }
    }

    /// Remove a campaign; later answers for its id no longer match.
    pub async fn expire(&self, campaign_id: &str) -> Option<ActiveCampaign> {
        let removed = self.campaigns.lock().await.remove(campaign_id);
        if removed.is_some() {
            tracing::debug!("Cleared active campaign {campaign_id}");
        }
        removed
    }

    pub async fn contains(&self, campaign_id: &str) -> bool {
        self.campaigns.lock().await.contains_key(campaign_id)
    }

    pub async fn active_count(&self) -> usize {
        self.campaigns.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_db(name: &str) -> (Arc<CampaignDb>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("quizcast-sessions-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let db = Arc::new(CampaignDb::open(&dir.join("test.db")).unwrap());
        (db, dir)
    }

    fn answerer(user_id: i64) -> Answerer {
        Answerer {
            user_id,
            username: Some(format!("user{user_id}")),
            first_name: Some("Test".into()),
            last_name: None,
        }
    }

    fn quiz(campaign_id: &str) -> ActiveCampaign {
        ActiveCampaign::new(campaign_id, "chat-1", CampaignKind::Quiz, Some(2), Some(99))
    }

    #[tokio::test]
    async fn test_correct_answer_records_once() {
        let (db, dir) = scratch_db("correct");
        let tracker = SessionTracker::new(Arc::clone(&db), 20);
        tracker.register(quiz("p1")).await;

        let outcome = tracker.record_answer("p1", &answerer(7), 2).await;
        assert!(outcome.matched && outcome.correct && !outcome.already_answered);

        let rows = db.outcomes_for_campaign("p1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].points, 20);
        assert_eq!(rows[0].user_id, 7);

        // Second delivery of the same answer event: idempotent.
        let repeat = tracker.record_answer("p1", &answerer(7), 2).await;
        assert!(repeat.matched && repeat.already_answered);
        assert_eq!(db.outcomes_for_campaign("p1").unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_wrong_answer_writes_nothing_and_latches() {
        let (db, dir) = scratch_db("wrong");
        let tracker = SessionTracker::new(Arc::clone(&db), 20);
        tracker.register(quiz("p1")).await;

        let outcome = tracker.record_answer("p1", &answerer(7), 0).await;
        assert!(outcome.matched && !outcome.correct);
        assert!(db.outcomes_for_campaign("p1").unwrap().is_empty());

        // The user is marked as answered; no second-try scoring.
        let retry = tracker.record_answer("p1", &answerer(7), 2).await;
        assert!(retry.already_answered);
        assert!(db.outcomes_for_campaign("p1").unwrap().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_poll_vote_always_counts() {
        let (db, dir) = scratch_db("poll");
        let tracker = SessionTracker::new(Arc::clone(&db), 20);
        tracker
            .register(ActiveCampaign::new(
                "v1",
                "chat-1",
                CampaignKind::Poll,
                None,
                None,
            ))
            .await;

        let outcome = tracker.record_answer("v1", &answerer(3), 1).await;
        assert!(outcome.matched && outcome.correct);

        let rows = db.outcomes_for_campaign("v1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].points, 0);
        assert_eq!(rows[0].option_index, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_unknown_campaign_does_not_match() {
        let (db, dir) = scratch_db("unknown");
        let tracker = SessionTracker::new(db, 20);
        let outcome = tracker.record_answer("nope", &answerer(1), 0).await;
        assert!(!outcome.matched);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_expire_removes_campaign() {
        let (db, dir) = scratch_db("expire");
        let tracker = SessionTracker::new(db, 20);
        tracker.register(quiz("p1")).await;
        assert!(tracker.contains("p1").await);

        let removed = tracker.expire("p1").await.unwrap();
        assert_eq!(removed.sent_message_id, Some(99));
        assert!(!tracker.contains("p1").await);
        assert!(!tracker.record_answer("p1", &answerer(1), 2).await.matched);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_ttl_auto_expiry() {
        let (db, dir) = scratch_db("ttl");
        let tracker = SessionTracker::with_ttl(db, 20, Duration::from_millis(30));
        tracker.register(quiz("p1")).await;
        assert_eq!(tracker.active_count().await, 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(tracker.active_count().await, 0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
