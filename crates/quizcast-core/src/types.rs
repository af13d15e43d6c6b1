//! Campaign, job, and dispatch data types shared across crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of interactive campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignKind {
    /// Scored: one correct option, first correct answer per user earns points.
    Quiz,
    /// Unscored: every first vote per user is recorded.
    Poll,
}

impl std::fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignKind::Quiz => write!(f, "quiz"),
            CampaignKind::Poll => write!(f, "poll"),
        }
    }
}

/// Definition of one campaign to send: question, ordered options, and the
/// correct option index for quizzes (None makes it a plain poll).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignDef {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option_index: Option<u32>,
}

impl CampaignDef {
    pub fn kind(&self) -> CampaignKind {
        if self.correct_option_index.is_some() {
            CampaignKind::Quiz
        } else {
            CampaignKind::Poll
        }
    }
}

/// Ids the transport assigns when an interactive message is sent.
/// `campaign_id` keys answer tracking; `message_id` is needed for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentCampaign {
    pub campaign_id: String,
    pub message_id: i64,
}

/// Optional inline button attached to a plain message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageButton {
    pub text: String,
    pub url: String,
    /// Web-app buttons only work in direct chats; group destinations fall
    /// back to a plain URL button.
    #[serde(default)]
    pub web_app: bool,
}

/// Status of a durable scheduled job. Exactly one transition path:
/// pending -> {sent, failed, cancelled}; terminal statuses are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "sent" => Some(JobStatus::Sent),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != JobStatus::Pending
    }
}

/// A durable campaign job: one campaign scheduled for one destination at
/// one fire time. Rows are never physically deleted (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub destination: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_option_index: Option<u32>,
    pub fire_at: DateTime<Utc>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn kind(&self) -> CampaignKind {
        if self.correct_option_index.is_some() {
            CampaignKind::Quiz
        } else {
            CampaignKind::Poll
        }
    }
}

/// Identity of a responding user, as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answerer {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Answerer {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name, &self.username) {
            (Some(first), Some(last), _) => format!("{first} {last}"),
            (Some(first), None, _) => first.clone(),
            (None, _, Some(name)) => format!("@{name}"),
            _ => "Unknown User".into(),
        }
    }
}

/// Result of routing one answer event through a session tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    /// False when no active campaign matched the id — the answer may belong
    /// to a campaign owned by another tracker, so callers try the next one.
    pub matched: bool,
    pub correct: bool,
    pub already_answered: bool,
}

impl AnswerOutcome {
    pub fn unmatched() -> Self {
        Self {
            matched: false,
            correct: false,
            already_answered: false,
        }
    }
}

/// Durable record of a user's scored/voted response to a campaign.
/// At most one per (user_id, campaign_id), enforced by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub destination: String,
    pub campaign_id: String,
    pub option_index: u32,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

/// Per-destination outcome of one send within a bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub destination: String,
    pub success: bool,
    pub error: Option<String>,
}

/// A destination that could not be reached, with a short reason.
#[derive(Debug, Clone, Serialize)]
pub struct FailedChat {
    pub destination: String,
    pub reason: String,
}

/// Aggregate of a bulk operation. Bulk sends always return this instead of
/// throwing on partial failure; only whole-input validation rejects.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub total_sent: usize,
    pub total_failed: usize,
    pub results: Vec<SendResult>,
    pub failed_chats: Vec<FailedChat>,
    pub duration_ms: u64,
}

/// Category of a per-destination transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 403 — destination unreachable; exclude it from future sends.
    Blocked,
    /// 400 — malformed destination or request.
    Malformed,
    /// 429 — remote rate limit hit despite batching.
    RateLimited,
    Unknown,
}

impl FailureKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            403 => FailureKind::Blocked,
            400 => FailureKind::Malformed,
            429 => FailureKind::RateLimited,
            _ => FailureKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_kind_from_def() {
        let quiz = CampaignDef {
            question: "q".into(),
            options: vec!["a".into(), "b".into()],
            correct_option_index: Some(1),
        };
        assert_eq!(quiz.kind(), CampaignKind::Quiz);

        let poll = CampaignDef {
            correct_option_index: None,
            ..quiz
        };
        assert_eq!(poll.kind(), CampaignKind::Poll);
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Sent,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Sent.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let full = Answerer {
            user_id: 1,
            username: Some("ada".into()),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
        };
        assert_eq!(full.display_name(), "Ada Lovelace");

        let username_only = Answerer {
            user_id: 2,
            username: Some("ada".into()),
            first_name: None,
            last_name: None,
        };
        assert_eq!(username_only.display_name(), "@ada");

        let anonymous = Answerer {
            user_id: 3,
            username: None,
            first_name: None,
            last_name: None,
        };
        assert_eq!(anonymous.display_name(), "Unknown User");
    }

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(FailureKind::from_code(403), FailureKind::Blocked);
        assert_eq!(FailureKind::from_code(400), FailureKind::Malformed);
        assert_eq!(FailureKind::from_code(429), FailureKind::RateLimited);
        assert_eq!(FailureKind::from_code(500), FailureKind::Unknown);
    }
}
