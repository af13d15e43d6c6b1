//! # Quizcast Core
//!
//! Shared foundation for the Quizcast campaign engine: configuration,
//! the error taxonomy, campaign/job data types, and the `Transport`
//! trait that abstracts the remote messaging API.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::QuizcastConfig;
pub use error::{QuizcastError, Result};
pub use traits::Transport;
pub use types::{
    AnswerOutcome, Answerer, CampaignDef, CampaignKind, DispatchReport, FailedChat, FailureKind,
    JobStatus, MessageButton, OutcomeRecord, ScheduledJob, SendResult, SentCampaign,
};
