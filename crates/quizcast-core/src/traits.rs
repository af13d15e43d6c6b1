//! The transport seam — everything the engine needs from the remote
//! messaging API, kept behind a trait so the engine and its tests never
//! depend on a live bot.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MessageButton, SentCampaign};

/// Capability to send/delete messages on the remote chat platform.
///
/// Implementations classify remote failures into
/// `QuizcastError::Transport { code, description }` — never assume success
/// on an ambiguous response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an interactive campaign (quiz when `correct_index` is set,
    /// plain poll otherwise). Returns the ids the remote side assigned.
    async fn send_interactive(
        &self,
        destination: &str,
        question: &str,
        options: &[String],
        correct_index: Option<u32>,
    ) -> Result<SentCampaign>;

    /// Send a plain text message with an optional inline button.
    /// Returns the message id.
    async fn send_text(
        &self,
        destination: &str,
        text: &str,
        button: Option<&MessageButton>,
    ) -> Result<i64>;

    /// Send an image with an optional caption. Returns the message id.
    async fn send_image(&self, destination: &str, bytes: &[u8], caption: Option<&str>)
    -> Result<i64>;

    /// Delete a previously sent message.
    async fn delete_message(&self, destination: &str, message_id: i64) -> Result<()>;
}
