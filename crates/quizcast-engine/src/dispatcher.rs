//! Bulk dispatch — fans one logical send out to many destinations under
//! the batcher's rate limits, collecting per-destination failures.
//!
//! Validation runs before any dispatch: a malformed request is rejected
//! whole, with zero network effect. After that point nothing throws —
//! the report lists every failure with a classified reason.

use std::sync::Arc;
use std::time::Instant;

use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::traits::Transport;
use quizcast_core::types::{
    CampaignDef, CampaignKind, DispatchReport, FailedChat, FailureKind, MessageButton, SendResult,
};

use crate::batcher::{self, BatchPolicy};
use crate::sessions::{ActiveCampaign, SessionTracker};
use crate::validate;

/// Hard cap on destinations per bulk call.
pub const MAX_BULK_DESTINATIONS: usize = 50;

/// Sends messages/images/polls to many destinations at once.
pub struct BulkDispatcher {
    transport: Arc<dyn Transport>,
    quiz_sessions: Arc<SessionTracker>,
    poll_sessions: Arc<SessionTracker>,
    message_policy: BatchPolicy,
    image_policy: BatchPolicy,
}

impl BulkDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        quiz_sessions: Arc<SessionTracker>,
        poll_sessions: Arc<SessionTracker>,
    ) -> Self {
        Self::with_policies(
            transport,
            quiz_sessions,
            poll_sessions,
            BatchPolicy::MESSAGES,
            BatchPolicy::IMAGES,
        )
    }

    pub fn with_policies(
        transport: Arc<dyn Transport>,
        quiz_sessions: Arc<SessionTracker>,
        poll_sessions: Arc<SessionTracker>,
        message_policy: BatchPolicy,
        image_policy: BatchPolicy,
    ) -> Self {
        Self {
            transport,
            quiz_sessions,
            poll_sessions,
            message_policy,
            image_policy,
        }
    }

    /// Send one formatted message (optional inline button) to every
    /// destination.
    pub async fn send_bulk_message(
        &self,
        destinations: &[String],
        text: &str,
        button: Option<&MessageButton>,
    ) -> Result<DispatchReport> {
        validate::bulk_limits(destinations.len(), MAX_BULK_DESTINATIONS, "chat ids")?;
        for destination in destinations {
            validate::destination(destination)?;
        }

        tracing::info!(
            "Starting bulk message send to {} destinations",
            destinations.len()
        );
        let started = Instant::now();
        let results = batcher::run_batched(destinations, self.message_policy, |destination| {
            let transport = Arc::clone(&self.transport);
            let text = text.to_string();
            let button = button.cloned();
            async move {
                transport
                    .send_text(&destination, &text, button.as_ref())
                    .await
                    .map(|_| ())
            }
        })
        .await;

        Ok(build_report(results, started))
    }

    /// Send one image to every destination. Smaller batches — heavier
    /// payloads.
    pub async fn send_bulk_image(
        &self,
        destinations: &[String],
        bytes: &[u8],
        caption: Option<&str>,
    ) -> Result<DispatchReport> {
        validate::bulk_limits(destinations.len(), MAX_BULK_DESTINATIONS, "chat ids")?;
        for destination in destinations {
            validate::destination(destination)?;
        }

        tracing::info!(
            "Starting bulk image send to {} destinations",
            destinations.len()
        );
        let started = Instant::now();
        let bytes = Arc::new(bytes.to_vec());
        let results = batcher::run_batched(destinations, self.image_policy, |destination| {
            let transport = Arc::clone(&self.transport);
            let bytes = Arc::clone(&bytes);
            let caption = caption.map(|c| c.to_string());
            async move {
                transport
                    .send_image(&destination, &bytes, caption.as_deref())
                    .await
                    .map(|_| ())
            }
        })
        .await;

        Ok(build_report(results, started))
    }

    /// Send one quiz/poll to every destination and register each sent
    /// campaign with the matching session tracker.
    pub async fn send_bulk_poll(
        &self,
        destinations: &[String],
        def: &CampaignDef,
    ) -> Result<DispatchReport> {
        validate::bulk_limits(destinations.len(), MAX_BULK_DESTINATIONS, "chat ids")?;
        for destination in destinations {
            validate::destination(destination)?;
        }
        validate::campaign_def(def)?;

        let kind = def.kind();
        tracing::info!(
            "Starting bulk {kind} send to {} destinations",
            destinations.len()
        );
        let started = Instant::now();
        let results = batcher::run_batched(destinations, self.message_policy, |destination| {
            let transport = Arc::clone(&self.transport);
            let tracker = match kind {
                CampaignKind::Quiz => Arc::clone(&self.quiz_sessions),
                CampaignKind::Poll => Arc::clone(&self.poll_sessions),
            };
            let def = def.clone();
            async move {
                let sent = transport
                    .send_interactive(
                        &destination,
                        &def.question,
                        &def.options,
                        def.correct_option_index,
                    )
                    .await?;
                tracker
                    .register(ActiveCampaign::new(
                        sent.campaign_id,
                        destination,
                        kind,
                        def.correct_option_index,
                        Some(sent.message_id),
                    ))
                    .await;
                Ok(())
            }
        })
        .await;

        Ok(build_report(results, started))
    }
}

/// Reduce per-destination outcomes into a DispatchReport. Failure reasons
/// come from the error's short form, with the 403/400/429 classification
/// logged per destination.
fn build_report(results: Vec<(String, Result<()>)>, started: Instant) -> DispatchReport {
    let mut report_results = Vec::with_capacity(results.len());
    let mut failed_chats = Vec::new();

    for (destination, outcome) in results {
        match outcome {
            Ok(()) => report_results.push(SendResult {
                destination,
                success: true,
                error: None,
            }),
            Err(e) => {
                let reason = e.short_reason();
                if let QuizcastError::Transport { code, .. } = &e {
                    let kind = FailureKind::from_code(*code);
                    tracing::error!("Send to {destination} failed ({kind:?}): {reason}");
                } else {
                    tracing::error!("Send to {destination} failed: {reason}");
                }
                failed_chats.push(FailedChat {
                    destination: destination.clone(),
                    reason: reason.clone(),
                });
                report_results.push(SendResult {
                    destination,
                    success: false,
                    error: Some(reason),
                });
            }
        }
    }

    let total_sent = report_results.iter().filter(|r| r.success).count();
    let total_failed = report_results.len() - total_sent;
    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!("Bulk send completed: {total_sent} sent, {total_failed} failed in {duration_ms}ms");

    DispatchReport {
        total_sent,
        total_failed,
        results: report_results,
        failed_chats,
        duration_ms,
    }
}
