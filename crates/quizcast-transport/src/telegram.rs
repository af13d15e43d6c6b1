//! Telegram Bot API transport — message sending + poll-answer long polling.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use quizcast_core::config::TelegramConfig;
use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::traits::Transport;
use quizcast_core::types::{Answerer, MessageButton, SentCampaign};

/// Telegram Bot API client implementing the engine's `Transport` seam.
pub struct TelegramTransport {
    config: TelegramConfig,
    client: reqwest::Client,
    last_update_id: i64,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            last_update_id: 0,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.config.bot_token, method
        )
    }

    /// POST a JSON body and unwrap the Bot API response envelope.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("{method} failed: {e}")))?;

        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("invalid {method} response: {e}")))?;
        envelope.into_result(method)
    }

    /// Get bot info — used as a connectivity check at startup.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("getMe failed: {e}")))?;
        let envelope: ApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("invalid getMe response: {e}")))?;
        envelope.into_result("getMe")
    }

    /// Fetch `poll_answer` updates using long polling.
    pub async fn get_updates(&mut self) -> Result<Vec<TelegramUpdate>> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", (self.last_update_id + 1).to_string()),
                ("timeout", "30".into()),
                ("allowed_updates", "[\"poll_answer\"]".into()),
            ])
            .send()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("getUpdates failed: {e}")))?;

        let envelope: ApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("invalid getUpdates response: {e}")))?;

        let updates = envelope.into_result("getUpdates")?;
        if let Some(last) = updates.last() {
            self.last_update_id = last.update_id;
        }
        Ok(updates)
    }

    /// Start the polling loop — returns a stream of answer events.
    /// Consumes the client; sending transports should be constructed
    /// separately (the underlying HTTP client is cheap).
    pub fn start_polling(self) -> AnswerEventStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            let mut transport = self;
            tracing::info!("Telegram poll-answer polling loop started");

            loop {
                match transport.get_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            if let Some(event) = update.to_answer_event()
                                && tx.send(event).is_err()
                            {
                                tracing::info!("Telegram polling stopped (receiver dropped)");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                }

                tokio::time::sleep(tokio::time::Duration::from_secs(poll_interval)).await;
            }
        });

        AnswerEventStream { rx }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_interactive(
        &self,
        destination: &str,
        question: &str,
        options: &[String],
        correct_index: Option<u32>,
    ) -> Result<SentCampaign> {
        let mut body = serde_json::json!({
            "chat_id": destination,
            "question": question,
            "options": options,
            "is_anonymous": false,
        });
        match correct_index {
            Some(index) => {
                body["type"] = "quiz".into();
                body["correct_option_id"] = index.into();
            }
            None => {
                body["type"] = "regular".into();
            }
        }

        let message: TelegramMessage = self.call("sendPoll", body).await?;
        let poll = message.poll.ok_or_else(|| {
            QuizcastError::transport_io("sendPoll response carried no poll object")
        })?;
        Ok(SentCampaign {
            campaign_id: poll.id,
            message_id: message.message_id,
        })
    }

    async fn send_text(
        &self,
        destination: &str,
        text: &str,
        button: Option<&MessageButton>,
    ) -> Result<i64> {
        let mut body = serde_json::json!({
            "chat_id": destination,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(button) = button {
            body["reply_markup"] = build_reply_markup(button, destination);
        }

        let message: TelegramMessage = self.call("sendMessage", body).await?;
        Ok(message.message_id)
    }

    async fn send_image(
        &self,
        destination: &str,
        bytes: &[u8],
        caption: Option<&str>,
    ) -> Result<i64> {
        let photo = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name("image.jpg");
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", destination.to_string())
            .part("photo", photo);
        if let Some(caption) = caption {
            form = form
                .text("caption", caption.to_string())
                .text("parse_mode", "Markdown".to_string());
        }

        let response = self
            .client
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("sendPhoto failed: {e}")))?;

        let envelope: ApiResponse<TelegramMessage> = response
            .json()
            .await
            .map_err(|e| QuizcastError::transport_io(format!("invalid sendPhoto response: {e}")))?;
        Ok(envelope.into_result("sendPhoto")?.message_id)
    }

    async fn delete_message(&self, destination: &str, message_id: i64) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": destination,
            "message_id": message_id,
        });
        let _: bool = self.call("deleteMessage", body).await?;
        Ok(())
    }
}

/// A group/channel destination (negative numeric id). Web-app buttons are
/// rejected by the API in groups, so those fall back to URL buttons.
fn is_group_destination(destination: &str) -> bool {
    destination.starts_with('-')
}

fn build_reply_markup(button: &MessageButton, destination: &str) -> serde_json::Value {
    if button.web_app && !is_group_destination(destination) {
        serde_json::json!({
            "inline_keyboard": [[{ "text": button.text, "web_app": { "url": button.url } }]]
        })
    } else {
        if button.web_app {
            tracing::warn!(
                "Web-app button requested for group destination {destination}; sending URL button instead"
            );
        }
        serde_json::json!({
            "inline_keyboard": [[{ "text": button.text, "url": button.url }]]
        })
    }
}

/// Stream of incoming answer events from polling.
pub struct AnswerEventStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<AnswerEvent>,
}

impl Stream for AnswerEventStream {
    type Item = AnswerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Unpin for AnswerEventStream {}

/// One user's vote on one campaign, as delivered by the remote API.
#[derive(Debug, Clone)]
pub struct AnswerEvent {
    pub campaign_id: String,
    pub answerer: Answerer,
    pub option_index: u32,
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i64>,
    pub description: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the envelope, classifying failures by error code. A missing
    /// result on an `ok` response is still an error — ambiguous bodies are
    /// never treated as success.
    fn into_result(self, method: &str) -> Result<T> {
        if !self.ok {
            return Err(QuizcastError::Transport {
                code: self.error_code.unwrap_or(0),
                description: self
                    .description
                    .unwrap_or_else(|| format!("{method} returned ok=false")),
            });
        }
        self.result
            .ok_or_else(|| QuizcastError::transport_io(format!("{method} response had no result")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub poll_answer: Option<TelegramPollAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramPollAnswer {
    pub poll_id: String,
    pub user: TelegramUser,
    pub option_ids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub poll: Option<TelegramPoll>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramPoll {
    pub id: String,
}

impl TelegramUpdate {
    /// Convert to an engine answer event. Retracted votes (empty
    /// option_ids) and non-answer updates yield None.
    pub fn to_answer_event(&self) -> Option<AnswerEvent> {
        let answer = self.poll_answer.as_ref()?;
        let option_index = *answer.option_ids.first()?;

        Some(AnswerEvent {
            campaign_id: answer.poll_id.clone(),
            answerer: Answerer {
                user_id: answer.user.id,
                username: answer.user.username.clone(),
                first_name: Some(answer.user.first_name.clone()),
                last_name: answer.user.last_name.clone(),
            },
            option_index,
        })
    }
}
