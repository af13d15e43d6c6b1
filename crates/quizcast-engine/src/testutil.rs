//! Shared test doubles for engine tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use quizcast_core::error::{QuizcastError, Result};
use quizcast_core::traits::Transport;
use quizcast_core::types::{MessageButton, SentCampaign};

/// What a mock transport was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Interactive {
        destination: String,
        question: String,
        correct_index: Option<u32>,
    },
    Text {
        destination: String,
        text: String,
    },
    Image {
        destination: String,
    },
    Delete {
        destination: String,
        message_id: i64,
    },
}

/// Transport double that records calls and can fail chosen destinations
/// with a 403.
#[derive(Default)]
pub struct MockTransport {
    pub calls: Mutex<Vec<MockCall>>,
    pub fail_destinations: HashSet<String>,
    next_id: AtomicI64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(destinations: &[&str]) -> Self {
        Self {
            fail_destinations: destinations.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn interactive_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::Interactive { .. }))
            .count()
    }

    pub fn texts_to(&self, destination: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                MockCall::Text {
                    destination: d,
                    text,
                } if d == destination => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn delete_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::Delete { .. }))
            .count()
    }

    fn check(&self, destination: &str) -> Result<()> {
        if self.fail_destinations.contains(destination) {
            return Err(QuizcastError::Transport {
                code: 403,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_interactive(
        &self,
        destination: &str,
        question: &str,
        _options: &[String],
        correct_index: Option<u32>,
    ) -> Result<SentCampaign> {
        self.check(destination)?;
        self.calls.lock().unwrap().push(MockCall::Interactive {
            destination: destination.into(),
            question: question.into(),
            correct_index,
        });
        let id = self.next_id();
        Ok(SentCampaign {
            campaign_id: format!("camp-{id}"),
            message_id: id,
        })
    }

    async fn send_text(
        &self,
        destination: &str,
        text: &str,
        _button: Option<&MessageButton>,
    ) -> Result<i64> {
        self.check(destination)?;
        self.calls.lock().unwrap().push(MockCall::Text {
            destination: destination.into(),
            text: text.into(),
        });
        Ok(self.next_id())
    }

    async fn send_image(
        &self,
        destination: &str,
        _bytes: &[u8],
        _caption: Option<&str>,
    ) -> Result<i64> {
        self.check(destination)?;
        self.calls.lock().unwrap().push(MockCall::Image {
            destination: destination.into(),
        });
        Ok(self.next_id())
    }

    async fn delete_message(&self, destination: &str, message_id: i64) -> Result<()> {
        self.check(destination)?;
        self.calls.lock().unwrap().push(MockCall::Delete {
            destination: destination.into(),
            message_id,
        });
        Ok(())
    }
}

/// Fresh scratch SQLite store under the system temp dir.
pub fn scratch_db(name: &str) -> (std::sync::Arc<crate::persistence::CampaignDb>, std::path::PathBuf)
{
    let dir = std::env::temp_dir().join(format!("quizcast-test-{name}"));
    std::fs::create_dir_all(&dir).ok();
    let db = std::sync::Arc::new(crate::persistence::CampaignDb::open(&dir.join("test.db")).unwrap());
    (db, dir)
}
