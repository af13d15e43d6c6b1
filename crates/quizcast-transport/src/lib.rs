//! # Quizcast Transport
//!
//! Telegram Bot API implementation of the `Transport` trait: interactive
//! polls/quizzes, formatted messages with inline buttons, photo upload,
//! message deletion, and a long-polling loop that surfaces `poll_answer`
//! updates as a stream of answer events.

pub mod telegram;

pub use telegram::{AnswerEvent, AnswerEventStream, TelegramTransport};
