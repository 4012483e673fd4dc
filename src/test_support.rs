//! Fakes shared by the in-crate tests.

use crate::engine::ConversationEngine;
use crate::error::AppError;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Engine that answers from a script and records everything asked of it.
#[derive(Default)]
pub struct MockEngine {
    replies: Mutex<VecDeque<Result<String, AppError>>>,
    inputs: Mutex<Vec<String>>,
    spoken: Mutex<Vec<String>>,
    closes: AtomicUsize,
    /// How long the model takes over each reply
    reply_delay: Duration,
}

impl MockEngine {
    pub fn with_replies(replies: Vec<Result<&str, AppError>>) -> Self {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn slow(reply_delay: Duration) -> Self {
        Self {
            reply_delay,
            ..Default::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationEngine for MockEngine {
    async fn generate_reply(&self, user_input: &str) -> Result<String, AppError> {
        self.inputs.lock().unwrap().push(user_input.to_string());
        if !self.reply_delay.is_zero() {
            tokio::time::sleep(self.reply_delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AppError("no scripted reply")))
    }

    async fn say(&self, text: &str) -> Result<(), AppError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), AppError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
