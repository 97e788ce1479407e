//! Scripted message handlers with per-message failure scripts.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::Mutex,
};

use anyhow::bail;
use conveyor_client::MessageHandler;
use conveyor_core::{Message, MessageId};

/// Handler that fails a message's first N attempts, then succeeds.
///
/// Attempts are counted per message identity, so redeliveries of one message
/// walk through its own script regardless of what other messages do. Every
/// invocation is recorded for verification.
pub struct ScriptedHandler {
    failures_before_success: u32,
    attempts: Mutex<HashMap<MessageId, u32>>,
    invocations: Mutex<Vec<Message>>,
}

impl ScriptedHandler {
    /// Handler that succeeds on every attempt.
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    /// Handler that fails each message's first `n` attempts.
    pub fn failing_first(n: u32) -> Self {
        Self {
            failures_before_success: n,
            attempts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Handler that never succeeds.
    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Number of times a message has been attempted.
    pub fn attempts_for(&self, id: &MessageId) -> u32 {
        self.attempts.lock().expect("attempts lock").get(id).copied().unwrap_or(0)
    }

    /// Every invocation, in dispatch order.
    pub fn invocations(&self) -> Vec<Message> {
        self.invocations.lock().expect("invocations lock").clone()
    }

    /// Identities of every invocation, in dispatch order.
    pub fn invoked_ids(&self) -> Vec<MessageId> {
        self.invocations().into_iter().map(|message| message.id).collect()
    }
}

impl MessageHandler for ScriptedHandler {
    fn handle(
        &self,
        message: Message,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            let attempt = {
                let mut attempts = self.attempts.lock().expect("attempts lock");
                let count = attempts.entry(message.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            self.invocations.lock().expect("invocations lock").push(message);
            if attempt <= self.failures_before_success {
                bail!("scripted failure on attempt {attempt}");
            }
            Ok(())
        })
    }
}
