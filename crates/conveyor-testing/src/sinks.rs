//! Recording dead-letter sinks.

use std::{future::Future, pin::Pin, sync::Mutex};

use anyhow::bail;
use conveyor_client::DeadLetterSink;
use conveyor_core::DeadLetter;

/// Sink that records every dead letter it is offered.
///
/// The rejecting variant records the letter and then reports failure, for
/// verifying that acknowledgment never depends on the sink's verdict.
pub struct RecordingSink {
    letters: Mutex<Vec<DeadLetter>>,
    reject: bool,
}

impl RecordingSink {
    /// Sink that accepts everything.
    pub fn new() -> Self {
        Self { letters: Mutex::new(Vec::new()), reject: false }
    }

    /// Sink that records and then rejects everything.
    pub fn rejecting() -> Self {
        Self { letters: Mutex::new(Vec::new()), reject: true }
    }

    /// Every letter offered so far, in delivery order.
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().expect("letters lock").clone()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadLetterSink for RecordingSink {
    fn accept(
        &self,
        letter: DeadLetter,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.letters.lock().expect("letters lock").push(letter);
            if self.reject {
                bail!("sink rejected the letter");
            }
            Ok(())
        })
    }
}
