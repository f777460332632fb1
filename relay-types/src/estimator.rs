//! Token estimation.

use crate::message::Message;

/// Estimates token costs for budget arithmetic.
///
/// Implementations must be deterministic and pure: the same input
/// always yields the same estimate. The default [`CharEstimator`] is a
/// character-count heuristic; hosts may inject a model-specific
/// tokenizer satisfying the same contract.
pub trait TokenEstimator: Send + Sync {
    /// Estimate tokens for a raw string.
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for a message, including per-message role and
    /// formatting overhead.
    fn estimate_message(&self, message: &Message) -> usize {
        self.estimate(&message.content) + self.message_overhead()
    }

    /// Fixed per-message overhead added by [`estimate_message`](Self::estimate_message).
    fn message_overhead(&self) -> usize {
        4
    }
}

/// The default 1-token-per-4-characters estimator.
#[derive(Debug, Clone)]
pub struct CharEstimator {
    chars_per_token: usize,
}

impl CharEstimator {
    /// Create an estimator with the default 4 chars-per-token ratio.
    #[must_use]
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }

    /// Create with a custom chars-per-token ratio (clamped to ≥ 1).
    #[must_use]
    pub fn with_ratio(chars_per_token: usize) -> Self {
        Self { chars_per_token: chars_per_token.max(1) }
    }
}

impl Default for CharEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CompressionMarker, MemoryTier, MessageId, Priority, Role};

    fn message(content: &str) -> Message {
        Message {
            id: MessageId(0),
            role: Role::User,
            content: content.to_string(),
            tier: MemoryTier::Recent,
            priority: Priority::Normal,
            token_estimate: 0,
            arrived_at: chrono::Utc::now(),
            tool_call_id: None,
            marker: CompressionMarker::Raw,
        }
    }

    #[test]
    fn four_chars_per_token() {
        let est = CharEstimator::new();
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
        assert_eq!(est.estimate(&"a".repeat(400)), 100);
    }

    #[test]
    fn message_overhead_added() {
        let est = CharEstimator::new();
        assert_eq!(est.estimate_message(&message(&"a".repeat(400))), 104);
        assert_eq!(est.estimate_message(&message("")), 4);
    }

    #[test]
    fn estimates_are_deterministic() {
        let est = CharEstimator::with_ratio(3);
        let text = "deterministic input";
        assert_eq!(est.estimate(text), est.estimate(text));
    }
}
