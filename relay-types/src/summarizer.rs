//! The summarizer contract consumed by the budget planner.

use std::future::Future;

use crate::error::ContextError;

/// Produces a compressed rendition of message content.
///
/// The planner treats this as a pure function `(content, target) →
/// (summary, actual tokens)`: deterministic for tests, at least on
/// short inputs. Implementations may delegate to a cheap LLM.
pub trait Summarizer: Send + Sync {
    /// Summarize `content` down to roughly `target_tokens`.
    ///
    /// Returns the summary text and its actual token estimate. A
    /// failure here is recoverable — the planner leaves the message in
    /// place and moves to the next candidate.
    ///
    /// # Errors
    ///
    /// Returns a [`ContextError`] when summarization fails.
    fn summarize(
        &self,
        content: &str,
        target_tokens: usize,
    ) -> impl Future<Output = Result<(String, usize), ContextError>> + Send;
}

impl<S: Summarizer> Summarizer for std::sync::Arc<S> {
    fn summarize(
        &self,
        content: &str,
        target_tokens: usize,
    ) -> impl Future<Output = Result<(String, usize), ContextError>> + Send {
        (**self).summarize(content, target_tokens)
    }
}

/// A deterministic summarizer that truncates to a character budget.
///
/// Useful as a default and in tests: `target_tokens × 4` characters are
/// kept (the inverse of the default estimator ratio) with an ellipsis
/// marker when anything was cut.
#[derive(Debug, Clone, Default)]
pub struct TruncatingSummarizer;

impl Summarizer for TruncatingSummarizer {
    fn summarize(
        &self,
        content: &str,
        target_tokens: usize,
    ) -> impl Future<Output = Result<(String, usize), ContextError>> + Send {
        let budget = target_tokens.saturating_mul(4);
        let summary = if content.len() <= budget {
            content.to_string()
        } else {
            let cut = content
                .char_indices()
                .take_while(|(i, _)| *i < budget.saturating_sub(1))
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}…", &content[..cut])
        };
        let tokens = summary.len().div_ceil(4);
        async move { Ok((summary, tokens)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_content_passes_through() {
        let s = TruncatingSummarizer;
        let (out, tokens) = s.summarize("hello", 10).await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(tokens, 2);
    }

    #[tokio::test]
    async fn long_content_is_cut_to_budget() {
        let s = TruncatingSummarizer;
        let content = "x".repeat(1000);
        let (out, tokens) = s.summarize(&content, 10).await.unwrap();
        assert!(out.len() <= 43); // 39 chars + multi-byte ellipsis
        assert!(tokens <= 11);
    }

    #[tokio::test]
    async fn summaries_are_deterministic() {
        let s = TruncatingSummarizer;
        let a = s.summarize("some long enough content here", 2).await.unwrap();
        let b = s.summarize("some long enough content here", 2).await.unwrap();
        assert_eq!(a, b);
    }
}
