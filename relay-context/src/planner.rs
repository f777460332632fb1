//! The budget planner: compression, eviction, and request assembly.

use std::cmp::Reverse;
use std::collections::HashSet;

use relay_types::{
    CompressionMarker, ContextError, MemoryTier, Message, MessageId, Priority, Summarizer,
};
use tracing::{debug, warn};

use crate::store::ContextStore;

/// Tiers considered by the compression phase, lowest-priority data
/// first.
const COMPRESSION_ORDER: [MemoryTier; 3] =
    [MemoryTier::Ephemeral, MemoryTier::Archived, MemoryTier::Resources];

/// Tiers considered by the eviction phase. Same priority order as
/// compression, then tool results, then unpinned conversation. The
/// system tier is never evicted.
const EVICTION_ORDER: [MemoryTier; 5] = [
    MemoryTier::Ephemeral,
    MemoryTier::Archived,
    MemoryTier::Resources,
    MemoryTier::Tools,
    MemoryTier::Recent,
];

/// Ratio applied when a compressible tier carries no explicit
/// compression target.
const FALLBACK_COMPRESSION_TARGET: f64 = 0.25;

/// The planner's output for one LLM call.
#[derive(Debug, Clone)]
pub struct PreparedView {
    /// Surviving messages in insertion order.
    pub messages: Vec<Message>,
    /// Summed token estimate of `messages`.
    pub prompt_tokens: usize,
    /// Tokens held back for the model response.
    pub response_reserve: usize,
    /// Tokens held back for tool results.
    pub tool_reserve: usize,
}

/// Decides which messages are included in the next LLM request,
/// summarizing and evicting as needed to fit the request envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetPlanner;

impl BudgetPlanner {
    /// Create a planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Assemble the request view, compressing and evicting under
    /// pressure.
    ///
    /// # Errors
    ///
    /// - [`ContextError::MissingSystemMessage`] when the system tier is
    ///   empty.
    /// - [`ContextError::PendingToolResult`] when a tool request has no
    ///   appended result yet.
    /// - [`ContextError::BudgetOverflow`] when the context cannot be
    ///   fit even after eviction. Fatal for the current turn.
    pub async fn prepare<S: Summarizer>(
        &self,
        store: &mut ContextStore,
        summarizer: &S,
    ) -> Result<PreparedView, ContextError> {
        if !store.iter().any(|m| m.tier == MemoryTier::System) {
            return Err(ContextError::MissingSystemMessage);
        }
        if let Some(call_id) = store.pending_tool_call() {
            return Err(ContextError::PendingToolResult(call_id.to_string()));
        }

        let available = store.config().available();
        let compress_below = store.config().compression_threshold * available as f64;
        let evict_above = store.config().eviction_threshold * available as f64;

        self.enforce_tier_ceilings(store, summarizer).await?;

        if store.total_tokens() as f64 > compress_below {
            self.compress(store, summarizer, compress_below, &COMPRESSION_ORDER).await;
        }

        if store.total_tokens() as f64 > evict_above {
            self.evict(store, available);
        }

        let total = store.total_tokens();
        if total > available {
            return Err(ContextError::BudgetOverflow { needed: total, available });
        }

        Ok(PreparedView {
            messages: store.snapshot(),
            prompt_tokens: total,
            response_reserve: store.config().response_reserve,
            tool_reserve: store.config().tool_reserve,
        })
    }

    /// Bring any tier over its configured maximum back under it:
    /// compress first if the tier allows it, then evict.
    async fn enforce_tier_ceilings<S: Summarizer>(
        &self,
        store: &mut ContextStore,
        summarizer: &S,
    ) -> Result<(), ContextError> {
        for tier in EVICTION_ORDER {
            let max = store.config().tier(tier).max_tokens;
            if store.tier_tokens(tier) <= max {
                continue;
            }
            if store.config().tier(tier).compressible {
                self.compress_tier(store, summarizer, tier, max as f64).await;
            }
            if store.tier_tokens(tier) > max {
                let pinned = store.pinned_ids();
                for id in candidate_order(store, tier, &pinned) {
                    if store.tier_tokens(tier) <= max {
                        break;
                    }
                    self.try_evict(store, id, tier);
                }
            }
        }
        Ok(())
    }

    /// Compress tiers in priority order until the total load drops to
    /// the compression threshold.
    async fn compress<S: Summarizer>(
        &self,
        store: &mut ContextStore,
        summarizer: &S,
        stop_below: f64,
        tiers: &[MemoryTier],
    ) {
        for &tier in tiers {
            if !store.config().tier(tier).compressible {
                continue;
            }
            if (store.total_tokens() as f64) <= stop_below {
                return;
            }
            self.compress_tier_until(store, summarizer, tier, StopRule::Total(stop_below)).await;
        }
    }

    /// Compress one tier until its own load reaches `tier_budget`.
    async fn compress_tier<S: Summarizer>(
        &self,
        store: &mut ContextStore,
        summarizer: &S,
        tier: MemoryTier,
        tier_budget: f64,
    ) {
        self.compress_tier_until(store, summarizer, tier, StopRule::Tier(tier_budget)).await;
    }

    async fn compress_tier_until<S: Summarizer>(
        &self,
        store: &mut ContextStore,
        summarizer: &S,
        tier: MemoryTier,
        stop: StopRule,
    ) {
        let tier_cfg = store.config().tier(tier);
        let target_ratio = tier_cfg.compression_target.unwrap_or(FALLBACK_COMPRESSION_TARGET);
        let live = store.iter().filter(|m| m.tier == tier).count();
        if live == 0 {
            return;
        }
        let min_share = tier_cfg.min_tokens / live;

        let pinned = store.pinned_ids();
        for id in candidate_order(store, tier, &pinned) {
            match stop {
                StopRule::Total(limit) => {
                    if (store.total_tokens() as f64) <= limit {
                        return;
                    }
                }
                StopRule::Tier(limit) => {
                    if (store.tier_tokens(tier) as f64) <= limit {
                        return;
                    }
                }
            }
            let Some(message) = store.get(id) else { continue };
            if message.marker != CompressionMarker::Raw {
                continue;
            }
            let original = message.token_estimate;
            let content = message.content.clone();
            #[allow(clippy::cast_precision_loss, clippy::cast_sign_loss)]
            let target = min_share.max((original as f64 * target_ratio) as usize);

            match summarizer.summarize(&content, target).await {
                Ok((summary, tokens)) if tokens < original => {
                    debug!(%id, ?tier, original, tokens, "compressed message");
                    let _ = store.replace_content(id, summary, tokens, CompressionMarker::Summarized);
                }
                Ok(_) => {
                    debug!(%id, ?tier, "summary reclaimed nothing, skipping");
                }
                Err(err) => {
                    // Recoverable: leave the message in place and move on.
                    warn!(%id, ?tier, %err, "summarization failed");
                }
            }
        }
    }

    /// Evict messages in tier priority order, oldest first, until the
    /// total load fits `available`. Critical-priority messages, pinned
    /// recent turns, and the whole system tier are skipped.
    fn evict(&self, store: &mut ContextStore, available: usize) {
        for tier in EVICTION_ORDER {
            if store.total_tokens() <= available {
                return;
            }
            let pinned = store.pinned_ids();
            for id in candidate_order(store, tier, &pinned) {
                if store.total_tokens() <= available {
                    return;
                }
                self.try_evict(store, id, tier);
            }
        }
    }

    fn try_evict(&self, store: &mut ContextStore, id: MessageId, tier: MemoryTier) {
        match store.evict(id) {
            Ok(()) => debug!(%id, ?tier, "evicted message"),
            // The store re-checks protection; a race with the pinned
            // set is skipped, not fatal.
            Err(err) => debug!(%id, ?tier, %err, "eviction skipped"),
        }
    }
}

enum StopRule {
    /// Stop when the store's total load drops to this many tokens.
    Total(f64),
    /// Stop when the tier's own load drops to this many tokens.
    Tier(f64),
}

/// Candidate ids in one tier, oldest first. Equal ages break toward
/// lower priority, then toward the longer message (greater reclaim).
/// Critical-priority and pinned messages are excluded.
fn candidate_order(
    store: &ContextStore,
    tier: MemoryTier,
    pinned: &HashSet<MessageId>,
) -> Vec<MessageId> {
    let mut candidates: Vec<&Message> = store
        .iter()
        .filter(|m| m.tier == tier && m.priority != Priority::Critical && !pinned.contains(&m.id))
        .collect();
    candidates.sort_by_key(|m| (m.arrived_at, m.priority, Reverse(m.token_estimate), m.id));
    candidates.into_iter().map(|m| m.id).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_types::{
        BudgetConfig, CharEstimator, MemoryTier, Priority, Role, Summarizer, TierConfig,
        TruncatingSummarizer,
    };

    use super::*;

    fn tier(max: usize, min: usize, compressible: bool, target: Option<f64>) -> TierConfig {
        TierConfig { max_tokens: max, min_tokens: min, compressible, compression_target: target }
    }

    /// A small budget where arithmetic is easy to follow by hand:
    /// available = 2000 − 500 − 200 = 1300.
    fn small_budget() -> BudgetConfig {
        let mut cfg = BudgetConfig {
            ceiling: 2000,
            response_reserve: 500,
            tool_reserve: 200,
            recent_turns_count: 1,
            compression_threshold: 0.8,
            eviction_threshold: 0.95,
            ..Default::default()
        };
        cfg.tiers.insert(MemoryTier::System, tier(500, 0, false, None));
        cfg.tiers.insert(MemoryTier::Tools, tier(2000, 0, false, None));
        cfg.tiers.insert(MemoryTier::Resources, tier(2000, 0, true, Some(0.2)));
        cfg.tiers.insert(MemoryTier::Recent, tier(2000, 0, false, None));
        cfg.tiers.insert(MemoryTier::Archived, tier(2000, 0, true, Some(0.2)));
        cfg.tiers.insert(MemoryTier::Ephemeral, tier(2000, 0, true, Some(0.2)));
        cfg
    }

    fn store_with(cfg: BudgetConfig) -> ContextStore {
        ContextStore::new(cfg, Arc::new(CharEstimator::new())).unwrap()
    }

    /// Content sized so the estimator reports exactly `tokens`
    /// (including the 4-token message overhead).
    fn content_of(tokens: usize) -> String {
        "x".repeat((tokens - 4) * 4)
    }

    #[tokio::test]
    async fn under_threshold_returns_context_as_is() {
        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, content_of(100), None, None);
        ctx.append(Role::User, content_of(100), None, None);

        let view = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert_eq!(view.prompt_tokens, 200);
        assert_eq!(view.messages.len(), 2);
        assert!(ctx.iter().all(|m| m.is_raw()));
    }

    #[tokio::test]
    async fn exact_threshold_does_not_compress_one_past_does() {
        // threshold × available = 0.8 × 1300 = 1040
        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, content_of(100), None, None);
        ctx.append(Role::User, content_of(140), None, None);
        ctx.append(Role::User, content_of(800), Some(MemoryTier::Archived), None);
        assert_eq!(ctx.total_tokens(), 1040);

        let planner = BudgetPlanner::new();
        planner.prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert!(ctx.iter().all(|m| m.is_raw()), "at the boundary nothing moves");

        ctx.append(Role::User, "abcd", Some(MemoryTier::Ephemeral), None);
        assert_eq!(ctx.total_tokens(), 1045);
        planner.prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert!(
            ctx.iter().any(|m| m.marker == CompressionMarker::Summarized),
            "one token past the boundary triggers compression"
        );
    }

    #[tokio::test]
    async fn compression_flips_oldest_compressible_first() {
        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, content_of(100), None, None);
        let old = ctx.append(Role::User, content_of(600), Some(MemoryTier::Archived), None);
        let new = ctx.append(Role::User, content_of(600), Some(MemoryTier::Archived), None);
        ctx.append(Role::User, content_of(100), None, None);
        // total 1400 > 1040, compressing `old` to ≤ 120 gets under

        BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert_eq!(ctx.get(old).unwrap().marker, CompressionMarker::Summarized);
        assert_eq!(ctx.get(new).unwrap().marker, CompressionMarker::Raw);
    }

    #[tokio::test]
    async fn summarizer_failure_is_recoverable() {
        struct Failing;
        impl Summarizer for Failing {
            fn summarize(
                &self,
                _content: &str,
                _target: usize,
            ) -> impl std::future::Future<Output = Result<(String, usize), ContextError>> + Send
            {
                async { Err(ContextError::SummarizationFailed("no backend".into())) }
            }
        }

        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, content_of(100), None, None);
        ctx.append(Role::User, content_of(1300), Some(MemoryTier::Archived), None);

        // Compression fails everywhere, eviction still fits the view.
        let view = BudgetPlanner::new().prepare(&mut ctx, &Failing).await.unwrap();
        assert!(view.prompt_tokens <= 1300);
    }

    #[tokio::test]
    async fn eviction_drops_tool_results_before_recent() {
        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, content_of(100), None, None);
        let old_user = ctx.append(Role::User, content_of(400), None, None);
        let old_asst = ctx.append(Role::Assistant, content_of(400), None, None);
        let user = ctx.append(Role::User, content_of(300), None, None);
        let asst = ctx.append(Role::Assistant, content_of(300), None, None);
        ctx.register_tool_call(asst, "call-1");
        let tool = ctx.append_tool_result("call-1", "lookup", content_of(996)).unwrap();

        // ~2500 total; nothing compressible is seeded.
        let view = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert!(view.prompt_tokens <= 1300);
        assert!(ctx.get(tool).is_none(), "tool result evicted first");
        assert!(ctx.get(old_user).is_none(), "then the oldest unpinned recent");
        assert!(ctx.get(old_asst).is_some(), "eviction stops once the view fits");
        assert!(ctx.get(user).is_some() && ctx.get(asst).is_some(), "pinned turn survives");
    }

    #[tokio::test]
    async fn critical_messages_are_never_evicted() {
        // Non-compressible ephemeral so only eviction can act.
        let mut cfg = small_budget();
        cfg.tiers.insert(MemoryTier::Ephemeral, tier(2000, 0, false, None));
        let mut ctx = store_with(cfg);
        ctx.append(Role::System, content_of(100), None, None);
        let keep = ctx.append(
            Role::User,
            content_of(500),
            Some(MemoryTier::Ephemeral),
            Some(Priority::Critical),
        );
        let drop_me = ctx.append(Role::User, content_of(900), Some(MemoryTier::Ephemeral), None);
        ctx.append(Role::User, content_of(200), None, None);

        let view = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert!(ctx.get(keep).is_some());
        assert!(ctx.get(drop_me).is_none());
        assert!(view.prompt_tokens <= 1300);
    }

    #[tokio::test]
    async fn pinned_turn_forces_overflow_rather_than_eviction() {
        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, content_of(100), None, None);
        ctx.append(Role::User, content_of(800), None, None);
        ctx.append(Role::Assistant, content_of(800), None, None);

        // Pinned exchange alone exceeds available; nothing may evict it.
        let err = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap_err();
        assert!(matches!(err, ContextError::BudgetOverflow { .. }));
        assert_eq!(ctx.len(), 3, "overflow does not destroy the context");
    }

    #[tokio::test]
    async fn zero_recent_turns_lets_the_last_turn_go() {
        let cfg = BudgetConfig { recent_turns_count: 0, ..small_budget() };
        let mut ctx = store_with(cfg);
        ctx.append(Role::System, content_of(100), None, None);
        ctx.append(Role::User, content_of(800), None, None);
        ctx.append(Role::Assistant, content_of(800), None, None);

        let view = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        assert!(view.prompt_tokens <= 1300);
        assert!(ctx.len() < 3);
    }

    #[tokio::test]
    async fn pending_tool_result_blocks_preparation() {
        let mut ctx = store_with(small_budget());
        ctx.append(Role::System, "sys", None, None);
        let asst = ctx.append(Role::Assistant, "calling", None, None);
        ctx.register_tool_call(asst, "call-7");

        let err = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap_err();
        assert!(matches!(err, ContextError::PendingToolResult(_)));
    }

    #[tokio::test]
    async fn missing_system_message_is_rejected() {
        let mut ctx = store_with(small_budget());
        ctx.append(Role::User, "hi", None, None);
        let err = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap_err();
        assert!(matches!(err, ContextError::MissingSystemMessage));
    }

    #[tokio::test]
    async fn view_preserves_insertion_order() {
        let mut ctx = store_with(small_budget());
        let a = ctx.append(Role::System, "sys", None, None);
        let b = ctx.append(Role::User, "q", None, None);
        let c = ctx.append(Role::Assistant, "a", None, None);

        let view = BudgetPlanner::new().prepare(&mut ctx, &TruncatingSummarizer).await.unwrap();
        let ids: Vec<MessageId> = view.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![a, b, c]);
    }
}
