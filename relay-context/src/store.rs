//! The append-only context store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use relay_types::{
    BudgetConfig, CompressionMarker, ConfigError, ContextError, MemoryTier, Message, MessageId,
    Priority, Role, TokenEstimator,
};

/// Ordered append-only log of messages plus the session's budget
/// descriptor.
///
/// Insertion order is strictly preserved across all operations.
/// Identifiers are unique within a context and tier assignment is
/// immutable for a given identifier. The only mutation primitive is
/// [`replace_content`](ContextStore::replace_content), used by the
/// budget planner for compression.
pub struct ContextStore {
    config: BudgetConfig,
    estimator: Arc<dyn TokenEstimator>,
    messages: Vec<Message>,
    next_id: u64,
    /// Correlation id → the assistant message that requested the call.
    known_calls: HashMap<String, MessageId>,
    /// Calls whose results have not yet been appended.
    pending_calls: HashSet<String>,
}

impl ContextStore {
    /// Create an empty store with a validated budget descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the budget configuration violates the
    /// configuration schema.
    pub fn new(
        config: BudgetConfig,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            estimator,
            messages: Vec::new(),
            next_id: 0,
            known_calls: HashMap::new(),
            pending_calls: HashSet::new(),
        })
    }

    /// The budget descriptor this context was created with.
    #[must_use]
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Append a message. Tier defaults to the role's natural tier,
    /// priority to `Normal`.
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        tier: Option<MemoryTier>,
        priority: Option<Priority>,
    ) -> MessageId {
        let content = content.into();
        let id = MessageId(self.next_id);
        self.next_id += 1;
        let mut message = Message {
            id,
            role,
            content,
            tier: tier.unwrap_or_else(|| MemoryTier::for_role(role)),
            priority: priority.unwrap_or(Priority::Normal),
            token_estimate: 0,
            arrived_at: Utc::now(),
            tool_call_id: None,
            marker: CompressionMarker::Raw,
        };
        message.token_estimate = self.estimator.estimate_message(&message);
        self.messages.push(message);
        id
    }

    /// Record that an assistant message requested a tool call.
    ///
    /// Until the matching [`append_tool_result`](ContextStore::append_tool_result)
    /// arrives, the call is *pending* and no further LLM request may be
    /// prepared.
    pub fn register_tool_call(&mut self, assistant_id: MessageId, call_id: impl Into<String>) {
        let call_id = call_id.into();
        self.known_calls.insert(call_id.clone(), assistant_id);
        self.pending_calls.insert(call_id);
    }

    /// Append a tool result correlated to a prior assistant request.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::OrphanToolResult`] if no prior assistant
    /// message referenced `call_id`.
    pub fn append_tool_result(
        &mut self,
        call_id: &str,
        tool_name: &str,
        content: impl Into<String>,
    ) -> Result<MessageId, ContextError> {
        if !self.known_calls.contains_key(call_id) {
            return Err(ContextError::OrphanToolResult(call_id.to_string()));
        }
        let content = content.into();
        let id = MessageId(self.next_id);
        self.next_id += 1;
        let mut message = Message {
            id,
            role: Role::Tool,
            content: format!("[{tool_name}] {content}"),
            tier: MemoryTier::Tools,
            priority: Priority::Normal,
            token_estimate: 0,
            arrived_at: Utc::now(),
            tool_call_id: Some(call_id.to_string()),
            marker: CompressionMarker::Raw,
        };
        message.token_estimate = self.estimator.estimate_message(&message);
        self.messages.push(message);
        self.pending_calls.remove(call_id);
        Ok(id)
    }

    /// Iterate messages in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Look up a message by id.
    #[must_use]
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Number of live messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replace a message's content, estimate, and marker atomically.
    ///
    /// Identity, role, tier, priority, and arrival time are preserved.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::UnknownMessage`] for an id not in the
    /// store.
    pub fn replace_content(
        &mut self,
        id: MessageId,
        new_content: impl Into<String>,
        new_estimate: usize,
        marker: CompressionMarker,
    ) -> Result<(), ContextError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ContextError::UnknownMessage(id.to_string()))?;
        message.content = new_content.into();
        message.token_estimate = new_estimate;
        message.marker = marker;
        Ok(())
    }

    /// Remove a message from the store.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::EvictionProtected`] if eviction would
    /// drop the system tier below its floor or remove a pinned recent
    /// turn, and [`ContextError::UnknownMessage`] for an unknown id.
    pub fn evict(&mut self, id: MessageId) -> Result<(), ContextError> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| ContextError::UnknownMessage(id.to_string()))?;
        let message = &self.messages[index];

        if message.tier == MemoryTier::System {
            let floor = self.config.tier(MemoryTier::System).min_tokens;
            let remaining = self.tier_tokens(MemoryTier::System) - message.token_estimate;
            if remaining < floor {
                return Err(ContextError::EvictionProtected(format!(
                    "system tier would drop to {remaining} tokens, floor is {floor}"
                )));
            }
        }
        if self.pinned_ids().contains(&id) {
            return Err(ContextError::EvictionProtected(format!(
                "{id} is part of a pinned recent turn"
            )));
        }

        self.messages.remove(index);
        Ok(())
    }

    /// Sum of token estimates in one tier.
    #[must_use]
    pub fn tier_tokens(&self, tier: MemoryTier) -> usize {
        self.messages
            .iter()
            .filter(|m| m.tier == tier)
            .map(|m| m.token_estimate)
            .sum()
    }

    /// Sum of token estimates across all tiers.
    #[must_use]
    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.token_estimate).sum()
    }

    /// The ids that belong to the last `recent_turns_count` pinned
    /// user-assistant exchanges.
    ///
    /// The pinned set is every recent-tier message from the
    /// Nth-from-last user message onward. Empty when
    /// `recent_turns_count` is 0.
    #[must_use]
    pub fn pinned_ids(&self) -> HashSet<MessageId> {
        let n = self.config.recent_turns_count;
        if n == 0 {
            return HashSet::new();
        }
        let user_positions: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.tier == MemoryTier::Recent && m.role == Role::User)
            .map(|(i, _)| i)
            .collect();
        let Some(&cutoff) = user_positions.iter().rev().nth(n - 1).or(user_positions.first())
        else {
            return HashSet::new();
        };
        self.messages[cutoff..]
            .iter()
            .filter(|m| m.tier == MemoryTier::Recent)
            .map(|m| m.id)
            .collect()
    }

    /// The first still-pending tool call, if any.
    #[must_use]
    pub fn pending_tool_call(&self) -> Option<&str> {
        self.pending_calls.iter().next().map(String::as_str)
    }

    /// Forget outstanding tool calls whose results will never arrive
    /// (the turn was cancelled or failed mid-dispatch). The request
    /// history in `known_calls` is kept.
    pub fn abandon_pending_calls(&mut self) {
        self.pending_calls.clear();
    }

    /// Clone the full message log, e.g. for a checkpoint snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::CharEstimator;

    fn store() -> ContextStore {
        ContextStore::new(BudgetConfig::default(), Arc::new(CharEstimator::new())).unwrap()
    }

    #[test]
    fn append_then_read_back_round_trips() {
        let mut ctx = store();
        let id = ctx.append(Role::User, "hello world", None, None);
        let msg = ctx.get(id).unwrap();
        assert_eq!(msg.content, "hello world");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.tier, MemoryTier::Recent);
        assert_eq!(msg.token_estimate, 3 + 4);
        assert_eq!(msg.marker, CompressionMarker::Raw);
    }

    #[test]
    fn ids_are_unique_and_order_preserved() {
        let mut ctx = store();
        let a = ctx.append(Role::System, "sys", None, None);
        let b = ctx.append(Role::User, "one", None, None);
        let c = ctx.append(Role::Assistant, "two", None, None);
        assert!(a < b && b < c);
        let order: Vec<MessageId> = ctx.iter().map(|m| m.id).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn tool_result_requires_prior_request() {
        let mut ctx = store();
        let err = ctx.append_tool_result("call-1", "echo", "out").unwrap_err();
        assert!(matches!(err, ContextError::OrphanToolResult(_)));

        let aid = ctx.append(Role::Assistant, "using a tool", None, None);
        ctx.register_tool_call(aid, "call-1");
        assert_eq!(ctx.pending_tool_call(), Some("call-1"));

        let rid = ctx.append_tool_result("call-1", "echo", "out").unwrap();
        assert_eq!(ctx.get(rid).unwrap().tier, MemoryTier::Tools);
        assert_eq!(ctx.get(rid).unwrap().tool_call_id.as_deref(), Some("call-1"));
        assert!(ctx.pending_tool_call().is_none());
    }

    #[test]
    fn replace_content_swaps_atomically() {
        let mut ctx = store();
        let id = ctx.append(Role::User, "a".repeat(400), Some(MemoryTier::Archived), None);
        ctx.replace_content(id, "short summary", 4, CompressionMarker::Summarized)
            .unwrap();
        let msg = ctx.get(id).unwrap();
        assert_eq!(msg.content, "short summary");
        assert_eq!(msg.token_estimate, 4);
        assert_eq!(msg.marker, CompressionMarker::Summarized);
        assert_eq!(msg.tier, MemoryTier::Archived);
    }

    #[test]
    fn system_floor_blocks_eviction() {
        let mut cfg = BudgetConfig::default();
        cfg.tiers.get_mut(&MemoryTier::System).unwrap().min_tokens = 1;
        let mut ctx = ContextStore::new(cfg, Arc::new(CharEstimator::new())).unwrap();
        let id = ctx.append(Role::System, "you are helpful", None, None);
        assert!(matches!(
            ctx.evict(id),
            Err(ContextError::EvictionProtected(_))
        ));
    }

    #[test]
    fn pinned_recent_turn_blocks_eviction() {
        let mut ctx = store();
        ctx.append(Role::System, "sys", None, None);
        ctx.append(Role::User, "old question", None, None);
        ctx.append(Role::Assistant, "old answer", None, None);
        let user = ctx.append(Role::User, "new question", None, None);
        let asst = ctx.append(Role::Assistant, "new answer", None, None);

        let pinned = ctx.pinned_ids();
        assert!(pinned.contains(&user));
        assert!(pinned.contains(&asst));
        assert!(matches!(
            ctx.evict(user),
            Err(ContextError::EvictionProtected(_))
        ));
    }

    #[test]
    fn zero_recent_turns_pins_nothing() {
        let cfg = BudgetConfig { recent_turns_count: 0, ..Default::default() };
        let mut ctx = ContextStore::new(cfg, Arc::new(CharEstimator::new())).unwrap();
        ctx.append(Role::User, "only turn", None, None);
        assert!(ctx.pinned_ids().is_empty());
    }

    #[test]
    fn fewer_turns_than_pin_count_pins_them_all() {
        let mut ctx = store(); // recent_turns_count = 2
        let user = ctx.append(Role::User, "first", None, None);
        let asst = ctx.append(Role::Assistant, "reply", None, None);
        let pinned = ctx.pinned_ids();
        assert!(pinned.contains(&user) && pinned.contains(&asst));
    }

    #[test]
    fn tier_totals_sum_estimates() {
        let mut ctx = store();
        ctx.append(Role::User, "a".repeat(40), None, None); // 10 + 4
        ctx.append(Role::User, "b".repeat(40), None, None); // 10 + 4
        assert_eq!(ctx.tier_tokens(MemoryTier::Recent), 28);
        assert_eq!(ctx.total_tokens(), 28);
    }
}
