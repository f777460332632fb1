//! The message and tier data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for a message within one context.
///
/// Assigned by the context store on append; monotonically increasing,
/// never reused within a context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// The role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A system message.
    System,
    /// A human user.
    User,
    /// An AI assistant.
    Assistant,
    /// A tool result.
    Tool,
}

/// The memory tier a message belongs to.
///
/// Each tier carries its own budget and compressibility rules (see
/// [`crate::TierConfig`]). Tier assignment is immutable for a given
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// System prompts. Never compressed, never evicted below its floor.
    System,
    /// Tool results.
    Tools,
    /// Attached resources (documents, files, lookups).
    Resources,
    /// The live conversation. The last N exchanges are pinned.
    Recent,
    /// Older conversation spilled out of `Recent`.
    Archived,
    /// Scratch data that is first in line for compression and eviction.
    Ephemeral,
}

impl MemoryTier {
    /// Infer the tier for a role when the caller did not specify one.
    #[must_use]
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::System => MemoryTier::System,
            Role::Tool => MemoryTier::Tools,
            Role::User | Role::Assistant => MemoryTier::Recent,
        }
    }
}

/// Message priority, consulted by the budget planner's tie-breaks and
/// eviction skip rules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Compressed and evicted first.
    Low,
    /// The default.
    Normal,
    /// Compressed and evicted last.
    High,
    /// Never evicted.
    Critical,
}

/// Whether a message still carries its original content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMarker {
    /// Original content.
    Raw,
    /// Content replaced by a summary.
    Summarized,
    /// Content replaced by a redaction placeholder.
    Redacted,
}

/// A message in the context store.
///
/// Immutable after append except for compression replacement, which
/// swaps `content`, `token_estimate`, and `marker` atomically while
/// preserving identity and tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier.
    pub id: MessageId,
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Memory tier. Immutable for a given id.
    pub tier: MemoryTier,
    /// Priority for budget arithmetic.
    pub priority: Priority,
    /// Estimated token cost of this message.
    pub token_estimate: usize,
    /// When the message was appended.
    pub arrived_at: DateTime<Utc>,
    /// Correlation id linking a tool result to the assistant tool
    /// request that caused it.
    pub tool_call_id: Option<String>,
    /// Compression state.
    pub marker: CompressionMarker,
}

impl Message {
    /// Whether this message still carries original, uncompressed content.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.marker == CompressionMarker::Raw
    }
}
