//! The serializable snapshot handed to `checkpoint` hooks.

use relay_hooks::MetricsSnapshot;
use relay_plan::StructuredPlan;
use relay_types::Message;
use serde::Serialize;

/// Everything a host needs to persist a session at a turn boundary.
///
/// The core defines no on-disk format; hosts register a `checkpoint`
/// hook and serialize this view however they like.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointView {
    /// The context store's full message log.
    pub messages: Vec<Message>,
    /// The session's current plan, when one exists.
    pub plan: Option<StructuredPlan>,
    /// Per-tool dispatch metrics.
    pub metrics: MetricsSnapshot,
}
