//! Contracts and result envelopes.

use serde::{Deserialize, Serialize};

/// Optional inputs a contract carries for the sub-agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractInputs {
    /// Entity ids the sub-agent should consider pre-existing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    /// Free-form style guidance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Arbitrary structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// What the delegator expects the sub-agent to produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// The kind of output (free-form tag).
    pub kind: String,
    /// Minimum number of entities the sub-agent must produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_elements: Option<usize>,
    /// Type tags that must appear among the produced entities.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tags: Vec<String>,
}

/// Resource ceilings for one delegation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum LLM iterations for the execution phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    /// Token ceiling for the sub-agent's context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Wall-clock limit for the execution phase, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// The minimal specification passed to a sub-agent.
///
/// Passed by value; the inner loop never receives a pointer to the
/// parent's context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    /// Contract identifier; doubles as the sub-agent's session id.
    pub id: String,
    /// Selects the tool allow-list and prompt framing.
    pub agent_type: String,
    /// What the sub-agent must do.
    pub task: String,
    /// Opaque scope information for the tool host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_region: Option<serde_json::Value>,
    /// Optional references, style, and data.
    #[serde(default)]
    pub inputs: ContractInputs,
    /// Expected output descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<OutputSpec>,
    /// Resource ceilings.
    #[serde(default)]
    pub limits: ResourceLimits,
}

/// Everything that crosses back from a delegation. No messages,
/// reasoning, or intermediate events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The contract this envelope answers.
    pub contract_id: String,
    /// Whether the delegation succeeded.
    pub success: bool,
    /// The sub-agent's final summary (or the veto reason).
    pub summary: String,
    /// Entity ids the sub-agent reported creating or touching.
    pub entity_ids: Vec<String>,
    /// Tokens consumed across both phases.
    pub tokens_used: usize,
    /// Wall time of the whole delegation.
    pub duration_ms: u64,
    /// The failure description, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// A failure envelope with zero progress.
    #[must_use]
    pub fn failure(contract_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            contract_id: contract_id.into(),
            success: false,
            summary: error.clone(),
            entity_ids: Vec::new(),
            tokens_used: 0,
            duration_ms: 0,
            error: Some(error),
        }
    }
}
