//! The two-phase delegation procedure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use relay_context::ContextStore;
use relay_loop::AgentLoop;
use relay_tool::ToolRegistry;
use relay_types::{
    AgentEvent, BudgetConfig, CharEstimator, Chunk, GenerateRequest, LoopConfig, Observation,
    Provider, Role, Summarizer, Usage,
};
use tokio::time::Instant;
use tracing::debug;

use crate::contract::{Contract, Envelope};

/// Runs contracts on isolated sub-agents.
///
/// Holds the shared provider and summarizer, the full tool registry,
/// a per-agent-type tool allow-list, and the budget template sub-agent
/// contexts are derived from.
pub struct Delegator<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> {
    provider: Arc<P>,
    summarizer: Arc<S>,
    registry: ToolRegistry,
    allowed_tools: HashMap<String, Vec<String>>,
    budget: BudgetConfig,
}

impl<P: Provider + 'static, S: Summarizer + Send + Sync + 'static> Delegator<P, S> {
    /// Create a delegator over shared back-ends.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        summarizer: Arc<S>,
        registry: ToolRegistry,
        budget: BudgetConfig,
    ) -> Self {
        Self {
            provider,
            summarizer,
            registry,
            allowed_tools: HashMap::new(),
            budget,
        }
    }

    /// Register the tools an agent type may use.
    pub fn allow(&mut self, agent_type: impl Into<String>, tools: Vec<String>) {
        self.allowed_tools.insert(agent_type.into(), tools);
    }

    /// Execute one contract: a tool-less reasoning gate, then an
    /// isolated loop instance. Only the envelope crosses back.
    pub async fn delegate(&self, contract: Contract) -> Envelope {
        let started = Instant::now();
        let Some(allowed) = self.allowed_tools.get(&contract.agent_type) else {
            return Envelope::failure(
                &contract.id,
                format!("unknown agent type: {}", contract.agent_type),
            );
        };

        let mut tokens_used = 0usize;

        // Phase 1: one LLM call, no tools. BLOCK short-circuits.
        let gate = match self.reasoning_phase(&contract).await {
            Ok(gate) => gate,
            Err(message) => return Envelope::failure(&contract.id, message),
        };
        tokens_used += gate.tokens;
        if gate.blocked {
            debug!(contract = %contract.id, reason = %gate.reason, "delegation vetoed");
            let mut envelope = Envelope::failure(
                &contract.id,
                format!("blocked by reasoning phase: {}", gate.reason),
            );
            envelope.tokens_used = tokens_used;
            envelope.duration_ms = elapsed_ms(started);
            return envelope;
        }

        // Phase 2: a fresh loop with its own context store, narrowed
        // to the agent type's tools. Token accounting accumulates
        // across both phases.
        let agent = match AgentLoop::builder(
            Arc::clone(&self.provider),
            Arc::clone(&self.summarizer),
        )
        .system_prompt(system_prompt(&contract))
        .tools(self.registry.narrowed(allowed))
        .budget(self.sub_budget(&contract))
        .config(LoopConfig {
            session_id: contract.id.clone(),
            max_iterations: contract.limits.max_iterations.unwrap_or(10),
            per_turn_timeout: contract.limits.timeout_ms.map(Duration::from_millis),
            ..Default::default()
        })
        .build()
        {
            Ok(agent) => agent,
            Err(err) => return Envelope::failure(&contract.id, err.to_string()),
        };

        let mut rx = agent.run_turn(task_message(&contract));
        let mut entity_ids: Vec<String> = Vec::new();
        let mut tags: HashSet<String> = HashSet::new();
        let mut summary = String::new();
        let mut error: Option<String> = None;

        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::Observing { outcome: Observation::Success { output }, .. } => {
                    collect_entities(&output, &mut entity_ids, &mut tags);
                }
                AgentEvent::Complete { summary: s, metrics } => {
                    tokens_used += metrics.prompt_tokens + metrics.completion_tokens;
                    summary = s;
                }
                AgentEvent::Failed { cause } => {
                    error = Some(cause.to_string());
                }
                AgentEvent::ClarificationNeeded { .. } => {
                    error = Some("sub-agent requested clarification".to_string());
                }
                _ => {}
            }
        }

        if error.is_none()
            && let Some(spec) = &contract.expected_output
        {
            if let Some(min) = spec.min_elements
                && entity_ids.len() < min
            {
                error = Some(format!(
                    "expected at least {min} elements, got {}",
                    entity_ids.len()
                ));
            } else if let Some(missing) =
                spec.required_tags.iter().find(|tag| !tags.contains(*tag))
            {
                error = Some(format!("no produced entity carries type tag {missing}"));
            }
        }

        Envelope {
            contract_id: contract.id,
            success: error.is_none(),
            summary,
            entity_ids,
            tokens_used,
            duration_ms: elapsed_ms(started),
            error,
        }
    }

    /// Run N contracts concurrently. Each delegation is fully
    /// isolated; envelopes come back in contract order.
    pub async fn delegate_many(self: &Arc<Self>, contracts: Vec<Contract>) -> Vec<Envelope> {
        let mut handles = Vec::with_capacity(contracts.len());
        for contract in contracts {
            let delegator = Arc::clone(self);
            handles.push((
                contract.id.clone(),
                tokio::spawn(async move { delegator.delegate(contract).await }),
            ));
        }

        let mut envelopes = Vec::with_capacity(handles.len());
        for (contract_id, handle) in handles {
            match handle.await {
                Ok(envelope) => envelopes.push(envelope),
                Err(err) => {
                    envelopes.push(Envelope::failure(contract_id, format!("join failed: {err}")));
                }
            }
        }
        envelopes
    }

    async fn reasoning_phase(&self, contract: &Contract) -> Result<ReasoningGate, String> {
        let mut scratch =
            ContextStore::new(BudgetConfig::default(), Arc::new(CharEstimator::new()))
                .map_err(|err| err.to_string())?;
        scratch.append(Role::System, reasoning_prompt(contract), None, None);
        scratch.append(Role::User, task_message(contract), None, None);

        let request = GenerateRequest {
            messages: scratch.snapshot(),
            ..Default::default()
        };
        let mut stream = self
            .provider
            .generate(request)
            .await
            .map_err(|err| format!("reasoning phase failed: {err}"))?;

        let mut text = String::new();
        let mut usage: Option<Usage> = None;
        while let Some(chunk) = stream.receiver.recv().await {
            match chunk {
                Chunk::TextDelta { text: delta } => text.push_str(&delta),
                Chunk::Usage(u) => usage = Some(u),
                Chunk::ToolCall(_) => {} // no tools were offered
            }
        }

        let decision = extract_tag(&text, "decision").unwrap_or_default();
        let blocked = decision.trim().to_uppercase().starts_with("BLOCK");
        let reason = if blocked {
            extract_tag(&text, "risks").unwrap_or_else(|| decision.clone())
        } else {
            String::new()
        };
        Ok(ReasoningGate {
            blocked,
            reason,
            tokens: usage.map_or(0, |u| u.prompt_tokens + u.completion_tokens),
        })
    }

    /// Derive the sub-agent's budget from the template, honoring the
    /// contract's token ceiling. Reserves shrink with the ceiling so a
    /// tight contract still validates.
    fn sub_budget(&self, contract: &Contract) -> BudgetConfig {
        let mut budget = self.budget.clone();
        if let Some(max) = contract.limits.max_tokens {
            budget.ceiling = max.max(1024);
            budget.response_reserve = budget.response_reserve.min(budget.ceiling / 4);
            budget.tool_reserve = budget.tool_reserve.min(budget.ceiling / 8);
        }
        budget
    }
}

struct ReasoningGate {
    blocked: bool,
    reason: String,
    tokens: usize,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Pull `entity_id` / `entity_ids` and `type` tags out of a tool
/// output.
fn collect_entities(
    output: &serde_json::Value,
    entity_ids: &mut Vec<String>,
    tags: &mut HashSet<String>,
) {
    if let Some(id) = output.get("entity_id").and_then(|v| v.as_str()) {
        entity_ids.push(id.to_string());
    }
    if let Some(ids) = output.get("entity_ids").and_then(|v| v.as_array()) {
        entity_ids.extend(ids.iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    if let Some(tag) = output.get("type").and_then(|v| v.as_str()) {
        tags.insert(tag.to_string());
    }
}

fn extract_tag(text: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = text.find(&open)? + open.len();
    let rest = &text[start..];
    let end = rest.find(&close).unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

fn system_prompt(contract: &Contract) -> String {
    let mut prompt = format!(
        "You are a {} sub-agent. Complete the assigned task and nothing else.",
        contract.agent_type
    );
    if let Some(region) = &contract.work_region {
        prompt.push_str(&format!("\nWork region: {region}"));
    }
    if let Some(style) = &contract.inputs.style {
        prompt.push_str(&format!("\nStyle: {style}"));
    }
    prompt
}

fn task_message(contract: &Contract) -> String {
    let mut message = contract.task.clone();
    if !contract.inputs.references.is_empty() {
        message.push_str(&format!(
            "\nExisting entities: {}",
            contract.inputs.references.join(", ")
        ));
    }
    if let Some(data) = &contract.inputs.data {
        message.push_str(&format!("\nData: {data}"));
    }
    message
}

fn reasoning_prompt(contract: &Contract) -> String {
    format!(
        "You are assessing whether a {} sub-agent should take on a task. \
         Respond with <analysis>, <plan>, <estimates>, <risks>, and \
         <decision> blocks. The decision is either PROCEED or BLOCK \
         followed by a reason.",
        contract.agent_type
    )
}
