//! The LLM provider contract.
//!
//! A provider turns a [`GenerateRequest`] into a stream of [`Chunk`]s.
//! The loop assembles chunks into a full response; `abort` is honored
//! mid-stream through the [`ChunkStream`]'s cancellation token.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::message::Message;

/// A tool made visible to the model, derived from the dispatcher's
/// registered descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// The tool name (unique identifier).
    pub name: String,
    /// Description of what the tool does.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: serde_json::Value,
}

/// A request to the provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier; empty lets the provider pick its default.
    pub model: String,
    /// The prepared view of the conversation.
    pub messages: Vec<Message>,
    /// Tools the model may request.
    pub tools: Vec<ToolSpec>,
    /// Maximum response tokens.
    pub max_tokens: Option<usize>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Names of tools enabled for this call; `None` enables all.
    pub enabled_tools: Option<Vec<String>>,
    /// Sequences that stop generation.
    pub stop_sequences: Vec<String>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the response.
    EndTurn,
    /// The model requested one or more tools.
    ToolUse,
    /// Hit the max token limit.
    MaxTokens,
    /// Hit a stop sequence.
    StopSequence,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Stable call identifier assigned by the provider.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// JSON arguments.
    pub arguments: serde_json::Value,
}

/// Token accounting reported at the end of a provider stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: usize,
    /// Tokens in the completion.
    pub completion_tokens: usize,
    /// Why generation stopped.
    pub finish_reason: Option<FinishReason>,
}

impl Default for FinishReason {
    fn default() -> Self {
        FinishReason::EndTurn
    }
}

/// One streamed piece of a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chunk", rename_all = "snake_case")]
pub enum Chunk {
    /// A fragment of assistant text.
    TextDelta {
        /// The fragment.
        text: String,
    },
    /// A complete tool-call request.
    ToolCall(ToolCallRequest),
    /// Final usage report; the stream ends after this.
    Usage(Usage),
}

/// Handle to an in-flight provider stream.
///
/// Dropping the receiver or cancelling `abort` stops generation; the
/// provider must honor `abort` mid-stream.
pub struct ChunkStream {
    /// Chunks, in generation order. The channel closes when the
    /// response is complete or aborted.
    pub receiver: tokio::sync::mpsc::Receiver<Chunk>,
    /// Cancels the in-flight call.
    pub abort: CancellationToken,
}

/// An LLM provider.
///
/// Implementations are shared across sessions and responsible for their
/// own internal concurrency. The runtime never retains more than one
/// in-flight call per session turn.
pub trait Provider: Send + Sync {
    /// Start generating a response.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] if the call cannot be started.
    /// Mid-stream failures close the chunk channel early.
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> impl Future<Output = Result<ChunkStream, ProviderError>> + Send;
}

impl<P: Provider> Provider for std::sync::Arc<P> {
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> impl Future<Output = Result<ChunkStream, ProviderError>> + Send {
        (**self).generate(request)
    }
}
