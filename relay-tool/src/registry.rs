//! The typed tool trait, its object-safe erasure, and the registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relay_hooks::HookPhase;
use relay_types::{ToolError, ToolSpec};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A strongly typed tool implementation.
///
/// `Args` is deserialized from the model-supplied JSON and doubles as
/// the input schema via `schemars`. Implement this and register through
/// [`TypedTool`]; the registry only ever sees [`ToolDyn`].
pub trait Tool: Send + Sync + 'static {
    /// The tool's unique name.
    const NAME: &'static str;
    /// Typed input arguments.
    type Args: DeserializeOwned + schemars::JsonSchema + Send;
    /// Structured output.
    type Output: Serialize + Send;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// Execute the tool.
    fn call(&self, args: Self::Args)
    -> impl Future<Output = Result<Self::Output, ToolError>> + Send;

    /// Hook phases that should run around this tool's dispatch.
    /// `None` (the default) runs every phase.
    fn hook_phases(&self) -> Option<Vec<HookPhase>> {
        None
    }
}

/// Boxed future returned by [`ToolDyn::call`].
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + 'a>>;

/// Object-safe trait for tool implementations.
///
/// Any tool source (local function, remote back-end) can implement this
/// directly; typed tools go through [`TypedTool`]. Tools are stored as
/// `Arc<dyn ToolDyn>` in [`ToolRegistry`].
pub trait ToolDyn: Send + Sync {
    /// The tool's unique name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Check an input against the schema without executing.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidInput`] describing the mismatch.
    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError>;

    /// Execute the tool with the given input.
    fn call(&self, input: serde_json::Value) -> ToolFuture<'_>;

    /// Hook phases to run around this tool; `None` runs every phase.
    fn hook_phases(&self) -> Option<Vec<HookPhase>> {
        None
    }
}

/// Adapter lifting a typed [`Tool`] into [`ToolDyn`].
pub struct TypedTool<T: Tool>(pub T);

impl<T: Tool> ToolDyn for TypedTool<T> {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(T::Args))
            .unwrap_or(serde_json::Value::Null)
    }

    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        serde_json::from_value::<T::Args>(input.clone())
            .map(|_| ())
            .map_err(|e| ToolError::InvalidInput(e.to_string()))
    }

    fn call(&self, input: serde_json::Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let args = serde_json::from_value::<T::Args>(input)
                .map_err(|e| ToolError::InvalidInput(e.to_string()))?;
            let output = self.0.call(args).await?;
            serde_json::to_value(output)
                .map_err(|e| ToolError::ExecutionFailed(format!("unserializable output: {e}")))
        })
    }

    fn hook_phases(&self) -> Option<Vec<HookPhase>> {
        self.0.hook_phases()
    }
}

/// Registry of tools available to a session.
///
/// Holds tools as `Arc<dyn ToolDyn>` keyed by name. Registering a tool
/// with an existing name overwrites it.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolDyn>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolDyn>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Register a typed tool.
    pub fn register_typed<T: Tool>(&mut self, tool: T) {
        self.register(Arc::new(TypedTool(tool)));
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolDyn>> {
        self.tools.get(name)
    }

    /// Iterate over all registered tools.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ToolDyn>> {
        self.tools.values()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The catalog handed to the LLM provider, sorted by name for
    /// stable request shapes.
    #[must_use]
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// A copy of this registry narrowed to the named tools. Unknown
    /// names are ignored.
    #[must_use]
    pub fn narrowed(&self, allowed: &[String]) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| allowed.iter().any(|a| a == *name))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        ToolRegistry { tools }
    }
}
