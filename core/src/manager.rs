//! Tool lifecycle orchestration.
//!
//! [`ToolManager`] ties the pieces together: resolve a task description
//! to a stored tool or generate a new one, execute it in the sandbox,
//! repair it when it faults (bounded, off by configuration), and revise
//! it on request. Tool behavior never surfaces as an `Err` from the
//! execution entry points; it comes back as a [`Fault`] on the outcome.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Fault, FaultKind, Result, ToolError};
use crate::executor::{Execution, SandboxExecutor};
use crate::gateway::{ChatBackend, ChatRequest, parse_structured};
use crate::prompts;
use crate::store::ToolStore;
use crate::tool::{ErrorRecord, Tool, ToolParameter, ToolRevision};

/// How many similar tools get quoted in a creation prompt.
const SIMILAR_CONTEXT_LIMIT: usize = 2;

/// Knobs for [`ToolManager::resolve_or_create`] and
/// [`ToolManager::execute`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Maximum cosine distance at which a stored tool counts as a match
    /// for the task. Lower is stricter.
    pub similarity_threshold: f32,

    /// How many candidates to pull from the store when resolving.
    pub top_k: usize,

    /// Whether execution faults trigger automatic repair.
    pub attempt_repair: bool,

    /// Repair ceiling for a single execution call. Zero disables repair
    /// even when `attempt_repair` is set.
    pub max_repair_attempts: u32,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            top_k: 3,
            attempt_repair: true,
            max_repair_attempts: 1,
        }
    }
}

/// What came out of executing (or failing to execute) a tool.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Name of the tool that ran, when one was resolved.
    pub tool_name: Option<String>,

    /// Version of the tool that produced the final result.
    pub tool_version: Option<u32>,

    /// Whether the final run completed without a fault.
    pub success: bool,

    /// The tool's return value. Null on failure.
    pub result: serde_json::Value,

    /// Captured print output of the final run.
    pub stdout: String,

    /// The final fault, if the call did not succeed.
    pub fault: Option<Fault>,

    /// How many repairs were attempted during this call.
    pub repair_attempts: u32,

    /// Duration of the final run.
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    /// An outcome for a call that failed before any tool could run.
    pub fn failure(fault: Fault) -> Self {
        Self {
            tool_name: None,
            tool_version: None,
            success: false,
            result: serde_json::Value::Null,
            stdout: String::new(),
            fault: Some(fault),
            repair_attempts: 0,
            duration_ms: 0,
        }
    }

    fn from_execution(tool: &Tool, execution: Execution, repair_attempts: u32) -> Self {
        Self {
            tool_name: Some(tool.name.clone()),
            tool_version: Some(tool.version),
            success: execution.is_success(),
            result: execution.result,
            stdout: execution.stdout,
            fault: execution.fault,
            repair_attempts,
            duration_ms: execution.duration_ms,
        }
    }
}

/// The JSON payload every generation prompt asks for.
#[derive(Debug, Deserialize)]
struct GeneratedTool {
    name: String,
    description: String,
    #[serde(default)]
    parameters: Vec<ToolParameter>,
    source_code: String,
    fix_explanation: Option<String>,
    improvement_summary: Option<String>,
}

/// Orchestrates the tool lifecycle over injected backends.
pub struct ToolManager {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ToolStore>,
    executor: SandboxExecutor,
}

impl ToolManager {
    /// Create a manager from its three collaborators.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn ToolStore>,
        executor: SandboxExecutor,
    ) -> Self {
        Self {
            backend,
            store,
            executor,
        }
    }

    /// Resolve a task to a tool (reusing a close-enough stored one, else
    /// generating a new one) and execute it.
    ///
    /// Resolution or generation failing is reported as a fault on the
    /// outcome, the same channel tool failures use.
    pub async fn resolve_or_create(
        &self,
        task: &str,
        args: &[serde_json::Value],
        options: &ResolveOptions,
    ) -> ExecutionOutcome {
        let tool = match self.resolve(task, options).await {
            Ok(tool) => tool,
            Err(e) => {
                warn!("Could not resolve a tool for the task: {e}");
                return ExecutionOutcome::failure(Fault::from(&e));
            }
        };

        self.execute(&tool.name, args, options).await
    }

    /// Find a stored tool close enough to the task, or create one.
    async fn resolve(&self, task: &str, options: &ResolveOptions) -> Result<Tool> {
        let candidates = self.store.find_similar(task, options.top_k.max(1)).await?;

        if let Some(best) = candidates.first()
            && best.distance <= options.similarity_threshold
        {
            info!(
                "Reusing tool {} v{} (distance {:.4})",
                best.tool.name, best.tool.version, best.distance
            );
            return Ok(best.tool.clone());
        }

        debug!(
            "No stored tool within distance {}; generating a new one",
            options.similarity_threshold
        );
        let context: Vec<&Tool> = candidates
            .iter()
            .take(SIMILAR_CONTEXT_LIMIT)
            .map(|scored| &scored.tool)
            .collect();
        self.create_with_context(task, &context).await
    }

    /// Generate, validate, and store a new tool for the task.
    pub async fn create(&self, task: &str) -> Result<Tool> {
        let candidates = self.store.find_similar(task, SIMILAR_CONTEXT_LIMIT).await?;
        let context: Vec<&Tool> = candidates.iter().map(|scored| &scored.tool).collect();
        self.create_with_context(task, &context).await
    }

    async fn create_with_context(&self, task: &str, context: &[&Tool]) -> Result<Tool> {
        let request = ChatRequest::new(
            prompts::CREATE_SYSTEM,
            prompts::creation_prompt(task, context),
        );
        let response = self.backend.complete(request).await?;
        let generated: GeneratedTool = parse_structured(&response)?;

        let tool = Tool::new(generated.name, generated.description, generated.source_code)
            .with_parameters(generated.parameters);
        tool.validate()?;
        self.executor.check_syntax(&tool.source_code)?;

        // A name collision becomes the next revision of the existing tool.
        let tool = match self.store.get_by_name(&tool.name).await {
            Ok(existing) => {
                warn!(
                    "Generated tool {} already exists (v{}); storing as a new revision",
                    existing.name, existing.version
                );
                existing.next_revision(tool.description, tool.source_code, tool.parameters)
            }
            Err(ToolError::NotFound(_)) => tool,
            Err(e) => return Err(e),
        };

        self.store.put(tool.clone()).await?;
        info!("Created tool {} v{}", tool.name, tool.version);
        Ok(tool)
    }

    /// Execute a stored tool by name, repairing on execution faults up to
    /// the configured ceiling.
    pub async fn execute(
        &self,
        name: &str,
        args: &[serde_json::Value],
        options: &ResolveOptions,
    ) -> ExecutionOutcome {
        let mut tool = match self.store.get_by_name(name).await {
            Ok(tool) => tool,
            Err(e) => return ExecutionOutcome::failure(Fault::from(&e)),
        };

        let mut repair_attempts = 0u32;

        loop {
            debug!(
                "Executing {} v{} (repairs so far: {repair_attempts})",
                tool.name, tool.version
            );
            let execution = self
                .executor
                .run(&tool.source_code, &tool.parameters, args)
                .await;

            let Some(fault) = execution.fault.clone() else {
                return ExecutionOutcome::from_execution(&tool, execution, repair_attempts);
            };

            // Only genuine tool failures go on the record; arity and
            // lookup problems are the caller's.
            if fault.kind == FaultKind::ExecutionFault {
                let record = ErrorRecord::new(tool.version, &fault.message);
                if let Err(e) = self.store.append_error(&tool.name, record).await {
                    warn!("Failed to record fault for {}: {e}", tool.name);
                }
            }

            let repair_allowed = options.attempt_repair
                && fault.is_repairable()
                && repair_attempts < options.max_repair_attempts;
            if !repair_allowed {
                return ExecutionOutcome::from_execution(&tool, execution, repair_attempts);
            }

            repair_attempts += 1;
            info!(
                "Attempting repair of {} ({repair_attempts}/{})",
                tool.name, options.max_repair_attempts
            );
            match self.repair(&tool.name, &fault.message).await {
                Ok(repaired) => tool = repaired,
                Err(e) => {
                    warn!("Repair of {} failed: {e}", tool.name);
                    return ExecutionOutcome::from_execution(&tool, execution, repair_attempts);
                }
            }
        }
    }

    /// Ask the model to fix a tool that faulted; the fix is stored as the
    /// next revision.
    pub async fn repair(&self, name: &str, fault_summary: &str) -> Result<Tool> {
        // Re-fetch so the prompt sees the freshest source and error log.
        let tool = self.store.get_by_name(name).await?;
        let request = ChatRequest::new(
            prompts::REPAIR_SYSTEM,
            prompts::repair_prompt(&tool, fault_summary),
        );
        let response = self.backend.complete(request).await?;
        let generated: GeneratedTool = parse_structured(&response)?;

        if let Some(explanation) = &generated.fix_explanation {
            debug!("Fix for {name}: {explanation}");
        }

        self.store_revision(tool, generated).await
    }

    /// Revise a tool per the caller's instructions; the revision is
    /// stored as the next version.
    pub async fn improve(&self, name: &str, instructions: &str) -> Result<Tool> {
        let tool = self.store.get_by_name(name).await?;
        let request = ChatRequest::new(
            prompts::IMPROVE_SYSTEM,
            prompts::improvement_prompt(&tool, instructions),
        );
        let response = self.backend.complete(request).await?;
        let generated: GeneratedTool = parse_structured(&response)?;

        if let Some(summary) = &generated.improvement_summary {
            info!("Improvement for {name}: {summary}");
        }

        self.store_revision(tool, generated).await
    }

    /// Latest version of every stored tool.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.store.list().await
    }

    /// Full revision history of one tool.
    pub async fn history(&self, name: &str) -> Result<Vec<ToolRevision>> {
        self.store.history(name).await
    }

    /// Persist a generated revision on top of the current version. A
    /// model that renames the tool is overridden; the name is identity.
    async fn store_revision(&self, current: Tool, generated: GeneratedTool) -> Result<Tool> {
        if generated.name != current.name {
            warn!(
                "Model renamed {} to {}; keeping the original name",
                current.name, generated.name
            );
        }

        let revised = current.next_revision(
            generated.description,
            generated.source_code,
            generated.parameters,
        );
        revised.validate()?;
        self.executor.check_syntax(&revised.source_code)?;

        self.store.put(revised.clone()).await?;
        info!("Stored {} v{}", revised.name, revised.version);
        Ok(revised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_resolve_options_defaults() {
        let options = ResolveOptions::default();
        assert!((options.similarity_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(options.top_k, 3);
        assert!(options.attempt_repair);
        assert_eq!(options.max_repair_attempts, 1);
    }

    #[test]
    fn test_outcome_failure_constructor() {
        let outcome = ExecutionOutcome::failure(Fault::new(FaultKind::NotFound, "no such tool"));
        assert!(!outcome.success);
        assert_eq!(outcome.tool_name, None);
        assert_eq!(outcome.result, serde_json::Value::Null);
        assert_eq!(outcome.repair_attempts, 0);
    }

    #[test]
    fn test_outcome_from_execution() {
        let tool = Tool::new("greet", "Render a greeting", "function greet() return 1 end");

        let outcome = ExecutionOutcome::from_execution(
            &tool,
            Execution::success(json!(1), String::new(), 3),
            0,
        );
        assert!(outcome.success);
        assert_eq!(outcome.tool_name.as_deref(), Some("greet"));
        assert_eq!(outcome.tool_version, Some(1));
        assert_eq!(outcome.result, json!(1));

        let outcome = ExecutionOutcome::from_execution(
            &tool,
            Execution::failure(Fault::execution("boom"), String::new(), 3),
            2,
        );
        assert!(!outcome.success);
        assert_eq!(outcome.repair_attempts, 2);
        assert!(outcome.fault.is_some());
    }

    #[test]
    fn test_generated_tool_parses_without_optionals() {
        let payload = json!({
            "name": "adder",
            "description": "Add two numbers",
            "source_code": "function adder(a, b) return a + b end"
        })
        .to_string();

        let generated: GeneratedTool = parse_structured(&payload).unwrap();
        assert_eq!(generated.name, "adder");
        assert!(generated.parameters.is_empty());
        assert_eq!(generated.fix_explanation, None);
        assert_eq!(generated.improvement_summary, None);
    }

    #[test]
    fn test_generated_tool_parses_parameters() {
        let payload = json!({
            "name": "adder",
            "description": "Add two numbers",
            "parameters": [
                {"name": "a", "type_hint": "number"},
                {"name": "b", "type_hint": "number", "description": "second addend"}
            ],
            "source_code": "function adder(a, b) return a + b end"
        })
        .to_string();

        let generated: GeneratedTool = parse_structured(&payload).unwrap();
        assert_eq!(generated.parameters.len(), 2);
        assert_eq!(generated.parameters[0].name, "a");
        assert_eq!(
            generated.parameters[1].description.as_deref(),
            Some("second addend")
        );
    }
}
