//! Demo of the tool lifecycle with no network access.
//!
//! A scripted chat backend stands in for the model and the hash embedder
//! stands in for the embedding API, so the whole create / execute / reuse /
//! improve loop runs offline.
//!
//! Usage: cargo run -p toolsmith-core --example offline

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use toolsmith_core::{
    ChatBackend, ChatRequest, LocalToolStore, ResolveOptions, Result, SandboxExecutor, ToolError,
    ToolManager, ToolStore,
};
use toolsmith_embeddings::HashEmbedder;

/// Chat backend that replays pre-written responses.
struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, _request: ChatRequest) -> Result<String> {
        self.responses
            .lock()
            .map_err(|_| ToolError::Gateway("scripted backend lock poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| ToolError::Gateway("no scripted response left".to_string()))
    }
}

fn average_payload() -> String {
    json!({
        "name": "calculate_average",
        "description": "Calculate the average of a list of numbers",
        "parameters": [
            {"name": "numbers", "type_hint": "table", "description": "List of numbers"}
        ],
        "source_code": "function calculate_average(numbers)\n  local sum = 0\n  for _, n in ipairs(numbers) do\n    sum = sum + n\n  end\n  return sum / #numbers\nend"
    })
    .to_string()
}

fn improved_payload() -> String {
    json!({
        "name": "calculate_average",
        "description": "Calculate the average of a list of numbers, zero for an empty list",
        "parameters": [
            {"name": "numbers", "type_hint": "table", "description": "List of numbers"}
        ],
        "source_code": "function calculate_average(numbers)\n  if #numbers == 0 then\n    return 0\n  end\n  local sum = 0\n  for _, n in ipairs(numbers) do\n    sum = sum + n\n  end\n  return sum / #numbers\nend",
        "improvement_summary": "Return 0 instead of dividing by zero for an empty list."
    })
    .to_string()
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logs
    tracing_subscriber::fmt::init();

    println!("🚀 Toolsmith Offline Demo\n");

    let backend = Arc::new(ScriptedBackend::new(vec![
        average_payload(),
        improved_payload(),
    ]));
    let storage = tempfile::tempdir()?;
    let store = Arc::new(LocalToolStore::new(storage.path(), Arc::new(HashEmbedder::new())).await?);
    let manager = ToolManager::new(backend, store.clone(), SandboxExecutor::new());
    let options = ResolveOptions::default();

    // Create a tool from a task description and run it in one step
    println!("🔨 Creating a tool for: calculate the average of a list of numbers");
    let outcome = manager
        .resolve_or_create(
            "calculate the average of a list of numbers",
            &[json!([3, 4, 5])],
            &options,
        )
        .await;
    println!(
        "   ✓ {} v{} → {} ({}ms)\n",
        outcome.tool_name.as_deref().unwrap_or("?"),
        outcome.tool_version.unwrap_or(0),
        outcome.result,
        outcome.duration_ms
    );

    // The tool is stored now, so later calls skip generation entirely
    println!("⚙️  Calling the stored tool directly with fresh arguments");
    let outcome = manager
        .execute("calculate_average", &[json!([10, 20, 30, 40])], &options)
        .await;
    println!("   ✓ result: {}\n", outcome.result);

    // Retrieval by meaning, not by name
    println!("🔍 Similar tools for 'mean of a dataset':");
    for scored in store.find_similar("mean of a dataset", 3).await? {
        println!(
            "   • {} v{} (distance {:.4})",
            scored.tool.name, scored.tool.version, scored.distance
        );
    }
    println!();

    // Failures come back as data on the outcome, not as panics
    println!("💥 Calling with the wrong number of arguments:");
    let outcome = manager.execute("calculate_average", &[], &options).await;
    if let Some(fault) = &outcome.fault {
        println!("   ✗ {:?}: {}\n", fault.kind, fault.message);
    }

    // Revise the tool from plain instructions
    println!("📈 Improving the tool: return 0 for an empty list");
    let revised = manager
        .improve("calculate_average", "return 0 for an empty list")
        .await?;
    println!("   ✓ now at v{}", revised.version);
    let outcome = manager
        .execute("calculate_average", &[json!([])], &options)
        .await;
    println!("   ✓ empty list now returns: {}\n", outcome.result);

    // Every version is kept
    println!("📜 Revision history:");
    for revision in manager.history("calculate_average").await? {
        println!("   v{}: {}", revision.version, revision.description);
    }
    println!();

    println!("🗂  Stored tools:");
    for tool in manager.list_tools().await? {
        println!("   • {} v{}: {}", tool.name, tool.version, tool.description);
    }

    println!("\n✅ Demo complete!");

    Ok(())
}
