//! Integration tests for the tool lifecycle.
//!
//! These tests drive the full manager stack (scripted chat backend, real
//! sandbox, file-backed store with hash embeddings) and verify that:
//! - Creation stores version 1 and the tool runs
//! - Close-enough tasks reuse the stored tool instead of generating
//! - Execution faults trigger bounded repair that bumps the version
//! - Disabled repair leaves the tool version untouched
//! - Arity and lookup problems surface as faults without repair
//! - Malformed model output never reaches the store

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use toolsmith_core::{
    ChatBackend, ChatRequest, FaultKind, LocalToolStore, ResolveOptions, Result, SandboxExecutor,
    ToolError, ToolManager, ToolStore,
};
use toolsmith_embeddings::HashEmbedder;

/// Chat backend that replays a fixed list of responses.
struct ScriptedBackend {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, _request: ChatRequest) -> Result<String> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ToolError::Gateway("no scripted response left".to_string()))
    }
}

async fn manager_with_scripts(
    dir: &TempDir,
    scripts: Vec<String>,
) -> (ToolManager, Arc<ScriptedBackend>, Arc<LocalToolStore>) {
    let backend = Arc::new(ScriptedBackend::new(scripts));
    let store = Arc::new(
        LocalToolStore::new(dir.path(), Arc::new(HashEmbedder::new()))
            .await
            .unwrap(),
    );
    let manager = ToolManager::new(backend.clone(), store.clone(), SandboxExecutor::new());
    (manager, backend, store)
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

fn buggy_sum_payload(name: &str) -> String {
    json!({
        "name": name,
        "description": "Sum a list of numbers",
        "parameters": [
            {"name": "numbers", "type_hint": "table", "description": "List of numbers"}
        ],
        "source_code": format!(
            "function {name}(numbers)\n  local total = 0\n  for _, n in ipairs(numbers) do\n    total = total + n\n  end\n  return total + missing_offset()\nend"
        )
    })
    .to_string()
}

fn fixed_sum_payload(name: &str) -> String {
    json!({
        "name": name,
        "description": "Sum a list of numbers",
        "parameters": [
            {"name": "numbers", "type_hint": "table", "description": "List of numbers"}
        ],
        "source_code": format!(
            "function {name}(numbers)\n  local total = 0\n  for _, n in ipairs(numbers) do\n    total = total + n\n  end\n  return total\nend"
        ),
        "fix_explanation": "Removed the call to the undefined helper missing_offset."
    })
    .to_string()
}

#[tokio::test]
async fn test_create_stores_version_one_and_executes() {
    let dir = TempDir::new().unwrap();
    let (manager, backend, store) = manager_with_scripts(&dir, vec![average_payload()]).await;

    let outcome = manager
        .resolve_or_create(
            "calculate the average of a list of numbers",
            &[json!([10, 20])],
            &ResolveOptions::default(),
        )
        .await;

    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.result, json!(15.0));
    assert_eq!(outcome.tool_name.as_deref(), Some("calculate_average"));
    assert_eq!(outcome.tool_version, Some(1));
    assert_eq!(outcome.repair_attempts, 0);
    assert_eq!(backend.remaining(), 0);

    let stored = store.get_by_name("calculate_average").await.unwrap();
    assert_eq!(stored.version, 1);
    assert!(stored.error_log.is_empty());
}

#[tokio::test]
async fn test_matching_task_reuses_stored_tool() {
    let dir = TempDir::new().unwrap();
    let (manager, backend, store) = manager_with_scripts(&dir, vec![average_payload()]).await;

    let task = "calculate the average of a list of numbers";
    let first = manager
        .resolve_or_create(task, &[json!([10, 20])], &ResolveOptions::default())
        .await;
    assert!(first.success, "fault: {:?}", first.fault);
    assert_eq!(backend.remaining(), 0);

    // Pin the threshold just above the actual stored distance so the
    // second call must take the reuse path.
    let scored = store.find_similar(task, 1).await.unwrap();
    let distance = scored[0].distance;
    let generous = ResolveOptions {
        similarity_threshold: distance + 0.05,
        ..ResolveOptions::default()
    };

    // The script queue is empty, so any generation attempt would fail.
    let second = manager
        .resolve_or_create(task, &[json!([1.0, 2.0, 3.0])], &generous)
        .await;
    assert!(second.success, "fault: {:?}", second.fault);
    assert_eq!(second.result, json!(2.0));
    assert_eq!(second.tool_version, Some(1));
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_distant_task_attempts_generation() {
    let dir = TempDir::new().unwrap();
    let (manager, _backend, store) = manager_with_scripts(&dir, vec![average_payload()]).await;

    let task = "calculate the average of a list of numbers";
    manager
        .resolve_or_create(task, &[json!([10, 20])], &ResolveOptions::default())
        .await;

    // A zero threshold can never match, so resolution falls through to
    // generation, which fails because the script queue is empty. That
    // failure is infrastructure, not tool behavior.
    let strict = ResolveOptions {
        similarity_threshold: 0.0,
        ..ResolveOptions::default()
    };
    let outcome = manager.resolve_or_create(task, &[json!([1])], &strict).await;

    assert!(!outcome.success);
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::Internal);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_execution_fault_triggers_bounded_repair() {
    let dir = TempDir::new().unwrap();
    let (manager, backend, store) = manager_with_scripts(
        &dir,
        vec![
            buggy_sum_payload("sum_numbers"),
            fixed_sum_payload("sum_numbers"),
        ],
    )
    .await;

    let outcome = manager
        .resolve_or_create(
            "sum a list of numbers",
            &[json!([1, 2, 3])],
            &ResolveOptions::default(),
        )
        .await;

    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.result, json!(6));
    assert_eq!(outcome.tool_version, Some(2));
    assert_eq!(outcome.repair_attempts, 1);
    assert_eq!(backend.remaining(), 0);

    // The failed version stays on the record; the repair bumped the
    // version exactly once.
    let stored = store.get_by_name("sum_numbers").await.unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.error_log.len(), 1);
    assert_eq!(stored.error_log[0].version, 1);
    assert!(stored.error_log[0].summary.contains("missing_offset"));

    let history = store.history("sum_numbers").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[1].version, 2);
}

#[tokio::test]
async fn test_repair_disabled_leaves_version_untouched() {
    let dir = TempDir::new().unwrap();
    let (manager, backend, store) =
        manager_with_scripts(&dir, vec![buggy_sum_payload("sum_numbers")]).await;

    let options = ResolveOptions {
        attempt_repair: false,
        ..ResolveOptions::default()
    };
    let outcome = manager
        .resolve_or_create("sum a list of numbers", &[json!([1, 2, 3])], &options)
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.repair_attempts, 0);
    assert_eq!(outcome.tool_version, Some(1));
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::ExecutionFault);

    // No repair response was ever requested.
    assert_eq!(backend.remaining(), 0);

    // The fault is recorded, but the tool itself is unchanged.
    let stored = store.get_by_name("sum_numbers").await.unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.error_log.len(), 1);
}

#[tokio::test]
async fn test_arity_mismatch_faults_without_repair() {
    let dir = TempDir::new().unwrap();
    let (manager, _backend, store) = manager_with_scripts(&dir, vec![average_payload()]).await;

    manager
        .create("calculate the average of a list of numbers")
        .await
        .unwrap();

    let outcome = manager
        .execute("calculate_average", &[], &ResolveOptions::default())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.repair_attempts, 0);
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::ArityMismatch);

    // Caller mistakes are not tool bugs: nothing lands on the error log.
    let stored = store.get_by_name("calculate_average").await.unwrap();
    assert_eq!(stored.version, 1);
    assert!(stored.error_log.is_empty());
}

#[tokio::test]
async fn test_unknown_tool_is_not_found_fault() {
    let dir = TempDir::new().unwrap();
    let (manager, _backend, _store) = manager_with_scripts(&dir, Vec::new()).await;

    let outcome = manager
        .execute("does_not_exist", &[], &ResolveOptions::default())
        .await;

    assert!(!outcome.success);
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::NotFound);
    assert_eq!(outcome.repair_attempts, 0);
}

#[tokio::test]
async fn test_malformed_response_never_reaches_store() {
    let dir = TempDir::new().unwrap();
    let (manager, _backend, store) = manager_with_scripts(
        &dir,
        vec!["I'm sorry, I cannot produce a tool for that.".to_string()],
    )
    .await;

    let outcome = manager
        .resolve_or_create("do something novel", &[], &ResolveOptions::default())
        .await;

    assert!(!outcome.success);
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::MalformedResponse);
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repair_failure_preserves_original_fault() {
    let dir = TempDir::new().unwrap();
    let (manager, backend, store) = manager_with_scripts(
        &dir,
        vec![
            buggy_sum_payload("sum_numbers"),
            "that is not a tool payload".to_string(),
        ],
    )
    .await;

    let outcome = manager
        .resolve_or_create(
            "sum a list of numbers",
            &[json!([1, 2, 3])],
            &ResolveOptions::default(),
        )
        .await;

    // The repair was attempted and failed; the outcome still reports the
    // execution fault that started it, not the parse error.
    assert!(!outcome.success);
    assert_eq!(outcome.repair_attempts, 1);
    assert_eq!(outcome.tool_version, Some(1));
    let fault = outcome.fault.unwrap();
    assert_eq!(fault.kind, FaultKind::ExecutionFault);
    assert!(fault.message.contains("missing_offset"));
    assert_eq!(backend.remaining(), 0);

    let stored = store.get_by_name("sum_numbers").await.unwrap();
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_improve_bumps_version_and_keeps_log() {
    let dir = TempDir::new().unwrap();
    let improved = json!({
        "name": "calculate_average",
        "description": "Calculate the average of a list of numbers, zero for an empty list",
        "parameters": [
            {"name": "numbers", "type_hint": "table", "description": "List of numbers"}
        ],
        "source_code": "function calculate_average(numbers)\n  if #numbers == 0 then\n    return 0\n  end\n  local sum = 0\n  for _, n in ipairs(numbers) do\n    sum = sum + n\n  end\n  return sum / #numbers\nend",
        "improvement_summary": "Return 0 instead of dividing by zero for an empty list."
    })
    .to_string();
    let (manager, _backend, store) =
        manager_with_scripts(&dir, vec![average_payload(), improved]).await;

    manager
        .create("calculate the average of a list of numbers")
        .await
        .unwrap();

    let revised = manager
        .improve("calculate_average", "return 0 for an empty list")
        .await
        .unwrap();
    assert_eq!(revised.version, 2);

    let outcome = manager
        .execute("calculate_average", &[json!([])], &ResolveOptions::default())
        .await;
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.result, json!(0));
    assert_eq!(outcome.tool_version, Some(2));

    let history = store.history("calculate_average").await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_repair_rename_is_forced_back() {
    let dir = TempDir::new().unwrap();
    let renamed_fix = json!({
        "name": "sum_numbers_fixed",
        "description": "Sum a list of numbers",
        "parameters": [
            {"name": "numbers", "type_hint": "table", "description": "List of numbers"}
        ],
        "source_code": "function sum_numbers(numbers)\n  local total = 0\n  for _, n in ipairs(numbers) do\n    total = total + n\n  end\n  return total\nend",
        "fix_explanation": "Removed the undefined helper call."
    })
    .to_string();
    let (manager, _backend, store) =
        manager_with_scripts(&dir, vec![buggy_sum_payload("sum_numbers"), renamed_fix]).await;

    manager.create("sum a list of numbers").await.unwrap();

    let repaired = manager
        .repair("sum_numbers", "attempt to call a nil value")
        .await
        .unwrap();
    assert_eq!(repaired.name, "sum_numbers");
    assert_eq!(repaired.version, 2);

    assert!(store.get_by_name("sum_numbers_fixed").await.is_err());
    let outcome = manager
        .execute("sum_numbers", &[json!([4, 5])], &ResolveOptions::default())
        .await;
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.result, json!(9));
}

#[tokio::test]
async fn test_create_collision_becomes_next_revision() {
    let dir = TempDir::new().unwrap();
    let first = json!({
        "name": "greet",
        "description": "Render a greeting",
        "parameters": [{"name": "who", "type_hint": "string"}],
        "source_code": "function greet(who)\n  return \"hello \" .. who\nend"
    })
    .to_string();
    let second = json!({
        "name": "greet",
        "description": "Render a loud greeting",
        "parameters": [{"name": "who", "type_hint": "string"}],
        "source_code": "function greet(who)\n  return string.upper(\"hello \" .. who)\nend"
    })
    .to_string();
    let (manager, _backend, store) = manager_with_scripts(&dir, vec![first, second]).await;

    let created = manager.create("greet someone by name").await.unwrap();
    assert_eq!(created.version, 1);

    let collided = manager.create("greet someone loudly").await.unwrap();
    assert_eq!(collided.name, "greet");
    assert_eq!(collided.version, 2);

    let history = store.history("greet").await.unwrap();
    assert_eq!(history.len(), 2);

    let outcome = manager
        .execute("greet", &[json!("ada")], &ResolveOptions::default())
        .await;
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.result, json!("HELLO ADA"));
}
