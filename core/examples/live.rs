//! Demo against a live chat provider.
//!
//! Settings come from the environment (a `.env` file works too):
//! - `TOOLSMITH_PROVIDER`: openai | ollama | vllm | generic (default: openai)
//! - `TOOLSMITH_MODEL`: model name (defaults: gpt-4o-mini, llama3.1 for ollama)
//! - `TOOLSMITH_BASE_URL`: endpoint base URL (required for vllm/generic)
//! - `TOOLSMITH_API_KEY`: bearer token (falls back to `OPENAI_API_KEY`)
//! - `TOOLSMITH_STORE_DIR`: tool storage directory (default: ./toolsmith-tools)
//!
//! Usage: cargo run -p toolsmith-core --example live -- "task description" '[1, 2, 3]'
//!
//! Arguments after the task are parsed as JSON and passed to the tool
//! positionally; anything that is not valid JSON is passed as a string.

use std::env;
use std::sync::Arc;

use serde_json::json;

use toolsmith_core::{
    ChatProvider, GatewayConfig, LlmGateway, LocalToolStore, ResolveOptions, SandboxExecutor,
    ToolManager,
};
use toolsmith_embeddings::{EmbeddingProvider, HashEmbedder, OpenAIProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    println!("🚀 Toolsmith Live Demo\n");

    let provider: ChatProvider = env::var("TOOLSMITH_PROVIDER")
        .unwrap_or_else(|_| "openai".to_string())
        .parse()?;
    let model = env::var("TOOLSMITH_MODEL").unwrap_or_else(|_| {
        match provider {
            ChatProvider::Ollama => "llama3.1",
            _ => "gpt-4o-mini",
        }
        .to_string()
    });
    let api_key = env::var("TOOLSMITH_API_KEY")
        .or_else(|_| env::var("OPENAI_API_KEY"))
        .ok();

    let mut config = match provider {
        ChatProvider::OpenAi => GatewayConfig::openai(model),
        ChatProvider::Ollama => GatewayConfig::ollama(model),
        ChatProvider::Vllm | ChatProvider::Generic => {
            let base = env::var("TOOLSMITH_BASE_URL")
                .map_err(|_| "set TOOLSMITH_BASE_URL for vllm/generic providers")?;
            GatewayConfig::openai_compatible(provider, base, model)
        }
    };
    if matches!(provider, ChatProvider::OpenAi | ChatProvider::Ollama)
        && let Ok(base) = env::var("TOOLSMITH_BASE_URL")
    {
        config = config.with_base_url(base);
    }
    if let Some(key) = &api_key {
        config = config.with_api_key(key);
    }
    println!("🌐 Chat: {} via {provider} ({})", config.model, config.base_url);

    // Real embeddings when an OpenAI key is around, hashed tokens otherwise.
    let embedder: Arc<dyn EmbeddingProvider> = if provider == ChatProvider::OpenAi
        && let Some(key) = &api_key
    {
        println!("🧭 Embeddings: openai (text-embedding-3-small)");
        Arc::new(OpenAIProvider::new().with_api_key(key))
    } else {
        println!("🧭 Embeddings: offline hash embedder");
        Arc::new(HashEmbedder::new())
    };

    let store_dir =
        env::var("TOOLSMITH_STORE_DIR").unwrap_or_else(|_| "./toolsmith-tools".to_string());
    println!("💾 Store: {store_dir}\n");
    let store = Arc::new(LocalToolStore::new(&store_dir, embedder).await?);
    let manager = ToolManager::new(Arc::new(LlmGateway::new(config)), store, SandboxExecutor::new());

    let mut argv = env::args().skip(1);
    let (task, args) = match argv.next() {
        Some(task) => {
            let args: Vec<serde_json::Value> = argv
                .map(|raw| {
                    serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::Value::String(raw))
                })
                .collect();
            (task, args)
        }
        None => (
            "calculate the average of a list of numbers".to_string(),
            vec![json!([3, 4, 5])],
        ),
    };

    println!("🔨 Task: {task}");
    println!("   Args: {}\n", json!(args));

    let outcome = manager
        .resolve_or_create(&task, &args, &ResolveOptions::default())
        .await;

    match &outcome.fault {
        None => {
            println!(
                "✅ {} v{} → {} ({}ms, {} repair attempt(s))",
                outcome.tool_name.as_deref().unwrap_or("?"),
                outcome.tool_version.unwrap_or(0),
                outcome.result,
                outcome.duration_ms,
                outcome.repair_attempts
            );
            if !outcome.stdout.is_empty() {
                println!("📋 Tool output:\n{}", outcome.stdout);
            }
        }
        Some(fault) => {
            println!("❌ {:?}: {}", fault.kind, fault.message);
        }
    }

    println!("\n🗂  Stored tools:");
    for tool in manager.list_tools().await? {
        println!("   • {} v{}: {}", tool.name, tool.version, tool.description);
    }

    Ok(())
}
