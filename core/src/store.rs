//! Tool storage and semantic lookup.
//!
//! [`LocalToolStore`] is the default backend: one JSON document per tool
//! under a root directory, an in-memory cache, and a similarity index over
//! tool embeddings rebuilt at load time. The [`ToolStore`] trait is the
//! swap point for remote or vector-database backends.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use toolsmith_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest, SimilarityIndex};

use crate::error::{Result, StorageError, ToolError};
use crate::tool::{ErrorRecord, Tool, ToolRevision};

/// A tool scored by its distance from a query.
#[derive(Debug, Clone)]
pub struct ScoredTool {
    /// The matched tool (latest version).
    pub tool: Tool,

    /// Cosine distance from the query. Lower is closer.
    pub distance: f32,
}

/// Storage backend for tools.
///
/// Implementations must serialize writes per tool name: `put` is the only
/// way a version comes into existence and a revision must land on top of
/// the version it was derived from.
#[async_trait]
pub trait ToolStore: Send + Sync {
    /// Insert a new tool (version 1) or persist its next revision.
    ///
    /// Rejects anything that is not exactly one version ahead of what is
    /// stored.
    async fn put(&self, tool: Tool) -> Result<()>;

    /// Get the latest version of a tool by name.
    async fn get_by_name(&self, name: &str) -> Result<Tool>;

    /// Find up to `k` tools semantically close to the query text, ordered
    /// by ascending distance.
    async fn find_similar(&self, query: &str, k: usize) -> Result<Vec<ScoredTool>>;

    /// Append a fault record to a tool's error log without touching its
    /// version.
    async fn append_error(&self, name: &str, record: ErrorRecord) -> Result<()>;

    /// Every persisted revision of a tool, oldest first.
    async fn history(&self, name: &str) -> Result<Vec<ToolRevision>>;

    /// Latest version of every stored tool, sorted by name.
    async fn list(&self) -> Result<Vec<Tool>>;
}

/// On-disk document for one tool: the latest version, its embedding, and
/// every revision stored so far (current one included, oldest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolDocument {
    tool: Tool,
    embedding: Embedding,
    #[serde(default)]
    revisions: Vec<ToolRevision>,
}

/// Mutable state behind the store's lock.
struct StoreState {
    documents: HashMap<String, ToolDocument>,
    index: SimilarityIndex,
}

/// File-backed tool store with embedding-based lookup.
pub struct LocalToolStore {
    /// Root directory for tool documents.
    root: PathBuf,

    /// Embedding provider for search text and queries.
    provider: Arc<dyn EmbeddingProvider>,

    /// Index dimension, fixed to the provider's default model.
    dimension: usize,

    /// Cache and index. Writers are serialized; readers run concurrently.
    state: RwLock<StoreState>,
}

impl LocalToolStore {
    /// Open (or create) a store at the given root directory.
    ///
    /// Existing tool documents are loaded into the cache and re-indexed.
    /// Documents whose stored embedding does not match the provider's
    /// dimension are re-embedded, so switching providers keeps old tools
    /// findable.
    pub async fn new(root: impl AsRef<Path>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::CreateDirectory(format!("{}: {e}", root.display())))?;

        let dimension = provider.default_dimension();
        let store = Self {
            root,
            provider,
            dimension,
            state: RwLock::new(StoreState {
                documents: HashMap::new(),
                index: SimilarityIndex::new(dimension),
            }),
        };

        store.load_all().await?;
        Ok(store)
    }

    /// Path of a tool's document. Tool names pass [`crate::tool::is_valid_name`]
    /// before they get here, so the stem is filesystem-safe.
    fn tool_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Load every tool document from disk.
    async fn load_all(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", self.root.display())))?;

        let mut state = self.state.write().await;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::ReadFile(format!("{e}")))?
        {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }

            match self.load_file(&path).await {
                Ok(mut doc) => {
                    if doc.embedding.len() != self.dimension {
                        debug!(
                            "re-embedding {} ({} dimensions stored, index wants {})",
                            doc.tool.name,
                            doc.embedding.len(),
                            self.dimension
                        );
                        match self
                            .provider
                            .embed(EmbeddingRequest::new(doc.tool.searchable_text()))
                            .await
                        {
                            Ok(response) => {
                                doc.embedding = response.embedding;
                                self.save_file(&doc).await?;
                            }
                            Err(e) => {
                                warn!("failed to re-embed {}: {e}", doc.tool.name);
                            }
                        }
                    }

                    if doc.embedding.len() == self.dimension {
                        state
                            .index
                            .add(doc.tool.name.clone(), doc.embedding.clone(), None)?;
                    }
                    debug!("Loaded tool: {} v{}", doc.tool.name, doc.tool.version);
                    state.documents.insert(doc.tool.name.clone(), doc);
                }
                Err(e) => {
                    warn!("Failed to load tool {}: {e}", path.display());
                }
            }
        }

        info!("Loaded {} tools", state.documents.len());
        Ok(())
    }

    /// Load a single tool document from disk.
    async fn load_file(&self, path: &Path) -> Result<ToolDocument> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StorageError::ReadFile(format!("{}: {e}", path.display())))?;

        let doc: ToolDocument = serde_json::from_str(&content)?;
        Ok(doc)
    }

    /// Save a tool document to disk.
    async fn save_file(&self, doc: &ToolDocument) -> Result<()> {
        let path = self.tool_path(&doc.tool.name);
        let content = serde_json::to_string_pretty(doc)?;

        // Write atomically
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &content)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::WriteFile(format!("{}: {e}", path.display())))?;

        debug!("Saved tool: {} v{}", doc.tool.name, doc.tool.version);
        Ok(())
    }
}

#[async_trait]
impl ToolStore for LocalToolStore {
    async fn put(&self, tool: Tool) -> Result<()> {
        tool.validate()?;

        // Embed before taking the write lock; the version check below
        // still runs under it, so concurrent puts cannot interleave.
        let response = self
            .provider
            .embed(EmbeddingRequest::new(tool.searchable_text()))
            .await?;

        let mut state = self.state.write().await;

        let expected = state
            .documents
            .get(&tool.name)
            .map_or(1, |doc| doc.tool.version + 1);
        if tool.version != expected {
            return Err(ToolError::VersionConflict {
                tool: tool.name.clone(),
                expected,
                actual: tool.version,
            });
        }

        let mut revisions = state
            .documents
            .get(&tool.name)
            .map(|doc| doc.revisions.clone())
            .unwrap_or_default();
        revisions.push(ToolRevision::from(&tool));

        let doc = ToolDocument {
            tool,
            embedding: response.embedding,
            revisions,
        };

        self.save_file(&doc).await?;
        state
            .index
            .add(doc.tool.name.clone(), doc.embedding.clone(), None)?;
        info!("Stored tool {} v{}", doc.tool.name, doc.tool.version);
        state.documents.insert(doc.tool.name.clone(), doc);

        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Tool> {
        let state = self.state.read().await;
        state
            .documents
            .get(name)
            .map(|doc| doc.tool.clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    async fn find_similar(&self, query: &str, k: usize) -> Result<Vec<ScoredTool>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let response = self.provider.embed(EmbeddingRequest::new(query)).await?;

        let state = self.state.read().await;
        if state.index.is_empty() {
            return Ok(Vec::new());
        }

        let results = state.index.search(&response.embedding, k)?;
        let mut scored = Vec::with_capacity(results.len());
        for result in results {
            if let Some(doc) = state.documents.get(&result.id) {
                scored.push(ScoredTool {
                    tool: doc.tool.clone(),
                    distance: result.distance,
                });
            }
        }

        Ok(scored)
    }

    async fn append_error(&self, name: &str, record: ErrorRecord) -> Result<()> {
        let mut state = self.state.write().await;

        let doc = state
            .documents
            .get_mut(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        doc.tool.error_log.push(record);

        let snapshot = doc.clone();
        self.save_file(&snapshot).await?;
        debug!(
            "Recorded fault #{} for {}",
            snapshot.tool.error_log.len(),
            name
        );
        Ok(())
    }

    async fn history(&self, name: &str) -> Result<Vec<ToolRevision>> {
        let state = self.state.read().await;
        state
            .documents
            .get(name)
            .map(|doc| doc.revisions.clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Tool>> {
        let state = self.state.read().await;
        let mut tools: Vec<Tool> = state.documents.values().map(|doc| doc.tool.clone()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use toolsmith_embeddings::HashEmbedder;

    fn provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashEmbedder::new())
    }

    fn sample(name: &str, description: &str) -> Tool {
        Tool::new(
            name,
            description,
            format!("function {name}() return 1 end"),
        )
    }

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        let tool = sample("greet", "Render a friendly greeting string");
        store.put(tool.clone()).await.unwrap();

        let loaded = store.get_by_name("greet").await.unwrap();
        assert_eq!(loaded.name, "greet");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.source_code, tool.source_code);
    }

    #[tokio::test]
    async fn test_get_unknown_tool_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        let err = store.get_by_name("missing").await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_put_rejects_version_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        let tool = sample("greet", "Render a friendly greeting string");
        store.put(tool.clone()).await.unwrap();

        // Same version again
        let err = store.put(tool.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            ToolError::VersionConflict {
                expected: 2,
                actual: 1,
                ..
            }
        ));

        // Skipping a version
        let mut skipped = tool.next_revision(
            tool.description.clone(),
            tool.source_code.clone(),
            Vec::new(),
        );
        skipped.version = 5;
        let err = store.put(skipped).await.unwrap_err();
        assert!(matches!(err, ToolError::VersionConflict { .. }));

        // The proper next revision lands
        let revised = tool.next_revision(
            "Render a cheerful greeting string",
            "function greet() return 2 end",
            Vec::new(),
        );
        store.put(revised).await.unwrap();
        assert_eq!(store.get_by_name("greet").await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_persistence_across_reload() {
        let dir = TempDir::new().unwrap();

        {
            let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();
            store
                .put(sample("greet", "Render a friendly greeting string"))
                .await
                .unwrap();
        }

        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();
        let loaded = store.get_by_name("greet").await.unwrap();
        assert_eq!(loaded.version, 1);

        // The reloaded index answers similarity queries too.
        let similar = store
            .find_similar("render a greeting string", 1)
            .await
            .unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].tool.name, "greet");
    }

    #[tokio::test]
    async fn test_find_similar_orders_by_distance() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        store
            .put(sample(
                "calculate_average",
                "Calculate the average of a list of numbers",
            ))
            .await
            .unwrap();
        store
            .put(sample("parse_csv", "Parse a csv line into separate fields"))
            .await
            .unwrap();
        store
            .put(sample(
                "reverse_string",
                "Reverse the characters of a string",
            ))
            .await
            .unwrap();

        let results = store
            .find_similar("calculate the average of a list of numbers", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool.name, "calculate_average");
        assert!(results[0].distance <= results[1].distance);
        assert!(results[0].distance < 0.5);
    }

    #[tokio::test]
    async fn test_find_similar_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        let results = store.find_similar("anything", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_append_error_keeps_version_and_persists() {
        let dir = TempDir::new().unwrap();

        {
            let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();
            store
                .put(sample("greet", "Render a friendly greeting string"))
                .await
                .unwrap();
            store
                .append_error("greet", ErrorRecord::new(1, "attempt to call a nil value"))
                .await
                .unwrap();

            let tool = store.get_by_name("greet").await.unwrap();
            assert_eq!(tool.version, 1);
            assert_eq!(tool.error_log.len(), 1);
        }

        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();
        let tool = store.get_by_name("greet").await.unwrap();
        assert_eq!(tool.error_log.len(), 1);
        assert_eq!(tool.error_log[0].summary, "attempt to call a nil value");
    }

    #[tokio::test]
    async fn test_history_tracks_every_revision() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        let tool = sample("greet", "Render a friendly greeting string");
        store.put(tool.clone()).await.unwrap();
        store
            .put(tool.next_revision(
                "Render a cheerful greeting string",
                "function greet() return 2 end",
                Vec::new(),
            ))
            .await
            .unwrap();

        let history = store.history("greet").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[1].version, 2);
        assert_eq!(history[1].source_code, "function greet() return 2 end");
    }

    #[tokio::test]
    async fn test_list_returns_latest_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        let store = LocalToolStore::new(dir.path(), provider()).await.unwrap();

        store
            .put(sample("zip_fields", "Zip two lists into pairs"))
            .await
            .unwrap();
        store
            .put(sample("add_numbers", "Add two numbers together"))
            .await
            .unwrap();

        let tools = store.list().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "add_numbers");
        assert_eq!(tools[1].name, "zip_fields");
    }
}
