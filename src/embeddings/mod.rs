// Embedding manager: the process-wide owner of the embedding model and the
// device it lives on.
//
// The model loads lazily on first use, unloads after a configurable idle
// period, and reloads transparently on the next request. A single async
// mutex guards the model so exactly one batch runs at a time and the idle
// unload can never race an in-flight encode.
//
// MILLER_DISABLE_EMBEDDINGS=1 makes every load attempt fail fast; callers
// already treat embedding failures as a degraded-but-valid state.

mod model_manager;
mod ort_model;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::extractors::Symbol;

pub use model_manager::{ModelManager, ModelPaths};
pub use ort_model::{DeviceKind, OrtEmbeddingModel};

pub const EMBEDDING_DIMENSIONS: usize = 384;
pub const DEFAULT_MODEL: &str = "bge-small";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Which transform to apply to the text before encoding. BGE models want an
/// instruction prefix on the query side; document and code-to-code
/// similarity embeddings use the raw text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    Document,
    Query,
    Similarity,
}

const QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

struct Inner {
    model: Option<OrtEmbeddingModel>,
    last_use: Option<Instant>,
}

pub struct EmbeddingManager {
    model_name: String,
    models: ModelManager,
    idle_timeout: Duration,
    inner: Mutex<Inner>,
}

impl EmbeddingManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        Self::with_idle_timeout(cache_dir, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(cache_dir: PathBuf, idle_timeout: Duration) -> Result<Self> {
        Ok(Self {
            model_name: DEFAULT_MODEL.to_string(),
            models: ModelManager::new(cache_dir)?,
            idle_timeout,
            inner: Mutex::new(Inner {
                model: None,
                last_use: None,
            }),
        })
    }

    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    async fn ensure_loaded(&self, inner: &mut Inner) -> Result<()> {
        if inner.model.is_some() {
            return Ok(());
        }
        if std::env::var("MILLER_DISABLE_EMBEDDINGS").map(|v| v == "1").unwrap_or(false) {
            anyhow::bail!("embeddings disabled via MILLER_DISABLE_EMBEDDINGS");
        }
        let paths = self.models.ensure_model_downloaded(&self.model_name).await?;
        let model = OrtEmbeddingModel::new(&paths.model, &paths.tokenizer, &self.model_name)?;
        info!(model = %self.model_name, device = model.device().as_str(), "embedding model loaded");
        inner.model = Some(model);
        Ok(())
    }

    fn apply_task(task: EmbeddingTask, text: &str) -> String {
        match task {
            EmbeddingTask::Query => format!("{QUERY_INSTRUCTION}{text}"),
            EmbeddingTask::Document | EmbeddingTask::Similarity => text.to_string(),
        }
    }

    /// Encode a batch of texts, chunked to the device's batch size.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        inner.last_use = Some(Instant::now());

        let model = inner.model.as_mut().expect("model loaded above");
        let batch_size = model.device().default_batch_size();

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            let prepared: Vec<String> = chunk.iter().map(|t| Self::apply_task(task, t)).collect();
            embeddings.extend(model.encode_batch(prepared)?);
        }
        inner.last_use = Some(Instant::now());
        Ok(embeddings)
    }

    /// Encode a single query-side text.
    pub async fn embed_query(&self, text: &str, task: EmbeddingTask) -> Result<Vec<f32>> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        inner.last_use = Some(Instant::now());
        let model = inner.model.as_mut().expect("model loaded above");
        model.encode_single(Self::apply_task(task, text))
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.lock().await.model.is_some()
    }

    /// Drop the model, freeing device memory. The next embed call reloads.
    pub async fn unload(&self) {
        let mut inner = self.inner.lock().await;
        if inner.model.take().is_some() {
            info!("embedding model unloaded");
        }
        inner.last_use = None;
    }

    /// Explicitly load the model back onto the device.
    pub async fn reload(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_loaded(&mut inner).await?;
        inner.last_use = Some(Instant::now());
        Ok(())
    }

    /// Seconds since the model was last used, if it is loaded.
    pub async fn idle_for_seconds(&self) -> Option<u64> {
        let inner = self.inner.lock().await;
        match (&inner.model, inner.last_use) {
            (Some(_), Some(last)) => Some(last.elapsed().as_secs()),
            (Some(_), None) => Some(0),
            _ => None,
        }
    }

    /// Unload if the model has sat idle past the timeout. The cleanup task
    /// calls this on a timer; holding the same lock as the encode path means
    /// it can never yank the model out from under a running batch.
    pub async fn maybe_unload_idle(&self) -> bool {
        let mut inner = self.inner.lock().await;
        let idle = match (&inner.model, inner.last_use) {
            (Some(_), Some(last)) => last.elapsed() >= self.idle_timeout,
            (Some(_), None) => true,
            _ => false,
        };
        if idle {
            inner.model = None;
            inner.last_use = None;
            debug!("embedding model unloaded after idle timeout");
        }
        idle
    }

    pub async fn device(&self) -> Option<DeviceKind> {
        self.inner.lock().await.model.as_ref().map(|m| m.device())
    }

    pub async fn batch_size(&self) -> Option<usize> {
        self.inner
            .lock()
            .await
            .model
            .as_ref()
            .map(|m| m.device().default_batch_size())
    }
}

/// The stable embedding text for a symbol: doc comment plus signature when
/// either exists, otherwise "{kind} {name}". Truncation to the model's max
/// sequence length happens in the tokenizer.
pub fn embedding_text(symbol: &Symbol) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(doc) = symbol.doc_comment.as_deref() {
        if !doc.is_empty() {
            parts.push(doc);
        }
    }
    if let Some(signature) = symbol.signature.as_deref() {
        if !signature.is_empty() {
            parts.push(signature);
        }
    }
    if parts.is_empty() {
        format!("{} {}", symbol.kind.as_str(), symbol.name)
    } else {
        parts.join("\n")
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::SymbolKind;

    fn symbol_with(signature: Option<&str>, doc: Option<&str>) -> Symbol {
        let mut symbol = Symbol::new(
            "fetch_user".into(),
            SymbolKind::Function,
            "python".into(),
            "svc.py".into(),
            1,
            0,
            5,
            0,
            0,
            100,
        );
        symbol.signature = signature.map(String::from);
        symbol.doc_comment = doc.map(String::from);
        symbol
    }

    #[test]
    fn embedding_text_prefers_doc_and_signature() {
        let full = symbol_with(Some("def fetch_user(id):"), Some("Load a user by id."));
        assert_eq!(
            embedding_text(&full),
            "Load a user by id.\ndef fetch_user(id):"
        );

        let sig_only = symbol_with(Some("def fetch_user(id):"), None);
        assert_eq!(embedding_text(&sig_only), "def fetch_user(id):");

        let bare = symbol_with(None, None);
        assert_eq!(embedding_text(&bare), "function fetch_user");
    }

    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn manager_starts_unloaded() {
        let temp = tempfile::tempdir().unwrap();
        let manager = EmbeddingManager::new(temp.path().to_path_buf()).unwrap();
        assert!(!manager.is_loaded().await);
        assert_eq!(manager.idle_for_seconds().await, None);
        assert!(!manager.maybe_unload_idle().await);
        // Unloading an unloaded manager is a no-op
        manager.unload().await;
        assert!(!manager.is_loaded().await);
    }
}
