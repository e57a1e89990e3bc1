// Model download and caching via the HuggingFace Hub. The hub client skips
// the download when files are already in the cache directory.

use anyhow::{Context, Result};
use hf_hub::api::tokio::{Api, ApiBuilder};
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths to the files a loaded model needs.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub tokenizer: PathBuf,
}

pub struct ModelManager {
    cache_dir: PathBuf,
    api: Api,
}

impl ModelManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create model cache directory {cache_dir:?}"))?;
        let api = ApiBuilder::new()
            .with_cache_dir(cache_dir.clone())
            .build()
            .context("failed to create HuggingFace API client")?;
        Ok(Self { cache_dir, api })
    }

    /// Ensure the named model is on disk and return its file paths.
    pub async fn ensure_model_downloaded(&self, model_name: &str) -> Result<ModelPaths> {
        match model_name {
            "bge-small" | "bge-small-en-v1.5" => self.download_bge_small().await,
            other => anyhow::bail!("unsupported embedding model: {other}"),
        }
    }

    async fn download_bge_small(&self) -> Result<ModelPaths> {
        let repo_id = "BAAI/bge-small-en-v1.5";
        let repo = self.api.model(repo_id.to_string());

        info!("ensuring BGE-Small-EN-V1.5 model is available (first run downloads ~130MB)");
        let model = repo
            .get("onnx/model.onnx")
            .await
            .with_context(|| format!("failed to download model.onnx from {repo_id}"))?;
        let tokenizer = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("failed to download tokenizer.json from {repo_id}"))?;

        if !model.exists() || !tokenizer.exists() {
            anyhow::bail!("model files missing after download from {repo_id}");
        }
        Ok(ModelPaths { model, tokenizer })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_cache_directory() {
        let temp = tempdir().unwrap();
        let cache = temp.path().join("models");
        let manager = ModelManager::new(cache.clone()).unwrap();
        assert_eq!(manager.cache_dir(), cache);
        assert!(cache.exists());
    }

    #[tokio::test]
    async fn rejects_unknown_model() {
        let temp = tempdir().unwrap();
        let manager = ModelManager::new(temp.path().to_path_buf()).unwrap();
        let result = manager.ensure_model_downloaded("not-a-model").await;
        assert!(result.is_err());
    }

    // The actual download needs the network; exercised manually.
    #[tokio::test]
    #[ignore]
    async fn downloads_bge_small() {
        let temp = tempdir().unwrap();
        let manager = ModelManager::new(temp.path().to_path_buf()).unwrap();
        let paths = manager.ensure_model_downloaded("bge-small").await.unwrap();
        assert!(paths.model.exists());
        assert!(paths.tokenizer.exists());
    }
}
