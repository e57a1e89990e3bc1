// Cross-encoder re-ranking. Scores (query, candidate) pairs jointly, which
// beats bi-encoder ranking when it is available -- and it is allowed to not
// be. Load failure flips a sticky flag and every rerank call becomes a
// transparent pass-through of the original ordering; a rerank problem must
// never surface as a tool error.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array2, Axis};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::vector_store::SearchHit;

pub const DEFAULT_RERANKER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L6-v2";
pub const RERANKER_MODEL_ENV: &str = "MILLER_RERANKER_MODEL";

const DOC_TRUNCATE: usize = 500;

enum LoadState {
    NotLoaded,
    Loaded(Box<CrossEncoderModel>),
    Failed,
}

pub struct ReRanker {
    model_name: String,
    cache_dir: PathBuf,
    state: Mutex<LoadState>,
}

impl ReRanker {
    /// Model comes from MILLER_RERANKER_MODEL when set, else the default.
    pub fn new(cache_dir: PathBuf) -> Self {
        let model_name = std::env::var(RERANKER_MODEL_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_RERANKER_MODEL.to_string());
        Self {
            model_name,
            cache_dir,
            state: Mutex::new(LoadState::NotLoaded),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn ensure_loaded(&self, state: &mut LoadState) -> bool {
        match state {
            LoadState::Loaded(_) => true,
            LoadState::Failed => false,
            LoadState::NotLoaded => {
                match CrossEncoderModel::load(&self.model_name, &self.cache_dir).await {
                    Ok(model) => {
                        info!(model = %self.model_name, "cross-encoder loaded");
                        *state = LoadState::Loaded(Box::new(model));
                        true
                    }
                    Err(e) => {
                        warn!(model = %self.model_name, error = %e, "cross-encoder unavailable, rerank disabled");
                        *state = LoadState::Failed;
                        false
                    }
                }
            }
        }
    }

    pub async fn is_available(&self) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await
    }

    /// Candidate text for scoring: name, signature and the first 500 chars
    /// of the doc comment.
    fn candidate_text(hit: &SearchHit) -> String {
        let mut parts = vec![hit.name.clone()];
        if let Some(signature) = &hit.signature {
            parts.push(signature.clone());
        }
        if let Some(doc) = &hit.doc {
            let truncated: String = doc.chars().take(DOC_TRUNCATE).collect();
            parts.push(truncated);
        }
        parts.join(" ")
    }

    /// Re-score and re-sort hits. On any failure the input order comes back
    /// untouched.
    pub async fn rerank(&self, query: &str, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        if hits.is_empty() {
            return hits;
        }
        let mut state = self.state.lock().await;
        if !self.ensure_loaded(&mut state).await {
            return hits;
        }
        let LoadState::Loaded(model) = &mut *state else {
            return hits;
        };

        let texts: Vec<String> = hits.iter().map(Self::candidate_text).collect();
        match model.score_pairs(query, &texts) {
            Ok(scores) => {
                let mut rescored: Vec<SearchHit> = hits
                    .into_iter()
                    .zip(scores)
                    .map(|(mut hit, score)| {
                        hit.score = score;
                        hit
                    })
                    .collect();
                rescored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                rescored
            }
            Err(e) => {
                debug!(error = %e, "rerank scoring failed, returning original order");
                hits
            }
        }
    }
}

struct CrossEncoderModel {
    session: Session,
    tokenizer: Tokenizer,
}

impl CrossEncoderModel {
    async fn load(model_name: &str, cache_dir: &PathBuf) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create reranker cache {cache_dir:?}"))?;
        let api = hf_hub::api::tokio::ApiBuilder::new()
            .with_cache_dir(cache_dir.clone())
            .build()
            .context("failed to create HuggingFace API client")?;
        let repo = api.model(model_name.to_string());
        let model_path = repo
            .get("onnx/model.onnx")
            .await
            .with_context(|| format!("failed to download onnx/model.onnx from {model_name}"))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("failed to download tokenizer.json from {model_name}"))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load reranker tokenizer: {e}"))?;
        use tokenizers::{PaddingParams, TruncationParams};
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: 512,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to configure reranker truncation: {e}"))?;

        let session = Session::builder()
            .context("failed to create reranker SessionBuilder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(&model_path)
            .with_context(|| format!("failed to load reranker model from {model_path:?}"))?;

        Ok(Self { session, tokenizer })
    }

    fn score_pairs(&mut self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let pairs: Vec<tokenizers::EncodeInput> = candidates
            .iter()
            .map(|text| (query.to_string(), text.clone()).into())
            .collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| anyhow::anyhow!("failed to tokenize rerank pairs: {e}"))?;

        let batch_size = encodings.len();
        let seq_length = encodings[0].len();
        let mut input_ids = Vec::with_capacity(batch_size * seq_length);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_length);
        let mut token_type_ids = Vec::with_capacity(batch_size * seq_length);
        for encoding in &encodings {
            input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
            token_type_ids.extend(encoding.get_type_ids().iter().map(|&t| t as i64));
        }

        let input_ids = Array2::from_shape_vec((batch_size, seq_length), input_ids)?;
        let attention_mask = Array2::from_shape_vec((batch_size, seq_length), attention_mask)?;
        let token_type_ids = Array2::from_shape_vec((batch_size, seq_length), token_type_ids)?;

        let outputs = self
            .session
            .run(ort::inputs![
                "input_ids" => Tensor::from_array(input_ids)?,
                "attention_mask" => Tensor::from_array(attention_mask)?,
                "token_type_ids" => Tensor::from_array(token_type_ids)?,
            ])
            .map_err(|e| anyhow::anyhow!("reranker inference failed: {e}"))?;

        let logits = outputs["logits"]
            .try_extract_array::<f32>()
            .context("failed to extract reranker logits")?;

        let scores = (0..batch_size)
            .map(|i| logits.index_axis(Axis(0), i).iter().copied().next().unwrap_or(0.0))
            .collect();
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(symbol_id: &str, score: f32) -> SearchHit {
        SearchHit {
            symbol_id: symbol_id.into(),
            name: symbol_id.into(),
            kind: "function".into(),
            file_path: "a.py".into(),
            start_line: 1,
            signature: None,
            doc: None,
            language: "python".into(),
            score,
        }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn unavailable_model_is_a_pass_through() {
        // Point the cache at a temp dir and use a model name that cannot
        // resolve; the first rerank attempt flips the sticky failure flag.
        let temp = tempfile::tempdir().unwrap();
        std::env::set_var(RERANKER_MODEL_ENV, "miller-test/definitely-not-a-model");
        let reranker = ReRanker::new(temp.path().to_path_buf());
        std::env::remove_var(RERANKER_MODEL_ENV);

        let hits = vec![hit("a", 0.9), hit("b", 0.5)];
        let out = reranker.rerank("query", hits.clone()).await;
        let ids: Vec<_> = out.iter().map(|h| h.symbol_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(!reranker.is_available().await);
    }

    #[test]
    fn candidate_text_truncates_doc() {
        let mut candidate = hit("a", 0.0);
        candidate.signature = Some("def a():".into());
        candidate.doc = Some("x".repeat(1000));
        let text = ReRanker::candidate_text(&candidate);
        assert!(text.len() < 1000);
        assert!(text.starts_with("a def a():"));
    }
}
