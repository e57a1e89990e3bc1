// find_similar_implementation: check whether the code you are about to
// write already exists. The snippet embeds with the code-to-code similarity
// task and nearest symbols above the score floor come back with previews.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingTask;
use crate::state::ServerState;
use crate::vector_store::SearchFilters;

use super::shared::{ToolOutput, default_primary, wait_for_vectors};

fn default_limit() -> usize {
    10
}

fn default_min_score() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FindSimilarTool {
    pub code_snippet: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default)]
    pub language: Option<String>,
    /// Restrict to symbol kinds, e.g. ["function", "method"]
    #[serde(default)]
    pub kind_filter: Option<Vec<String>>,
    #[serde(default = "default_primary")]
    pub workspace: String,
}

impl FindSimilarTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_vectors(state).await?;
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let query_vector = match state
            .embeddings
            .embed_query(&self.code_snippet, EmbeddingTask::Similarity)
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                return Ok(ToolOutput::Text(format!(
                    "Similarity search unavailable: embeddings could not load ({e})"
                )));
            }
        };

        let filters = SearchFilters {
            language: self.language.clone(),
            file_pattern: None,
            kind: None,
        };
        let mut hits = {
            let store = handle.vectors.lock().await;
            store.search_semantic(&query_vector, self.limit * 2, self.min_score)?
        };
        hits = filters.apply(hits);
        if let Some(kinds) = &self.kind_filter {
            let wanted: Vec<String> = kinds.iter().map(|k| k.to_lowercase()).collect();
            hits.retain(|hit| wanted.contains(&hit.kind.to_lowercase()));
        }
        hits.truncate(self.limit);

        if hits.is_empty() {
            return Ok(ToolOutput::Text(format!(
                "No similar implementations found with score >= {:.2}.\n\
                 This pattern may be new here, or try lowering min_score.",
                self.min_score
            )));
        }

        let mut lines = vec![
            format!("Found {} similar implementations", hits.len()),
            String::new(),
        ];
        for (i, hit) in hits.iter().enumerate() {
            let pct = hit.score * 100.0;
            let filled = (pct / 10.0) as usize;
            let bar: String = "#".repeat(filled.min(10)) + &"-".repeat(10usize.saturating_sub(filled));
            lines.push(format!("--- result {} ---", i + 1));
            lines.push(format!("score: {pct:.1}% [{bar}]"));
            lines.push(format!("symbol: {} ({})", hit.name, hit.kind));
            lines.push(format!("location: {}:{}", hit.file_path, hit.start_line));
            if let Some(signature) = &hit.signature {
                lines.push(format!("signature: {}", ellipsize(signature, 100)));
            }
            if let Some(doc) = &hit.doc {
                if let Some(first_line) = doc.lines().next() {
                    lines.push(format!("doc: {}", ellipsize(first_line, 80)));
                }
            }
            lines.push(String::new());
        }

        if hits[0].score >= 0.8 {
            lines.push("High similarity found; consider reusing or extending existing code.".into());
        } else if hits[0].score >= 0.6 {
            lines.push("Similar patterns exist; review before implementing.".into());
        } else {
            lines.push("Some related code found; may serve as reference.".into());
        }

        Ok(ToolOutput::Text(lines.join("\n")))
    }
}

/// Cap a line for the preview, counting chars so multibyte text never
/// splits mid-character.
fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipsize_is_char_boundary_safe() {
        let plain = "a".repeat(120);
        let capped = ellipsize(&plain, 100);
        assert_eq!(capped.chars().count(), 100);
        assert!(capped.ends_with("..."));

        // Multibyte chars straddling the old byte cutoffs must not panic
        let accented = "é".repeat(120);
        let capped = ellipsize(&accented, 100);
        assert!(capped.ends_with("..."));
        assert_eq!(capped.chars().count(), 100);

        assert_eq!(ellipsize("short", 100), "short");
    }

    #[test]
    fn defaults_match_tool_surface() {
        let tool: FindSimilarTool =
            serde_json::from_str(r#"{"code_snippet": "def f(): pass"}"#).unwrap();
        assert_eq!(tool.limit, 10);
        assert_eq!(tool.min_score, 0.5);
        assert!(tool.language.is_none());
        assert!(tool.kind_filter.is_none());
    }
}
