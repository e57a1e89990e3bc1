// fast_search / fast_search_multi: the hybrid retrieval surface.
//
// Method auto-detection routes queries with code-idiom characters to the
// pattern index and everything else to hybrid (text + semantic fused by
// RRF). A text search with zero hits transparently retries as semantic --
// before filters are applied. Optional cross-encoder rerank re-scores the
// top candidates; optional expansion decorates each hit with callers and
// callees from the relationship graph.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extractors::RelationshipKind;
use crate::state::{ServerState, WorkspaceHandle};
use crate::vector_store::{SearchFilters, SearchHit};

use super::shared::{
    OutputFormat, ToolOutput, default_primary, default_text, default_true, toonable_result,
    wait_for_storage, wait_for_vectors,
};

const RERANK_CANDIDATE_CAP: usize = 100;
const TOON_THRESHOLD: usize = 20;

fn default_auto() -> String {
    "auto".to_string()
}

fn default_limit() -> usize {
    20
}

fn default_expand_limit() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FastSearchTool {
    pub query: String,
    /// "auto" | "text" | "pattern" | "semantic" | "hybrid"
    #[serde(default = "default_auto")]
    pub method: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_primary")]
    pub workspace: String,
    #[serde(default = "default_text")]
    pub output_format: String,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default)]
    pub expand: bool,
    #[serde(default = "default_expand_limit")]
    pub expand_limit: usize,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub file_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultEntry {
    pub name: String,
    pub kind: String,
    pub language: String,
    pub file_path: String,
    pub start_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callees: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct FastSearchResult {
    tool: &'static str,
    query: String,
    method: String,
    total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    results: Vec<SearchResultEntry>,
}

/// Flat row for TOON mode.
#[derive(Debug, Serialize)]
struct ToonRow {
    name: String,
    kind: String,
    file: String,
    line: u32,
    score: f32,
}

/// Queries containing code-idiom characters route to the pattern index;
/// plain prose goes hybrid.
pub fn detect_search_method(query: &str) -> &'static str {
    for pattern in ["=>", "?.", "&&"] {
        if query.contains(pattern) {
            return "pattern";
        }
    }
    for ch in [':', '<', '>', '[', ']', '(', ')', '{', '}'] {
        if query.contains(ch) {
            return "pattern";
        }
    }
    "hybrid"
}

/// The shared search pipeline; fast_search_multi reuses it per workspace.
pub(super) struct SearchOutcome {
    pub method: String,
    pub hits: Vec<SearchHit>,
    pub note: Option<String>,
}

pub(super) async fn run_search(
    state: &ServerState,
    handle: &WorkspaceHandle,
    query: &str,
    method: &str,
    fetch_limit: usize,
    filters: &SearchFilters,
) -> Result<SearchOutcome> {
    let method = if method == "auto" {
        detect_search_method(query)
    } else {
        method
    };

    let mut note = None;
    let mut method_used = method.to_string();

    // Query-side embedding; absence degrades rather than fails
    let embed_query = || async {
        match state
            .embeddings
            .embed_query(query, crate::embeddings::EmbeddingTask::Query)
            .await
        {
            Ok(vector) => Some(vector),
            Err(e) => {
                debug!(error = %e, "query embedding unavailable");
                None
            }
        }
    };

    let hits = match method {
        "pattern" => {
            let store = handle.vectors.lock().await;
            store.search_pattern(query, fetch_limit)?
        }
        "semantic" => match embed_query().await {
            Some(vector) => {
                let store = handle.vectors.lock().await;
                store.search_semantic(&vector, fetch_limit, 0.0)?
            }
            None => {
                note = Some("semantic search unavailable".to_string());
                Vec::new()
            }
        },
        "text" => {
            let text_hits = {
                let store = handle.vectors.lock().await;
                store.search_text(query, fetch_limit)?
            };
            // Zero text hits fall back to semantic, before filtering
            if text_hits.is_empty() {
                match embed_query().await {
                    Some(vector) => {
                        method_used = "semantic".to_string();
                        let store = handle.vectors.lock().await;
                        store.search_semantic(&vector, fetch_limit, 0.0)?
                    }
                    None => {
                        note = Some("semantic fallback unavailable".to_string());
                        text_hits
                    }
                }
            } else {
                text_hits
            }
        }
        _ => {
            let vector = embed_query().await;
            if vector.is_none() {
                note = Some("semantic search unavailable; results are text-only".to_string());
            }
            let store = handle.vectors.lock().await;
            store.search_hybrid(query, vector.as_deref(), fetch_limit)?
        }
    };

    Ok(SearchOutcome {
        method: method_used,
        hits: filters.apply(hits),
        note,
    })
}

impl FastSearchTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        if matches!(self.method.as_str(), "text" | "pattern") {
            wait_for_storage(state).await?;
        } else {
            wait_for_vectors(state).await?;
        }
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let filters = SearchFilters {
            language: self.language.clone(),
            file_pattern: self.file_pattern.clone(),
            kind: None,
        };
        let fetch_limit = (self.limit * 2).clamp(self.limit, RERANK_CANDIDATE_CAP);
        let mut outcome =
            run_search(state, &handle, &self.query, &self.method, fetch_limit, &filters).await?;

        if self.rerank {
            outcome.hits = state.reranker.rerank(&self.query, outcome.hits).await;
        }
        outcome.hits.truncate(self.limit);

        let mut entries = to_entries(&outcome.hits, None);
        if self.expand {
            expand_entries(&handle, &mut entries, &outcome.hits, self.expand_limit).await?;
        }

        render(&self.query, &outcome, entries, OutputFormat::parse(&self.output_format))
    }
}

fn default_workspaces() -> Option<Vec<String>> {
    None
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FastSearchMultiTool {
    pub query: String,
    /// Workspace IDs to search; all registered workspaces when omitted
    #[serde(default = "default_workspaces")]
    pub workspaces: Option<Vec<String>>,
    #[serde(default = "default_auto")]
    pub method: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_text")]
    pub output_format: String,
    #[serde(default = "default_true")]
    pub rerank: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub file_pattern: Option<String>,
}

impl FastSearchMultiTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_vectors(state).await?;

        let targets: Vec<String> = match &self.workspaces {
            Some(ids) => ids.clone(),
            None => {
                let registry = state.registry.lock().await;
                registry
                    .list_workspaces()
                    .iter()
                    .map(|w| w.workspace_id.clone())
                    .collect()
            }
        };

        let filters = SearchFilters {
            language: self.language.clone(),
            file_pattern: self.file_pattern.clone(),
            kind: None,
        };

        let mut entries: Vec<SearchResultEntry> = Vec::new();
        let mut method_used = self.method.clone();
        let mut note = None;
        for workspace_id in &targets {
            let handle = match state.resolve_workspace(workspace_id).await {
                Ok(handle) => handle,
                Err(_) => continue, // unknown workspace in the list; skip
            };
            let mut outcome = run_search(
                state,
                &handle,
                &self.query,
                &self.method,
                self.limit,
                &filters,
            )
            .await?;
            if self.rerank {
                outcome.hits = state.reranker.rerank(&self.query, outcome.hits).await;
            }
            outcome.hits.truncate(self.limit);
            method_used = outcome.method.clone();
            note = note.or(outcome.note);
            entries.extend(to_entries(&outcome.hits, Some(workspace_id.clone())));
        }

        entries.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(self.limit);

        let outcome = SearchOutcome {
            method: method_used,
            hits: Vec::new(),
            note,
        };
        render(&self.query, &outcome, entries, OutputFormat::parse(&self.output_format))
    }
}

fn to_entries(hits: &[SearchHit], workspace: Option<String>) -> Vec<SearchResultEntry> {
    hits.iter()
        .map(|hit| SearchResultEntry {
            name: hit.name.clone(),
            kind: hit.kind.clone(),
            language: hit.language.clone(),
            file_path: hit.file_path.clone(),
            start_line: hit.start_line,
            signature: hit.signature.clone(),
            score: hit.score,
            workspace: workspace.clone(),
            callers: None,
            callees: None,
        })
        .collect()
}

/// Decorate each entry with up to `expand_limit` callers and callees.
async fn expand_entries(
    handle: &WorkspaceHandle,
    entries: &mut [SearchResultEntry],
    hits: &[SearchHit],
    expand_limit: usize,
) -> Result<()> {
    let db = handle.db.lock().await;
    for (entry, hit) in entries.iter_mut().zip(hits) {
        let incoming = db.incoming(&hit.symbol_id, &[RelationshipKind::Call])?;
        let caller_ids: Vec<String> = incoming
            .iter()
            .take(expand_limit)
            .map(|r| r.from_symbol_id.clone())
            .collect();
        let callers: Vec<String> = db
            .get_symbols_by_ids(&caller_ids)?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let outgoing = db.outgoing(&hit.symbol_id, &[RelationshipKind::Call])?;
        let callee_ids: Vec<String> = outgoing
            .iter()
            .take(expand_limit)
            .map(|r| r.to_symbol_id.clone())
            .collect();
        let callees: Vec<String> = db
            .get_symbols_by_ids(&callee_ids)?
            .into_iter()
            .map(|s| s.name)
            .collect();

        if !callers.is_empty() {
            entry.callers = Some(callers);
        }
        if !callees.is_empty() {
            entry.callees = Some(callees);
        }
    }
    Ok(())
}

fn render(
    query: &str,
    outcome: &SearchOutcome,
    entries: Vec<SearchResultEntry>,
    format: OutputFormat,
) -> Result<ToolOutput> {
    let text = format_text(query, &outcome.method, outcome.note.as_deref(), &entries);
    let toon_rows: Vec<ToonRow> = entries
        .iter()
        .map(|e| ToonRow {
            name: e.name.clone(),
            kind: e.kind.clone(),
            file: e.file_path.clone(),
            line: e.start_line,
            score: e.score,
        })
        .collect();
    let count = entries.len();
    let result = FastSearchResult {
        tool: "fast_search",
        query: query.to_string(),
        method: outcome.method.clone(),
        total: count,
        note: outcome.note.clone(),
        results: entries,
    };
    toonable_result(
        &result,
        &toon_rows,
        format,
        TOON_THRESHOLD,
        count,
        Some(text),
        "fast_search",
    )
}

fn format_text(
    query: &str,
    method: &str,
    note: Option<&str>,
    entries: &[SearchResultEntry],
) -> String {
    if entries.is_empty() {
        let mut out = format!("No results for '{query}' ({method})");
        if let Some(note) = note {
            out.push_str(&format!("\nnote: {note}"));
        }
        return out;
    }
    let mut lines = Vec::with_capacity(entries.len() + 2);
    lines.push(format!("{} results for '{query}' ({method})", entries.len()));
    if let Some(note) = note {
        lines.push(format!("note: {note}"));
    }
    for entry in entries {
        let mut line = format!(
            "{}:{}: {} [{}]",
            entry.file_path, entry.start_line, entry.name, entry.kind
        );
        if let Some(signature) = &entry.signature {
            line.push_str(&format!(" {signature}"));
        }
        if let Some(workspace) = &entry.workspace {
            line.push_str(&format!(" ({workspace})"));
        }
        if let Some(callers) = &entry.callers {
            line.push_str(&format!("\n    callers: {}", callers.join(", ")));
        }
        if let Some(callees) = &entry.callees {
            line.push_str(&format!("\n    callees: {}", callees.join(", ")));
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detection_routes_code_idioms_to_pattern() {
        assert_eq!(detect_search_method(": BaseClass"), "pattern");
        assert_eq!(detect_search_method("ILogger<UserService>"), "pattern");
        assert_eq!(detect_search_method("[Fact]"), "pattern");
        assert_eq!(detect_search_method("items?.map"), "pattern");
        assert_eq!(detect_search_method("a && b"), "pattern");
        assert_eq!(detect_search_method("authentication logic"), "hybrid");
        assert_eq!(detect_search_method("error handling"), "hybrid");
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let tool: FastSearchTool = serde_json::from_str(r#"{"query": "foo"}"#).unwrap();
        assert_eq!(tool.method, "auto");
        assert_eq!(tool.limit, 20);
        assert_eq!(tool.workspace, "primary");
        assert_eq!(tool.output_format, "text");
        assert!(tool.rerank);
        assert!(!tool.expand);
        assert_eq!(tool.expand_limit, 5);
    }
}
