// fast_explore / get_architecture_map: whole-codebase views.
//
// Explore modes return tagged variants, one schema per mode, rather than a
// loose map: type intelligence, similar implementations, dead-code
// candidates and hot spots. The architecture map aggregates relationship
// edges up to directory prefixes and emits the weighted graph.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::extractors::Symbol;
use crate::state::ServerState;

use super::shared::{
    OutputFormat, ToolOutput, default_primary, default_text, toonable_result, wait_for_storage,
    wait_for_vectors,
};

const TOON_THRESHOLD: usize = 10;

fn default_types() -> String {
    "types".to_string()
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FastExploreTool {
    /// "types" | "similar" | "dead_code" | "hot_spots"
    #[serde(default = "default_types")]
    pub mode: String,
    /// Required for types mode
    #[serde(default)]
    pub type_name: Option<String>,
    /// Required for similar mode
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_primary")]
    pub workspace: String,
    #[serde(default = "default_text")]
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolSummary {
    pub name: String,
    pub kind: String,
    pub language: String,
    pub file_path: String,
    pub start_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<&Symbol> for SymbolSummary {
    fn from(symbol: &Symbol) -> Self {
        Self {
            name: symbol.name.clone(),
            kind: symbol.kind.as_str().to_string(),
            language: symbol.language.clone(),
            file_path: symbol.file_path.clone(),
            start_line: symbol.start_line,
            signature: symbol.signature.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TypeHierarchy {
    pub parents: Vec<SymbolSummary>,
    pub children: Vec<SymbolSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarMatch {
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: u32,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct HotSpot {
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub references: i64,
}

/// Per-mode result schemas, tagged by mode.
#[derive(Debug, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExploreOutcome {
    Types {
        type_name: String,
        implementations: Vec<SymbolSummary>,
        hierarchy: TypeHierarchy,
        returns: Vec<SymbolSummary>,
        parameters: Vec<SymbolSummary>,
    },
    Similar {
        symbol: String,
        matches: Vec<SimilarMatch>,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    DeadCode {
        candidates: Vec<SymbolSummary>,
    },
    HotSpots {
        most_referenced: Vec<HotSpot>,
        busiest_files: Vec<(String, i64)>,
    },
}

impl FastExploreTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let outcome = match self.mode.as_str() {
            "types" => {
                let Some(type_name) = self.type_name.clone() else {
                    return Ok(ToolOutput::Text(
                        "types mode needs type_name (e.g. type_name=\"PaymentProcessor\")".into(),
                    ));
                };
                let db = handle.db.lock().await;
                let implementations = db
                    .implementations_of(&type_name, self.limit)?
                    .iter()
                    .map(SymbolSummary::from)
                    .collect();
                let (parents, children) = db.hierarchy(&type_name, self.limit)?;
                let returns = db
                    .returns_type(&type_name, self.limit)?
                    .iter()
                    .map(SymbolSummary::from)
                    .collect();
                let parameters = db
                    .parameters_of_type(&type_name, self.limit)?
                    .iter()
                    .map(SymbolSummary::from)
                    .collect();
                ExploreOutcome::Types {
                    type_name,
                    implementations,
                    hierarchy: TypeHierarchy {
                        parents: parents.iter().map(SymbolSummary::from).collect(),
                        children: children.iter().map(SymbolSummary::from).collect(),
                    },
                    returns,
                    parameters,
                }
            }
            "similar" => {
                let Some(symbol_name) = self.symbol.clone() else {
                    return Ok(ToolOutput::Text(
                        "similar mode needs symbol (e.g. symbol=\"getUserData\")".into(),
                    ));
                };
                wait_for_vectors(state).await?;
                self.similar_mode(state, &handle, &symbol_name).await?
            }
            "dead_code" => {
                let db = handle.db.lock().await;
                ExploreOutcome::DeadCode {
                    candidates: db
                        .unreferenced_symbols(self.limit)?
                        .iter()
                        .map(SymbolSummary::from)
                        .collect(),
                }
            }
            "hot_spots" => {
                let db = handle.db.lock().await;
                let most_referenced = db
                    .reference_counts(self.limit)?
                    .into_iter()
                    .map(|(symbol, references)| HotSpot {
                        name: symbol.name,
                        kind: symbol.kind.as_str().to_string(),
                        file_path: symbol.file_path,
                        references,
                    })
                    .collect();
                let mut busiest: Vec<(String, i64)> =
                    db.symbol_counts_by_file()?.into_iter().collect();
                busiest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                busiest.truncate(self.limit);
                ExploreOutcome::HotSpots {
                    most_referenced,
                    busiest_files: busiest,
                }
            }
            other => {
                return Ok(ToolOutput::Text(format!(
                    "Unknown explore mode '{other}' (use types, similar, dead_code or hot_spots)"
                )));
            }
        };

        let count = outcome_count(&outcome);
        let text = format_explore_text(&outcome);
        toonable_result(
            &outcome,
            &outcome,
            OutputFormat::parse(&self.output_format),
            TOON_THRESHOLD,
            count,
            Some(text),
            "fast_explore",
        )
    }

    async fn similar_mode(
        &self,
        state: &ServerState,
        handle: &crate::state::WorkspaceHandle,
        symbol_name: &str,
    ) -> Result<ExploreOutcome> {
        let sources = {
            let db = handle.db.lock().await;
            db.get_symbols_by_name(symbol_name)?
        };
        let Some(source) = sources.first() else {
            return Ok(ExploreOutcome::Similar {
                symbol: symbol_name.to_string(),
                matches: Vec::new(),
                note: Some("symbol not found".into()),
            });
        };

        let text = crate::embeddings::embedding_text(source);
        let vector = match state
            .embeddings
            .embed_query(&text, crate::embeddings::EmbeddingTask::Similarity)
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                return Ok(ExploreOutcome::Similar {
                    symbol: symbol_name.to_string(),
                    matches: Vec::new(),
                    note: Some(format!("embeddings unavailable: {e}")),
                });
            }
        };

        let hits = {
            let store = handle.vectors.lock().await;
            store.search_semantic(&vector, self.limit + 1, 0.5)?
        };
        let matches = hits
            .into_iter()
            .filter(|hit| hit.symbol_id != source.id)
            .take(self.limit)
            .map(|hit| SimilarMatch {
                name: hit.name,
                kind: hit.kind,
                file_path: hit.file_path,
                start_line: hit.start_line,
                score: hit.score,
            })
            .collect();
        Ok(ExploreOutcome::Similar {
            symbol: symbol_name.to_string(),
            matches,
            note: None,
        })
    }
}

fn outcome_count(outcome: &ExploreOutcome) -> usize {
    match outcome {
        ExploreOutcome::Types {
            implementations,
            hierarchy,
            returns,
            parameters,
            ..
        } => {
            implementations.len()
                + hierarchy.parents.len()
                + hierarchy.children.len()
                + returns.len()
                + parameters.len()
        }
        ExploreOutcome::Similar { matches, .. } => matches.len(),
        ExploreOutcome::DeadCode { candidates } => candidates.len(),
        ExploreOutcome::HotSpots {
            most_referenced, ..
        } => most_referenced.len(),
    }
}

fn format_explore_text(outcome: &ExploreOutcome) -> String {
    let mut lines = Vec::new();
    match outcome {
        ExploreOutcome::Types {
            type_name,
            implementations,
            hierarchy,
            returns,
            parameters,
        } => {
            lines.push(format!("Type intelligence for '{type_name}':"));
            push_section(&mut lines, "implementations", implementations);
            push_section(&mut lines, "parents", &hierarchy.parents);
            push_section(&mut lines, "children", &hierarchy.children);
            push_section(&mut lines, "returned by", returns);
            push_section(&mut lines, "accepted by", parameters);
        }
        ExploreOutcome::Similar {
            symbol,
            matches,
            note,
        } => {
            lines.push(format!("Symbols similar to '{symbol}':"));
            if let Some(note) = note {
                lines.push(format!("note: {note}"));
            }
            for m in matches {
                lines.push(format!(
                    "  {:.2} {} [{}] {}:{}",
                    m.score, m.name, m.kind, m.file_path, m.start_line
                ));
            }
        }
        ExploreOutcome::DeadCode { candidates } => {
            lines.push(format!("{} unreferenced symbols:", candidates.len()));
            for c in candidates {
                lines.push(format!("  {} [{}] {}:{}", c.name, c.kind, c.file_path, c.start_line));
            }
        }
        ExploreOutcome::HotSpots {
            most_referenced,
            busiest_files,
        } => {
            lines.push("Most referenced symbols:".to_string());
            for spot in most_referenced {
                lines.push(format!(
                    "  {} refs  {} [{}] {}",
                    spot.references, spot.name, spot.kind, spot.file_path
                ));
            }
            lines.push("Files with most symbols:".to_string());
            for (file, count) in busiest_files {
                lines.push(format!("  {count} symbols  {file}"));
            }
        }
    }
    lines.join("\n")
}

fn push_section(lines: &mut Vec<String>, title: &str, entries: &[SymbolSummary]) {
    lines.push(format!("{title} ({}):", entries.len()));
    for entry in entries {
        lines.push(format!(
            "  {} [{}] {}:{}",
            entry.name, entry.kind, entry.file_path, entry.start_line
        ));
    }
}

// ---------------------------------------------------------------------------

fn default_map_depth() -> usize {
    2
}

fn default_mermaid() -> String {
    "mermaid".to_string()
}

fn default_min_edge_count() -> usize {
    3
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetArchitectureMapTool {
    /// Directory-prefix depth for aggregation
    #[serde(default = "default_map_depth")]
    pub depth: usize,
    #[serde(default = "default_mermaid")]
    pub output_format: String,
    /// Edges below this weight are noise and dropped
    #[serde(default = "default_min_edge_count")]
    pub min_edge_count: usize,
    #[serde(default = "default_primary")]
    pub workspace: String,
}

#[derive(Debug, Serialize)]
pub struct ArchitectureEdge {
    pub from: String,
    pub to: String,
    pub weight: usize,
}

#[derive(Debug, Serialize)]
struct ArchitectureMapResult {
    tool: &'static str,
    depth: usize,
    min_edge_count: usize,
    nodes: Vec<String>,
    edges: Vec<ArchitectureEdge>,
}

impl GetArchitectureMapTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let raw_edges = {
            let db = handle.db.lock().await;
            db.edges_with_files()?
        };

        let mut weights: BTreeMap<(String, String), usize> = BTreeMap::new();
        for (from_file, to_file, _kind) in raw_edges {
            let from = dir_prefix(&from_file, self.depth);
            let to = dir_prefix(&to_file, self.depth);
            if from == to {
                continue;
            }
            *weights.entry((from, to)).or_default() += 1;
        }

        let edges: Vec<ArchitectureEdge> = weights
            .into_iter()
            .filter(|(_, weight)| *weight >= self.min_edge_count)
            .map(|((from, to), weight)| ArchitectureEdge { from, to, weight })
            .collect();

        let mut nodes: Vec<String> = edges
            .iter()
            .flat_map(|e| [e.from.clone(), e.to.clone()])
            .collect();
        nodes.sort();
        nodes.dedup();

        let result = ArchitectureMapResult {
            tool: "get_architecture_map",
            depth: self.depth,
            min_edge_count: self.min_edge_count,
            nodes,
            edges,
        };

        match OutputFormat::parse(&self.output_format) {
            OutputFormat::Json | OutputFormat::Toon | OutputFormat::Auto => {
                ToolOutput::json(&result)
            }
            _ => Ok(ToolOutput::Text(render_mermaid(&result))),
        }
    }
}

/// The first `depth` directory components of a path; files at the root map
/// to ".".
fn dir_prefix(path: &str, depth: usize) -> String {
    let components: Vec<&str> = path.split('/').collect();
    if components.len() <= 1 {
        return ".".to_string();
    }
    let dirs = &components[..components.len() - 1];
    let take = depth.clamp(1, dirs.len());
    dirs[..take].join("/")
}

fn render_mermaid(result: &ArchitectureMapResult) -> String {
    let mut lines = vec!["graph LR".to_string()];
    for node in &result.nodes {
        lines.push(format!("    {}[\"{}\"]", node_id(node), node));
    }
    for edge in &result.edges {
        lines.push(format!(
            "    {} -->|{}| {}",
            node_id(&edge.from),
            edge.weight,
            node_id(&edge.to)
        ));
    }
    lines.join("\n")
}

fn node_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_prefix_respects_depth() {
        assert_eq!(dir_prefix("src/services/user.py", 1), "src");
        assert_eq!(dir_prefix("src/services/user.py", 2), "src/services");
        assert_eq!(dir_prefix("src/services/user.py", 5), "src/services");
        assert_eq!(dir_prefix("main.py", 2), ".");
    }

    #[test]
    fn mermaid_rendering_labels_weights() {
        let result = ArchitectureMapResult {
            tool: "get_architecture_map",
            depth: 2,
            min_edge_count: 3,
            nodes: vec!["src/api".into(), "src/db".into()],
            edges: vec![ArchitectureEdge {
                from: "src/api".into(),
                to: "src/db".into(),
                weight: 7,
            }],
        };
        let rendered = render_mermaid(&result);
        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("src_api -->|7| src_db"));
    }
}
