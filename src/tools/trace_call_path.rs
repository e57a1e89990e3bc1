// trace_call_path: bidirectional call-path tracing with cross-language
// resolution.
//
// Seeds are symbols matching the query name (optionally pinned to a context
// file). Downstream children come from outgoing Call edges plus resolved
// identifiers contained in the current symbol; upstream children are the
// sources of incoming Call edges unioned with the distinct CONTAINING
// symbols of identifiers resolved to the current symbol -- callers, never
// the occurrences themselves. Cross-language hops match naming variants
// (IUser -> User -> user -> users) and, when the vector index is warm,
// semantic neighbours. Cycles break on the ancestor path; a node may appear
// in several branches, which is what call trees look like.

use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extractors::{RelationshipKind, Symbol};
use crate::state::{ServerState, WorkspaceHandle};
use crate::utils::generate_naming_variants;

use super::shared::{
    OutputFormat, ToolOutput, default_primary, toonable_result, wait_for_storage,
};

const TOON_THRESHOLD: usize = 5;
const SEMANTIC_NEIGHBOUR_LIMIT: usize = 3;
const SEMANTIC_MIN_SCORE: f32 = 0.7;
const TRACE_DEADLINE: Duration = Duration::from_secs(10);

fn default_direction() -> String {
    "downstream".to_string()
}

fn default_depth() -> u32 {
    3
}

fn default_tree() -> String {
    "tree".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TraceCallPathTool {
    pub symbol_name: String,
    /// "upstream" | "downstream" | "both"
    #[serde(default = "default_direction")]
    pub direction: String,
    /// 0..=10; 0 returns only the seed
    #[serde(default = "default_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub context_file: Option<String>,
    #[serde(default = "default_tree")]
    pub output_format: String,
    #[serde(default = "default_primary")]
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    pub name: String,
    pub kind: String,
    pub language: String,
    pub file: String,
    pub line: u32,
    pub depth: u32,
    /// "exact" | "variant" | "semantic"
    pub match_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_kind: Option<String>,
    pub children: Vec<TraceNode>,
}

#[derive(Debug, Default, Serialize)]
pub struct TraceMetadata {
    pub total_nodes: usize,
    pub max_depth_reached: u32,
    pub truncated: bool,
    pub languages_found: BTreeSet<String>,
    pub match_types: BTreeSet<String>,
    pub relationship_kinds: BTreeSet<String>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Serialize)]
struct TraceResult {
    tool: &'static str,
    symbol: String,
    direction: String,
    max_depth: u32,
    roots: Vec<TraceNode>,
    metadata: TraceMetadata,
}

enum Direction {
    Upstream,
    Downstream,
}

struct Traverser<'a> {
    handle: &'a WorkspaceHandle,
    state: &'a ServerState,
    max_depth: u32,
    deadline: Instant,
    metadata: TraceMetadata,
}

impl TraceCallPathTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        if self.max_depth > 10 {
            return Ok(ToolOutput::Text(
                "max_depth cannot exceed 10 (try 3-5 for readable traces)".to_string(),
            ));
        }
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };
        state.ensure_closure_fresh(&handle).await.ok();

        let started = Instant::now();
        let mut seeds = {
            let db = handle.db.lock().await;
            db.get_symbols_by_name(&self.symbol_name)?
        };
        if let Some(context_file) = &self.context_file {
            seeds.retain(|s| &s.file_path == context_file);
        }
        if seeds.is_empty() {
            return Ok(ToolOutput::Text(format!(
                "Symbol not found: '{}'. Try fast_search to locate it first.",
                self.symbol_name
            )));
        }

        let mut traverser = Traverser {
            handle: &handle,
            state,
            max_depth: self.max_depth,
            deadline: started + TRACE_DEADLINE,
            metadata: TraceMetadata::default(),
        };

        let mut roots = Vec::new();
        for seed in &seeds {
            let mut path: HashSet<String> = HashSet::new();
            let mut root = traverser.node_for(seed, 0, "exact", None);
            if self.max_depth > 0 {
                path.insert(seed.id.clone());
                match self.direction.as_str() {
                    "upstream" => {
                        root.children = traverser
                            .expand(seed, 1, Direction::Upstream, &mut path)
                            .await?;
                    }
                    "downstream" => {
                        root.children = traverser
                            .expand(seed, 1, Direction::Downstream, &mut path)
                            .await?;
                    }
                    "both" => {
                        let mut children = traverser
                            .expand(seed, 1, Direction::Upstream, &mut path)
                            .await?;
                        children.extend(
                            traverser
                                .expand(seed, 1, Direction::Downstream, &mut path)
                                .await?,
                        );
                        root.children = children;
                    }
                    other => {
                        return Ok(ToolOutput::Text(format!(
                            "Invalid direction: '{other}' (use upstream, downstream or both)"
                        )));
                    }
                }
            }
            roots.push(root);
        }

        let mut metadata = std::mem::take(&mut traverser.metadata);
        metadata.truncated = metadata.truncated || metadata.max_depth_reached >= self.max_depth;
        metadata.execution_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            symbol = %self.symbol_name,
            nodes = metadata.total_nodes,
            "trace complete"
        );

        let text = match OutputFormat::parse(&self.output_format) {
            OutputFormat::Tree | OutputFormat::Text => Some(format_tree(&roots, &metadata)),
            _ => None,
        };
        let count = metadata.total_nodes;
        let result = TraceResult {
            tool: "trace_call_path",
            symbol: self.symbol_name.clone(),
            direction: self.direction.clone(),
            max_depth: self.max_depth,
            roots,
            metadata,
        };
        toonable_result(
            &result,
            &result,
            OutputFormat::parse(&self.output_format),
            TOON_THRESHOLD,
            count,
            text,
            "trace_call_path",
        )
    }
}

impl<'a> Traverser<'a> {
    fn node_for(
        &mut self,
        symbol: &Symbol,
        depth: u32,
        match_type: &str,
        relationship_kind: Option<RelationshipKind>,
    ) -> TraceNode {
        self.metadata.total_nodes += 1;
        self.metadata.max_depth_reached = self.metadata.max_depth_reached.max(depth);
        self.metadata.languages_found.insert(symbol.language.clone());
        self.metadata.match_types.insert(match_type.to_string());
        if let Some(kind) = relationship_kind {
            self.metadata
                .relationship_kinds
                .insert(kind.as_str().to_string());
        }
        TraceNode {
            name: symbol.name.clone(),
            kind: symbol.kind.as_str().to_string(),
            language: symbol.language.clone(),
            file: symbol.file_path.clone(),
            line: symbol.start_line,
            depth,
            match_type: match_type.to_string(),
            relationship_kind: relationship_kind.map(|k| k.as_str().to_string()),
            children: Vec::new(),
        }
    }

    /// Children of `symbol` at `depth`, recursing to the depth cap. The
    /// deadline is checked between expansions; overrunning it truncates.
    #[async_recursion]
    async fn expand(
        &mut self,
        symbol: &Symbol,
        depth: u32,
        direction: Direction,
        path: &mut HashSet<String>,
    ) -> Result<Vec<TraceNode>> {
        if depth > self.max_depth {
            return Ok(Vec::new());
        }
        if Instant::now() >= self.deadline {
            self.metadata.truncated = true;
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(Symbol, &'static str, Option<RelationshipKind>)> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        {
            let db = self.handle.db.lock().await;
            match direction {
                Direction::Downstream => {
                    // Call edges out of this symbol
                    let edges = db.outgoing(&symbol.id, &[RelationshipKind::Call])?;
                    let ids: Vec<String> = edges.iter().map(|e| e.to_symbol_id.clone()).collect();
                    for callee in db.get_symbols_by_ids(&ids)? {
                        if seen_ids.insert(callee.id.clone()) {
                            candidates.push((callee, "exact", Some(RelationshipKind::Call)));
                        }
                    }
                    // Fallback: resolved identifiers inside this symbol
                    let contained = db.identifiers_contained_by(&symbol.id)?;
                    let target_ids: Vec<String> = contained
                        .iter()
                        .filter_map(|i| i.target_symbol_id.clone())
                        .collect();
                    for callee in db.get_symbols_by_ids(&target_ids)? {
                        if seen_ids.insert(callee.id.clone()) {
                            candidates.push((callee, "exact", Some(RelationshipKind::Reference)));
                        }
                    }
                }
                Direction::Upstream => {
                    // Sources of Call edges into this symbol
                    let edges = db.incoming(&symbol.id, &[RelationshipKind::Call])?;
                    let ids: Vec<String> = edges.iter().map(|e| e.from_symbol_id.clone()).collect();
                    for caller in db.get_symbols_by_ids(&ids)? {
                        if seen_ids.insert(caller.id.clone()) {
                            candidates.push((caller, "exact", Some(RelationshipKind::Call)));
                        }
                    }
                    // Fallback: the distinct symbols containing identifiers
                    // resolved to this one -- the callers, not the occurrences
                    let containing = db.containing_symbols_of_target(&symbol.id)?;
                    for caller in db.get_symbols_by_ids(&containing)? {
                        if seen_ids.insert(caller.id.clone()) {
                            candidates.push((caller, "exact", Some(RelationshipKind::Reference)));
                        }
                    }
                }
            }

            // Cross-language naming variants in other languages
            for variant in generate_naming_variants(&symbol.name) {
                if variant == symbol.name {
                    continue;
                }
                for other in db.get_symbols_by_name(&variant)? {
                    if other.language != symbol.language && seen_ids.insert(other.id.clone()) {
                        candidates.push((other, "variant", None));
                    }
                }
            }
        }

        for (neighbour, _score) in self.semantic_neighbours(symbol).await {
            if seen_ids.insert(neighbour.id.clone()) {
                candidates.push((neighbour, "semantic", None));
            }
        }

        let mut nodes = Vec::with_capacity(candidates.len());
        for (candidate, match_type, relationship_kind) in candidates {
            // Ancestor on the current path: a cycle, skip
            if path.contains(&candidate.id) {
                continue;
            }
            let mut node = self.node_for(&candidate, depth, match_type, relationship_kind);
            if depth < self.max_depth {
                path.insert(candidate.id.clone());
                node.children = match direction {
                    Direction::Upstream => {
                        self.expand(&candidate, depth + 1, Direction::Upstream, path)
                            .await?
                    }
                    Direction::Downstream => {
                        self.expand(&candidate, depth + 1, Direction::Downstream, path)
                            .await?
                    }
                };
                path.remove(&candidate.id);
            }
            nodes.push(node);
        }
        Ok(nodes)
    }

    /// Semantic cross-language matches; silently empty when the vector index
    /// or embedding model is not warm.
    async fn semantic_neighbours(&self, symbol: &Symbol) -> Vec<(Symbol, f32)> {
        {
            let store = self.handle.vectors.lock().await;
            if !store.has_hnsw_index() {
                return Vec::new();
            }
        }
        if !self.state.embeddings.is_loaded().await {
            return Vec::new();
        }

        let text = crate::embeddings::embedding_text(symbol);
        let Ok(vector) = self
            .state
            .embeddings
            .embed_query(&text, crate::embeddings::EmbeddingTask::Similarity)
            .await
        else {
            return Vec::new();
        };

        let hits = {
            let store = self.handle.vectors.lock().await;
            store
                .search_semantic(&vector, SEMANTIC_NEIGHBOUR_LIMIT + 1, SEMANTIC_MIN_SCORE)
                .unwrap_or_default()
        };

        let ids: Vec<String> = hits
            .iter()
            .filter(|h| h.symbol_id != symbol.id && h.language != symbol.language)
            .map(|h| h.symbol_id.clone())
            .collect();
        let symbols = {
            let db = self.handle.db.lock().await;
            db.get_symbols_by_ids(&ids).unwrap_or_default()
        };
        symbols
            .into_iter()
            .map(|s| {
                let score = hits
                    .iter()
                    .find(|h| h.symbol_id == s.id)
                    .map(|h| h.score)
                    .unwrap_or(0.0);
                (s, score)
            })
            .collect()
    }
}

fn format_tree(roots: &[TraceNode], metadata: &TraceMetadata) -> String {
    let mut lines = Vec::new();
    for root in roots {
        lines.push(format!(
            "{} ({}) {}:{}",
            root.name, root.kind, root.file, root.line
        ));
        render_children(&root.children, "", &mut lines);
    }
    lines.push(format!(
        "{} nodes, depth {} reached{}, {} ms",
        metadata.total_nodes,
        metadata.max_depth_reached,
        if metadata.truncated { " (truncated)" } else { "" },
        metadata.execution_time_ms,
    ));
    lines.join("\n")
}

fn render_children(children: &[TraceNode], prefix: &str, lines: &mut Vec<String>) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let connector = if last { "└── " } else { "├── " };
        let mut label = format!(
            "{prefix}{connector}{} ({}) {}:{}",
            child.name, child.kind, child.file, child.line
        );
        match child.match_type.as_str() {
            "variant" => label.push_str(" [variant]"),
            "semantic" => label.push_str(" [semantic]"),
            _ => {
                if let Some(kind) = &child.relationship_kind {
                    label.push_str(&format!(" [{kind}]"));
                }
            }
        }
        lines.push(label);
        let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
        render_children(&child.children, &child_prefix, lines);
    }
}
