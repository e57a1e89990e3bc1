// get_symbols: a file's structure without reading the whole file.
//
// Three reading modes: minimal (names only), structure (names + signatures,
// the default), full (bodies included, sliced from the file by byte range).
// Depth 0 is top-level declarations; 1 adds members, and so on.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::extractors::Symbol;
use crate::state::ServerState;

use super::shared::{
    OutputFormat, ToolOutput, default_primary, default_text, toonable_result, wait_for_storage,
};

const TOON_THRESHOLD: usize = 5;

fn default_structure() -> String {
    "structure".to_string()
}

fn default_max_depth() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetSymbolsTool {
    pub file_path: String,
    /// "structure" | "minimal" | "full"
    #[serde(default = "default_structure")]
    pub mode: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Filter to symbols whose name contains this (case-insensitive)
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_primary")]
    pub workspace: String,
    #[serde(default = "default_text")]
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolOutline {
    pub name: String,
    pub kind: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub children: Vec<SymbolOutline>,
}

#[derive(Debug, Serialize)]
struct GetSymbolsResult {
    tool: &'static str,
    file_path: String,
    mode: String,
    total: usize,
    symbols: Vec<SymbolOutline>,
}

impl GetSymbolsTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let symbols = {
            let db = handle.db.lock().await;
            db.get_symbols_for_file(&self.file_path)?
        };
        if symbols.is_empty() {
            return Ok(ToolOutput::Text(format!(
                "No symbols found in '{}' (file not indexed or empty)",
                self.file_path
            )));
        }

        // Body text only for full mode, sliced straight from the file
        let source = if self.mode == "full" {
            std::fs::read_to_string(handle.root.join(&self.file_path)).ok()
        } else {
            None
        };

        let mut roots = build_outline(&symbols, self.max_depth, &self.mode, source.as_deref());
        if let Some(target) = &self.target {
            let needle = target.to_lowercase();
            retain_matching(&mut roots, &needle);
        }

        let mut total = 0;
        count_nodes(&roots, &mut total);
        if let Some(limit) = self.limit {
            truncate_nodes(&mut roots, limit, &mut 0);
            total = total.min(limit);
        }

        let text = format_outline_text(&self.file_path, &roots);
        let result = GetSymbolsResult {
            tool: "get_symbols",
            file_path: self.file_path.clone(),
            mode: self.mode.clone(),
            total,
            symbols: roots,
        };
        toonable_result(
            &result,
            &result,
            OutputFormat::parse(&self.output_format),
            TOON_THRESHOLD,
            total,
            Some(text),
            "get_symbols",
        )
    }
}

fn build_outline(
    symbols: &[Symbol],
    max_depth: u32,
    mode: &str,
    source: Option<&str>,
) -> Vec<SymbolOutline> {
    fn convert(
        symbol: &Symbol,
        symbols: &[Symbol],
        depth: u32,
        max_depth: u32,
        mode: &str,
        source: Option<&str>,
    ) -> SymbolOutline {
        let children = if depth < max_depth {
            symbols
                .iter()
                .filter(|s| s.parent_symbol_id.as_deref() == Some(symbol.id.as_str()))
                .map(|s| convert(s, symbols, depth + 1, max_depth, mode, source))
                .collect()
        } else {
            Vec::new()
        };
        let body = if mode == "full" {
            source.and_then(|src| {
                src.get(symbol.start_byte as usize..symbol.end_byte as usize)
                    .map(str::to_string)
            })
        } else {
            None
        };
        SymbolOutline {
            name: symbol.name.clone(),
            kind: symbol.kind.as_str().to_string(),
            start_line: symbol.start_line,
            end_line: symbol.end_line,
            signature: if mode == "minimal" {
                None
            } else {
                symbol.signature.clone()
            },
            doc_comment: if mode == "minimal" {
                None
            } else {
                symbol.doc_comment.clone()
            },
            body,
            children,
        }
    }

    symbols
        .iter()
        .filter(|s| s.parent_symbol_id.is_none())
        .map(|s| convert(s, symbols, 0, max_depth, mode, source))
        .collect()
}

/// Keep subtrees containing a name match.
fn retain_matching(nodes: &mut Vec<SymbolOutline>, needle: &str) {
    nodes.retain_mut(|node| {
        retain_matching(&mut node.children, needle);
        node.name.to_lowercase().contains(needle) || !node.children.is_empty()
    });
}

fn count_nodes(nodes: &[SymbolOutline], total: &mut usize) {
    for node in nodes {
        *total += 1;
        count_nodes(&node.children, total);
    }
}

fn truncate_nodes(nodes: &mut Vec<SymbolOutline>, limit: usize, used: &mut usize) {
    nodes.retain_mut(|node| {
        if *used >= limit {
            return false;
        }
        *used += 1;
        truncate_nodes(&mut node.children, limit, used);
        true
    });
}

fn format_outline_text(file_path: &str, roots: &[SymbolOutline]) -> String {
    fn render(node: &SymbolOutline, indent: usize, lines: &mut Vec<String>) {
        let pad = "  ".repeat(indent);
        let label = match &node.signature {
            Some(signature) => format!("{pad}{} [{}:{}] {}", node.name, node.kind, node.start_line, signature),
            None => format!("{pad}{} [{}:{}]", node.name, node.kind, node.start_line),
        };
        lines.push(label);
        for child in &node.children {
            render(child, indent + 1, lines);
        }
    }

    let mut lines = vec![format!("{file_path}:")];
    for root in roots {
        render(root, 1, &mut lines);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::SymbolKind;

    fn symbol(name: &str, kind: SymbolKind, parent: Option<&str>, byte: u32) -> Symbol {
        let mut s = Symbol::new(
            name.into(),
            kind,
            "python".into(),
            "svc.py".into(),
            1,
            0,
            5,
            0,
            byte,
            byte + 10,
        );
        s.parent_symbol_id = parent.map(String::from);
        s.signature = Some(format!("def {name}():"));
        s
    }

    #[test]
    fn depth_zero_is_top_level_only() {
        let class = symbol("Service", SymbolKind::Class, None, 0);
        let method = symbol("run", SymbolKind::Method, Some(&class.id), 20);
        let symbols = vec![class, method];

        let shallow = build_outline(&symbols, 0, "structure", None);
        assert_eq!(shallow.len(), 1);
        assert!(shallow[0].children.is_empty());

        let deep = build_outline(&symbols, 1, "structure", None);
        assert_eq!(deep[0].children.len(), 1);
        assert_eq!(deep[0].children[0].name, "run");
    }

    #[test]
    fn target_filter_keeps_matching_subtrees() {
        let class = symbol("Service", SymbolKind::Class, None, 0);
        let hit = symbol("fetch_user", SymbolKind::Method, Some(&class.id), 20);
        let miss = symbol("shutdown", SymbolKind::Method, Some(&class.id), 40);
        let symbols = vec![class, hit, miss];

        let mut outline = build_outline(&symbols, 2, "minimal", None);
        retain_matching(&mut outline, "user");
        assert_eq!(outline.len(), 1);
        assert_eq!(outline[0].children.len(), 1);
        assert_eq!(outline[0].children[0].name, "fetch_user");
    }
}
