// fast_lookup / fast_refs: exact navigation over the symbol and identifier
// tables.
//
// Lookup is exact-name only, optionally disambiguated by file; it never
// fuzzy-matches. References union occurrences resolved to the symbol with
// same-name occurrences whose target is still unresolved, grouped by file,
// each carrying its source line as context.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::database::IdentifierRef;
use crate::extractors::Symbol;
use crate::state::ServerState;

use super::shared::{
    OutputFormat, ToolOutput, default_primary, default_text, toonable_result, wait_for_storage,
};

const REFS_TOON_THRESHOLD: usize = 20;

#[derive(Debug, Deserialize, Serialize)]
pub struct FastLookupTool {
    pub name: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_primary")]
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupEntry {
    pub name: String,
    pub kind: String,
    pub language: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct FastLookupResult {
    tool: &'static str,
    name: String,
    total: usize,
    entries: Vec<LookupEntry>,
}

impl FastLookupTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let symbols = {
            let db = handle.db.lock().await;
            db.lookup_symbols(&self.name, self.file.as_deref())?
        };

        let entries: Vec<LookupEntry> = symbols.iter().map(lookup_entry).collect();
        let result = FastLookupResult {
            tool: "fast_lookup",
            name: self.name.clone(),
            total: entries.len(),
            entries,
        };
        ToolOutput::json(&result)
    }
}

fn lookup_entry(symbol: &Symbol) -> LookupEntry {
    LookupEntry {
        name: symbol.name.clone(),
        kind: symbol.kind.as_str().to_string(),
        language: symbol.language.clone(),
        file_path: symbol.file_path.clone(),
        start_line: symbol.start_line,
        end_line: symbol.end_line,
        signature: symbol.signature.clone(),
        visibility: symbol.visibility.map(|v| v.as_str().to_string()),
        doc_comment: symbol.doc_comment.clone(),
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FastRefsTool {
    pub symbol: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_primary")]
    pub workspace: String,
    #[serde(default = "default_text")]
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub kind: String,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
struct FastRefsResult {
    tool: &'static str,
    symbol: String,
    total: usize,
    /// file path -> references in that file
    references: BTreeMap<String, Vec<Reference>>,
}

impl FastRefsTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let (leaf_name, refs) = {
            let db = handle.db.lock().await;
            let targets = db.lookup_symbols(&self.symbol, self.file.as_deref())?;
            let leaf = self
                .symbol
                .rsplit_once('.')
                .map(|(_, leaf)| leaf)
                .unwrap_or(&self.symbol)
                .to_string();

            // Occurrences resolved to any matching symbol...
            let mut refs: Vec<IdentifierRef> = Vec::new();
            for target in &targets {
                refs.extend(db.identifiers_by_target(&target.id)?);
            }
            // ...plus same-name occurrences nobody resolved
            refs.extend(db.identifiers_by_name(&leaf, true)?);
            (leaf, refs)
        };

        let mut grouped: BTreeMap<String, Vec<Reference>> = BTreeMap::new();
        let mut total = 0usize;
        for r in refs {
            total += 1;
            grouped.entry(r.file_path.clone()).or_default().push(Reference {
                file_path: r.file_path,
                line: r.start_line,
                column: r.start_column,
                kind: r.kind,
                resolved: r.target_symbol_id.is_some(),
                context: r.code_context,
            });
        }
        for refs in grouped.values_mut() {
            refs.sort_by_key(|r| (r.line, r.column));
        }

        let text = format_refs_text(&leaf_name, total, &grouped);
        let toon_rows: Vec<serde_json::Value> = grouped
            .values()
            .flatten()
            .map(|r| {
                serde_json::json!({
                    "file": r.file_path,
                    "line": r.line,
                    "kind": r.kind,
                    "resolved": r.resolved,
                })
            })
            .collect();
        let result = FastRefsResult {
            tool: "fast_refs",
            symbol: self.symbol.clone(),
            total,
            references: grouped,
        };
        toonable_result(
            &result,
            &toon_rows,
            OutputFormat::parse(&self.output_format),
            REFS_TOON_THRESHOLD,
            total,
            Some(text),
            "fast_refs",
        )
    }
}

fn format_refs_text(symbol: &str, total: usize, grouped: &BTreeMap<String, Vec<Reference>>) -> String {
    if total == 0 {
        return format!("No references found for '{symbol}'");
    }
    let mut lines = vec![format!(
        "{total} references to '{symbol}' in {} files",
        grouped.len()
    )];
    for (file, refs) in grouped {
        lines.push(format!("{file}:"));
        for r in refs {
            let context = r.context.as_deref().unwrap_or("");
            lines.push(format!("  {}:{} [{}] {}", r.line, r.column, r.kind, context));
        }
    }
    lines.join("\n")
}
