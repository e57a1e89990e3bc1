// rename_symbol / validate_imports.
//
// Rename pre-resolves every occurrence into a dry-run plan of edits before
// touching anything; applying uses exactly the same plan, file by file with
// an atomic temp-file swap. Matching is word-boundary safe: renaming `get`
// never touches `get_user` or `forget`.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::extractors::{self, IdentifierKind, Visibility};
use crate::state::{ServerState, WorkspaceHandle};

use super::shared::{
    OutputFormat, ToolOutput, default_primary, default_text, default_true, toonable_result,
    wait_for_storage,
};

const TOON_THRESHOLD: usize = 20;
const MAX_SUGGESTIONS: usize = 3;

fn default_workspace_scope() -> String {
    "workspace".to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RenameSymbolTool {
    pub old_name: String,
    pub new_name: String,
    /// "workspace" | "file"
    #[serde(default = "default_workspace_scope")]
    pub scope: String,
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub update_imports: bool,
    #[serde(default = "default_primary")]
    pub workspace: String,
    #[serde(default = "default_text")]
    pub output_format: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RenameEdit {
    pub file: String,
    pub line: u32,
    pub column_start: u32,
    pub column_end: u32,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Serialize)]
struct RenameResult {
    tool: &'static str,
    old_name: String,
    new_name: String,
    dry_run: bool,
    applied: bool,
    total_edits: usize,
    files_touched: usize,
    /// Existing symbols already using the new name
    collisions: Vec<String>,
    edits: Vec<RenameEdit>,
}

impl RenameSymbolTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        if self.old_name == self.new_name {
            return Ok(ToolOutput::Text("old_name and new_name are identical".into()));
        }
        if !is_identifier(&self.new_name) {
            return Ok(ToolOutput::Text(format!(
                "'{}' is not a valid identifier",
                self.new_name
            )));
        }
        let handle = match state.resolve_workspace(&self.workspace).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let (files, collisions) = self.candidate_files(&handle).await?;
        let edits = plan_edits(&handle, &files, &self.old_name, &self.new_name)?;

        let applied = if !self.dry_run && !edits.is_empty() {
            apply_edits(&handle, &edits, &self.old_name, &self.new_name)?;
            info!(
                old = %self.old_name,
                new = %self.new_name,
                edits = edits.len(),
                "rename applied"
            );
            true
        } else {
            false
        };

        let files_touched: BTreeSet<&str> = edits.iter().map(|e| e.file.as_str()).collect();
        let text = format_rename_text(&self.old_name, &self.new_name, self.dry_run, &edits, &collisions);
        let count = edits.len();
        let result = RenameResult {
            tool: "rename_symbol",
            old_name: self.old_name.clone(),
            new_name: self.new_name.clone(),
            dry_run: self.dry_run,
            applied,
            total_edits: count,
            files_touched: files_touched.len(),
            collisions,
            edits,
        };
        toonable_result(
            &result,
            &result.edits,
            OutputFormat::parse(&self.output_format),
            TOON_THRESHOLD,
            count,
            Some(text),
            "rename_symbol",
        )
    }

    /// Files that may contain occurrences, and name collisions with existing
    /// symbols.
    async fn candidate_files(
        &self,
        handle: &WorkspaceHandle,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let db = handle.db.lock().await;
        let definitions = db.get_symbols_by_name(&self.old_name)?;

        let mut files: BTreeSet<String> =
            definitions.iter().map(|s| s.file_path.clone()).collect();
        if self.scope != "file" {
            for r in db.identifiers_by_name(&self.old_name, false)? {
                if !self.update_imports && r.kind == "import" {
                    continue;
                }
                files.insert(r.file_path);
            }
        }

        let collisions: Vec<String> = db
            .get_symbols_by_name(&self.new_name)?
            .into_iter()
            .map(|s| format!("{}:{} {}", s.file_path, s.start_line, s.name))
            .collect();
        Ok((files.into_iter().collect(), collisions))
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || if i == 0 { c.is_alphabetic() } else { c.is_alphanumeric() })
}

/// Scan candidate files and produce the exact edit list. The same plan
/// drives both the dry run and the apply, so they can never disagree.
fn plan_edits(
    handle: &WorkspaceHandle,
    files: &[String],
    old_name: &str,
    new_name: &str,
) -> Result<Vec<RenameEdit>> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(old_name)))
        .context("failed to compile rename pattern")?;

    let mut edits = Vec::new();
    for file in files {
        let full_path = handle.root.join(file);
        let Ok(content) = std::fs::read_to_string(&full_path) else {
            continue; // deleted since indexing
        };
        for (line_idx, line) in content.lines().enumerate() {
            for found in pattern.find_iter(line) {
                edits.push(RenameEdit {
                    file: file.clone(),
                    line: line_idx as u32 + 1,
                    column_start: found.start() as u32,
                    column_end: found.end() as u32,
                    old: old_name.to_string(),
                    new: new_name.to_string(),
                });
            }
        }
    }
    Ok(edits)
}

/// Rewrite each touched file once, atomically: write a sibling temp file,
/// then rename over the original. All-or-nothing per file.
fn apply_edits(
    handle: &WorkspaceHandle,
    edits: &[RenameEdit],
    old_name: &str,
    new_name: &str,
) -> Result<()> {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(old_name)))
        .context("failed to compile rename pattern")?;

    let files: BTreeSet<&str> = edits.iter().map(|e| e.file.as_str()).collect();
    for file in files {
        let full_path = handle.root.join(file);
        let content = std::fs::read_to_string(&full_path)
            .with_context(|| format!("failed to read {file}"))?;
        let rewritten = pattern.replace_all(&content, new_name);

        let temp_path = full_path.with_extension("miller-rename-tmp");
        std::fs::write(&temp_path, rewritten.as_bytes())
            .with_context(|| format!("failed to stage rename for {file}"))?;
        std::fs::rename(&temp_path, &full_path)
            .with_context(|| format!("failed to commit rename for {file}"))?;
    }
    Ok(())
}

fn format_rename_text(
    old_name: &str,
    new_name: &str,
    dry_run: bool,
    edits: &[RenameEdit],
    collisions: &[String],
) -> String {
    let mut lines = Vec::new();
    let verb = if dry_run { "would rename" } else { "renamed" };
    lines.push(format!(
        "{verb} '{old_name}' -> '{new_name}': {} occurrences",
        edits.len()
    ));
    if !collisions.is_empty() {
        lines.push(format!(
            "warning: '{}' already names {} existing symbol(s):",
            new_name,
            collisions.len()
        ));
        for collision in collisions {
            lines.push(format!("  {collision}"));
        }
    }
    for edit in edits {
        lines.push(format!(
            "  {}:{}:{}-{}",
            edit.file, edit.line, edit.column_start, edit.column_end
        ));
    }
    lines.join("\n")
}

// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Serialize)]
pub struct ValidateImportsTool {
    pub code_snippet: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportCheck {
    pub name: String,
    /// "valid" | "invalid" | "ambiguous" | "private"
    pub status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ValidateImportsResult {
    tool: &'static str,
    language: String,
    imports: Vec<ImportCheck>,
}

impl ValidateImportsTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        let handle = match state.resolve_workspace("primary").await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        let language = self.language.clone().unwrap_or_else(|| "python".to_string());
        let Some(cfg) = extractors::language::config_for(&language) else {
            return Ok(ToolOutput::Text(format!("unsupported language: {language}")));
        };
        let probe_path = format!("snippet.{}", cfg.extensions[0]);

        let extraction = match extractors::extract(&self.code_snippet, &language, &probe_path) {
            Ok(extraction) => extraction,
            Err(e) => {
                return Ok(ToolOutput::Text(format!("could not parse snippet: {e}")));
            }
        };

        let imported: Vec<String> = {
            let mut names: Vec<String> = extraction
                .identifiers
                .iter()
                .filter(|i| i.kind == IdentifierKind::Import)
                .map(|i| i.name.clone())
                .collect();
            names.dedup();
            names
        };
        if imported.is_empty() {
            return Ok(ToolOutput::Text("no import statements found in snippet".into()));
        }

        let db = handle.db.lock().await;
        let known_names = db.distinct_symbol_names()?;
        let mut checks = Vec::with_capacity(imported.len());
        for name in imported {
            let matches = db.get_symbols_by_name(&name)?;
            let (status, suggestions) = match matches.len() {
                0 => ("invalid", nearest_names(&name, &known_names)),
                1 => {
                    if matches[0].visibility == Some(Visibility::Private) {
                        ("private", Vec::new())
                    } else {
                        ("valid", Vec::new())
                    }
                }
                _ => ("ambiguous", Vec::new()),
            };
            checks.push(ImportCheck {
                name,
                status: status.to_string(),
                suggestions,
            });
        }

        let result = ValidateImportsResult {
            tool: "validate_imports",
            language,
            imports: checks,
        };
        ToolOutput::json(&result)
    }
}

/// Closest known names by edit distance, ties broken alphabetically.
fn nearest_names(name: &str, known: &[String]) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = known
        .iter()
        .filter(|candidate| candidate.as_str() != name)
        .map(|candidate| (edit_distance(name, candidate), candidate))
        .filter(|(distance, candidate)| {
            *distance <= 2 || candidate.to_lowercase().starts_with(&name.to_lowercase())
        })
        .collect();
    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, candidate)| candidate.clone())
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_boundaries_protect_substrings() {
        let pattern = Regex::new(r"\bget\b").unwrap();
        assert!(pattern.is_match("x = get()"));
        assert!(!pattern.is_match("x = get_user()"));
        assert!(!pattern.is_match("forget()"));
        assert!(!pattern.is_match("target"));
    }

    #[test]
    fn identifier_validation() {
        assert!(is_identifier("fetchUserData"));
        assert!(is_identifier("_private"));
        assert!(!is_identifier("123abc"));
        assert!(!is_identifier("has space"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(edit_distance("abc", "abc"), 0);
        assert_eq!(edit_distance("abc", "abd"), 1);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn nearest_names_prefers_close_matches() {
        let known = vec![
            "fetch_user".to_string(),
            "fetch_users".to_string(),
            "unrelated".to_string(),
        ];
        let suggestions = nearest_names("fetch_usr", &known);
        assert_eq!(suggestions[0], "fetch_user");
        assert!(!suggestions.contains(&"unrelated".to_string()));
    }
}
