// manage_workspace: lifecycle of the indexed workspaces.
//
// index/refresh run the scanner under the process-wide indexing lock
// (storage, vectors and the embedding device are shared across workspaces);
// add registers a reference workspace and indexes it; clean sweeps index
// directories the registry no longer knows about.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::state::ServerState;
use crate::workspace::WorkspaceKind;

use super::shared::{ToolOutput, wait_for_storage};

#[derive(Debug, Deserialize, Serialize)]
pub struct ManageWorkspaceTool {
    /// "index" | "list" | "add" | "remove" | "stats" | "clean" | "refresh" | "health"
    pub operation: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub detailed: bool,
}

#[derive(Debug, Serialize)]
struct IndexOutcome {
    tool: &'static str,
    operation: String,
    workspace_id: String,
    files_scanned: usize,
    files_indexed: usize,
    files_unchanged: usize,
    files_deleted: usize,
    symbols_indexed: usize,
    extraction_errors: usize,
}

impl ManageWorkspaceTool {
    pub async fn call(&self, state: &ServerState) -> Result<ToolOutput> {
        wait_for_storage(state).await?;
        match self.operation.as_str() {
            "index" | "refresh" => self.run_index(state).await,
            "list" => self.run_list(state).await,
            "add" => self.run_add(state).await,
            "remove" => self.run_remove(state).await,
            "stats" => self.run_stats(state).await,
            "clean" => self.run_clean(state).await,
            "health" => self.run_health(state).await,
            other => Ok(ToolOutput::Text(format!(
                "Unknown operation '{other}' (use index, list, add, remove, stats, clean, refresh or health)"
            ))),
        }
    }

    async fn run_index(&self, state: &ServerState) -> Result<ToolOutput> {
        let target = self.workspace_id.as_deref().unwrap_or("primary");
        let handle = match state.resolve_workspace(target).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };

        // One indexing operation at a time across all workspaces
        let _guard = state.indexing_lock.lock().await;
        let scanner = state.scanner_for(&handle);
        let stats = scanner.full_scan().await?;

        {
            let db = handle.db.lock().await;
            let db_stats = db.get_stats()?;
            let mut registry = state.registry.lock().await;
            registry.update_stats(&handle.workspace_id, db_stats.total_symbols, db_stats.total_files)?;
        }

        info!(workspace = %handle.workspace_id, operation = %self.operation, "indexing complete");
        ToolOutput::json(&IndexOutcome {
            tool: "manage_workspace",
            operation: self.operation.clone(),
            workspace_id: handle.workspace_id.clone(),
            files_scanned: stats.files_scanned,
            files_indexed: stats.files_indexed,
            files_unchanged: stats.files_unchanged,
            files_deleted: stats.files_deleted,
            symbols_indexed: stats.symbols_indexed,
            extraction_errors: stats.extraction_errors,
        })
    }

    async fn run_list(&self, state: &ServerState) -> Result<ToolOutput> {
        let registry = state.registry.lock().await;
        let entries = registry.list_workspaces();
        if entries.is_empty() {
            return Ok(ToolOutput::Text("No workspaces registered".into()));
        }
        if self.detailed {
            return ToolOutput::json(&entries);
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|w| {
                format!(
                    "{} [{}] {} ({} symbols, {} files)",
                    w.workspace_id,
                    match w.kind {
                        WorkspaceKind::Primary => "primary",
                        WorkspaceKind::Reference => "reference",
                    },
                    w.path,
                    w.symbol_count,
                    w.file_count
                )
            })
            .collect();
        Ok(ToolOutput::Text(lines.join("\n")))
    }

    async fn run_add(&self, state: &ServerState) -> Result<ToolOutput> {
        let Some(path) = &self.path else {
            return Ok(ToolOutput::Text("add needs path".into()));
        };
        let expanded = shellexpand::tilde(path).to_string();
        if !std::path::Path::new(&expanded).is_dir() {
            return Ok(ToolOutput::Text(format!("path does not exist: {path}")));
        }
        let name = self.name.clone().unwrap_or_else(|| {
            std::path::Path::new(&expanded)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "workspace".to_string())
        });

        let workspace_id = {
            let mut registry = state.registry.lock().await;
            registry.add_workspace(&expanded, &name, WorkspaceKind::Reference)?
        };

        // Index the fresh workspace straight away
        let handle = match state.resolve_workspace(&workspace_id).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };
        let _guard = state.indexing_lock.lock().await;
        let stats = state.scanner_for(&handle).full_scan().await?;
        {
            let db = handle.db.lock().await;
            let db_stats = db.get_stats()?;
            let mut registry = state.registry.lock().await;
            registry.update_stats(&workspace_id, db_stats.total_symbols, db_stats.total_files)?;
        }

        Ok(ToolOutput::Text(format!(
            "Added workspace {workspace_id}: {} files, {} symbols indexed",
            stats.files_indexed, stats.symbols_indexed
        )))
    }

    async fn run_remove(&self, state: &ServerState) -> Result<ToolOutput> {
        let Some(workspace_id) = &self.workspace_id else {
            return Ok(ToolOutput::Text("remove needs workspace_id".into()));
        };
        if workspace_id == &state.primary().workspace_id && !self.force {
            return Ok(ToolOutput::Text(
                "refusing to remove the primary workspace without force=true".into(),
            ));
        }

        let removed = {
            let mut registry = state.registry.lock().await;
            registry.remove_workspace(workspace_id)?
        };
        if !removed {
            return Ok(ToolOutput::Text(format!("workspace not found: {workspace_id}")));
        }
        state.evict_workspace(workspace_id).await;

        let index_dir = state.paths.index_dir(workspace_id);
        if index_dir.exists() {
            std::fs::remove_dir_all(&index_dir)?;
        }
        Ok(ToolOutput::Text(format!("Removed workspace {workspace_id}")))
    }

    async fn run_stats(&self, state: &ServerState) -> Result<ToolOutput> {
        let target = self.workspace_id.as_deref().unwrap_or("primary");
        let handle = match state.resolve_workspace(target).await {
            Ok(handle) => handle,
            Err(e) => return Ok(ToolOutput::Text(e.to_string())),
        };
        let db_stats = {
            let db = handle.db.lock().await;
            db.get_stats()?
        };
        let vector_rows = {
            let store = handle.vectors.lock().await;
            store.row_count().unwrap_or(0)
        };

        let mut lines = vec![
            format!("Workspace {}", handle.workspace_id),
            format!("  files: {}", db_stats.total_files),
            format!("  symbols: {}", db_stats.total_symbols),
            format!("  identifiers: {}", db_stats.total_identifiers),
            format!("  relationships: {}", db_stats.total_relationships),
            format!("  reachability rows: {}", db_stats.total_reachability),
            format!("  vector rows: {vector_rows}"),
            format!("  languages: {}", db_stats.languages.join(", ")),
        ];
        if self.detailed {
            lines.push(format!(
                "  database size: {:.1} MB",
                db_stats.db_size_bytes as f64 / (1024.0 * 1024.0)
            ));
        }
        Ok(ToolOutput::Text(lines.join("\n")))
    }

    /// Delete index directories the registry does not know about.
    async fn run_clean(&self, state: &ServerState) -> Result<ToolOutput> {
        let known: Vec<String> = {
            let registry = state.registry.lock().await;
            registry
                .list_workspaces()
                .iter()
                .map(|w| w.workspace_id.clone())
                .collect()
        };
        let on_disk = state.paths.list_index_dirs();
        let orphans: Vec<String> = on_disk
            .into_iter()
            .filter(|dir| !known.contains(dir))
            .collect();

        if orphans.is_empty() {
            return Ok(ToolOutput::Text("No orphaned indexes found".into()));
        }
        let mut removed = Vec::new();
        for orphan in &orphans {
            let dir = state.paths.index_dir(orphan);
            if std::fs::remove_dir_all(&dir).is_ok() {
                removed.push(orphan.clone());
            }
        }
        Ok(ToolOutput::Text(format!(
            "Removed {} orphaned index(es): {}",
            removed.len(),
            removed.join(", ")
        )))
    }

    async fn run_health(&self, state: &ServerState) -> Result<ToolOutput> {
        let handle = state.primary().clone();
        let storage = {
            let db = handle.db.lock().await;
            db.get_stats()
        };
        let (fts_available, vector_rows, hnsw_ready) = {
            let store = handle.vectors.lock().await;
            (
                store.fts_available(),
                store.row_count().unwrap_or(0),
                store.has_hnsw_index(),
            )
        };

        let mut lines = vec!["Miller health:".to_string()];
        match storage {
            Ok(stats) => lines.push(format!(
                "  storage: ok ({} symbols, {} files)",
                stats.total_symbols, stats.total_files
            )),
            Err(e) => lines.push(format!("  storage: ERROR {e}")),
        }
        lines.push(format!(
            "  vector store: {} rows, fts {}, ann index {}",
            vector_rows,
            if fts_available { "available" } else { "degraded" },
            if hnsw_ready { "warm" } else { "cold" },
        ));
        lines.push(format!(
            "  embeddings: {}",
            if state.embeddings.is_loaded().await {
                "loaded"
            } else {
                "unloaded (lazy)"
            }
        ));
        lines.push(format!("  reranker model: {}", state.reranker.model_name()));
        lines.push(format!(
            "  watcher: {}",
            if state.watcher_running().await {
                "running"
            } else {
                "stopped"
            }
        ));
        Ok(ToolOutput::Text(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_is_required_and_flags_default_off() {
        let tool: ManageWorkspaceTool =
            serde_json::from_str(r#"{"operation": "index"}"#).unwrap();
        assert_eq!(tool.operation, "index");
        assert!(!tool.force);
        assert!(!tool.detailed);
        assert!(tool.path.is_none());
    }
}
