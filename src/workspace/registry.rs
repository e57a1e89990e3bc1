// Workspace registry: the on-disk JSON map of workspace_id -> entry.
//
// The file is pretty-printed with sorted keys and a trailing newline so it
// diffs cleanly under version control. IDs are deterministic in the resolved
// path, which makes re-adding the same directory idempotent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceKind {
    Primary,
    Reference,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceEntry {
    pub workspace_id: String,
    pub name: String,
    /// Absolute path when the directory exists at registration time
    pub path: String,
    pub kind: WorkspaceKind,
    pub created_at: i64,
    pub last_indexed: Option<i64>,
    #[serde(default)]
    pub symbol_count: i64,
    #[serde(default)]
    pub file_count: i64,
}

pub struct WorkspaceRegistry {
    path: PathBuf,
    workspaces: BTreeMap<String, WorkspaceEntry>,
}

impl WorkspaceRegistry {
    /// Load the registry, or start empty when the file does not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let workspaces = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read registry {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("malformed registry {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, workspaces })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Sorted keys come from the BTreeMap; trailing newline keeps diffs
        // clean
        let mut rendered = serde_json::to_string_pretty(&self.workspaces)?;
        rendered.push('\n');
        std::fs::write(&self.path, rendered)
            .with_context(|| format!("failed to write registry {}", self.path.display()))?;
        Ok(())
    }

    /// Add or refresh a workspace. Returns its (stable) ID.
    pub fn add_workspace(&mut self, path: &str, name: &str, kind: WorkspaceKind) -> Result<String> {
        let workspace_id = generate_workspace_id(path, name);
        let resolved = resolve_path(path);

        let entry = WorkspaceEntry {
            workspace_id: workspace_id.clone(),
            name: name.to_string(),
            path: resolved,
            kind,
            created_at: chrono::Utc::now().timestamp(),
            last_indexed: None,
            symbol_count: 0,
            file_count: 0,
        };
        // Re-adding keeps existing stats
        let entry = match self.workspaces.get(&workspace_id) {
            Some(existing) => WorkspaceEntry {
                created_at: existing.created_at,
                last_indexed: existing.last_indexed,
                symbol_count: existing.symbol_count,
                file_count: existing.file_count,
                ..entry
            },
            None => entry,
        };

        self.workspaces.insert(workspace_id.clone(), entry);
        self.save()?;
        debug!(workspace_id = %workspace_id, "workspace registered");
        Ok(workspace_id)
    }

    pub fn list_workspaces(&self) -> Vec<&WorkspaceEntry> {
        self.workspaces.values().collect()
    }

    pub fn get_workspace(&self, workspace_id: &str) -> Option<&WorkspaceEntry> {
        self.workspaces.get(workspace_id)
    }

    /// The single primary workspace, if one is registered.
    pub fn primary(&self) -> Option<&WorkspaceEntry> {
        self.workspaces
            .values()
            .find(|w| w.kind == WorkspaceKind::Primary)
    }

    pub fn remove_workspace(&mut self, workspace_id: &str) -> Result<bool> {
        let removed = self.workspaces.remove(workspace_id).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn update_stats(
        &mut self,
        workspace_id: &str,
        symbol_count: i64,
        file_count: i64,
    ) -> Result<bool> {
        let Some(entry) = self.workspaces.get_mut(workspace_id) else {
            return Ok(false);
        };
        entry.symbol_count = symbol_count;
        entry.file_count = file_count;
        entry.last_indexed = Some(chrono::Utc::now().timestamp());
        self.save()?;
        Ok(true)
    }
}

/// Deterministic workspace ID: readable name slug plus the first 8 hex chars
/// of the resolved path's SHA-256.
pub fn generate_workspace_id(path: &str, name: &str) -> String {
    let resolved = resolve_path(path);
    let mut hasher = Sha256::new();
    hasher.update(resolved.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}_{}", slugify(name), &hash[..8])
}

fn resolve_path(path: &str) -> String {
    let expanded = shellexpand::tilde(path).to_string();
    let buf = PathBuf::from(&expanded);
    buf.canonicalize()
        .unwrap_or(buf)
        .to_string_lossy()
        .replace('\\', "/")
}

fn slugify(name: &str) -> String {
    let slug: String = name
        .to_lowercase()
        .replace([' ', '_'], "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .collect();
    if slug.is_empty() {
        "workspace".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry_in(dir: &Path) -> WorkspaceRegistry {
        WorkspaceRegistry::load(dir.join("workspace_registry.json")).unwrap()
    }

    #[test]
    fn add_remove_add_yields_same_id() {
        let temp = tempdir().unwrap();
        let ws = temp.path().join("project");
        std::fs::create_dir_all(&ws).unwrap();
        let ws = ws.to_string_lossy().to_string();

        let mut registry = registry_in(temp.path());
        let first = registry
            .add_workspace(&ws, "My Project", WorkspaceKind::Primary)
            .unwrap();
        assert!(registry.remove_workspace(&first).unwrap());
        let second = registry
            .add_workspace(&ws, "My Project", WorkspaceKind::Primary)
            .unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("my-project_"));
    }

    #[test]
    fn file_is_pretty_sorted_with_trailing_newline() {
        let temp = tempdir().unwrap();
        let mut registry = registry_in(temp.path());
        registry
            .add_workspace("/tmp/zeta", "zeta", WorkspaceKind::Reference)
            .unwrap();
        registry
            .add_workspace("/tmp/alpha", "alpha", WorkspaceKind::Reference)
            .unwrap();

        let raw = std::fs::read_to_string(temp.path().join("workspace_registry.json")).unwrap();
        assert!(raw.ends_with('\n'));
        assert!(raw.contains("  \""));
        let alpha_pos = raw.find("alpha_").unwrap();
        let zeta_pos = raw.find("zeta_").unwrap();
        assert!(alpha_pos < zeta_pos);
    }

    #[test]
    fn reload_round_trips_entries() {
        let temp = tempdir().unwrap();
        let id = {
            let mut registry = registry_in(temp.path());
            let id = registry
                .add_workspace("/tmp/proj", "proj", WorkspaceKind::Primary)
                .unwrap();
            registry.update_stats(&id, 42, 7).unwrap();
            id
        };

        let registry = registry_in(temp.path());
        let entry = registry.get_workspace(&id).unwrap();
        assert_eq!(entry.symbol_count, 42);
        assert_eq!(entry.file_count, 7);
        assert!(entry.last_indexed.is_some());
        assert_eq!(registry.primary().unwrap().workspace_id, id);
    }

    #[test]
    fn re_add_preserves_stats() {
        let temp = tempdir().unwrap();
        let mut registry = registry_in(temp.path());
        let id = registry
            .add_workspace("/tmp/proj", "proj", WorkspaceKind::Primary)
            .unwrap();
        registry.update_stats(&id, 10, 2).unwrap();
        let again = registry
            .add_workspace("/tmp/proj", "proj", WorkspaceKind::Primary)
            .unwrap();
        assert_eq!(id, again);
        assert_eq!(registry.get_workspace(&id).unwrap().symbol_count, 10);
    }
}
