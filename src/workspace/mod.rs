// On-disk layout for workspace indexes:
//
//   .miller/
//     indexes/<workspace_id>/symbols.db
//     indexes/<workspace_id>/vectors.db
//     workspace_registry.json
//     logs/miller-YYYY-MM-DD.log

pub mod registry;

use std::path::{Path, PathBuf};

pub use registry::{WorkspaceEntry, WorkspaceKind, WorkspaceRegistry, generate_workspace_id};

pub const MILLER_DIR: &str = ".miller";

/// Resolves every index path under one data root (normally the primary
/// workspace's `.miller` directory).
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    data_root: PathBuf,
}

impl WorkspacePaths {
    /// Paths rooted at `<workspace_root>/.miller`.
    pub fn for_workspace_root(workspace_root: &Path) -> Self {
        Self {
            data_root: workspace_root.join(MILLER_DIR),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_root.join("workspace_registry.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.data_root.join("models")
    }

    pub fn index_dir(&self, workspace_id: &str) -> PathBuf {
        self.data_root.join("indexes").join(workspace_id)
    }

    pub fn symbols_db_path(&self, workspace_id: &str) -> PathBuf {
        self.index_dir(workspace_id).join("symbols.db")
    }

    pub fn vectors_db_path(&self, workspace_id: &str) -> PathBuf {
        self.index_dir(workspace_id).join("vectors.db")
    }

    /// Index directories on disk, for orphan detection.
    pub fn list_index_dirs(&self) -> Vec<String> {
        let indexes = self.data_root.join("indexes");
        let Ok(entries) = std::fs::read_dir(indexes) else {
            return Vec::new();
        };
        let mut dirs: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        dirs.sort();
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_the_published_shape() {
        let paths = WorkspacePaths::for_workspace_root(Path::new("/repo"));
        assert_eq!(
            paths.symbols_db_path("app_12345678"),
            PathBuf::from("/repo/.miller/indexes/app_12345678/symbols.db")
        );
        assert_eq!(
            paths.vectors_db_path("app_12345678"),
            PathBuf::from("/repo/.miller/indexes/app_12345678/vectors.db")
        );
        assert_eq!(
            paths.registry_path(),
            PathBuf::from("/repo/.miller/workspace_registry.json")
        );
    }
}
