// Default ignore set and per-extension size caps.
//
// The default list covers VCS metadata, build output, caches, virtual
// environments, bundler artifacts and binary formats; user patterns compose
// on top. Files over their extension's size cap are skipped and logged,
// never errored.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::extractors::language;

/// Default max file size: 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_048_576;

/// Per-extension size overrides. Bundled/minified formats get stricter
/// limits; type-stub formats legitimately run large.
const EXTENSION_SIZE_LIMITS: &[(&str, u64)] = &[
    (".d.ts", 3_145_728),
    (".pyi", 3_145_728),
    (".js", 512_000),
    (".css", 512_000),
    (".cs", 1_048_576),
    (".java", 1_048_576),
];

/// Always-applied ignore patterns. Directory entries end with '/'.
const DEFAULT_IGNORES: &[&str] = &[
    // Version control
    ".git/",
    ".svn/",
    ".hg/",
    ".bzr/",
    // IDE and editor
    ".vs/",
    ".vscode/",
    ".idea/",
    "*.swp",
    "*.swo",
    // Build and output directories
    "bin/",
    "obj/",
    "build/",
    "dist/",
    "out/",
    "target/",
    "Debug/",
    "Release/",
    ".next/",
    ".nuxt/",
    "DerivedData/",
    // Package managers and dependencies
    "node_modules/",
    "bower_components/",
    "vendor/",
    "Pods/",
    // Python environments and caches
    ".venv/",
    "venv/",
    "env/",
    "__pycache__/",
    "*.pyc",
    "*.pyo",
    ".pytest_cache/",
    ".mypy_cache/",
    ".ruff_cache/",
    ".tox/",
    "*.egg-info/",
    "htmlcov/",
    // Caches and temporary files
    ".cache/",
    ".tmp/",
    "tmp/",
    "temp/",
    "*.tmp",
    "*.temp",
    "*~",
    "*.bak",
    "*.orig",
    "*.rej",
    // Code intelligence tools (our own data included)
    ".miller/",
    ".julie/",
    // Binaries
    "*.dll",
    "*.exe",
    "*.so",
    "*.dylib",
    "*.a",
    "*.o",
    "*.obj",
    "*.bin",
    // Media and archives
    "*.jpg",
    "*.jpeg",
    "*.png",
    "*.gif",
    "*.ico",
    "*.svg",
    "*.mp3",
    "*.mp4",
    "*.zip",
    "*.tar",
    "*.gz",
    "*.7z",
    // Databases, logs, dumps
    "*.db",
    "*.sqlite",
    "*.sqlite3",
    "*.log",
    "*.dump",
    // OS noise
    ".DS_Store",
    "Thumbs.db",
    // Lock files and bundler output
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "*.min.js",
    "*.min.css",
    "*.bundle.js",
    "*.chunk.js",
    "*.map",
];

pub struct IgnoreRules {
    globs: GlobSet,
    supported_extensions: HashSet<&'static str>,
}

impl IgnoreRules {
    /// Defaults composed with user-provided patterns. Glob semantics include
    /// `**`.
    pub fn new(user_patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORES {
            for expanded in expand_pattern(pattern) {
                builder.add(
                    Glob::new(&expanded)
                        .with_context(|| format!("invalid default ignore pattern {expanded}"))?,
                );
            }
        }
        for pattern in user_patterns {
            for expanded in expand_pattern(pattern) {
                builder.add(
                    Glob::new(&expanded)
                        .with_context(|| format!("invalid ignore pattern {expanded}"))?,
                );
            }
        }
        Ok(Self {
            globs: builder.build()?,
            supported_extensions: language::supported_extensions().into_iter().collect(),
        })
    }

    pub fn default_rules() -> Result<Self> {
        Self::new(&[])
    }

    /// Whether the workspace-relative path matches an ignore pattern.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        self.globs.is_match(rel_path)
    }

    /// Whether a directory's whole subtree is ignored, so the walker can
    /// prune it. Probes with a synthetic child path because subtree patterns
    /// (`node_modules/**`) do not match the bare directory path.
    pub fn is_dir_ignored(&self, rel_dir: &str) -> bool {
        self.is_ignored(&format!("{}/__probe__", rel_dir.trim_end_matches('/')))
    }

    /// Full filter for the watcher and scanner: inside the root, a supported
    /// extension, not ignored.
    pub fn should_index(&self, path: &Path, root: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(root) else {
            return false;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let Some(ext) = rel.rsplit('.').next() else {
            return false;
        };
        if !self.supported_extensions.contains(ext) {
            return false;
        }
        !self.is_ignored(&rel)
    }

    /// Size cap for a path, honoring compound extensions like `.d.ts`.
    pub fn size_cap_for(path: &str) -> u64 {
        for (suffix, cap) in EXTENSION_SIZE_LIMITS {
            if path.ends_with(suffix) {
                return *cap;
            }
        }
        DEFAULT_MAX_FILE_SIZE
    }
}

/// A trailing-slash entry ignores the whole subtree; a bare name or glob
/// matches at any depth.
fn expand_pattern(pattern: &str) -> Vec<String> {
    if let Some(dir) = pattern.strip_suffix('/') {
        vec![format!("**/{dir}/**"), format!("{dir}/**")]
    } else {
        vec![format!("**/{pattern}"), pattern.to_string()]
    }
}
