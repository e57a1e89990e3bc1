// Workspace scanner: drives full and incremental indexing.
//
// Discovery walks the tree (symlinks are not followed, so link loops cannot
// recurse), the ignore rules and size caps filter, and Blake3 hashes decide
// what actually changed. Extraction output accumulates in a columnar buffer
// that flushes on SYMBOL count, not file count, so a repo with a few huge
// files cannot balloon peak memory. Each flush writes storage, embeds the
// new symbols and upserts their vector rows; an embedding failure degrades
// the flush (symbols land without vectors and are queued for retry).

mod ignore;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::database::{FileRecord, SymbolDatabase};
use crate::embeddings::{EmbeddingManager, EmbeddingTask};
use crate::extractors::{
    self, ColumnarTables, Relationship, SourceFile, SymbolColumns, UnresolvedEdge,
};
use crate::vector_store::{VectorRow, VectorStore};
use crate::watcher::{FileChange, FileEvent};

pub use ignore::{DEFAULT_MAX_FILE_SIZE, IgnoreRules};

/// Flush the streaming buffer once this many symbols have accumulated.
pub const DEFAULT_SYMBOL_BUFFER_THRESHOLD: usize = 1000;

/// How many files to hand to one extraction batch.
const EXTRACTION_CHUNK: usize = 64;

#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_skipped_too_large: usize,
    pub files_deleted: usize,
    pub symbols_indexed: usize,
    pub extraction_errors: usize,
    pub edges_resolved: usize,
    /// Set when changes invalidated the reachability closure and nobody has
    /// rebuilt it yet
    pub closure_stale: bool,
}

pub struct WorkspaceScanner {
    root: PathBuf,
    ignore: Arc<IgnoreRules>,
    db: Arc<Mutex<SymbolDatabase>>,
    vectors: Arc<Mutex<VectorStore>>,
    embeddings: Arc<EmbeddingManager>,
    buffer_threshold: usize,
    /// Symbols stored without vectors after an embedding failure
    pending_embeddings: Mutex<Vec<String>>,
}

impl WorkspaceScanner {
    pub fn new(
        root: PathBuf,
        ignore: Arc<IgnoreRules>,
        db: Arc<Mutex<SymbolDatabase>>,
        vectors: Arc<Mutex<VectorStore>>,
        embeddings: Arc<EmbeddingManager>,
    ) -> Self {
        Self {
            root,
            ignore,
            db,
            vectors,
            embeddings,
            buffer_threshold: DEFAULT_SYMBOL_BUFFER_THRESHOLD,
            pending_embeddings: Mutex::new(Vec::new()),
        }
    }

    pub fn with_buffer_threshold(mut self, threshold: usize) -> Self {
        self.buffer_threshold = threshold.max(1);
        self
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Workspace-relative path with forward slashes.
    fn rel_path(&self, path: &std::path::Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    /// All indexable files under the root, in walk order.
    pub fn discover(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                // Prune ignored directories instead of walking into them
                if !entry.file_type().is_dir() {
                    return true;
                }
                match entry.path().strip_prefix(&self.root) {
                    Ok(rel) if rel.as_os_str().is_empty() => true,
                    Ok(rel) => {
                        let rel = rel.to_string_lossy().replace('\\', "/");
                        !self.ignore.is_dir_ignored(&rel)
                    }
                    Err(_) => false,
                }
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.ignore.should_index(path, &self.root))
            .collect()
    }

    /// Full scan: index everything new or changed, drop what disappeared,
    /// then resolve cross-file references and rebuild the closure eagerly.
    pub async fn full_scan(&self) -> Result<ScanStats> {
        let started = std::time::Instant::now();
        let mut stats = ScanStats::default();
        let discovered = self.discover();
        stats.files_scanned = discovered.len();

        let mut seen: HashSet<String> = HashSet::with_capacity(discovered.len());
        let mut to_index: Vec<(String, String, String, i64)> = Vec::new(); // rel, language, content, size

        for path in &discovered {
            let Some(rel) = self.rel_path(path) else { continue };
            let Some(language) = extractors::language::language_for_path(&rel) else {
                continue;
            };
            seen.insert(rel.clone());

            let metadata = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(file = %rel, error = %e, "stat failed, skipping");
                    continue;
                }
            };
            if metadata.len() > IgnoreRules::size_cap_for(&rel) {
                info!(file = %rel, size = metadata.len(), "file exceeds size cap, skipped");
                stats.files_skipped_too_large += 1;
                continue;
            }

            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %rel, error = %e, "read failed, skipping");
                    continue;
                }
            };
            let hash = blake3::hash(content.as_bytes()).to_hex().to_string();

            let unchanged = {
                let db = self.db.lock().await;
                db.get_file_hash(&rel)?.as_deref() == Some(hash.as_str())
            };
            if unchanged {
                stats.files_unchanged += 1;
                continue;
            }

            to_index.push((rel, language.to_string(), content, metadata.len() as i64));
        }

        // Deletions: indexed paths no longer on disk
        let missing: Vec<String> = {
            let db = self.db.lock().await;
            db.all_file_paths()?
                .into_iter()
                .filter(|p| !seen.contains(p))
                .collect()
        };
        if !missing.is_empty() {
            self.delete_files(&missing, &mut stats).await?;
        }

        let mut unresolved: Vec<UnresolvedEdge> = Vec::new();
        let mut preserved: Vec<Relationship> = Vec::new();
        let mut buffer = ColumnarTables::default();
        for chunk in to_index.chunks(EXTRACTION_CHUNK) {
            self.index_chunk(chunk, &mut buffer, &mut unresolved, &mut preserved, &mut stats)
                .await?;
        }
        self.flush_buffer(&mut buffer).await?;

        // Cross-file resolution needs every symbol inserted first
        {
            let mut db = self.db.lock().await;
            stats.edges_resolved = db.resolve_edges(&unresolved)?;
            db.resolve_identifier_targets()?;
            self.restore_inbound_edges(&mut db, &preserved)?;
        }

        let wrote = stats.files_indexed > 0 || stats.files_deleted > 0;
        if wrote {
            // Eager closure rebuild after a full scan
            {
                let mut db = self.db.lock().await;
                crate::closure::compute_transitive_closure(&mut db, Default::default())?;
            }
            let mut vectors = self.vectors.lock().await;
            if let Err(e) = vectors.rebuild_hnsw() {
                warn!(error = %e, "HNSW rebuild failed; semantic search uses exact scan");
            }
        }

        self.retry_pending_embeddings().await;

        info!(
            files_indexed = stats.files_indexed,
            files_unchanged = stats.files_unchanged,
            files_deleted = stats.files_deleted,
            symbols = stats.symbols_indexed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workspace scan complete"
        );
        Ok(stats)
    }

    /// Apply a debounced batch of watcher changes. Leaves the closure stale;
    /// callers rebuild lazily on the next explicit request.
    pub async fn apply_changes(&self, changes: &[FileChange]) -> Result<ScanStats> {
        let mut stats = ScanStats::default();
        let mut unresolved = Vec::new();
        let mut preserved: Vec<Relationship> = Vec::new();
        let mut buffer = ColumnarTables::default();

        for change in changes {
            let Some(rel) = self.rel_path(&change.path) else {
                continue;
            };
            match change.event {
                FileEvent::Deleted => {
                    self.delete_files(std::slice::from_ref(&rel), &mut stats)
                        .await?;
                }
                FileEvent::Created | FileEvent::Modified => {
                    let Some(language) = extractors::language::language_for_path(&rel) else {
                        continue;
                    };
                    stats.files_scanned += 1;
                    let metadata = match std::fs::metadata(&change.path) {
                        Ok(m) => m,
                        Err(_) => continue, // raced with a delete
                    };
                    if metadata.len() > IgnoreRules::size_cap_for(&rel) {
                        stats.files_skipped_too_large += 1;
                        continue;
                    }
                    let Ok(content) = std::fs::read_to_string(&change.path) else {
                        continue;
                    };
                    let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
                    let unchanged = {
                        let db = self.db.lock().await;
                        db.get_file_hash(&rel)?.as_deref() == Some(hash.as_str())
                    };
                    if unchanged {
                        stats.files_unchanged += 1;
                        continue;
                    }
                    let entry = (
                        rel,
                        language.to_string(),
                        content,
                        metadata.len() as i64,
                    );
                    self.index_chunk(
                        std::slice::from_ref(&entry),
                        &mut buffer,
                        &mut unresolved,
                        &mut preserved,
                        &mut stats,
                    )
                    .await?;
                }
            }
        }

        self.flush_buffer(&mut buffer).await?;
        {
            let mut db = self.db.lock().await;
            stats.edges_resolved = db.resolve_edges(&unresolved)?;
            db.resolve_identifier_targets()?;
            self.restore_inbound_edges(&mut db, &preserved)?;
        }
        stats.closure_stale = stats.files_indexed > 0 || stats.files_deleted > 0;
        Ok(stats)
    }

    async fn delete_files(&self, rels: &[String], stats: &mut ScanStats) -> Result<()> {
        let deleted_ids = {
            let mut db = self.db.lock().await;
            db.delete_files_batch(&rels.to_vec())?
        };
        if !deleted_ids.is_empty() || !rels.is_empty() {
            let mut vectors = self.vectors.lock().await;
            vectors.delete_by_symbol_ids(&deleted_ids)?;
        }
        stats.files_deleted += rels.len();
        debug!(files = rels.len(), symbols = deleted_ids.len(), "deleted from index");
        Ok(())
    }

    /// Extract one chunk of (rel, language, content, size) entries and push
    /// into the streaming buffer, flushing on the symbol threshold.
    async fn index_chunk(
        &self,
        entries: &[(String, String, String, i64)],
        buffer: &mut ColumnarTables,
        unresolved: &mut Vec<UnresolvedEdge>,
        preserved: &mut Vec<Relationship>,
        stats: &mut ScanStats,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        // A modified file replaces everything it previously owned. Inbound
        // edges from other files are captured first and restored after the
        // scan; content-stable IDs reattach them when the target survived.
        {
            let mut db = self.db.lock().await;
            let existing: Vec<String> = entries
                .iter()
                .map(|(rel, ..)| rel.clone())
                .filter(|rel| db.get_file(rel).ok().flatten().is_some())
                .collect();
            if !existing.is_empty() {
                preserved.extend(db.inbound_edges_for_files(&existing)?);
                let stale_ids = db.delete_files_batch(&existing)?;
                drop(db);
                let mut vectors = self.vectors.lock().await;
                vectors.delete_by_symbol_ids(&stale_ids)?;
            }
        }

        {
            let db = self.db.lock().await;
            for (rel, language, content, size) in entries {
                db.add_file(&FileRecord {
                    path: rel.clone(),
                    language: language.clone(),
                    content_hash: blake3::hash(content.as_bytes()).to_hex().to_string(),
                    size_bytes: *size,
                    last_indexed: now,
                })?;
            }
        }

        let sources: Vec<SourceFile> = entries
            .iter()
            .map(|(rel, language, content, _)| SourceFile {
                path: rel.clone(),
                language: language.clone(),
                content: content.clone(),
            })
            .collect();
        let outcome = extractors::extract_batch(&sources);
        stats.extraction_errors += outcome.errors.len();
        for error in &outcome.errors {
            warn!(file = %error.file_path, error = %error.message, "extraction failed");
        }

        for result in &outcome.results {
            stats.symbols_indexed += result.symbols.len();
            unresolved.extend(result.unresolved.iter().cloned());
            buffer.push_result(result);
        }
        stats.files_indexed += entries.len();

        if buffer.symbol_count() >= self.buffer_threshold {
            self.flush_buffer(buffer).await?;
        }
        Ok(())
    }

    /// Re-insert captured inbound edges; missing endpoints are skipped by
    /// the batch insert, which is exactly the survive-iff-identity-matches
    /// contract.
    fn restore_inbound_edges(
        &self,
        db: &mut SymbolDatabase,
        preserved: &[Relationship],
    ) -> Result<()> {
        if preserved.is_empty() {
            return Ok(());
        }
        let mut columns = crate::extractors::RelationshipColumns::default();
        for edge in preserved {
            columns.push(edge);
        }
        db.add_relationships_batch(&columns)?;
        Ok(())
    }

    /// One streaming flush: storage batch, embeddings, vector upsert.
    async fn flush_buffer(&self, buffer: &mut ColumnarTables) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        {
            let mut db = self.db.lock().await;
            db.add_symbols_batch(&buffer.symbols)?;
            db.add_identifiers_batch(&buffer.identifiers)?;
            db.add_relationships_batch(&buffer.relationships)?;
        }

        let texts = embedding_texts(&buffer.symbols);
        match self
            .embeddings
            .embed_batch(&texts, EmbeddingTask::Document)
            .await
        {
            Ok(vectors) => {
                let rows = vector_rows(&buffer.symbols, vectors);
                let mut store = self.vectors.lock().await;
                store
                    .upsert_rows(&rows)
                    .context("vector upsert failed after embedding")?;
            }
            Err(e) => {
                // Degraded flush: rows land with zero vectors so text and
                // pattern search stay alive; real vectors come on retry
                warn!(error = %e, symbols = buffer.symbols.len(), "embedding failed; storing rows without vectors");
                let mut store = self.vectors.lock().await;
                let zeros =
                    vec![vec![0.0f32; store.dimensions()]; buffer.symbols.len()];
                let rows = vector_rows(&buffer.symbols, zeros);
                store
                    .upsert_rows(&rows)
                    .context("vector upsert failed in degraded mode")?;
                drop(store);
                let mut pending = self.pending_embeddings.lock().await;
                pending.extend(buffer.symbols.ids.iter().cloned());
            }
        }

        buffer.clear();
        Ok(())
    }

    /// Retry symbols that were stored without vectors.
    pub async fn retry_pending_embeddings(&self) {
        let ids: Vec<String> = {
            let mut pending = self.pending_embeddings.lock().await;
            std::mem::take(&mut *pending)
        };
        if ids.is_empty() {
            return;
        }

        let symbols = {
            let db = self.db.lock().await;
            match db.get_symbols_by_ids(&ids) {
                Ok(symbols) => symbols,
                Err(_) => return,
            }
        };
        let texts: Vec<String> = symbols.iter().map(crate::embeddings::embedding_text).collect();
        match self.embeddings.embed_batch(&texts, EmbeddingTask::Document).await {
            Ok(vectors) => {
                let rows: Vec<VectorRow> = symbols
                    .iter()
                    .zip(vectors)
                    .map(|(symbol, vector)| VectorRow::for_symbol(symbol, vector))
                    .collect();
                let mut store = self.vectors.lock().await;
                if let Err(e) = store.upsert_rows(&rows) {
                    warn!(error = %e, "vector upsert failed on retry");
                }
            }
            Err(e) => {
                debug!(error = %e, "embedding retry failed; will retry on next scan");
                let mut pending = self.pending_embeddings.lock().await;
                pending.extend(ids);
            }
        }
    }
}

/// Embedding text per symbol, straight from the columns: doc comment plus
/// signature, falling back to "{kind} {name}".
fn embedding_texts(symbols: &SymbolColumns) -> Vec<String> {
    (0..symbols.len())
        .map(|i| {
            let mut parts: Vec<&str> = Vec::new();
            if let Some(doc) = symbols.doc_comments[i].as_deref() {
                if !doc.is_empty() {
                    parts.push(doc);
                }
            }
            if let Some(signature) = symbols.signatures[i].as_deref() {
                if !signature.is_empty() {
                    parts.push(signature);
                }
            }
            if parts.is_empty() {
                format!("{} {}", symbols.kinds[i], symbols.names[i])
            } else {
                parts.join("\n")
            }
        })
        .collect()
}

fn vector_rows(symbols: &SymbolColumns, vectors: Vec<Vec<f32>>) -> Vec<VectorRow> {
    symbols
        .ids
        .iter()
        .enumerate()
        .zip(vectors)
        .map(|((i, id), vector)| {
            let signature = symbols.signatures[i].clone();
            let code_pattern = format!(
                "{} {} {}",
                signature.as_deref().unwrap_or(""),
                symbols.names[i],
                symbols.kinds[i]
            )
            .trim()
            .to_string();
            VectorRow {
                symbol_id: id.clone(),
                vector,
                name: symbols.names[i].clone(),
                kind: symbols.kinds[i].to_string(),
                file_path: symbols.file_paths[i].clone(),
                start_line: symbols.start_lines[i],
                signature,
                doc: symbols.doc_comments[i].clone(),
                code_pattern,
                language: symbols.languages[i].clone(),
            }
        })
        .collect()
}
