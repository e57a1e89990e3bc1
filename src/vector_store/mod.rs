// Per-workspace vector store: one row per indexed symbol carrying the dense
// vector plus the denormalized payload columns, an FTS index over the code
// pattern, and an in-memory HNSW index for fast nearest-neighbour search.
//
// All vectors are L2-normalized, so the similarity score for an L2 distance
// d is max(0, 1 - d^2/2), which for unit vectors equals the dot product.

mod fts;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hnsw_rs::prelude::*;
use rusqlite::{Connection, params};
use tracing::debug;

use crate::extractors::Symbol;

const HNSW_MAX_LAYERS: usize = 16;
const HNSW_MAX_CONNECTIONS: usize = 32;
const HNSW_EF_CONSTRUCTION: usize = 400;

/// One searchable row per indexed symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub symbol_id: String,
    /// Fixed-dimension, L2-normalized
    pub vector: Vec<f32>,
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: u32,
    pub signature: Option<String>,
    pub doc: Option<String>,
    /// `signature + " " + name + " " + kind`; the FTS surface
    pub code_pattern: String,
    pub language: String,
}

impl VectorRow {
    /// Build the row for a symbol. The code pattern concatenates signature,
    /// name and kind so both idiom queries and plain-name queries hit it.
    pub fn for_symbol(symbol: &Symbol, vector: Vec<f32>) -> Self {
        let signature = symbol.signature.clone();
        let code_pattern = format!(
            "{} {} {}",
            signature.as_deref().unwrap_or(""),
            symbol.name,
            symbol.kind.as_str()
        )
        .trim()
        .to_string();
        Self {
            symbol_id: symbol.id.clone(),
            vector,
            name: symbol.name.clone(),
            kind: symbol.kind.as_str().to_string(),
            file_path: symbol.file_path.clone(),
            start_line: symbol.start_line,
            signature,
            doc: symbol.doc_comment.clone(),
            code_pattern,
            language: symbol.language.clone(),
        }
    }
}

/// A scored search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub symbol_id: String,
    pub name: String,
    pub kind: String,
    pub file_path: String,
    pub start_line: u32,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub language: String,
    pub score: f32,
}

/// Post-pass filters applied to any search method.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
    pub file_pattern: Option<String>,
    pub kind: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.language.is_none() && self.file_pattern.is_none() && self.kind.is_none()
    }

    pub fn matches(&self, hit: &SearchHit) -> bool {
        if let Some(language) = &self.language {
            if !hit.language.eq_ignore_ascii_case(language) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if !hit.kind.eq_ignore_ascii_case(kind) {
                return false;
            }
        }
        if let Some(pattern) = &self.file_pattern {
            match globset::Glob::new(pattern) {
                Ok(glob) => {
                    if !glob.compile_matcher().is_match(&hit.file_path) {
                        return false;
                    }
                }
                Err(_) => {
                    // An unparseable pattern filters nothing out
                }
            }
        }
        true
    }

    pub fn apply(&self, hits: Vec<SearchHit>) -> Vec<SearchHit> {
        if self.is_empty() {
            return hits;
        }
        hits.into_iter().filter(|h| self.matches(h)).collect()
    }
}

pub struct VectorStore {
    conn: Connection,
    path: PathBuf,
    dimensions: usize,
    fts_available: bool,
    hnsw: Option<Hnsw<'static, f32, DistL2>>,
    /// HNSW point index -> symbol_id
    id_mapping: Vec<String>,
    hnsw_dirty: bool,
}

impl VectorStore {
    pub fn new(path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create vector directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open vector store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn, path.to_path_buf(), dimensions)
    }

    pub fn in_memory(dimensions: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, PathBuf::from(":memory:"), dimensions)
    }

    fn with_connection(conn: Connection, path: PathBuf, dimensions: usize) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS vector_rows (
                symbol_id TEXT PRIMARY KEY,
                vector BLOB NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                signature TEXT,
                doc TEXT,
                code_pattern TEXT NOT NULL,
                language TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_vector_rows_file ON vector_rows(file_path)",
            [],
        )?;

        let fts_available = fts::create_fts_index(&conn);
        debug!(path = %path.display(), fts_available, "vector store ready");

        Ok(Self {
            conn,
            path,
            dimensions,
            fts_available,
            hnsw: None,
            id_mapping: Vec::new(),
            hnsw_dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn fts_available(&self) -> bool {
        self.fts_available
    }

    pub fn row_count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM vector_rows", [], |row| row.get(0))?)
    }

    // ----------------------------------------------------------------- writes

    pub fn upsert_rows(&mut self, rows: &[VectorRow]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO vector_rows
                 (symbol_id, vector, name, kind, file_path, start_line,
                  signature, doc, code_pattern, language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for row in rows {
                if row.vector.len() != self.dimensions {
                    anyhow::bail!(
                        "vector dimensions {} do not match expected {}",
                        row.vector.len(),
                        self.dimensions
                    );
                }
                stmt.execute(params![
                    row.symbol_id,
                    encode_vector(&row.vector),
                    row.name,
                    row.kind,
                    row.file_path,
                    row.start_line,
                    row.signature,
                    row.doc,
                    row.code_pattern,
                    row.language,
                ])?;
            }
        }
        tx.commit()?;
        self.hnsw_dirty = true;
        Ok(rows.len())
    }

    pub fn delete_by_symbol_ids(&mut self, symbol_ids: &[String]) -> Result<usize> {
        if symbol_ids.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM vector_rows WHERE symbol_id = ?1")?;
            for id in symbol_ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        if deleted > 0 {
            self.hnsw_dirty = true;
        }
        Ok(deleted)
    }

    // ---------------------------------------------------------------- queries

    /// Full-text pass over the code pattern. Candidates come from the FTS
    /// index, then every whitespace token of the query (including ones too
    /// short for the index) is verified as a substring. Returns raw hits;
    /// filters and fallbacks are the caller's business.
    pub fn search_text(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if !self.fts_available {
            return Ok(Vec::new());
        }
        let candidates = match fts::fts_match_expression(query) {
            Some(expression) => {
                let mut stmt = self.conn.prepare(
                    "SELECT r.symbol_id, r.name, r.kind, r.file_path, r.start_line,
                            r.signature, r.doc, r.language, r.code_pattern,
                            bm25(vector_fts) AS rank
                     FROM vector_fts
                     JOIN vector_rows r ON r.rowid = vector_fts.rowid
                     WHERE vector_fts MATCH ?1
                     ORDER BY rank
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![expression, (limit * 4) as i64], |row| {
                        Ok((row_to_hit(row, bm25_to_score(row.get::<_, f64>("rank")?))?, row.get::<_, String>("code_pattern")?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                // No indexable token; scan is the only option
                let mut stmt = self.conn.prepare(
                    "SELECT symbol_id, name, kind, file_path, start_line,
                            signature, doc, language, code_pattern
                     FROM vector_rows",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row_to_hit(row, 0.5)?, row.get::<_, String>("code_pattern")?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|(_, pattern)| fts::matches_all_tokens(pattern, query))
            .map(|(hit, _)| hit)
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }

    /// Pattern search is the text pass with the query taken verbatim; the
    /// token verification is what makes code idioms like `: BaseClass` work.
    pub fn search_pattern(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.search_text(query, limit)
    }

    /// Nearest-neighbour pass over the vectors. Uses the HNSW index when it
    /// is fresh, otherwise a linear scan; scores are exact either way.
    pub fn search_semantic(
        &self,
        query_vector: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>> {
        if query_vector.len() != self.dimensions {
            anyhow::bail!(
                "query vector dimensions {} do not match expected {}",
                query_vector.len(),
                self.dimensions
            );
        }

        let candidate_ids: Option<Vec<String>> = match (&self.hnsw, self.hnsw_dirty) {
            (Some(hnsw), false) => {
                let ef_search = (limit * 2).max(50);
                let neighbours = hnsw.search(query_vector, limit.max(10), ef_search);
                Some(
                    neighbours
                        .into_iter()
                        .filter_map(|n| self.id_mapping.get(n.d_id).cloned())
                        .collect(),
                )
            }
            _ => None,
        };

        let mut hits = Vec::new();
        match candidate_ids {
            Some(ids) => {
                let mut stmt = self.conn.prepare(
                    "SELECT symbol_id, name, kind, file_path, start_line,
                            signature, doc, language, vector
                     FROM vector_rows WHERE symbol_id = ?1",
                )?;
                for id in ids {
                    let row = stmt.query_row([&id], |row| {
                        let vector: Vec<u8> = row.get("vector")?;
                        Ok((row_to_hit(row, 0.0)?, vector))
                    });
                    if let Ok((mut hit, blob)) = row {
                        let vector = decode_vector(&blob);
                        if is_zero(&vector) {
                            continue; // stored in degraded mode, not embeddable yet
                        }
                        hit.score = l2_score(query_vector, &vector);
                        if hit.score >= min_score {
                            hits.push(hit);
                        }
                    }
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT symbol_id, name, kind, file_path, start_line,
                            signature, doc, language, vector
                     FROM vector_rows",
                )?;
                let rows = stmt.query_map([], |row| {
                    let vector: Vec<u8> = row.get("vector")?;
                    Ok((row_to_hit(row, 0.0)?, vector))
                })?;
                for row in rows {
                    let (mut hit, blob) = row?;
                    let vector = decode_vector(&blob);
                    if is_zero(&vector) {
                        continue;
                    }
                    hit.score = l2_score(query_vector, &vector);
                    if hit.score >= min_score {
                        hits.push(hit);
                    }
                }
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Hybrid search: text and semantic passes fused by Reciprocal Rank
    /// Fusion, `score = sum(1 / (k + rank))` with k = 60.
    pub fn search_hybrid(
        &self,
        query: &str,
        query_vector: Option<&[f32]>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        const RRF_K: f32 = 60.0;

        let text_hits = self.search_text(query, limit * 2)?;
        let semantic_hits = match query_vector {
            Some(vector) => self.search_semantic(vector, limit * 2, 0.0)?,
            None => Vec::new(),
        };

        let mut fused: Vec<SearchHit> = Vec::new();
        let mut scores: std::collections::HashMap<String, f32> = std::collections::HashMap::new();
        for (rank, hit) in text_hits.iter().enumerate() {
            *scores.entry(hit.symbol_id.clone()).or_default() += 1.0 / (RRF_K + rank as f32 + 1.0);
        }
        for (rank, hit) in semantic_hits.iter().enumerate() {
            *scores.entry(hit.symbol_id.clone()).or_default() += 1.0 / (RRF_K + rank as f32 + 1.0);
        }

        for hit in text_hits.into_iter().chain(semantic_hits) {
            if let Some(score) = scores.remove(&hit.symbol_id) {
                let mut hit = hit;
                hit.score = score;
                fused.push(hit);
            }
        }
        fused.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol_id.cmp(&b.symbol_id))
        });
        fused.truncate(limit);
        Ok(fused)
    }

    // ------------------------------------------------------------------- hnsw

    /// Rebuild the in-memory HNSW index from the stored rows. Called after a
    /// scan completes; queries between flush and rebuild use the exact scan.
    pub fn rebuild_hnsw(&mut self) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT symbol_id, vector FROM vector_rows ORDER BY symbol_id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        // Zero vectors are degraded-mode placeholders; they cannot be indexed
        let rows: Vec<(String, Vec<u8>)> = rows
            .into_iter()
            .filter(|(_, blob)| !is_zero(&decode_vector(blob)))
            .collect();
        if rows.is_empty() {
            self.hnsw = None;
            self.id_mapping.clear();
            self.hnsw_dirty = false;
            return Ok(0);
        }

        let count = rows.len();
        let mut hnsw = Hnsw::<'static, f32, DistL2>::new(
            HNSW_MAX_CONNECTIONS,
            count,
            HNSW_MAX_LAYERS,
            HNSW_EF_CONSTRUCTION,
            DistL2 {},
        );

        self.id_mapping.clear();
        self.id_mapping.reserve(count);
        let vectors: Vec<Vec<f32>> = rows
            .iter()
            .map(|(id, blob)| {
                self.id_mapping.push(id.clone());
                decode_vector(blob)
            })
            .collect();
        let insertion: Vec<(&Vec<f32>, usize)> =
            vectors.iter().enumerate().map(|(i, v)| (v, i)).collect();
        hnsw.parallel_insert(&insertion);
        hnsw.set_searching_mode(true);

        self.hnsw = Some(hnsw);
        self.hnsw_dirty = false;
        debug!(vectors = count, "HNSW index rebuilt");
        Ok(count)
    }

    pub fn has_hnsw_index(&self) -> bool {
        self.hnsw.is_some() && !self.hnsw_dirty
    }
}

fn row_to_hit(row: &rusqlite::Row, score: f32) -> rusqlite::Result<SearchHit> {
    Ok(SearchHit {
        symbol_id: row.get("symbol_id")?,
        name: row.get("name")?,
        kind: row.get("kind")?,
        file_path: row.get("file_path")?,
        start_line: row.get("start_line")?,
        signature: row.get("signature")?,
        doc: row.get("doc")?,
        language: row.get("language")?,
        score,
    })
}

/// bm25() returns lower-is-better negative ranks; fold into (0, 1].
fn bm25_to_score(rank: f64) -> f32 {
    (1.0 / (1.0 + rank.abs())) as f32
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn is_zero(vector: &[f32]) -> bool {
    vector.iter().all(|&x| x == 0.0)
}

/// Similarity from L2 distance between normalized vectors.
fn l2_score(a: &[f32], b: &[f32]) -> f32 {
    let d2: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
    (1.0 - d2 / 2.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    fn row(symbol_id: &str, name: &str, signature: &str, vector: Vec<f32>) -> VectorRow {
        VectorRow {
            symbol_id: symbol_id.into(),
            vector,
            name: name.into(),
            kind: "function".into(),
            file_path: format!("src/{name}.py"),
            start_line: 1,
            signature: Some(signature.into()),
            doc: None,
            code_pattern: format!("{signature} {name} function"),
            language: "python".into(),
        }
    }

    #[test]
    fn upsert_is_idempotent_per_symbol() {
        let mut store = VectorStore::in_memory(3).unwrap();
        let r = row("s1", "alpha", "def alpha():", unit(vec![1.0, 0.0, 0.0]));
        store.upsert_rows(&[r.clone()]).unwrap();
        store.upsert_rows(&[r]).unwrap();
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[test]
    fn rejects_wrong_dimensions() {
        let mut store = VectorStore::in_memory(3).unwrap();
        let bad = row("s1", "alpha", "def alpha():", vec![1.0, 0.0]);
        assert!(store.upsert_rows(&[bad]).is_err());
    }

    #[test]
    fn pattern_search_matches_code_idioms() {
        let mut store = VectorStore::in_memory(3).unwrap();
        store
            .upsert_rows(&[
                row(
                    "s1",
                    "Foo",
                    "class Foo(BaseClass):",
                    unit(vec![1.0, 0.0, 0.0]),
                ),
                row("s2", "bar", "def bar(x):", unit(vec![0.0, 1.0, 0.0])),
            ])
            .unwrap();

        let hits = store.search_pattern(": BaseClass", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].symbol_id, "s1");

        let miss = store.search_pattern(": MissingClass", 10).unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn semantic_search_scores_by_l2() {
        let mut store = VectorStore::in_memory(3).unwrap();
        store
            .upsert_rows(&[
                row("near", "near", "def near():", unit(vec![1.0, 0.1, 0.0])),
                row("far", "far", "def far():", unit(vec![0.0, 1.0, 0.0])),
            ])
            .unwrap();

        let query = unit(vec![1.0, 0.0, 0.0]);
        let hits = store.search_semantic(&query, 10, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].symbol_id, "near");
        assert!(hits[0].score > 0.9);
    }

    #[test]
    fn hybrid_fuses_text_and_semantic() {
        let mut store = VectorStore::in_memory(3).unwrap();
        store
            .upsert_rows(&[
                row(
                    "both",
                    "parse_config",
                    "def parse_config(path):",
                    unit(vec![1.0, 0.0, 0.0]),
                ),
                row(
                    "text_only",
                    "parse_args",
                    "def parse_args(argv):",
                    unit(vec![0.0, 1.0, 0.0]),
                ),
            ])
            .unwrap();

        let query_vector = unit(vec![1.0, 0.05, 0.0]);
        let hits = store.search_hybrid("parse", Some(&query_vector), 10).unwrap();
        assert_eq!(hits.len(), 2);
        // The row ranked by both passes wins
        assert_eq!(hits[0].symbol_id, "both");
    }

    #[test]
    fn hybrid_ordering_is_stable() {
        let mut store = VectorStore::in_memory(3).unwrap();
        store
            .upsert_rows(&[
                row("a", "handler_a", "def handler_a():", unit(vec![1.0, 0.0, 0.0])),
                row("b", "handler_b", "def handler_b():", unit(vec![1.0, 0.0, 0.0])),
            ])
            .unwrap();
        let query_vector = unit(vec![1.0, 0.0, 0.0]);
        let first = store.search_hybrid("handler", Some(&query_vector), 10).unwrap();
        let second = store.search_hybrid("handler", Some(&query_vector), 10).unwrap();
        let ids1: Vec<_> = first.iter().map(|h| h.symbol_id.clone()).collect();
        let ids2: Vec<_> = second.iter().map(|h| h.symbol_id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn delete_clears_rows_and_search(){
        let mut store = VectorStore::in_memory(3).unwrap();
        store
            .upsert_rows(&[row("s1", "alpha", "def alpha():", unit(vec![1.0, 0.0, 0.0]))])
            .unwrap();
        assert_eq!(store.delete_by_symbol_ids(&["s1".into()]).unwrap(), 1);
        assert_eq!(store.row_count().unwrap(), 0);
        assert!(store.search_text("alpha", 10).unwrap().is_empty());
    }

    #[test]
    fn hnsw_rebuild_and_search() {
        let mut store = VectorStore::in_memory(3).unwrap();
        store
            .upsert_rows(&[
                row("a", "a", "def a():", unit(vec![1.0, 0.0, 0.0])),
                row("b", "b", "def b():", unit(vec![0.0, 1.0, 0.0])),
                row("c", "c", "def c():", unit(vec![0.0, 0.0, 1.0])),
            ])
            .unwrap();
        assert!(!store.has_hnsw_index());
        assert_eq!(store.rebuild_hnsw().unwrap(), 3);
        assert!(store.has_hnsw_index());

        let hits = store
            .search_semantic(&unit(vec![0.9, 0.1, 0.0]), 2, 0.5)
            .unwrap();
        assert_eq!(hits[0].symbol_id, "a");
    }

    #[test]
    fn filters_restrict_results() {
        let hit = SearchHit {
            symbol_id: "s".into(),
            name: "alpha".into(),
            kind: "function".into(),
            file_path: "src/deep/alpha.py".into(),
            start_line: 1,
            signature: None,
            doc: None,
            language: "python".into(),
            score: 1.0,
        };
        let mut filters = SearchFilters::default();
        assert!(filters.matches(&hit));

        filters.language = Some("rust".into());
        assert!(!filters.matches(&hit));

        filters.language = Some("Python".into());
        filters.file_pattern = Some("src/**/*.py".into());
        assert!(filters.matches(&hit));

        filters.file_pattern = Some("tests/**".into());
        assert!(!filters.matches(&hit));
    }
}
