// Extraction: source bytes in, symbols/identifiers/relationships out.
//
// Parsing is tree-sitter per language; the walk itself is language-agnostic
// and driven by the static tables in `language.rs`. Batch extraction fans out
// over rayon's worker pool (bounded by available cores) and preserves input
// order; a file that fails to parse contributes an empty result and an entry
// on the batch error channel, never a batch failure.

pub mod base;
pub mod columnar;
pub mod language;
mod walker;

use anyhow::{Result, anyhow};
use rayon::prelude::*;
use tracing::{debug, warn};

pub use base::{
    Identifier, IdentifierKind, Relationship, RelationshipKind, Symbol, SymbolKind, Visibility,
    symbol_id,
};
pub use columnar::{ColumnarTables, IdentifierColumns, RelationshipColumns, SymbolColumns};
pub use walker::UnresolvedEdge;

/// Everything extracted from a single file.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub file_path: String,
    pub language: String,
    pub symbols: Vec<Symbol>,
    pub identifiers: Vec<Identifier>,
    pub relationships: Vec<Relationship>,
    /// Edges whose target name was not defined in this file; the indexer
    /// resolves these against the whole workspace after insertion
    pub unresolved: Vec<UnresolvedEdge>,
}

impl ExtractionResult {
    fn empty(file_path: &str, language: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            language: language.to_string(),
            ..Default::default()
        }
    }
}

/// A per-file extraction failure, reported alongside the batch results.
#[derive(Debug, Clone)]
pub struct ExtractionError {
    pub file_path: String,
    pub message: String,
}

/// Batch output: results in input order plus the error channel.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: Vec<ExtractionResult>,
    pub errors: Vec<ExtractionError>,
}

/// A file queued for extraction.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Workspace-relative path, forward slashes
    pub path: String,
    pub language: String,
    pub content: String,
}

/// Extract one file. Fails on unknown language or an unparseable tree; batch
/// callers catch the failure per file.
pub fn extract(source: &str, language: &str, file_path: &str) -> Result<ExtractionResult> {
    let cfg = language::config_for(language)
        .ok_or_else(|| anyhow!("unsupported language: {language}"))?;
    let grammar = language::grammar_for(language, file_path)
        .ok_or_else(|| anyhow!("no grammar for language: {language}"))?;

    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| anyhow!("failed to configure parser for {language}: {e}"))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("parse returned no tree for {file_path}"))?;

    let (symbols, identifiers, relationships, unresolved) =
        walker::Walker::new(cfg, file_path, source).walk(&tree);

    debug!(
        file = file_path,
        symbols = symbols.len(),
        identifiers = identifiers.len(),
        relationships = relationships.len(),
        "extracted"
    );

    Ok(ExtractionResult {
        file_path: file_path.to_string(),
        language: language.to_string(),
        symbols,
        identifiers,
        relationships,
        unresolved,
    })
}

/// Extract many files in parallel, preserving input order.
pub fn extract_batch(files: &[SourceFile]) -> BatchOutcome {
    let per_file: Vec<(ExtractionResult, Option<ExtractionError>)> = files
        .par_iter()
        .map(|file| match extract(&file.content, &file.language, &file.path) {
            Ok(result) => (result, None),
            Err(e) => {
                warn!(file = %file.path, error = %e, "extraction failed, emitting empty result");
                (
                    ExtractionResult::empty(&file.path, &file.language),
                    Some(ExtractionError {
                        file_path: file.path.clone(),
                        message: e.to_string(),
                    }),
                )
            }
        })
        .collect();

    let mut outcome = BatchOutcome::default();
    for (result, error) in per_file {
        outcome.results.push(result);
        if let Some(error) = error {
            outcome.errors.push(error);
        }
    }
    outcome
}

/// Batch extraction straight into column stores, for callers that go directly
/// to bulk storage without touching row objects.
pub fn extract_to_columnar(files: &[SourceFile]) -> (ColumnarTables, Vec<UnresolvedEdge>, Vec<ExtractionError>) {
    let outcome = extract_batch(files);
    let mut tables = ColumnarTables::default();
    let mut unresolved = Vec::new();
    for result in &outcome.results {
        tables.push_result(result);
        unresolved.extend(result.unresolved.iter().cloned());
    }
    (tables, unresolved, outcome.errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALL_GRAPH: &str = "\
def function_a():
    function_b()
    function_c()

def function_b():
    pass

def function_c():
    function_b()
";

    #[test]
    fn extracts_python_functions_and_calls() {
        let result = extract(CALL_GRAPH, "python", "graph.py").unwrap();

        let names: Vec<&str> = result.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["function_a", "function_b", "function_c"]);
        assert!(result.symbols.iter().all(|s| s.kind == SymbolKind::Function));

        // Calls resolve inside the file to Call relationships
        let calls: Vec<(&str, &str)> = result
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipKind::Call)
            .map(|r| {
                let from = result.symbols.iter().find(|s| s.id == r.from_symbol_id).unwrap();
                let to = result.symbols.iter().find(|s| s.id == r.to_symbol_id).unwrap();
                (from.name.as_str(), to.name.as_str())
            })
            .collect();
        assert!(calls.contains(&("function_a", "function_b")));
        assert!(calls.contains(&("function_a", "function_c")));
        assert!(calls.contains(&("function_c", "function_b")));
        assert_eq!(calls.len(), 3);

        // Call identifiers carry their containing symbol and resolved target
        let call_ids: Vec<&Identifier> = result
            .identifiers
            .iter()
            .filter(|i| i.kind == IdentifierKind::Call)
            .collect();
        assert_eq!(call_ids.len(), 3);
        assert!(call_ids.iter().all(|i| i.containing_symbol_id.is_some()));
        assert!(call_ids.iter().all(|i| i.target_symbol_id.is_some()));
    }

    #[test]
    fn methods_get_parent_and_kind() {
        let source = "\
class UserService:
    \"\"\"Service for user lookups.\"\"\"

    def get_user(self, user_id):
        return self.repo.fetch(user_id)
";
        let result = extract(source, "python", "service.py").unwrap();
        let class = result
            .symbols
            .iter()
            .find(|s| s.name == "UserService")
            .unwrap();
        assert_eq!(class.kind, SymbolKind::Class);
        assert_eq!(class.doc_comment.as_deref(), Some("Service for user lookups."));

        let method = result.symbols.iter().find(|s| s.name == "get_user").unwrap();
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent_symbol_id.as_deref(), Some(class.id.as_str()));

        // Containment edge mirrors the parent link
        assert!(result.relationships.iter().any(|r| {
            r.kind == RelationshipKind::Contains
                && r.from_symbol_id == class.id
                && r.to_symbol_id == method.id
        }));
    }

    #[test]
    fn cross_file_heritage_stays_unresolved() {
        let source = "class Foo(BaseClass):\n    pass\n";
        let result = extract(source, "python", "foo.py").unwrap();
        assert_eq!(result.unresolved.len(), 1);
        let edge = &result.unresolved[0];
        assert_eq!(edge.to_name, "BaseClass");
        assert_eq!(edge.kind, RelationshipKind::Extends);

        let foo = result.symbols.iter().find(|s| s.name == "Foo").unwrap();
        assert_eq!(edge.from_symbol_id, foo.id);
        assert_eq!(foo.signature.as_deref(), Some("class Foo(BaseClass):"));
    }

    #[test]
    fn extraction_is_deterministic_across_runs() {
        let a = extract(CALL_GRAPH, "python", "graph.py").unwrap();
        let b = extract(CALL_GRAPH, "python", "graph.py").unwrap();
        let ids_a: Vec<&str> = a.symbols.iter().map(|s| s.id.as_str()).collect();
        let ids_b: Vec<&str> = b.symbols.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn typescript_interfaces_and_implements() {
        let source = "\
interface Repo {
  fetch(id: string): User;
}

class SqlRepo implements Repo {
  fetch(id: string): User {
    return query(id);
  }
}
";
        let result = extract(source, "typescript", "repo.ts").unwrap();
        let interface = result.symbols.iter().find(|s| s.name == "Repo").unwrap();
        assert_eq!(interface.kind, SymbolKind::Interface);

        let class = result.symbols.iter().find(|s| s.name == "SqlRepo").unwrap();
        assert!(result.relationships.iter().any(|r| {
            r.kind == RelationshipKind::Implements
                && r.from_symbol_id == class.id
                && r.to_symbol_id == interface.id
        }));
    }

    #[test]
    fn non_ascii_signatures_truncate_on_char_boundaries() {
        // A multibyte char straddling the cap must not panic extraction
        let label = "é".repeat(400);
        let source = format!("def étiqueter(texte=\"{label}\"):\n    pass\n");
        let result = extract(&source, "python", "unicode.py").unwrap();

        let symbol = result.symbols.iter().find(|s| s.name == "étiqueter").unwrap();
        let signature = symbol.signature.as_deref().unwrap();
        assert!(signature.chars().count() <= 300);
        assert!(signature.starts_with("def étiqueter"));
    }

    #[test]
    fn batch_preserves_order_and_reports_failures() {
        let files = vec![
            SourceFile {
                path: "a.py".into(),
                language: "python".into(),
                content: "def a():\n    pass\n".into(),
            },
            SourceFile {
                path: "b.xyz".into(),
                language: "cobol".into(),
                content: "IDENTIFICATION DIVISION.".into(),
            },
            SourceFile {
                path: "c.py".into(),
                language: "python".into(),
                content: "def c():\n    pass\n".into(),
            },
        ];
        let outcome = extract_batch(&files);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].file_path, "a.py");
        assert_eq!(outcome.results[1].file_path, "b.xyz");
        assert!(outcome.results[1].symbols.is_empty());
        assert_eq!(outcome.results[2].file_path, "c.py");
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].file_path, "b.xyz");
    }

    #[test]
    fn columnar_output_matches_row_output() {
        let files = vec![SourceFile {
            path: "graph.py".into(),
            language: "python".into(),
            content: CALL_GRAPH.into(),
        }];
        let (tables, unresolved, errors) = extract_to_columnar(&files);
        assert!(errors.is_empty());
        assert!(unresolved.is_empty());
        assert_eq!(tables.symbols.len(), 3);
        assert_eq!(tables.symbols.names, ["function_a", "function_b", "function_c"]);
        assert_eq!(tables.relationships.len(), 3);
        assert!(tables.identifiers.len() >= 3);
    }
}
