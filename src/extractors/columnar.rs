// Schema-fixed column stores for extraction output.
//
// The indexer consumes these instead of row objects so that a flush binds
// column vectors straight into prepared statements without re-allocating a
// struct per symbol. Column order is fixed and mirrors the database schema.

use crate::extractors::base::{Identifier, Relationship, Symbol};

#[derive(Debug, Default, Clone)]
pub struct SymbolColumns {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub kinds: Vec<&'static str>,
    pub languages: Vec<String>,
    pub file_paths: Vec<String>,
    pub start_lines: Vec<u32>,
    pub start_columns: Vec<u32>,
    pub end_lines: Vec<u32>,
    pub end_columns: Vec<u32>,
    pub start_bytes: Vec<u32>,
    pub end_bytes: Vec<u32>,
    pub signatures: Vec<Option<String>>,
    pub doc_comments: Vec<Option<String>>,
    pub visibilities: Vec<Option<&'static str>>,
    pub parent_symbol_ids: Vec<Option<String>>,
    pub code_bodies: Vec<Option<String>>,
    pub code_contexts: Vec<Option<String>>,
    pub confidences: Vec<f32>,
}

impl SymbolColumns {
    pub fn push(&mut self, symbol: &Symbol) {
        self.ids.push(symbol.id.clone());
        self.names.push(symbol.name.clone());
        self.kinds.push(symbol.kind.as_str());
        self.languages.push(symbol.language.clone());
        self.file_paths.push(symbol.file_path.clone());
        self.start_lines.push(symbol.start_line);
        self.start_columns.push(symbol.start_column);
        self.end_lines.push(symbol.end_line);
        self.end_columns.push(symbol.end_column);
        self.start_bytes.push(symbol.start_byte);
        self.end_bytes.push(symbol.end_byte);
        self.signatures.push(symbol.signature.clone());
        self.doc_comments.push(symbol.doc_comment.clone());
        self.visibilities.push(symbol.visibility.map(|v| v.as_str()));
        self.parent_symbol_ids.push(symbol.parent_symbol_id.clone());
        self.code_bodies.push(symbol.code_body.clone());
        self.code_contexts.push(symbol.code_context.clone());
        self.confidences.push(symbol.confidence);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default, Clone)]
pub struct IdentifierColumns {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    pub kinds: Vec<&'static str>,
    pub file_paths: Vec<String>,
    pub start_lines: Vec<u32>,
    pub start_columns: Vec<u32>,
    pub end_lines: Vec<u32>,
    pub end_columns: Vec<u32>,
    pub start_bytes: Vec<u32>,
    pub end_bytes: Vec<u32>,
    pub containing_symbol_ids: Vec<Option<String>>,
    pub target_symbol_ids: Vec<Option<String>>,
    pub code_contexts: Vec<Option<String>>,
}

impl IdentifierColumns {
    pub fn push(&mut self, identifier: &Identifier) {
        self.ids.push(identifier.id.clone());
        self.names.push(identifier.name.clone());
        self.kinds.push(identifier.kind.as_str());
        self.file_paths.push(identifier.file_path.clone());
        self.start_lines.push(identifier.start_line);
        self.start_columns.push(identifier.start_column);
        self.end_lines.push(identifier.end_line);
        self.end_columns.push(identifier.end_column);
        self.start_bytes.push(identifier.start_byte);
        self.end_bytes.push(identifier.end_byte);
        self.containing_symbol_ids
            .push(identifier.containing_symbol_id.clone());
        self.target_symbol_ids
            .push(identifier.target_symbol_id.clone());
        self.code_contexts.push(identifier.code_context.clone());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Default, Clone)]
pub struct RelationshipColumns {
    pub from_symbol_ids: Vec<String>,
    pub to_symbol_ids: Vec<String>,
    pub kinds: Vec<&'static str>,
    pub file_paths: Vec<String>,
    pub line_numbers: Vec<u32>,
    pub confidences: Vec<f32>,
}

impl RelationshipColumns {
    pub fn push(&mut self, relationship: &Relationship) {
        self.from_symbol_ids.push(relationship.from_symbol_id.clone());
        self.to_symbol_ids.push(relationship.to_symbol_id.clone());
        self.kinds.push(relationship.kind.as_str());
        self.file_paths.push(relationship.file_path.clone());
        self.line_numbers.push(relationship.line_number);
        self.confidences.push(relationship.confidence);
    }

    pub fn len(&self) -> usize {
        self.from_symbol_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from_symbol_ids.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// The full columnar view of one or more extraction results.
#[derive(Debug, Default, Clone)]
pub struct ColumnarTables {
    pub symbols: SymbolColumns,
    pub identifiers: IdentifierColumns,
    pub relationships: RelationshipColumns,
}

impl ColumnarTables {
    pub fn push_result(&mut self, result: &crate::extractors::ExtractionResult) {
        for symbol in &result.symbols {
            self.symbols.push(symbol);
        }
        for identifier in &result.identifiers {
            self.identifiers.push(identifier);
        }
        for relationship in &result.relationships {
            self.relationships.push(relationship);
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty() && self.identifiers.is_empty() && self.relationships.is_empty()
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
        self.identifiers.clear();
        self.relationships.clear();
    }
}
