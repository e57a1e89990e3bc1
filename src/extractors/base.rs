// Core extraction types shared by every language configuration.
//
// Symbols, identifiers and relationships are the three outputs of extraction.
// Symbol IDs are deterministic (content-addressed) so that re-indexing an
// unchanged file reproduces the same IDs and inbound relationships survive.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named program entity (function, class, etc.) with a byte range in a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Symbol {
    /// Deterministic identifier, see [`symbol_id`]
    pub id: String,
    /// Symbol name as it appears in code
    pub name: String,
    pub kind: SymbolKind,
    pub language: String,
    /// Workspace-relative path, forward slashes
    pub file_path: String,
    /// Start line number (1-based)
    pub start_line: u32,
    /// Start column (0-based)
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub start_byte: u32,
    pub end_byte: u32,
    /// Declaration line as written, e.g. `fn parse(input: &str) -> Ast`
    pub signature: Option<String>,
    pub doc_comment: Option<String>,
    pub visibility: Option<Visibility>,
    /// Enclosing symbol in the same file (method -> class), or None
    pub parent_symbol_id: Option<String>,
    /// Full body text, populated only when the caller asks for it
    pub code_body: Option<String>,
    /// A few lines of surrounding source for previews
    pub code_context: Option<String>,
    pub confidence: f32,
}

impl Symbol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        kind: SymbolKind,
        language: String,
        file_path: String,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
        start_byte: u32,
        end_byte: u32,
    ) -> Self {
        let id = symbol_id(&file_path, kind, &name, start_byte);
        Self {
            id,
            name,
            kind,
            language,
            file_path,
            start_line,
            start_column,
            end_line,
            end_column,
            start_byte,
            end_byte,
            signature: None,
            doc_comment: None,
            visibility: None,
            parent_symbol_id: None,
            code_body: None,
            code_context: None,
            confidence: 1.0,
        }
    }
}

/// Deterministic symbol ID: hash of file path, kind, name and start byte.
///
/// Two extractions of identical bytes at the same path produce identical IDs,
/// which is what lets incremental re-indexing preserve inbound relationships.
pub fn symbol_id(file_path: &str, kind: SymbolKind, name: &str, start_byte: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(start_byte.to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Kinds of symbols the extractor produces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    Module,
    Constant,
    Variable,
    Type,
    Field,
    Constructor,
    Namespace,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Enum => "enum",
            SymbolKind::Module => "module",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
            SymbolKind::Type => "type",
            SymbolKind::Field => "field",
            SymbolKind::Constructor => "constructor",
            SymbolKind::Namespace => "namespace",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "method" => SymbolKind::Method,
            "class" => SymbolKind::Class,
            "struct" => SymbolKind::Struct,
            "interface" => SymbolKind::Interface,
            "trait" => SymbolKind::Trait,
            "enum" => SymbolKind::Enum,
            "module" => SymbolKind::Module,
            "constant" => SymbolKind::Constant,
            "variable" => SymbolKind::Variable,
            "type" => SymbolKind::Type,
            "field" => SymbolKind::Field,
            "constructor" => SymbolKind::Constructor,
            "namespace" => SymbolKind::Namespace,
            _ => SymbolKind::Function,
        }
    }

    /// Kinds that can own nested members
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Struct
                | SymbolKind::Interface
                | SymbolKind::Trait
                | SymbolKind::Enum
                | SymbolKind::Module
                | SymbolKind::Namespace
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Protected,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            "protected" => Some(Visibility::Protected),
            _ => None,
        }
    }
}

/// A textual occurrence of a name (call site, type reference, import, plain use).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identifier {
    pub id: String,
    pub name: String,
    pub kind: IdentifierKind,
    pub file_path: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub start_byte: u32,
    pub end_byte: u32,
    /// Defined symbol that lexically contains this occurrence; None at file scope
    pub containing_symbol_id: Option<String>,
    /// Best-effort resolution to the referenced symbol; None until resolved
    pub target_symbol_id: Option<String>,
    /// The source line holding the occurrence, for reference listings
    pub code_context: Option<String>,
}

impl Identifier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        kind: IdentifierKind,
        file_path: String,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
        start_byte: u32,
        end_byte: u32,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            kind,
            file_path,
            start_line,
            start_column,
            end_line,
            end_column,
            start_byte,
            end_byte,
            containing_symbol_id: None,
            target_symbol_id: None,
            code_context: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Identifier,
    Call,
    TypeRef,
    Import,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Identifier => "identifier",
            IdentifierKind::Call => "call",
            IdentifierKind::TypeRef => "type_ref",
            IdentifierKind::Import => "import",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "call" => IdentifierKind::Call,
            "type_ref" => IdentifierKind::TypeRef,
            "import" => IdentifierKind::Import,
            _ => IdentifierKind::Identifier,
        }
    }
}

/// A directed edge between two symbols.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub from_symbol_id: String,
    pub to_symbol_id: String,
    pub kind: RelationshipKind,
    pub file_path: String,
    /// Line where the edge occurs (1-based)
    pub line_number: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Call,
    Import,
    Reference,
    Implements,
    Extends,
    Returns,
    Parameter,
    Contains,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Call => "call",
            RelationshipKind::Import => "import",
            RelationshipKind::Reference => "reference",
            RelationshipKind::Implements => "implements",
            RelationshipKind::Extends => "extends",
            RelationshipKind::Returns => "returns",
            RelationshipKind::Parameter => "parameter",
            RelationshipKind::Contains => "contains",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "call" => RelationshipKind::Call,
            "import" => RelationshipKind::Import,
            "implements" => RelationshipKind::Implements,
            "extends" => RelationshipKind::Extends,
            "returns" => RelationshipKind::Returns,
            "parameter" => RelationshipKind::Parameter,
            "contains" => RelationshipKind::Contains,
            _ => RelationshipKind::Reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_ids_are_reproducible() {
        let a = symbol_id("src/auth.py", SymbolKind::Function, "login", 120);
        let b = symbol_id("src/auth.py", SymbolKind::Function, "login", 120);
        assert_eq!(a, b);

        let moved = symbol_id("src/auth.py", SymbolKind::Function, "login", 121);
        assert_ne!(a, moved);

        let other_file = symbol_id("src/other.py", SymbolKind::Function, "login", 120);
        assert_ne!(a, other_file);

        let other_kind = symbol_id("src/auth.py", SymbolKind::Method, "login", 120);
        assert_ne!(a, other_kind);
    }

    #[test]
    fn symbol_new_derives_id_from_identity() {
        let s1 = Symbol::new(
            "login".into(),
            SymbolKind::Function,
            "python".into(),
            "src/auth.py".into(),
            5,
            0,
            9,
            1,
            120,
            260,
        );
        let s2 = Symbol::new(
            "login".into(),
            SymbolKind::Function,
            "python".into(),
            "src/auth.py".into(),
            5,
            0,
            9,
            1,
            120,
            260,
        );
        assert_eq!(s1.id, s2.id);
        assert_eq!(s1.confidence, 1.0);
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in [
            SymbolKind::Function,
            SymbolKind::Method,
            SymbolKind::Struct,
            SymbolKind::Namespace,
        ] {
            assert_eq!(SymbolKind::from_str_lossy(kind.as_str()), kind);
        }
        for kind in [
            RelationshipKind::Call,
            RelationshipKind::Implements,
            RelationshipKind::Contains,
        ] {
            assert_eq!(RelationshipKind::from_str_lossy(kind.as_str()), kind);
        }
    }
}
