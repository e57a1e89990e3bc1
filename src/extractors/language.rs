// Language registry: maps file extensions to languages and languages to
// their tree-sitter grammar plus the static node-kind tables the generic
// walker consumes. Adding a language means adding a grammar crate and one
// `LanguageConfig` entry here; the walker itself never changes.

use crate::extractors::base::{RelationshipKind, SymbolKind};

/// How a heritage clause on a definition node maps to a relationship.
///
/// `field` looks up a named field on the definition node (python
/// `superclasses`, java `superclass`); `child_kind` scans children by kind
/// (typescript `extends_clause`, c# `base_list`). Identifiers found inside
/// the matched node become edges of `rel` from the defined symbol.
#[derive(Debug, Clone, Copy)]
pub struct HeritageRule {
    pub field: Option<&'static str>,
    pub child_kind: Option<&'static str>,
    pub rel: RelationshipKind,
}

/// Static description of how to extract one language.
#[derive(Debug, Clone, Copy)]
pub struct LanguageConfig {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    /// Definition node kind -> symbol kind. Function-like kinds are demoted
    /// to Method when nested inside a container symbol.
    pub definitions: &'static [(&'static str, SymbolKind)],
    /// Node kinds that represent a call site
    pub call_kinds: &'static [&'static str],
    /// Field on a call node holding the callee expression
    pub callee_field: &'static str,
    /// Node kinds that are type references
    pub type_ref_kinds: &'static [&'static str],
    /// Node kinds that introduce imports
    pub import_kinds: &'static [&'static str],
    pub heritage: &'static [HeritageRule],
    /// Comment markers stripped when collecting doc comments
    pub doc_markers: &'static [&'static str],
    /// Languages whose doc comment is a leading string literal in the body
    pub docstring: bool,
}

const PYTHON: LanguageConfig = LanguageConfig {
    name: "python",
    extensions: &["py", "pyi"],
    definitions: &[
        ("function_definition", SymbolKind::Function),
        ("class_definition", SymbolKind::Class),
    ],
    call_kinds: &["call"],
    callee_field: "function",
    type_ref_kinds: &[],
    import_kinds: &["import_statement", "import_from_statement"],
    heritage: &[HeritageRule {
        field: Some("superclasses"),
        child_kind: None,
        rel: RelationshipKind::Extends,
    }],
    doc_markers: &["#"],
    docstring: true,
};

const JAVASCRIPT: LanguageConfig = LanguageConfig {
    name: "javascript",
    extensions: &["js", "jsx", "mjs", "cjs"],
    definitions: &[
        ("function_declaration", SymbolKind::Function),
        ("generator_function_declaration", SymbolKind::Function),
        ("method_definition", SymbolKind::Method),
        ("class_declaration", SymbolKind::Class),
    ],
    call_kinds: &["call_expression", "new_expression"],
    callee_field: "function",
    type_ref_kinds: &[],
    import_kinds: &["import_statement"],
    heritage: &[HeritageRule {
        field: None,
        child_kind: Some("class_heritage"),
        rel: RelationshipKind::Extends,
    }],
    doc_markers: &["//", "/*", "*"],
    docstring: false,
};

const TYPESCRIPT: LanguageConfig = LanguageConfig {
    name: "typescript",
    extensions: &["ts", "tsx", "mts", "cts"],
    definitions: &[
        ("function_declaration", SymbolKind::Function),
        ("generator_function_declaration", SymbolKind::Function),
        ("method_definition", SymbolKind::Method),
        ("class_declaration", SymbolKind::Class),
        ("abstract_class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Interface),
        ("enum_declaration", SymbolKind::Enum),
        ("type_alias_declaration", SymbolKind::Type),
        ("module", SymbolKind::Namespace),
    ],
    call_kinds: &["call_expression", "new_expression"],
    callee_field: "function",
    type_ref_kinds: &["type_identifier"],
    import_kinds: &["import_statement"],
    heritage: &[
        HeritageRule {
            field: None,
            child_kind: Some("extends_clause"),
            rel: RelationshipKind::Extends,
        },
        HeritageRule {
            field: None,
            child_kind: Some("implements_clause"),
            rel: RelationshipKind::Implements,
        },
    ],
    doc_markers: &["//", "/*", "*"],
    docstring: false,
};

const RUST: LanguageConfig = LanguageConfig {
    name: "rust",
    extensions: &["rs"],
    definitions: &[
        ("function_item", SymbolKind::Function),
        ("struct_item", SymbolKind::Struct),
        ("enum_item", SymbolKind::Enum),
        ("trait_item", SymbolKind::Trait),
        ("mod_item", SymbolKind::Module),
        ("const_item", SymbolKind::Constant),
        ("static_item", SymbolKind::Constant),
        ("type_item", SymbolKind::Type),
        ("union_item", SymbolKind::Struct),
    ],
    call_kinds: &["call_expression", "macro_invocation"],
    callee_field: "function",
    type_ref_kinds: &["type_identifier"],
    import_kinds: &["use_declaration"],
    // `impl Trait for Type` is resolved in the walker, not via heritage rules,
    // because both sides live on the impl node rather than the definition.
    heritage: &[],
    doc_markers: &["///", "//!", "//", "/*", "*"],
    docstring: false,
};

const GO: LanguageConfig = LanguageConfig {
    name: "go",
    extensions: &["go"],
    definitions: &[
        ("function_declaration", SymbolKind::Function),
        ("method_declaration", SymbolKind::Method),
        ("type_spec", SymbolKind::Type),
        ("const_spec", SymbolKind::Constant),
    ],
    call_kinds: &["call_expression"],
    callee_field: "function",
    type_ref_kinds: &["type_identifier"],
    import_kinds: &["import_declaration"],
    heritage: &[],
    doc_markers: &["//"],
    docstring: false,
};

const JAVA: LanguageConfig = LanguageConfig {
    name: "java",
    extensions: &["java"],
    definitions: &[
        ("class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Interface),
        ("enum_declaration", SymbolKind::Enum),
        ("method_declaration", SymbolKind::Method),
        ("constructor_declaration", SymbolKind::Constructor),
        ("record_declaration", SymbolKind::Class),
    ],
    call_kinds: &["method_invocation", "object_creation_expression"],
    callee_field: "name",
    type_ref_kinds: &["type_identifier"],
    import_kinds: &["import_declaration"],
    heritage: &[
        HeritageRule {
            field: Some("superclass"),
            child_kind: None,
            rel: RelationshipKind::Extends,
        },
        HeritageRule {
            field: Some("interfaces"),
            child_kind: None,
            rel: RelationshipKind::Implements,
        },
    ],
    doc_markers: &["//", "/**", "/*", "*"],
    docstring: false,
};

const CSHARP: LanguageConfig = LanguageConfig {
    name: "csharp",
    extensions: &["cs"],
    definitions: &[
        ("class_declaration", SymbolKind::Class),
        ("interface_declaration", SymbolKind::Interface),
        ("struct_declaration", SymbolKind::Struct),
        ("record_declaration", SymbolKind::Class),
        ("enum_declaration", SymbolKind::Enum),
        ("method_declaration", SymbolKind::Method),
        ("constructor_declaration", SymbolKind::Constructor),
        ("property_declaration", SymbolKind::Field),
        ("namespace_declaration", SymbolKind::Namespace),
    ],
    call_kinds: &["invocation_expression", "object_creation_expression"],
    callee_field: "function",
    type_ref_kinds: &["identifier_name", "generic_name"],
    import_kinds: &["using_directive"],
    heritage: &[HeritageRule {
        field: None,
        child_kind: Some("base_list"),
        rel: RelationshipKind::Implements,
    }],
    doc_markers: &["///", "//", "/*", "*"],
    docstring: false,
};

const ALL: &[&LanguageConfig] = &[
    &PYTHON, &JAVASCRIPT, &TYPESCRIPT, &RUST, &GO, &JAVA, &CSHARP,
];

/// Look up a language configuration by name.
pub fn config_for(language: &str) -> Option<&'static LanguageConfig> {
    ALL.iter().copied().find(|c| c.name == language)
}

/// Detect the language of a path from its extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    // tsx needs the dedicated grammar; everything else shares per-language
    ALL.iter()
        .find(|c| c.extensions.contains(&ext))
        .map(|c| c.name)
}

/// Resolve the tree-sitter grammar for a (language, path) pair. The path is
/// needed because .tsx files use the TSX variant of the typescript grammar.
pub fn grammar_for(language: &str, path: &str) -> Option<tree_sitter::Language> {
    match language {
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "typescript" => {
            if path.ends_with(".tsx") {
                Some(tree_sitter_typescript::LANGUAGE_TSX.into())
            } else {
                Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            }
        }
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        "csharp" => Some(tree_sitter_c_sharp::LANGUAGE.into()),
        _ => None,
    }
}

/// All supported extensions, used by the scanner and watcher filters.
pub fn supported_extensions() -> Vec<&'static str> {
    let mut exts: Vec<&'static str> = ALL.iter().flat_map(|c| c.extensions.iter().copied()).collect();
    exts.sort_unstable();
    exts.dedup();
    exts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(language_for_path("src/app.py"), Some("python"));
        assert_eq!(language_for_path("src/App.tsx"), Some("typescript"));
        assert_eq!(language_for_path("main.go"), Some("go"));
        assert_eq!(language_for_path("README.md"), None);
    }

    #[test]
    fn every_language_has_a_grammar() {
        for cfg in super::ALL {
            let probe = format!("file.{}", cfg.extensions[0]);
            assert!(
                grammar_for(cfg.name, &probe).is_some(),
                "no grammar for {}",
                cfg.name
            );
        }
    }
}
