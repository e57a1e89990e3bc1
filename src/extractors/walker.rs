// Language-agnostic tree walk. Two passes over the parse tree:
//
//   Pass A collects definitions into Symbols (with parent links from the
//   lexical nesting).
//   Pass B collects identifier occurrences (calls, imports, type refs, bare
//   uses) and heritage clauses, attributing each to the innermost enclosing
//   symbol by byte range.
//
// Edges are resolved against the file-local symbol table; anything that
// refers to a name not defined in this file is returned as an unresolved
// edge for the indexer to resolve against the whole workspace.

use std::collections::{HashMap, HashSet};

use tree_sitter::Node;

use crate::extractors::base::{
    Identifier, IdentifierKind, Relationship, RelationshipKind, Symbol, SymbolKind, Visibility,
    symbol_id,
};
use crate::extractors::language::{HeritageRule, LanguageConfig};

/// An edge whose target (by name) was not defined in the extracted file.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedEdge {
    pub from_symbol_id: String,
    pub to_name: String,
    pub kind: RelationshipKind,
    pub file_path: String,
    pub line_number: u32,
}

const MAX_SIGNATURE_LEN: usize = 300;
const MAX_CONTEXT_LEN: usize = 200;

/// Node kinds that directly carry a name
const NAME_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "property_identifier",
    "field_identifier",
    "shorthand_property_identifier",
    "identifier_name",
    "name",
    "constant",
];

pub struct Walker<'a> {
    cfg: &'static LanguageConfig,
    file_path: &'a str,
    source: &'a str,
    lines: Vec<&'a str>,
    symbols: Vec<Symbol>,
    identifiers: Vec<Identifier>,
    relationships: Vec<Relationship>,
    unresolved: Vec<UnresolvedEdge>,
    /// Byte ranges already recorded as a structured identifier, so the bare
    /// identifier sweep does not record them twice
    claimed: HashSet<(u32, u32)>,
}

impl<'a> Walker<'a> {
    pub fn new(cfg: &'static LanguageConfig, file_path: &'a str, source: &'a str) -> Self {
        Self {
            cfg,
            file_path,
            source,
            lines: source.lines().collect(),
            symbols: Vec::new(),
            identifiers: Vec::new(),
            relationships: Vec::new(),
            unresolved: Vec::new(),
            claimed: HashSet::new(),
        }
    }

    pub fn walk(
        mut self,
        tree: &tree_sitter::Tree,
    ) -> (
        Vec<Symbol>,
        Vec<Identifier>,
        Vec<Relationship>,
        Vec<UnresolvedEdge>,
    ) {
        let root = tree.root_node();
        self.collect_definitions(root, None);
        self.collect_occurrences(root);
        self.resolve_local_edges();
        (
            self.symbols,
            self.identifiers,
            self.relationships,
            self.unresolved,
        )
    }

    fn text(&self, node: Node) -> &'a str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    fn line_text(&self, line_1based: u32) -> Option<String> {
        let line = self.lines.get(line_1based.saturating_sub(1) as usize)?;
        let mut text = line.trim().to_string();
        truncate_chars(&mut text, MAX_CONTEXT_LEN);
        Some(text)
    }

    // ---------------------------------------------------------------- pass A

    fn collect_definitions(&mut self, node: Node, parent: Option<usize>) {
        let mut next_parent = parent;

        if let Some(kind) = self.definition_kind(&node) {
            if let Some(symbol_idx) = self.build_symbol(node, kind, parent) {
                next_parent = Some(symbol_idx);
            }
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.collect_definitions(child, next_parent);
        }
    }

    fn definition_kind(&self, node: &Node) -> Option<SymbolKind> {
        self.cfg
            .definitions
            .iter()
            .find(|(k, _)| *k == node.kind())
            .map(|(_, kind)| *kind)
    }

    fn build_symbol(&mut self, node: Node, kind: SymbolKind, parent: Option<usize>) -> Option<usize> {
        let name_node = self.name_of_definition(node)?;
        let name = self.text(name_node).to_string();
        if name.is_empty() {
            return None;
        }

        // A function nested inside a container is a method
        let kind = if kind == SymbolKind::Function
            && parent
                .map(|p| self.symbols[p].kind.is_container())
                .unwrap_or(false)
        {
            SymbolKind::Method
        } else {
            kind
        };

        let start = node.start_position();
        let end = node.end_position();
        let signature = self.signature_of(node);
        let visibility = self.visibility_of(&name, signature.as_deref());
        let doc_comment = self.doc_comment_of(node);

        let symbol = Symbol {
            id: symbol_id(self.file_path, kind, &name, node.start_byte() as u32),
            name,
            kind,
            language: self.cfg.name.to_string(),
            file_path: self.file_path.to_string(),
            start_line: start.row as u32 + 1,
            start_column: start.column as u32,
            end_line: end.row as u32 + 1,
            end_column: end.column as u32,
            start_byte: node.start_byte() as u32,
            end_byte: node.end_byte() as u32,
            signature,
            doc_comment,
            visibility,
            parent_symbol_id: parent.map(|p| self.symbols[p].id.clone()),
            code_body: None,
            code_context: self.line_text(start.row as u32 + 1),
            confidence: 1.0,
        };

        // Containment edges mirror parent links so graph queries see nesting
        if let Some(p) = parent {
            self.relationships.push(Relationship {
                from_symbol_id: self.symbols[p].id.clone(),
                to_symbol_id: symbol.id.clone(),
                kind: RelationshipKind::Contains,
                file_path: self.file_path.to_string(),
                line_number: symbol.start_line,
                confidence: 1.0,
            });
        }

        self.symbols.push(symbol);
        Some(self.symbols.len() - 1)
    }

    fn name_of_definition<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        if let Some(name) = node.child_by_field_name("name") {
            return self.name_leaf(name);
        }
        // Some grammars (go const_spec) put the name as the first identifier child
        let mut cursor = node.walk();
        let found = node
            .named_children(&mut cursor)
            .find(|c| NAME_KINDS.contains(&c.kind()));
        found.and_then(|n| self.name_leaf(n))
    }

    /// Descend to the identifier leaf that names an expression, preferring the
    /// rightmost component of qualified forms (`obj.method`, `Mod::func`).
    fn name_leaf<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        if NAME_KINDS.contains(&node.kind()) {
            return Some(node);
        }
        match node.kind() {
            "attribute" => node
                .child_by_field_name("attribute")
                .and_then(|n| self.name_leaf(n)),
            "member_expression" => node
                .child_by_field_name("property")
                .and_then(|n| self.name_leaf(n)),
            "member_access_expression" => node
                .child_by_field_name("name")
                .and_then(|n| self.name_leaf(n)),
            "scoped_identifier" | "qualified_name" => node
                .child_by_field_name("name")
                .and_then(|n| self.name_leaf(n)),
            "generic_name" | "generic_function" | "generic_type" => {
                let field = if node.kind() == "generic_function" {
                    "function"
                } else {
                    "name"
                };
                node.child_by_field_name(field)
                    .or_else(|| node.named_child(0))
                    .and_then(|n| self.name_leaf(n))
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node> = node.named_children(&mut cursor).collect();
                children.into_iter().rev().find_map(|c| self.name_leaf(c))
            }
        }
    }

    fn signature_of(&self, node: Node) -> Option<String> {
        let end = node
            .child_by_field_name("body")
            .map(|b| b.start_byte())
            .unwrap_or_else(|| {
                let text = self.text(node);
                node.start_byte() + text.find('\n').unwrap_or(text.len())
            });
        let raw = self.source.get(node.start_byte()..end)?;
        let mut signature = String::with_capacity(raw.len().min(MAX_SIGNATURE_LEN));
        let mut last_space = false;
        for ch in raw.chars() {
            if ch.is_whitespace() {
                if !last_space && !signature.is_empty() {
                    signature.push(' ');
                }
                last_space = true;
            } else {
                signature.push(ch);
                last_space = false;
            }
        }
        let mut signature = signature.trim_end().trim_end_matches('{').trim_end().to_string();
        truncate_chars(&mut signature, MAX_SIGNATURE_LEN);
        if signature.is_empty() {
            None
        } else {
            Some(signature)
        }
    }

    fn visibility_of(&self, name: &str, signature: Option<&str>) -> Option<Visibility> {
        let sig = signature.unwrap_or("");
        if self.cfg.name == "python" {
            return Some(if name.starts_with('_') {
                Visibility::Private
            } else {
                Visibility::Public
            });
        }
        if self.cfg.name == "rust" {
            return Some(if sig.starts_with("pub") {
                Visibility::Public
            } else {
                Visibility::Private
            });
        }
        if sig.contains("public ") {
            Some(Visibility::Public)
        } else if sig.contains("private ") {
            Some(Visibility::Private)
        } else if sig.contains("protected ") {
            Some(Visibility::Protected)
        } else {
            None
        }
    }

    fn doc_comment_of(&self, node: Node) -> Option<String> {
        if self.cfg.docstring {
            if let Some(doc) = self.docstring_of(node) {
                return Some(doc);
            }
        }
        // Contiguous comment siblings immediately above the definition
        let mut parts: Vec<String> = Vec::new();
        let mut prev = node.prev_named_sibling();
        let mut expected_end = node.start_position().row;
        while let Some(sibling) = prev {
            if sibling.kind() != "comment" && sibling.kind() != "line_comment"
                && sibling.kind() != "block_comment"
            {
                break;
            }
            if sibling.end_position().row + 1 < expected_end {
                break;
            }
            expected_end = sibling.start_position().row;
            parts.push(self.strip_comment_markers(self.text(sibling)));
            prev = sibling.prev_named_sibling();
        }
        if parts.is_empty() {
            return None;
        }
        parts.reverse();
        let doc = parts.join("\n").trim().to_string();
        if doc.is_empty() { None } else { Some(doc) }
    }

    fn docstring_of(&self, node: Node) -> Option<String> {
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        let text = self
            .text(string)
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string();
        if text.is_empty() { None } else { Some(text) }
    }

    fn strip_comment_markers(&self, raw: &str) -> String {
        let mut out = Vec::new();
        for line in raw.lines() {
            let mut line = line.trim();
            for marker in self.cfg.doc_markers {
                if let Some(rest) = line.strip_prefix(marker) {
                    line = rest.trim_start();
                    break;
                }
            }
            let line = line.trim_end_matches("*/").trim();
            if !line.is_empty() {
                out.push(line.to_string());
            }
        }
        out.join("\n")
    }

    // ---------------------------------------------------------------- pass B

    fn collect_occurrences(&mut self, node: Node) {
        let kind = node.kind();

        if self.cfg.call_kinds.contains(&kind) {
            self.record_call(node);
        } else if self.cfg.import_kinds.contains(&kind) {
            self.record_import(node);
        } else if self.cfg.type_ref_kinds.contains(&kind) {
            self.record_occurrence(node, IdentifierKind::TypeRef);
        } else if kind == "impl_item" && self.cfg.name == "rust" {
            self.record_rust_impl(node);
        } else if self.definition_kind(&node).is_some() {
            self.record_heritage(node);
            // The definition's own name is not a reference
            if let Some(name_node) = node.child_by_field_name("name") {
                self.claimed
                    .insert((name_node.start_byte() as u32, name_node.end_byte() as u32));
            }
        } else if kind == "identifier" {
            self.record_occurrence(node, IdentifierKind::Identifier);
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.collect_occurrences(child);
        }
    }

    fn record_call(&mut self, node: Node) {
        let Some(callee) = node
            .child_by_field_name(self.cfg.callee_field)
            .and_then(|n| self.name_leaf(n))
        else {
            return;
        };
        let name = self.text(callee).trim_end_matches('!').to_string();
        if name.is_empty() {
            return;
        }
        let identifier = self.make_identifier(&name, IdentifierKind::Call, callee);
        let from = identifier.containing_symbol_id.clone();
        let line = identifier.start_line;
        self.claimed
            .insert((callee.start_byte() as u32, callee.end_byte() as u32));
        self.identifiers.push(identifier);

        if let Some(from_id) = from {
            self.unresolved.push(UnresolvedEdge {
                from_symbol_id: from_id,
                to_name: name,
                kind: RelationshipKind::Call,
                file_path: self.file_path.to_string(),
                line_number: line,
            });
        }
    }

    fn record_import(&mut self, node: Node) {
        // Record every identifier leaf inside the import statement
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if NAME_KINDS.contains(&current.kind()) || current.kind() == "dotted_name" {
                let leaf = if current.kind() == "dotted_name" {
                    let mut cursor = current.walk();
                    let children: Vec<Node> = current.named_children(&mut cursor).collect();
                    children.into_iter().last()
                } else {
                    Some(current)
                };
                if let Some(leaf) = leaf {
                    let range = (leaf.start_byte() as u32, leaf.end_byte() as u32);
                    if self.claimed.insert(range) {
                        let name = self.text(leaf).to_string();
                        let identifier = self.make_identifier(&name, IdentifierKind::Import, leaf);
                        self.identifiers.push(identifier);
                    }
                }
                continue;
            }
            let mut cursor = current.walk();
            for child in current.named_children(&mut cursor) {
                stack.push(child);
            }
        }
    }

    fn record_occurrence(&mut self, node: Node, kind: IdentifierKind) {
        let range = (node.start_byte() as u32, node.end_byte() as u32);
        if self.claimed.contains(&range) {
            return;
        }
        let name = self.text(node).to_string();
        if name.is_empty() {
            return;
        }
        self.claimed.insert(range);
        let identifier = self.make_identifier(&name, kind, node);
        self.identifiers.push(identifier);
    }

    fn record_heritage(&mut self, node: Node) {
        let Some(from_idx) = self.symbol_index_for_definition(node) else {
            return;
        };
        let from_id = self.symbols[from_idx].id.clone();

        let rules: Vec<HeritageRule> = self.cfg.heritage.to_vec();
        for rule in rules {
            let matched: Option<Node> = match (rule.field, rule.child_kind) {
                (Some(field), _) => node.child_by_field_name(field),
                // Clause nodes may nest (class_heritage wraps extends_clause
                // in typescript), so search descendants, not just children
                (None, Some(kind)) => find_descendant(node, kind),
                _ => None,
            };
            let Some(clause) = matched else { continue };
            for (name, leaf) in self.heritage_names(clause) {
                let range = (leaf.0, leaf.1);
                self.claimed.insert(range);
                self.unresolved.push(UnresolvedEdge {
                    from_symbol_id: from_id.clone(),
                    to_name: name,
                    kind: rule.rel,
                    file_path: self.file_path.to_string(),
                    line_number: node.start_position().row as u32 + 1,
                });
            }
        }
    }

    /// `impl Trait for Type` yields an Implements edge from the type to the
    /// trait. Both names resolve by the usual local-then-workspace ladder.
    fn record_rust_impl(&mut self, node: Node) {
        let trait_name = node
            .child_by_field_name("trait")
            .and_then(|n| self.name_leaf(n))
            .map(|n| self.text(n).to_string());
        let type_name = node
            .child_by_field_name("type")
            .and_then(|n| self.name_leaf(n))
            .map(|n| self.text(n).to_string());
        let (Some(trait_name), Some(type_name)) = (trait_name, type_name) else {
            return;
        };
        let Some(from) = self
            .symbols
            .iter()
            .find(|s| s.name == type_name && s.kind.is_container())
            .map(|s| s.id.clone())
        else {
            return;
        };
        self.unresolved.push(UnresolvedEdge {
            from_symbol_id: from,
            to_name: trait_name,
            kind: RelationshipKind::Implements,
            file_path: self.file_path.to_string(),
            line_number: node.start_position().row as u32 + 1,
        });
    }

    fn heritage_names(&self, clause: Node) -> Vec<(String, (u32, u32))> {
        let mut names = Vec::new();
        let mut stack = vec![clause];
        while let Some(current) = stack.pop() {
            if NAME_KINDS.contains(&current.kind()) {
                let name = self.text(current).to_string();
                if !name.is_empty() && name != "extends" && name != "implements" {
                    names.push((name, (current.start_byte() as u32, current.end_byte() as u32)));
                }
                continue;
            }
            let mut cursor = current.walk();
            for child in current.named_children(&mut cursor) {
                stack.push(child);
            }
        }
        names
    }

    fn make_identifier(&self, name: &str, kind: IdentifierKind, node: Node) -> Identifier {
        let start = node.start_position();
        let end = node.end_position();
        let mut identifier = Identifier::new(
            name.to_string(),
            kind,
            self.file_path.to_string(),
            start.row as u32 + 1,
            start.column as u32,
            end.row as u32 + 1,
            end.column as u32,
            node.start_byte() as u32,
            node.end_byte() as u32,
        );
        identifier.containing_symbol_id = self.containing_symbol(node.start_byte() as u32);
        identifier.code_context = self.line_text(start.row as u32 + 1);
        identifier
    }

    /// Innermost symbol whose byte range contains the offset.
    fn containing_symbol(&self, byte: u32) -> Option<String> {
        self.symbols
            .iter()
            .filter(|s| s.start_byte <= byte && byte < s.end_byte)
            .max_by_key(|s| s.start_byte)
            .map(|s| s.id.clone())
    }

    fn symbol_index_for_definition(&self, node: Node) -> Option<usize> {
        let start = node.start_byte() as u32;
        self.symbols.iter().position(|s| s.start_byte == start)
    }

    // ------------------------------------------------------------- resolution

    /// Resolve pending edges against this file's own symbols. Anything left
    /// over goes back to the caller for workspace-wide resolution. Call
    /// identifiers get their target filled in when the edge resolved.
    fn resolve_local_edges(&mut self) {
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, symbol) in self.symbols.iter().enumerate() {
            by_name.entry(symbol.name.as_str()).or_default().push(idx);
        }

        let pending = std::mem::take(&mut self.unresolved);
        let mut resolved_targets: HashMap<(String, u32), String> = HashMap::new();

        for edge in pending {
            let target = by_name.get(edge.to_name.as_str()).and_then(|candidates| {
                pick_candidate(&self.symbols, candidates, edge.kind)
            });
            match target {
                Some(idx) => {
                    let to_id = self.symbols[idx].id.clone();
                    if edge.from_symbol_id != to_id {
                        resolved_targets
                            .insert((edge.to_name.clone(), edge.line_number), to_id.clone());
                        self.relationships.push(Relationship {
                            from_symbol_id: edge.from_symbol_id,
                            to_symbol_id: to_id,
                            kind: edge.kind,
                            file_path: edge.file_path,
                            line_number: edge.line_number,
                            confidence: 1.0,
                        });
                    }
                }
                None => self.unresolved.push(edge),
            }
        }

        for identifier in &mut self.identifiers {
            if identifier.target_symbol_id.is_some() {
                continue;
            }
            if let Some(target) =
                resolved_targets.get(&(identifier.name.clone(), identifier.start_line))
            {
                identifier.target_symbol_id = Some(target.clone());
            }
        }
    }
}

/// Cap a string to a char count, never splitting a multibyte character.
fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}

/// Find a named descendant of the given kind, without entering the node's
/// body (a nested class's own heritage must not leak up).
fn find_descendant<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let body_id = node.child_by_field_name("body").map(|b| b.id());
    let mut queue = vec![node];
    while let Some(current) = queue.pop() {
        if current.kind() == kind && current.id() != node.id() {
            return Some(current);
        }
        let mut cursor = current.walk();
        for child in current.named_children(&mut cursor) {
            if Some(child.id()) != body_id {
                queue.push(child);
            }
        }
    }
    None
}

/// Prefer the candidate whose kind fits the edge: callables for calls,
/// containers for heritage. Falls back to the first candidate.
fn pick_candidate(symbols: &[Symbol], candidates: &[usize], kind: RelationshipKind) -> Option<usize> {
    let preferred = |s: &Symbol| match kind {
        RelationshipKind::Call => matches!(
            s.kind,
            SymbolKind::Function | SymbolKind::Method | SymbolKind::Constructor | SymbolKind::Class
        ),
        RelationshipKind::Extends | RelationshipKind::Implements => s.kind.is_container(),
        _ => true,
    };
    candidates
        .iter()
        .copied()
        .find(|&idx| preferred(&symbols[idx]))
        .or_else(|| candidates.first().copied())
}
