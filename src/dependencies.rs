//! Reference detection between a symbol's code and the names it can reach:
//! imported bindings, the module's own export binding, and sibling top-level
//! declarations.
//!
//! Two scanners share the same edge contract (attribute access, call,
//! instantiation):
//!
//! * [`DependencyScan::Textual`] searches the code text for the binding and
//!   checks the surrounding characters. It over-matches inside strings and
//!   misses references preceded by an unlisted character.
//! * [`DependencyScan::Syntactic`] walks identifier nodes of the symbol's
//!   syntax subtree, so strings, comments and property names never match,
//!   and names re-declared inside the symbol are ignored.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use tree_sitter::Node;

use crate::config::DependencyScan;
use crate::inspector::node_text;
use crate::model::{Edge, EdgeType, Kind, Lib, LibBinding};
use crate::text;

/// Characters accepted right before a textual match.
const BOUNDARY_CHARS: [char; 9] = [' ', '(', '[', ';', ',', '\n', '\t', '=', '!'];

const MAX_ATTR_LEN: usize = 50;

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\.([A-Za-z0-9_]+)[()\n\t=;.,"' \[\]]"#).unwrap())
}

/// Code of one symbol: its text plus the syntax node it was sliced from.
#[derive(Clone, Copy)]
pub struct CodeRef<'a> {
    pub text: &'a str,
    pub node: Node<'a>,
    pub source: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Call,
    New,
}

/// How a binding is used at one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Usage {
    /// `name.attr`, `name.attr(...)`, `new name.attr(...)`
    Attr { attr: String, access: Access },
    /// `name(...)`, or `new name` / `instanceof name` when `new_class`.
    Call { new_class: bool },
    /// Any other reference. Only the syntactic scanner reports these.
    Reference,
}

pub fn find_usages(scan: DependencyScan, code: CodeRef, name: &str) -> Vec<Usage> {
    match scan {
        DependencyScan::Textual => textual_usages(code.text, name),
        DependencyScan::Syntactic => syntactic_usages(code.source, code.node, name),
    }
}

fn is_referenced(scan: DependencyScan, code: CodeRef, name: &str) -> bool {
    match scan {
        DependencyScan::Textual => find_lib_usage_index(code.text, name, 0).is_some(),
        DependencyScan::Syntactic => !syntactic_usages(code.source, code.node, name).is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Textual scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HitKind {
    Attr,
    Call,
}

#[derive(Debug, Clone, Copy)]
struct TextHit {
    index: usize,
    kind: HitKind,
    new_class: bool,
}

fn next_char_boundary(code: &str, index: usize) -> usize {
    index + code[index..].chars().next().map(char::len_utf8).unwrap_or(1)
}

/// Does `needle` end right before `index`, ignoring spaces in between?
fn string_before_is(code: &str, index: usize, needle: &str) -> bool {
    let bytes = code.as_bytes();
    let mut end = index;
    while end > 0 && bytes[end - 1] == b' ' {
        end -= 1;
    }
    bytes[..end].ends_with(needle.as_bytes())
}

fn find_lib_usage_index(code: &str, target: &str, mut from: usize) -> Option<TextHit> {
    if target.is_empty() {
        return None;
    }
    loop {
        let index = from + code.get(from..)?.find(target)?;
        let prev = code[..index].chars().next_back();
        let next = code[index + target.len()..].chars().next();
        let is_instanceof = string_before_is(code, index, " instanceof");
        let boundary_ok = prev.is_some_and(|c| BOUNDARY_CHARS.contains(&c));

        if !boundary_ok || (next != Some('.') && next != Some('(') && !is_instanceof) {
            from = next_char_boundary(code, index);
            continue;
        }

        let kind = if next == Some('.') { HitKind::Attr } else { HitKind::Call };
        let new_class = kind == HitKind::Call && (is_instanceof || string_before_is(code, index, "new"));
        return Some(TextHit { index, kind, new_class });
    }
}

fn line_at(code: &str, index: usize) -> &str {
    let start = code[..index].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = code[index..].find('\n').map(|i| index + i).unwrap_or(code.len());
    &code[start..end]
}

fn attribute_at(code: &str, target: &str, index: usize) -> Option<Usage> {
    let following = &code[index..];
    let caps = attr_regex().captures(following)?;
    let attr = caps.get(1)?.as_str();
    let dot = target.len() + 1;
    if attr.len() >= MAX_ATTR_LEN || following.find(attr) != Some(dot) {
        return None;
    }
    let next = following[dot + attr.len()..].chars().next();
    if matches!(next, Some('\'') | Some('"')) {
        return None;
    }
    if text::is_comment_line(line_at(code, index)) {
        return None;
    }
    let access = if next == Some('(') { Access::Call } else { Access::Read };
    Some(Usage::Attr { attr: attr.to_string(), access })
}

fn textual_usages(code: &str, name: &str) -> Vec<Usage> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(hit) = find_lib_usage_index(code, name, from) {
        match hit.kind {
            HitKind::Attr => {
                if let Some(usage) = attribute_at(code, name, hit.index) {
                    out.push(usage);
                }
            }
            HitKind::Call => out.push(Usage::Call { new_class: hit.new_class }),
        }
        from = next_char_boundary(code, hit.index);
    }
    out
}

// ---------------------------------------------------------------------------
// Syntactic scanner
// ---------------------------------------------------------------------------

fn is_function_like(kind: &str) -> bool {
    matches!(
        kind,
        "function_expression" | "function" | "arrow_function" | "generator_function"
    )
}

fn collect_pattern_names(source: &[u8], pattern: Node, out: &mut HashSet<String>) {
    match pattern.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            out.insert(node_text(source, pattern).to_string());
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = pattern.child_by_field_name("left") {
                collect_pattern_names(source, left, out);
            }
        }
        "pair_pattern" => {
            if let Some(value) = pattern.child_by_field_name("value") {
                collect_pattern_names(source, value, out);
            }
        }
        "object_pattern" | "array_pattern" | "rest_pattern" | "formal_parameters" => {
            let mut cursor = pattern.walk();
            for child in pattern.named_children(&mut cursor) {
                collect_pattern_names(source, child, out);
            }
        }
        _ => {}
    }
}

/// Names bound anywhere inside `root` (parameters, declarations, catch
/// parameters, loop bindings).
pub(crate) fn declared_names(source: &[u8], root: Node) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "variable_declarator" => {
                if let Some(name) = node.child_by_field_name("name") {
                    collect_pattern_names(source, name, &mut out);
                }
            }
            "function_declaration" | "generator_function_declaration" | "class_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    out.insert(node_text(source, name).to_string());
                }
            }
            "formal_parameters" => collect_pattern_names(source, node, &mut out),
            "arrow_function" => {
                if let Some(param) = node.child_by_field_name("parameter") {
                    collect_pattern_names(source, param, &mut out);
                }
            }
            "catch_clause" => {
                if let Some(param) = node.child_by_field_name("parameter") {
                    collect_pattern_names(source, param, &mut out);
                }
            }
            "for_in_statement" => {
                if node.child_by_field_name("kind").is_some() {
                    if let Some(left) = node.child_by_field_name("left") {
                        collect_pattern_names(source, left, &mut out);
                    }
                }
            }
            _ => {}
        }
        if is_function_like(node.kind()) {
            // Named function expressions bind their own name.
            if let Some(name) = node.child_by_field_name("name") {
                out.insert(node_text(source, name).to_string());
            }
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    out
}

fn is_field(parent: Node, field: &str, node: Node) -> bool {
    parent.child_by_field_name(field) == Some(node)
}

fn classify_reference(source: &[u8], node: Node) -> Usage {
    let Some(parent) = node.parent() else { return Usage::Reference };
    match parent.kind() {
        "member_expression" if is_field(parent, "object", node) => {
            let Some(prop) = parent.child_by_field_name("property") else {
                return Usage::Reference;
            };
            if !matches!(prop.kind(), "property_identifier" | "private_property_identifier") {
                return Usage::Reference;
            }
            let access = match parent.parent() {
                Some(g) if g.kind() == "call_expression" && is_field(g, "function", parent) => Access::Call,
                Some(g) if g.kind() == "new_expression" && is_field(g, "constructor", parent) => Access::New,
                _ => Access::Read,
            };
            Usage::Attr { attr: node_text(source, prop).to_string(), access }
        }
        "call_expression" if is_field(parent, "function", node) => Usage::Call { new_class: false },
        "new_expression" if is_field(parent, "constructor", node) => Usage::Call { new_class: true },
        "binary_expression" if is_field(parent, "right", node) => {
            let is_instanceof = parent
                .child_by_field_name("operator")
                .is_some_and(|op| node_text(source, op) == "instanceof");
            if is_instanceof {
                Usage::Call { new_class: true }
            } else {
                Usage::Reference
            }
        }
        _ => Usage::Reference,
    }
}

fn syntactic_usages(source: &[u8], root: Node, name: &str) -> Vec<Usage> {
    if name != "this" && declared_names(source, root).contains(name) {
        return vec![];
    }
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let candidate = match node.kind() {
            "identifier" | "shorthand_property_identifier" => node_text(source, node) == name,
            "this" => name == "this",
            _ => false,
        };
        if candidate {
            out.push(classify_reference(source, node));
        }
        let mut cursor = node.walk();
        // Reverse push keeps document order when popping.
        let children: Vec<Node> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

// ---------------------------------------------------------------------------
// Edge construction
// ---------------------------------------------------------------------------

fn usage_edge(lib: &Lib, local: &str, imported: Option<&str>, usage: &Usage) -> Option<Edge> {
    let (target, edge_type) = match (usage, imported) {
        (Usage::Attr { attr, access }, None) => {
            let t = match access {
                Access::Call => EdgeType::Function,
                Access::New => EdgeType::Class,
                Access::Read => EdgeType::Unknown,
            };
            (attr.clone(), t)
        }
        (Usage::Attr { .. }, Some(imported)) => (imported.to_string(), EdgeType::Unknown),
        (Usage::Call { new_class }, imported) => {
            let t = if *new_class { EdgeType::Class } else { EdgeType::Function };
            (imported.unwrap_or(".").to_string(), t)
        }
        (Usage::Reference, Some(imported)) => (imported.to_string(), EdgeType::Unknown),
        (Usage::Reference, None) => return None,
    };
    Some(Edge {
        name: local.to_string(),
        local: lib.local,
        project_path: if lib.local { lib.project_path.clone() } else { None },
        target,
        edge_type,
        depth: 0,
        internal: false,
    })
}

/// Edges from `code` into the local (or whitelisted) imports in `libs`.
pub fn lib_edges(scan: DependencyScan, code: CodeRef, libs: &[Lib]) -> Vec<Edge> {
    let mut edges = Vec::new();
    for lib in libs.iter().filter(|l| l.local) {
        let bindings: Vec<(&str, Option<&str>)> = match &lib.binding {
            LibBinding::Module { name } => vec![(name.as_str(), None)],
            LibBinding::Named { imports } => imports
                .iter()
                .map(|i| (i.local.as_str(), Some(i.imported.as_str())))
                .collect(),
        };
        for (local, imported) in bindings {
            for usage in find_usages(scan, code, local) {
                if let Some(edge) = usage_edge(lib, local, imported, &usage) {
                    push_unique(&mut edges, edge);
                }
            }
        }
    }
    edges
}

/// A top-level name of the current module that other symbols may reference
/// directly.
#[derive(Debug, Clone)]
pub struct LocalBinding {
    /// Identifier used in code.
    pub binding: String,
    /// Key of the symbol in its scope.
    pub target: String,
    pub kind: Kind,
    pub internal: bool,
}

/// Edges to sibling declarations referenced by bare name.
pub fn local_edges(
    scan: DependencyScan,
    code: CodeRef,
    bindings: &[LocalBinding],
    module_name: &str,
    project_path: &str,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    for b in bindings {
        if is_referenced(scan, code, &b.binding) {
            push_unique(
                &mut edges,
                Edge {
                    name: module_name.to_string(),
                    local: true,
                    project_path: Some(project_path.to_string()),
                    target: b.target.clone(),
                    edge_type: b.kind.into(),
                    depth: 0,
                    internal: b.internal,
                },
            );
        }
    }
    edges
}

/// `class X extends Y` edges: `Y` may be an import binding or a sibling class.
pub fn extends_edges(
    extends: &[String],
    libs: &[Lib],
    bindings: &[LocalBinding],
    module_name: &str,
    project_path: &str,
) -> Vec<Edge> {
    let mut edges = Vec::new();
    for parent in extends {
        for lib in libs.iter().filter(|l| l.local) {
            let target = match &lib.binding {
                LibBinding::Module { name } if name == parent => Some(name.clone()),
                LibBinding::Named { imports } => imports
                    .iter()
                    .find(|i| &i.local == parent)
                    .map(|i| i.imported.clone()),
                _ => None,
            };
            if let Some(target) = target {
                push_unique(
                    &mut edges,
                    Edge {
                        name: parent.clone(),
                        local: lib.local,
                        project_path: lib.project_path.clone(),
                        target,
                        edge_type: EdgeType::Class,
                        depth: 0,
                        internal: false,
                    },
                );
            }
        }
        for b in bindings.iter().filter(|b| b.kind == Kind::Class && &b.binding == parent) {
            push_unique(
                &mut edges,
                Edge {
                    name: module_name.to_string(),
                    local: true,
                    project_path: Some(project_path.to_string()),
                    target: b.target.clone(),
                    edge_type: EdgeType::Class,
                    depth: 0,
                    internal: b.internal,
                },
            );
        }
    }
    edges
}

fn push_unique(edges: &mut Vec<Edge>, edge: Edge) {
    if !edges.contains(&edge) {
        edges.push(edge);
    }
}

/// Merge `edge` into `edges` by [`Edge::key`]. Forward edges keep the
/// smallest depth, reverse edges the closest one; a known type replaces
/// `unknown`.
pub fn merge_edge(edges: &mut Vec<Edge>, edge: Edge) {
    let key = edge.key();
    if let Some(existing) = edges.iter_mut().find(|e| e.key() == key) {
        if edge.is_reverse() {
            existing.depth = existing.depth.max(edge.depth);
        } else {
            existing.depth = existing.depth.min(edge.depth);
        }
        if existing.edge_type == EdgeType::Unknown {
            existing.edge_type = edge.edge_type;
        }
        return;
    }
    edges.push(edge);
}

pub fn merge_edges(edges: impl IntoIterator<Item = Edge>) -> Vec<Edge> {
    let mut out = Vec::new();
    for edge in edges {
        merge_edge(&mut out, edge);
    }
    out
}
