use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use tree_sitter::{Language, Node, Parser, Tree};

use crate::config::{Config, DependencyScan};
use crate::dependencies::{self, CodeRef, LocalBinding};
use crate::imports;
use crate::model::{ExportType, File, Kind, LineRange, Lib, LibBinding, Symbol, SymbolKind};
use crate::text;

/// Key of the main function of a function-shaped export.
pub const MAIN_EXPORT: &str = ".";

pub fn javascript_language() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}

pub fn parse_tree(source_text: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&javascript_language())
        .context("Failed to set tree-sitter language")?;
    parser
        .parse(source_text, None)
        .ok_or_else(|| anyhow!("Failed to parse file"))
}

pub(crate) fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    let start = node.start_byte();
    let end = node.end_byte();
    std::str::from_utf8(&source[start..end]).unwrap_or("")
}

pub(crate) fn strip_string_quotes(s: &str) -> String {
    let t = s.trim();
    if t.len() >= 2 {
        let bytes = t.as_bytes();
        let first = bytes[0];
        let last = bytes[t.len() - 1];
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') || (first == b'`' && last == b'`') {
            return t[1..t.len() - 1].to_string();
        }
    }
    t.to_string()
}

fn is_function_value(kind: &str) -> bool {
    matches!(
        kind,
        "function_expression" | "function" | "arrow_function" | "generator_function"
    )
}

fn is_function_declaration(kind: &str) -> bool {
    matches!(kind, "function_declaration" | "generator_function_declaration")
}

fn params_of(source: &[u8], node: Node) -> Vec<String> {
    if let Some(single) = node.child_by_field_name("parameter") {
        return vec![node_text(source, single).to_string()];
    }
    let Some(params) = node.child_by_field_name("parameters") else {
        return vec![];
    };
    let mut cursor = params.walk();
    params
        .named_children(&mut cursor)
        .filter(|p| p.kind() != "comment")
        .map(|p| node_text(source, p).to_string())
        .collect()
}

/// `module.exports = <rhs>` -> rhs.
fn module_exports_rhs<'t>(source: &[u8], stmt: Node<'t>) -> Option<Node<'t>> {
    let expr = stmt.named_child(0)?;
    if expr.kind() != "assignment_expression" {
        return None;
    }
    let left = expr.child_by_field_name("left")?;
    if !is_module_exports(source, left) {
        return None;
    }
    expr.child_by_field_name("right")
}

fn is_module_exports(source: &[u8], node: Node) -> bool {
    if node.kind() != "member_expression" {
        return false;
    }
    let (Some(object), Some(property)) = (node.child_by_field_name("object"), node.child_by_field_name("property")) else {
        return false;
    };
    node_text(source, object) == "module" && node_text(source, property) == "exports"
}

/// `exports.name = <rhs>` / `module.exports.name = <rhs>` -> (name, rhs).
fn exports_property_assignment<'t>(source: &[u8], stmt: Node<'t>) -> Option<(String, Node<'t>)> {
    let expr = stmt.named_child(0)?;
    if expr.kind() != "assignment_expression" {
        return None;
    }
    let left = expr.child_by_field_name("left")?;
    if left.kind() != "member_expression" {
        return None;
    }
    let object = left.child_by_field_name("object")?;
    let property = left.child_by_field_name("property")?;
    let is_exports_object =
        (object.kind() == "identifier" && node_text(source, object) == "exports") || is_module_exports(source, object);
    if !is_exports_object || property.kind() != "property_identifier" {
        return None;
    }
    Some((node_text(source, property).to_string(), expr.child_by_field_name("right")?))
}

/// Import-shaped initializer: a `require(...)` call anywhere in a value that
/// is not itself a function or class.
fn holds_require(source: &[u8], value: Node) -> bool {
    if is_function_value(value.kind()) || value.kind() == "class" {
        return false;
    }
    if imports::require_path(source, value).is_some() {
        return true;
    }
    let mut cursor = value.walk();
    let found = value.named_children(&mut cursor).any(|child| holds_require(source, child));
    found
}

fn has_default_keyword(stmt: Node) -> bool {
    let mut cursor = stmt.walk();
    let found = stmt.children(&mut cursor).any(|c| c.kind() == "default");
    found
}

/// Builds the symbol maps of one module from its syntax tree.
struct ModuleParser<'a> {
    source: &'a [u8],
    content: &'a str,
    project_path: &'a str,
    module_name: String,
    export_name: String,
    /// Top-level identifier the export was taken from (`module.exports = X`).
    export_binding: Option<String>,
    export_type: Option<ExportType>,
    commonjs_export_seen: bool,
    exports: BTreeMap<String, Symbol>,
    internals: BTreeMap<String, Symbol>,
    /// (export key, identifier) pairs that may point at a top-level declaration.
    aliases: Vec<(String, String)>,
    /// Export key -> identifier the symbol is reachable by in module code.
    bound: HashMap<String, String>,
    /// Internal declarator name -> byte span of its initializer.
    declarator_values: HashMap<String, (usize, usize)>,
    /// Exports that live inside the exported object literal (`this` = module).
    object_members: HashSet<String>,
    parsing_error: bool,
}

impl<'a> ModuleParser<'a> {
    fn text(&self, node: Node) -> &'a str {
        node_text(self.source, node)
    }

    /// Fill location data: line range from the node rows, indent, JSDoc run
    /// above `anchor`. Code not found verbatim is flagged `external_source`.
    fn finish(&self, mut symbol: Symbol, node: Node, anchor: Node) -> Symbol {
        symbol.span = Some((node.start_byte(), node.end_byte()));
        symbol.indent = text::line_indent_at_byte(self.content, node.start_byte());
        if !self.content.contains(symbol.code.as_str()) {
            symbol.external_source = true;
            symbol.line_range = None;
            return symbol;
        }
        let mut range = LineRange {
            start: node.start_position().row,
            end: node.end_position().row,
        };
        let anchor_row = anchor.start_position().row.min(range.start);
        if let Some((doc, doc_range)) = text::js_doc_before(self.content, anchor_row) {
            symbol.js_doc = doc;
            symbol.js_doc_line_range = Some(doc_range);
            range.start = range.start.min(doc_range.start);
        }
        symbol.line_range = Some(range);
        symbol
    }

    fn function_symbol(&self, name: &str, node: Node, anchor: Node) -> Symbol {
        let code = self.text(node).to_string();
        let symbol = Symbol::function(name, code, params_of(self.source, node));
        self.finish(symbol, node, anchor)
    }

    fn class_symbol(&mut self, name: &str, node: Node, anchor: Node) -> Symbol {
        let mut methods = BTreeMap::new();
        let mut fields = BTreeMap::new();
        let mut extends = Vec::new();

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "class_heritage" {
                let mut hc = child.walk();
                let parent = child.named_children(&mut hc).find(|n| n.kind() != "comment");
                if let Some(parent) = parent {
                    extends.push(self.text(parent).to_string());
                }
            }
        }

        if let Some(body) = node.child_by_field_name("body") {
            let mut bc = body.walk();
            for member in body.named_children(&mut bc) {
                match member.kind() {
                    "method_definition" => {
                        let Some(key) = member.child_by_field_name("name") else { continue };
                        if key.kind() == "computed_property_name" {
                            self.symbol_failure(name, member, "computed method name");
                            continue;
                        }
                        let method_name = self.text(key).to_string();
                        let method = self.function_symbol(&method_name, member, member);
                        methods.insert(method_name, method);
                    }
                    "field_definition" => {
                        let Some(key) = member.child_by_field_name("property") else { continue };
                        let field_name = self.text(key).to_string();
                        let code = self.text(member).to_string();
                        match member.child_by_field_name("value") {
                            Some(value) if is_function_value(value.kind()) => {
                                let symbol = Symbol::function(&field_name, code, params_of(self.source, value));
                                methods.insert(field_name, self.finish(symbol, member, member));
                            }
                            _ => {
                                let symbol = Symbol::variable(&field_name, code, true);
                                fields.insert(field_name, self.finish(symbol, member, member));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let symbol = Symbol::new(
            name,
            self.text(node),
            SymbolKind::Class { methods, fields, extends },
        );
        self.finish(symbol, node, anchor)
    }

    fn symbol_failure(&mut self, owner: &str, node: Node, reason: &str) {
        warn!(
            path = self.project_path,
            owner,
            line = node.start_position().row + 1,
            reason,
            "skipping symbol"
        );
        self.parsing_error = true;
    }

    // ── Export detection ──────────────────────────────────────────────────

    fn find_top_level_declaration(&self, root: Node<'a>, name: &str) -> Option<Node<'a>> {
        let mut cursor = root.walk();
        for stmt in root.named_children(&mut cursor) {
            match stmt.kind() {
                k if is_function_declaration(k) || k == "class_declaration" => {
                    if stmt.child_by_field_name("name").is_some_and(|n| self.text(n) == name) {
                        return Some(stmt);
                    }
                }
                "lexical_declaration" | "variable_declaration" => {
                    let mut dc = stmt.walk();
                    for decl in stmt.named_children(&mut dc) {
                        if decl.kind() != "variable_declarator" {
                            continue;
                        }
                        if decl.child_by_field_name("name").is_some_and(|n| self.text(n) == name) {
                            return decl.child_by_field_name("value");
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Shape of `module.exports = value` / `export default value`.
    fn assign_export(&mut self, root: Node<'a>, value: Node<'a>) {
        match value.kind() {
            "identifier" => {
                let name = self.text(value).to_string();
                self.export_name = name.clone();
                self.export_binding = Some(name.clone());
                let Some(decl) = self.find_top_level_declaration(root, &name) else {
                    debug!(path = self.project_path, export = %name, "export binding has no top-level declaration");
                    return;
                };
                let anchor = anchor_statement(decl);
                match decl.kind() {
                    k if is_function_declaration(k) || is_function_value(k) => {
                        self.export_type = Some(ExportType::Function);
                        let symbol = self.function_symbol(MAIN_EXPORT, decl, anchor);
                        self.exports.insert(MAIN_EXPORT.to_string(), symbol);
                        self.bound.insert(MAIN_EXPORT.to_string(), name);
                    }
                    "class_declaration" | "class" => {
                        self.export_type = Some(ExportType::Class);
                        let symbol = self.class_symbol(&name, decl, anchor);
                        self.exports.insert(name.clone(), symbol);
                        self.bound.insert(name.clone(), name);
                    }
                    "object" => self.object_members(decl),
                    other => {
                        debug!(path = self.project_path, kind = other, "unsupported export value");
                    }
                }
            }
            "object" => {
                self.export_name = self.module_name.clone();
                self.object_members(value);
            }
            k if is_function_value(k) || is_function_declaration(k) => {
                self.export_name = self.module_name.clone();
                if let Some(name) = value.child_by_field_name("name") {
                    self.export_binding = Some(self.text(name).to_string());
                }
                self.export_type = Some(ExportType::Function);
                let symbol = self.function_symbol(MAIN_EXPORT, value, anchor_statement(value));
                self.exports.insert(MAIN_EXPORT.to_string(), symbol);
            }
            "class" | "class_declaration" => {
                let name = value
                    .child_by_field_name("name")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_else(|| self.module_name.clone());
                self.export_name = name.clone();
                self.export_binding = Some(name.clone());
                self.export_type = Some(ExportType::Class);
                let symbol = self.class_symbol(&name, value, anchor_statement(value));
                self.exports.insert(name.clone(), symbol);
                self.bound.insert(name.clone(), name);
            }
            other => {
                debug!(path = self.project_path, kind = other, "unsupported export value");
            }
        }
    }

    fn object_members(&mut self, object: Node<'a>) {
        self.export_type = Some(ExportType::Object);
        let mut cursor = object.walk();
        for prop in object.named_children(&mut cursor) {
            match prop.kind() {
                "pair" => {
                    let (Some(key), Some(value)) = (prop.child_by_field_name("key"), prop.child_by_field_name("value")) else {
                        continue;
                    };
                    if key.kind() == "computed_property_name" {
                        self.symbol_failure(&self.export_name.clone(), prop, "computed export key");
                        continue;
                    }
                    let name = strip_string_quotes(self.text(key));
                    self.object_member(&name, prop, value);
                }
                "method_definition" => {
                    let Some(key) = prop.child_by_field_name("name") else { continue };
                    if key.kind() == "computed_property_name" {
                        self.symbol_failure(&self.export_name.clone(), prop, "computed export key");
                        continue;
                    }
                    let name = self.text(key).to_string();
                    let symbol = self.function_symbol(&name, prop, prop);
                    self.object_members.insert(name.clone());
                    self.exports.insert(name, symbol);
                }
                "shorthand_property_identifier" => {
                    let name = self.text(prop).to_string();
                    let symbol = self.finish(Symbol::variable(&name, name.clone(), true), prop, prop);
                    self.aliases.push((name.clone(), name.clone()));
                    self.exports.insert(name, symbol);
                }
                _ => {}
            }
        }
    }

    fn object_member(&mut self, name: &str, pair: Node<'a>, value: Node<'a>) {
        let kind = value.kind();
        let symbol = if is_function_value(kind) {
            self.function_symbol(name, value, pair)
        } else if kind == "class" {
            self.class_symbol(name, value, pair)
        } else {
            if kind == "identifier" {
                self.aliases.push((name.to_string(), self.text(value).to_string()));
            }
            let code = self.text(pair).to_string();
            self.finish(Symbol::variable(name, code, true), pair, pair)
        };
        self.object_members.insert(name.to_string());
        self.exports.insert(name.to_string(), symbol);
    }

    fn es_export(&mut self, root: Node<'a>, stmt: Node<'a>) {
        let is_default = has_default_keyword(stmt);
        if let Some(decl) = stmt.child_by_field_name("declaration") {
            if is_default {
                self.assign_export(root, decl);
                return;
            }
            match decl.kind() {
                k if is_function_declaration(k) => {
                    let Some(name) = decl.child_by_field_name("name") else { return };
                    let name = self.text(name).to_string();
                    let symbol = self.function_symbol(&name, decl, stmt);
                    self.add_named_export(name, symbol);
                }
                "class_declaration" => {
                    let Some(name) = decl.child_by_field_name("name") else { return };
                    let name = self.text(name).to_string();
                    let symbol = self.class_symbol(&name, decl, stmt);
                    self.add_named_export(name, symbol);
                }
                "lexical_declaration" | "variable_declaration" => {
                    let mut cursor = decl.walk();
                    for declarator in decl.named_children(&mut cursor) {
                        if declarator.kind() != "variable_declarator" {
                            continue;
                        }
                        let Some(name_node) = declarator.child_by_field_name("name") else { continue };
                        if name_node.kind() != "identifier" {
                            continue;
                        }
                        let name = self.text(name_node).to_string();
                        let symbol = match declarator.child_by_field_name("value") {
                            Some(v) if is_function_value(v.kind()) => self.function_symbol(&name, v, stmt),
                            Some(v) if v.kind() == "class" => self.class_symbol(&name, v, stmt),
                            Some(v) => {
                                let code = self.text(v).to_string();
                                self.finish(Symbol::variable(&name, code, false), v, stmt)
                            }
                            None => continue,
                        };
                        self.add_named_export(name, symbol);
                    }
                }
                _ => {}
            }
            return;
        }
        if let Some(value) = stmt.child_by_field_name("value") {
            if is_default {
                self.assign_export(root, value);
            }
            return;
        }
        if stmt.child_by_field_name("source").is_some() {
            // Re-exports from another module carry no local code.
            return;
        }
        let mut cursor = stmt.walk();
        for clause in stmt.named_children(&mut cursor) {
            if clause.kind() != "export_clause" {
                continue;
            }
            let mut sc = clause.walk();
            for spec in clause.named_children(&mut sc) {
                if spec.kind() != "export_specifier" {
                    continue;
                }
                let Some(local) = spec.child_by_field_name("name") else { continue };
                let local = self.text(local).to_string();
                let exported = spec
                    .child_by_field_name("alias")
                    .map(|a| self.text(a).to_string())
                    .unwrap_or_else(|| local.clone());
                self.aliases.push((exported, local));
            }
            self.export_type.get_or_insert(ExportType::Object);
        }
    }

    fn add_named_export(&mut self, name: String, symbol: Symbol) {
        self.export_type.get_or_insert(ExportType::Object);
        self.bound.insert(name.clone(), name.clone());
        self.exports.insert(name, symbol);
    }

    fn detect_exports(&mut self, root: Node<'a>) {
        let mut cursor = root.walk();
        for stmt in root.named_children(&mut cursor) {
            match stmt.kind() {
                "expression_statement" => {
                    if !self.commonjs_export_seen {
                        if let Some(value) = module_exports_rhs(self.source, stmt) {
                            self.commonjs_export_seen = true;
                            self.assign_export(root, value);
                            continue;
                        }
                    }
                    if let Some((name, value)) = exports_property_assignment(self.source, stmt) {
                        let symbol = if is_function_value(value.kind()) {
                            self.function_symbol(&name, value, stmt)
                        } else {
                            let code = self.text(value).to_string();
                            self.finish(Symbol::variable(&name, code, false), value, stmt)
                        };
                        self.export_type.get_or_insert(ExportType::Object);
                        self.exports.insert(name, symbol);
                    }
                }
                "export_statement" => self.es_export(root, stmt),
                _ => {}
            }
        }
    }

    // ── Module-private declarations ───────────────────────────────────────

    fn is_export_binding(&self, name: &str) -> bool {
        self.export_binding.as_deref() == Some(name)
    }

    fn collect_internals(&mut self, root: Node<'a>) {
        let mut cursor = root.walk();
        for stmt in root.named_children(&mut cursor) {
            match stmt.kind() {
                k if is_function_declaration(k) || k == "class_declaration" => {
                    let Some(name) = stmt.child_by_field_name("name") else { continue };
                    let name = self.text(name).to_string();
                    if self.is_export_binding(&name) {
                        continue;
                    }
                    let symbol = if k == "class_declaration" {
                        self.class_symbol(&name, stmt, stmt)
                    } else {
                        self.function_symbol(&name, stmt, stmt)
                    };
                    self.internals.insert(name, symbol);
                }
                "lexical_declaration" | "variable_declaration" => {
                    let mut dc = stmt.walk();
                    for declarator in stmt.named_children(&mut dc) {
                        if declarator.kind() == "variable_declarator" {
                            self.internal_declarator(stmt, declarator);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn internal_declarator(&mut self, stmt: Node<'a>, declarator: Node<'a>) {
        let Some(name_node) = declarator.child_by_field_name("name") else { return };
        if name_node.kind() != "identifier" {
            return;
        }
        let name = self.text(name_node).to_string();
        let code = self.text(declarator).to_string();
        let value = declarator.child_by_field_name("value");
        if self.is_export_binding(&name) || value.is_some_and(|v| holds_require(self.source, v)) {
            return;
        }
        if let Some(v) = value {
            self.declarator_values.insert(name.clone(), (v.start_byte(), v.end_byte()));
        }
        let anchor = if stmt.named_child(0) == Some(declarator) { stmt } else { declarator };
        let symbol = match value {
            Some(v) if is_function_value(v.kind()) => {
                let symbol = Symbol::function(&name, code, params_of(self.source, v));
                self.finish(symbol, declarator, anchor)
            }
            Some(v) if v.kind() == "class" => {
                let mut symbol = self.class_symbol(&name, v, anchor);
                symbol.code = code;
                self.finish(symbol, declarator, anchor)
            }
            _ => self.finish(Symbol::variable(&name, code, false), declarator, anchor),
        };
        self.internals.insert(name, symbol);
    }

    /// Exported names that are plain identifiers of a top-level declaration
    /// resolve to that declaration instead of a variable.
    fn resolve_aliases(&mut self, root: Node<'a>) {
        for (key, local) in std::mem::take(&mut self.aliases) {
            let Some(mut symbol) = self.internals.remove(&local) else {
                continue;
            };
            if let Some((start, end)) = self.declarator_values.get(&local).copied() {
                // `const helper = () => ...` is exported through its initializer.
                if let Some(value) = root.descendant_for_byte_range(start, end) {
                    let anchor = symbol_anchor(root, &symbol).unwrap_or(value);
                    symbol = match symbol.kind() {
                        Kind::Function => self.function_symbol(&key, value, anchor),
                        Kind::Class => self.class_symbol(&key, value, anchor),
                        Kind::Variable => {
                            let code = self.text(value).to_string();
                            self.finish(Symbol::variable(&key, code, false), value, anchor)
                        }
                    };
                }
            }
            symbol.name = key.clone();
            self.exports.insert(key.clone(), symbol);
            self.bound.insert(key, local);
        }
    }

    // ── Dependencies ──────────────────────────────────────────────────────

    fn self_libs(&self, with_this: bool) -> Vec<Lib> {
        if self.export_type != Some(ExportType::Object) {
            return vec![];
        }
        let mut names = vec![self.export_name.clone()];
        if self.export_name != "self" {
            names.push("self".to_string());
        }
        if with_this {
            names.push("this".to_string());
        }
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Lib {
                binding: LibBinding::Module { name },
                path: format!("./{}", self.project_path),
                project_path: Some(self.project_path.to_string()),
                local: true,
                external: false,
                path_placeholder: format!("SELF_{i}"),
            })
            .collect()
    }

    fn local_bindings(&self) -> Vec<LocalBinding> {
        let mut out: Vec<LocalBinding> = self
            .internals
            .values()
            .map(|s| LocalBinding {
                binding: s.name.clone(),
                target: s.name.clone(),
                kind: s.kind(),
                internal: true,
            })
            .collect();
        for (key, binding) in &self.bound {
            if let Some(symbol) = self.exports.get(key) {
                out.push(LocalBinding {
                    binding: binding.clone(),
                    target: key.clone(),
                    kind: symbol.kind(),
                    internal: false,
                });
            }
        }
        out
    }

    fn symbol_edges(
        &self,
        root: Node,
        symbol: &Symbol,
        internal: bool,
        scan: DependencyScan,
        libs: &[Lib],
        bindings: &[LocalBinding],
    ) -> Vec<crate::model::Edge> {
        let Some((start, end)) = symbol.span else { return vec![] };
        let Some(node) = root.descendant_for_byte_range(start, end) else { return vec![] };
        let code = CodeRef { text: &symbol.code, node, source: self.source };

        let mut edges = dependencies::lib_edges(scan, code, libs);
        edges.extend(dependencies::local_edges(scan, code, bindings, &self.module_name, self.project_path));
        if !symbol.extends().is_empty() {
            edges.extend(dependencies::extends_edges(
                symbol.extends(),
                libs,
                bindings,
                &self.module_name,
                self.project_path,
            ));
        }
        let own = Some(self.project_path.to_string());
        edges.retain(|e| !(e.project_path == own && e.target == symbol.name && e.internal == internal));
        dependencies::merge_edges(edges)
    }

    fn compute_dependencies(&mut self, root: Node, file_libs: &[Lib], scan: DependencyScan) {
        let bindings = self.local_bindings();
        let base_libs: Vec<Lib> = file_libs.iter().cloned().chain(self.self_libs(false)).collect();
        let member_libs: Vec<Lib> = file_libs.iter().cloned().chain(self.self_libs(true)).collect();

        let mut computed: Vec<(bool, String, Vec<crate::model::Edge>, Vec<(String, Vec<crate::model::Edge>)>)> = Vec::new();
        for internal in [false, true] {
            let scope = if internal { &self.internals } else { &self.exports };
            for (key, symbol) in scope {
                if symbol.kind() == Kind::Variable {
                    continue;
                }
                let libs = if !internal && self.object_members.contains(key) { &member_libs } else { &base_libs };
                let edges = self.symbol_edges(root, symbol, internal, scan, libs, &bindings);
                let method_edges = symbol
                    .methods()
                    .map(|methods| {
                        methods
                            .iter()
                            .map(|(name, m)| (name.clone(), self.symbol_edges(root, m, internal, scan, &base_libs, &bindings)))
                            .collect()
                    })
                    .unwrap_or_default();
                computed.push((internal, key.clone(), edges, method_edges));
            }
        }

        for (internal, key, edges, method_edges) in computed {
            let scope = if internal { &mut self.internals } else { &mut self.exports };
            let Some(symbol) = scope.get_mut(&key) else { continue };
            symbol.dependencies = edges;
            if let SymbolKind::Class { methods, .. } = &mut symbol.kind {
                for (name, edges) in method_edges {
                    if let Some(m) = methods.get_mut(&name) {
                        m.dependencies = edges;
                    }
                }
            }
        }
    }
}

/// Statement that owns `node` at the top level of the program.
fn anchor_statement(node: Node) -> Node {
    let mut current = node;
    while let Some(parent) = current.parent() {
        if parent.kind() == "program" {
            return current;
        }
        current = parent;
    }
    node
}

fn symbol_anchor<'t>(root: Node<'t>, symbol: &Symbol) -> Option<Node<'t>> {
    let (start, end) = symbol.span?;
    root.descendant_for_byte_range(start, end).map(anchor_statement)
}

/// Import descriptors of `content`; the flag is true when the source does
/// not parse cleanly (no imports are reported then).
pub fn read_libs(content: &str, project_path: &str, config: &Config) -> (Vec<Lib>, bool) {
    let tree = match parse_tree(content) {
        Ok(tree) => tree,
        Err(err) => {
            warn!(path = project_path, %err, "cannot parse imports");
            return (vec![], true);
        }
    };
    let root = tree.root_node();
    if root.has_error() {
        return (vec![], true);
    }
    (imports::extract_libs(content.as_bytes(), root, project_path, config), false)
}

/// Parse `file.content` into its export/internal symbol maps with direct
/// dependency edges. Never fails: syntax errors set `parsing_error` and leave
/// the maps empty; unsupported shapes are skipped with `parsing_error` set.
pub fn parse_module(file: &mut File, config: &Config) {
    file.exports.clear();
    file.internals.clear();

    let tree = match parse_tree(&file.content) {
        Ok(tree) => tree,
        Err(err) => {
            warn!(path = %file.project_path, %err, "parse failed");
            file.parsing_error = true;
            return;
        }
    };
    let root = tree.root_node();
    if root.has_error() {
        warn!(path = %file.project_path, "syntax error, file not usable for extraction");
        file.parsing_error = true;
        return;
    }

    let content = file.content.clone();
    let project_path = file.project_path.clone();
    let mut parser = ModuleParser {
        source: content.as_bytes(),
        content: &content,
        project_path: &project_path,
        module_name: file.module_name.clone(),
        export_name: file.module_name.clone(),
        export_binding: None,
        export_type: None,
        commonjs_export_seen: false,
        exports: BTreeMap::new(),
        internals: BTreeMap::new(),
        aliases: Vec::new(),
        bound: HashMap::new(),
        declarator_values: HashMap::new(),
        object_members: HashSet::new(),
        parsing_error: false,
    };

    // ── Step 1: export surface ──
    parser.detect_exports(root);
    // ── Step 2: module-private declarations ──
    parser.collect_internals(root);
    // ── Step 3: `{ foo }` / `{ foo: foo }` / `export { foo }` aliases ──
    parser.resolve_aliases(root);
    // ── Step 4: direct dependency edges ──
    parser.compute_dependencies(root, &file.libs, config.dependency_scan);

    debug!(
        path = %project_path,
        exports = parser.exports.len(),
        internals = parser.internals.len(),
        export_type = ?parser.export_type,
        "parsed module"
    );

    file.export_type = parser.export_type;
    file.export_name = parser.export_name;
    file.exports = parser.exports;
    file.internals = parser.internals;
    file.parsing_error |= parser.parsing_error;
}
