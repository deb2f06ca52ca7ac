//! Target extraction: rebuild a standalone module text holding one symbol
//! and, optionally, the slice of its dependency graph it needs.

use std::collections::BTreeMap;
use tracing::debug;

use crate::config::ExtractOptions;
use crate::inspector::MAIN_EXPORT;
use crate::model::{ExportType, File, Kind, Symbol, SymbolKind, TargetRef, TargetType};
use crate::project::{DependencyQuery, Project};

#[derive(Debug, Clone, Default)]
pub struct ExtractMeta {
    pub total_files: usize,
    pub total_symbols: usize,
    pub total_bytes: u64,
    pub total_tokens: usize,
}

pub fn estimate_tokens_from_bytes(total_bytes: u64, chars_per_token: usize) -> usize {
    if chars_per_token == 0 {
        return total_bytes as usize;
    }

    // ~4 chars per token, bytes standing in for chars.
    ((total_bytes as f64) / (chars_per_token as f64)).ceil() as usize
}

/// Standalone code for `target` in the file at `path`. Empty when the file
/// or the target does not exist.
pub fn extract_target(project: &Project, path: &str, target: &TargetRef, options: &ExtractOptions) -> String {
    extract_target_with_meta(project, path, target, options).0
}

pub fn extract_target_with_meta(
    project: &Project,
    path: &str,
    target: &TargetRef,
    options: &ExtractOptions,
) -> (String, ExtractMeta) {
    let mut meta = ExtractMeta::default();
    let Some(file) = project.file(path) else {
        debug!(path, "extract: file not loaded");
        return (String::new(), meta);
    };
    // Method and field coordinates extract their whole class.
    let target = TargetRef {
        method: None,
        variable: None,
        ..target.clone()
    };
    if file.get_target(&target).is_none() {
        debug!(path, target = %target.name, "extract: target not found");
        return (String::new(), meta);
    }

    let mut selection = if options.include_dependencies {
        let query = DependencyQuery {
            min_depth: options.min_depth,
            max_depth: options.max_depth,
            use_filter: options.use_filter,
        };
        project
            .dependency_map(&file.project_path, &target, query)
            .unwrap_or_default()
    } else {
        BTreeMap::new()
    };
    selection
        .entry(file.project_path.clone())
        .or_default()
        .insert(target.name.clone(), TargetType::new(target.kind, target.internal));

    let renderer = Renderer {
        project,
        options,
        target_path: &file.project_path,
        target: &target,
        with_filename: options.include_filename || options.include_dependencies,
    };

    let mut blocks = Vec::new();
    for (dep_path, names) in selection.iter().filter(|(p, _)| *p != &file.project_path) {
        let Some(dep_file) = project.file(dep_path) else { continue };
        if let Some(block) = renderer.file_block(dep_file, names) {
            blocks.push(block);
        }
    }
    if let Some(block) = renderer.file_block(file, &selection[&file.project_path]) {
        blocks.push(block);
    }

    let out = blocks.join("\n\n");
    meta.total_files = blocks.len();
    meta.total_symbols = selection.values().map(BTreeMap::len).sum();
    meta.total_bytes = out.len() as u64;
    meta.total_tokens = estimate_tokens_from_bytes(meta.total_bytes, 4);
    (out, meta)
}

struct Renderer<'a> {
    project: &'a Project,
    options: &'a ExtractOptions,
    target_path: &'a str,
    target: &'a TargetRef,
    with_filename: bool,
}

impl Renderer<'_> {
    fn is_target(&self, file: &File, name: &str, internal: bool) -> bool {
        file.project_path == self.target_path && name == self.target.name && internal == self.target.internal
    }

    /// Code that cannot be found in its file is never emitted in full.
    fn detached(&self, file: &File, symbol: &Symbol) -> bool {
        symbol.external_source || !file.content.contains(symbol.code.as_str())
    }

    fn stubbed(&self, file: &File, symbol: &Symbol, is_target: bool) -> bool {
        if self.detached(file, symbol) {
            return true;
        }
        if is_target {
            if self.options.target_function_code_override.is_some() {
                return false;
            }
            return self.options.only_prototypes && !self.options.only_prototypes_exclude_target_function;
        }
        self.options.only_prototypes || self.project.config().is_only_prototype(&file.project_path, &symbol.name)
    }

    fn code<'s>(&'s self, symbol: &'s Symbol, is_target: bool) -> &'s str {
        match &self.options.target_function_code_override {
            Some(code) if is_target => code,
            _ => &symbol.code,
        }
    }

    fn with_js_doc(&self, symbol: &Symbol, rendered: String) -> String {
        let excluded = self.options.exclude_js_doc_targets.iter().any(|t| t == &symbol.name);
        if !self.options.include_js_doc || symbol.js_doc.is_empty() || excluded {
            return rendered;
        }
        format!("{}\n{}", symbol.js_doc, rendered)
    }

    fn file_block(&self, file: &File, names: &BTreeMap<String, TargetType>) -> Option<String> {
        let mut internals = Vec::new();
        let mut exports = Vec::new();
        for (name, ty) in names {
            let Some(symbol) = file.symbol(ty.kind(), name, ty.is_internal()) else {
                continue;
            };
            if ty.is_internal() {
                internals.push(symbol);
            } else {
                exports.push(symbol);
            }
        }
        sort_by_position(&mut internals);
        sort_by_position(&mut exports);

        let mut parts: Vec<String> = internals
            .iter()
            .filter_map(|s| self.internal_declaration(file, s))
            .collect();
        if !exports.is_empty() {
            if let Some(surface) = self.export_surface(file, &exports) {
                parts.push(surface);
            }
        }
        if parts.is_empty() {
            return None;
        }

        let body = parts.join("\n\n");
        if !self.with_filename {
            return Some(body);
        }
        let header = match file.project_path.strip_prefix("node_modules/") {
            Some(package_path) if file.external_module => format!("// {package_path} (external module)"),
            _ => format!("// {}.js", file.module_name),
        };
        Some(format!("{header}\n{body}"))
    }

    fn internal_declaration(&self, file: &File, symbol: &Symbol) -> Option<String> {
        let is_target = self.is_target(file, &symbol.name, true);
        let code = self.code(symbol, is_target);
        let rendered = match symbol.kind() {
            Kind::Function => {
                if self.stubbed(file, symbol, is_target) {
                    format!("function {}({}) {{}}", symbol.name, symbol.params().join(", "))
                } else if is_function_keyword(code) {
                    code.to_string()
                } else {
                    format!("let {code}")
                }
            }
            _ if symbol.external_source => return None,
            Kind::Class if code.trim_start().starts_with("class") => code.to_string(),
            Kind::Class | Kind::Variable => format!("let {code}"),
        };
        Some(self.with_js_doc(symbol, rendered))
    }

    fn export_surface(&self, file: &File, exports: &[&Symbol]) -> Option<String> {
        let export_name = &file.export_name;
        match file.export_type {
            Some(ExportType::Function) => {
                let main = file.exports.get(MAIN_EXPORT)?;
                let is_target = self.is_target(file, MAIN_EXPORT, false);
                let main_code = if self.stubbed(file, main, is_target) {
                    format!("function ({}) {{}}", main.params().join(", "))
                } else {
                    self.code(main, is_target).to_string()
                };
                let mut parts = vec![self.with_js_doc(main, format!("const {export_name} = {main_code};"))];
                for symbol in exports.iter().filter(|s| s.name != MAIN_EXPORT) {
                    if let Some(value) = self.member_value(file, symbol) {
                        parts.push(self.with_js_doc(symbol, format!("{export_name}.{} = {value};", symbol.name)));
                    }
                }
                parts.push(format!("module.exports = {export_name};"));
                Some(parts.join("\n\n"))
            }
            Some(ExportType::Class) => {
                let class = exports.iter().find(|s| s.kind() == Kind::Class)?;
                let is_target = self.is_target(file, &class.name, false);
                let code = if self.detached(file, class) {
                    class_stub(class)
                } else {
                    self.code(class, is_target).to_string()
                };
                Some(format!(
                    "{}\n\nmodule.exports = {export_name};",
                    self.with_js_doc(class, format!("const {export_name} = {code};"))
                ))
            }
            Some(ExportType::Object) | None => {
                let members: Vec<String> = exports.iter().filter_map(|s| self.object_member(file, s)).collect();
                if members.is_empty() {
                    return None;
                }
                Some(format!(
                    "const {export_name} = {{\n\n{}\n\n}};\n\nmodule.exports = {export_name};",
                    members.join(",\n\n")
                ))
            }
        }
    }

    /// Right-hand side of `X.name = ...` in a function-shaped module.
    fn member_value(&self, file: &File, symbol: &Symbol) -> Option<String> {
        let is_target = self.is_target(file, &symbol.name, false);
        match &symbol.kind {
            SymbolKind::Function { params } => {
                if self.stubbed(file, symbol, is_target) {
                    Some(format!("function ({}) {{}}", params.join(", ")))
                } else {
                    Some(self.code(symbol, is_target).to_string())
                }
            }
            _ if symbol.external_source => None,
            _ => Some(symbol.code.clone()),
        }
    }

    fn object_member(&self, file: &File, symbol: &Symbol) -> Option<String> {
        let name = &symbol.name;
        let is_target = self.is_target(file, name, false);
        let rendered = match &symbol.kind {
            SymbolKind::Function { params } => {
                if self.stubbed(file, symbol, is_target) {
                    format!("    {name}: ({})", params.join(", "))
                } else {
                    let code = self.code(symbol, is_target);
                    if is_method_shorthand(code, name) {
                        format!("    {code}")
                    } else {
                        format!("    {name}: {code}")
                    }
                }
            }
            _ if symbol.external_source => return None,
            SymbolKind::Variable { code_include_declaration: true } => format!("    {}", symbol.code),
            SymbolKind::Variable { .. } | SymbolKind::Class { .. } => {
                format!("    {name}: {}", self.code(symbol, is_target))
            }
        };
        Some(self.with_js_doc(symbol, rendered))
    }
}

/// `class Name {}` holding one empty method per known method.
fn class_stub(class: &Symbol) -> String {
    let methods: Vec<String> = class
        .methods()
        .into_iter()
        .flatten()
        .map(|(name, method)| format!("    {name}({}) {{}}", method.params().join(", ")))
        .collect();
    if methods.is_empty() {
        return format!("class {} {{}}", class.name);
    }
    format!("class {} {{\n{}\n}}", class.name, methods.join("\n"))
}

fn sort_by_position(symbols: &mut [&Symbol]) {
    symbols.sort_by_key(|s| (s.line_range.map_or(usize::MAX, |r| r.start), s.name.clone()));
}

fn compact(code: &str) -> String {
    code.chars().filter(|c| !c.is_whitespace()).collect()
}

fn is_function_keyword(code: &str) -> bool {
    let c = compact(code);
    c.starts_with("function") || c.starts_with("asyncfunction")
}

/// `name(...) {}`, `async name(...)`, `get name()`, `*name()`: code that is
/// already a complete object member.
fn is_method_shorthand(code: &str, name: &str) -> bool {
    let c = compact(code);
    ["", "async", "get", "set", "*", "async*"]
        .iter()
        .any(|prefix| c.starts_with(&format!("{prefix}{name}(")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_shorthand_detection() {
        assert!(is_method_shorthand("save(record) {\n}", "save"));
        assert!(is_method_shorthand("async  load (k) {}", "load"));
        assert!(is_method_shorthand("*items() {}", "items"));
        assert!(!is_method_shorthand("(a, b) => a + b", "add"));
        assert!(!is_method_shorthand("function save(r) {}", "save"));
    }

    #[test]
    fn function_keyword_detection() {
        assert!(is_function_keyword("function helper(x) {}"));
        assert!(is_function_keyword("async function go() {}"));
        assert!(is_function_keyword("function* gen() {}"));
        assert!(!is_function_keyword("twice = (x) => x * 2"));
    }

    #[test]
    fn class_stub_keeps_method_signatures() {
        let mut methods = BTreeMap::new();
        methods.insert("find".to_string(), Symbol::function("find", "find(id) { return id; }", vec!["id".into()]));
        let class = Symbol::new(
            "Repo",
            "class Repo {}",
            SymbolKind::Class {
                methods,
                fields: BTreeMap::new(),
                extends: vec![],
            },
        );
        assert_eq!(class_stub(&class), "class Repo {\n    find(id) {}\n}");
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens_from_bytes(9, 4), 3);
        assert_eq!(estimate_tokens_from_bytes(9, 0), 9);
    }
}
