use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::text;

/// 0-indexed, inclusive line span inside a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn contains(&self, line: usize) -> bool {
        line >= self.start && line <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Function,
    Class,
    Variable,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Function, Kind::Variable, Kind::Class];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Function => "function",
            Kind::Class => "class",
            Kind::Variable => "variable",
        }
    }
}

impl std::str::FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Kind::Function),
            "class" => Ok(Kind::Class),
            "variable" => Ok(Kind::Variable),
            other => Err(format!("unknown target kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Function,
    Class,
    Variable,
    Unknown,
}

impl EdgeType {
    pub fn kind(self) -> Option<Kind> {
        match self {
            EdgeType::Function => Some(Kind::Function),
            EdgeType::Class => Some(Kind::Class),
            EdgeType::Variable => Some(Kind::Variable),
            EdgeType::Unknown => None,
        }
    }
}

impl From<Kind> for EdgeType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Function => EdgeType::Function,
            Kind::Class => EdgeType::Class,
            Kind::Variable => EdgeType::Variable,
        }
    }
}

/// A dependency edge from the owning symbol to `target` inside `project_path`.
///
/// `depth >= 0` is a forward edge reached after `depth` hops of local call
/// closure; `depth < 0` is a reverse edge: the symbol at `target` reaches the
/// owner at hop `-depth - 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Binding the edge was detected through (import name or module name).
    pub name: String,
    pub local: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    /// Symbol name in the target file, or `.` for the whole default export.
    pub target: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub depth: i32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
}

/// Identity used when merging edge lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub project_path: Option<String>,
    pub target: String,
    pub internal: bool,
    pub reverse: bool,
}

impl Edge {
    pub fn is_reverse(&self) -> bool {
        self.depth < 0
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            project_path: self.project_path.clone(),
            target: self.target.clone(),
            internal: self.internal,
            reverse: self.is_reverse(),
        }
    }
}

/// Kind-specific payload of a [`Symbol`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SymbolKind {
    Function {
        params: Vec<String>,
    },
    Class {
        methods: BTreeMap<String, Symbol>,
        fields: BTreeMap<String, Symbol>,
        extends: Vec<String>,
    },
    Variable {
        /// The code already reads `name: value` / `name = value`.
        code_include_declaration: bool,
    },
}

impl SymbolKind {
    pub fn kind(&self) -> Kind {
        match self {
            SymbolKind::Function { .. } => Kind::Function,
            SymbolKind::Class { .. } => Kind::Class,
            SymbolKind::Variable { .. } => Kind::Variable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub code: String,
    pub indent: String,
    pub js_doc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub js_doc_line_range: Option<LineRange>,
    pub line_range: Option<LineRange>,
    pub dependencies: Vec<Edge>,
    /// Depth-0 edges as they were before the closure ran.
    #[serde(skip)]
    pub direct_dependencies: Vec<Edge>,
    pub external_source: bool,
    /// Byte span of the declaration node in the file content.
    #[serde(skip)]
    pub span: Option<(usize, usize)>,
    #[serde(flatten)]
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn new(name: impl Into<String>, code: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            indent: String::new(),
            js_doc: String::new(),
            js_doc_line_range: None,
            line_range: None,
            dependencies: vec![],
            direct_dependencies: vec![],
            external_source: false,
            span: None,
            kind,
        }
    }

    pub fn function(name: impl Into<String>, code: impl Into<String>, params: Vec<String>) -> Self {
        Self::new(name, code, SymbolKind::Function { params })
    }

    pub fn variable(name: impl Into<String>, code: impl Into<String>, code_include_declaration: bool) -> Self {
        Self::new(name, code, SymbolKind::Variable { code_include_declaration })
    }

    pub fn kind(&self) -> Kind {
        self.kind.kind()
    }

    pub fn params(&self) -> &[String] {
        match &self.kind {
            SymbolKind::Function { params } => params,
            _ => &[],
        }
    }

    pub fn methods(&self) -> Option<&BTreeMap<String, Symbol>> {
        match &self.kind {
            SymbolKind::Class { methods, .. } => Some(methods),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&BTreeMap<String, Symbol>> {
        match &self.kind {
            SymbolKind::Class { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn extends(&self) -> &[String] {
        match &self.kind {
            SymbolKind::Class { extends, .. } => extends,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedImport {
    /// Name bound in the importing file.
    pub local: String,
    /// Name exported by the imported module.
    pub imported: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "binding", rename_all = "lowercase")]
pub enum LibBinding {
    /// `const x = require('./x')`, `import x from './x'`, `import * as x from './x'`.
    Module { name: String },
    /// `const { a, b: c } = require('./x')`, `import { a, b as c } from './x'`.
    Named { imports: Vec<NamedImport> },
}

/// One import descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lib {
    #[serde(flatten)]
    pub binding: LibBinding,
    /// Path as written in the source.
    pub path: String,
    /// Resolved project path before extension fallbacks, when local.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<String>,
    pub local: bool,
    pub external: bool,
    pub path_placeholder: String,
}

impl Lib {
    pub fn bound_names(&self) -> Vec<&str> {
        match &self.binding {
            LibBinding::Module { name } => vec![name.as_str()],
            LibBinding::Named { imports } => imports.iter().map(|i| i.local.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Function,
    Class,
    Object,
}

/// Per-file lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Loaded,
    Parsed,
    DependenciesClosed,
    ParentDependenciesClosed,
}

/// Coordinates of an extractable target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
}

impl TargetRef {
    pub fn new(name: impl Into<String>, kind: Kind, internal: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            internal,
            method: None,
            variable: None,
        }
    }
}

/// Value type of a dependency map entry (`function`, `internal_class`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Function,
    Class,
    Variable,
    InternalFunction,
    InternalClass,
    InternalVariable,
}

impl TargetType {
    pub fn new(kind: Kind, internal: bool) -> Self {
        match (kind, internal) {
            (Kind::Function, false) => TargetType::Function,
            (Kind::Class, false) => TargetType::Class,
            (Kind::Variable, false) => TargetType::Variable,
            (Kind::Function, true) => TargetType::InternalFunction,
            (Kind::Class, true) => TargetType::InternalClass,
            (Kind::Variable, true) => TargetType::InternalVariable,
        }
    }

    pub fn kind(self) -> Kind {
        match self {
            TargetType::Function | TargetType::InternalFunction => Kind::Function,
            TargetType::Class | TargetType::InternalClass => Kind::Class,
            TargetType::Variable | TargetType::InternalVariable => Kind::Variable,
        }
    }

    pub fn is_internal(self) -> bool {
        matches!(
            self,
            TargetType::InternalFunction | TargetType::InternalClass | TargetType::InternalVariable
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineExtract {
    pub start: usize,
    pub end: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct File {
    /// File name with extension.
    pub name: String,
    pub project_path: String,
    pub absolute_path: PathBuf,
    /// Every path this file was requested through (first is `project_path`).
    pub requested_paths: Vec<String>,
    #[serde(skip)]
    pub content: String,
    pub module_name: String,
    pub export_type: Option<ExportType>,
    pub export_name: String,
    pub libs: Vec<Lib>,
    pub exports: BTreeMap<String, Symbol>,
    pub internals: BTreeMap<String, Symbol>,
    pub state: FileState,
    pub parsing_disabled: bool,
    pub parsing_error: bool,
    /// Whitelisted `node_modules` file.
    pub external_module: bool,
}

/// `lib/math.js` -> `math`, `lib/math/index.js` -> `math`.
pub fn module_name_for(project_path: &str) -> String {
    let mut parts = project_path.rsplit('/');
    let file_name = parts.next().unwrap_or(project_path);
    let stem = file_name
        .strip_suffix(".js")
        .or_else(|| file_name.strip_suffix(".mjs"))
        .or_else(|| file_name.strip_suffix(".cjs"))
        .unwrap_or(file_name);
    if stem == "index" {
        if let Some(dir) = parts.next() {
            return dir.to_string();
        }
    }
    stem.to_string()
}

impl File {
    pub fn new(root: &Path, project_path: &str, requested_path: Option<&str>, content: String) -> Self {
        let name = project_path.rsplit('/').next().unwrap_or(project_path).to_string();
        let module_name = module_name_for(project_path);
        let mut requested_paths = vec![project_path.to_string()];
        if let Some(req) = requested_path {
            if req != project_path {
                requested_paths.push(req.to_string());
            }
        }
        Self {
            name,
            project_path: project_path.to_string(),
            absolute_path: root.join(project_path),
            requested_paths,
            content,
            export_name: module_name.clone(),
            module_name,
            export_type: None,
            libs: vec![],
            exports: BTreeMap::new(),
            internals: BTreeMap::new(),
            state: FileState::Loaded,
            parsing_disabled: false,
            parsing_error: false,
            external_module: project_path.starts_with("node_modules/"),
        }
    }

    /// Move the lifecycle forward. Returns false (and changes nothing) when
    /// `next` is not strictly ahead of the current state.
    pub fn advance(&mut self, next: FileState) -> bool {
        if next <= self.state {
            return false;
        }
        self.state = next;
        true
    }

    pub fn is_parsed(&self) -> bool {
        self.state >= FileState::Parsed
    }

    pub fn scope(&self, internal: bool) -> &BTreeMap<String, Symbol> {
        if internal {
            &self.internals
        } else {
            &self.exports
        }
    }

    pub fn scope_mut(&mut self, internal: bool) -> &mut BTreeMap<String, Symbol> {
        if internal {
            &mut self.internals
        } else {
            &mut self.exports
        }
    }

    /// Symbol of `kind` named `name` in the exported or internal scope.
    pub fn symbol(&self, kind: Kind, name: &str, internal: bool) -> Option<&Symbol> {
        self.scope(internal).get(name).filter(|s| s.kind() == kind)
    }

    pub fn symbol_mut(&mut self, kind: Kind, name: &str, internal: bool) -> Option<&mut Symbol> {
        self.scope_mut(internal).get_mut(name).filter(|s| s.kind() == kind)
    }

    pub fn symbols_of(&self, kind: Kind, internal: bool) -> impl Iterator<Item = &Symbol> {
        self.scope(internal).values().filter(move |s| s.kind() == kind)
    }

    pub fn function_map(&self) -> BTreeMap<&str, &Symbol> {
        self.symbols_of(Kind::Function, false).map(|s| (s.name.as_str(), s)).collect()
    }

    pub fn class_map(&self) -> BTreeMap<&str, &Symbol> {
        self.symbols_of(Kind::Class, false).map(|s| (s.name.as_str(), s)).collect()
    }

    pub fn variable_map(&self) -> BTreeMap<&str, &Symbol> {
        self.symbols_of(Kind::Variable, false).map(|s| (s.name.as_str(), s)).collect()
    }

    /// Point lookup by coordinates; `method`/`variable` descend into a class.
    pub fn get_target(&self, target: &TargetRef) -> Option<&Symbol> {
        let symbol = self.symbol(target.kind, &target.name, target.internal)?;
        if let Some(method) = &target.method {
            return symbol.methods()?.get(method);
        }
        if let Some(field) = &target.variable {
            return symbol.fields()?.get(field);
        }
        Some(symbol)
    }

    /// Resolve a name to its coordinates: exported before internal,
    /// then function, variable, class.
    pub fn find_target(&self, name: &str) -> Option<TargetRef> {
        for internal in [false, true] {
            for kind in Kind::ALL {
                if self.symbol(kind, name, internal).is_some() {
                    return Some(TargetRef::new(name, kind, internal));
                }
            }
        }
        None
    }

    /// First symbol whose line range contains `line` (0-indexed). For classes
    /// the method or field under the line is filled in as well.
    pub fn target_at_line(&self, line: usize) -> Option<TargetRef> {
        for kind in Kind::ALL {
            for internal in [false, true] {
                for symbol in self.symbols_of(kind, internal) {
                    let Some(range) = symbol.line_range else { continue };
                    if !range.contains(line) {
                        continue;
                    }
                    let mut target = TargetRef::new(symbol.name.clone(), kind, internal);
                    if let SymbolKind::Class { methods, fields, .. } = &symbol.kind {
                        target.method = methods
                            .values()
                            .find(|m| m.line_range.is_some_and(|r| r.contains(line)))
                            .map(|m| m.name.clone());
                        if target.method.is_none() {
                            target.variable = fields
                                .values()
                                .find(|f| f.line_range.is_some_and(|r| r.contains(line)))
                                .map(|f| f.name.clone());
                        }
                    }
                    return Some(target);
                }
            }
        }
        None
    }

    /// Every exported function and class target; classes are expanded per method.
    pub fn all_targets(&self) -> Vec<TargetRef> {
        let mut out = Vec::new();
        for symbol in self.symbols_of(Kind::Function, false) {
            out.push(TargetRef::new(symbol.name.clone(), Kind::Function, false));
        }
        for symbol in self.symbols_of(Kind::Class, false) {
            if let Some(methods) = symbol.methods() {
                for method in methods.keys() {
                    let mut target = TargetRef::new(symbol.name.clone(), Kind::Class, false);
                    target.method = Some(method.clone());
                    out.push(target);
                }
            }
        }
        out
    }

    pub fn target_extract(&self, target: &TargetRef) -> Option<LineExtract> {
        let range = self.get_target(target)?.line_range?;
        Some(LineExtract {
            start: range.start,
            end: range.end,
            content: self.lines(range.start, range.end),
        })
    }

    /// Lines `start..=end`, clamped to the file.
    pub fn lines(&self, start: usize, end: usize) -> String {
        text::slice_lines(&self.content, start, end)
    }

    pub fn replace_lines(&mut self, start: usize, end: usize, replacement: &str) {
        self.content = text::replace_lines(&self.content, start, end, replacement);
    }

    pub fn insert_before_line(&mut self, line: usize, insert: &str, copy_indent: bool) {
        self.content = text::insert_before_line(&self.content, line, insert, copy_indent);
    }

    pub fn save(&self) -> std::io::Result<()> {
        std::fs::write(&self.absolute_path, &self.content)
    }
}
