//! Loaded project: file resolution, parsing, and the three dependency passes
//! (type resolution, sub-dependency closure, parent edges).

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dependencies::merge_edge;
use crate::error::{GraphError, GraphResult};
use crate::inspector;
use crate::model::{Edge, EdgeType, ExportType, File, FileState, Kind, Symbol, SymbolKind, TargetRef, TargetType};

/// Hops a sub-dependency walk may take before the graph is rejected.
pub const MAX_CLOSURE_HOPS: i32 = 10;

/// `(project_path, target, internal)`
type SymbolKey = (String, String, bool);

/// Depth window and filtering for [`Project::dependency_map`].
#[derive(Debug, Clone, Copy)]
pub struct DependencyQuery {
    pub min_depth: i32,
    pub max_depth: i32,
    pub use_filter: bool,
}

impl Default for DependencyQuery {
    fn default() -> Self {
        Self {
            min_depth: 0,
            max_depth: 0,
            use_filter: true,
        }
    }
}

pub type DependencyMap = BTreeMap<String, BTreeMap<String, TargetType>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFramework {
    Jest,
    Mocha,
}

impl TestFramework {
    pub fn required_libs(self) -> &'static [&'static str] {
        match self {
            TestFramework::Jest => &["jest"],
            TestFramework::Mocha => &["sinon", "sinon-chai", "chai"],
        }
    }
}

impl std::str::FromStr for TestFramework {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jest" => Ok(TestFramework::Jest),
            "mocha" => Ok(TestFramework::Mocha),
            other => Err(format!(
                "invalid test framework: {other}. Supported test frameworks: jest, mocha"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestFrameworkReport {
    pub missing_in_package_json: Vec<String>,
    pub missing_in_node_modules: Vec<String>,
}

impl TestFrameworkReport {
    pub fn is_ready(&self) -> bool {
        self.missing_in_package_json.is_empty() && self.missing_in_node_modules.is_empty()
    }
}

pub struct Project {
    root: PathBuf,
    config: Config,
    files: BTreeMap<String, File>,
    /// Requested path -> resolved project path.
    aliases: HashMap<String, String>,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, config: Config) -> GraphResult<Self> {
        let root = root.into();
        if !root.join("package.json").is_file() {
            return Err(GraphError::MissingPackageJson { root });
        }
        Ok(Self {
            root,
            config,
            files: BTreeMap::new(),
            aliases: HashMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn files(&self) -> impl Iterator<Item = &File> {
        self.files.values()
    }

    /// Loaded file by project path or by any path it was requested through.
    pub fn file(&self, path: &str) -> Option<&File> {
        let path = self.normalize(path);
        self.files
            .get(&path)
            .or_else(|| self.aliases.get(&path).and_then(|pp| self.files.get(pp)))
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut File> {
        let path = self.normalize(path);
        let key = if self.files.contains_key(&path) {
            path
        } else {
            self.aliases.get(&path)?.clone()
        };
        self.files.get_mut(&key)
    }

    /// Load `entry` and everything it imports, then parse and close the new
    /// files. Returns the entry's project path.
    pub fn load(&mut self, entry: &str) -> GraphResult<String> {
        let project_path = self.load_file(entry)?;
        self.parse_files();
        self.close_dependencies()?;
        info!(entry = %project_path, files = self.files.len(), "project loaded");
        Ok(project_path)
    }

    /// The file at `path`, loading it (and its imports) first when needed.
    pub fn get_or_load(&mut self, path: &str) -> GraphResult<&File> {
        let loaded = self
            .file(path)
            .filter(|f| f.state == FileState::ParentDependenciesClosed)
            .map(|f| f.project_path.clone());
        let project_path = match loaded {
            Some(project_path) => project_path,
            None => self.load(path)?,
        };
        self.files
            .get(&project_path)
            .ok_or(GraphError::UnknownFile { path: project_path })
    }

    /// Project-relative, `/`-separated form of `path`.
    fn normalize(&self, path: &str) -> String {
        let p = Path::new(path);
        let rel = if p.is_absolute() {
            p.strip_prefix(&self.root).unwrap_or(p)
        } else {
            p
        };
        let joined = rel.to_string_lossy().replace('\\', "/");
        crate::imports::recompute_path(&joined, "")
    }

    /// Read the file behind `requested`: the exact path, then `.js`, then
    /// `index.js` inside the directory.
    fn open(&self, requested: &str) -> GraphResult<(String, String)> {
        let mut candidates = vec![requested.to_string()];
        if !requested.ends_with(".js") {
            candidates.push(format!("{requested}.js"));
        }
        let stem = requested.strip_suffix(".js").unwrap_or(requested);
        candidates.push(format!("{stem}/index.js"));

        for candidate in &candidates {
            let absolute = self.root.join(candidate);
            if absolute.is_dir() {
                continue;
            }
            match std::fs::read_to_string(&absolute) {
                Ok(content) => return Ok((candidate.clone(), content)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %candidate, "candidate not found");
                }
                Err(source) => return Err(GraphError::Io { path: absolute, source }),
            }
        }
        Err(GraphError::UnresolvedImport {
            path: requested.to_string(),
            tried: candidates,
        })
    }

    /// Read `path` and, transitively, every local import it reaches. No
    /// parsing beyond import extraction happens here.
    pub fn load_file(&mut self, path: &str) -> GraphResult<String> {
        let requested = self.normalize(path);
        if let Some(file) = self.file(&requested) {
            return Ok(file.project_path.clone());
        }

        let mut entry = None;
        let mut queue = VecDeque::from([requested]);
        while let Some(requested) = queue.pop_front() {
            if self.files.contains_key(&requested) || self.aliases.contains_key(&requested) {
                continue;
            }
            let (project_path, content) = self.open(&requested)?;
            self.aliases.insert(requested.clone(), project_path.clone());
            entry.get_or_insert_with(|| project_path.clone());

            if let Some(existing) = self.files.get_mut(&project_path) {
                if !existing.requested_paths.contains(&requested) {
                    existing.requested_paths.push(requested);
                }
                continue;
            }

            let mut file = File::new(&self.root, &project_path, Some(&requested), content);
            let (libs, error) = inspector::read_libs(&file.content, &project_path, &self.config);
            file.parsing_error = error;
            for lib in libs.iter().filter(|l| l.local) {
                if let Some(target) = &lib.project_path {
                    queue.push_back(target.clone());
                }
            }
            file.libs = libs;
            debug!(path = %project_path, libs = file.libs.len(), "loaded");
            self.files.insert(project_path, file);
        }

        // Libs point at the path that was requested; swap in the resolved one.
        for file in self.files.values_mut() {
            for lib in &mut file.libs {
                let Some(requested) = &lib.project_path else { continue };
                if let Some(resolved) = self.aliases.get(requested) {
                    lib.project_path = Some(resolved.clone());
                }
            }
        }
        let external: Vec<String> = self
            .files
            .values()
            .flat_map(|f| f.libs.iter())
            .filter(|l| l.external)
            .filter_map(|l| l.project_path.clone())
            .collect();
        for path in external {
            if let Some(file) = self.files.get_mut(&path) {
                file.external_module = true;
            }
        }

        entry.ok_or_else(|| GraphError::UnknownFile { path: path.to_string() })
    }

    fn parse_files(&mut self) {
        for file in self.files.values_mut().filter(|f| !f.is_parsed()) {
            if self.config.is_parsing_disabled(&file.project_path) {
                file.parsing_disabled = true;
            } else {
                inspector::parse_module(file, &self.config);
                if file.parsing_error {
                    warn!(path = %file.project_path, "file not usable for target extraction");
                }
            }
            file.advance(FileState::Parsed);
        }
    }

    /// Run the three dependency passes over every file that has not been
    /// through them yet.
    pub fn close_dependencies(&mut self) -> GraphResult<()> {
        self.resolve_edge_types();
        self.close_sub_dependencies()?;
        self.add_parent_dependencies();
        Ok(())
    }

    // ── Pass 1: type resolution ──────────────────────────────────────────

    fn resolve_edge_types(&mut self) {
        let mut kinds: HashMap<SymbolKey, Kind> = HashMap::new();
        let mut class_exports: HashMap<String, String> = HashMap::new();
        for file in self.files.values() {
            for internal in [false, true] {
                for (name, symbol) in file.scope(internal) {
                    kinds.insert((file.project_path.clone(), name.clone(), internal), symbol.kind());
                }
            }
            if file.export_type == Some(ExportType::Class) {
                class_exports.insert(file.project_path.clone(), file.export_name.clone());
            }
        }

        let resolve = |edge: &mut Edge| {
            if !edge.local || edge.is_reverse() {
                return;
            }
            let Some(path) = edge.project_path.clone() else { return };
            let key = (path, edge.target.clone(), edge.internal);
            if let Some(kind) = kinds.get(&key) {
                edge.edge_type = (*kind).into();
                return;
            }
            // `new Repo()`, `Repo.create()`: anything reached through a class
            // export that is not a top-level symbol belongs to the class.
            if !edge.internal {
                if let Some(class_name) = class_exports.get(&key.0) {
                    edge.target = class_name.clone();
                    edge.edge_type = EdgeType::Class;
                }
            }
        };

        for file in self.files.values_mut().filter(|f| f.state < FileState::DependenciesClosed) {
            for_each_symbol_mut(file, |symbol, _| {
                for edge in &mut symbol.dependencies {
                    resolve(edge);
                }
                let edges = std::mem::take(&mut symbol.dependencies);
                for edge in edges {
                    merge_edge(&mut symbol.dependencies, edge);
                }
                symbol.direct_dependencies = symbol.dependencies.clone();
            });
        }
    }

    // ── Pass 2: sub-dependency closure ───────────────────────────────────

    fn close_sub_dependencies(&mut self) -> GraphResult<()> {
        let mut direct: HashMap<SymbolKey, Vec<Edge>> = HashMap::new();
        for file in self.files.values() {
            for internal in [false, true] {
                for (name, symbol) in file.scope(internal) {
                    direct.insert(
                        (file.project_path.clone(), name.clone(), internal),
                        symbol.direct_dependencies.clone(),
                    );
                }
            }
        }

        let mut closed: Vec<(String, bool, String, Option<String>, Vec<Edge>)> = Vec::new();
        for file in self.files.values().filter(|f| f.state < FileState::DependenciesClosed) {
            for internal in [false, true] {
                for (name, symbol) in file.scope(internal) {
                    if symbol.kind() == Kind::Variable {
                        continue;
                    }
                    let origin = (file.project_path.clone(), name.clone(), internal);
                    let edges = close_symbol(&origin, &symbol.direct_dependencies, &direct)?;
                    closed.push((file.project_path.clone(), internal, name.clone(), None, edges));
                    for (method_name, method) in symbol.methods().into_iter().flatten() {
                        let edges = close_symbol(&origin, &method.direct_dependencies, &direct)?;
                        closed.push((file.project_path.clone(), internal, name.clone(), Some(method_name.clone()), edges));
                    }
                }
            }
        }

        for (path, internal, name, method, edges) in closed {
            let Some(symbol) = self.files.get_mut(&path).and_then(|f| f.scope_mut(internal).get_mut(&name)) else {
                continue;
            };
            let symbol = match &method {
                None => symbol,
                Some(method) => match &mut symbol.kind {
                    SymbolKind::Class { methods, .. } => match methods.get_mut(method) {
                        Some(m) => m,
                        None => continue,
                    },
                    _ => continue,
                },
            };
            symbol.dependencies = edges;
        }
        for file in self.files.values_mut() {
            file.advance(FileState::DependenciesClosed);
        }
        Ok(())
    }

    // ── Pass 3: parent dependencies ──────────────────────────────────────

    fn add_parent_dependencies(&mut self) {
        let mut injected: Vec<(SymbolKey, Edge)> = Vec::new();
        for file in self.files.values().filter(|f| f.state < FileState::ParentDependenciesClosed) {
            for internal in [false, true] {
                for (name, symbol) in file.scope(internal) {
                    for dep in &symbol.dependencies {
                        if dep.edge_type == EdgeType::Unknown || !dep.local || dep.is_reverse() {
                            continue;
                        }
                        let Some(target_path) = &dep.project_path else { continue };
                        let parent = Edge {
                            name: file.export_name.clone(),
                            local: true,
                            project_path: Some(file.project_path.clone()),
                            target: name.clone(),
                            edge_type: symbol.kind().into(),
                            depth: -(dep.depth + 1),
                            internal,
                        };
                        injected.push(((target_path.clone(), dep.target.clone(), dep.internal), parent));
                    }
                }
            }
        }

        for ((path, target, internal), parent) in injected {
            let Some(symbol) = self.files.get_mut(&path).and_then(|f| f.scope_mut(internal).get_mut(&target)) else {
                debug!(path = %path, target = %target, "parent dependency target not found");
                continue;
            };
            merge_edge(&mut symbol.dependencies, parent);
        }
        for file in self.files.values_mut() {
            file.advance(FileState::ParentDependenciesClosed);
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Dependencies of one target grouped by file, `{ path: { name: type } }`.
    pub fn dependency_map(&self, path: &str, target: &TargetRef, query: DependencyQuery) -> GraphResult<DependencyMap> {
        let file = self
            .file(path)
            .ok_or_else(|| GraphError::UnknownFile { path: path.to_string() })?;
        let mut map = DependencyMap::new();
        let Some(symbol) = file.get_target(target) else {
            return Ok(map);
        };
        for edge in &symbol.dependencies {
            if edge.depth < query.min_depth || edge.depth > query.max_depth {
                continue;
            }
            let (Some(kind), Some(dep_path)) = (edge.edge_type.kind(), &edge.project_path) else {
                continue;
            };
            if query.use_filter && self.config.is_filtered(dep_path, &edge.target) {
                continue;
            }
            map.entry(dep_path.clone())
                .or_default()
                .insert(edge.target.clone(), TargetType::new(kind, edge.internal));
        }
        Ok(map)
    }

    /// Libraries the test framework needs that are missing from
    /// `package.json` or from `node_modules`.
    pub fn check_test_framework(&self, framework: TestFramework) -> GraphResult<TestFrameworkReport> {
        let package_path = self.root.join("package.json");
        let text = std::fs::read_to_string(&package_path).map_err(|source| GraphError::Io {
            path: package_path.clone(),
            source,
        })?;
        let package: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|err| {
            warn!(path = %package_path.display(), %err, "package.json is not valid JSON");
            serde_json::Value::Null
        });

        let mut report = TestFrameworkReport::default();
        for lib in framework.required_libs() {
            let declared = ["dependencies", "devDependencies", "peerDependencies"]
                .iter()
                .any(|section| package.get(section).and_then(|s| s.get(*lib)).is_some());
            if !declared {
                report.missing_in_package_json.push(lib.to_string());
            }
            if !self.root.join("node_modules").join(*lib).exists() {
                report.missing_in_node_modules.push(lib.to_string());
            }
        }
        Ok(report)
    }
}

/// Visit every symbol of `file`, class methods included. The flag is the
/// symbol's scope (`internal`).
fn for_each_symbol_mut(file: &mut File, mut f: impl FnMut(&mut Symbol, bool)) {
    for internal in [false, true] {
        for symbol in file.scope_mut(internal).values_mut() {
            f(symbol, internal);
            if let SymbolKind::Class { methods, .. } = &mut symbol.kind {
                for method in methods.values_mut() {
                    f(method, internal);
                }
            }
        }
    }
}

fn follows(edge: &Edge) -> bool {
    edge.local && edge.edge_type == EdgeType::Function && !edge.is_reverse() && edge.project_path.is_some()
}

fn key_of(edge: &Edge) -> Option<SymbolKey> {
    Some((edge.project_path.clone()?, edge.target.clone(), edge.internal))
}

/// Breadth-first walk through local function edges starting at `direct`.
/// Edges found at hop `n` get depth `n`; the origin itself is never added.
fn close_symbol(origin: &SymbolKey, direct: &[Edge], graph: &HashMap<SymbolKey, Vec<Edge>>) -> GraphResult<Vec<Edge>> {
    let mut edges: Vec<Edge> = direct.to_vec();
    let mut visited: HashSet<SymbolKey> = HashSet::from([origin.clone()]);
    let mut frontier: Vec<SymbolKey> = Vec::new();
    for edge in direct.iter().filter(|e| follows(e)) {
        if let Some(key) = key_of(edge) {
            if visited.insert(key.clone()) {
                frontier.push(key);
            }
        }
    }

    let mut hop = 1;
    loop {
        // Leaves never extend the walk.
        frontier.retain(|key| graph.get(key).is_some_and(|sub| sub.iter().any(|e| !e.is_reverse())));
        if frontier.is_empty() {
            break;
        }
        if hop > MAX_CLOSURE_HOPS {
            return Err(GraphError::ClosureDepthExceeded {
                project_path: origin.0.clone(),
                target: origin.1.clone(),
                limit: MAX_CLOSURE_HOPS,
            });
        }
        let mut next = Vec::new();
        for key in &frontier {
            let Some(sub) = graph.get(key) else { continue };
            for edge in sub.iter().filter(|e| !e.is_reverse()) {
                let edge_key = key_of(edge);
                if edge_key.as_ref() == Some(origin) {
                    continue;
                }
                merge_edge(&mut edges, Edge { depth: hop, ..edge.clone() });
                if follows(edge) {
                    if let Some(edge_key) = edge_key {
                        if visited.insert(edge_key.clone()) {
                            next.push(edge_key);
                        }
                    }
                }
            }
        }
        frontier = next;
        hop += 1;
    }
    Ok(edges)
}
