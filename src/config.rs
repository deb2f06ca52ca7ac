use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = ".katana.json";

/// How symbol code is scanned for references to imported bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScan {
    /// Identifier references from the syntax tree, scope aware.
    #[default]
    Syntactic,
    /// Substring scan with boundary characters, kept for compatibility.
    Textual,
}

/// Entry of `dependencies_filter`: drop every edge into the file, or only
/// edges to the listed targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyFilter {
    All(bool),
    Targets(Vec<String>),
}

impl DependencyFilter {
    pub fn excludes(&self, target: &str) -> bool {
        match self {
            DependencyFilter::All(all) => *all,
            DependencyFilter::Targets(targets) => targets.iter().any(|t| t == target),
        }
    }
}

/// Default knobs for target extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Emit one block per dependency file before the target's own file.
    pub include_dependencies: bool,
    /// Edges deeper than this are left out (0 = direct references only).
    pub max_depth: i32,
    pub min_depth: i32,
    /// Replace dependency bodies with their parameter list.
    pub only_prototypes: bool,
    /// Never stub the target itself.
    pub only_prototypes_exclude_target_function: bool,
    pub include_js_doc: bool,
    pub exclude_js_doc_targets: Vec<String>,
    /// Code substituted for the target's own body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_function_code_override: Option<String>,
    /// Apply `dependencies_filter` when collecting dependencies.
    pub use_filter: bool,
    /// Prefix every file block with `// <module>.js`.
    pub include_filename: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            include_dependencies: false,
            max_depth: 0,
            min_depth: 0,
            only_prototypes: false,
            only_prototypes_exclude_target_function: false,
            include_js_doc: false,
            exclude_js_doc_targets: vec![],
            target_function_code_override: None,
            use_filter: true,
            include_filename: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `node_modules` package prefixes treated as project code.
    pub include_external_dependencies: Vec<String>,
    /// Glob patterns of project paths that are loaded but never parsed.
    pub disable_parsing_file_list: Vec<String>,
    /// Edges into these files (or targets) are dropped from dependency maps.
    pub dependencies_filter: BTreeMap<String, DependencyFilter>,
    /// Dependency targets that are always emitted as prototypes.
    pub dependencies_only_prototype: BTreeMap<String, Vec<String>>,
    pub dependency_scan: DependencyScan,
    pub extract: ExtractOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_external_dependencies: vec![],
            disable_parsing_file_list: vec![],
            dependencies_filter: BTreeMap::new(),
            dependencies_only_prototype: BTreeMap::new(),
            dependency_scan: DependencyScan::default(),
            extract: ExtractOptions::default(),
        }
    }
}

impl Config {
    pub fn is_filtered(&self, project_path: &str, target: &str) -> bool {
        self.dependencies_filter
            .get(project_path)
            .is_some_and(|f| f.excludes(target))
    }

    pub fn is_only_prototype(&self, project_path: &str, target: &str) -> bool {
        self.dependencies_only_prototype
            .get(project_path)
            .is_some_and(|targets| targets.iter().any(|t| t == target))
    }

    pub fn is_parsing_disabled(&self, project_path: &str) -> bool {
        self.disable_parsing_file_list.iter().any(|pattern| {
            if pattern == project_path {
                return true;
            }
            match glob::Pattern::new(pattern) {
                Ok(p) => p.matches(project_path),
                Err(_) => false,
            }
        })
    }

    /// Whitelisted external package path, if `path` names one.
    pub fn is_external_included(&self, path: &str) -> bool {
        self.include_external_dependencies
            .iter()
            .any(|prefix| path == prefix || path.starts_with(&format!("{prefix}/")))
    }
}

pub fn load_config(project_root: &Path) -> Config {
    let primary = project_root.join(CONFIG_FILE_NAME);

    let text = std::fs::read_to_string(&primary);
    let Ok(text) = text else { return Config::default() };

    serde_json::from_str::<Config>(&text).unwrap_or_else(|err| {
        warn!(path = %primary.display(), %err, "ignoring malformed config");
        Config::default()
    })
}
