//! Graph views of a loaded project: one node per symbol with its forward
//! edges, and a file-level rollup weighted by symbol edges.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::model::{EdgeType, File, LineRange, Symbol, TargetType};
use crate::project::Project;
use crate::slicer::estimate_tokens_from_bytes;

#[derive(Debug, Clone, Serialize)]
pub struct MapNode {
    pub id: String,
    pub label: String,
    pub path: String,
    pub kind: TargetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineRange>,
    pub signature: String,
    pub bytes: u64,
    pub est_tokens: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeType,
    pub depth: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolGraph {
    pub label: String,
    pub nodes: Vec<MapNode>,
    pub edges: Vec<MapEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleNode {
    pub id: String,
    pub label: String,
    pub path: String,
    pub symbol_count: u64,
    pub bytes: u64,
    pub est_tokens: u64,
    pub parsing_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub weight: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleGraph {
    pub label: String,
    pub nodes: Vec<ModuleNode>,
    pub edges: Vec<ModuleEdge>,
}

fn read_package_json_name(package_json: &Path) -> Option<String> {
    let text = std::fs::read_to_string(package_json).ok()?;
    let v: serde_json::Value = serde_json::from_str(&text).ok()?;
    v.get("name")
        .and_then(|n| n.as_str())
        .map(|s| s.to_string())
}

fn label_or_unnamed(name: &str) -> String {
    if name.is_empty() {
        return "(unnamed)".to_string();
    }
    name.to_string()
}

fn project_label(project: &Project) -> String {
    let root = project.root();
    let name = read_package_json_name(&root.join("package.json")).unwrap_or_else(|| {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    label_or_unnamed(&name)
}

fn node_id(project_path: &str, name: &str, internal: bool) -> String {
    if internal {
        format!("{project_path}#~{name}")
    } else {
        format!("{project_path}#{name}")
    }
}

/// First code line with the body brace dropped, capped for display.
fn first_line_signature(code: &str) -> String {
    let line = code.lines().next().unwrap_or("").trim();
    let line = line.strip_suffix('{').unwrap_or(line).trim_end();
    if line.chars().count() > 120 {
        let cut: String = line.chars().take(117).collect();
        return format!("{cut}...");
    }
    line.to_string()
}

fn symbol_nodes<'f>(file: &'f File) -> impl Iterator<Item = (&'f Symbol, bool)> {
    file.exports
        .values()
        .map(|s| (s, false))
        .chain(file.internals.values().map(|s| (s, true)))
}

/// Symbol-level graph. Only forward edges with `depth <= max_depth` whose
/// target is a loaded symbol are kept.
pub fn build_symbol_graph(project: &Project, max_depth: i32) -> SymbolGraph {
    let mut nodes = Vec::new();
    let mut ids = BTreeSet::new();
    for file in project.files() {
        for (symbol, internal) in symbol_nodes(file) {
            let id = node_id(&file.project_path, &symbol.name, internal);
            let bytes = symbol.code.len() as u64;
            let label = if symbol.name == crate::inspector::MAIN_EXPORT {
                file.export_name.clone()
            } else {
                symbol.name.clone()
            };
            ids.insert(id.clone());
            nodes.push(MapNode {
                id,
                label,
                path: file.project_path.clone(),
                kind: TargetType::new(symbol.kind(), internal),
                lines: symbol.line_range,
                signature: first_line_signature(&symbol.code),
                bytes,
                est_tokens: estimate_tokens_from_bytes(bytes, 4) as u64,
            });
        }
    }

    let mut edges = Vec::new();
    for file in project.files() {
        for (symbol, internal) in symbol_nodes(file) {
            let source = node_id(&file.project_path, &symbol.name, internal);
            for dep in symbol.dependencies.iter().filter(|d| !d.is_reverse() && d.depth <= max_depth) {
                let Some(path) = &dep.project_path else { continue };
                let target = node_id(path, &dep.target, dep.internal);
                if !ids.contains(&target) {
                    continue;
                }
                edges.push(MapEdge {
                    id: format!("{source}->{target}"),
                    source: source.clone(),
                    target,
                    kind: dep.edge_type,
                    depth: dep.depth,
                });
            }
        }
    }

    SymbolGraph {
        label: project_label(project),
        nodes,
        edges,
    }
}

/// File-level graph: an edge per pair of files, weighted by the number of
/// direct symbol edges between them.
pub fn build_module_graph(project: &Project) -> ModuleGraph {
    let mut nodes = Vec::new();
    let mut weights: BTreeMap<(String, String), u64> = BTreeMap::new();
    for file in project.files() {
        let bytes = file.content.len() as u64;
        nodes.push(ModuleNode {
            id: file.project_path.clone(),
            label: label_or_unnamed(&file.module_name),
            path: file.project_path.clone(),
            symbol_count: (file.exports.len() + file.internals.len()) as u64,
            bytes,
            est_tokens: estimate_tokens_from_bytes(bytes, 4) as u64,
            parsing_error: file.parsing_error,
        });
        for (symbol, _) in symbol_nodes(file) {
            for dep in symbol.dependencies.iter().filter(|d| d.depth == 0) {
                let Some(path) = &dep.project_path else { continue };
                if path == &file.project_path || project.file(path).is_none() {
                    continue;
                }
                *weights.entry((file.project_path.clone(), path.clone())).or_default() += 1;
            }
        }
    }

    let edges = weights
        .into_iter()
        .map(|((source, target), weight)| ModuleEdge {
            id: format!("{source}->{target}"),
            source,
            target,
            weight,
        })
        .collect();

    ModuleGraph {
        label: project_label(project),
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_drops_body() {
        assert_eq!(first_line_signature("function add(a, b) {\n  return a + b;\n}"), "function add(a, b)");
        assert_eq!(first_line_signature("(x) => x * 2"), "(x) => x * 2");
        let long = format!("function f({}) {{}}", "a, ".repeat(60));
        assert!(first_line_signature(&long).ends_with("..."));
    }

    #[test]
    fn internal_ids_are_distinct() {
        assert_ne!(node_id("a.js", "x", true), node_id("a.js", "x", false));
        assert_eq!(label_or_unnamed(""), "(unnamed)");
    }
}
