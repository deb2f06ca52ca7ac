//! Import extraction: top-level `require(...)` declarators and ES `import`
//! statements become [`Lib`] descriptors.

use tree_sitter::Node;

use crate::config::Config;
use crate::inspector::{node_text, strip_string_quotes};
use crate::model::{Lib, LibBinding, NamedImport};

/// `path.join(dirname(reference), relative)` with `.`/`..` folded.
pub fn recompute_path(relative: &str, reference: &str) -> String {
    let mut parts: Vec<&str> = reference.split('/').collect();
    parts.pop();
    parts.retain(|p| !p.is_empty() && *p != ".");
    for seg in relative.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('.')
}

struct LibBuilder<'a> {
    project_path: &'a str,
    config: &'a Config,
    next_placeholder: usize,
    libs: Vec<Lib>,
}

impl LibBuilder<'_> {
    fn push(&mut self, binding: LibBinding, path: String) {
        let mut local = is_local_path(&path);
        let mut external = false;
        let project_path = if local {
            Some(recompute_path(&path, self.project_path))
        } else if self.config.is_external_included(&path) {
            local = true;
            external = true;
            Some(format!("node_modules/{path}"))
        } else {
            None
        };
        let path_placeholder = format!("LIB_{}", self.next_placeholder);
        self.next_placeholder += 1;
        self.libs.push(Lib {
            binding,
            path,
            project_path,
            local,
            external,
            path_placeholder,
        });
    }
}

/// `require('x')` call with a single string argument -> `x`.
pub(crate) fn require_path(source: &[u8], node: Node) -> Option<String> {
    if node.kind() != "call_expression" {
        return None;
    }
    let callee = node.child_by_field_name("function")?;
    if callee.kind() != "identifier" || node_text(source, callee) != "require" {
        return None;
    }
    let args = node.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    if first.kind() != "string" {
        return None;
    }
    Some(strip_string_quotes(node_text(source, first)).to_string())
}

fn object_pattern_imports(source: &[u8], pattern: Node) -> Vec<NamedImport> {
    let mut out = Vec::new();
    let mut cursor = pattern.walk();
    for prop in pattern.named_children(&mut cursor) {
        match prop.kind() {
            "shorthand_property_identifier_pattern" => {
                let name = node_text(source, prop).to_string();
                out.push(NamedImport { local: name.clone(), imported: name });
            }
            "pair_pattern" => {
                let (Some(key), Some(value)) = (prop.child_by_field_name("key"), prop.child_by_field_name("value")) else {
                    continue;
                };
                let local = match value.kind() {
                    "identifier" => value,
                    "assignment_pattern" => match value.child_by_field_name("left") {
                        Some(left) if left.kind() == "identifier" => left,
                        _ => continue,
                    },
                    _ => continue,
                };
                out.push(NamedImport {
                    local: node_text(source, local).to_string(),
                    imported: strip_string_quotes(node_text(source, key)).to_string(),
                });
            }
            "object_assignment_pattern" => {
                if let Some(left) = prop.child_by_field_name("left") {
                    let name = node_text(source, left).to_string();
                    out.push(NamedImport { local: name.clone(), imported: name });
                }
            }
            _ => {}
        }
    }
    out
}

fn declaration_libs(source: &[u8], decl: Node, builder: &mut LibBuilder) {
    let mut cursor = decl.walk();
    for declarator in decl.named_children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let (Some(name), Some(value)) = (
            declarator.child_by_field_name("name"),
            declarator.child_by_field_name("value"),
        ) else {
            continue;
        };
        let Some(path) = require_path(source, value) else { continue };
        match name.kind() {
            "identifier" => builder.push(
                LibBinding::Module { name: node_text(source, name).to_string() },
                path,
            ),
            "object_pattern" => builder.push(
                LibBinding::Named { imports: object_pattern_imports(source, name) },
                path,
            ),
            _ => {}
        }
    }
}

fn import_statement_libs(source: &[u8], stmt: Node, builder: &mut LibBuilder) {
    let Some(src) = stmt.child_by_field_name("source") else { return };
    let path = strip_string_quotes(node_text(source, src)).to_string();

    let mut cursor = stmt.walk();
    let Some(clause) = stmt.named_children(&mut cursor).find(|c| c.kind() == "import_clause") else {
        return;
    };

    let mut clause_cursor = clause.walk();
    for part in clause.named_children(&mut clause_cursor) {
        match part.kind() {
            "identifier" => builder.push(
                LibBinding::Module { name: node_text(source, part).to_string() },
                path.clone(),
            ),
            "namespace_import" => {
                let mut c = part.walk();
                let id = part.named_children(&mut c).find(|n| n.kind() == "identifier");
                if let Some(id) = id {
                    builder.push(LibBinding::Module { name: node_text(source, id).to_string() }, path.clone());
                }
            }
            "named_imports" => {
                let mut imports = Vec::new();
                let mut c = part.walk();
                for spec in part.named_children(&mut c) {
                    if spec.kind() != "import_specifier" {
                        continue;
                    }
                    let Some(name) = spec.child_by_field_name("name") else { continue };
                    let imported = strip_string_quotes(node_text(source, name)).to_string();
                    let local = spec
                        .child_by_field_name("alias")
                        .map(|a| node_text(source, a).to_string())
                        .unwrap_or_else(|| imported.clone());
                    imports.push(NamedImport { local, imported });
                }
                builder.push(LibBinding::Named { imports }, path.clone());
            }
            _ => {}
        }
    }
}

/// Collect the import descriptors of a module from its top-level statements.
pub fn extract_libs(source: &[u8], root: Node, project_path: &str, config: &Config) -> Vec<Lib> {
    let mut builder = LibBuilder {
        project_path,
        config,
        next_placeholder: 0,
        libs: Vec::new(),
    };
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        match stmt.kind() {
            "lexical_declaration" | "variable_declaration" => declaration_libs(source, stmt, &mut builder),
            "import_statement" => import_statement_libs(source, stmt, &mut builder),
            _ => {}
        }
    }
    builder.libs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::parse_tree;

    fn libs_of(src: &str, config: &Config) -> Vec<Lib> {
        let tree = parse_tree(src).unwrap();
        extract_libs(src.as_bytes(), tree.root_node(), "lib/services/user.js", config)
    }

    #[test]
    fn recompute_folds_parent_segments() {
        assert_eq!(recompute_path("./db", "lib/services/user.js"), "lib/services/db");
        assert_eq!(recompute_path("../utils/log.js", "lib/services/user.js"), "lib/utils/log.js");
        assert_eq!(recompute_path("./x", "index.js"), "x");
    }

    #[test]
    fn require_forms() {
        let src = r#"
const db = require('./db'),
    { format, parse: parseDate } = require("../utils/dates");
const fs = require('fs');
let notRequire = load('./x');
"#;
        let libs = libs_of(src, &Config::default());
        assert_eq!(libs.len(), 3);

        assert_eq!(libs[0].binding, LibBinding::Module { name: "db".into() });
        assert_eq!(libs[0].project_path.as_deref(), Some("lib/services/db"));
        assert!(libs[0].local);
        assert_eq!(libs[0].path_placeholder, "LIB_0");

        let LibBinding::Named { imports } = &libs[1].binding else { panic!("named") };
        assert_eq!(imports[0], NamedImport { local: "format".into(), imported: "format".into() });
        assert_eq!(imports[1], NamedImport { local: "parseDate".into(), imported: "parse".into() });
        assert_eq!(libs[1].project_path.as_deref(), Some("lib/utils/dates"));

        assert!(!libs[2].local);
        assert_eq!(libs[2].project_path, None);
    }

    #[test]
    fn es_imports() {
        let src = r#"
import Model, { save as persist } from './model.js';
import * as log from '../log';
import './side-effect';
"#;
        let libs = libs_of(src, &Config::default());
        assert_eq!(libs.len(), 3);
        assert_eq!(libs[0].bound_names(), vec!["Model"]);
        assert_eq!(libs[1].bound_names(), vec!["persist"]);
        assert_eq!(libs[2].bound_names(), vec!["log"]);
        assert_eq!(libs[2].project_path.as_deref(), Some("lib/log"));
    }

    #[test]
    fn whitelisted_external_is_local() {
        let cfg = Config {
            include_external_dependencies: vec!["@acme/core".into()],
            ..Config::default()
        };
        let libs = libs_of("const core = require('@acme/core/lib/io');", &cfg);
        assert!(libs[0].local);
        assert!(libs[0].external);
        assert_eq!(libs[0].project_path.as_deref(), Some("node_modules/@acme/core/lib/io"));
    }
}
