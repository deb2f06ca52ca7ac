use std::collections::BTreeMap;
use std::path::Path;

use katana::config::{Config, DependencyFilter, ExtractOptions};
use katana::error::GraphError;
use katana::inspector::parse_tree;
use katana::model::{EdgeType, File, Kind, TargetRef, TargetType};
use katana::project::{DependencyQuery, Project, TestFramework};
use katana::slicer::extract_target;
use tempfile::TempDir;

const MATH: &str = "module.exports = {\n    add: (a, b) => a + b,\n    double: (x) => self.add(x, x)\n};\n";

const DB: &str = r#"const log = require('./log');

module.exports = {
    query: function (sql) {
        log.write(sql);
        return [];
    }
};
"#;

const LOG: &str = r#"module.exports = {
    write: function (msg) {
        return msg;
    }
};
"#;

const USERS: &str = r#"const db = require('./db');

module.exports = {
    list: function () {
        return db.query('select');
    }
};
"#;

fn write_files(root: &Path, files: &[(&str, &str)]) {
    std::fs::write(root.join("package.json"), r#"{ "name": "fixture", "version": "1.0.0" }"#).unwrap();
    for (path, content) in files {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }
}

fn project_with_config(files: &[(&str, &str)], config: Config) -> (TempDir, Project) {
    let tmp = TempDir::new().unwrap();
    write_files(tmp.path(), files);
    let project = Project::new(tmp.path(), config).unwrap();
    (tmp, project)
}

fn project_with(files: &[(&str, &str)]) -> (TempDir, Project) {
    project_with_config(files, Config::default())
}

fn function(name: &str) -> TargetRef {
    TargetRef::new(name, Kind::Function, false)
}

fn with_deps(max_depth: i32) -> ExtractOptions {
    ExtractOptions {
        include_dependencies: true,
        max_depth,
        ..ExtractOptions::default()
    }
}

fn assert_parses(code: &str) {
    let tree = parse_tree(code).unwrap();
    assert!(!tree.root_node().has_error(), "output does not parse:\n{code}");
}

#[test]
fn math_double_pulls_in_add() {
    let (_tmp, mut project) = project_with(&[("lib/math.js", MATH)]);
    let path = project.load("lib/math.js").unwrap();
    assert_eq!(path, "lib/math.js");

    let out = extract_target(&project, &path, &function("double"), &with_deps(0));
    assert_eq!(
        out,
        "// math.js\nconst math = {\n\n    add: (a, b) => a + b,\n\n    double: (x) => self.add(x, x)\n\n};\n\nmodule.exports = math;"
    );
    assert_parses(&out);
}

#[test]
fn prototypes_stub_dependencies_but_keep_target() {
    let (_tmp, mut project) = project_with(&[("lib/math.js", MATH)]);
    let path = project.load("lib/math.js").unwrap();
    let options = ExtractOptions {
        only_prototypes: true,
        only_prototypes_exclude_target_function: true,
        ..with_deps(0)
    };
    let out = extract_target(&project, &path, &function("double"), &options);
    assert!(out.contains("    add: (a, b),"), "{out}");
    assert!(!out.contains("a + b"));
    assert!(out.contains("    double: (x) => self.add(x, x)"));
    assert_parses(&out);
}

#[test]
fn unparseable_file_is_flagged_not_fatal() {
    let broken = "class Broken {\n  run() {\n    return 1;\n";
    let (_tmp, mut project) = project_with(&[("lib/broken.js", broken)]);
    let path = project.load("lib/broken.js").unwrap();
    let file = project.file(&path).unwrap();
    assert!(file.parsing_error);
    assert!(file.function_map().is_empty());
    assert!(file.class_map().is_empty());
    assert!(file.variable_map().is_empty());
    let class = TargetRef::new("Broken", Kind::Class, false);
    assert_eq!(extract_target(&project, &path, &class, &ExtractOptions::default()), "");
}

#[test]
fn every_located_symbol_round_trips() {
    let src = r#"const db = require('./db');

const RETRIES = 3;

function normalize(key) {
    return key.trim();
}

class Cache {
    get(key) {
        return normalize(key);
    }
}

const self = {
    load: function (key) {
        return db.query(normalize(key), RETRIES);
    },
    save(record) {
        return new Cache().get(record);
    },
    TABLE: 'users',
    normalize
};

module.exports = self;
"#;
    let (_tmp, mut project) = project_with(&[("lib/store.js", src), ("lib/db.js", DB), ("lib/log.js", LOG)]);
    let path = project.load("lib/store.js").unwrap();
    let file = project.file(&path).unwrap();
    assert!(!file.parsing_error);

    let options = ExtractOptions {
        include_filename: false,
        ..ExtractOptions::default()
    };
    let mut checked = 0;
    for internal in [false, true] {
        for (name, symbol) in file.scope(internal) {
            assert!(!symbol.external_source, "{name}");
            assert!(file.content.contains(&symbol.code), "{name} is not verbatim");
            let target = TargetRef::new(name.clone(), symbol.kind(), internal);
            let out = extract_target(&project, &path, &target, &options);
            assert!(out.contains(&symbol.code), "{name}: {out}");
            checked += 1;
        }
    }
    assert_eq!(checked, 6);
    assert!(file.symbol(Kind::Function, "normalize", false).is_some());
}

#[test]
fn closure_depths_and_dependency_map_windows() {
    let (_tmp, mut project) = project_with(&[("lib/users.js", USERS), ("lib/db.js", DB), ("lib/log.js", LOG)]);
    let path = project.load("lib/users.js").unwrap();

    let list = project.file(&path).unwrap().get_target(&function("list")).unwrap();
    let depths: Vec<(&str, i32)> = list
        .dependencies
        .iter()
        .map(|e| (e.target.as_str(), e.depth))
        .collect();
    assert_eq!(depths, vec![("query", 0), ("write", 1)]);

    let direct = project.dependency_map(&path, &function("list"), DependencyQuery::default()).unwrap();
    let expected: BTreeMap<String, BTreeMap<String, TargetType>> =
        BTreeMap::from([("lib/db.js".to_string(), BTreeMap::from([("query".to_string(), TargetType::Function)]))]);
    assert_eq!(direct, expected);

    let query = DependencyQuery { min_depth: 1, max_depth: 1, use_filter: true };
    let deep = project.dependency_map(&path, &function("list"), query).unwrap();
    assert_eq!(deep.keys().collect::<Vec<_>>(), vec!["lib/log.js"]);
}

#[test]
fn dependency_filter_applies_only_with_use_filter() {
    let config = Config {
        dependencies_filter: BTreeMap::from([("lib/log.js".to_string(), DependencyFilter::All(true))]),
        ..Config::default()
    };
    let (_tmp, mut project) =
        project_with_config(&[("lib/users.js", USERS), ("lib/db.js", DB), ("lib/log.js", LOG)], config);
    let path = project.load("lib/users.js").unwrap();

    let filtered = DependencyQuery { min_depth: 0, max_depth: 1, use_filter: true };
    let map = project.dependency_map(&path, &function("list"), filtered).unwrap();
    assert!(!map.contains_key("lib/log.js"));

    let unfiltered = DependencyQuery { use_filter: false, ..filtered };
    let map = project.dependency_map(&path, &function("list"), unfiltered).unwrap();
    assert!(map.contains_key("lib/log.js"));
}

#[test]
fn reverse_edges_mirror_forward_edges() {
    let (_tmp, mut project) = project_with(&[("lib/users.js", USERS), ("lib/db.js", DB), ("lib/log.js", LOG)]);
    project.load("lib/users.js").unwrap();

    let mut forward = 0;
    for file in project.files() {
        for internal in [false, true] {
            for (name, symbol) in file.scope(internal) {
                for edge in symbol.dependencies.iter().filter(|e| !e.is_reverse() && e.local) {
                    let target_file = project.file(edge.project_path.as_deref().unwrap()).unwrap();
                    let target = target_file.scope(edge.internal).get(&edge.target).unwrap();
                    let back = target
                        .dependencies
                        .iter()
                        .find(|e| e.is_reverse() && e.project_path.as_deref() == Some(file.project_path.as_str()) && &e.target == name)
                        .unwrap_or_else(|| panic!("no reverse edge {} -> {name}", edge.target));
                    assert_eq!(back.depth, -(edge.depth + 1));
                    forward += 1;
                }
            }
        }
    }
    assert_eq!(forward, 3);

    let write = project.file("lib/log.js").unwrap().get_target(&function("write")).unwrap();
    let parents: Vec<(&str, i32)> = write.dependencies.iter().map(|e| (e.target.as_str(), e.depth)).collect();
    assert!(parents.contains(&("query", -1)));
    assert!(parents.contains(&("list", -2)));
}

#[test]
fn mutual_recursion_terminates_without_duplicates() {
    let a = "const b = require('./b');\n\nmodule.exports = {\n    ping: function (n) {\n        return n > 0 ? b.pong(n - 1) : 0;\n    }\n};\n";
    let b = "const a = require('./a');\n\nmodule.exports = {\n    pong: function (n) {\n        return n > 0 ? a.ping(n - 1) : 0;\n    }\n};\n";
    let (_tmp, mut project) = project_with(&[("lib/a.js", a), ("lib/b.js", b)]);
    project.load("lib/a.js").unwrap();

    for (path, name, other) in [("lib/a.js", "ping", "pong"), ("lib/b.js", "pong", "ping")] {
        let symbol = project.file(path).unwrap().get_target(&function(name)).unwrap();
        let forward: Vec<_> = symbol.dependencies.iter().filter(|e| !e.is_reverse()).collect();
        assert_eq!(forward.len(), 1, "{name}: {:?}", symbol.dependencies);
        assert_eq!(forward[0].target, other);
        assert_eq!(forward[0].depth, 0);
        assert!(symbol.dependencies.iter().all(|e| e.target != name));
        assert_eq!(symbol.dependencies.len(), 2);
    }
}

#[test]
fn internal_helpers_make_the_extract_self_contained() {
    let calc = r#"const FACTOR = 2;

function scale(x) {
    return x * FACTOR;
}

module.exports = {
    run: function (x) {
        return scale(x) + 1;
    }
};
"#;
    let (_tmp, mut project) = project_with(&[("lib/calc.js", calc)]);
    let path = project.load("lib/calc.js").unwrap();
    let out = extract_target(&project, &path, &function("run"), &with_deps(1));

    let factor = out.find("let FACTOR = 2").expect("FACTOR");
    let scale = out.find("function scale(x)").expect("scale");
    let surface = out.find("const calc = {").expect("export object");
    assert!(factor < scale && scale < surface, "{out}");
    assert!(out.ends_with("module.exports = calc;"));
    assert_parses(&out);

    // Depth 0 only reaches the helper, not what the helper uses.
    let shallow = extract_target(&project, &path, &function("run"), &with_deps(0));
    assert!(shallow.contains("function scale(x)"));
    assert!(!shallow.contains("FACTOR = 2"));
}

#[test]
fn dependency_files_come_before_the_target_file() {
    let (_tmp, mut project) = project_with(&[("lib/users.js", USERS), ("lib/db.js", DB), ("lib/log.js", LOG)]);
    let path = project.load("lib/users.js").unwrap();
    let out = extract_target(&project, &path, &function("list"), &with_deps(1));

    let db = out.find("// db.js").expect("db block");
    let log = out.find("// log.js").expect("log block");
    let users = out.find("// users.js").expect("own block");
    assert!(db < users && log < users);
    assert!(out.contains("const db = {"));
    assert!(out.trim_end().ends_with("module.exports = users;"));
    assert_parses(&out);
}

#[test]
fn imports_resolve_through_three_fallbacks() {
    let main = "const util = require('./lib/util');\nconst helpers = require('./helpers');\n\nmodule.exports = function () {\n    return helpers.wrap(util.id(1));\n};\n";
    let util = "module.exports = {\n    id: function (x) {\n        return x;\n    }\n};\n";
    let helpers = "module.exports = {\n    wrap: function (x) {\n        return [x];\n    }\n};\n";
    let (_tmp, mut project) = project_with(&[
        ("main.js", main),
        ("lib/util.js", util),
        ("helpers/index.js", helpers),
    ]);
    project.load("main.js").unwrap();

    let helpers_file = project.file("helpers").expect("index.js fallback");
    assert_eq!(helpers_file.project_path, "helpers/index.js");
    assert_eq!(helpers_file.module_name, "helpers");
    assert!(helpers_file.requested_paths.contains(&"helpers".to_string()));
    assert_eq!(project.file("lib/util").unwrap().project_path, "lib/util.js");

    let main_file = project.file("main.js").unwrap();
    let libs: Vec<Option<&str>> = main_file.libs.iter().map(|l| l.project_path.as_deref()).collect();
    assert_eq!(libs, vec![Some("lib/util.js"), Some("helpers/index.js")]);

    let run = main_file.get_target(&function(".")).unwrap();
    let targets: Vec<(&str, &str)> = run
        .dependencies
        .iter()
        .map(|e| (e.project_path.as_deref().unwrap(), e.target.as_str()))
        .collect();
    assert!(targets.contains(&("helpers/index.js", "wrap")));
    assert!(targets.contains(&("lib/util.js", "id")));
}

#[test]
fn unresolvable_import_aborts_the_load() {
    let main = "const gone = require('./missing');\nmodule.exports = { run: function () { return gone.x(); } };\n";
    let (_tmp, mut project) = project_with(&[("main.js", main)]);
    match project.load("main.js") {
        Err(GraphError::UnresolvedImport { path, tried }) => {
            assert_eq!(path, "missing");
            assert_eq!(tried, vec!["missing", "missing.js", "missing/index.js"]);
        }
        other => panic!("expected unresolved import, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn project_requires_package_json() {
    let tmp = TempDir::new().unwrap();
    let err = Project::new(tmp.path(), Config::default()).err().expect("missing package.json");
    assert!(matches!(err, GraphError::MissingPackageJson { .. }));
}

#[test]
fn edge_types_are_resolved_against_the_target_file() {
    let strings = "module.exports = {\n    format: function (s) {\n        return s.trim();\n    }\n};\n";
    let repo = "class Repo {\n    all() {\n        return [];\n    }\n}\n\nmodule.exports = Repo;\n";
    let app = r#"const { format } = require('./strings');
const Repo = require('./repo');

module.exports = {
    names: function (list) {
        return list.map(format);
    },
    open: function () {
        return new Repo();
    }
};
"#;
    let (_tmp, mut project) = project_with(&[("app.js", app), ("strings.js", strings), ("repo.js", repo)]);
    let path = project.load("app.js").unwrap();
    let file = project.file(&path).unwrap();

    let names = file.get_target(&function("names")).unwrap();
    assert_eq!(names.dependencies[0].target, "format");
    assert_eq!(names.dependencies[0].edge_type, EdgeType::Function);

    let open = file.get_target(&function("open")).unwrap();
    assert_eq!(open.dependencies[0].target, "Repo");
    assert_eq!(open.dependencies[0].edge_type, EdgeType::Class);

    let repo_class = project
        .file("repo.js")
        .unwrap()
        .get_target(&TargetRef::new("Repo", Kind::Class, false))
        .unwrap();
    assert!(repo_class.dependencies.iter().any(|e| e.is_reverse() && e.target == "open"));
}

#[test]
fn target_at_line_maps_editor_lines() {
    let repo = "const db = require('./db');\n\nclass Repo {\n    constructor() {\n        this.rows = [];\n    }\n\n    all() {\n        return db.query('*');\n    }\n}\n\nmodule.exports = Repo;\n";
    let (_tmp, mut project) = project_with(&[("repo.js", repo), ("db.js", DB), ("log.js", LOG)]);
    let path = project.load("repo.js").unwrap();
    let file: &File = project.file(&path).unwrap();

    let target = file.target_at_line(8).expect("line inside all()");
    assert_eq!(target.name, "Repo");
    assert_eq!(target.method.as_deref(), Some("all"));
    assert!(file.target_at_line(0).is_none());

    let extract = file.target_extract(&target).unwrap();
    assert_eq!(extract.start, 7);
    assert!(extract.content.contains("return db.query('*');"));

    let all = file.get_target(&target).unwrap();
    assert!(all.dependencies.iter().any(|e| e.target == "query" && e.project_path.as_deref() == Some("db.js")));
}

#[test]
fn disabled_files_are_loaded_but_not_parsed() {
    let config = Config {
        disable_parsing_file_list: vec!["vendor/*.js".to_string()],
        ..Config::default()
    };
    let main = "const big = require('./vendor/big');\nmodule.exports = { run: function () { return big.go(); } };\n";
    let big = "module.exports = { go: function () { return 1; } };\n";
    let (_tmp, mut project) = project_with_config(&[("main.js", main), ("vendor/big.js", big)], config);
    project.load("main.js").unwrap();

    let vendor = project.file("vendor/big.js").unwrap();
    assert!(vendor.parsing_disabled);
    assert!(vendor.exports.is_empty());
    assert!(project.file("main.js").unwrap().is_parsed());
}

#[test]
fn test_framework_requirements() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("package.json"),
        r#"{ "name": "fixture", "devDependencies": { "jest": "^29.0.0", "chai": "^4.0.0" } }"#,
    )
    .unwrap();
    std::fs::create_dir_all(tmp.path().join("node_modules/jest")).unwrap();
    let project = Project::new(tmp.path(), Config::default()).unwrap();

    assert!(project.check_test_framework(TestFramework::Jest).unwrap().is_ready());

    let mocha = project.check_test_framework(TestFramework::Mocha).unwrap();
    assert_eq!(mocha.missing_in_package_json, vec!["sinon", "sinon-chai"]);
    assert_eq!(mocha.missing_in_node_modules, vec!["sinon", "sinon-chai", "chai"]);
}

const REPO: &str = "class Repo {\n    static create() {\n        return new Repo();\n    }\n\n    all() {\n        return [];\n    }\n}\n\nmodule.exports = Repo;\n";

#[test]
fn static_call_on_class_export_pulls_in_the_class() {
    let app = "const Repo = require('./repo');\n\nmodule.exports = {\n    make() {\n        return Repo.create();\n    }\n};\n";
    let (_tmp, mut project) = project_with(&[("app.js", app), ("repo.js", REPO)]);
    let path = project.load("app.js").unwrap();

    let query = DependencyQuery {
        max_depth: 1,
        ..DependencyQuery::default()
    };
    let map = project.dependency_map(&path, &function("make"), query).unwrap();
    let expected = BTreeMap::from([("Repo".to_string(), TargetType::new(Kind::Class, false))]);
    assert_eq!(map.get("repo.js"), Some(&expected));

    let out = extract_target(&project, &path, &function("make"), &with_deps(1));
    let repo = out.find("// repo.js").expect("repo block");
    let app_block = out.find("// app.js").expect("own block");
    assert!(repo < app_block);
    assert!(out.contains("const Repo = class Repo {"), "{out}");
    assert!(out.contains("static create()"));
    assert!(out.contains("module.exports = Repo;"));
    assert_parses(&out);
}

#[test]
fn helper_named_like_require_stays_an_internal() {
    let guard = r#"const cfg = require('./cfg');

const requireAuth = (user) => user.ok;

module.exports = {
    run(u) {
        return cfg.enabled && requireAuth(u);
    }
};
"#;
    let cfg = "module.exports = {\n    enabled: true\n};\n";
    let (_tmp, mut project) = project_with(&[("guard.js", guard), ("cfg.js", cfg)]);
    let path = project.load("guard.js").unwrap();
    let file = project.file(&path).unwrap();
    assert!(file.symbol(Kind::Function, "requireAuth", true).is_some());
    assert!(file.symbol(Kind::Variable, "cfg", true).is_none());

    let out = extract_target(&project, &path, &function("run"), &with_deps(1));
    let helper = out.find("let requireAuth = (user) => user.ok").expect("helper declaration");
    let surface = out.find("const guard = {").expect("export object");
    assert!(helper < surface, "{out}");
    assert_parses(&out);
}

#[test]
fn code_override_replaces_only_the_target() {
    let (_tmp, mut project) = project_with(&[("lib/math.js", MATH)]);
    let path = project.load("lib/math.js").unwrap();
    let options = ExtractOptions {
        target_function_code_override: Some("(x) => x * 2".to_string()),
        ..with_deps(0)
    };
    let out = extract_target(&project, &path, &function("double"), &options);
    assert!(out.contains("    double: (x) => x * 2"), "{out}");
    assert!(!out.contains("self.add(x, x)"));
    assert!(out.contains("    add: (a, b) => a + b,"));
    assert_parses(&out);
}

#[test]
fn js_doc_is_emitted_unless_excluded() {
    let documented = r#"module.exports = {
    /**
     * Sum of two numbers.
     */
    add: (a, b) => a + b,
    /** Twice x. */
    double: (x) => self.add(x, x)
};
"#;
    let (_tmp, mut project) = project_with(&[("lib/math.js", documented)]);
    let path = project.load("lib/math.js").unwrap();

    let plain = extract_target(&project, &path, &function("double"), &with_deps(0));
    assert!(!plain.contains("Sum of two numbers"));
    assert!(!plain.contains("Twice x"));

    let options = ExtractOptions {
        include_js_doc: true,
        ..with_deps(0)
    };
    let out = extract_target(&project, &path, &function("double"), &options);
    assert!(out.contains("     * Sum of two numbers.\n     */\n    add: (a, b) => a + b"), "{out}");
    assert!(out.contains("/** Twice x. */\n    double:"));
    assert_parses(&out);

    let options = ExtractOptions {
        include_js_doc: true,
        exclude_js_doc_targets: vec!["add".to_string()],
        ..with_deps(0)
    };
    let out = extract_target(&project, &path, &function("double"), &options);
    assert!(!out.contains("Sum of two numbers"), "{out}");
    assert!(out.contains("/** Twice x. */"));
}

#[test]
fn configured_prototype_targets_are_stubbed() {
    let config = Config {
        dependencies_only_prototype: BTreeMap::from([("lib/math.js".to_string(), vec!["add".to_string()])]),
        ..Config::default()
    };
    let (_tmp, mut project) = project_with_config(&[("lib/math.js", MATH)], config);
    let path = project.load("lib/math.js").unwrap();
    let out = extract_target(&project, &path, &function("double"), &with_deps(0));
    assert!(out.contains("    add: (a, b),"), "{out}");
    assert!(!out.contains("a + b"));
    assert!(out.contains("    double: (x) => self.add(x, x)"));
    assert_parses(&out);
}

#[test]
fn code_missing_from_its_file_is_emitted_as_prototype() {
    let app = "const Repo = require('./repo');\n\nmodule.exports = {\n    open: function () {\n        return new Repo();\n    }\n};\n";
    let (_tmp, mut project) = project_with(&[("lib/math.js", MATH), ("app.js", app), ("repo.js", REPO)]);
    let math = project.load("lib/math.js").unwrap();
    let app_path = project.load("app.js").unwrap();

    // Edit the in-memory text so the parsed code no longer matches it.
    project
        .file_mut(&math)
        .unwrap()
        .replace_lines(1, 1, "    add: (a, b) => b + a,");
    project
        .file_mut("repo.js")
        .unwrap()
        .replace_lines(6, 6, "        return null;");

    let out = extract_target(&project, &math, &function("double"), &with_deps(0));
    assert!(out.contains("    add: (a, b),"), "{out}");
    assert!(!out.contains("a + b") && !out.contains("b + a"));

    let out = extract_target(&project, &app_path, &function("open"), &with_deps(0));
    assert!(out.contains("const Repo = class Repo {\n    all() {}\n    create() {}\n};"), "{out}");
    assert!(!out.contains("return [];"));
    assert_parses(&out);
}

#[test]
fn file_edits_are_saved_back() {
    let (tmp, mut project) = project_with(&[("lib/math.js", MATH)]);
    let path = project.load("lib/math.js").unwrap();
    let file = project.file_mut(&path).unwrap();

    file.insert_before_line(1, "// adds\n// two", true);
    assert_eq!(file.lines(1, 2), "    // adds\n    // two");
    file.replace_lines(1, 2, "    // sum");
    file.save().unwrap();

    let on_disk = std::fs::read_to_string(tmp.path().join("lib/math.js")).unwrap();
    assert_eq!(on_disk, MATH.replacen("{\n", "{\n    // sum\n", 1));
}
