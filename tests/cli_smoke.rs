use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn fixture() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    std::fs::write(root.join("package.json"), r#"{ "name": "smoke" }"#).unwrap();
    std::fs::create_dir_all(root.join("lib")).unwrap();
    std::fs::write(
        root.join("lib/math.js"),
        "module.exports = {\n    add: (a, b) => a + b,\n    double: (x) => self.add(x, x)\n};\n",
    )
    .unwrap();
    tmp
}

fn katana(root: &Path, args: &[&str]) -> Output {
    // `cargo test` sets this for integration tests.
    let bin = env!("CARGO_BIN_EXE_katana");
    Command::new(bin)
        .arg("--root")
        .arg(root)
        .args(args)
        .env("KATANA_LOG", "off")
        .output()
        .expect("spawn katana")
}

#[test]
fn cli_extract_and_targets() {
    let tmp = fixture();

    let out = katana(tmp.path(), &["extract", "lib/math.js", "double", "--with-deps"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("    add: (a, b) => a + b,"));
    assert!(stdout.contains("module.exports = math;"));

    let out = katana(tmp.path(), &["targets", "lib/math.js"]);
    assert!(out.status.success());
    let targets: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let names: Vec<&str> = targets
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
        .collect();
    assert_eq!(names, vec!["add", "double"]);

    let out = katana(tmp.path(), &["target-at", "lib/math.js", "3"]);
    assert!(out.status.success());
    let target: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(target["name"], "double");
    assert_eq!(target["type"], "function");
}

#[test]
fn cli_fails_without_package_json() {
    let tmp = TempDir::new().unwrap();
    let out = katana(tmp.path(), &["files", "index.js"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("package.json"));
}
