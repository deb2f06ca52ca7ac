use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use katana::config::{load_config, Config};
use katana::inspector::MAIN_EXPORT;
use katana::logging::init_logging;
use katana::mapper::{build_module_graph, build_symbol_graph};
use katana::model::{File, Kind, TargetRef};
use katana::project::{DependencyQuery, Project, TestFramework};
use katana::slicer::extract_target_with_meta;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "katana")]
#[command(version)]
#[command(about = "Dependency graph and standalone target extraction for JavaScript projects")]
struct Cli {
    /// Project root (must contain package.json)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Args)]
struct TargetArgs {
    /// Project-relative file path
    file: String,

    /// Symbol name; `Class.method` selects a class method
    name: String,

    /// function, class or variable (looked up by name when omitted)
    #[arg(long)]
    kind: Option<Kind>,

    /// Target is module-private
    #[arg(long)]
    internal: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load FILE and print its parsed model as JSON
    Inspect { file: String },

    /// Load ENTRY and list every loaded project path
    Files { entry: String },

    /// List the extractable targets of FILE
    Targets { file: String },

    /// Target under a 1-based editor line
    TargetAt { file: String, line: usize },

    /// Dependency map of one target, grouped by file
    Deps {
        #[command(flatten)]
        target: TargetArgs,

        #[arg(long, default_value_t = 0)]
        min_depth: i32,

        #[arg(long, default_value_t = 0)]
        max_depth: i32,

        /// Ignore `dependencies_filter`
        #[arg(long)]
        no_filter: bool,
    },

    /// Print a standalone reconstruction of one target
    Extract {
        #[command(flatten)]
        target: TargetArgs,

        /// Include the target's dependency files
        #[arg(long)]
        with_deps: bool,

        #[arg(long)]
        max_depth: Option<i32>,

        #[arg(long)]
        min_depth: Option<i32>,

        /// Replace dependency bodies with their parameter lists
        #[arg(long)]
        prototypes: bool,

        /// Keep the target's own body in prototype mode
        #[arg(long)]
        keep_target_body: bool,

        #[arg(long)]
        js_doc: bool,

        /// Targets whose JSDoc is left out
        #[arg(long, num_args = 1.., value_name = "NAME")]
        exclude_js_doc: Vec<String>,

        /// File whose content replaces the target's code
        #[arg(long = "override", value_name = "FILE")]
        override_file: Option<PathBuf>,

        /// Omit the `// <module>.js` header
        #[arg(long)]
        no_filename: bool,
    },

    /// Symbol dependency graph of everything ENTRY reaches
    Graph {
        entry: String,

        /// File-level rollup instead of symbols
        #[arg(long)]
        modules: bool,

        #[arg(long, default_value_t = 0)]
        max_depth: i32,
    },

    /// Check package.json and node_modules for the test framework libraries
    CheckTestFramework {
        #[arg(default_value = "jest")]
        framework: TestFramework,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_project(root: &Path) -> Result<(Project, Config)> {
    let config = load_config(root);
    let project = Project::new(root, config.clone())?;
    Ok((project, config))
}

fn load_with_spinner(project: &mut Project, entry: &str) -> Result<String> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .context("Invalid spinner template")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(format!("loading {entry}..."));
    let loaded = project.get_or_load(entry).map(|f| f.project_path.clone());
    spinner.finish_and_clear();
    loaded.with_context(|| format!("Failed to load {entry}"))
}

fn loaded_file<'p>(project: &'p Project, project_path: &str) -> Result<&'p File> {
    project
        .file(project_path)
        .with_context(|| format!("File not loaded: {project_path}"))
}

fn resolve_target(file: &File, args: &TargetArgs) -> Result<TargetRef> {
    let (name, method) = match args.name.split_once('.') {
        Some((class, method)) if args.name != MAIN_EXPORT && !class.is_empty() => (class, Some(method)),
        _ => (args.name.as_str(), None),
    };
    let mut target = match args.kind {
        Some(kind) => TargetRef::new(name, kind, args.internal),
        None => file
            .find_target(name)
            .with_context(|| format!("No target named '{name}' in {}", file.project_path))?,
    };
    if let Some(method) = method {
        target.kind = Kind::Class;
        target.method = Some(method.to_string());
    }
    Ok(target)
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Inspect { file } => {
            let (mut project, _) = open_project(&cli.root)?;
            let path = load_with_spinner(&mut project, &file)?;
            print_json(loaded_file(&project, &path)?)
        }
        Command::Files { entry } => {
            let (mut project, _) = open_project(&cli.root)?;
            load_with_spinner(&mut project, &entry)?;
            for file in project.files() {
                println!("{}", file.project_path);
            }
            Ok(())
        }
        Command::Targets { file } => {
            let (mut project, _) = open_project(&cli.root)?;
            let path = load_with_spinner(&mut project, &file)?;
            print_json(&loaded_file(&project, &path)?.all_targets())
        }
        Command::TargetAt { file, line } => {
            if line == 0 {
                bail!("Line numbers start at 1");
            }
            let (mut project, _) = open_project(&cli.root)?;
            let path = load_with_spinner(&mut project, &file)?;
            print_json(&loaded_file(&project, &path)?.target_at_line(line - 1))
        }
        Command::Deps {
            target,
            min_depth,
            max_depth,
            no_filter,
        } => {
            let (mut project, _) = open_project(&cli.root)?;
            let path = load_with_spinner(&mut project, &target.file)?;
            let target_ref = resolve_target(loaded_file(&project, &path)?, &target)?;
            let query = DependencyQuery {
                min_depth,
                max_depth,
                use_filter: !no_filter,
            };
            print_json(&project.dependency_map(&path, &target_ref, query)?)
        }
        Command::Extract {
            target,
            with_deps,
            max_depth,
            min_depth,
            prototypes,
            keep_target_body,
            js_doc,
            exclude_js_doc,
            override_file,
            no_filename,
        } => {
            let (mut project, config) = open_project(&cli.root)?;
            let path = load_with_spinner(&mut project, &target.file)?;
            let target_ref = resolve_target(loaded_file(&project, &path)?, &target)?;

            let mut options = config.extract.clone();
            options.include_dependencies |= with_deps;
            options.max_depth = max_depth.unwrap_or(options.max_depth);
            options.min_depth = min_depth.unwrap_or(options.min_depth);
            options.only_prototypes |= prototypes;
            options.only_prototypes_exclude_target_function |= keep_target_body;
            options.include_js_doc |= js_doc;
            options.exclude_js_doc_targets.extend(exclude_js_doc);
            if no_filename {
                options.include_filename = false;
            }
            if let Some(override_path) = override_file {
                let code = std::fs::read_to_string(&override_path)
                    .with_context(|| format!("Failed to read {}", override_path.display()))?;
                options.target_function_code_override = Some(code);
            }

            let (code, meta) = extract_target_with_meta(&project, &path, &target_ref, &options);
            if code.is_empty() {
                bail!("Target '{}' not found in {path}", target.name);
            }
            info!(
                files = meta.total_files,
                symbols = meta.total_symbols,
                tokens = meta.total_tokens,
                "extracted"
            );
            println!("{code}");
            Ok(())
        }
        Command::Graph {
            entry,
            modules,
            max_depth,
        } => {
            let (mut project, _) = open_project(&cli.root)?;
            load_with_spinner(&mut project, &entry)?;
            if modules {
                print_json(&build_module_graph(&project))
            } else {
                print_json(&build_symbol_graph(&project, max_depth))
            }
        }
        Command::CheckTestFramework { framework } => {
            let (project, _) = open_project(&cli.root)?;
            let report = project.check_test_framework(framework)?;
            print_json(&report)?;
            if !report.is_ready() {
                bail!("Missing test framework libs for {framework:?}");
            }
            Ok(())
        }
    }
}
