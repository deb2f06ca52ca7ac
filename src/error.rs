use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions raised while building a project graph.
///
/// Anything recoverable (syntax errors inside a file, a missing extraction
/// target) is reported through the model instead and never reaches this type.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no package.json found in {root}")]
    MissingPackageJson { root: PathBuf },

    #[error("cannot resolve import '{path}' (tried: {})", tried.join(", "))]
    UnresolvedImport { path: String, tried: Vec<String> },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("dependency closure of {project_path}:{target} exceeded {limit} hops")]
    ClosureDepthExceeded {
        project_path: String,
        target: String,
        limit: i32,
    },

    #[error("file not loaded: {path}")]
    UnknownFile { path: String },
}

pub type GraphResult<T> = Result<T, GraphError>;
