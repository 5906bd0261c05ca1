//! Error types for the build pipeline, the audio graph and configuration files

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage at which a build or load failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    CacheDir,
    TempFile,
    Translate,
    CompileNative,
    Open,
    Symbol,
    Instantiate,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStage::CacheDir => write!(f, "creating cache directory"),
            BuildStage::TempFile => write!(f, "creating temporary file"),
            BuildStage::Translate => write!(f, "translating to C++"),
            BuildStage::CompileNative => write!(f, "compiling native module"),
            BuildStage::Open => write!(f, "opening library"),
            BuildStage::Symbol => write!(f, "resolving entry symbol"),
            BuildStage::Instantiate => write!(f, "creating instance"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("build failed at {stage} stage: {reason}")]
    Stage { stage: BuildStage, reason: String },

    #[error("{program} exited with {status} while {stage}")]
    Process {
        stage: BuildStage,
        program: String,
        status: std::process::ExitStatus,
    },

    #[error("{stage} produced no output file: {path}")]
    MissingOutput { stage: BuildStage, path: PathBuf },

    #[error("IO error while {stage}: {source}")]
    Io {
        stage: BuildStage,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn stage(&self) -> BuildStage {
        match self {
            BuildError::Stage { stage, .. }
            | BuildError::Process { stage, .. }
            | BuildError::MissingOutput { stage, .. }
            | BuildError::Io { stage, .. } => *stage,
        }
    }

    pub(crate) fn io(stage: BuildStage) -> impl FnOnce(std::io::Error) -> Self {
        move |source| BuildError::Io { stage, source }
    }
}

/// Failure reported by the external audio graph
///
/// Port failures leave the graph's port inventory in an unknown state, so
/// callers treat them as fatal.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("could not open audio client: {0}")]
    Open(String),

    #[error("could not register port {name}: {reason}")]
    Register { name: String, reason: String },

    #[error("could not unregister port {name}: {reason}")]
    Unregister { name: String, reason: String },

    #[error("could not {operation} audio client: {reason}")]
    Activation {
        operation: &'static str,
        reason: String,
    },

    #[error("could not connect {source_port} to {destination}: {reason}")]
    Connect {
        source_port: String,
        destination: String,
        reason: String,
    },

    #[error("audio client is not running")]
    NotRunning,

    #[error("audio client is already running")]
    AlreadyRunning,

    #[error("audio client was lost after an earlier failure")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a live session
#[derive(Error, Debug)]
pub enum LiveError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("could not start the compilation worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error("could not create source file {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
pub type BackendResult<T> = std::result::Result<T, BackendError>;
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type LiveResult<T> = std::result::Result<T, LiveError>;
