//! Error types
//!
//! Compile-time failures (`TranslationError`, `BuildError`) propagate to the
//! caller of `compile`. Evaluation-time failures are typed as `EvalError` and
//! only turned into sentinels at the public facade.

use std::path::PathBuf;
use std::time::Duration;

/// Translator failure
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    /// The translator ran and rejected the program (syntax or semantic error).
    /// The message is the translator's trimmed standard error, verbatim.
    #[error("{diagnostics}")]
    Rejected { diagnostics: String },

    /// The translator did not finish before the deadline and was killed
    #[error("translator timed out after {}ms", .timeout.as_millis())]
    TimedOut { timeout: Duration },

    /// The translator binary could not be started
    #[error("failed to run translator {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("translator io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranslationError {
    /// Diagnostic text reported by the translator, if it produced any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            TranslationError::Rejected { diagnostics } => Some(diagnostics),
            _ => None,
        }
    }
}

/// Native toolchain failure. `output` holds whatever diagnostic text was
/// captured before the failure.
#[derive(Debug, thiserror::Error)]
#[error("build failed: {message}")]
pub struct BuildError {
    pub message: String,
    pub output: String,
}

impl BuildError {
    pub fn new(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: output.into(),
        }
    }
}

/// A cache entry, stored text, or loaded module does not exist
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("no cache entry for {0}")]
    Entry(String),

    #[error("no {what} stored for {identity}")]
    Artifact { identity: String, what: &'static str },

    #[error("module for {identity} could not be loaded: {reason}")]
    Module { identity: String, reason: String },
}

/// A loaded module raised during an operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed for {identity}: {message}")]
pub struct EvaluationError {
    pub identity: String,
    pub operation: &'static str,
    pub message: String,
}

/// Failure of an evaluation call, before sentinel conversion
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Failures raised by a module loader or by the module itself
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("failed to load library: {0}")]
    LibraryLoad(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("incompatible module ABI: expected {expected}, found {found} (model must be recompiled)")]
    IncompatibleAbi { expected: u32, found: u32 },

    /// The module reported an error for a call
    #[error("{0}")]
    Raised(String),

    #[error("invalid module output: {0}")]
    InvalidOutput(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Cache storage failure
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock cache entry {identity}: {source}")]
    Lock {
        identity: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Crate-level error returned by compile-time operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("translation failed: {0}")]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
