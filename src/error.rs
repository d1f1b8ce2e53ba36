use std::path::PathBuf;

/// The error taxonomy for every fallible operation this crate exposes.
///
/// Propagation policy (see SPEC_FULL.md §7): analyzer and patcher failures
/// are fatal for the whole run. Sink I/O failures are isolated per profile
/// and are only ever logged, never returned from here.
#[derive(Debug, thiserror::Error)]
pub enum PrismError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to parse {path}: {source}")]
    ParseFailure {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },

    #[error("profile target {0:?} did not resolve to any function declaration")]
    ResolutionFailure(String),

    #[error("failed to patch {path}: {reason}")]
    PatchFailure { path: PathBuf, reason: String },

    #[error("sink I/O failure: {0}")]
    SinkIoFailure(String),

    #[error("sink is closed")]
    SinkClosed,

    #[error(r#""diff" requires at least 2 profiles"#)]
    InsufficientProfiles,

    #[error("unsupported column name {0:?}; supported column names are: {1}")]
    UnknownColumn(String, String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PrismError>;
