use thiserror::Error;

/// The error taxonomy from `spec.md §7`.
///
/// Only the categories a caller must branch on get a variant here
/// (configuration errors, and the fatal "no storages registered" case);
/// transient fetch/store/parse/filter outcomes are recorded in the
/// health-counter bundle and logged, not threaded through `Result` —
/// matching how the teacher corpus reserves `thiserror` enums for things
/// a caller actually inspects.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unknown driver `{driver}` for {kind}")]
    UnknownDriver { kind: &'static str, driver: String },

    #[error("duplicate name `{name}` in {registry} registry")]
    DuplicateName { registry: &'static str, name: String },

    #[error("invalid configuration for {kind} `{name}`: {reason}")]
    InvalidConfig {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid regex in {kind} `{name}`: {source}")]
    InvalidRegex {
        kind: &'static str,
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("source `{name}` requests a parser chain but its driver emits ParsedData directly")]
    ParserOnParsedSource { name: String },

    #[error("checkInterval ({check_interval}s) must be >= checkTimeout + 0.1s ({check_timeout}s) for source `{name}`")]
    IntervalTooShort {
        name: String,
        check_interval: f64,
        check_timeout: f64,
    },

    #[error("no storages registered at end of initialization")]
    NoStorages,

    #[error("configuration fragment is empty or invalid at {path}: {reason}")]
    EmptyFragment { path: String, reason: String },

    #[error("$<EXEC:{cmdline}> failed: {reason}")]
    ExecTokenFailed { cmdline: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
