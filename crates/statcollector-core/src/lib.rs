//! Dispatcher, per-stage base types, the health model and the deferral
//! spool for the statcollector pipeline (`spec.md §4`–§5`).
//!
//! Everything here is driven from a single `tokio::task::LocalSet` — there
//! is exactly one `Dispatcher` per process, and it is never sent across
//! threads (`spec.md §5`). Concrete drivers live in `statcollector-drivers`
//! and are wired in through the `*Factory` types in [`factory`].

mod deferral;
mod dispatcher;
mod factory;
mod filter;
mod health;
mod parser;
mod permutation;
mod registry;
mod source;
mod storage;

pub use deferral::{DeferralError, DeferralSpool};
pub use dispatcher::Dispatcher;
pub use factory::DriverFactory;
pub use filter::{Filter, FilterContext, FilterDriver, FilterFactory};
pub use health::{HealthCounters, HealthSnapshot};
pub use parser::{yaml_to_config, Parser, ParserDriver, ParserFactory, DEFAULT_PARSER_DRIVER, DEFAULT_PARSER_NAME};
pub use registry::Registry;
pub use source::{
    FetchedBody, FetchedData, RecordSink, Source, SourceDriver, SourceFactory, SourceRecord, SourceRuntimeConfig,
    SourceState,
};
pub use storage::{Storage, StorageDriver, StorageFactory, StorageSettings, StoreOutcome};
