//! Shared record and configuration types for the statcollector pipeline.
//!
//! This crate has no runtime behavior of its own: it defines the wire
//! shapes (`RawData`, `ParsedData`), the configuration fragments used to
//! register drivers with a `Dispatcher`, and the error taxonomy shared by
//! every stage. `statcollector-core` and `statcollector-drivers` both build
//! on top of it.

mod error;
mod ids;
mod record;

pub mod config;

pub use error::PipelineError;
pub use ids::new_fetch_id;
pub use record::{ParsedData, RawData, Scalar};
