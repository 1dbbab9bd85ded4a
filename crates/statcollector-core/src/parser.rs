//! Parser base (`spec.md §4.2`).
//!
//! `parse` is synchronous and pure w.r.t. the input bytes — `spec.md §5`
//! lists it explicitly as a non-suspension point, so `ParserDriver` is a
//! plain (non-async) trait.

use std::time::{Duration, Instant};

use serde_yaml::Value as YamlValue;
use statcollector_types::{ParsedData, RawData};

use crate::factory::DriverFactory;
use crate::health::{HealthCounters, HealthSnapshot};

/// Name of the parser the Dispatcher always registers before any user
/// parser, per `spec.md §4.1`.
pub const DEFAULT_PARSER_NAME: &str = "DEFAULT";
pub const DEFAULT_PARSER_DRIVER: &str = "TextSimple";

pub trait ParserDriver {
    /// Transforms a RawData body into a ParsedData body, or fails with a
    /// human-readable reason (`spec.md §4.2`).
    fn parse(&self, raw: &RawData) -> Result<Vec<(String, statcollector_types::Scalar)>, String>;
}

pub type ParserFactory = DriverFactory<dyn ParserDriver>;

pub struct Parser {
    name: String,
    driver_name: String,
    driver: Box<dyn ParserDriver>,
    health: HealthCounters,
}

impl Parser {
    pub fn new(name: impl Into<String>, driver_name: impl Into<String>, driver: Box<dyn ParserDriver>) -> Self {
        Self {
            name: name.into(),
            driver_name: driver_name.into(),
            driver,
            health: HealthCounters::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn health(&self, since: Duration) -> HealthSnapshot {
        self.health.snapshot(since)
    }

    /// Runs the driver body around the health-counter bookkeeping spec.md
    /// assigns to the base (`spec.md §4.2`: "the base tracks per-parser
    /// health... around the driver body").
    pub fn parse(&mut self, raw: &RawData) -> Option<ParsedData> {
        let start = Instant::now();
        match self.driver.parse(raw) {
            Ok(body) => {
                self.health.record_ok(start.elapsed());
                Some(raw.clone().into_parsed(body))
            }
            Err(reason) => {
                self.health.record_err(start.elapsed());
                log::debug!(
                    "parser `{}` ({}) failed on fetch {}: {}",
                    self.name,
                    self.driver_name,
                    raw.id,
                    reason
                );
                None
            }
        }
    }
}

pub fn yaml_to_config<T: serde::de::DeserializeOwned + Default>(value: &YamlValue) -> T {
    if value.is_null() {
        T::default()
    } else {
        serde_yaml::from_value(value.clone()).unwrap_or_default()
    }
}
