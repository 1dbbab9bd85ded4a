//! Driver factories: a name-keyed set of constructors for a stage's driver
//! trait object.
//!
//! The core crate only knows about the `ParserDriver`/`FilterDriver`/
//! `StorageDriver`/`SourceDriver` trait boundaries (`spec.md §4.2`–`§4.5`);
//! concrete drivers (`TextSimple`, `Haproxy`, `Simple`, `DUMMY`, `Zabbix`, …)
//! live in `statcollector-drivers` and register themselves into one of
//! these factories at startup, the same way the teacher's `ConnectorConfig`
//! dispatches on a driver-keyed config enum — just generalized to a runtime-
//! open set, since this pipeline's drivers aren't all known at compile time
//! in this crate (`spec.md §4.2a`/`§4.3a`/`§4.5a`).

use serde_yaml::Value as YamlValue;
use statcollector_types::PipelineError;
use std::collections::HashMap;
use std::rc::Rc;

/// Not `Send`/`Sync`: drivers are built and run on the single cooperative
/// thread that owns the `Dispatcher` (`spec.md §5`), so a builder closure is
/// free to capture `Rc`/`RefCell` state.
type Builder<D> = Rc<dyn Fn(&YamlValue) -> Result<Box<D>, PipelineError>>;

pub struct DriverFactory<D: ?Sized> {
    kind: &'static str,
    builders: HashMap<String, Builder<D>>,
}

impl<D: ?Sized> Default for DriverFactory<D> {
    fn default() -> Self {
        Self {
            kind: "driver",
            builders: HashMap::new(),
        }
    }
}

impl<D: ?Sized> DriverFactory<D> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            builders: HashMap::new(),
        }
    }

    /// Registers a driver constructor under `driver_name`. Last registration
    /// wins, matching the registries' general replace-on-duplicate rule
    /// (`spec.md §9`).
    pub fn register<F>(&mut self, driver_name: impl Into<String>, build: F)
    where
        F: Fn(&YamlValue) -> Result<Box<D>, PipelineError> + 'static,
    {
        self.builders.insert(driver_name.into(), Rc::new(build));
    }

    pub fn build(
        &self,
        driver_name: &str,
        config: &YamlValue,
    ) -> Result<Box<D>, PipelineError> {
        match self.builders.get(driver_name) {
            Some(build) => build(config),
            None => Err(PipelineError::UnknownDriver {
                kind: self.kind,
                driver: driver_name.to_string(),
            }),
        }
    }

    pub fn contains(&self, driver_name: &str) -> bool {
        self.builders.contains_key(driver_name)
    }
}
