//! Filter base (`spec.md §4.3`).
//!
//! `filter` is synchronous, like `parse` (`spec.md §5`). A driver overrides
//! `filter_envelope`, `filter_body`, or both; the base always runs envelope
//! first, then body, short-circuiting on a drop. The `Stack` driver is the
//! one driver that needs to call *other* filters by name, so every call
//! carries a [`FilterContext`] borrowed from the Dispatcher's filter
//! registry — filters live behind `Rc<RefCell<_>>` for exactly this reason,
//! matching the single-threaded-cooperative model of `spec.md §5` (one
//! executor touches this state, so interior mutability is enough; no
//! `Arc<Mutex<_>>` needed anywhere in this crate).

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use statcollector_types::ParsedData;

use crate::factory::DriverFactory;
use crate::health::{HealthCounters, HealthSnapshot};
use crate::registry::Registry;

pub trait FilterDriver {
    fn filter_envelope(&self, data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        Some(data)
    }

    fn filter_body(&self, data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        Some(data)
    }
}

pub type FilterFactory = DriverFactory<dyn FilterDriver>;

/// A handle into the Dispatcher's filter registry, handed to every filter
/// invocation so drivers like `Stack` can apply a sibling filter by name
/// without the core granting every driver a full `&Dispatcher`.
#[derive(Clone)]
pub struct FilterContext {
    filters: Rc<RefCell<Registry<Rc<RefCell<Filter>>>>>,
}

impl FilterContext {
    pub fn new(filters: Rc<RefCell<Registry<Rc<RefCell<Filter>>>>>) -> Self {
        Self { filters }
    }

    /// Applies the named filter, or passes `data` through unchanged with a
    /// logged warning if the name doesn't exist — mirrors the Dispatcher's
    /// own "missing filter is skipped with a warning" rule (`spec.md §4.1`)
    /// so `Stack` behaves consistently with the top-level chain.
    pub fn apply_named(&self, name: &str, data: ParsedData) -> Option<ParsedData> {
        let filter = self.filters.borrow().get(name).cloned();
        match filter {
            Some(filter) => filter.borrow_mut().filter(data, self),
            None => {
                log::warn!("filter `{name}` referenced by Stack does not exist, passing through");
                Some(data)
            }
        }
    }
}

pub struct Filter {
    name: String,
    driver_name: String,
    driver: Box<dyn FilterDriver>,
    health: HealthCounters,
}

impl Filter {
    pub fn new(name: impl Into<String>, driver_name: impl Into<String>, driver: Box<dyn FilterDriver>) -> Self {
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

    pub fn filter(&mut self, data: ParsedData, ctx: &FilterContext) -> Option<ParsedData> {
        let start = Instant::now();
        let result = self
            .driver
            .filter_envelope(data, ctx)
            .and_then(|d| self.driver.filter_body(d, ctx));
        match &result {
            Some(_) => self.health.record_ok(start.elapsed()),
            None => self.health.record_ok(start.elapsed()), // a deliberate drop is not an error (spec.md §7.5)
        }
        result
    }
}
