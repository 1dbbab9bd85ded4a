//! Storage base (`spec.md §4.5`).
//!
//! `driverStore` always suspends (`spec.md §5`), so `StorageDriver` is an
//! async trait. The pipeline is single-threaded cooperative (`spec.md §5`),
//! so `Storage` is driven from a `tokio::task::LocalSet` and uses
//! `Rc<RefCell<_>>` rather than `Arc<Mutex<_>>` for its in-flight set.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{error, warn};
use statcollector_types::ParsedData;

use crate::deferral::DeferralSpool;
use crate::factory::DriverFactory;
use crate::health::{HealthCounters, HealthSnapshot};

pub struct StoreOutcome {
    pub message: Option<String>,
    pub num_stored_keys: Option<u64>,
}

impl StoreOutcome {
    pub fn ok(num_stored_keys: u64) -> Self {
        Self {
            message: None,
            num_stored_keys: Some(num_stored_keys),
        }
    }
}

#[async_trait(?Send)]
pub trait StorageDriver {
    /// Attempts delivery of `record`. Returning `Err` is a transient store
    /// error (`spec.md §7.3`); it does not by itself mean the record is
    /// dropped — the base decides DEFER vs DROP.
    async fn store(&self, record: &ParsedData) -> Result<StoreOutcome, String>;
}

pub type StorageFactory = DriverFactory<dyn StorageDriver>;

pub struct StorageSettings {
    pub defer_enabled: bool,
    pub defer_count: u32,
    pub defer_interval: Duration,
    pub defer_startup_check: bool,
    pub defer_only: bool,
    pub store_timeout: Duration,
}

type StoreId = u64;

pub struct Storage {
    name: String,
    driver_name: String,
    driver: Rc<dyn StorageDriver>,
    settings: StorageSettings,
    spool: DeferralSpool,
    health: RefCell<HealthCounters>,
    inflight: Rc<RefCell<HashMap<StoreId, ParsedData>>>,
    next_store_id: Cell<StoreId>,
    shutting_down: Cell<bool>,
}

impl Storage {
    pub fn new(
        name: impl Into<String>,
        driver_name: impl Into<String>,
        driver: Box<dyn StorageDriver>,
        settings: StorageSettings,
        defer_dir: impl Into<std::path::PathBuf>,
        defer_file_mode: u32,
    ) -> Rc<Self> {
        let name = name.into();
        Rc::new(Self {
            spool: DeferralSpool::new(name.clone(), defer_dir, defer_file_mode),
            name,
            driver_name: driver_name.into(),
            driver: Rc::from(driver),
            settings,
            health: RefCell::new(HealthCounters::new()),
            inflight: Rc::new(RefCell::new(HashMap::new())),
            next_store_id: Cell::new(0),
            shutting_down: Cell::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    pub fn health(&self, since: Duration) -> HealthSnapshot {
        self.health.borrow().snapshot(since)
    }

    /// Admits `record`, attempts delivery within `storeTimeout`, and on
    /// failure defers it to disk — the full lifecycle of `spec.md §4.5`.
    pub async fn store(self: &Rc<Self>, record: ParsedData) {
        if self.settings.defer_only {
            self.defer_or_drop(record);
            return;
        }

        let store_id = self.next_store_id.get();
        self.next_store_id.set(store_id + 1);
        self.inflight.borrow_mut().insert(store_id, record.clone());

        let start = Instant::now();
        let result = tokio::time::timeout(self.settings.store_timeout, self.driver.store(&record)).await;

        // Shutdown may have already claimed and deferred this record.
        if self.inflight.borrow_mut().remove(&store_id).is_none() {
            return;
        }

        match result {
            Ok(Ok(outcome)) => {
                self.health
                    .borrow_mut()
                    .record_ok_with_keys(start.elapsed(), outcome.num_stored_keys.unwrap_or(0));
            }
            Ok(Err(msg)) => {
                self.health.borrow_mut().record_err(start.elapsed());
                warn!("storage `{}` failed on fetch {}: {msg}", self.name, record.id);
                self.defer_or_drop(record);
            }
            Err(_elapsed) => {
                self.health.borrow_mut().record_err(start.elapsed());
                warn!(
                    "storage `{}` timed out on fetch {} after {:?}",
                    self.name, record.id, self.settings.store_timeout
                );
                self.defer_or_drop(record);
            }
        }
    }

    fn defer_or_drop(&self, mut record: ParsedData) {
        if !self.settings.defer_enabled {
            warn!("storage `{}` dropping fetch {} (deferral disabled)", self.name, record.id);
            return;
        }
        if record.defer_count >= self.settings.defer_count {
            warn!(
                "storage `{}` dropping fetch {} (deferral exhausted at {})",
                self.name, record.id, record.defer_count
            );
            return;
        }
        record.defer_count += 1;
        if let Err(err) = self.spool.write(&record) {
            error!("storage `{}` could not defer fetch {}: {err}", self.name, record.id);
        }
    }

    /// Cancels timers and defers every still-in-flight record to disk
    /// (`spec.md §4.5` shutdown).
    pub fn shutdown(&self) {
        self.shutting_down.set(true);
        let pending: Vec<ParsedData> = self.inflight.borrow_mut().drain().map(|(_, v)| v).collect();
        for record in pending {
            self.defer_or_drop(record);
        }
    }

    /// Enqueues every spool file matching this storage's prefix, per the
    /// `deferStartupCheck` / periodic-rescan policy of `spec.md §4.5`. Runs
    /// each retried record back through `store()`, deleting the spool file
    /// once it has been handed off (not once delivery succeeds — a second
    /// failure re-defers it as a fresh file with an incremented count).
    pub async fn rescan_once(self: &Rc<Self>) {
        const CHUNK_SIZE: usize = 100;
        const STAGGER: Duration = Duration::from_secs(6);

        let files = self.spool.list();
        for chunk in files.chunks(CHUNK_SIZE) {
            for path in chunk {
                match self.spool.read(path) {
                    Ok(record) => {
                        self.spool.delete(path);
                        self.store(record).await;
                    }
                    Err(_) => { /* already deleted by DeferralSpool::read, fail closed */ }
                }
            }
            if files.len() > CHUNK_SIZE {
                tokio::time::sleep(STAGGER).await;
            }
        }
    }

    /// Drives the periodic rescan loop until `shutting_down` is set.
    /// Computes the next delay as `deferInterval + total stagger`, capped at
    /// +10 minutes over the configured interval (`spec.md §4.5`).
    pub async fn run_rescan_loop(self: Rc<Self>) {
        if self.settings.defer_startup_check {
            self.rescan_once().await;
        }
        if self.settings.defer_interval.is_zero() {
            return;
        }
        loop {
            if self.shutting_down.get() {
                return;
            }
            let file_count = self.spool.list().len();
            let chunks = file_count.div_ceil(100).max(1) as u32;
            let stagger = Duration::from_secs(6) * chunks.saturating_sub(1);
            let next_delay = (self.settings.defer_interval + stagger)
                .min(self.settings.defer_interval + Duration::from_secs(600));
            tokio::time::sleep(next_delay).await;
            if self.shutting_down.get() {
                return;
            }
            self.rescan_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statcollector_types::RawData;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn sample_record() -> ParsedData {
        RawData::new("dummy", "u", None, None, SystemTime::now(), SystemTime::now(), vec![]).into_parsed(vec![])
    }

    struct AlwaysFails;
    #[async_trait(?Send)]
    impl StorageDriver for AlwaysFails {
        async fn store(&self, _record: &ParsedData) -> Result<StoreOutcome, String> {
            Err("nope".to_string())
        }
    }

    struct CountingSuccess(Rc<AtomicUsize>);
    #[async_trait(?Send)]
    impl StorageDriver for CountingSuccess {
        async fn store(&self, _record: &ParsedData) -> Result<StoreOutcome, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(StoreOutcome::ok(1))
        }
    }

    fn settings(defer_count: u32) -> StorageSettings {
        StorageSettings {
            defer_enabled: true,
            defer_count,
            defer_interval: Duration::from_secs(0),
            defer_startup_check: false,
            defer_only: false,
            store_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn failed_store_defers_to_spool() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(
            "dummy",
            "AlwaysFails",
            Box::new(AlwaysFails),
            settings(2),
            dir.path(),
            0o600,
        );
        storage.store(sample_record()).await;
        assert_eq!(storage.spool.list().len(), 1);
        assert_eq!(storage.health(Duration::from_secs(1)).err, 1);
    }

    #[tokio::test]
    async fn exhausted_defer_count_drops_without_writing() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(
            "dummy",
            "AlwaysFails",
            Box::new(AlwaysFails),
            settings(0),
            dir.path(),
            0o600,
        );
        storage.store(sample_record()).await;
        assert_eq!(storage.spool.list().len(), 0, "deferCount=0 must never write a spool file");
    }

    #[tokio::test]
    async fn s3_retry_and_exhaustion_scenario() {
        // spec.md §8 S3: deferCount=2, driver always fails: 1 initial + 2
        // rescans = 3 attempts total, then the spool is empty.
        let dir = tempdir().unwrap();
        let storage = Storage::new(
            "dummy",
            "AlwaysFails",
            Box::new(AlwaysFails),
            settings(2),
            dir.path(),
            0o600,
        );
        storage.store(sample_record()).await;
        assert_eq!(storage.spool.list().len(), 1);
        storage.rescan_once().await;
        assert_eq!(storage.spool.list().len(), 1);
        storage.rescan_once().await;
        assert_eq!(storage.spool.list().len(), 0, "third failure must exhaust deferCount and drop");
    }

    #[tokio::test]
    async fn defer_only_mode_bypasses_the_driver() {
        let dir = tempdir().unwrap();
        let calls = Rc::new(AtomicUsize::new(0));
        let mut s = settings(2);
        s.defer_only = true;
        let storage = Storage::new(
            "dummy",
            "CountingSuccess",
            Box::new(CountingSuccess(calls.clone())),
            s,
            dir.path(),
            0o600,
        );
        storage.store(sample_record()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0, "deferOnly must never call the driver");
        assert_eq!(storage.spool.list().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_defers_every_inflight_record() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(
            "dummy",
            "AlwaysFails",
            Box::new(AlwaysFails),
            settings(2),
            dir.path(),
            0o600,
        );
        storage.inflight.borrow_mut().insert(0, sample_record());
        storage.inflight.borrow_mut().insert(1, sample_record());
        storage.shutdown();
        assert_eq!(storage.spool.list().len(), 2);
        assert!(storage.inflight.borrow().is_empty());
    }

    #[tokio::test]
    async fn startup_rescan_runs_even_with_zero_defer_interval() {
        // spec.md §4.5: the startup check is independent of the periodic
        // interval — deferInterval=0 only disables the *periodic* rescan.
        let dir = tempdir().unwrap();
        let calls = Rc::new(AtomicUsize::new(0));
        let mut s = settings(2);
        s.defer_startup_check = true;
        let storage = Rc::new(Storage::new(
            "dummy",
            "CountingSuccess",
            Box::new(CountingSuccess(calls.clone())),
            s,
            dir.path(),
            0o600,
        ));
        storage.spool.write(&sample_record()).unwrap();
        assert_eq!(storage.spool.list().len(), 1);
        storage.run_rescan_loop().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "startup rescan must enqueue the existing spool file");
        assert_eq!(storage.spool.list().len(), 0);
    }
}
