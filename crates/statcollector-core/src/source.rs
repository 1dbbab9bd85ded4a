//! Source base (`spec.md §4.4`) — the state machine table in that section
//! is implemented directly as the states below.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use log::warn;
use rand::Rng;
use statcollector_types::{RawData, Scalar};
use tokio::sync::Notify;

use crate::factory::DriverFactory;
use crate::health::{HealthCounters, HealthSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    Init,
    Scheduled,
    Fetching,
    Paused,
    Stopped,
}

/// Either opaque bytes (the common case, handed to the Parser stage) or an
/// already-structured body. A driver that produces the latter is reporting
/// `ParsedData` directly and skips the Parser stage entirely (`spec.md §2`,
/// §4.1's "A ParsedData arriving here skips parsing").
pub enum FetchedBody {
    Raw(Vec<u8>),
    Parsed(Vec<(String, Scalar)>),
}

pub struct FetchedData {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub body: FetchedBody,
}

#[async_trait(?Send)]
pub trait SourceDriver {
    /// Begins a fetch and resolves with its content, or a transient error
    /// (`spec.md §4.4`).
    async fn fetch(&self) -> Result<FetchedData, String>;

    /// `driverFetchCancel` — must abort any in-flight I/O. Default no-op is
    /// adequate for drivers whose future's `Drop` already cancels the I/O
    /// (e.g. an `AsyncRead` over a socket); override for drivers that spawn
    /// a child process or otherwise need an explicit teardown step.
    async fn cancel(&self) {}

    /// `true` if this driver's fetches always resolve to `FetchedBody::Parsed`.
    /// A Source built on such a driver must not configure `useParser`
    /// (`spec.md §9` Open Question #1) — `Dispatcher::register_source`
    /// checks this at registration time.
    fn produces_parsed_data(&self) -> bool {
        false
    }
}

pub type SourceFactory = DriverFactory<dyn SourceDriver>;

/// What a Source hands to the Dispatcher: either RawData bound for the
/// Parser stage, or a ParsedData that skips straight to the Filter chain.
pub enum SourceRecord {
    Raw(RawData),
    Parsed(statcollector_types::ParsedData),
}

/// Receives records produced by a Source. Implemented by the Dispatcher;
/// kept as a trait so `statcollector-core::source` doesn't depend on
/// `statcollector-core::dispatcher`.
pub trait RecordSink {
    fn on_source_data(self: Rc<Self>, record: SourceRecord);
}

pub struct SourceRuntimeConfig {
    pub name: Option<String>,
    pub driver_name: String,
    pub url: String,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub max_errors_in_row: u32,
    pub error_resume_pause: Duration,
    pub startup_delay: Duration,
    pub source_group: Option<String>,
    pub parser_names: Vec<String>,
    pub filter_names: Vec<String>,
    pub storage_names: Vec<String>,
    pub force_hostname: Option<String>,
    pub force_port: Option<u16>,
    pub force_content: Option<Vec<u8>>,
    pub debug_raw_data: bool,
    pub debug_parsed_data: bool,
    /// Source's own configured hostname, lowest priority in the host
    /// resolution order (`spec.md §4.4`).
    pub hostname: Option<String>,
    pub port: Option<u16>,
}

pub struct Source<S: RecordSink> {
    cfg: SourceRuntimeConfig,
    driver: Rc<dyn SourceDriver>,
    sink: Rc<S>,
    state: Cell<SourceState>,
    sequential_errors: Cell<u32>,
    health: std::cell::RefCell<HealthCounters>,
    pause_notify: Notify,
    resume_notify: Notify,
    stop_notify: Notify,
}

/// Minimum floor on the next-fetch delay, and the error-resume-pause floor,
/// both from `spec.md §4.4`.
const MIN_NEXT_DELAY: Duration = Duration::from_secs(1);
const MIN_ERROR_RESUME_PAUSE: Duration = Duration::from_secs(60);
const MAX_OVERRUN_JITTER: Duration = Duration::from_secs(60);

impl<S: RecordSink> Source<S> {
    pub fn new(cfg: SourceRuntimeConfig, driver: Box<dyn SourceDriver>, sink: Rc<S>) -> Rc<Self> {
        Rc::new(Self {
            cfg,
            driver: Rc::from(driver),
            sink,
            state: Cell::new(SourceState::Init),
            sequential_errors: Cell::new(0),
            health: std::cell::RefCell::new(HealthCounters::new()),
            pause_notify: Notify::new(),
            resume_notify: Notify::new(),
            stop_notify: Notify::new(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.cfg.name.as_deref()
    }

    pub fn driver_name(&self) -> &str {
        &self.cfg.driver_name
    }

    pub fn state(&self) -> SourceState {
        self.state.get()
    }

    pub fn health(&self, since: Duration) -> HealthSnapshot {
        self.health.borrow().snapshot(since)
    }

    /// Schedules the first fetch after a random delay in `[0, startupDelay)`
    /// (`spec.md §4.4`), then runs the scheduling loop until `shutdown()`.
    pub async fn start(self: &Rc<Self>) {
        self.state.set(SourceState::Scheduled);
        let startup = random_sub_duration(self.cfg.startup_delay);
        if !self.wait_or_interrupted(startup).await {
            return;
        }
        loop {
            if matches!(self.state.get(), SourceState::Stopped) {
                return;
            }
            if matches!(self.state.get(), SourceState::Paused) && !self.wait_for_resume().await {
                return;
            }
            let delay = match self.run_one_fetch().await {
                Some(delay) => delay,
                None => return, // stopped mid-fetch
            };
            if matches!(self.state.get(), SourceState::Paused) {
                // pause() fired mid-fetch; loop back around to wait_for_resume.
                continue;
            }
            self.state.set(SourceState::Scheduled);
            if !self.wait_or_interrupted(delay).await {
                return;
            }
        }
    }

    async fn run_one_fetch(self: &Rc<Self>) -> Option<Duration> {
        self.state.set(SourceState::Fetching);
        let fetch_start = SystemTime::now();
        let start_instant = std::time::Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = self.stop_notify.notified() => {
                self.driver.cancel().await;
                return None;
            }
            _ = self.pause_notify.notified() => {
                self.driver.cancel().await;
                self.state.set(SourceState::Paused);
                self.health.borrow_mut().record_err(start_instant.elapsed());
                return Some(MIN_NEXT_DELAY);
            }
            result = tokio::time::timeout(self.cfg.check_timeout, self.driver.fetch()) => result,
        };

        let elapsed = start_instant.elapsed();
        let fetch_done = SystemTime::now();

        match outcome {
            Ok(Ok(fetched)) => {
                self.health.borrow_mut().record_ok(elapsed);
                self.sequential_errors.set(0);
                self.emit(fetch_start, fetch_done, fetched);
                Some(self.next_delay(elapsed))
            }
            Ok(Err(reason)) => {
                self.health.borrow_mut().record_err(elapsed);
                warn!(
                    "source `{}` ({}) fetch error: {reason}",
                    self.cfg.name.as_deref().unwrap_or(&self.cfg.url),
                    self.cfg.driver_name
                );
                Some(self.on_fetch_failed(elapsed))
            }
            Err(_timed_out) => {
                self.driver.cancel().await;
                self.health.borrow_mut().record_err(elapsed);
                warn!(
                    "source `{}` ({}) fetch timed out after {:?}",
                    self.cfg.name.as_deref().unwrap_or(&self.cfg.url),
                    self.cfg.driver_name,
                    self.cfg.check_timeout
                );
                Some(self.on_fetch_failed(elapsed))
            }
        }
    }

    fn on_fetch_failed(self: &Rc<Self>, elapsed: Duration) -> Duration {
        let streak = self.sequential_errors.get() + 1;
        self.sequential_errors.set(streak);
        if self.cfg.max_errors_in_row > 0 && streak >= self.cfg.max_errors_in_row {
            warn!(
                "source `{}` paused after {streak} consecutive errors",
                self.cfg.name.as_deref().unwrap_or(&self.cfg.url)
            );
            self.state.set(SourceState::Paused);
            let resume_pause = self.cfg.error_resume_pause.max(MIN_ERROR_RESUME_PAUSE);
            self.schedule_auto_resume(resume_pause);
        }
        self.next_delay(elapsed)
    }

    fn schedule_auto_resume(self: &Rc<Self>, after: Duration) {
        let weak = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(after).await;
            if let Some(source) = weak.upgrade() {
                source.resume();
            }
        });
    }

    /// `now + max(checkInterval - fetchDuration, 1s)`, with up to 60s of
    /// jitter added if the fetch overran `checkInterval` (`spec.md §4.4`).
    fn next_delay(&self, fetch_duration: Duration) -> Duration {
        let base = self
            .cfg
            .check_interval
            .checked_sub(fetch_duration)
            .unwrap_or(Duration::ZERO)
            .max(MIN_NEXT_DELAY);
        if fetch_duration > self.cfg.check_interval {
            base + random_sub_duration(MAX_OVERRUN_JITTER)
        } else {
            base
        }
    }

    fn emit(self: &Rc<Self>, fetch_start: SystemTime, fetch_done: SystemTime, fetched: FetchedData) {
        let host = self
            .cfg
            .force_hostname
            .clone()
            .or(fetched.host)
            .or_else(|| self.cfg.hostname.clone());
        let port = self.cfg.force_port.or(fetched.port).or(self.cfg.port);

        match fetched.body {
            FetchedBody::Raw(bytes) => {
                let content = self.cfg.force_content.clone().unwrap_or(bytes);
                let mut raw = RawData::new(
                    self.cfg.driver_name.clone(),
                    self.cfg.url.clone(),
                    host,
                    port,
                    fetch_start,
                    fetch_done,
                    content,
                );
                raw.parser_names = self.cfg.parser_names.clone();
                raw.filter_names = self.cfg.filter_names.clone();
                raw.storage_names = self.cfg.storage_names.clone();
                raw.debug_parsed_data = self.cfg.debug_parsed_data;
                self.sink.clone().on_source_data(SourceRecord::Raw(raw));
            }
            FetchedBody::Parsed(body) => {
                let content = self.cfg.force_content.clone().unwrap_or_default();
                let raw = RawData::new(
                    self.cfg.driver_name.clone(),
                    self.cfg.url.clone(),
                    host,
                    port,
                    fetch_start,
                    fetch_done,
                    content,
                );
                let mut parsed = raw.into_parsed(body);
                parsed.parser_names = self.cfg.parser_names.clone();
                parsed.filter_names = self.cfg.filter_names.clone();
                parsed.storage_names = self.cfg.storage_names.clone();
                parsed.debug_parsed_data = self.cfg.debug_parsed_data;
                self.sink.clone().on_source_data(SourceRecord::Parsed(parsed));
            }
        }
    }

    /// Idempotent: cancels any in-flight fetch and stops the timer.
    pub fn pause(&self) {
        if matches!(self.state.get(), SourceState::Paused | SourceState::Stopped) {
            return;
        }
        self.state.set(SourceState::Paused);
        self.pause_notify.notify_one();
    }

    /// Idempotent.
    pub fn resume(&self) {
        if !matches!(self.state.get(), SourceState::Paused) {
            return;
        }
        self.sequential_errors.set(0);
        self.state.set(SourceState::Scheduled);
        self.resume_notify.notify_one();
    }

    pub fn shutdown(&self) {
        self.state.set(SourceState::Stopped);
        self.stop_notify.notify_one();
        self.pause_notify.notify_one();
        self.resume_notify.notify_one();
    }

    async fn wait_or_interrupted(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.stop_notify.notified() => false,
            _ = self.pause_notify.notified() => {
                self.state.set(SourceState::Paused);
                self.wait_for_resume().await
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn wait_for_resume(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.stop_notify.notified() => false,
            _ = self.resume_notify.notified() => true,
        }
    }
}

fn random_sub_duration(bound: Duration) -> Duration {
    if bound.is_zero() {
        return Duration::ZERO;
    }
    let millis = bound.as_millis().max(1);
    let picked = rand::thread_rng().gen_range(0..millis);
    Duration::from_millis(picked as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;
    impl RecordSink for NullSink {
        fn on_source_data(self: Rc<Self>, _record: SourceRecord) {}
    }

    fn cfg(check_interval: Duration, check_timeout: Duration) -> SourceRuntimeConfig {
        SourceRuntimeConfig {
            name: Some("s".into()),
            driver_name: "dummy".into(),
            url: "u".into(),
            check_interval,
            check_timeout,
            max_errors_in_row: 3,
            error_resume_pause: Duration::from_secs(60),
            startup_delay: Duration::ZERO,
            source_group: None,
            parser_names: vec![],
            filter_names: vec![],
            storage_names: vec![],
            force_hostname: None,
            force_port: None,
            force_content: None,
            debug_raw_data: false,
            debug_parsed_data: false,
            hostname: None,
            port: None,
        }
    }

    struct NeverFetches;
    #[async_trait(?Send)]
    impl SourceDriver for NeverFetches {
        async fn fetch(&self) -> Result<FetchedData, String> {
            std::future::pending().await
        }
    }

    fn make_source(check_interval: Duration, check_timeout: Duration) -> Rc<Source<NullSink>> {
        Source::new(cfg(check_interval, check_timeout), Box::new(NeverFetches), Rc::new(NullSink))
    }

    #[test]
    fn next_delay_floors_at_one_second() {
        let source = make_source(Duration::from_secs(10), Duration::from_secs(5));
        let delay = source.next_delay(Duration::from_secs(20));
        assert!(delay >= MIN_NEXT_DELAY);
    }

    #[test]
    fn next_delay_without_overrun_is_exact() {
        let source = make_source(Duration::from_secs(10), Duration::from_secs(5));
        let delay = source.next_delay(Duration::from_secs(3));
        assert_eq!(delay, Duration::from_secs(7));
    }

    #[test]
    fn pause_is_idempotent() {
        let source = make_source(Duration::from_secs(10), Duration::from_secs(5));
        source.pause();
        source.pause();
        assert_eq!(source.state(), SourceState::Paused);
    }

    #[tokio::test]
    async fn error_streak_pauses_after_threshold() {
        struct AlwaysFails;
        #[async_trait(?Send)]
        impl SourceDriver for AlwaysFails {
            async fn fetch(&self) -> Result<FetchedData, String> {
                Err("boom".to_string())
            }
        }
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let source = Source::new(
                    cfg(Duration::from_millis(50), Duration::from_millis(10)),
                    Box::new(AlwaysFails),
                    Rc::new(NullSink),
                );
                for _ in 0..3 {
                    source.run_one_fetch().await;
                }
                assert_eq!(source.state(), SourceState::Paused);
            })
            .await;
    }
}
