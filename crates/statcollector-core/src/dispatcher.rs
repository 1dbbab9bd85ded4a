//! The Dispatcher / StatCollector (`spec.md §4.1`).
//!
//! Admits records, routes them through exactly one Parser, then the
//! requested Filter chain, then fans out to the requested Storages.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{error, warn};
use statcollector_types::{config, ParsedData, PipelineError, RawData};

use crate::filter::{Filter, FilterContext, FilterFactory};
use crate::health::HealthSnapshot;
use crate::parser::{Parser, ParserFactory, DEFAULT_PARSER_DRIVER, DEFAULT_PARSER_NAME};
use crate::permutation;
use crate::registry::Registry;
use crate::source::{RecordSink, Source, SourceFactory, SourceRecord, SourceRuntimeConfig};
use crate::storage::{Storage, StorageFactory, StorageSettings};

pub struct Dispatcher {
    parsers: RefCell<Registry<Parser>>,
    filters: Rc<RefCell<Registry<Rc<RefCell<Filter>>>>>,
    storages: RefCell<Registry<Rc<Storage>>>,
    sources: RefCell<Registry<Rc<Source<Dispatcher>>>>,

    parser_factory: ParserFactory,
    filter_factory: FilterFactory,
    storage_factory: StorageFactory,
    source_factory: SourceFactory,

    shutting_down: std::cell::Cell<bool>,
}

impl Dispatcher {
    /// Constructs a Dispatcher and auto-creates the mandatory `DEFAULT`
    /// parser (`spec.md §4.1`). Fails if `parser_factory` can't build
    /// `TextSimple` — in practice the caller always supplies the drivers
    /// crate's factories, which can.
    pub fn new(
        parser_factory: ParserFactory,
        filter_factory: FilterFactory,
        storage_factory: StorageFactory,
        source_factory: SourceFactory,
    ) -> Result<Rc<Self>, PipelineError> {
        let default_driver = parser_factory.build(DEFAULT_PARSER_DRIVER, &serde_yaml::Value::Null)?;
        let mut parsers = Registry::new("parser");
        parsers.insert(
            DEFAULT_PARSER_NAME,
            Parser::new(DEFAULT_PARSER_NAME, DEFAULT_PARSER_DRIVER, default_driver),
        );

        Ok(Rc::new(Self {
            parsers: RefCell::new(parsers),
            filters: Rc::new(RefCell::new(Registry::new("filter"))),
            storages: RefCell::new(Registry::new("storage")),
            sources: RefCell::new(Registry::new("source")),
            parser_factory,
            filter_factory,
            storage_factory,
            source_factory,
            shutting_down: std::cell::Cell::new(false),
        }))
    }

    pub fn register_parser(&self, cfg: config::ParserConfig) -> Result<(), PipelineError> {
        let driver = self.parser_factory.build(&cfg.driver, &cfg.config)?;
        self.parsers
            .borrow_mut()
            .insert(cfg.name.clone(), Parser::new(cfg.name, cfg.driver, driver));
        Ok(())
    }

    pub fn register_filter(&self, cfg: config::FilterConfig) -> Result<(), PipelineError> {
        let driver = self.filter_factory.build(&cfg.driver, &cfg.config)?;
        self.filters
            .borrow_mut()
            .insert(cfg.name.clone(), Rc::new(RefCell::new(Filter::new(cfg.name, cfg.driver, driver))));
        Ok(())
    }

    pub fn register_storage(self: &Rc<Self>, cfg: config::StorageConfig) -> Result<(), PipelineError> {
        let driver = self.storage_factory.build(&cfg.driver, &cfg.config)?;
        let settings = StorageSettings {
            defer_enabled: cfg.defer_enabled,
            defer_count: cfg.defer_count,
            defer_interval: Duration::from_secs(cfg.defer_interval_secs),
            defer_startup_check: cfg.defer_startup_check,
            defer_only: cfg.defer_only,
            store_timeout: Duration::from_secs_f64(cfg.store_timeout_secs),
        };
        let storage = Storage::new(
            cfg.name.clone(),
            cfg.driver,
            driver,
            settings,
            cfg.defer_dir,
            cfg.defer_file_mode,
        );
        tokio::task::spawn_local(storage.clone().run_rescan_loop());
        self.storages.borrow_mut().insert(cfg.name, storage);
        Ok(())
    }

    /// Registers one Source spec, or — if it contains a permutation
    /// multiplier field — expands it first and registers every resulting
    /// instance (`spec.md §4.6`).
    pub fn register_source(self: &Rc<Self>, cfg: config::SourceConfig) -> Result<(), PipelineError> {
        for instance in permutation::expand(cfg)? {
            self.register_one_source(instance)?;
        }
        Ok(())
    }

    fn register_one_source(self: &Rc<Self>, cfg: config::SourceConfig) -> Result<(), PipelineError> {
        cfg.validate()?;
        let driver = self.source_factory.build(&cfg.driver, &cfg.config)?;

        if driver.produces_parsed_data() && !cfg.use_parser.is_empty() {
            return Err(PipelineError::ParserOnParsedSource {
                name: cfg.name.clone().unwrap_or_default(),
            });
        }

        let runtime_cfg = SourceRuntimeConfig {
            name: cfg.name.clone(),
            driver_name: cfg.driver,
            url: cfg.config.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            check_interval: Duration::from_secs_f64(cfg.check_interval_secs),
            check_timeout: Duration::from_secs_f64(cfg.check_timeout_secs),
            max_errors_in_row: cfg.max_errors_in_row,
            error_resume_pause: Duration::from_secs_f64(cfg.error_resume_pause_secs),
            startup_delay: Duration::from_secs_f64(cfg.startup_delay_secs),
            source_group: cfg.source_group,
            parser_names: cfg.use_parser,
            filter_names: cfg.use_filter,
            storage_names: cfg.use_storage,
            force_hostname: cfg.force_hostname,
            force_port: cfg.force_port,
            force_content: cfg.force_content,
            debug_raw_data: cfg.debug_raw_data,
            debug_parsed_data: cfg.debug_parsed_data,
            hostname: None,
            port: None,
        };

        let source = Source::new(runtime_cfg, driver, self.clone());
        let name = cfg.name.clone().unwrap_or_else(|| format!("source-{}", self.sources.borrow().len()));
        tokio::task::spawn_local({
            let source = source.clone();
            async move { source.start().await }
        });
        self.sources.borrow_mut().insert(name, source);
        Ok(())
    }

    /// The Parser-selection algorithm of `spec.md §4.1`.
    fn select_parser(&self, raw: &RawData) -> Option<ParsedData> {
        let names: Vec<&str> = if raw.parser_names.is_empty() {
            vec![DEFAULT_PARSER_NAME]
        } else {
            raw.parser_names.iter().map(String::as_str).collect()
        };
        let mut attempted = Vec::new();
        for name in &names {
            let mut parsers = self.parsers.borrow_mut();
            let Some(parser) = parsers.get_mut(name) else {
                error!("parser `{name}` requested by fetch {} does not exist", raw.id);
                attempted.push(*name);
                continue;
            };
            if let Some(parsed) = parser.parse(raw) {
                return Some(parsed);
            }
            attempted.push(*name);
        }
        error!(
            "fetch {} could not be parsed by any of [{}]",
            raw.id,
            attempted.join(", ")
        );
        None
    }

    /// The Filter-chain algorithm of `spec.md §4.1`.
    fn run_filter_chain(&self, mut data: ParsedData) -> Option<ParsedData> {
        let ctx = FilterContext::new(self.filters.clone());
        let names = data.filter_names.clone();
        for name in names {
            let filter = self.filters.borrow().get(&name).cloned();
            match filter {
                Some(filter) => match filter.borrow_mut().filter(data, &ctx) {
                    Some(next) => data = next,
                    None => return None,
                },
                None => {
                    warn!("filter `{name}` requested by fetch {} does not exist, skipping", data.id);
                }
            }
        }
        Some(data)
    }

    /// Storage fan-out of `spec.md §4.1`: named subset if requested,
    /// otherwise every registered Storage.
    fn fan_out(self: &Rc<Self>, data: ParsedData) {
        let storages = self.storages.borrow();
        let targets: Vec<Rc<Storage>> = if data.storage_names.is_empty() {
            storages.iter().map(|(_, s)| s.clone()).collect()
        } else {
            data.storage_names
                .iter()
                .filter_map(|name| match storages.get(name) {
                    Some(s) => Some(s.clone()),
                    None => {
                        warn!("storage `{name}` requested by fetch {} does not exist", data.id);
                        None
                    }
                })
                .collect()
        };
        drop(storages);
        for storage in targets {
            let record = data.clone();
            tokio::task::spawn_local(async move { storage.store(record).await });
        }
    }

    fn process(self: &Rc<Self>, record: SourceRecord) {
        if self.shutting_down.get() {
            return;
        }
        let parsed = match record {
            SourceRecord::Raw(raw) => self.select_parser(&raw),
            SourceRecord::Parsed(parsed) => Some(parsed),
        };
        let Some(parsed) = parsed else { return };
        if let Some(filtered) = self.run_filter_chain(parsed) {
            self.fan_out(filtered);
        }
    }

    pub fn parser_health(&self, since: Duration) -> Vec<(String, HealthSnapshot)> {
        self.parsers
            .borrow()
            .iter()
            .map(|(name, p)| (name.to_string(), p.health(since)))
            .collect()
    }

    pub fn storage_names(&self) -> Vec<String> {
        self.storages.borrow().names().map(str::to_string).collect()
    }

    /// Orderly drain: stop accepting new Source data, cancel every Source's
    /// in-flight fetch, shut down every Storage (which defers in-flight
    /// records), then release Parsers/Filters (`spec.md §4.1`).
    pub fn shutdown(&self) {
        self.shutting_down.set(true);
        for (_, source) in self.sources.borrow().iter() {
            source.shutdown();
        }
        for (_, storage) in self.storages.borrow().iter() {
            storage.shutdown();
        }
    }

    /// Must hold at least one Storage at end of initialization, or startup
    /// aborts (`spec.md §4.1`/§7.8).
    pub fn check_has_storages(&self) -> Result<(), PipelineError> {
        if self.storages.borrow().is_empty() {
            self.shutdown();
            Err(PipelineError::NoStorages)
        } else {
            Ok(())
        }
    }
}

impl RecordSink for Dispatcher {
    fn on_source_data(self: Rc<Self>, record: SourceRecord) {
        self.process(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterDriver;
    use crate::parser::ParserDriver;
    use crate::source::{FetchedBody, FetchedData, SourceDriver};
    use crate::storage::{StorageDriver, StoreOutcome};
    use async_trait::async_trait;
    use statcollector_types::Scalar;
    use std::time::SystemTime;

    struct TextSimple;
    impl ParserDriver for TextSimple {
        fn parse(&self, raw: &RawData) -> Result<Vec<(String, Scalar)>, String> {
            let text = String::from_utf8_lossy(&raw.content);
            Ok(text
                .lines()
                .filter_map(|line| {
                    let (k, v) = line.split_once(':').or_else(|| line.split_once('='))?;
                    Some((k.trim().to_string(), Scalar::Text(v.trim().to_string())))
                })
                .collect())
        }
    }

    struct UpperCase;
    impl FilterDriver for UpperCase {
        fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
            data.rename_keys(|k| Some(k.to_uppercase()));
            Some(data)
        }
    }

    struct RecordingStorage(Rc<RefCell<Vec<ParsedData>>>);
    #[async_trait(?Send)]
    impl StorageDriver for RecordingStorage {
        async fn store(&self, record: &ParsedData) -> Result<StoreOutcome, String> {
            self.0.borrow_mut().push(record.clone());
            Ok(StoreOutcome::ok(record.body.len() as u64))
        }
    }

    fn sample_raw(content: &str) -> RawData {
        let now = SystemTime::now();
        let mut raw = RawData::new("dummy", "u", Some("host1".into()), Some(9000), now, now, content.as_bytes().to_vec());
        raw.filter_names = vec!["upper".into()];
        raw
    }

    #[tokio::test]
    async fn s1_happy_path() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let mut parser_factory = ParserFactory::new("parser");
                parser_factory.register(DEFAULT_PARSER_DRIVER, |_cfg| Ok(Box::new(TextSimple) as Box<_>));
                let mut filter_factory = FilterFactory::new("filter");
                filter_factory.register("UpperCase", |_cfg| Ok(Box::new(UpperCase) as Box<_>));
                let received = Rc::new(RefCell::new(Vec::new()));
                let mut storage_factory = StorageFactory::new("storage");
                let received_clone = received.clone();
                storage_factory.register("Recorder", move |_cfg| {
                    Ok(Box::new(RecordingStorage(received_clone.clone())) as Box<_>)
                });
                let source_factory = SourceFactory::new("source");

                let dispatcher =
                    Dispatcher::new(parser_factory, filter_factory, storage_factory, source_factory).unwrap();
                dispatcher
                    .register_filter(config::FilterConfig {
                        name: "upper".into(),
                        driver: "UpperCase".into(),
                        config: serde_yaml::Value::Null,
                    })
                    .unwrap();
                dispatcher
                    .register_storage(config::StorageConfig {
                        name: "dummy".into(),
                        driver: "Recorder".into(),
                        defer_dir: "/tmp/does-not-matter".into(),
                        ..Default::default()
                    })
                    .unwrap();

                let raw = sample_raw("cpu_usage: 12.345\nerrors: 0\n");
                dispatcher.clone().on_source_data(SourceRecord::Raw(raw));

                // Let the spawned storage task run.
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                let stored = received.borrow();
                assert_eq!(stored.len(), 1);
                assert_eq!(stored[0].get("CPU_USAGE"), Some(&Scalar::Text("12.345".into())));
                assert_eq!(stored[0].host.as_deref(), Some("host1"));
            })
            .await;
    }

    #[tokio::test]
    async fn s2_parser_fallback() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                struct AlwaysNull;
                impl ParserDriver for AlwaysNull {
                    fn parse(&self, _raw: &RawData) -> Result<Vec<(String, Scalar)>, String> {
                        Err("always fails".into())
                    }
                }
                let mut parser_factory = ParserFactory::new("parser");
                parser_factory.register(DEFAULT_PARSER_DRIVER, |_cfg| Ok(Box::new(TextSimple) as Box<_>));
                parser_factory.register("beta", |_cfg| Ok(Box::new(AlwaysNull) as Box<_>));
                let filter_factory = FilterFactory::new("filter");
                let received = Rc::new(RefCell::new(Vec::new()));
                let mut storage_factory = StorageFactory::new("storage");
                let received_clone = received.clone();
                storage_factory.register("Recorder", move |_cfg| {
                    Ok(Box::new(RecordingStorage(received_clone.clone())) as Box<_>)
                });
                let source_factory = SourceFactory::new("source");
                let dispatcher =
                    Dispatcher::new(parser_factory, filter_factory, storage_factory, source_factory).unwrap();
                dispatcher
                    .register_parser(config::ParserConfig {
                        name: "beta".into(),
                        driver: "beta".into(),
                        config: serde_yaml::Value::Null,
                    })
                    .unwrap();
                dispatcher
                    .register_storage(config::StorageConfig {
                        name: "dummy".into(),
                        driver: "Recorder".into(),
                        defer_dir: "/tmp/does-not-matter".into(),
                        ..Default::default()
                    })
                    .unwrap();

                let mut raw = sample_raw("k: v\n");
                raw.filter_names.clear();
                raw.parser_names = vec!["alpha".into(), "beta".into(), DEFAULT_PARSER_NAME.into()];
                dispatcher.clone().on_source_data(SourceRecord::Raw(raw));
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;

                assert_eq!(received.borrow().len(), 1, "DEFAULT must still deliver after alpha/beta fail");
            })
            .await;
    }
}
