//! Concrete driver implementations for every Dispatcher stage, and the
//! registration helpers a binary uses to populate the four factories
//! (`spec.md §4.2a`/§4.3a/§4.5a/§4.8) before building a Dispatcher.

mod filters;
mod parsers;
mod sources;
mod storages;

pub use filters::calculator::{Calculator, MissingKeyPolicy};
pub use filters::code::Code;
pub use filters::exclude::{Exclude, ExcludeExcept};
pub use filters::fetch_meta::FetchMeta;
pub use filters::numeric::Numeric;
pub use filters::pcre::Pcre;
pub use filters::simple::Simple;
pub use filters::stack::Stack;
pub use filters::uppercase::UpperCase;
pub use parsers::haproxy::Haproxy;
pub use parsers::text_simple::TextSimple;
pub use sources::dummy::Dummy as DummySource;
pub use sources::exec::Exec;
pub use storages::dummy::Dummy as DummyStorage;
pub use storages::zabbix::Zabbix;

use statcollector_core::{FilterFactory, ParserFactory, SourceFactory, StorageFactory};

/// Registers every built-in parser driver under its `spec.md §4.2` name.
/// `DEFAULT`/`TextSimple` is also auto-registered by `Dispatcher::new`;
/// registering it again here is harmless (replace-on-duplicate).
pub fn register_builtin_parsers(factory: &mut ParserFactory) {
    factory.register("TextSimple", |_cfg| Ok(Box::new(TextSimple)));
    factory.register("Haproxy", |_cfg| Ok(Box::new(Haproxy)));
}

pub fn register_builtin_filters(factory: &mut FilterFactory) {
    factory.register("Simple", |cfg| Ok(Box::new(Simple::new(cfg))));
    factory.register("Pcre", |cfg| Ok(Box::new(Pcre::new("Pcre", cfg)?)));
    factory.register("UpperCase", |_cfg| Ok(Box::new(UpperCase)));
    factory.register("Numeric", |cfg| Ok(Box::new(Numeric::new(cfg))));
    factory.register("Exclude", |cfg| Ok(Box::new(Exclude::new("Exclude", cfg)?)));
    factory.register("ExcludeExcept", |cfg| Ok(Box::new(ExcludeExcept::new("ExcludeExcept", cfg)?)));
    factory.register("Calculator", |cfg| Ok(Box::new(Calculator::new("Calculator", cfg)?)));
    factory.register("FetchMeta", |cfg| Ok(Box::new(FetchMeta::new(cfg))));
    factory.register("CODE", |cfg| Ok(Box::new(Code::new("CODE", cfg)?)));
    factory.register("Stack", |cfg| Ok(Box::new(Stack::new(cfg))));
}

pub fn register_builtin_storages(factory: &mut StorageFactory) {
    factory.register("DUMMY", |cfg| Ok(Box::new(DummyStorage::new(cfg))));
    factory.register("Zabbix", |cfg| Ok(Box::new(Zabbix::new(cfg))));
}

pub fn register_builtin_sources(factory: &mut SourceFactory) {
    factory.register("Exec", |cfg| Ok(Box::new(Exec::new(cfg))));
    factory.register("Dummy", |cfg| Ok(Box::new(DummySource::new(cfg))));
}
