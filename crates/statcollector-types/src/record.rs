use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::ids::new_fetch_id;

/// A scalar value in a [`ParsedData`] body.
///
/// Parsers produce both kinds; the `Numeric` filter is the thing that
/// enforces (or rejects) the numeric half, per `spec.md §4.3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }
}

impl std::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Raw bytes produced by a single Source fetch, before parsing.
///
/// `spec.md §3.1`. Immutable once built, except for the `content` swap a
/// Source's `forceContent` override performs before handing it to the
/// Dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    /// Opaque 14-char alphanumeric id, generated per fetch.
    pub id: String,
    /// Name of the producing Source driver.
    pub driver: String,
    /// Fetch target: a URL, file path, or command line. Uninterpreted by the core.
    pub url: String,
    /// Logical endpoint the data describes (may differ from `url`).
    pub host: Option<String>,
    pub port: Option<u16>,
    pub fetch_start_time: SystemTime,
    pub fetch_done_time: SystemTime,
    pub content: Vec<u8>,
    /// Requested parsers, in order; empty means "use DEFAULT".
    pub parser_names: Vec<String>,
    /// Requested filter chain, in order; empty means "no filters".
    pub filter_names: Vec<String>,
    /// Requested storages; empty means "broadcast to all".
    pub storage_names: Vec<String>,
    pub debug_parsed_data: bool,
}

impl RawData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: impl Into<String>,
        url: impl Into<String>,
        host: Option<String>,
        port: Option<u16>,
        fetch_start_time: SystemTime,
        fetch_done_time: SystemTime,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id: new_fetch_id(),
            driver: driver.into(),
            url: url.into(),
            host,
            port,
            fetch_start_time,
            fetch_done_time,
            content,
            parser_names: Vec::new(),
            filter_names: Vec::new(),
            storage_names: Vec::new(),
            debug_parsed_data: false,
        }
    }

    /// Builds the `ParsedData` this record becomes once a parser succeeds,
    /// inheriting every envelope field (`spec.md §4.2`).
    pub fn into_parsed(self, body: Vec<(String, Scalar)>) -> ParsedData {
        ParsedData {
            id: self.id,
            driver: self.driver,
            url: self.url,
            host: self.host,
            port: self.port,
            fetch_start_time: self.fetch_start_time,
            fetch_done_time: self.fetch_done_time,
            content: self.content,
            parser_names: self.parser_names,
            filter_names: self.filter_names,
            storage_names: self.storage_names,
            debug_parsed_data: self.debug_parsed_data,
            body,
            defer_count: 0,
        }
    }
}

/// A [`RawData`] extended with a parsed key/value body and a defer counter.
///
/// `spec.md §3.1`. The body is an ordered list rather than a `BTreeMap` so
/// that parsers and filters that care about insertion order (e.g. the
/// Haproxy parser's hierarchical keys) can rely on it; lookups by key use
/// `ParsedData::get`/`set` which scan the list, which is fine at the record
/// sizes this pipeline deals with (tens of keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedData {
    pub id: String,
    pub driver: String,
    pub url: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub fetch_start_time: SystemTime,
    pub fetch_done_time: SystemTime,
    pub content: Vec<u8>,
    pub parser_names: Vec<String>,
    pub filter_names: Vec<String>,
    pub storage_names: Vec<String>,
    pub debug_parsed_data: bool,
    pub body: Vec<(String, Scalar)>,
    /// Incremented each time a Storage enqueues this record to its deferral spool.
    pub defer_count: u32,
}

impl ParsedData {
    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.body.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Scalar) {
        let key = key.into();
        if let Some(entry) = self.body.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.body.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Scalar> {
        if let Some(pos) = self.body.iter().position(|(k, _)| k == key) {
            Some(self.body.remove(pos).1)
        } else {
            None
        }
    }

    pub fn rename_keys(&mut self, mut rename: impl FnMut(&str) -> Option<String>) {
        for (key, _) in self.body.iter_mut() {
            if let Some(new_key) = rename(key) {
                *key = new_key;
            }
        }
    }

    /// The log-correlation signature used throughout `spec.md §7`:
    /// `[<name> :: <id>]`.
    pub fn signature(&self, stage_name: &str) -> String {
        format!("[{stage_name} :: {}]", self.id)
    }
}
