//! `Exclude` / `ExcludeExcept` filters (`spec.md §4.3`): drop, or keep, keys
//! matching any of a set of regexes, with configurable case sensitivity and
//! patterns optionally sourced from a file.

use regex::RegexSet;
use regex::RegexSetBuilder;
use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::{ParsedData, PipelineError};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExcludeConfig {
    patterns: Vec<String>,
    pattern_file: Option<String>,
    case_sensitive: bool,
}

fn build_set(name: &str, config: &serde_yaml::Value) -> Result<RegexSet, PipelineError> {
    let parsed: ExcludeConfig = yaml_to_config(config);
    let mut patterns = parsed.patterns;
    if let Some(path) = &parsed.pattern_file {
        let content = std::fs::read_to_string(path).map_err(PipelineError::Io)?;
        patterns.extend(content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).map(String::from));
    }
    RegexSetBuilder::new(&patterns)
        .case_insensitive(!parsed.case_sensitive)
        .build()
        .map_err(|source| PipelineError::InvalidRegex {
            kind: "filter",
            name: name.to_string(),
            source,
        })
}

pub struct Exclude {
    patterns: RegexSet,
}

impl Exclude {
    pub fn new(name: &str, config: &serde_yaml::Value) -> Result<Self, PipelineError> {
        Ok(Self {
            patterns: build_set(name, config)?,
        })
    }
}

impl FilterDriver for Exclude {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        let drop: Vec<String> = data
            .body
            .iter()
            .filter(|(k, _)| self.patterns.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in drop {
            data.remove(&key);
        }
        Some(data)
    }
}

pub struct ExcludeExcept {
    patterns: RegexSet,
}

impl ExcludeExcept {
    pub fn new(name: &str, config: &serde_yaml::Value) -> Result<Self, PipelineError> {
        Ok(Self {
            patterns: build_set(name, config)?,
        })
    }
}

impl FilterDriver for ExcludeExcept {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        let drop: Vec<String> = data
            .body
            .iter()
            .filter(|(k, _)| !self.patterns.is_match(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in drop {
            data.remove(&key);
        }
        Some(data)
    }
}
