//! `PCRE` filter (`spec.md §4.3`): regex rewrite of keys using a rule list.
//! A replacement of `DELETE`/`REMOVE` drops the key; unmatched keys pass
//! through unchanged.

use regex::Regex;
use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::{PipelineError, ParsedData};

#[derive(Debug, Default, Deserialize)]
struct RawRule {
    pattern: String,
    replacement: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PcreConfig {
    rules: Vec<RawRule>,
    rule_file: Option<String>,
}

struct Rule {
    pattern: Regex,
    replacement: String,
}

pub struct Pcre {
    rules: Vec<Rule>,
}

impl Pcre {
    pub fn new(name: &str, config: &serde_yaml::Value) -> Result<Self, PipelineError> {
        let parsed: PcreConfig = yaml_to_config(config);
        let mut raw_rules = parsed.rules;
        if let Some(path) = &parsed.rule_file {
            raw_rules.extend(load_rule_file(path, name)?);
        }
        let mut rules = Vec::with_capacity(raw_rules.len());
        for rule in raw_rules {
            let pattern = Regex::new(&rule.pattern).map_err(|source| PipelineError::InvalidRegex {
                kind: "filter",
                name: name.to_string(),
                source,
            })?;
            rules.push(Rule {
                pattern,
                replacement: rule.replacement,
            });
        }
        Ok(Self { rules })
    }
}

fn load_rule_file(path: &str, name: &str) -> Result<Vec<RawRule>, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(PipelineError::Io)?;
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|line| {
            let (pattern, replacement) = line.split_once("=>").ok_or_else(|| PipelineError::InvalidConfig {
                kind: "filter",
                name: name.to_string(),
                reason: format!("malformed PCRE rule line: `{line}`"),
            })?;
            Ok(RawRule {
                pattern: pattern.trim().to_string(),
                replacement: replacement.trim().to_string(),
            })
        })
        .collect()
}

impl FilterDriver for Pcre {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        let keys: Vec<String> = data.body.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(&key)) else {
                continue;
            };
            if rule.replacement == "DELETE" || rule.replacement == "REMOVE" {
                data.remove(&key);
                continue;
            }
            let new_key = rule.pattern.replace(&key, rule.replacement.as_str()).into_owned();
            if new_key != key {
                if let Some(value) = data.remove(&key) {
                    data.set(new_key, value);
                }
            }
        }
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use std::cell::RefCell;
    use std::time::SystemTime;
    use statcollector_core::Registry;
    use statcollector_types::{RawData, Scalar};

    fn sample() -> ParsedData {
        RawData::new("d", "u", None, None, SystemTime::now(), SystemTime::now(), vec![])
            .into_parsed(vec![("cpu_usage".into(), Scalar::Number(1.0)), ("internal_secret".into(), Scalar::Number(2.0))])
    }

    fn ctx() -> FilterContext {
        FilterContext::new(Rc::new(RefCell::new(Registry::new("filter"))))
    }

    #[test]
    fn delete_replacement_drops_matching_keys() {
        let pcre = Pcre {
            rules: vec![Rule {
                pattern: Regex::new("^internal_").unwrap(),
                replacement: "DELETE".into(),
            }],
        };
        let result = pcre.filter_body(sample(), &ctx()).unwrap();
        assert_eq!(result.get("internal_secret"), None);
        assert!(result.get("cpu_usage").is_some());
    }

    #[test]
    fn capture_group_rewrites_key() {
        let pcre = Pcre {
            rules: vec![Rule {
                pattern: Regex::new("^cpu_(.*)$").unwrap(),
                replacement: "cpu.$1".into(),
            }],
        };
        let result = pcre.filter_body(sample(), &ctx()).unwrap();
        assert!(result.get("cpu.usage").is_some());
        assert_eq!(result.get("cpu_usage"), None);
    }
}
