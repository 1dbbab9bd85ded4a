//! `Simple` filter (`spec.md §4.3`): prefix/suffix every key, with
//! `%{HOSTNAME}`, `%{PORT}`, `%{otherKey}` tokens substituted from the
//! envelope/body before the rename.

use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::ParsedData;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SimpleConfig {
    prefix: String,
    suffix: String,
}

pub struct Simple {
    config: SimpleConfig,
}

impl Simple {
    pub fn new(config: &serde_yaml::Value) -> Self {
        Self {
            config: yaml_to_config(config),
        }
    }
}

impl FilterDriver for Simple {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        let prefix = substitute(&self.config.prefix, &data);
        let suffix = substitute(&self.config.suffix, &data);
        data.rename_keys(|key| Some(format!("{prefix}{key}{suffix}")));
        Some(data)
    }
}

fn substitute(template: &str, data: &ParsedData) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &rest[start + 2..start + end];
        out.push_str(&resolve_token(token, data));
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

fn resolve_token(token: &str, data: &ParsedData) -> String {
    match token {
        "HOSTNAME" => data.host.clone().unwrap_or_default(),
        "PORT" => data.port.map(|p| p.to_string()).unwrap_or_default(),
        other => data.get(other).map(|v| v.to_string()).unwrap_or_default(),
    }
}
