//! `FetchMeta` filter (`spec.md §4.3`): inject fetch-envelope fields into
//! the body as ordinary keys, optionally clearing the body first.

use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::{ParsedData, Scalar};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FetchMetaConfig {
    clear_body_first: bool,
}

pub struct FetchMeta {
    config: FetchMetaConfig,
}

impl FetchMeta {
    pub fn new(config: &serde_yaml::Value) -> Self {
        Self {
            config: yaml_to_config(config),
        }
    }
}

impl FilterDriver for FetchMeta {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        if self.config.clear_body_first {
            data.body.clear();
        }
        let duration = data
            .fetch_done_time
            .duration_since(data.fetch_start_time)
            .unwrap_or_default();
        data.set("fetch_id", Scalar::Text(data.id.clone()));
        data.set("fetch_driver", Scalar::Text(data.driver.clone()));
        data.set("fetch_url", Scalar::Text(data.url.clone()));
        data.set("fetch_duration_ms", Scalar::Number(duration.as_secs_f64() * 1000.0));
        data.set("fetch_payload_size", Scalar::Number(data.content.len() as f64));
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::{Duration, SystemTime};
    use statcollector_core::Registry;
    use statcollector_types::RawData;

    #[test]
    fn injects_envelope_fields() {
        let start = SystemTime::now();
        let raw = RawData::new("dummy", "u", None, None, start, start + Duration::from_millis(20), b"12345".to_vec());
        let data = raw.into_parsed(vec![("k".into(), Scalar::Number(1.0))]);
        let filter = FetchMeta {
            config: FetchMetaConfig { clear_body_first: false },
        };
        let ctx = FilterContext::new(Rc::new(RefCell::new(Registry::new("filter"))));
        let result = filter.filter_body(data, &ctx).unwrap();
        assert_eq!(result.get("fetch_payload_size"), Some(&Scalar::Number(5.0)));
        assert!(result.get("k").is_some(), "non-clearing mode must keep the original body");
    }

    #[test]
    fn clear_body_first_drops_prior_keys() {
        let raw = RawData::new("dummy", "u", None, None, SystemTime::now(), SystemTime::now(), vec![]);
        let data = raw.into_parsed(vec![("k".into(), Scalar::Number(1.0))]);
        let filter = FetchMeta {
            config: FetchMetaConfig { clear_body_first: true },
        };
        let ctx = FilterContext::new(Rc::new(RefCell::new(Registry::new("filter"))));
        let result = filter.filter_body(data, &ctx).unwrap();
        assert_eq!(result.get("k"), None);
    }
}
