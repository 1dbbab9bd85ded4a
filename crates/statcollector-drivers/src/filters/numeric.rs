//! `Numeric` filter (`spec.md §4.3`): optionally drop non-numeric values;
//! render the rest at a fixed fractional precision (default 2 digits).
//!
//! Values are stored back as [`Scalar::Text`] formatted to the configured
//! precision — matching `spec.md §8`'s S1 scenario, which expects
//! `"12.35"`/`"0.00"` strings, not floats, downstream of this filter.

use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::{ParsedData, Scalar};

fn default_frac_precision() -> usize {
    2
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct NumericConfig {
    drop_non_numeric: bool,
    #[serde(default = "default_frac_precision")]
    frac_precision: usize,
}

impl Default for NumericConfig {
    fn default() -> Self {
        Self {
            drop_non_numeric: false,
            frac_precision: default_frac_precision(),
        }
    }
}

pub struct Numeric {
    config: NumericConfig,
}

impl Numeric {
    pub fn new(config: &serde_yaml::Value) -> Self {
        Self {
            config: yaml_to_config(config),
        }
    }
}

impl FilterDriver for Numeric {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        let keys: Vec<String> = data.body.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            let Some(value) = data.get(&key) else { continue };
            match value.as_f64() {
                Some(n) => {
                    data.set(key, Scalar::Text(format!("{:.prec$}", n, prec = self.config.frac_precision)));
                }
                None => {
                    if self.config.drop_non_numeric {
                        data.remove(&key);
                    }
                }
            }
        }
        Some(data)
    }
}
