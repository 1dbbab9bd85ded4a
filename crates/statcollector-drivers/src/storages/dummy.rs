//! `DUMMY` storage (`spec.md §4.5`): sleeps a random delay up to `maxDelay`,
//! then randomly succeeds or fails. Reference/test driver, not meant for
//! production traffic.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use statcollector_core::{yaml_to_config, StorageDriver, StoreOutcome};
use statcollector_types::ParsedData;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DummyConfig {
    max_delay_ms: u64,
    /// Probability in `[0, 1]` that a given store call succeeds.
    success: f64,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: 0,
            success: 1.0,
        }
    }
}

pub struct Dummy {
    config: DummyConfig,
}

impl Dummy {
    pub fn new(config: &serde_yaml::Value) -> Self {
        Self {
            config: yaml_to_config(config),
        }
    }
}

#[async_trait(?Send)]
impl StorageDriver for Dummy {
    async fn store(&self, record: &ParsedData) -> Result<StoreOutcome, String> {
        if self.config.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=self.config.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if rand::thread_rng().gen_bool(self.config.success.clamp(0.0, 1.0)) {
            Ok(StoreOutcome::ok(record.body.len() as u64))
        } else {
            Err("dummy storage simulated failure".to_string())
        }
    }
}
