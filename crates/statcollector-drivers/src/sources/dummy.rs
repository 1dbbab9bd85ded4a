//! `Dummy` source driver (`spec.md §4.8`): succeeds after a configurable
//! delay with fixed content. Mirrors the `DUMMY` storage driver; used to
//! exercise the Source state machine end-to-end without real I/O.

use async_trait::async_trait;
use serde::Deserialize;
use statcollector_core::{yaml_to_config, FetchedBody, FetchedData, SourceDriver};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DummyConfig {
    delay_ms: u64,
    content: String,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            delay_ms: 0,
            content: String::new(),
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
impl SourceDriver for Dummy {
    async fn fetch(&self) -> Result<FetchedData, String> {
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }
        Ok(FetchedData {
            host: None,
            port: None,
            body: FetchedBody::Raw(self.config.content.clone().into_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_the_configured_content() {
        let dummy = Dummy {
            config: DummyConfig {
                delay_ms: 0,
                content: "cpu_usage: 1.0".to_string(),
            },
        };
        let data = dummy.fetch().await.unwrap();
        match data.body {
            FetchedBody::Raw(bytes) => assert_eq!(bytes, b"cpu_usage: 1.0"),
            FetchedBody::Parsed(_) => panic!("Dummy must emit Raw bodies"),
        }
    }
}
