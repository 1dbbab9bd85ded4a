//! `Exec` source driver (`spec.md §4.8`): run a configured command line,
//! capture its stdout as the RawData payload. A non-zero exit is a
//! transient fetch error.

use async_trait::async_trait;
use serde::Deserialize;
use statcollector_core::{yaml_to_config, FetchedBody, FetchedData, SourceDriver};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecConfig {
    command: String,
    args: Vec<String>,
}

pub struct Exec {
    config: ExecConfig,
}

impl Exec {
    pub fn new(config: &serde_yaml::Value) -> Self {
        Self {
            config: yaml_to_config(config),
        }
    }
}

#[async_trait(?Send)]
impl SourceDriver for Exec {
    async fn fetch(&self) -> Result<FetchedData, String> {
        let output = tokio::process::Command::new(&self.config.command)
            .args(&self.config.args)
            .output()
            .await
            .map_err(|e| format!("spawning `{}`: {e}", self.config.command))?;

        if !output.status.success() {
            return Err(format!(
                "`{}` exited with {}: {}",
                self.config.command,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(FetchedData {
            host: None,
            port: None,
            body: FetchedBody::Raw(output.stdout),
        })
    }
}
