//! `Zabbix` storage (`spec.md §4.5`/§6.2): emit records to a Zabbix trapper
//! in one of two submodes.
//!
//! `sender` shells out to the `zabbix_sender` binary against a temporary
//! tab-separated file; `tcp` speaks the `ZBXD` framing directly. Both share
//! the same `Processed N Failed M Total T` success criterion: the record
//! counts as delivered once `N >= 1` (`spec.md §9` Open Question #2 keeps
//! this rather than tightening to `Failed == 0`, so a partially-accepted
//! multi-key record still counts as a store success; `Failed > 0` is logged
//! as a warning without changing the verdict).

use std::cell::Cell;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use statcollector_core::{yaml_to_config, StorageDriver, StoreOutcome};
use statcollector_types::ParsedData;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

static INFO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Processed\s+(\d+).*?Failed\s+(\d+).*?Total\s+(\d+)").unwrap()
});
static RESPONSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""response"\s*:\s*"(\w+)""#).unwrap());

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Mode {
    Sender,
    Tcp,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ZabbixConfig {
    mode: Mode,
    zabbix_sender_path: String,
    concurrency: u32,
    queue_interval_secs: u64,
    zabbix_server: String,
    zabbix_server_port: u16,
}

impl Default for ZabbixConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Sender,
            zabbix_sender_path: "zabbix_sender".to_string(),
            concurrency: 4,
            queue_interval_secs: 1,
            zabbix_server: "localhost".to_string(),
            zabbix_server_port: 10051,
        }
    }
}

struct DnsCache {
    resolved: Cell<Option<(IpAddr, Instant)>>,
}

const DNS_TTL: Duration = Duration::from_secs(600);

impl DnsCache {
    fn new() -> Self {
        Self {
            resolved: Cell::new(None),
        }
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<IpAddr, String> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        if let Some((ip, at)) = self.resolved.get() {
            if at.elapsed() < DNS_TTL {
                return Ok(ip);
            }
        }
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| format!("dns lookup of {host} failed: {e}"))?
            .next()
            .ok_or_else(|| format!("dns lookup of {host} returned no addresses"))?;
        self.resolved.set(Some((addr.ip(), Instant::now())));
        Ok(addr.ip())
    }
}

/// Caps the number of in-flight deliveries at `concurrency`, polling every
/// `queueInterval` while the cap is full (`spec.md §4.5`).
struct ConcurrencyGate {
    in_flight: Rc<Cell<u32>>,
    limit: u32,
    poll_interval: Duration,
}

impl ConcurrencyGate {
    async fn acquire(&self) {
        loop {
            if self.in_flight.get() < self.limit {
                self.in_flight.set(self.in_flight.get() + 1);
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn release(&self) {
        self.in_flight.set(self.in_flight.get().saturating_sub(1));
    }
}

pub struct Zabbix {
    config: ZabbixConfig,
    gate: ConcurrencyGate,
    dns: DnsCache,
}

impl Zabbix {
    pub fn new(config: &serde_yaml::Value) -> Self {
        let config: ZabbixConfig = yaml_to_config(config);
        let gate = ConcurrencyGate {
            in_flight: Rc::new(Cell::new(0)),
            limit: config.concurrency.max(1),
            poll_interval: Duration::from_secs(config.queue_interval_secs.max(1)),
        };
        Self {
            config,
            gate,
            dns: DnsCache::new(),
        }
    }

    fn clock(record: &ParsedData) -> u64 {
        record
            .fetch_done_time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn host(record: &ParsedData) -> String {
        record.host.clone().unwrap_or_else(|| record.url.clone())
    }

    fn parse_info(info: &str) -> Option<(u64, u64, u64)> {
        let caps = INFO_RE.captures(info)?;
        Some((
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        ))
    }

    fn verdict(processed: u64, failed: u64, record: &ParsedData) -> Result<StoreOutcome, String> {
        if failed > 0 {
            warn!(
                "zabbix storage: fetch {} partially failed (processed={processed} failed={failed})",
                record.id
            );
        }
        if processed >= 1 {
            Ok(StoreOutcome::ok(processed))
        } else {
            Err(format!("zabbix reported 0 processed (failed={failed})"))
        }
    }

    async fn store_sender(&self, record: &ParsedData) -> Result<StoreOutcome, String> {
        let host = Self::host(record);
        let clock = Self::clock(record);
        let mut body = String::new();
        for (key, value) in &record.body {
            body.push_str(&format!("{host}\t{key}\t{clock}\t{value}\n"));
        }

        let file = tempfile::NamedTempFile::new().map_err(|e| format!("tempfile: {e}"))?;
        tokio::fs::write(file.path(), body.as_bytes())
            .await
            .map_err(|e| format!("writing sender input: {e}"))?;

        let output = tokio::process::Command::new(&self.config.zabbix_sender_path)
            .arg("-i")
            .arg(file.path())
            .arg("-T")
            .output()
            .await
            .map_err(|e| format!("spawning zabbix_sender: {e}"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (processed, failed, _total) =
            Self::parse_info(&stdout).ok_or_else(|| format!("unparseable zabbix_sender output: {stdout}"))?;
        Self::verdict(processed, failed, record)
    }

    async fn store_tcp(&self, record: &ParsedData) -> Result<StoreOutcome, String> {
        let host = Self::host(record);
        let clock = Self::clock(record);
        let data: Vec<serde_json::Value> = record
            .body
            .iter()
            .map(|(key, value)| {
                serde_json::json!({"host": host, "key": key, "value": value.to_string(), "clock": clock})
            })
            .collect();
        let payload = serde_json::json!({"request": "sender data", "data": data, "clock": clock});
        let json = serde_json::to_vec(&payload).map_err(|e| format!("encoding zabbix payload: {e}"))?;

        let mut frame = Vec::with_capacity(13 + json.len());
        frame.extend_from_slice(b"ZBXD\x01");
        frame.extend_from_slice(&(json.len() as u64).to_le_bytes());
        frame.extend_from_slice(&json);

        let ip = self
            .dns
            .resolve(&self.config.zabbix_server, self.config.zabbix_server_port)
            .await?;
        let mut stream = TcpStream::connect((ip, self.config.zabbix_server_port))
            .await
            .map_err(|e| format!("connecting to zabbix server: {e}"))?;
        stream
            .write_all(&frame)
            .await
            .map_err(|e| format!("writing zabbix frame: {e}"))?;

        let mut header = [0u8; 13];
        stream
            .read_exact(&mut header)
            .await
            .map_err(|e| format!("reading zabbix response header: {e}"))?;
        let len = u64::from_le_bytes(header[5..13].try_into().unwrap()) as usize;
        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| format!("reading zabbix response body: {e}"))?;
        let text = String::from_utf8_lossy(&body);

        let response = RESPONSE_RE
            .captures(&text)
            .map(|c| c[1].to_string())
            .ok_or_else(|| format!("unparseable zabbix response: {text}"))?;
        if response != "success" {
            return Err(format!("zabbix server reported response=`{response}`: {text}"));
        }
        let (processed, failed, _total) =
            Self::parse_info(&text).ok_or_else(|| format!("zabbix response missing info line: {text}"))?;
        Self::verdict(processed, failed, record)
    }
}

#[async_trait(?Send)]
impl StorageDriver for Zabbix {
    async fn store(&self, record: &ParsedData) -> Result<StoreOutcome, String> {
        self.gate.acquire().await;
        let result = match self.config.mode {
            Mode::Sender => self.store_sender(record).await,
            Mode::Tcp => self.store_tcp(record).await,
        };
        self.gate.release();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_info_line() {
        let (p, f, t) = Zabbix::parse_info("info: Processed 2 Failed 0 Total 2 in 0.000123 sec").unwrap();
        assert_eq!((p, f, t), (2, 0, 2));
    }

    #[test]
    fn info_regex_tolerates_the_seconds_trailer() {
        assert!(INFO_RE.is_match("Processed 0; Failed 1; Total 1"));
    }

    #[test]
    fn response_regex_extracts_success() {
        let caps = RESPONSE_RE.captures(r#"{"response":"success","info":"..."}"#).unwrap();
        assert_eq!(&caps[1], "success");
    }

    #[test]
    fn processed_at_least_one_is_success_even_with_partial_failure() {
        let record = sample();
        let outcome = Zabbix::verdict(1, 1, &record).unwrap();
        assert_eq!(outcome.num_stored_keys, Some(1));
    }

    #[test]
    fn zero_processed_is_failure() {
        let record = sample();
        assert!(Zabbix::verdict(0, 1, &record).is_err());
    }

    #[test]
    fn tcp_frame_layout_matches_the_wire_format() {
        let json = br#"{"a":1}"#.to_vec();
        let mut frame = Vec::new();
        frame.extend_from_slice(b"ZBXD\x01");
        frame.extend_from_slice(&(json.len() as u64).to_le_bytes());
        frame.extend_from_slice(&json);
        assert_eq!(&frame[0..4], b"ZBXD");
        assert_eq!(frame[4], 0x01);
        let len = u64::from_le_bytes(frame[5..13].try_into().unwrap());
        assert_eq!(len as usize, json.len());
        assert_eq!(&frame[13..], &json[..]);
    }

    fn sample() -> ParsedData {
        statcollector_types::RawData::new("d", "u", None, None, SystemTime::now(), SystemTime::now(), vec![])
            .into_parsed(vec![])
    }
}
