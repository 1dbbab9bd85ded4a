//! `Haproxy` parser (`spec.md §4.2`): HAProxy CSV stats into hierarchical keys
//! of the form `haproxy.<frontend|backend>[<proxy>,<node>,<metric>]`.
//!
//! HAProxy's `stats socket`/`;csv` output already carries one aggregate row
//! per proxy for `FRONTEND` and `BACKEND` (individual server rows are a third
//! `svname`); those two aggregate row kinds are what get keys here, which is
//! what "aggregating totals" means in practice — per-server rows are not
//! individually emitted.

use statcollector_core::ParserDriver;
use statcollector_types::{RawData, Scalar};

pub struct Haproxy;

impl ParserDriver for Haproxy {
    fn parse(&self, raw: &RawData) -> Result<Vec<(String, Scalar)>, String> {
        let text = String::from_utf8_lossy(&raw.content);
        let mut lines = text.lines();
        let header_line = lines.next().ok_or("empty HAProxy CSV payload")?;
        let header = header_line.trim_start_matches('#').trim_start().split(',').collect::<Vec<_>>();

        let pxname_idx = header.iter().position(|h| *h == "pxname").ok_or("missing pxname column")?;
        let svname_idx = header.iter().position(|h| *h == "svname").ok_or("missing svname column")?;
        let node = raw.host.clone().unwrap_or_else(|| "unknown".to_string());

        let mut body = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(',').collect();
            let Some(svname) = fields.get(svname_idx) else { continue };
            let kind = match *svname {
                "FRONTEND" => "frontend",
                "BACKEND" => "backend",
                _ => continue, // individual server rows are not emitted
            };
            let Some(proxy) = fields.get(pxname_idx) else { continue };

            for (i, metric_name) in header.iter().enumerate() {
                if i == pxname_idx || i == svname_idx {
                    continue;
                }
                let Some(raw_value) = fields.get(i) else { continue };
                if raw_value.is_empty() {
                    continue;
                }
                let key = format!("haproxy.{kind}[{proxy},{node},{metric_name}]");
                let value = match raw_value.parse::<f64>() {
                    Ok(n) => Scalar::Number(n),
                    Err(_) => Scalar::Text(raw_value.to_string()),
                };
                body.push((key, value));
            }
        }
        Ok(body)
    }
}
