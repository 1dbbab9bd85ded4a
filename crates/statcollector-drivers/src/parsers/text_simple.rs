//! `TextSimple` parser (`spec.md §4.2`, the mandatory `DEFAULT` driver).

use statcollector_core::ParserDriver;
use statcollector_types::{RawData, Scalar};

pub struct TextSimple;

impl ParserDriver for TextSimple {
    fn parse(&self, raw: &RawData) -> Result<Vec<(String, Scalar)>, String> {
        let text = String::from_utf8_lossy(&raw.content);
        let body: Vec<(String, Scalar)> = text
            .lines()
            .filter_map(|line| {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let (key, value) = trimmed
                    .split_once(':')
                    .or_else(|| trimmed.split_once('='))?;
                Some((key.trim().to_string(), parse_scalar(value.trim())))
            })
            .collect();
        Ok(body)
    }
}

fn parse_scalar(text: &str) -> Scalar {
    match text.parse::<f64>() {
        Ok(n) => Scalar::Number(n),
        Err(_) => Scalar::Text(text.to_string()),
    }
}
