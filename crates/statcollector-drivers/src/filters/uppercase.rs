//! `UpperCase` filter (`spec.md §4.3`).

use statcollector_core::{FilterContext, FilterDriver};
use statcollector_types::ParsedData;

pub struct UpperCase;

impl FilterDriver for UpperCase {
    fn filter_body(&self, mut data: ParsedData, _ctx: &FilterContext) -> Option<ParsedData> {
        data.rename_keys(|key| Some(key.to_uppercase()));
        Some(data)
    }
}
