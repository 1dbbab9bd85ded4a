//! `Stack` filter (`spec.md §4.3`): apply an ordered list of other filters,
//! referenced by name in the Dispatcher's filter registry.

use serde::Deserialize;
use statcollector_core::{yaml_to_config, FilterContext, FilterDriver};
use statcollector_types::ParsedData;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StackConfig {
    filters: Vec<String>,
}

pub struct Stack {
    filters: Vec<String>,
}

impl Stack {
    pub fn new(config: &serde_yaml::Value) -> Self {
        let parsed: StackConfig = yaml_to_config(config);
        Self {
            filters: parsed.filters,
        }
    }
}

impl FilterDriver for Stack {
    fn filter_body(&self, mut data: ParsedData, ctx: &FilterContext) -> Option<ParsedData> {
        for name in &self.filters {
            data = ctx.apply_named(name, data)?;
        }
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::SystemTime;
    use statcollector_core::{Filter, Registry};
    use statcollector_types::{RawData, Scalar};

    use super::super::uppercase::UpperCase;

    #[test]
    fn applies_named_filters_in_order() {
        let registry = Rc::new(RefCell::new(Registry::new("filter")));
        registry
            .borrow_mut()
            .insert("upper", Rc::new(RefCell::new(Filter::new("upper", "UpperCase", Box::new(UpperCase)))));
        let ctx = FilterContext::new(registry);
        let stack = Stack {
            filters: vec!["upper".into()],
        };
        let data = RawData::new("d", "u", None, None, SystemTime::now(), SystemTime::now(), vec![])
            .into_parsed(vec![("cpu".into(), Scalar::Number(1.0))]);
        let result = stack.filter_body(data, &ctx).unwrap();
        assert_eq!(result.get("CPU"), Some(&Scalar::Number(1.0)));
    }
}
