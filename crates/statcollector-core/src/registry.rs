//! Insertion-ordered, name-keyed registry shared by the Dispatcher's four
//! stage registries (`spec.md §3.1`, §9's "named registries with
//! replace-on-duplicate").

use indexmap::IndexMap;
use log::warn;

pub struct Registry<T> {
    kind: &'static str,
    entries: IndexMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: IndexMap::new(),
        }
    }

    /// Inserts `value` under `name`. A duplicate name replaces the previous
    /// entry and logs a warning, per `spec.md §4.1`/§9 — it never errors.
    pub fn insert(&mut self, name: impl Into<String>, value: T) {
        let name = name.into();
        if self.entries.contains_key(&name) {
            warn!("{} `{}` already registered, replacing", self.kind, name);
        }
        self.entries.insert(name, value);
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.entries.shift_remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_replaces_value() {
        let mut reg: Registry<i32> = Registry::new("parser");
        reg.insert("a", 1);
        reg.insert("a", 2);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("a"), Some(&2));
    }

    #[test]
    fn names_are_injective() {
        let mut reg: Registry<i32> = Registry::new("storage");
        reg.insert("a", 1);
        reg.insert("b", 2);
        let names: Vec<_> = reg.names().collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names.len(), sorted.len());
    }

    #[test]
    fn remove_then_get_is_none() {
        let mut reg: Registry<i32> = Registry::new("filter");
        reg.insert("a", 1);
        assert_eq!(reg.remove("a"), Some(1));
        assert_eq!(reg.get("a"), None);
    }
}
