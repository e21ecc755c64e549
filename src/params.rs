//! Nested parameter bags
//!
//! Effect parameters are stored as a JSON object tree and addressed by
//! dot-separated key paths (`"filter.frequency"`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Nested key -> value bag holding an effect's parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamBag(Map<String, Value>);

impl ParamBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a bag from an arbitrary JSON value
    ///
    /// Anything other than an object yields an empty bag.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::new(),
        }
    }

    /// Convert into a plain JSON value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Borrow as a JSON value tree
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a value by dot path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Look up a numeric value by dot path
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Write a value at a dot path
    ///
    /// Intermediate objects are created as needed; a non-object value sitting
    /// on an intermediate segment is replaced by an object.
    pub fn set(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        let (leaf, parents) = match segments.split_last() {
            Some(split) => split,
            None => return,
        };

        let mut current = &mut self.0;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            current = map;
        }
        current.insert(leaf.to_string(), value);
    }

    /// Whether a value exists at a dot path
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Dot paths of every leaf (non-object value), depth first in key order
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_leaves(&self.0, "", &mut paths);
        paths
    }

    /// Fill every leaf missing here from `defaults`, keeping existing values
    pub fn fill_from(&mut self, defaults: &ParamBag) {
        for path in defaults.leaf_paths() {
            if !self.contains(&path) {
                if let Some(value) = defaults.get(&path) {
                    self.set(&path, value.clone());
                }
            }
        }
    }
}

fn collect_leaves(map: &Map<String, Value>, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(child) => collect_leaves(child, &path, out),
            _ => out.push(path),
        }
    }
}

impl From<Value> for ParamBag {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested() {
        let bag = ParamBag::from(json!({
            "filter": { "frequency": 1000.0, "type": "lowpass" },
            "wet": 0.5
        }));

        assert_eq!(bag.get_f64("filter.frequency"), Some(1000.0));
        assert_eq!(bag.get("filter.type"), Some(&json!("lowpass")));
        assert_eq!(bag.get_f64("wet"), Some(0.5));
        assert!(bag.get("filter.q").is_none());
        assert!(bag.get("wet.deeper").is_none());
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut bag = ParamBag::new();
        bag.set("filter.frequency", json!(440.0));
        bag.set("filter.q", json!(0.7));

        assert_eq!(bag.into_value(), json!({"filter": {"frequency": 440.0, "q": 0.7}}));
    }

    #[test]
    fn test_set_replaces_leaf_on_intermediate() {
        let mut bag = ParamBag::from(json!({"filter": 3}));
        bag.set("filter.frequency", json!(200.0));
        assert_eq!(bag.get_f64("filter.frequency"), Some(200.0));
    }

    #[test]
    fn test_leaf_paths_and_fill() {
        let defaults = ParamBag::from(json!({
            "filter": { "frequency": 1000.0, "q": 0.707 },
            "wet": 1.0
        }));
        let mut partial = ParamBag::from(json!({"filter": {"q": 2.0}}));
        partial.fill_from(&defaults);

        assert_eq!(partial.get_f64("filter.q"), Some(2.0));
        assert_eq!(partial.get_f64("filter.frequency"), Some(1000.0));
        assert_eq!(partial.get_f64("wet"), Some(1.0));

        let mut paths = defaults.leaf_paths();
        paths.sort();
        assert_eq!(paths, vec!["filter.frequency", "filter.q", "wet"]);
    }

    #[test]
    fn test_non_object_value_is_empty() {
        assert!(ParamBag::from_value(json!([1, 2, 3])).is_empty());
    }
}
