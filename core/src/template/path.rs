//! Field paths and nested lookup

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Dot-separated field path, with bracket-quoted segments already folded in
///
/// `size.width`, `["size"]["width"]` and `['size'].width` all produce the
/// segments `["size", "width"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Build a path, dropping empty segments
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments.into_iter().filter(|s| !s.is_empty()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk `root` one segment at a time.
    ///
    /// Returns `None` as soon as a node is missing or null. Objects are indexed
    /// by key, arrays by numeric segment. An empty path returns `root` itself.
    pub fn lookup<'a>(&self, root: &'a JsonValue) -> Option<&'a JsonValue> {
        let mut current = root;
        for segment in &self.0 {
            current = match current {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Like [`lookup`](Self::lookup), with a missing value reported as `null`
    pub fn resolve(&self, root: &JsonValue) -> JsonValue {
        self.lookup(root).cloned().unwrap_or(JsonValue::Null)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> FieldPath {
        FieldPath::new(segments.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_lookup_nested_object() {
        let row = json!({"size": {"width": 100, "height": 200}});
        assert_eq!(path(&["size", "width"]).resolve(&row), json!(100));
        assert_eq!(path(&["size"]).resolve(&row), json!({"width": 100, "height": 200}));
    }

    #[test]
    fn test_missing_intermediate_is_no_value() {
        let row = json!({"size": null});
        assert_eq!(path(&["size", "width"]).lookup(&row), None);
        assert_eq!(path(&["nope", "width"]).resolve(&row), JsonValue::Null);
    }

    #[test]
    fn test_scalar_intermediate_is_no_value() {
        let row = json!({"color": "red"});
        assert_eq!(path(&["color", "length"]).lookup(&row), None);
    }

    #[test]
    fn test_array_segments_are_indexes() {
        let row = json!({"tags": ["a", "b"]});
        assert_eq!(path(&["tags", "1"]).resolve(&row), json!("b"));
        assert_eq!(path(&["tags", "5"]).lookup(&row), None);
        assert_eq!(path(&["tags", "first"]).lookup(&row), None);
    }

    #[test]
    fn test_empty_path_returns_root() {
        let row = json!({"a": 1});
        assert_eq!(FieldPath::default().resolve(&row), row);
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        let p = path(&["", "a", "", "b"]);
        assert_eq!(p.segments(), &["a".to_string(), "b".to_string()]);
        assert_eq!(p.to_string(), "a.b");
    }
}
