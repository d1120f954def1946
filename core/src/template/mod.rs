//! # Template expressions
//!
//! Maps a row set onto derived JSON structures, typically chart or report
//! configuration. Expressions live in strings wrapped in `{{ }}`:
//!
//! | Template                                  | Result                            |
//! |-------------------------------------------|-----------------------------------|
//! | `"{{ $data[n].style }}"`                  | `["s1", "s2", ...]`               |
//! | `"{{ $data[0].color }}"`                  | `"red"`                           |
//! | `"{{ $data[0]["color"] }}"`               | `"red"`                           |
//! | `"{{ name:$data[n].style, c:$data[n].color }}"` | `[{name, c}, ...]`          |
//! | `["{{ $data[n].qty }}"]`                  | `[150, 280, ...]` (array sugar)   |
//!
//! Strings, lists and maps are walked recursively. Anything that is not an
//! expression comes back untouched, and an expression that cannot be resolved
//! comes back as the original string. [`Evaluator::exec`] never fails.
//!
//! # Example
//!
//! ```
//! use rowexpr_core::template::Evaluator;
//! use serde_json::json;
//!
//! let evaluator = Evaluator::new(json!([{"qty": 1}, {"qty": 2}]));
//! let chart = evaluator.exec(&json!({"type": "bar", "data": ["{{ $data[n].qty }}"]}));
//! assert_eq!(chart, json!({"type": "bar", "data": [1, 2]}));
//! ```

pub mod parser;
pub mod path;


pub use parser::{
    split_delimiters, Expr, MappingEntry, ParseError, ParseResult, Rows, Span, ALL_ROWS_MARKER,
    DATA_TOKEN,
};
pub use path::FieldPath;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

/// Template evaluator bound to one data context
///
/// The context is either a list of rows or a single record. A single record
/// behaves as a one-row list; any other value behaves as an empty list.
#[derive(Debug, Clone)]
pub struct Evaluator {
    data: JsonValue,
}

impl Evaluator {
    pub fn new(data: JsonValue) -> Self {
        Self { data }
    }

    /// The bound context
    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    /// Rows of the context as a slice
    pub fn rows(&self) -> &[JsonValue] {
        match &self.data {
            JsonValue::Array(rows) => rows,
            JsonValue::Object(_) => std::slice::from_ref(&self.data),
            _ => &[],
        }
    }

    /// Evaluate a template value
    pub fn exec(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(source) => self.exec_str(source),
            JsonValue::Array(items) => self.exec_array(items),
            JsonValue::Object(map) => self.exec_object(map),
            other => other.clone(),
        }
    }

    /// Evaluate a single template string
    pub fn exec_str(&self, source: &str) -> JsonValue {
        let Some(interior) = split_delimiters(source) else {
            return passthrough(source);
        };
        if !interior.contains(DATA_TOKEN) {
            return passthrough(source);
        }

        match Expr::parse(interior) {
            Ok(expr) => self.resolve(&expr).unwrap_or_else(|| {
                debug!(expression = source, "row index out of range, passing through");
                passthrough(source)
            }),
            Err(error) => {
                warn!(expression = source, error = %error, "Failed to parse template expression");
                passthrough(source)
            }
        }
    }

    /// Resolve a parsed expression against the context.
    ///
    /// Returns `None` only when a row index is out of range.
    pub fn resolve(&self, expr: &Expr) -> Option<JsonValue> {
        match expr {
            Expr::Access {
                rows: Rows::All,
                path,
            } => Some(JsonValue::Array(
                self.rows().iter().map(|row| path.resolve(row)).collect(),
            )),
            Expr::Access {
                rows: Rows::Index { index },
                path,
            } => match self.rows().get(*index) {
                None | Some(JsonValue::Null) => None,
                Some(row) => Some(path.resolve(row)),
            },
            Expr::Mapping { entries } => Some(JsonValue::Array(
                self.rows()
                    .iter()
                    .map(|row| map_row(entries, row))
                    .collect(),
            )),
        }
    }

    fn exec_array(&self, items: &[JsonValue]) -> JsonValue {
        match items {
            [JsonValue::String(source)] if source.contains(ALL_ROWS_MARKER) => {
                self.expand_sugar(source)
            }
            _ => JsonValue::Array(items.iter().map(|item| self.exec(item)).collect()),
        }
    }

    fn exec_object(&self, map: &Map<String, JsonValue>) -> JsonValue {
        // Property values go through exec_array, which applies the array sugar.
        JsonValue::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), self.exec(value)))
                .collect(),
        )
    }

    /// `["{{ $data[n].x }}"]` evaluates to the row list itself, not a list
    /// wrapping it. Anything else the expression yields stays wrapped, so a
    /// failed expression comes back as `[original]`.
    fn expand_sugar(&self, source: &str) -> JsonValue {
        match self.exec_str(source) {
            rows @ JsonValue::Array(_) => rows,
            other => JsonValue::Array(vec![other]),
        }
    }
}

fn map_row(entries: &[MappingEntry], row: &JsonValue) -> JsonValue {
    JsonValue::Object(
        entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.path.resolve(row)))
            .collect(),
    )
}

fn passthrough(source: &str) -> JsonValue {
    JsonValue::String(source.to_string())
}
