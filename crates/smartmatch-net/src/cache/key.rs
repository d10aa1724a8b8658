//! Cache entry identity.

use std::fmt;

use serde_json::{Map, Value};

/// Identity of one cached root field.
///
/// `args` holds the canonical JSON text of the key-argument values: object
/// keys are sorted at every depth, so the order variables were supplied in
/// never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    field: String,
    args: String,
}

impl CacheKey {
    /// Key for `field` with the given argument values.
    pub fn new(field: impl Into<String>, args: &Map<String, Value>) -> Self {
        let mut canonical = String::new();
        if !args.is_empty() {
            write_canonical(&mut canonical, &Value::Object(args.clone()));
        }
        Self {
            field: field.into(),
            args: canonical,
        }
    }

    /// Key for `field` with no arguments.
    pub fn bare(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            args: String::new(),
        }
    }

    /// The root field's response key.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Canonical JSON of the key arguments, empty when there are none.
    pub fn args(&self) -> &str {
        &self.args
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            f.write_str(&self.field)
        } else {
            write!(f, "{}({})", self.field, self.args)
        }
    }
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(out, value);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
