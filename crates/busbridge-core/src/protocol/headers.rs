//! Multi-valued message headers.
//!
//! Clients send headers as a JSON object whose values are either a string or
//! an array of strings:
//!
//! ```json
//! {"trace-id": "abc", "accept": ["json", "text"]}
//! ```
//!
//! The bus side sees a plain multimap.  When headers travel back to the client
//! a single value is written as a string and several values as an array, so
//! the shape a client sent is the shape it receives.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// An ordered, multi-valued header map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the values stored under `name`.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(name.into()).or_default().push(value.into());
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value stored under `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    /// Builds headers from the client's JSON `headers` object.
    ///
    /// Strings are taken verbatim, arrays contribute one value per element,
    /// and any other JSON value is stored as its JSON text.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            match value {
                Value::String(s) => headers.add(name.clone(), s.clone()),
                Value::Array(items) => {
                    for item in items {
                        headers.add(name.clone(), json_text(item));
                    }
                }
                other => headers.add(name.clone(), json_text(other)),
            }
        }
        headers
    }

    /// Converts the headers into the JSON object sent to clients.
    pub fn to_json(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(name, values)| {
                let value = if values.len() == 1 {
                    Value::String(values[0].clone())
                } else {
                    Value::Array(values.iter().cloned().map(Value::String).collect())
                };
                (name.clone(), value)
            })
            .collect()
    }
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
