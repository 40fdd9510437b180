//! Header carriers for OpenTelemetry text-map propagation.
//!
//! Propagators only speak `get`/`set`/`keys`. [`TableCarrier`] writes into a
//! caller-owned [`FieldTable`]; [`TableExtractor`] reads from one. Neither
//! interprets trace semantics.

use std::borrow::Cow;
use std::collections::BTreeMap;

use opentelemetry::propagation::{Extractor, Injector};

use crate::broker::{FieldTable, FieldValue};

/// Mutable view over a header table.
pub struct TableCarrier<'a> {
    table: &'a mut FieldTable,
}

impl<'a> TableCarrier<'a> {
    pub fn new(table: &'a mut FieldTable) -> Self {
        Self { table }
    }

    /// Header value as a string; non-string values are stringified, absent
    /// keys yield an empty string.
    pub fn get(&self, key: &str) -> String {
        self.table
            .get(key)
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    pub fn set(&mut self, key: &str, value: String) {
        self.table.insert(key.to_string(), FieldValue::String(value));
    }

    pub fn keys(&self) -> Vec<&str> {
        self.table.keys().map(String::as_str).collect()
    }
}

impl Injector for TableCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        TableCarrier::set(self, key, value);
    }
}

/// Read-only view over a header table with every value stringified up front.
pub struct TableExtractor<'a> {
    values: BTreeMap<&'a str, Cow<'a, str>>,
}

impl<'a> TableExtractor<'a> {
    pub fn new(table: &'a FieldTable) -> Self {
        let values = table
            .iter()
            .map(|(key, value)| {
                let text = match value {
                    FieldValue::String(s) => Cow::Borrowed(s.as_str()),
                    other => Cow::Owned(other.to_string()),
                };
                (key.as_str(), text)
            })
            .collect();
        Self { values }
    }
}

impl Extractor for TableExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|value| value.as_ref())
    }

    fn keys(&self) -> Vec<&str> {
        self.values.keys().copied().collect()
    }
}
