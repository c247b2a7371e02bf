//! Request-scoped context threaded through the extension pipeline.
//!
//! A [`Context`] is created once per collection request and handed to every
//! extension by `&mut`, so later stages observe what earlier ones recorded.
//! It carries two things:
//! - the request filter parameters, in the order the client sent them
//! - free-form attributes accumulated by extensions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A raw filter parameter value as sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// `price=12`
    Single(String),
    /// `price[]=12&price[]=13`
    List(Vec<String>),
    /// `price[gt]=12`
    Map(BTreeMap<String, String>),
}

impl FilterValue {
    /// The scalar value, if this is a single value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FilterValue::Single(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Single(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Single(value)
    }
}

/// Per-request key-value state shared across pipeline stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    filters: Vec<(String, FilterValue)>,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a URL query string (without the leading `?`).
    ///
    /// `k=v` is a single value, `k[]=v` appends to a list and `k[op]=v` sets a
    /// map entry. A repeated plain key keeps the last value.
    pub fn from_query(query: &str) -> Self {
        let mut context = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            context.push_query_pair(&key, value.into_owned());
        }
        context
    }

    fn push_query_pair(&mut self, key: &str, value: String) {
        let Some((name, rest)) = key.split_once('[') else {
            self.set_filter(key, FilterValue::Single(value));
            return;
        };
        let Some(sub_key) = rest.strip_suffix(']') else {
            self.set_filter(key, FilterValue::Single(value));
            return;
        };

        if sub_key.is_empty() {
            match self.filter_mut(name) {
                Some(FilterValue::List(items)) => items.push(value),
                _ => self.set_filter(name, FilterValue::List(vec![value])),
            }
        } else {
            match self.filter_mut(name) {
                Some(FilterValue::Map(entries)) => {
                    entries.insert(sub_key.to_string(), value);
                }
                _ => {
                    let mut entries = BTreeMap::new();
                    entries.insert(sub_key.to_string(), value);
                    self.set_filter(name, FilterValue::Map(entries));
                }
            }
        }
    }

    /// Add a filter parameter, builder style.
    pub fn with_filter(mut self, name: &str, value: impl Into<FilterValue>) -> Self {
        self.set_filter(name, value.into());
        self
    }

    /// Set a filter parameter, replacing any previous value in place.
    pub fn set_filter(&mut self, name: &str, value: FilterValue) {
        match self.filter_mut(name) {
            Some(existing) => *existing = value,
            None => self.filters.push((name.to_string(), value)),
        }
    }

    fn filter_mut(&mut self, name: &str) -> Option<&mut FilterValue> {
        self.filters
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// All filter parameters, in request order.
    pub fn filters(&self) -> &[(String, FilterValue)] {
        &self.filters
    }

    /// Look up a filter parameter by name.
    pub fn filter(&self, name: &str) -> Option<&FilterValue> {
        self.filters
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Record an attribute for later stages.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.insert(key.into(), value);
    }

    /// Read an attribute recorded by an earlier stage.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// All recorded attributes.
    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }
}
