//! Header multimap used for stored exchanges
//!
//! Headers are kept as `name -> [values]` so repeated fields such as
//! `Set-Cookie` survive a round trip through storage in their original
//! order. Names are stored as given; lookups are case-insensitive.

use std::collections::BTreeMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Ordered header multimap, serialized as a JSON object of string arrays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMultimap(BTreeMap<String, Vec<String>>);

impl HeaderMultimap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot an `http::HeaderMap`, keeping every value of every name
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in headers.keys() {
            let values = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            map.insert(name.as_str().to_string(), values);
        }
        Self(map)
    }

    /// Parse the JSON column representation
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// First value for `name`, ignoring ASCII case
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// Append a value, creating the entry if needed
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        match self.key_for(name) {
            Some(key) => {
                if let Some(values) = self.0.get_mut(&key) {
                    values.push(value.into());
                }
            }
            None => {
                self.0.insert(name.to_string(), vec![value.into()]);
            }
        }
    }

    /// Replace every value of `name` with a single one
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let key = self.key_for(name).unwrap_or_else(|| name.to_string());
        self.0.insert(key, vec![value.into()]);
    }

    /// Remove `name` entirely, returning whether it was present
    pub fn remove(&mut self, name: &str) -> bool {
        match self.key_for(name) {
            Some(key) => self.0.remove(&key).is_some(),
            None => false,
        }
    }

    /// Iterate names with their ordered values
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Flatten into one `(name, value)` pair per value
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }

    fn key_for(&self, name: &str) -> Option<String> {
        self.0
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .cloned()
    }
}

impl From<BTreeMap<String, Vec<String>>> for HeaderMultimap {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self(map)
    }
}
