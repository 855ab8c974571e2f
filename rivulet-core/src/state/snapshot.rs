//! Registry snapshots.
//!
//! A [`Snapshot`] maps stream names to their state as JSON values, in
//! registration order. It round-trips through JSON and MessagePack so
//! states can be stored by external tooling and used to seed
//! [`Registry::start_all`](super::Registry::start_all).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(IndexMap<String, Value>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw state stored for `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, state: Value) {
        self.0.insert(name.into(), state);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, state: Value) -> Self {
        self.insert(name, state);
        self
    }

    /// Decode the state stored under `name`.
    pub fn decode<S: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Option<S>> {
        self.0
            .get(name)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pretty-printed JSON. Names keep their insertion order.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// MessagePack encoding, keyed by name.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl FromIterator<(String, Value)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
