//! Translation tables used by the translate family of computes.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Key looked up when a value has no entry of its own.
pub const DEFAULT_KEY: &str = "default";

/// A case-insensitive lookup table. Keys are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranslationTable(HashMap<String, String>);

impl TranslationTable {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
                .collect(),
        )
    }

    /// Exact (case-insensitive) lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Lookup of a trimmed value, falling back to the `default` entry.
    pub fn translate(&self, value: &str) -> Option<&str> {
        self.get(value.trim()).or_else(|| self.get(DEFAULT_KEY))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for TranslationTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = HashMap::<String, String>::deserialize(deserializer)?;
        Ok(Self::new(entries))
    }
}

/// A translation table given inline or by name in the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslationRef {
    Named(String),
    Inline(TranslationTable),
}
