//! Construction options.
//!
//! `AdapterOptions` is opaque to the core: it is handed unchanged to the base
//! factory and to every enhancer, which read whatever keys they understand.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque JSON object passed through the enhancer chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterOptions {
    values: Map<String, Value>,
}

impl AdapterOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON object string.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Raw JSON value under `key`.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed value under `key`.
    ///
    /// Returns `None` if the key is missing or does not deserialize as `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| T::deserialize(value).ok())
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Map<String, Value>> for AdapterOptions {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_get() {
        let options = AdapterOptions::new()
            .with("endpoint", "wss://example.test/chat")
            .with("poll_ms", 500)
            .with("verbose", true);

        assert_eq!(
            options.get::<String>("endpoint").as_deref(),
            Some("wss://example.test/chat")
        );
        assert_eq!(options.get::<u64>("poll_ms"), Some(500));
        assert_eq!(options.get::<bool>("verbose"), Some(true));
        assert_eq!(options.get::<u64>("endpoint"), None);
        assert_eq!(options.get::<u64>("missing"), None);
    }

    #[test]
    fn test_from_json_str() {
        let options = AdapterOptions::from_json_str(r#"{"user":{"id":"u1"}}"#).unwrap();
        assert!(options.contains("user"));
        assert_eq!(options.raw("user"), Some(&json!({"id": "u1"})));
    }

    #[test]
    fn test_non_object_json_rejected() {
        assert!(AdapterOptions::from_json_str("[1,2]").is_err());
    }

    #[test]
    fn test_serialize_round_trip_is_transparent() {
        let options = AdapterOptions::new().with("a", 1);
        assert_eq!(serde_json::to_value(&options).unwrap(), json!({"a": 1}));
        assert!(AdapterOptions::new().is_empty());
    }
}
