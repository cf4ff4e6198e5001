//! Sealed configuration store.
//!
//! Enhancers declare the config keys they need while the adapter is being
//! constructed. Once construction finishes the store is sealed: keys declared
//! up to that point stay writable forever, and any other key is rejected.
//!
//! ```text
//! construction ──► set_config("a", ..)  ok
//!                  set_config("b", ..)  ok
//! seal()       ──► set_config("a", ..)  ok   (declared before seal)
//!                  set_config("c", ..)  Err(ConfigSealed)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// A config value: string, number, boolean or null.
///
/// An unset key reads as `None`; there is no separate "undefined" value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// JSON `null`.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Any number.
    Number(f64),
    /// Text.
    String(String),
}

impl ConfigValue {
    /// The string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean value, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, ConfigValue::Null)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Null => write!(f, "null"),
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Number(n) => write!(f, "{}", n),
            ConfigValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Number(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Number(f64::from(value))
    }
}

impl From<u32> for ConfigValue {
    fn from(value: u32) -> Self {
        ConfigValue::Number(f64::from(value))
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Number(value as f64)
    }
}

impl From<u64> for ConfigValue {
    fn from(value: u64) -> Self {
        ConfigValue::Number(value as f64)
    }
}

impl From<usize> for ConfigValue {
    fn from(value: usize) -> Self {
        ConfigValue::Number(value as f64)
    }
}

impl From<()> for ConfigValue {
    fn from(_: ()) -> Self {
        ConfigValue::Null
    }
}

impl<T: Into<ConfigValue>> From<Option<T>> for ConfigValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ConfigValue::Null)
    }
}

/// Key/value store with a one-way seal.
#[derive(Default)]
pub(crate) struct ConfigStore {
    values: Mutex<HashMap<String, ConfigValue>>,
    sealed: AtomicBool,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    /// Write `value` under `key`.
    ///
    /// After [`seal`](Self::seal), only keys already present may be written.
    pub fn set(&self, key: &str, value: ConfigValue) -> Result<(), AdapterError> {
        let mut values = self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(slot) = values.get_mut(key) {
            *slot = value;
            return Ok(());
        }

        if self.is_sealed() {
            return Err(AdapterError::ConfigSealed {
                key: key.to_string(),
            });
        }

        values.insert(key.to_string(), value);
        Ok(())
    }

    /// Freeze the key set. Irreversible.
    pub fn seal(&self) {
        // Taken under the values lock so a concurrent `set` sees a consistent key set.
        let _values = self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Sorted list of declared keys.
    pub fn keys(&self) -> Vec<String> {
        let values = self
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut keys: Vec<String> = values.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("keys", &self.keys())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
