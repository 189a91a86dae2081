//! Parsing helpers for reading typed values out of the flat
//! `BTreeMap<String, String>` configuration interface (spec.md §6).

use crate::error::{IronError, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// A read-only view over a flat configuration map, with typed accessors
/// that fall back to a caller-supplied default and report parse failures
/// as `IronError::Config`.
pub struct ConfigMap<'a> {
    map: &'a BTreeMap<String, String>,
}

impl<'a> ConfigMap<'a> {
    pub fn new(map: &'a BTreeMap<String, String>) -> Self {
        ConfigMap { map }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.map.get(key) {
            Some(v) => v
                .parse()
                .map_err(|e| IronError::Config(format!("key {key}: {e}"))),
            None => Ok(default),
        }
    }

    pub fn get_duration_secs_or(&self, key: &str, default: Duration) -> Result<Duration> {
        match self.map.get(key) {
            Some(v) => {
                let secs: f64 = v
                    .parse()
                    .map_err(|e| IronError::Config(format!("key {key}: {e}")))?;
                Ok(Duration::from_secs_f64(secs))
            }
            None => Ok(default),
        }
    }
}
