//! Named property bags used to configure strategies.

use crate::error::ConfigError;
use anyhow::Result;
use toml::{Table, Value};

/// Validated properties of one strategy instance.
///
/// Every strategy declares the keys it requires and the keys it accepts
/// optionally; [`PropertySet::declare`] checks a raw table against them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    strategy: String,
    table: Table,
}

impl PropertySet {
    pub fn new(strategy: impl Into<String>, table: Table) -> Self {
        Self {
            strategy: strategy.into(),
            table,
        }
    }

    /// Build a property set from literal key/value pairs.
    pub fn from_pairs<V: Into<Value>>(
        strategy: &str,
        pairs: impl IntoIterator<Item = (&'static str, V)>,
    ) -> Self {
        let table = pairs
            .into_iter()
            .map(|(key, val)| (key.to_string(), val.into()))
            .collect();
        Self::new(strategy, table)
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    /// Check that every `required` key is present.
    ///
    /// Keys outside `required` and `optional` are ignored with a warning.
    pub fn declare(&self, required: &[&str], optional: &[&str]) -> Result<()> {
        if let Some(missing) = required.iter().find(|key| !self.table.contains_key(**key)) {
            return Err(ConfigError::MissingRequiredProperty {
                strategy: self.strategy.clone(),
                property: missing.to_string(),
            }
            .into());
        }
        for key in self.table.keys() {
            if !required.contains(&key.as_str()) && !optional.contains(&key.as_str()) {
                log::warn!("{} ignores unrecognized property {key:?}", self.strategy);
            }
        }
        Ok(())
    }

    pub fn f64(&self, key: &str) -> Result<f64> {
        let val = self.require(key)?;
        as_f64(val).ok_or_else(|| self.invalid(key, "a finite number"))
    }

    pub fn f64_or(&self, key: &str, default: f64) -> Result<f64> {
        match self.table.get(key) {
            None => Ok(default),
            Some(_) => self.f64(key),
        }
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.table.get(key) {
            None => Ok(default),
            Some(Value::Integer(val)) if *val >= 0 => Ok(*val as usize),
            Some(_) => Err(self.invalid(key, "a non-negative integer")),
        }
    }

    pub fn str(&self, key: &str) -> Result<&str> {
        match self.require(key)? {
            Value::String(val) => Ok(val),
            _ => Err(self.invalid(key, "a string")),
        }
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        match self.table.get(key) {
            None => Ok(default),
            Some(_) => self.str(key),
        }
    }

    /// Accepts TOML booleans and the strings `"true"`/`"false"`.
    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.table.get(key) {
            None => Ok(default),
            Some(Value::Boolean(val)) => Ok(*val),
            Some(Value::String(val)) if val.eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(val)) if val.eq_ignore_ascii_case("false") => Ok(false),
            Some(_) => Err(self.invalid(key, "a boolean")),
        }
    }

    fn require(&self, key: &str) -> Result<&Value> {
        self.table.get(key).ok_or_else(|| {
            ConfigError::MissingRequiredProperty {
                strategy: self.strategy.clone(),
                property: key.to_string(),
            }
            .into()
        })
    }

    fn invalid(&self, key: &str, expected: &'static str) -> anyhow::Error {
        ConfigError::InvalidPropertyValue {
            strategy: self.strategy.clone(),
            property: key.to_string(),
            expected,
        }
        .into()
    }
}

fn as_f64(val: &Value) -> Option<f64> {
    let num = match val {
        Value::Float(val) => *val,
        Value::Integer(val) => *val as f64,
        Value::String(val) => val.trim().parse().ok()?,
        _ => return None,
    };
    num.is_finite().then_some(num)
}
