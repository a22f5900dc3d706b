use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Values an action may stash between `execute` and `undo`. Restricted to
/// scalars and arrays of scalars so a memento can always be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MementoValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    BoolList(Vec<bool>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
}

impl From<bool> for MementoValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MementoValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for MementoValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for MementoValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for MementoValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MementoValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<bool>> for MementoValue {
    fn from(value: Vec<bool>) -> Self {
        Self::BoolList(value)
    }
}

impl From<Vec<i64>> for MementoValue {
    fn from(value: Vec<i64>) -> Self {
        Self::IntList(value)
    }
}

impl From<Vec<f64>> for MementoValue {
    fn from(value: Vec<f64>) -> Self {
        Self::FloatList(value)
    }
}

impl From<Vec<String>> for MementoValue {
    fn from(value: Vec<String>) -> Self {
        Self::TextList(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Memento {
    entries: BTreeMap<String, MementoValue>,
}

impl Memento {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MementoValue>,
    ) -> Option<MementoValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&MementoValue> {
        self.entries.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            MementoValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            MementoValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            MementoValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_text_list(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key)? {
            MementoValue::TextList(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<MementoValue> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize memento")
    }
}
