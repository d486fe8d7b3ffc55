pub mod memory;
pub mod tcp;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryTable;
pub use tcp::TcpTable;

/// A value stored under a table key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl TableValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            TableValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TableValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for TableValue {
    fn from(n: f64) -> Self {
        TableValue::Number(n)
    }
}

impl From<&str> for TableValue {
    fn from(s: &str) -> Self {
        TableValue::String(s.to_string())
    }
}

impl From<String> for TableValue {
    fn from(s: String) -> Self {
        TableValue::String(s)
    }
}

impl From<bool> for TableValue {
    fn from(b: bool) -> Self {
        TableValue::Bool(b)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    /// Transport connection came up or went down
    Connection { connected: bool, remote: String },
    /// A key took a new value
    ValueChanged { key: String, value: TableValue },
}

#[derive(Debug, Error)]
pub enum TableError {
    #[error("not connected to {0}")]
    NotConnected(String),

    #[error("transport closed")]
    Closed,
}

pub trait SharedTable: Send + Sync {
    fn get(&self, key: &str) -> Option<TableValue>;

    fn put(&self, key: &str, value: TableValue) -> Result<(), TableError>;

    /// Register interest in changes of `key`. Called again after every
    /// reconnection.
    fn watch(&self, _key: &str) -> Result<(), TableError> {
        Ok(())
    }

    /// Numeric read that falls back to `default` when the key is missing or
    /// holds something other than a number.
    fn get_number(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|value| value.as_number())
            .unwrap_or(default)
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), TableError> {
        self.put(key, TableValue::from(value))
    }
}
