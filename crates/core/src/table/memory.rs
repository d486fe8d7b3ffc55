use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use super::{SharedTable, TableError, TableEvent, TableValue};

/// In-process table. Every put is recorded so callers can inspect the order
/// in which values were written.
#[derive(Default)]
pub struct MemoryTable {
    values: RwLock<HashMap<String, TableValue>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TableEvent>>>,
    history: Mutex<Vec<(String, TableValue)>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every change made to the table from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TableEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Announce a connection state change to subscribers.
    pub fn set_connected(&self, connected: bool) {
        self.publish(TableEvent::Connection {
            connected,
            remote: "memory".to_string(),
        });
    }

    /// Values written under `key`, oldest first
    pub fn history_of(&self, key: &str) -> Vec<TableValue> {
        self.history
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn publish(&self, event: TableEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl SharedTable for MemoryTable {
    fn get(&self, key: &str) -> Option<TableValue> {
        self.values.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: TableValue) -> Result<(), TableError> {
        self.history.lock().push((key.to_string(), value.clone()));
        let previous = self.values.write().insert(key.to_string(), value.clone());
        if previous.as_ref() != Some(&value) {
            self.publish(TableEvent::ValueChanged {
                key: key.to_string(),
                value,
            });
        }
        Ok(())
    }
}
