use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::command::{Command, CommandKind, ParamDefaults, RawParams};
use crate::supervisor::JobSupervisor;
use crate::table::{SharedTable, TableEvent, TableValue};

/// Status written once a command has been seen
pub const RECEIVED: &str = "received";
/// Status written once the command's job has been started
pub const PROCESSED: &str = "processed";

/// Names of the keys the listener reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableKeys {
    pub command: String,
    pub status: String,
    pub red: String,
    pub green: String,
    pub blue: String,
    pub repeat: String,
    pub wait_ms: String,
    pub brightness: String,
}

impl Default for TableKeys {
    fn default() -> Self {
        Self {
            command: "command".to_string(),
            status: "command_status".to_string(),
            red: "red".to_string(),
            green: "green".to_string(),
            blue: "blue".to_string(),
            repeat: "repeat".to_string(),
            wait_ms: "wait_ms".to_string(),
            brightness: "LED_BRIGHTNESS".to_string(),
        }
    }
}

pub struct CommandListener {
    table: Arc<dyn SharedTable>,
    supervisor: Arc<JobSupervisor>,
    keys: TableKeys,
    defaults: ParamDefaults,
}

impl CommandListener {
    pub fn new(
        table: Arc<dyn SharedTable>,
        supervisor: Arc<JobSupervisor>,
        keys: TableKeys,
        defaults: ParamDefaults,
    ) -> Self {
        Self {
            table,
            supervisor,
            keys,
            defaults,
        }
    }

    /// Snapshot the six parameter keys, each with its own fallback.
    pub fn read_params(&self) -> RawParams {
        let d = &self.defaults;
        let get = |key: &str, default: f64| self.table.get_number(key, default);
        RawParams {
            red: get(&self.keys.red, d.red as f64),
            green: get(&self.keys.green, d.green as f64),
            blue: get(&self.keys.blue, d.blue as f64),
            repeat: get(&self.keys.repeat, d.repeat as f64),
            wait_ms: get(&self.keys.wait_ms, d.wait_ms as f64),
            brightness: get(&self.keys.brightness, d.brightness as f64),
        }
    }

    /// Handle one change of the watched key.
    pub async fn handle_change(&self, value: &TableValue) {
        let raw = self.read_params();
        self.acknowledge(RECEIVED);

        let gate = match self.parse(value) {
            Some(kind) => {
                let command = Command::from_raw(kind, &raw, &self.defaults);
                log::info!("Received {:?}", command);
                Some(self.supervisor.submit(command).await)
            }
            None => None,
        };

        self.acknowledge(PROCESSED);
        if let Some(gate) = gate {
            gate.release();
        }
    }

    fn parse(&self, value: &TableValue) -> Option<CommandKind> {
        let Some(name) = value.as_str() else {
            log::warn!("Ignoring non-string command value {:?}", value);
            return None;
        };
        match name.parse::<CommandKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                log::warn!("Ignoring {}", e);
                None
            }
        }
    }

    fn acknowledge(&self, status: &str) {
        if let Err(e) = self.table.put_string(&self.keys.status, status) {
            log::warn!("Could not publish {:?} to {}: {}", status, self.keys.status, e);
        }
    }

    fn register(&self) {
        match self.table.watch(&self.keys.command) {
            Ok(()) => log::debug!("Watching {}", self.keys.command),
            Err(e) => log::debug!("Watch on {} deferred: {}", self.keys.command, e),
        }
    }

    /// Process table events until the transport closes the stream.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<TableEvent>) {
        self.register();
        log::info!("Listening for commands on {}", self.keys.command);

        while let Some(event) = events.recv().await {
            match event {
                TableEvent::Connection { connected, remote } => {
                    log::info!("{}; connected={}", remote, connected);
                    if connected {
                        self.register();
                    }
                }
                TableEvent::ValueChanged { key, value } if key == self.keys.command => {
                    self.handle_change(&value).await;
                }
                TableEvent::ValueChanged { .. } => {}
            }
        }

        log::info!("Table event stream closed, listener stopping");
    }
}

/// Start a listener on its own task.
pub fn spawn(
    listener: CommandListener,
    events: mpsc::UnboundedReceiver<TableEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(listener.run(events))
}
