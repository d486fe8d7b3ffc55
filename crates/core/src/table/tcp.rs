use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{SharedTable, TableError, TableEvent, TableValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Message {
    Update { key: String, value: TableValue },
    Subscribe { key: String },
    Put { key: String, value: TableValue },
}

struct Shared {
    remote: String,
    cache: RwLock<HashMap<String, TableValue>>,
    connected: AtomicBool,
}

pub struct TcpTable {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl TcpTable {
    /// Start connecting to `remote` in the background.
    ///
    /// Returns the table, the event stream for the listener, and the handle of
    /// the connection task. The task ends when the table or the event receiver
    /// is dropped.
    pub fn connect(
        remote: impl Into<String>,
        reconnect_delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TableEvent>, JoinHandle<()>) {
        let shared = Arc::new(Shared {
            remote: remote.into(),
            cache: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        });
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(connection_loop(
            shared.clone(),
            outgoing_rx,
            events_tx,
            reconnect_delay,
        ));

        (Arc::new(Self { shared, outgoing }), events_rx, handle)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn send(&self, message: Message) -> Result<(), TableError> {
        if !self.is_connected() {
            return Err(TableError::NotConnected(self.shared.remote.clone()));
        }
        self.outgoing.send(message).map_err(|_| TableError::Closed)
    }
}

impl SharedTable for TcpTable {
    fn get(&self, key: &str) -> Option<TableValue> {
        self.shared.cache.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: TableValue) -> Result<(), TableError> {
        self.shared
            .cache
            .write()
            .insert(key.to_string(), value.clone());
        self.send(Message::Put {
            key: key.to_string(),
            value,
        })
    }

    fn watch(&self, key: &str) -> Result<(), TableError> {
        self.send(Message::Subscribe {
            key: key.to_string(),
        })
    }
}

async fn connection_loop(
    shared: Arc<Shared>,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<TableEvent>,
    reconnect_delay: Duration,
) {
    loop {
        match TcpStream::connect(&shared.remote).await {
            Ok(stream) => {
                log::info!("Connected to table server at {}", shared.remote);
                // Anything queued while the link was down is stale
                while outgoing.try_recv().is_ok() {}
                shared.connected.store(true, Ordering::Release);
                let up = TableEvent::Connection {
                    connected: true,
                    remote: shared.remote.clone(),
                };
                if events.send(up).is_err() {
                    return;
                }

                let keep_going = session(&shared, stream, &mut outgoing, &events).await;

                shared.connected.store(false, Ordering::Release);
                let down = TableEvent::Connection {
                    connected: false,
                    remote: shared.remote.clone(),
                };
                if !keep_going || events.send(down).is_err() {
                    return;
                }
            }
            Err(e) => {
                log::debug!("Table server {} unreachable: {}", shared.remote, e);
            }
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Pump one connection. Returns false when the client side has gone away and
/// the loop should stop for good.
async fn session(
    shared: &Shared,
    stream: TcpStream,
    outgoing: &mut mpsc::UnboundedReceiver<Message>,
    events: &mpsc::UnboundedSender<TableEvent>,
) -> bool {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !apply_line(shared, &line, events) {
                        return false;
                    }
                }
                Ok(None) => {
                    log::warn!("Table server {} closed the connection", shared.remote);
                    return true;
                }
                Err(e) => {
                    log::warn!("Lost connection to {}: {}", shared.remote, e);
                    return true;
                }
            },
            message = outgoing.recv() => {
                let Some(message) = message else {
                    return false;
                };
                let mut bytes = match serde_json::to_vec(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::error!("Failed to encode {:?}: {}", message, e);
                        continue;
                    }
                };
                bytes.push(b'\n');
                if let Err(e) = write.write_all(&bytes).await {
                    log::warn!("Failed to write to {}: {}", shared.remote, e);
                    return true;
                }
            }
        }
    }
}

/// Apply one line from the server. Returns false once nobody listens for events.
fn apply_line(shared: &Shared, line: &str, events: &mpsc::UnboundedSender<TableEvent>) -> bool {
    if line.trim().is_empty() {
        return true;
    }

    match serde_json::from_str::<Message>(line) {
        Ok(Message::Update { key, value }) => {
            let previous = shared.cache.write().insert(key.clone(), value.clone());
            if previous.as_ref() == Some(&value) {
                return true;
            }
            events.send(TableEvent::ValueChanged { key, value }).is_ok()
        }
        Ok(other) => {
            log::debug!("Ignoring unexpected message from server: {:?}", other);
            true
        }
        Err(e) => {
            log::warn!("Malformed line from {}: {} ({})", shared.remote, line, e);
            true
        }
    }
}
