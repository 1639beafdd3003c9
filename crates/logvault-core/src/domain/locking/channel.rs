//! Worker side of the lock protocol
//!
//! A worker keeps one connection to the coordinator. A background reader
//! routes each response to the waiter registered under its request id;
//! waiters that time out are deregistered so nothing accumulates.
//!
//! The coordinator keeps retrying a `lock` after the worker stopped waiting
//! for it. When such a late grant arrives the reader releases it right away,
//! otherwise the key would stay held by this worker until it disconnects.

use super::protocol::{Message, RequestMessage, ResponseMessage, read_line};
use super::types::{LockCommand, LockConfig, LockError, LockResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct RequestTable {
    waiters: HashMap<String, oneshot::Sender<ResponseMessage>>,
    /// Lock requests nobody waits for any more, id -> key
    abandoned: HashMap<String, String>,
}

type SharedTable = Arc<StdMutex<RequestTable>>;
type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

#[derive(Debug)]
struct Connection {
    writer: SharedWriter,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[derive(Debug)]
pub struct WorkerChannel {
    identity: String,
    config: LockConfig,
    table: SharedTable,
    connection: Mutex<Option<Connection>>,
}

impl WorkerChannel {
    /// Create a channel; the connection is opened lazily on first use
    pub fn new(identity: impl Into<String>, config: LockConfig) -> Self {
        Self {
            identity: identity.into(),
            config,
            table: Arc::new(StdMutex::new(RequestTable::default())),
            connection: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Number of requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.table.lock().map(|t| t.waiters.len()).unwrap_or(0)
    }

    /// Number of timed-out lock requests whose answer has not arrived yet
    pub fn abandoned_requests(&self) -> usize {
        self.table.lock().map(|t| t.abandoned.len()).unwrap_or(0)
    }

    /// Send one request and wait for its response
    pub async fn request(&self, command: LockCommand, key: &str) -> LockResult<ResponseMessage> {
        let request = RequestMessage::new(&self.identity, command, key);
        let (tx, mut rx) = oneshot::channel();

        self.register(&request.id, tx)?;

        if let Err(e) = self.send(&request).await {
            self.deregister(&request.id);
            return Err(e);
        }

        debug!(command = %command, lock_key = %key, "Sent request message to coordinator");

        match timeout(self.config.timeout_for(command), &mut rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(closed_before_response()),
            Err(_) => {
                if self.abandon(&request) {
                    debug!(command = %command, lock_key = %key, "Request message timed out");
                    return Err(LockError::Timeout {
                        command,
                        key: key.to_string(),
                    });
                }
                // The reader claimed the waiter as the timer fired
                rx.try_recv().map_err(|_| closed_before_response())
            }
        }
    }

    fn register(&self, id: &str, tx: oneshot::Sender<ResponseMessage>) -> LockResult<()> {
        self.table
            .lock()
            .map_err(|_| LockError::Transport("Pending request table poisoned".to_string()))?
            .waiters
            .insert(id.to_string(), tx);
        Ok(())
    }

    fn deregister(&self, id: &str) {
        if let Ok(mut table) = self.table.lock() {
            table.waiters.remove(id);
        }
    }

    /// Stop waiting for `request`; false if its response was already delivered
    fn abandon(&self, request: &RequestMessage) -> bool {
        let Ok(mut table) = self.table.lock() else {
            return true;
        };
        if table.waiters.remove(&request.id).is_none() {
            return false;
        }
        if request.command == LockCommand::Lock {
            table
                .abandoned
                .insert(request.id.clone(), request.options.clone());
        }
        true
    }

    async fn send(&self, request: &RequestMessage) -> LockResult<()> {
        let line = Message::from(request.clone()).encode_line()?;
        let mut guard = self.connection.lock().await;

        // Reconnect once if the previous connection went away
        for attempt in 0..2 {
            let stale = guard
                .as_ref()
                .map(|c| c.closed.load(Ordering::SeqCst))
                .unwrap_or(true);
            if stale {
                *guard = Some(self.connect().await?);
            }

            let Some(connection) = guard.as_mut() else {
                continue;
            };

            let written = connection.writer.lock().await.write_all(line.as_bytes()).await;
            match written {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, attempt, "Failed to write to coordinator");
                    connection.closed.store(true, Ordering::SeqCst);
                }
            }
        }

        Err(LockError::Transport(
            "Failed to send request to coordinator".to_string(),
        ))
    }

    async fn connect(&self) -> LockResult<Connection> {
        let stream = UnixStream::connect(&self.config.socket_path)
            .await
            .map_err(|e| {
                LockError::Transport(format!(
                    "Failed to connect to coordinator at {}: {}",
                    self.config.socket_path.display(),
                    e
                ))
            })?;

        debug!(path = %self.config.socket_path.display(), "Connected to coordinator");

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_responses(
            read_half,
            writer.clone(),
            self.identity.clone(),
            self.table.clone(),
            closed.clone(),
        ));

        Ok(Connection {
            writer,
            closed,
            reader,
        })
    }
}

fn closed_before_response() -> LockError {
    LockError::Transport("Coordinator connection closed before responding".to_string())
}

async fn read_responses(
    read_half: OwnedReadHalf,
    writer: SharedWriter,
    identity: String,
    table: SharedTable,
    closed: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        let line = match read_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from coordinator");
                break;
            }
        };

        match Message::decode_line(&line) {
            Ok(Message::ResponseMessage(response)) if response.dest == identity => {
                debug!("Received response message from coordinator");
                if let Some(key) = deliver(&table, response) {
                    release_late_grant(&writer, &identity, &key).await;
                }
            }
            Ok(_) => debug!("Ignoring message not addressed to this worker"),
            Err(e) => warn!(error = %e, "Dropping undecodable message from coordinator"),
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every outstanding waiter
    if let Ok(mut table) = table.lock() {
        table.waiters.clear();
        table.abandoned.clear();
    }
}

/// Hand `response` to its waiter. Returns the key of an abandoned lock
/// request that the coordinator granted anyway.
fn deliver(table: &SharedTable, response: ResponseMessage) -> Option<String> {
    let Ok(mut table) = table.lock() else {
        return None;
    };

    if let Some(tx) = table.waiters.remove(&response.id) {
        let _ = tx.send(response);
        return None;
    }

    match table.abandoned.remove(&response.id) {
        Some(key) if response.result => Some(key),
        Some(_) => None,
        None => {
            debug!(id = %response.id, "Response for an abandoned request");
            None
        }
    }
}

async fn release_late_grant(writer: &SharedWriter, identity: &str, key: &str) {
    warn!(lock_key = %key, "Lock granted after the request timed out, releasing it");

    let unlock = RequestMessage::new(identity, LockCommand::Unlock, key);
    let line = match Message::from(unlock).encode_line() {
        Ok(line) => line,
        Err(e) => {
            warn!(lock_key = %key, error = %e, "Failed to encode unlock request");
            return;
        }
    };

    if let Err(e) = writer.lock().await.write_all(line.as_bytes()).await {
        warn!(lock_key = %key, error = %e, "Failed to release late lock grant");
    }
}
