//! Coordinator side of the lock protocol
//!
//! Listens on a Unix socket, one task per worker connection. Each request is
//! serviced on its own task so that a `lock` waiting out its retries never
//! delays an `unlock` sent on the same connection.

use super::manager::LockManager;
use super::protocol::{Message, RequestMessage, ResponseMessage, read_line};
use super::types::{LockCommand, LockError, LockResult};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Attempts the coordinator makes for a worker's lock request
pub const WORKER_LOCK_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub struct LockServer {
    manager: LockManager,
    listener: UnixListener,
    socket_path: PathBuf,
}

impl LockServer {
    /// Bind the coordinator socket, replacing a leftover socket file
    pub fn bind(manager: LockManager, socket_path: impl AsRef<Path>) -> LockResult<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            debug!(path = %socket_path.display(), "Removing leftover coordinator socket");
            std::fs::remove_file(&socket_path).map_err(|e| {
                LockError::Transport(format!(
                    "Failed to remove stale socket {}: {}",
                    socket_path.display(),
                    e
                ))
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                LockError::Transport(format!("Failed to create socket directory: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            LockError::Transport(format!(
                "Failed to bind coordinator socket {}: {}",
                socket_path.display(),
                e
            ))
        })?;

        info!(
            path = %socket_path.display(),
            host = %gethostname::gethostname().to_string_lossy(),
            "Lock coordinator listening"
        );

        Ok(Self {
            manager,
            listener,
            socket_path,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn manager(&self) -> &LockManager {
        &self.manager
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> LockResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Lock coordinator shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let manager = self.manager.clone();
                            tokio::spawn(async move {
                                handle_connection(manager, stream).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept worker connection");
                        }
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

async fn handle_connection(manager: LockManager, stream: UnixStream) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<ResponseMessage>(64);

    let writer = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let line = match Message::from(response).encode_line() {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to encode response");
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                warn!(error = %e, "Worker connection closed while responding");
                break;
            }
        }
    });

    let mut sources = HashSet::new();
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        let line = match read_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Closing worker connection");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match Message::decode_line(&line) {
            Ok(Message::RequestMessage(request)) => {
                debug!(
                    source = %request.source,
                    command = %request.command,
                    lock_key = %request.options,
                    "Received request message"
                );
                sources.insert(request.source.clone());
                let manager = manager.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handle_request(&manager, &request).await;
                    let _ = tx.send(response).await;
                });
            }
            Ok(Message::ResponseMessage(_)) => {
                warn!("Ignoring response message sent to the coordinator");
            }
            Err(e) => {
                if let Some(response) = invalid_request_response(&line) {
                    let _ = tx.send(response).await;
                } else {
                    warn!(error = %e, "Dropping undecodable message");
                }
            }
        }
    }

    drop(tx);
    let _ = writer.await;

    for source in sources {
        manager.release_all(&source).await;
    }
}

/// Service one request against the local ledger
pub async fn handle_request(manager: &LockManager, request: &RequestMessage) -> ResponseMessage {
    match request.command {
        LockCommand::Lock => {
            match manager
                .acquire(&request.options, &request.source, WORKER_LOCK_ATTEMPTS)
                .await
            {
                Ok(()) => request.respond(true, ""),
                Err(e) => request.respond(false, e.to_string()),
            }
        }
        LockCommand::Unlock => {
            manager.release(&request.options, &request.source).await;
            request.respond(true, "")
        }
    }
}

/// Answer a well-formed request carrying an unknown command
fn invalid_request_response(line: &str) -> Option<ResponseMessage> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    if value.get("signature")?.as_str()? != "RequestMessage" {
        return None;
    }

    Some(ResponseMessage {
        id: value.get("id")?.as_str()?.to_string(),
        source: value.get("dest")?.as_str()?.to_string(),
        dest: value.get("source")?.as_str()?.to_string(),
        result: false,
        detail: "Invalid command".to_string(),
    })
}
