//! Wire messages exchanged between workers and the coordinator
//!
//! Every message is a single line of JSON tagged with a `signature` field:
//!
//! ```text
//! {"signature":"RequestMessage","id":"…","source":"4242","dest":"coordinator","command":"lock","options":"dom/p1/project.inf"}
//! {"signature":"ResponseMessage","id":"…","source":"coordinator","dest":"4242","result":true,"detail":""}
//! ```

use super::types::{COORDINATOR_IDENTITY, LockCommand, LockError, LockResult};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use uuid::Uuid;

/// Upper bound for one encoded line; anything longer is a protocol error
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Request sent by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// Correlation id, echoed in the response
    pub id: String,
    /// Identity of the requesting worker (becomes the lock holder)
    pub source: String,
    pub dest: String,
    pub command: LockCommand,
    /// The lock key
    pub options: String,
}

impl RequestMessage {
    pub fn new(source: &str, command: LockCommand, key: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            dest: COORDINATOR_IDENTITY.to_string(),
            command,
            options: key.to_string(),
        }
    }

    /// Build the matching response
    pub fn respond(&self, result: bool, detail: impl Into<String>) -> ResponseMessage {
        ResponseMessage {
            id: self.id.clone(),
            source: self.dest.clone(),
            dest: self.source.clone(),
            result,
            detail: detail.into(),
        }
    }
}

/// Response sent by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: String,
    pub source: String,
    /// Identity of the worker the response is meant for
    pub dest: String,
    pub result: bool,
    pub detail: String,
}

impl ResponseMessage {
    /// Whether this response answers `request` from `identity`
    pub fn answers(&self, identity: &str, request_id: &str) -> bool {
        self.dest == identity && self.id == request_id
    }
}

/// Either message, as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signature")]
pub enum Message {
    RequestMessage(RequestMessage),
    ResponseMessage(ResponseMessage),
}

impl Message {
    /// Encode as one newline-terminated line
    pub fn encode_line(&self) -> LockResult<String> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| LockError::Transport(format!("Failed to encode message: {}", e)))?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line (with or without its trailing newline)
    pub fn decode_line(line: &str) -> LockResult<Self> {
        if line.len() > MAX_LINE_LENGTH {
            return Err(LockError::Transport(format!(
                "Message too large: {} bytes (max: {})",
                line.len(),
                MAX_LINE_LENGTH
            )));
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| LockError::Transport(format!("Failed to decode message: {}", e)))
    }
}

/// Read one line from `reader` without its terminator.
///
/// At most `MAX_LINE_LENGTH` bytes are buffered; a longer line is an error
/// and leaves the stream unusable. `Ok(None)` means the peer closed it.
pub async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> LockResult<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_LINE_LENGTH as u64 + 1;
    let read = AsyncReadExt::take(&mut *reader, limit)
        .read_until(b'\n', buf)
        .await
        .map_err(|e| LockError::Transport(format!("Failed to read message: {}", e)))?;

    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_LENGTH {
        return Err(LockError::Transport(format!(
            "Message too large: more than {} bytes",
            MAX_LINE_LENGTH
        )));
    }

    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

impl From<RequestMessage> for Message {
    fn from(request: RequestMessage) -> Self {
        Self::RequestMessage(request)
    }
}

impl From<ResponseMessage> for Message {
    fn from(response: ResponseMessage) -> Self {
        Self::ResponseMessage(response)
    }
}
