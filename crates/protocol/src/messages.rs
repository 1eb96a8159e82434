//! Control protocol message definitions for WebPTY.
//!
//! Every request is a single JSON object of the form
//! `{"action": <name>, "data": <object>}` and every response is a single
//! JSON object of the form `{"ok": bool, "err"?: string, "data"?: object}`.
//! One connection carries exactly one request and one response.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

// ============================================================================
// Action names
// ============================================================================

/// Spawn a new shell session.
pub const ACTION_SPAWN: &str = "spawn";
/// Write input bytes to a session.
pub const ACTION_WRITE: &str = "write";
/// Resize a session's terminal window.
pub const ACTION_RESIZE: &str = "resize";
/// Tear a session down.
pub const ACTION_KILL: &str = "kill";
/// List live sessions.
pub const ACTION_LIST: &str = "list";
/// Liveness check.
pub const ACTION_PING: &str = "ping";
/// Daemon status.
pub const ACTION_STATUS: &str = "status";
/// Tear every session down, keep serving.
pub const ACTION_SHUTDOWN: &str = "shutdown";
/// Tear every session down and exit.
pub const ACTION_STOP: &str = "stop";

// ============================================================================
// Request envelope
// ============================================================================

/// Raw request envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Action name.
    pub action: String,
    /// Action-specific payload. Absent and `null` are treated as `{}`.
    #[serde(default)]
    pub data: Value,
}

/// A validated control request.
///
/// Session-scoped requests carry a non-empty ID and resize requests carry
/// dimensions already checked to be positive, so handlers never see
/// invalid input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Spawn a new shell session.
    Spawn,
    /// Write input to a session.
    Write {
        /// Target session.
        id: String,
        /// Input forwarded verbatim to the pty.
        data: String,
    },
    /// Resize a session's terminal.
    Resize {
        /// Target session.
        id: String,
        /// New width in columns.
        cols: u16,
        /// New height in rows.
        rows: u16,
    },
    /// Tear a session down.
    Kill {
        /// Target session.
        id: String,
    },
    /// List live sessions.
    List,
    /// Liveness check.
    Ping,
    /// Daemon status.
    Status,
    /// Tear every session down without stopping the daemon.
    Shutdown,
    /// Tear every session down and stop the daemon.
    Stop,
}

/// Data for a `spawn` request. Spawn takes no options yet, but a present
/// `data` must still be an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequestData {}

/// Data for a `write` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteData {
    /// Target session.
    pub id: String,
    /// Input to forward.
    pub data: String,
}

/// Data for a `resize` request.
///
/// Dimensions are signed on the wire so that negative values reach
/// validation instead of failing as a type error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeData {
    /// Target session.
    pub id: String,
    /// Requested columns.
    pub cols: i64,
    /// Requested rows.
    pub rows: i64,
}

/// Data for a `kill` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillData {
    /// Target session.
    pub id: String,
}

impl Request {
    /// Returns the wire name of this request's action.
    pub fn action(&self) -> &'static str {
        match self {
            Request::Spawn => ACTION_SPAWN,
            Request::Write { .. } => ACTION_WRITE,
            Request::Resize { .. } => ACTION_RESIZE,
            Request::Kill { .. } => ACTION_KILL,
            Request::List => ACTION_LIST,
            Request::Ping => ACTION_PING,
            Request::Status => ACTION_STATUS,
            Request::Shutdown => ACTION_SHUTDOWN,
            Request::Stop => ACTION_STOP,
        }
    }

    /// Returns the session this request targets, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Request::Write { id, .. } | Request::Resize { id, .. } | Request::Kill { id } => {
                Some(id)
            }
            _ => None,
        }
    }

    /// Parses and validates a request from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: RequestEnvelope = serde_json::from_str(json)?;
        Self::from_envelope(envelope)
    }

    /// Validates a raw envelope into a typed request.
    pub fn from_envelope(envelope: RequestEnvelope) -> Result<Self> {
        let RequestEnvelope { action, data } = envelope;

        match action.as_str() {
            ACTION_SPAWN => {
                let SpawnRequestData {} = parse_data(&action, data)?;
                Ok(Request::Spawn)
            }
            ACTION_WRITE => {
                let WriteData { id, data } = parse_data(&action, data)?;
                require_id(&id)?;
                Ok(Request::Write { id, data })
            }
            ACTION_RESIZE => {
                let ResizeData { id, cols, rows } = parse_data(&action, data)?;
                require_id(&id)?;
                let (cols, rows) = validate_dimensions(cols, rows)?;
                Ok(Request::Resize { id, cols, rows })
            }
            ACTION_KILL => {
                let KillData { id } = parse_data(&action, data)?;
                require_id(&id)?;
                Ok(Request::Kill { id })
            }
            ACTION_LIST => Ok(Request::List),
            ACTION_PING => Ok(Request::Ping),
            ACTION_STATUS => Ok(Request::Status),
            ACTION_SHUTDOWN => Ok(Request::Shutdown),
            ACTION_STOP => Ok(Request::Stop),
            _ => Err(ProtocolError::UnknownAction(action)),
        }
    }

    /// Builds the wire envelope for this request.
    pub fn to_envelope(&self) -> Result<RequestEnvelope> {
        let data = match self {
            Request::Write { id, data } => to_value(&WriteData {
                id: id.clone(),
                data: data.clone(),
            })?,
            Request::Resize { id, cols, rows } => to_value(&ResizeData {
                id: id.clone(),
                cols: i64::from(*cols),
                rows: i64::from(*rows),
            })?,
            Request::Kill { id } => to_value(&KillData { id: id.clone() })?,
            _ => Value::Object(serde_json::Map::new()),
        };

        Ok(RequestEnvelope {
            action: self.action().to_string(),
            data,
        })
    }

    /// Serializes this request to a single-line JSON string.
    pub fn to_json(&self) -> Result<String> {
        let envelope = self.to_envelope()?;
        serde_json::to_string(&envelope).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

fn parse_data<T: DeserializeOwned + Default>(action: &str, data: Value) -> Result<T> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidData {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(ProtocolError::MissingSessionId);
    }
    Ok(())
}

/// Checks resize dimensions and narrows them to terminal window units.
pub fn validate_dimensions(cols: i64, rows: i64) -> Result<(u16, u16)> {
    if cols <= 0 || rows <= 0 {
        return Err(ProtocolError::NonPositiveDimensions { cols, rows });
    }
    match (u16::try_from(cols), u16::try_from(rows)) {
        (Ok(cols), Ok(rows)) => Ok((cols, rows)),
        _ => Err(ProtocolError::DimensionsTooLarge { max: u16::MAX }),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

// ============================================================================
// Responses
// ============================================================================

/// Response envelope sent back on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Error message when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
    /// Action-specific success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// A success response with no payload.
    pub fn ok() -> Self {
        Self {
            ok: true,
            err: None,
            data: None,
        }
    }

    /// A success response carrying `data`.
    pub fn ok_with<T: Serialize>(data: &T) -> Result<Self> {
        Ok(Self {
            ok: true,
            err: None,
            data: Some(to_value(data)?),
        })
    }

    /// A failure response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: Some(message.into()),
            data: None,
        }
    }

    /// Decodes the success payload into `T`.
    ///
    /// A missing payload decodes as `{}` so that empty success data types
    /// work for responses like `{"ok":true}`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .data
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Serializes this response to a single-line JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parses a response from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Success data for `spawn`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnData {
    /// Identifier of the new session.
    pub id: String,
}

/// Liveness of a listed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The shell process still answers an existence check.
    Active,
    /// The shell process is gone and teardown is pending or in progress.
    Exiting,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => f.write_str("active"),
            SessionStatus::Exiting => f.write_str("exiting"),
        }
    }
}

/// One entry in a `list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Liveness at list time.
    pub status: SessionStatus,
    /// Shell process ID.
    #[serde(default)]
    pub pid: Option<u32>,
    /// Unix timestamp of the spawn.
    #[serde(default)]
    pub created_at: u64,
}

/// Success data for `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListData {
    /// Live sessions.
    pub sessions: Vec<SessionSummary>,
    /// Number of entries in `sessions`.
    pub count: usize,
}

impl ListData {
    /// Builds list data, deriving `count` from the entries.
    pub fn new(sessions: Vec<SessionSummary>) -> Self {
        let count = sessions.len();
        Self { sessions, count }
    }
}

/// Success data for `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusData {
    /// Daemon process ID.
    pub pid: u32,
    /// Seconds since the daemon started serving.
    pub uptime_secs: u64,
    /// Number of registered sessions.
    pub session_count: usize,
}

/// Success data for `shutdown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownData {
    /// Number of sessions torn down.
    pub closed: usize,
}
