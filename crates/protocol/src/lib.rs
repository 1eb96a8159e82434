//! # WebPTY Protocol Library
//!
//! Wire types for the WebPTY control socket.
//!
//! ## Overview
//!
//! Clients talk to the daemon over a local Unix socket. Each connection
//! carries exactly one JSON request and receives exactly one JSON response:
//!
//! ```text
//! client                                   daemon
//!   │  {"action":"spawn","data":{}}\n         │
//!   │ ──────────────────────────────────────▶ │
//!   │  {"ok":true,"data":{"id":"…"}}\n        │
//!   │ ◀────────────────────────────────────── │
//!   ╳  connection closed                      ╳
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use webpty_protocol::{Request, Response, SpawnData};
//!
//! let request = Request::from_json(r#"{"action":"resize","data":{"id":"s1","cols":120,"rows":40}}"#)
//!     .unwrap();
//! assert_eq!(request.action(), "resize");
//!
//! let response = Response::ok_with(&SpawnData { id: "s1".into() }).unwrap();
//! assert_eq!(response.to_json().unwrap(), r#"{"ok":true,"data":{"id":"s1"}}"#);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Request/response envelopes and per-action data
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    validate_dimensions, KillData, ListData, Request, RequestEnvelope, ResizeData, Response,
    SessionStatus, SessionSummary, ShutdownData, SpawnData, SpawnRequestData, StatusData,
    WriteData, ACTION_KILL, ACTION_LIST, ACTION_PING, ACTION_RESIZE, ACTION_SHUTDOWN,
    ACTION_SPAWN, ACTION_STATUS, ACTION_STOP, ACTION_WRITE,
};
