// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//!
//! Wire vocabulary between the client and the database worker.
//!
//! Every frame is a JSON document. Requests travel wrapped with the `seq`
//! the client allocated; the worker echoes that `seq` on exactly one
//! `response` frame. `logRecord` frames carry no `seq` and may arrive at any
//! time.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A serialized frame as it travels over the worker channel.
pub type Frame = String;

/// A request from the client to the worker.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Open the storage engine under `config_dir` with `key`.
    #[serde(rename = "init")]
    Init {
        #[serde(rename = "configDir")]
        config_dir: String,
        key: String,
    },
    /// Close the storage engine and terminate the worker.
    #[serde(rename = "close")]
    Close,
    /// Delete all persisted data.
    #[serde(rename = "removeDB")]
    RemoveStorage,
    /// Invoke a named storage operation with positional arguments.
    #[serde(rename = "call")]
    Call { method: String, args: Vec<Value> },
}

impl Request {
    /// Short label used to prefix errors raised by this request.
    pub fn context(&self) -> String {
        match self {
            Request::Init { .. } => "init".to_string(),
            Request::Close => "close".to_string(),
            Request::RemoveStorage => "removeDB".to_string(),
            Request::Call { method, .. } => format!("call({method})"),
        }
    }
}

// The key never reaches logs.
impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Init { config_dir, .. } => f
                .debug_struct("Init")
                .field("config_dir", config_dir)
                .field("key", &"<redacted>")
                .finish(),
            Request::Close => f.write_str("Close"),
            Request::RemoveStorage => f.write_str("RemoveStorage"),
            Request::Call { method, args } => f
                .debug_struct("Call")
                .field("method", method)
                .field("args", &args.len())
                .finish(),
        }
    }
}

/// A request paired with its correlation number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedRequest {
    pub seq: u64,
    pub request: Request,
}

/// Severity of a forwarded worker log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// An error as it crosses the wire: enough to rebuild it on the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Error type name, e.g. `Storage` or `InvalidMethod`.
    pub name: String,
    /// Human-readable description. Classification runs on this.
    pub message: String,
    /// Cause chain, outermost first, when the worker had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A frame from the worker to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Outcome of the request that carried `seq`.
    #[serde(rename = "response")]
    CallResult {
        seq: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// A log statement executed inside the worker.
    #[serde(rename = "logRecord")]
    LogRecord { level: LogLevel, args: Vec<Value> },
}

/// Frame encoding or decoding failure.
#[derive(Debug, thiserror::Error)]
#[error("malformed frame: {0}")]
pub struct FrameError(#[from] serde_json::Error);

/// Serialize a message into a frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Frame, FrameError> {
    Ok(serde_json::to_string(message)?)
}

/// Parse a frame into a message.
pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T, FrameError> {
    Ok(serde_json::from_str(frame)?)
}

/// Render log arguments the way a console would: strings verbatim, anything
/// else as compact JSON, separated by spaces.
pub fn format_log_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
