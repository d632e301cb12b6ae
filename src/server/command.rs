//! Ingress Commands
//!
//! One command per line, whitespace separated, verb case-insensitive:
//!
//! ```text
//! PING
//! ACTIVITY <workspace-id> [idle-timeout-ms]
//! STOP <workspace-id>
//! EXPIRES <workspace-id>
//! STATS
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("wrong number of arguments for '{0}'")]
    Arity(&'static str),
    #[error("invalid idle timeout '{0}'")]
    InvalidTimeout(String),
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed response '{0}'")]
    MalformedResponse(String),
}

/// Parsed ingress command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Health check
    Ping,

    /// Workspace activity, optionally with its own idle timeout
    Activity {
        workspace_id: String,
        timeout_ms: Option<i64>,
    },

    /// Workspace stopped
    Stop { workspace_id: String },

    /// Current deadline lookup
    Expires { workspace_id: String },

    /// Sweeper counters
    Stats,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(ProtocolError::Empty)?;
        let args: Vec<&str> = parts.collect();

        match verb.to_ascii_uppercase().as_str() {
            "PING" => match args.as_slice() {
                [] => Ok(Command::Ping),
                _ => Err(ProtocolError::Arity("PING")),
            },
            "ACTIVITY" => match args.as_slice() {
                [id] => Ok(Command::Activity {
                    workspace_id: id.to_string(),
                    timeout_ms: None,
                }),
                [id, timeout] => {
                    let timeout_ms = timeout
                        .parse::<i64>()
                        .map_err(|_| ProtocolError::InvalidTimeout(timeout.to_string()))?;
                    Ok(Command::Activity {
                        workspace_id: id.to_string(),
                        timeout_ms: Some(timeout_ms),
                    })
                }
                _ => Err(ProtocolError::Arity("ACTIVITY")),
            },
            "STOP" => match args.as_slice() {
                [id] => Ok(Command::Stop {
                    workspace_id: id.to_string(),
                }),
                _ => Err(ProtocolError::Arity("STOP")),
            },
            "EXPIRES" => match args.as_slice() {
                [id] => Ok(Command::Expires {
                    workspace_id: id.to_string(),
                }),
                _ => Err(ProtocolError::Arity("EXPIRES")),
            },
            "STATS" => match args.as_slice() {
                [] => Ok(Command::Stats),
                _ => Err(ProtocolError::Arity("STATS")),
            },
            _ => Err(ProtocolError::Unknown(verb.to_string())),
        }
    }

    /// Encode as a request line
    pub fn to_line(&self) -> String {
        match self {
            Command::Ping => "PING".to_string(),
            Command::Activity {
                workspace_id,
                timeout_ms: Some(t),
            } => format!("ACTIVITY {} {}", workspace_id, t),
            Command::Activity {
                workspace_id,
                timeout_ms: None,
            } => format!("ACTIVITY {}", workspace_id),
            Command::Stop { workspace_id } => format!("STOP {}", workspace_id),
            Command::Expires { workspace_id } => format!("EXPIRES {}", workspace_id),
            Command::Stats => "STATS".to_string(),
        }
    }
}

/// Response to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Simple OK response
    Ok,

    /// OK carrying the new deadline
    Deadline(u64),

    /// Deadline lookup hit
    Expiration(u64),

    /// Free-form value
    Value(String),

    /// Nothing tracked
    Nil,

    /// Pong response (for PING)
    Pong,

    /// Error response
    Error(String),
}

impl Response {
    pub fn to_line(&self) -> String {
        match self {
            Response::Ok => "OK".to_string(),
            Response::Deadline(at) => format!("OK {}", at),
            Response::Expiration(at) => format!("VALUE {} {}", at, rfc3339(*at)),
            Response::Value(v) => format!("VALUE {}", v),
            Response::Nil => "NIL".to_string(),
            Response::Pong => "PONG".to_string(),
            Response::Error(msg) => format!("ERR {}", msg),
        }
    }

    /// Parse a response line
    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedResponse(line.to_string());
        let (head, rest) = match line.split_once(' ') {
            Some((h, r)) => (h, Some(r)),
            None => (line, None),
        };

        match (head, rest) {
            ("OK", None) => Ok(Response::Ok),
            ("OK", Some(at)) => at.parse().map(Response::Deadline).map_err(|_| malformed()),
            ("NIL", None) => Ok(Response::Nil),
            ("PONG", None) => Ok(Response::Pong),
            ("ERR", Some(msg)) => Ok(Response::Error(msg.to_string())),
            ("VALUE", Some(v)) => {
                // Deadline lookups carry "<millis> <rfc3339>", or "<millis> -"
                // when the instant has no calendar form
                let expiration = v.split_once(' ').and_then(|(ms, stamp)| {
                    let at = ms.parse::<u64>().ok()?;
                    (stamp == NO_STAMP || DateTime::parse_from_rfc3339(stamp).is_ok())
                        .then_some(at)
                });
                Ok(match expiration {
                    Some(at) => Response::Expiration(at),
                    None => Response::Value(v.to_string()),
                })
            }
            _ => Err(malformed()),
        }
    }
}

const NO_STAMP: &str = "-";

fn rfc3339(epoch_ms: u64) -> String {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| NO_STAMP.to_string())
}
