//! Connection Handler
//!
//! Reads command lines and dispatches them to the activity tracker.

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::debug;

use super::codec::CommandCodec;
use super::command::{Command, Response};
use crate::error::TrackError;
use crate::metrics::SweepMetrics;
use crate::tracker::ActivityTracker;

/// Connection handler
pub struct Handler {
    tracker: ActivityTracker,
    metrics: Arc<SweepMetrics>,
}

impl Handler {
    /// Create a new handler
    pub fn new(tracker: ActivityTracker, metrics: Arc<SweepMetrics>) -> Self {
        Self { tracker, metrics }
    }

    pub fn codec() -> CommandCodec {
        CommandCodec::new()
    }

    /// Run the handler for a connection. Bad lines get an error reply and
    /// the connection stays open; only I/O errors end it.
    pub async fn run<T>(self, mut framed: Framed<T, CommandCodec>) -> std::io::Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(result) = framed.next().await {
            let response = match result? {
                Ok(line) => {
                    let start = Instant::now();
                    let response = match Command::parse(&line) {
                        Ok(cmd) => self.execute(cmd).await,
                        Err(e) => Response::Error(e.to_string()),
                    };
                    debug!(line = %line, latency = ?start.elapsed(), "Command executed");
                    response
                }
                Err(e) => {
                    debug!(error = %e, "Rejected input line");
                    Response::Error(e.to_string())
                }
            };

            framed.send(response.to_line()).await?;
        }

        Ok(())
    }

    /// Execute a command and return response
    pub async fn execute(&self, cmd: Command) -> Response {
        match cmd {
            Command::Ping => Response::Pong,

            Command::Activity {
                workspace_id,
                timeout_ms,
            } => {
                let result = match timeout_ms {
                    Some(t) => self.tracker.record_activity(&workspace_id, t).await,
                    None => self.tracker.record_default_activity(&workspace_id).await,
                };
                match result {
                    Ok(at) => Response::Deadline(at),
                    Err(TrackError::Config(e)) => Response::Error(e.to_string()),
                    Err(TrackError::Store(e)) => Response::Error(format!("store: {}", e)),
                }
            }

            Command::Stop { workspace_id } => match self.tracker.record_stop(&workspace_id).await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error(format!("store: {}", e)),
            },

            Command::Expires { workspace_id } => {
                match self.tracker.expiration(&workspace_id).await {
                    Ok(Some(at)) => Response::Expiration(at),
                    Ok(None) => Response::Nil,
                    Err(e) => Response::Error(format!("store: {}", e)),
                }
            }

            Command::Stats => Response::Value(self.metrics.summary()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::server::codec::MAX_LINE_LENGTH;
    use crate::storage::MemoryStore;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn handler() -> (Handler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let tracker = ActivityTracker::new(
            Arc::new(MemoryStore::with_shard_amount(2)),
            clock.clone(),
            Duration::from_secs(10),
        )
        .unwrap();
        (Handler::new(tracker, Arc::new(SweepMetrics::new())), clock)
    }

    #[tokio::test]
    async fn test_execute() {
        let (handler, _clock) = handler();

        assert_eq!(handler.execute(Command::Ping).await, Response::Pong);
        assert_eq!(
            handler
                .execute(Command::Activity {
                    workspace_id: "ws".into(),
                    timeout_ms: None
                })
                .await,
            Response::Deadline(11_000)
        );
        assert_eq!(
            handler
                .execute(Command::Expires {
                    workspace_id: "ws".into()
                })
                .await,
            Response::Expiration(11_000)
        );
        assert_eq!(
            handler
                .execute(Command::Stop {
                    workspace_id: "ws".into()
                })
                .await,
            Response::Ok
        );
        assert_eq!(
            handler
                .execute(Command::Expires {
                    workspace_id: "ws".into()
                })
                .await,
            Response::Nil
        );
    }

    #[tokio::test]
    async fn test_connection_survives_bad_lines() {
        let (handler, _clock) = handler();
        let (client, server) = duplex(64 * 1024);
        let running = tokio::spawn(handler.run(Framed::new(server, Handler::codec())));

        let (read, mut write) = tokio::io::split(client);
        let mut replies = BufReader::new(read).lines();

        let long = format!("ACTIVITY {}\n", "x".repeat(MAX_LINE_LENGTH));
        write.write_all(long.as_bytes()).await.unwrap();
        let reply = replies.next_line().await.unwrap().unwrap();
        assert_eq!(reply, format!("ERR line exceeds {} bytes", MAX_LINE_LENGTH));

        write.write_all(b"ACTIVITY \xff\xfe\n").await.unwrap();
        let reply = replies.next_line().await.unwrap().unwrap();
        assert_eq!(reply, "ERR line is not valid UTF-8");

        write.write_all(b"LAUNCH ws\nPING\n").await.unwrap();
        let reply = replies.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with("ERR unknown command"));
        assert_eq!(replies.next_line().await.unwrap().unwrap(), "PONG");

        drop(write);
        drop(replies);
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_timeout_is_an_error_response() {
        let (handler, _clock) = handler();
        let response = handler
            .execute(Command::Activity {
                workspace_id: "ws-3".into(),
                timeout_ms: Some(-1),
            })
            .await;
        assert!(matches!(response, Response::Error(msg) if msg.contains("must be positive")));
    }
}
