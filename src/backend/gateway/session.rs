//! Per-connection socket tasks
//!
//! Every accepted socket gets three tasks:
//!
//! - **read loop**: decodes frames, answers heartbeats, hands everything
//!   else to the owning shard's work queue. Ends on close, transport error
//!   or cancellation.
//! - **write loop**: sole writer to the socket. Drains the outbound queue
//!   and sends a Ping every heartbeat interval; tears the connection down
//!   once the last heartbeat is older than the timeout.
//! - **supervisor**: waits for the first loop to exit, cancels the other,
//!   and unregisters the connection exactly once.
//!
//! The loops are generic over the socket so tests can drive them with an
//! in-memory stream and sink.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::gateway::connection::Connection;
use crate::backend::shard::Shard;
use crate::shared::config::ConnectionConfig;
use crate::shared::envelope::{self, Envelope};

/// Keep-alive timing for the write loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub interval: Duration,
    pub timeout: Duration,
}

impl From<&ConnectionConfig> for Keepalive {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            interval: config.heartbeat_interval().max(Duration::from_millis(10)),
            timeout: config.heartbeat_timeout(),
        }
    }
}

/// Start the read, write and supervisor tasks for a registered connection
pub fn spawn_session<S>(
    shard: Arc<Shard>,
    connection: Arc<Connection>,
    outbound: mpsc::Receiver<Vec<u8>>,
    socket: S,
    keepalive: Keepalive,
) -> JoinHandle<()>
where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Send + 'static,
{
    let (sink, stream) = socket.split();
    let mut reader = tokio::spawn(read_loop(Arc::clone(&shard), Arc::clone(&connection), stream));
    let mut writer = tokio::spawn(write_loop(Arc::clone(&connection), outbound, sink, keepalive));

    tokio::spawn(async move {
        tokio::select! {
            result = &mut reader => {
                report_exit(&connection, "read", result);
                connection.cancel();
                report_exit(&connection, "write", writer.await);
            }
            result = &mut writer => {
                report_exit(&connection, "write", result);
                connection.cancel();
                report_exit(&connection, "read", reader.await);
            }
        }
        shard.unregister(&connection).await;
    })
}

fn report_exit(connection: &Connection, side: &str, result: Result<(), JoinError>) {
    if let Err(err) = result {
        tracing::error!(
            "[Connection] {} loop for {} ended abnormally: {}",
            side,
            connection.identity(),
            err
        );
    }
}

async fn read_loop<R>(shard: Arc<Shard>, connection: Arc<Connection>, mut stream: R)
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = connection.cancelled() => break,
            next = stream.next() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                tracing::debug!("[Connection] Read error from {}: {}", connection.identity(), err);
                break;
            }
            None => break,
        };

        match message {
            Message::Binary(bytes) => match envelope::decode(&bytes) {
                Ok(parsed) => handle_inbound(&shard, &connection, parsed, bytes.to_vec()),
                Err(err) => tracing::warn!(
                    "[Connection] Dropping undecodable frame from {}: {}",
                    connection.identity(),
                    err
                ),
            },
            Message::Text(text) => {
                let normalised = envelope::decode_text(text.as_str())
                    .and_then(|parsed| envelope::encode(&parsed).map(|raw| (parsed, raw)));
                match normalised {
                    Ok((parsed, raw)) => handle_inbound(&shard, &connection, parsed, raw),
                    Err(err) => tracing::warn!(
                        "[Connection] Dropping malformed text frame from {}: {}",
                        connection.identity(),
                        err
                    ),
                }
            }
            Message::Ping(_) | Message::Pong(_) => connection.touch(),
            Message::Close(_) => {
                tracing::debug!("[Connection] {} sent close", connection.identity());
                break;
            }
        }
    }
    connection.cancel();
}

fn handle_inbound(shard: &Shard, connection: &Connection, parsed: Envelope, raw: Vec<u8>) {
    if parsed.is_heartbeat() {
        connection.touch();
        if let Err(err) = connection.send_envelope(&Envelope::pong()) {
            tracing::debug!("[Connection] Could not answer heartbeat from {}: {}", connection.identity(), err);
        }
        return;
    }
    // Drops are logged and counted by the shard.
    let _ = shard.enqueue_envelope(parsed, raw);
}

async fn write_loop<W>(connection: Arc<Connection>, mut outbound: mpsc::Receiver<Vec<u8>>, mut sink: W, keepalive: Keepalive)
where
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + keepalive.interval, keepalive.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = connection.cancelled() => break,
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if let Err(err) = sink.send(Message::Binary(frame.into())).await {
                    tracing::debug!("[Connection] Write to {} failed: {}", connection.identity(), err);
                    break;
                }
            }
            _ = ticker.tick() => {
                let age = connection.heartbeat_age();
                if age > keepalive.timeout {
                    tracing::info!(
                        "[Connection] {} missed heartbeats for {:?}, closing",
                        connection.identity(),
                        age
                    );
                    break;
                }
                if let Err(err) = sink.send(Message::Ping(Bytes::new())).await {
                    tracing::debug!("[Connection] Ping to {} failed: {}", connection.identity(), err);
                    break;
                }
            }
        }
    }
    connection.cancel();
    let _ = sink.close().await;
}
