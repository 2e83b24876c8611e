//! Per-connection pumps.
//!
//! Each client connection runs two tasks: a read pump that forwards inbound
//! frames to the hub, and a write pump that drains the connection's outbound
//! queue onto the transport and keeps the peer alive with pings. Both work on
//! [`Frame`]s over a generic `Stream`/`Sink`, so the transport (axum WebSocket
//! in production, channels in tests) is plugged in by the caller.

use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use relay_core::{Address, ConnectionId};
use relay_settings::ConnectionSettings;
use relay_telemetry::metrics as names;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::hub::{HubHandle, Registration};

/// Transport-neutral unit moved by the pumps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Io(String),

    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("no pong received within {0:?}")]
    ReadTimeout(Duration),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

impl TransportError {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::FrameTooLarge { .. } => "frame_too_large",
            Self::ReadTimeout(_) => "read_timeout",
            Self::WriteTimeout(_) => "write_timeout",
        }
    }
}

/// Limits and deadlines applied to every connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_frame_bytes: usize,
    pub send_queue_capacity: usize,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub ping_period: Duration,
}

impl From<&ConnectionSettings> for ConnectionLimits {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            max_frame_bytes: settings.max_frame_bytes,
            send_queue_capacity: settings.send_queue_capacity,
            pong_wait: settings.pong_wait(),
            write_wait: settings.write_wait(),
            ping_period: settings.ping_period(),
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from(&ConnectionSettings::default())
    }
}

/// A pump that stopped without a transport fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpExit {
    /// The client closed the connection or the stream ended.
    PeerClosed,
    /// The hub stopped accepting events.
    HubGone,
    /// The hub closed the outbound queue.
    QueueClosed,
}

/// Forward inbound data frames to the hub until the peer leaves, a frame is
/// too large, or no pong arrives before the read deadline. Only pongs move
/// the deadline.
pub async fn read_pump<S>(
    id: ConnectionId,
    mut stream: S,
    hub: HubHandle,
    limits: ConnectionLimits,
) -> Result<PumpExit, TransportError>
where
    S: Stream<Item = Result<Frame, TransportError>> + Unpin,
{
    let deadline = time::sleep(limits.pong_wait);
    tokio::pin!(deadline);

    loop {
        let next = tokio::select! {
            () = &mut deadline => return Err(TransportError::ReadTimeout(limits.pong_wait)),
            next = stream.next() => next,
        };

        match next {
            None | Some(Ok(Frame::Close)) => return Ok(PumpExit::PeerClosed),
            Some(Err(error)) => return Err(error),
            Some(Ok(Frame::Pong(_))) => {
                trace!(conn_id = %id, "pong");
                deadline.as_mut().reset(Instant::now() + limits.pong_wait);
            }
            Some(Ok(Frame::Ping(_))) => {}
            Some(Ok(Frame::Data(data))) => {
                if data.len() > limits.max_frame_bytes {
                    return Err(TransportError::FrameTooLarge {
                        size: data.len(),
                        limit: limits.max_frame_bytes,
                    });
                }
                if hub.inbound(id.clone(), data).await.is_err() {
                    return Ok(PumpExit::HubGone);
                }
            }
        }
    }
}

/// Drain the outbound queue onto the transport, pinging every
/// `ping_period`. When the hub closes the queue a close frame is sent. The
/// sink is then closed, unless a write has already missed its deadline, so a
/// stalled peer costs at most one `write_wait`.
pub async fn write_pump<K>(
    id: ConnectionId,
    mut sink: K,
    mut outbound: mpsc::Receiver<Bytes>,
    limits: ConnectionLimits,
) -> Result<PumpExit, TransportError>
where
    K: Sink<Frame, Error = TransportError> + Unpin,
{
    let result = drain_outbound(&id, &mut sink, &mut outbound, &limits).await;
    if !matches!(result, Err(TransportError::WriteTimeout(_))) {
        let _ = time::timeout(limits.write_wait, sink.close()).await;
    }
    result
}

async fn drain_outbound<K>(
    id: &ConnectionId,
    sink: &mut K,
    outbound: &mut mpsc::Receiver<Bytes>,
    limits: &ConnectionLimits,
) -> Result<PumpExit, TransportError>
where
    K: Sink<Frame, Error = TransportError> + Unpin,
{
    let mut ping = time::interval_at(Instant::now() + limits.ping_period, limits.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(data) => write_frame(sink, Frame::Data(data), limits.write_wait).await?,
                None => {
                    debug!(conn_id = %id, "outbound queue closed");
                    return match write_frame(sink, Frame::Close, limits.write_wait).await {
                        Err(timeout @ TransportError::WriteTimeout(_)) => Err(timeout),
                        _ => Ok(PumpExit::QueueClosed),
                    };
                }
            },
            _ = ping.tick() => {
                write_frame(sink, Frame::Ping(Bytes::new()), limits.write_wait).await?;
                trace!(conn_id = %id, "ping");
            }
        }
    }
}

async fn write_frame<K>(sink: &mut K, frame: Frame, wait: Duration) -> Result<(), TransportError>
where
    K: Sink<Frame, Error = TransportError> + Unpin,
{
    match time::timeout(wait, sink.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::WriteTimeout(wait)),
    }
}

/// Drive one client connection from registration to teardown.
///
/// Registers with the hub, runs both pumps, and deregisters exactly once
/// when either pump ends. If the reader ends first the writer is given
/// `write_wait` to flush what the hub already queued and send its close frame.
pub async fn run_connection<S, K>(
    address: Address,
    stream: S,
    sink: K,
    hub: HubHandle,
    limits: ConnectionLimits,
) where
    S: Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
    K: Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
{
    let id = ConnectionId::new();
    let (outbound, queue) = mpsc::channel(limits.send_queue_capacity);
    let registration = Registration {
        id: id.clone(),
        address: address.clone(),
        outbound,
    };
    if hub.register(registration).await.is_err() {
        warn!(address = %address, "hub unavailable, dropping connection");
        return;
    }

    let mut reader = tokio::spawn(read_pump(id.clone(), stream, hub.clone(), limits.clone()));
    let mut writer = tokio::spawn(write_pump(id.clone(), sink, queue, limits.clone()));

    let writer_done = tokio::select! {
        result = &mut reader => {
            log_exit(&id, "read", result);
            false
        }
        result = &mut writer => {
            log_exit(&id, "write", result);
            true
        }
    };

    let _ = hub.deregister(id.clone()).await;

    if writer_done {
        reader.abort();
    } else {
        match time::timeout(limits.write_wait, &mut writer).await {
            Ok(result) => log_exit(&id, "write", result),
            Err(_) => writer.abort(),
        }
    }
    debug!(conn_id = %id, address = %address, "connection finished");
}

fn log_exit(
    id: &ConnectionId,
    pump: &'static str,
    result: Result<Result<PumpExit, TransportError>, JoinError>,
) {
    match result {
        Ok(Ok(exit)) => debug!(conn_id = %id, pump, exit = ?exit, "pump finished"),
        Ok(Err(error)) => {
            counter!(names::TRANSPORT_ERRORS_TOTAL, "kind" => error.kind()).increment(1);
            info!(conn_id = %id, pump, error = %error, "connection dropped");
        }
        Err(error) if error.is_cancelled() => {}
        Err(error) => warn!(conn_id = %id, pump, error = %error, "pump task failed"),
    }
}
