//! [`Transport`] over a serial radio dongle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use super::codec::RadioCodec;
use crate::error::{RadioLinkError, Result};
use crate::rtp::{Packet, Port};
use crate::transport::{RxHandler, Transport};

/// Outbound frames queued before `send` starts failing
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

type HandlerTable = Arc<Mutex<HashMap<Port, RxHandler>>>;

/// Routes frames between protocol entities and a serial port
///
/// The port is owned by a background I/O task started by
/// [`SerialTransport::spawn`]. The task ends with `Ok(())` once every
/// handle to the transport is dropped, or with an error if the port fails.
pub struct SerialTransport {
    handlers: HandlerTable,
    outbox: mpsc::Sender<Packet>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("queued_capacity", &self.outbox.capacity())
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Start the I/O task for `stream` on the current tokio runtime
    pub fn spawn<S>(stream: S, queue_depth: usize) -> (Arc<Self>, JoinHandle<Result<()>>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, rx) = mpsc::channel(queue_depth.max(1));
        let handlers: HandlerTable = Arc::default();

        let framed = Framed::new(stream, RadioCodec::new());
        let handle = tokio::spawn(run_io(framed, rx, handlers.clone()));
        (Arc::new(Self { handlers, outbox }), handle)
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HashMap<Port, RxHandler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SerialTransport {
    fn register_receive_handler(&self, port: Port, handler: RxHandler) -> Result<()> {
        if self.lock_handlers().insert(port, handler).is_some() {
            debug!(?port, "Replaced receive handler");
        }
        Ok(())
    }

    fn close_port(&self, port: Port) {
        self.lock_handlers().remove(&port);
    }

    fn send(&self, packet: Packet) -> Result<()> {
        self.outbox.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => RadioLinkError::Transport("Outbound queue full".to_string()),
            TrySendError::Closed(_) => RadioLinkError::Transport("Serial I/O task stopped".to_string()),
        })
    }
}

async fn run_io<S>(
    mut framed: Framed<S, RadioCodec>,
    mut outbox: mpsc::Receiver<Packet>,
    handlers: HandlerTable,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            outgoing = outbox.recv() => match outgoing {
                Some(packet) => {
                    let port = packet.port();
                    match framed.send(packet).await {
                        Ok(()) => trace!(?port, "Sent frame"),
                        Err(RadioLinkError::Frame(e)) => warn!(?port, "Dropping unencodable frame: {}", e),
                        Err(e) => {
                            return Err(RadioLinkError::Serial(format!("Failed to write packet: {}", e)));
                        }
                    }
                }
                None => {
                    debug!("Transport dropped, stopping serial I/O");
                    return Ok(());
                }
            },
            inbound = framed.next() => match inbound {
                Some(Ok(packet)) => dispatch(&handlers, &packet),
                Some(Err(e)) => {
                    return Err(RadioLinkError::Serial(format!("Failed to read: {}", e)));
                }
                None => {
                    warn!("Serial port closed");
                    return Err(RadioLinkError::Serial("Serial port closed".to_string()));
                }
            }
        }
    }
}

fn dispatch(handlers: &HandlerTable, packet: &Packet) {
    let handler = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&packet.port())
        .cloned();

    match handler {
        Some(handler) => handler(packet),
        None => trace!(port = ?packet.port(), "No handler for port, frame dropped"),
    }
}
