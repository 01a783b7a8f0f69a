//! # Transport Module
//!
//! The dispatch layer protocol entities talk through. It routes inbound
//! frames to the handler registered for their port and puts outbound
//! frames on the radio.

use std::sync::Arc;

use crate::error::Result;
use crate::rtp::{Packet, Port};

/// Callback invoked for every frame arriving on a registered port
///
/// Handlers run on the receive path and must return quickly.
pub type RxHandler = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Frame dispatch and transmit primitives
///
/// Implementations must not hold internal locks while invoking a handler,
/// since handlers take their entity's state lock and entities call back
/// into the transport under that same lock.
pub trait Transport: Send + Sync {
    /// Route frames on `port` to `handler`, replacing any previous handler
    fn register_receive_handler(&self, port: Port, handler: RxHandler) -> Result<()>;

    /// Stop routing frames on `port`
    fn close_port(&self, port: Port);

    /// Queue a frame for transmission
    fn send(&self, packet: Packet) -> Result<()>;
}
