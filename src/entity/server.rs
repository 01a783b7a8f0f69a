//! # Base Station
//!
//! Base-station side of the control port: tracks when each robot was last
//! heard from and decides which robot owns which of the six slots.
//!
//! Slot lifecycle:
//! - A live robot keeps its slot from cycle to cycle.
//! - A robot silent for longer than the client timeout loses its slot; its
//!   `ClientInfo` is kept so it can come back.
//! - An unassigned robot replying in an open slot claims it. The claim is
//!   granted when the next frame is built, unless another robot claimed the
//!   same slot in the same cycle, in which case neither gets it.
//!
//! The slot a reply belongs to is inferred from its arrival time relative
//! to the start of the cycle (the moment the last control frame was built),
//! less the configured reply latency.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::client::DEFAULT_SLOT_DURATION;
use super::ProtocolEntity;
use crate::error::{RadioLinkError, Result};
use crate::messages::{decode_reply, encode_control_frame, ControlFrame, ControlMessage, ReplyMessage, ROBOT_ID_NONE};
use crate::rtp::protocol::{CLIENT_TIMEOUT_MS, SLOT_COUNT};
use crate::rtp::{FrameHeader, Packet, PayloadType, Port};
use crate::transport::Transport;

/// Default silence after which a robot's slot is reclaimed
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_millis(CLIENT_TIMEOUT_MS);

/// Base-station settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Silence after which a robot is treated as disconnected
    pub client_timeout: Duration,

    /// Width of one reply slot
    pub slot_duration: Duration,

    /// Time a reply spends in transit on top of its slot delay
    ///
    /// Subtracted from a reply's arrival time before its slot is inferred.
    pub reply_latency: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            slot_duration: DEFAULT_SLOT_DURATION,
            reply_latency: Duration::ZERO,
        }
    }
}

/// Per-robot liveness record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub robot_id: u8,

    /// When the last valid reply arrived
    pub last_packet_time: Instant,

    /// Hardware revision from the last reply
    pub hardware_revision: u8,
}

impl ClientInfo {
    /// Time since the last reply
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_packet_time)
    }

    /// Strictly longer than `timeout` without a reply
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        self.silence(now) > timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SlotClaim {
    #[default]
    Unclaimed,
    Claimed(u8),
    Contested { first: u8 },
}

#[derive(Debug, Default)]
struct ServerState {
    started: bool,
    clients: BTreeMap<u8, ClientInfo>,
    /// Slot index -> robot holding it
    slots: [Option<u8>; SLOT_COUNT],
    /// Claims made on open slots during the current cycle
    claims: [SlotClaim; SLOT_COUNT],
    /// Latest command per robot
    commands: HashMap<u8, ControlMessage>,
    cycle_start: Option<Instant>,
}

impl ServerState {
    fn slot_of(&self, robot_id: u8) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == Some(robot_id))
    }

    fn record_reply(&mut self, config: &ServerConfig, reply: &ReplyMessage, now: Instant) -> Result<()> {
        let robot_id = reply.sender_id();
        if robot_id == ROBOT_ID_NONE {
            return Err(RadioLinkError::InvalidRobotId(robot_id));
        }

        let info = self.clients.entry(robot_id).or_insert_with(|| {
            info!(robot_id, "Discovered robot");
            ClientInfo {
                robot_id,
                last_packet_time: now,
                hardware_revision: reply.hardware_revision(),
            }
        });
        info.last_packet_time = now;
        info.hardware_revision = reply.hardware_revision();

        if self.slot_of(robot_id).is_some() {
            return Ok(());
        }

        // Without a cycle reference the reply cannot be placed in a slot
        let Some(cycle_start) = self.cycle_start else {
            return Ok(());
        };

        let elapsed = now
            .saturating_duration_since(cycle_start)
            .saturating_sub(config.reply_latency)
            .as_micros();
        let slot = elapsed
            .checked_div(config.slot_duration.as_micros())
            .unwrap_or(0) as usize;
        if slot >= SLOT_COUNT {
            debug!(robot_id, elapsed_us = elapsed as u64, "Reply arrived after the last slot");
            return Ok(());
        }

        if let Some(holder) = self.slots[slot] {
            debug!(robot_id, slot, holder, "Reply in a slot held by another robot");
            return Ok(());
        }

        match self.claims[slot] {
            SlotClaim::Unclaimed => {
                trace!(robot_id, slot, "Open slot claimed");
                self.claims[slot] = SlotClaim::Claimed(robot_id);
                Ok(())
            }
            SlotClaim::Claimed(first) if first == robot_id => Ok(()),
            SlotClaim::Claimed(first) | SlotClaim::Contested { first } => {
                self.claims[slot] = SlotClaim::Contested { first };
                warn!(slot, first, second = robot_id, "Slot collision");
                Err(RadioLinkError::SlotCollision {
                    slot,
                    first,
                    second: robot_id,
                })
            }
        }
    }

    /// Grant uncontested claims from the cycle that just ended
    fn resolve_claims(&mut self) {
        for slot in 0..SLOT_COUNT {
            match std::mem::take(&mut self.claims[slot]) {
                SlotClaim::Claimed(robot_id) => {
                    if self.slots[slot].is_none() && self.slot_of(robot_id).is_none() {
                        self.slots[slot] = Some(robot_id);
                        info!(robot_id, slot, "Robot assigned to slot");
                    }
                }
                SlotClaim::Contested { first } => {
                    debug!(slot, first, "Contested slot left open");
                }
                SlotClaim::Unclaimed => {}
            }
        }
    }

    /// Free the slots of robots that went silent
    fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<u8> {
        let mut timed_out = Vec::new();
        for slot in 0..SLOT_COUNT {
            let Some(robot_id) = self.slots[slot] else {
                continue;
            };

            let expired = self
                .clients
                .get(&robot_id)
                .map_or(true, |info| info.is_timed_out(now, timeout));
            if expired {
                self.slots[slot] = None;
                timed_out.push(robot_id);
                info!(robot_id, slot, "Robot timed out, slot reclaimable");
            }
        }
        timed_out
    }

    fn build_frame(&mut self, config: &ServerConfig, now: Instant) -> ControlFrame {
        self.resolve_claims();
        self.sweep(now, config.client_timeout);

        let mut frame = ControlFrame::empty();
        for (msg, holder) in frame.slots.iter_mut().zip(self.slots.iter()) {
            if let Some(robot_id) = *holder {
                *msg = match self.commands.get(&robot_id) {
                    Some(command) => ControlMessage {
                        recipient_id: robot_id,
                        ..*command
                    },
                    None => ControlMessage::hold(robot_id),
                };
            }
        }

        self.cycle_start = Some(now);
        frame
    }
}

struct ServerShared {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<ServerState>,
}

/// Base-station protocol entity
///
/// Cheap to clone; clones share the same client table.
#[derive(Clone)]
pub struct ProtocolServer {
    shared: Arc<ServerShared>,
}

impl std::fmt::Debug for ProtocolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolServer")
            .field("config", &self.shared.config)
            .field("slots", &self.slot_assignments())
            .finish_non_exhaustive()
    }
}

impl ProtocolServer {
    /// Create a stopped base station
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                transport,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Queue the command sent to `command.recipient_id` from now on
    ///
    /// # Errors
    ///
    /// Returns `InvalidRobotId` for the open-slot id 0
    pub fn set_command(&self, command: ControlMessage) -> Result<()> {
        if command.is_open() {
            return Err(RadioLinkError::InvalidRobotId(command.recipient_id));
        }
        self.shared
            .lock_state()
            .commands
            .insert(command.recipient_id, command);
        Ok(())
    }

    /// Drop the queued command; the robot gets a hold command instead
    pub fn clear_command(&self, robot_id: u8) -> Option<ControlMessage> {
        self.shared.lock_state().commands.remove(&robot_id)
    }

    /// Record a reply received at `now`
    ///
    /// # Errors
    ///
    /// - `InvalidRobotId` for sender id 0
    /// - `SlotCollision` if another robot already claimed the same open slot
    ///   this cycle (the liveness update still happens)
    pub fn record_reply(&self, reply: &ReplyMessage, now: Instant) -> Result<()> {
        self.shared
            .lock_state()
            .record_reply(&self.shared.config, reply, now)
    }

    /// Free the slots of robots silent for longer than the client timeout
    ///
    /// Returns the ids whose slots were freed.
    pub fn sweep_timeouts(&self, now: Instant) -> Vec<u8> {
        self.shared
            .lock_state()
            .sweep(now, self.shared.config.client_timeout)
    }

    /// Build the next control frame and start a new reply cycle at `now`
    pub fn build_control_frame(&self, now: Instant) -> ControlFrame {
        self.shared.lock_state().build_frame(&self.shared.config, now)
    }

    /// Build, encode and send the next control frame
    ///
    /// # Errors
    ///
    /// - `NotStarted` if the base station is stopped
    /// - Transport errors from the send
    pub fn transmit_control_frame(&self) -> Result<ControlFrame> {
        let frame = {
            let mut state = self.shared.lock_state();
            if !state.started {
                return Err(RadioLinkError::NotStarted);
            }
            state.build_frame(&self.shared.config, Instant::now())
        };

        let packet = Packet::new(FrameHeader::control(), encode_control_frame(&frame).to_vec())?;
        self.shared.transport.send(packet)?;
        Ok(frame)
    }

    pub fn client_info(&self, robot_id: u8) -> Option<ClientInfo> {
        self.shared.lock_state().clients.get(&robot_id).copied()
    }

    /// Every robot ever heard from, by id
    pub fn clients(&self) -> Vec<ClientInfo> {
        self.shared.lock_state().clients.values().copied().collect()
    }

    /// Liveness of one robot
    ///
    /// `Ok(None)` if the robot has never replied.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the robot is past the client timeout
    pub fn check_client(&self, robot_id: u8, now: Instant) -> Result<Option<ClientInfo>> {
        let Some(info) = self.client_info(robot_id) else {
            return Ok(None);
        };

        if info.is_timed_out(now, self.shared.config.client_timeout) {
            return Err(RadioLinkError::Timeout {
                robot_id,
                silent_ms: info.silence(now).as_millis() as u64,
            });
        }
        Ok(Some(info))
    }

    /// Whether `robot_id` is known and silent past the client timeout
    pub fn is_reclaimable(&self, robot_id: u8, now: Instant) -> bool {
        matches!(self.check_client(robot_id, now), Err(RadioLinkError::Timeout { .. }))
    }

    /// Robot holding each slot
    pub fn slot_assignments(&self) -> [Option<u8>; SLOT_COUNT] {
        self.shared.lock_state().slots
    }

    pub fn assigned_slot(&self, robot_id: u8) -> Option<usize> {
        self.shared.lock_state().slot_of(robot_id)
    }
}

impl ProtocolEntity for ProtocolServer {
    fn start(&self) -> Result<()> {
        let mut state = self.shared.lock_state();
        if state.started {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.shared);
        self.shared.transport.register_receive_handler(
            Port::Control,
            Arc::new(move |packet: &Packet| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_packet(packet);
                }
            }),
        )?;

        state.started = true;
        info!("Base station started");
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.shared.lock_state();
        if state.started {
            self.shared.transport.close_port(Port::Control);
            info!("Base station stopped");
        }

        state.started = false;
        state.slots = [None; SLOT_COUNT];
        state.claims = [SlotClaim::Unclaimed; SLOT_COUNT];
        state.cycle_start = None;
    }

    fn on_receive(&self, packet: &Packet) {
        self.shared.handle_packet(packet);
    }

    fn is_started(&self) -> bool {
        self.shared.lock_state().started
    }
}

impl ServerShared {
    fn lock_state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_packet(&self, packet: &Packet) {
        if packet.header.payload_type != PayloadType::Control {
            trace!(payload_type = ?packet.header.payload_type, "Ignoring non-control frame");
            return;
        }

        let reply = match decode_reply(&packet.payload) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Dropping malformed reply: {}", e);
                return;
            }
        };

        let mut state = self.lock_state();
        if !state.started {
            trace!("Dropping reply received while stopped");
            return;
        }

        match state.record_reply(&self.config, &reply, Instant::now()) {
            Ok(()) | Err(RadioLinkError::SlotCollision { .. }) => {}
            Err(e) => debug!("Rejected reply: {}", e),
        }
    }
}

impl Drop for ServerShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.started {
            self.transport.close_port(Port::Control);
        }
    }
}
