//! # Robot Client
//!
//! Robot side of the control port. Each control frame is scanned for this
//! robot's id; the slot it is found in fixes when the reply goes out.
//!
//! ```text
//! Stopped --start--> Started{Disconnected} --addressed--> Started{Connected}
//!                           ^                                  |
//!                           +--- not addressed / silence ------+
//! ```
//!
//! `stop` returns to `Stopped` from any state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use super::timer::{ScheduledTask, Watchdog};
use super::ProtocolEntity;
use crate::error::{RadioLinkError, Result};
use crate::messages::{decode_control_frame, encode_reply, ControlFrame, ControlMessage, ReplyMessage, ROBOT_ID_NONE};
use crate::rtp::protocol::SLOT_COUNT;
use crate::rtp::{FrameHeader, Packet, PayloadType, Port};
use crate::transport::Transport;

/// Default reply slot width
pub const DEFAULT_SLOT_DURATION: Duration = Duration::from_micros(2000);

/// Default silence after which the robot considers the base station gone
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_millis(500);

/// Robot-side link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Robot client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This robot's id (non-zero)
    pub robot_id: u8,

    /// Hardware revision reported in replies (4 bits)
    pub hardware_revision: u8,

    /// Width of one reply slot
    pub slot_duration: Duration,

    /// Control-frame silence that forces a disconnect
    pub silence_timeout: Duration,

    /// Try to claim an open slot while unassigned
    pub claim_open_slots: bool,
}

impl ClientConfig {
    pub fn new(robot_id: u8) -> Self {
        Self {
            robot_id,
            hardware_revision: 0,
            slot_duration: DEFAULT_SLOT_DURATION,
            silence_timeout: DEFAULT_SILENCE_TIMEOUT,
            claim_open_slots: true,
        }
    }
}

struct ClientState {
    started: bool,
    connection: ConnectionState,
    /// Most recent command addressed to us
    current_command: Option<ControlMessage>,
    reply_timer: ScheduledTask,
    reply_slot: Option<usize>,
    silence_watchdog: Watchdog,
    rng: StdRng,
}

struct ClientShared {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<ClientState>,
}

/// Robot-side protocol entity
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ProtocolClient {
    shared: Arc<ClientShared>,
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("robot_id", &self.shared.config.robot_id)
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl ProtocolClient {
    /// Create a stopped client
    ///
    /// # Errors
    ///
    /// Returns `InvalidRobotId` for robot id 0
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_rng(config, transport, StdRng::from_entropy())
    }

    /// Create a stopped client with a fixed open-slot selection RNG
    pub fn with_rng(config: ClientConfig, transport: Arc<dyn Transport>, rng: StdRng) -> Result<Self> {
        if config.robot_id == ROBOT_ID_NONE {
            return Err(RadioLinkError::InvalidRobotId(config.robot_id));
        }

        let state = ClientState {
            started: false,
            connection: ConnectionState::Disconnected,
            current_command: None,
            reply_timer: ScheduledTask::new(),
            reply_slot: None,
            silence_watchdog: Watchdog::new(),
            rng,
        };

        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                transport,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn robot_id(&self) -> u8 {
        self.shared.config.robot_id
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock_state().connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Latest command addressed to this robot
    pub fn current_command(&self) -> Option<ControlMessage> {
        self.shared.lock_state().current_command
    }

    /// Slot of the reply waiting to go out, if any
    pub fn pending_reply_slot(&self) -> Option<usize> {
        let state = self.shared.lock_state();
        if state.reply_timer.is_pending() {
            state.reply_slot
        } else {
            None
        }
    }
}

impl ProtocolEntity for ProtocolClient {
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
        info!(robot_id = self.shared.config.robot_id, "Radio client started");
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.shared.lock_state();
        if state.started {
            self.shared.transport.close_port(Port::Control);
            info!(robot_id = self.shared.config.robot_id, "Radio client stopped");
        }

        state.reply_timer.cancel();
        state.reply_slot = None;
        state.silence_watchdog.stop();
        state.started = false;
        state.connection = ConnectionState::Disconnected;
    }

    fn on_receive(&self, packet: &Packet) {
        self.shared.handle_packet(packet);
    }

    fn is_started(&self) -> bool {
        self.shared.lock_state().started
    }
}

impl ClientShared {
    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_packet(self: &Arc<Self>, packet: &Packet) {
        if packet.header.payload_type != PayloadType::Control {
            trace!(payload_type = ?packet.header.payload_type, "Ignoring non-control frame");
            return;
        }

        let frame = match decode_control_frame(&packet.payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping malformed control frame: {}", e);
                return;
            }
        };

        let mut state = self.lock_state();
        if !state.started {
            trace!("Dropping control frame received while stopped");
            return;
        }

        self.process_frame(&mut state, &frame);
    }

    fn process_frame(self: &Arc<Self>, state: &mut ClientState, frame: &ControlFrame) {
        let robot_id = self.config.robot_id;
        self.arm_silence_watchdog(state);

        match frame.find_recipient(robot_id) {
            Some((slot, command)) => {
                state.current_command = Some(*command);
                if state.connection == ConnectionState::Disconnected {
                    info!(robot_id, slot, "Connected to radio base station");
                }
                state.connection = ConnectionState::Connected;
                self.schedule_reply(state, slot);
            }
            None => {
                self.set_disconnected(state, "not addressed by control frame");
                state.reply_timer.cancel();
                state.reply_slot = None;

                if !self.config.claim_open_slots {
                    return;
                }
                let mut open = [0usize; SLOT_COUNT];
                let mut count = 0;
                for (entry, slot) in open.iter_mut().zip(frame.open_slots()) {
                    *entry = slot;
                    count += 1;
                }

                if let Some(&slot) = open[..count].choose(&mut state.rng) {
                    debug!(robot_id, slot, open = count, "Claiming open slot");
                    self.schedule_reply(state, slot);
                }
            }
        }
    }

    fn schedule_reply(self: &Arc<Self>, state: &mut ClientState, slot: usize) {
        let delay = self.config.slot_duration * slot as u32;
        let weak = Arc::downgrade(self);

        let result = state.reply_timer.schedule(delay, move |generation| {
            if let Some(shared) = weak.upgrade() {
                shared.send_reply(generation);
            }
        });

        match result {
            Ok(()) => state.reply_slot = Some(slot),
            Err(e) => {
                warn!("Failed to schedule reply: {}", e);
                state.reply_slot = None;
            }
        }
    }

    fn send_reply(&self, generation: u64) {
        let mut state = self.lock_state();
        if !state.started || !state.reply_timer.complete(generation) {
            return;
        }
        let slot = state.reply_slot.take();

        let reply = ReplyMessage::new(self.config.robot_id, self.config.hardware_revision);
        let packet = Packet {
            header: FrameHeader::control(),
            payload: encode_reply(&reply).to_vec(),
        };

        match self.transport.send(packet) {
            Ok(()) => trace!(?slot, "Reply sent"),
            Err(e) => warn!("Failed to send reply: {}", e),
        }
    }

    fn arm_silence_watchdog(self: &Arc<Self>, state: &mut ClientState) {
        if !state.silence_watchdog.is_running() {
            let weak = Arc::downgrade(self);
            let result = state.silence_watchdog.start(move || match weak.upgrade() {
                Some(shared) => {
                    shared.on_silence();
                    true
                }
                None => false,
            });

            if let Err(e) = result {
                warn!("Failed to start silence watchdog: {}", e);
                return;
            }
        }

        state.silence_watchdog.feed(self.config.silence_timeout);
    }

    fn on_silence(&self) {
        let mut state = self.lock_state();
        if !state.silence_watchdog.expire() || !state.started {
            return;
        }
        self.set_disconnected(&mut state, "base station silent");
    }

    fn set_disconnected(&self, state: &mut ClientState, reason: &str) {
        if state.connection == ConnectionState::Connected {
            info!(robot_id = self.config.robot_id, reason, "Disconnected from radio base station");
        }
        state.connection = ConnectionState::Disconnected;
    }
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.started {
            self.transport.close_port(Port::Control);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{decode_reply, encode_control_frame};
    use crate::transport::mocks::MockTransport;

    const SLOT: Duration = Duration::from_millis(2);

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn config(robot_id: u8) -> ClientConfig {
        ClientConfig {
            robot_id,
            hardware_revision: 3,
            slot_duration: SLOT,
            silence_timeout: Duration::from_millis(500),
            claim_open_slots: true,
        }
    }

    fn started_client(robot_id: u8) -> (ProtocolClient, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let client =
            ProtocolClient::with_rng(config(robot_id), transport.clone(), StdRng::seed_from_u64(7))
                .unwrap();
        client.start().unwrap();
        (client, transport)
    }

    fn control_packet(ids: [u8; SLOT_COUNT]) -> Packet {
        let mut frame = ControlFrame::empty();
        for (slot, id) in frame.slots.iter_mut().zip(ids) {
            *slot = ControlMessage::hold(id);
        }
        Packet {
            header: FrameHeader::control(),
            payload: encode_control_frame(&frame).to_vec(),
        }
    }

    #[test]
    fn test_rejects_robot_id_zero() {
        let result = ProtocolClient::new(config(0), MockTransport::new());
        assert!(matches!(result, Err(RadioLinkError::InvalidRobotId(0))));
    }

    #[test]
    fn test_start_is_idempotent() {
        let (client, transport) = started_client(3);
        assert!(client.is_started());
        assert!(transport.is_registered(Port::Control));

        client.start().unwrap();
        assert!(client.is_started());
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_addressed_robot_connects_and_replies_in_its_slot() {
        let (client, transport) = started_client(3);

        assert!(transport.inject(&control_packet([7, 3, 0, 0, 0, 0])));
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(client.pending_reply_slot(), Some(1));
        assert_eq!(client.current_command().unwrap().recipient_id, 3);

        tokio::time::advance(SLOT - Duration::from_micros(1)).await;
        settle().await;
        assert!(transport.sent_packets().is_empty());

        tokio::time::advance(Duration::from_micros(1)).await;
        settle().await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header, FrameHeader::control());
        let reply = decode_reply(&sent[0].payload).unwrap();
        assert_eq!(reply, ReplyMessage::new(3, 3));
        assert_eq!(client.pending_reply_slot(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_zero_replies_immediately() {
        let (_client, transport) = started_client(9);

        transport.inject(&control_packet([9, 0, 0, 0, 0, 0]));
        settle().await;

        assert_eq!(transport.sent_packets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unaddressed_robot_claims_random_open_slot() {
        let (client, transport) = started_client(5);

        transport.inject(&control_packet([1, 2, 0, 3, 0, 4]));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert!(client.current_command().is_none());

        let slot = client.pending_reply_slot().unwrap();
        assert!(slot == 2 || slot == 4, "claimed slot {} is not open", slot);

        tokio::time::advance(SLOT * slot as u32).await;
        settle().await;

        let sent = transport.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(decode_reply(&sent[0].payload).unwrap().sender_id(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assigned_slot_preferred_over_open_slots() {
        let (client, transport) = started_client(3);

        transport.inject(&control_packet([0, 0, 3, 0, 0, 0]));
        assert!(client.is_connected());
        assert_eq!(client.pending_reply_slot(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_slot_choice_varies() {
        let transport = MockTransport::new();
        let mut seen = std::collections::HashSet::new();

        for seed in 0..32 {
            let client =
                ProtocolClient::with_rng(config(5), transport.clone(), StdRng::seed_from_u64(seed))
                    .unwrap();
            client.start().unwrap();
            client.on_receive(&control_packet([0, 0, 0, 0, 0, 0]));
            seen.insert(client.pending_reply_slot().unwrap());
            client.stop();
        }

        assert!(seen.len() > 1, "open slot selection is not randomized");
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_disabled() {
        let transport = MockTransport::new();
        let mut cfg = config(5);
        cfg.claim_open_slots = false;
        let client = ProtocolClient::new(cfg, transport.clone()).unwrap();
        client.start().unwrap();

        transport.inject(&control_packet([1, 0, 0, 0, 0, 0]));
        assert_eq!(client.pending_reply_slot(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_open_slots_no_reply() {
        let (client, transport) = started_client(5);

        transport.inject(&control_packet([1, 2, 3, 4, 6, 7]));
        assert_eq!(client.pending_reply_slot(), None);

        tokio::time::advance(SLOT * 10).await;
        settle().await;
        assert!(transport.sent_packets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_of_address_disconnects() {
        let (client, transport) = started_client(3);

        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        assert!(client.is_connected());

        transport.inject(&control_packet([7, 8, 9, 10, 11, 12]));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(client.pending_reply_slot(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_frame_replaces_pending_reply() {
        let (client, transport) = started_client(3);

        transport.inject(&control_packet([0, 0, 0, 0, 3, 0]));
        assert_eq!(client.pending_reply_slot(), Some(4));

        transport.inject(&control_packet([0, 3, 0, 0, 0, 0]));
        assert_eq!(client.pending_reply_slot(), Some(1));

        tokio::time::advance(SLOT * 6).await;
        settle().await;
        assert_eq!(transport.sent_packets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_do_not_change_state() {
        let (client, transport) = started_client(3);
        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        tokio::time::advance(SLOT).await;
        settle().await;
        transport.take_sent();

        // Truncated
        let mut short = control_packet([0, 0, 0, 0, 0, 0]);
        short.payload.truncate(10);
        transport.inject(&short);

        // Robot 4 twice
        let duplicate = control_packet([4, 0, 0, 4, 0, 0]);
        transport.inject(&duplicate);

        assert!(client.is_connected());
        assert_eq!(client.pending_reply_slot(), None);
        assert_eq!(client.current_command().unwrap().recipient_id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_non_control_payload_type() {
        let (client, transport) = started_client(3);
        let mut packet = control_packet([3, 0, 0, 0, 0, 0]);
        packet.header.payload_type = PayloadType::Tuning;

        transport.inject(&packet);
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_reply_and_deregisters() {
        let (client, transport) = started_client(3);

        transport.inject(&control_packet([0, 0, 3, 0, 0, 0]));
        assert_eq!(client.pending_reply_slot(), Some(2));

        client.stop();
        assert!(!client.is_started());
        assert!(!transport.is_registered(Port::Control));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        tokio::time::advance(SLOT * 6).await;
        settle().await;
        assert!(transport.sent_packets().is_empty());

        // Frames delivered directly after stop are ignored
        client.on_receive(&control_packet([3, 0, 0, 0, 0, 0]));
        assert!(!client.is_connected());
        assert_eq!(client.pending_reply_slot(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (client, transport) = started_client(3);
        client.stop();
        client.start().unwrap();

        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_disconnects() {
        let (client, transport) = started_client(3);
        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        assert!(client.is_connected());

        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert!(client.is_connected());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_keep_watchdog_alive() {
        let (client, transport) = started_client(3);

        for _ in 0..4 {
            transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
            tokio::time::advance(Duration::from_millis(300)).await;
            settle().await;
        }
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_deadline_follows_latest_frame() {
        let (client, transport) = started_client(3);
        let silence = Duration::from_millis(500);

        for _ in 0..5 {
            transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
            let deadline = client.shared.lock_state().silence_watchdog.deadline();
            assert_eq!(deadline, Some(tokio::time::Instant::now() + silence));
            assert!(client.shared.lock_state().silence_watchdog.is_running());

            tokio::time::advance(Duration::from_millis(16)).await;
            settle().await;
        }

        tokio::time::advance(silence).await;
        settle().await;
        assert!(!client.is_connected());
        assert!(client.shared.lock_state().silence_watchdog.deadline().is_none());

        // Same watchdog serves the next connection
        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        assert!(client.is_connected());
        settle().await;
        tokio::time::advance(silence).await;
        settle().await;
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_watchdog() {
        let (client, transport) = started_client(3);
        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        assert!(client.shared.lock_state().silence_watchdog.is_running());

        client.stop();
        let state = client.shared.lock_state();
        assert!(!state.silence_watchdog.is_running());
        assert!(state.silence_watchdog.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_not_fatal() {
        let (client, transport) = started_client(3);
        transport.set_send_error(true);

        transport.inject(&control_packet([3, 0, 0, 0, 0, 0]));
        settle().await;

        assert!(client.is_connected());
        assert!(transport.sent_packets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_port() {
        let (client, transport) = started_client(3);
        drop(client);
        assert!(!transport.is_registered(Port::Control));
    }
}
