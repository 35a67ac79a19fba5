//! # B-route Session
//!
//! The connection state machine. It is pure: every reaction takes one input
//! (a received chunk, the connect timeout firing, an open or release request)
//! and returns the [`Action`]s the driver has to perform, so the whole
//! bootstrap can be exercised without a port or a runtime.
//!
//! ```text
//! Disconnected → PortOpen → SetEcho → SetPassword → SetId → Scanning
//!   → SetChannel → SetPanId → ResolveAddress → Join → Connecting
//!   → { Available | ConnectingRetry → { Connecting | Failed } }
//! ```
//!
//! Acknowledged steps advance on a chunk that is exactly `OK` and re-issue
//! their command on anything else. A refused `SKJOIN` goes back to address
//! resolution, and events arriving with the join `OK` are handled as part of
//! `Connecting`. Once `Available`, chunks are decoded into
//! EL frames, fed to the facilities registry and handed to the caller.

use crate::constants::{
    ACK_TOKEN, EVENT_PANA_FAILED, EVENT_PANA_SUCCEEDED, EVENT_SCAN_FINISHED,
};
use crate::config::SessionConfig;
use crate::echonet::facilities::{deliver, Facilities};
use crate::echonet::frame::ElFrame;
use crate::echonet::object::Eoj;
use crate::error::SmartMeterError;
use crate::wisun::datagram::{extract_datagrams, PeerInfo};
use crate::wisun::demux::{demultiplex, is_event, Batch};
use crate::wisun::dongle::{Command, DongleProfile};
use crate::wisun::pan::PanDescriptor;
use crate::wisun::sender::{CommandSender, ObjectPair, Outbound};
use log::{debug, error, info, trace};
use serde::Serialize;
use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    PortOpen,
    SetEcho,
    SetPassword,
    SetId,
    Scanning,
    SetChannel,
    SetPanId,
    ResolveAddress,
    Join,
    Connecting,
    ConnectingRetry,
    Available,
    Failed,
}

impl SessionState {
    /// Next state of an acknowledged step.
    fn after_ack(self) -> Option<SessionState> {
        use SessionState::*;
        match self {
            SetEcho => Some(SetPassword),
            SetPassword => Some(SetId),
            SetId => Some(Scanning),
            SetChannel => Some(SetPanId),
            SetPanId => Some(ResolveAddress),
            _ => None,
        }
    }

    pub fn is_bootstrapping(self) -> bool {
        !matches!(self, SessionState::Disconnected | SessionState::Available | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::PortOpen => "port_open",
            SessionState::SetEcho => "set_echo",
            SessionState::SetPassword => "set_password",
            SessionState::SetId => "set_id",
            SessionState::Scanning => "scanning",
            SessionState::SetChannel => "set_channel",
            SessionState::SetPanId => "set_pan_id",
            SessionState::ResolveAddress => "resolve_address",
            SessionState::Join => "join",
            SessionState::Connecting => "connecting",
            SessionState::ConnectingRetry => "connecting_retry",
            SessionState::Available => "available",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session state at the time of a notification, with the batch that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub state: SessionState,
    pub data: Option<Batch>,
}

/// What the caller is told about.
#[derive(Debug)]
pub struct Notification {
    pub status: Status,
    pub peer: Option<PeerInfo>,
    pub frame: Option<ElFrame>,
    pub error: Option<SmartMeterError>,
}

impl Notification {
    pub fn status(state: SessionState, data: Option<Batch>) -> Self {
        Notification {
            status: Status { state, data },
            peer: None,
            frame: None,
            error: None,
        }
    }

    pub fn failure(state: SessionState, error: SmartMeterError) -> Self {
        Notification {
            error: Some(error),
            ..Self::status(state, None)
        }
    }
}

/// Side effects requested by a reaction, in the order they must happen.
#[derive(Debug)]
pub enum Action {
    Write(Vec<u8>),
    ArmConnectTimeout(Duration),
    CancelConnectTimeout,
    Notify(Notification),
    CloseTransport,
    StopObservation,
}

/// A request to the meter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get { objects: ObjectPair, epc: u8 },
    MultiGet { objects: ObjectPair, epcs: Vec<u8> },
    Opc1 { objects: ObjectPair, esv: u8, epc: u8, edt: Vec<u8> },
    InstantaneousPower,
    CumulativeEnergyNormal,
    CumulativeEnergyReverse,
    GetPropertyMap,
    InstanceList,
    Static,
}

pub struct Session {
    state: SessionState,
    id: String,
    password: Zeroizing<String>,
    sender: CommandSender,
    pan: PanDescriptor,
    peer_address: Option<String>,
    retries_remaining: u8,
    join_retries: u8,
    scan_failures: u8,
    scan_retry_limit: u8,
    connect_timeout: Duration,
    timeout_armed: bool,
    registry: Facilities,
}

impl Session {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_profile(config, config.profile())
    }

    pub fn with_profile(config: &SessionConfig, profile: DongleProfile) -> Self {
        Session {
            state: SessionState::Disconnected,
            id: config.id.clone(),
            password: config.password.clone(),
            sender: CommandSender::new(profile),
            pan: config.pan.clone().unwrap_or_default(),
            peer_address: None,
            retries_remaining: config.join_retries,
            join_retries: config.join_retries,
            scan_failures: 0,
            scan_retry_limit: config.scan_retry_limit.max(1),
            connect_timeout: config.connect_timeout(),
            timeout_armed: false,
            registry: Facilities::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn peer_address(&self) -> Option<&str> {
        self.peer_address.as_deref()
    }

    pub fn pan(&self) -> &PanDescriptor {
        &self.pan
    }

    pub fn registry(&self) -> &Facilities {
        &self.registry
    }

    /// Forgets every cached value; static properties are fetched again.
    pub fn reset_registry(&mut self) {
        self.registry.clear();
    }

    pub fn retries_remaining(&self) -> u8 {
        self.retries_remaining
    }

    pub fn is_timeout_armed(&self) -> bool {
        self.timeout_armed
    }

    pub fn profile(&self) -> &DongleProfile {
        self.sender.profile()
    }

    /// Starts the bootstrap on a freshly opened port.
    pub fn open(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != SessionState::Disconnected {
            debug!("open ignored in state {}", self.state);
            return actions;
        }
        self.retries_remaining = self.join_retries;
        self.scan_failures = 0;
        self.set_state(SessionState::PortOpen);
        self.enter(SessionState::SetEcho, &mut actions);
        actions
    }

    /// Reacts to one received chunk. Trailing CR/LF is stripped here.
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Vec<Action> {
        let chunk = chunk.strip_suffix(b"\r\n").unwrap_or(chunk);
        let text = String::from_utf8_lossy(chunk);
        trace!("[{}] recv {:?}", self.state, text);

        let mut actions = Vec::new();
        match self.state {
            SessionState::SetEcho
            | SessionState::SetPassword
            | SessionState::SetId
            | SessionState::SetChannel
            | SessionState::SetPanId => self.on_ack(&text, &mut actions),
            SessionState::Join => self.on_join(demultiplex(chunk), &mut actions),
            SessionState::Scanning => self.on_scan(&text, &mut actions),
            SessionState::ResolveAddress => self.on_address(&text, &mut actions),
            SessionState::Connecting => self.on_connecting(demultiplex(chunk), &mut actions),
            SessionState::Available => self.on_available(chunk, &mut actions),
            SessionState::Disconnected
            | SessionState::PortOpen
            | SessionState::ConnectingRetry
            | SessionState::Failed => debug!("[{}] chunk ignored", self.state),
        }
        actions
    }

    /// The connect timeout armed on entering `Connecting` fired.
    pub fn on_connect_timeout(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != SessionState::Connecting || !self.timeout_armed {
            debug!("stale connect timeout in state {}", self.state);
            return actions;
        }
        info!("no PANA result before the connect timeout");
        self.timeout_armed = false;
        self.write(Command::Info, &mut actions);
        self.retry_join(&mut actions);
        actions
    }

    /// Tears the session down; valid in any state.
    pub fn release(&mut self) -> Vec<Action> {
        info!("release from state {}", self.state);
        self.timeout_armed = false;
        self.set_state(SessionState::Disconnected);
        vec![Action::CloseTransport, Action::CancelConnectTimeout, Action::StopObservation]
    }

    /// Frames a request to the meter. Requires an established session.
    pub fn request(&mut self, request: &Request) -> Result<Outbound, SmartMeterError> {
        if self.state != SessionState::Available {
            return Err(SmartMeterError::NotAvailable(self.state));
        }
        let ip = self
            .peer_address
            .as_deref()
            .ok_or(SmartMeterError::NotAvailable(self.state))?;
        let sender = &mut self.sender;

        Ok(match request {
            Request::Get { objects, epc } => sender.send_get(ip, *objects, *epc),
            Request::MultiGet { objects, epcs } => sender.send_multi_get(ip, *objects, epcs),
            Request::Opc1 { objects, esv, epc, edt } => sender.send_opc1(ip, *objects, *esv, *epc, edt),
            Request::InstantaneousPower => sender.get_e7(ip),
            Request::CumulativeEnergyNormal => sender.get_ea(ip),
            Request::CumulativeEnergyReverse => sender.get_eb(ip),
            Request::GetPropertyMap => sender.get_9f(ip),
            Request::InstanceList => sender.get_d5(ip),
            Request::Static => sender.get_static(ip),
        })
    }

    /// Whether a poll of `epc` on `object` can be skipped because its value is cached.
    pub fn has_cached(&self, object: Eoj, epc: u8) -> bool {
        self.peer_address
            .as_deref()
            .is_some_and(|ip| self.registry.has_value(ip, object, epc))
    }

    fn on_ack(&mut self, text: &str, actions: &mut Vec<Action>) {
        match self.state.after_ack() {
            Some(next) if text == ACK_TOKEN => self.enter(next, actions),
            _ => {
                debug!("[{}] unexpected reply {:?}, re-issuing", self.state, text);
                self.issue(self.state, actions);
            }
        }
    }

    fn on_scan(&mut self, text: &str, actions: &mut Vec<Action>) {
        if text == ACK_TOKEN {
            return;
        }
        if self.pan.accumulate(text) {
            debug!("PAN descriptor so far: {:?}", self.pan);
        }

        let batch = demultiplex(text.as_bytes());
        if !batch.has_event(EVENT_SCAN_FINISHED) {
            return;
        }

        if self.pan.has_channel() {
            info!("found PAN {:?} on channel {:?}", self.pan.pan_id, self.pan.channel);
            self.scan_failures = 0;
            self.enter(SessionState::SetChannel, actions);
            return;
        }

        self.scan_failures = self.scan_failures.saturating_add(1);
        if self.scan_failures >= self.scan_retry_limit {
            debug!("no PAN after {} scans, setting id again", self.scan_failures);
            self.scan_failures = 0;
            self.enter(SessionState::SetId, actions);
        } else {
            debug!("no PAN found, scanning again");
            self.write(Command::Scan, actions);
        }
    }

    fn on_address(&mut self, text: &str, actions: &mut Vec<Action>) {
        let first = text.split("\r\n").next().unwrap_or_default().trim();

        if first.parse::<Ipv6Addr>().is_ok() {
            info!("meter address {}", first);
            self.peer_address = Some(first.to_string());
            self.enter(SessionState::Join, actions);
        } else {
            debug!("no address in {:?}, resolving again", text);
            self.issue(SessionState::ResolveAddress, actions);
        }
    }

    /// `OK` first moves to `Connecting`; whatever follows it in the batch is
    /// already part of the PANA exchange. Anything else means the address
    /// was wrong, so it is resolved again.
    fn on_join(&mut self, batch: Batch, actions: &mut Vec<Action>) {
        let mut msgs = batch.msgs.into_iter();
        match msgs.next() {
            Some(first) if first.len() == 1 && first[0] == ACK_TOKEN => {
                self.enter(SessionState::Connecting, actions);
                let rest: Vec<Vec<String>> = msgs.collect();
                if !rest.is_empty() {
                    self.on_connecting(Batch { count: rest.len(), msgs: rest }, actions);
                }
            }
            _ => {
                debug!("join refused, resolving the meter address again");
                self.peer_address = None;
                self.enter(SessionState::ResolveAddress, actions);
            }
        }
    }

    fn on_connecting(&mut self, batch: Batch, actions: &mut Vec<Action>) {
        for msg in &batch.msgs {
            if is_event(msg, EVENT_PANA_SUCCEEDED) {
                info!("PANA authentication succeeded");
                self.cancel_timeout(actions);
                self.retries_remaining = self.join_retries;
                self.set_state(SessionState::Available);
                actions.push(Action::Notify(Notification::status(SessionState::Available, Some(batch.clone()))));
                return;
            }
            if is_event(msg, EVENT_PANA_FAILED) {
                info!("PANA authentication failed");
                self.cancel_timeout(actions);
                self.write(Command::Info, actions);
                self.retry_join(actions);
                return;
            }
        }
    }

    fn retry_join(&mut self, actions: &mut Vec<Action>) {
        self.set_state(SessionState::ConnectingRetry);

        if self.retries_remaining == 0 {
            let attempts = u32::from(self.join_retries) + 1;
            self.retries_remaining = self.join_retries;
            self.set_state(SessionState::Failed);
            error!("B-route join failed after {} attempts", attempts);
            actions.push(Action::CloseTransport);
            actions.push(Action::StopObservation);
            actions.push(Action::Notify(Notification::failure(
                SessionState::Failed,
                SmartMeterError::JoinFailed { attempts },
            )));
            return;
        }

        self.retries_remaining -= 1;
        debug!("retrying join, {} retries left", self.retries_remaining);
        self.issue(SessionState::Join, actions);
        self.enter(SessionState::Connecting, actions);
    }

    fn on_available(&mut self, chunk: &[u8], actions: &mut Vec<Action>) {
        let batch = demultiplex(chunk);
        if batch.is_empty() || batch.is_only_ok() {
            return;
        }

        let datagrams = extract_datagrams(&batch, chunk, self.sender.profile());
        for delivery in deliver(&mut self.registry, datagrams) {
            actions.push(Action::Notify(Notification {
                status: Status {
                    state: SessionState::Available,
                    data: Some(batch.clone()),
                },
                peer: Some(delivery.peer),
                frame: Some(delivery.frame),
                error: None,
            }));
        }
    }

    /// Moves to `state` and performs its entry action.
    fn enter(&mut self, state: SessionState, actions: &mut Vec<Action>) {
        self.set_state(state);
        match state {
            SessionState::Scanning if self.pan.has_channel() => {
                debug!("channel {:?} already known, skipping scan", self.pan.channel);
                self.enter(SessionState::SetChannel, actions);
            }
            SessionState::Connecting => {
                if !self.timeout_armed {
                    self.timeout_armed = true;
                    actions.push(Action::ArmConnectTimeout(self.connect_timeout));
                }
            }
            _ => self.issue(state, actions),
        }
    }

    /// Writes the command the state stands for, if any.
    fn issue(&self, state: SessionState, actions: &mut Vec<Action>) {
        let line = {
            let command = match state {
                SessionState::SetEcho => Command::DisableEcho,
                SessionState::SetPassword => Command::SetPassword(self.password.as_str()),
                SessionState::SetId => Command::SetId(&self.id),
                SessionState::Scanning => Command::Scan,
                SessionState::SetChannel => Command::SetChannel(self.pan.channel.as_deref().unwrap_or_default()),
                SessionState::SetPanId => Command::SetPanId(self.pan.pan_id.as_deref().unwrap_or_default()),
                SessionState::ResolveAddress => {
                    Command::ResolveAddress(self.pan.address.as_deref().unwrap_or_default())
                }
                SessionState::Join => Command::Join(self.peer_address.as_deref().unwrap_or_default()),
                _ => return,
            };
            if !matches!(command, Command::SetPassword(_)) {
                debug!("[{}] > {}", state, self.sender.profile().render(&command));
            }
            self.sender.profile().line(&command)
        };
        actions.push(Action::Write(line));
    }

    fn write(&self, command: Command<'_>, actions: &mut Vec<Action>) {
        debug!("[{}] > {}", self.state, self.sender.profile().render(&command));
        actions.push(Action::Write(self.sender.profile().line(&command)));
    }

    fn cancel_timeout(&mut self, actions: &mut Vec<Action>) {
        if self.timeout_armed {
            self.timeout_armed = false;
            actions.push(Action::CancelConnectTimeout);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("state {} -> {}", self.state, state);
            self.state = state;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("peer_address", &self.peer_address)
            .field("pan", &self.pan)
            .field("retries_remaining", &self.retries_remaining)
            .field("timeout_armed", &self.timeout_armed)
            .finish_non_exhaustive()
    }
}
