//! Session state and the outbound command API.
//!
//! A [`Session`] is a sans-IO state machine: the driver hands it socket
//! readiness, timer ticks and fetch completions, and collects events, web
//! requests and outbound bytes from it. Everything runs on the driver's
//! task, so there is no locking anywhere in here.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{debug, info, warn};

use spin_shared::constants::{
    CLIENT_ID, CLIENT_INFO, DISCONNECT_FRAME, PING_TIMEOUT_SECS, WEB_BASE,
};
use spin_shared::{
    meify, normalize, AwayReplyPolicy, Command, FrameError, Latin9, OutboundOp, UserStatus,
    WireCodec,
};

use crate::bringup::{Milestone, ReadinessGate};
use crate::directory::Directory;
use crate::error::{Result, SessionError, ValidationError};
use crate::events::SessionEvent;
use crate::keepalive::Watchdog;
use crate::transport::{NonBlockingIo, TransportBuffer};
use crate::web::WebRequest;

/// Away message used when the user sets away without one.
const DEFAULT_AWAY_MESSAGE: &str = "user is away";

/// Per-account settings of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub username: String,
    pub password: String,
    /// Base URL of the web API, without trailing slash.
    pub web_base: String,
    /// Send the login request over HTTPS.
    pub secure_login: bool,
    pub away_policy: AwayReplyPolicy,
    /// Replaces the default pattern used to detect mentions of the user.
    pub nick_pattern: Option<String>,
    /// Arrival stamp of the newest mail already reported.
    pub last_mail_check: String,
    pub client_id: String,
    pub client_info: String,
    pub ping_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            web_base: WEB_BASE.to_string(),
            secure_login: true,
            away_policy: AwayReplyPolicy::default(),
            nick_pattern: None,
            last_mail_check: String::new(),
            client_id: CLIENT_ID.to_string(),
            client_info: CLIENT_INFO.to_string(),
            ping_timeout: Duration::from_secs(PING_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Ready,
    Closed,
}

pub struct Session {
    pub(crate) config: SessionConfig,
    pub(crate) codec: Box<dyn WireCodec>,
    pub(crate) directory: Box<dyn Directory>,
    transport: TransportBuffer,
    gate: ReadinessGate,
    phase: Phase,
    connected: bool,

    pub(crate) token: Option<String>,
    pub(crate) username: String,
    pub(crate) normalized_username: String,
    pub(crate) nick_pattern: Option<Regex>,
    status: UserStatus,

    pub(crate) pending_joins: HashSet<String>,
    pub(crate) updated_status: HashSet<String>,
    /// Friend list requests sent but not yet answered.
    pub(crate) friends_in_flight: u32,
    pub(crate) room_listing: bool,
    pub(crate) next_chat_id: u32,
    watchdog: Watchdog,
    pub(crate) last_mail_check: String,

    events: Vec<SessionEvent>,
    fetches: Vec<WebRequest>,
}

impl Session {
    /// Create a session for `config`. Fails if the nick pattern override
    /// doesn't compile.
    pub fn new(config: SessionConfig, directory: Box<dyn Directory>) -> Result<Self> {
        let nick_pattern = match config.nick_pattern.as_deref().filter(|p| !p.is_empty()) {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                SessionError::InvalidSettings(format!("error compiling nick regex: {e}"))
            })?),
            None => None,
        };

        Ok(Self {
            username: config.username.clone(),
            normalized_username: normalize(&config.username),
            last_mail_check: config.last_mail_check.clone(),
            watchdog: Watchdog::new(config.ping_timeout),
            config,
            codec: Box::new(Latin9),
            directory,
            transport: TransportBuffer::new(),
            gate: ReadinessGate::new(),
            phase: Phase::Connecting,
            connected: false,
            token: None,
            nick_pattern,
            status: UserStatus::default(),
            pending_joins: HashSet::new(),
            updated_status: HashSet::new(),
            friends_in_flight: 0,
            room_listing: false,
            next_chat_id: 1,
            events: Vec::new(),
            fetches: Vec::new(),
        })
    }

    /// Replace the wire charset codec.
    pub fn with_codec(mut self, codec: Box<dyn WireCodec>) -> Self {
        self.codec = codec;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn status(&self) -> &UserStatus {
        &self.status
    }

    pub fn directory(&self) -> &dyn Directory {
        self.directory.as_ref()
    }

    pub fn is_join_pending(&self, room: &str) -> bool {
        self.pending_joins.contains(&normalize(room))
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    pub fn wants_write(&self) -> bool {
        self.transport.wants_write()
    }

    /// Outbound bytes not yet written to the socket.
    pub fn pending_output(&self) -> &[u8] {
        self.transport.pending_outbound()
    }

    pub fn last_mail_check(&self) -> &str {
        &self.last_mail_check
    }

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drain the web requests queued since the last call.
    pub fn take_fetches(&mut self) -> Vec<WebRequest> {
        std::mem::take(&mut self.fetches)
    }

    // -----------------------------------------------------------------------
    // Internal helpers shared by the handlers
    // -----------------------------------------------------------------------

    pub(crate) fn emit(&mut self, event: SessionEvent) {
        self.directory.apply(&event);
        self.events.push(event);
    }

    pub(crate) fn queue_fetch(&mut self, request: WebRequest) {
        debug!(kind = ?request.kind, url = %request.url, "Queueing web request");
        self.fetches.push(request);
    }

    pub(crate) fn mark(&mut self, milestone: Milestone) {
        debug!(%milestone, "Bring-up step complete");
        if self.gate.mark(milestone) && self.phase == Phase::Connecting {
            info!(user = %self.username, "Session ready");
            self.phase = Phase::Ready;
            self.emit(SessionEvent::Ready);
        }
    }

    /// Queue one command line. Fire and forget.
    pub fn write(&mut self, command: Command) {
        if self.phase == Phase::Closed {
            debug!(op = ?command.op(), "Dropping command on closed session");
            return;
        }
        self.transport.enqueue(&command.encode());
    }

    pub(crate) fn decode_name(
        &self,
        field: &'static str,
        raw: Option<&[u8]>,
    ) -> std::result::Result<String, FrameError> {
        let raw = raw.ok_or(FrameError::MissingField(field))?;
        let name = self
            .codec
            .decode_name(raw)
            .map_err(|source| FrameError::InvalidEncoding { field, source })?;
        Ok(name.trim_matches(|c: char| c.is_ascii_whitespace()).to_owned())
    }

    pub(crate) fn decode_text(
        &self,
        field: &'static str,
        raw: Option<&[u8]>,
    ) -> std::result::Result<String, FrameError> {
        let raw = raw.ok_or(FrameError::MissingField(field))?;
        self.codec
            .decode_text(raw)
            .map_err(|source| FrameError::InvalidEncoding { field, source })
    }

    pub(crate) fn encode_name(&self, name: &str) -> std::result::Result<Vec<u8>, ValidationError> {
        let name = name.trim();
        self.codec
            .encode_name(name)
            .map_err(|source| ValidationError::Unencodable {
                name: name.to_owned(),
                source,
            })
    }

    pub(crate) fn encode_room(&self, room: &str) -> std::result::Result<Vec<u8>, ValidationError> {
        if room.contains('#') {
            return Err(ValidationError::RoomContainsSeparator(room.to_owned()));
        }
        self.encode_name(room)
    }

    pub(crate) fn ensure_open(&self) -> std::result::Result<(), ValidationError> {
        if self.phase == Phase::Closed {
            return Err(ValidationError::NotConnected);
        }
        Ok(())
    }

    pub(crate) fn is_self(&self, name: &str) -> bool {
        normalize(name) == self.normalized_username
    }

    /// Reply to an event about a room we have no window for by leaving it.
    pub(crate) fn room_not_found(&mut self, room: &str, raw_room: &[u8]) {
        debug!(room = %room, "Room not found, leaving");
        self.write(Command::new(OutboundOp::Leave).arg(raw_room));
    }

    // -----------------------------------------------------------------------
    // Bring-up
    // -----------------------------------------------------------------------

    /// Queue the socket login: client identification followed by the
    /// username and web session token.
    pub fn begin_chat_login(&mut self) -> Result<()> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| SessionError::InvalidSettings("no web session token".into()))?;
        let user = self
            .encode_name(&self.username)
            .map_err(|e| SessionError::InvalidSettings(e.to_string()))?;

        self.connected = true;
        let client_id = self.config.client_id.clone();
        let client_info = self.config.client_info.clone();
        self.write(Command::new(OutboundOp::ClientId).arg(client_id));
        self.write(Command::new(OutboundOp::ClientInfo).arg(client_info));
        self.write(Command::new(OutboundOp::Login).arg(user).arg(token));
        info!(user = %self.username, "Chat login sent");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // I/O
    // -----------------------------------------------------------------------

    /// Socket is readable: read once and dispatch every completed frame in
    /// order. Stops at the first fatal error.
    pub fn on_readable<S: NonBlockingIo>(&mut self, io: &mut S) -> Result<()> {
        let frames = self.transport.on_readable(io)?;
        for frame in frames {
            if self.phase == Phase::Closed {
                break;
            }
            self.dispatch_frame(&frame)?;
        }
        Ok(())
    }

    pub fn on_writable<S: NonBlockingIo>(&mut self, io: &mut S) -> Result<()> {
        self.transport.on_writable(io)?;
        Ok(())
    }

    /// Keepalive tick: send a ping and arm the pong deadline.
    pub fn on_keepalive(&mut self, now: Instant) {
        if self.phase == Phase::Closed || !self.connected {
            return;
        }
        let ping = self.watchdog.on_tick(now);
        self.write(ping);
    }

    pub(crate) fn on_pong(&mut self) {
        self.watchdog.on_pong();
    }

    pub fn check_watchdog(&mut self, now: Instant) -> Result<()> {
        self.watchdog.check(now)?;
        Ok(())
    }

    /// Tear the session down. Returns the farewell frame to attempt a
    /// non-blocking write of, the first time only.
    pub fn teardown(&mut self) -> Option<&'static [u8]> {
        if self.phase == Phase::Closed {
            return None;
        }
        self.phase = Phase::Closed;
        self.watchdog.disarm();
        self.transport.discard();
        self.pending_joins.clear();
        self.room_listing = false;
        self.fetches.clear();
        info!(user = %self.username, "Session closed");

        (self.connected && !self.transport.is_failed()).then_some(DISCONNECT_FRAME)
    }

    // -----------------------------------------------------------------------
    // Outbound API
    // -----------------------------------------------------------------------

    /// Send a private message. A leading `/me ` makes it an emote.
    pub fn send_im(&mut self, to: &str, text: &str) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        let who = self.encode_name(to)?;
        let (body, emote) = meify(text);
        let ty = if emote { "c" } else { "a" };
        let body = self.codec.encode_text(body);
        self.write(
            Command::new(OutboundOp::PrivateMessage)
                .arg(who)
                .arg("0")
                .arg(ty)
                .arg(body),
        );
        self.directory.open_conversation(to.trim());
        Ok(())
    }

    /// Send a message to a room.
    pub fn chat_send(&mut self, room: &str, text: &str) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        let raw_room = self.encode_room(room)?;
        let (body, emote) = meify(text);
        let ty = if emote { "c" } else { "a" };
        let body = self.codec.encode_text(body);
        self.write(
            Command::new(OutboundOp::RoomMessage)
                .arg(raw_room)
                .arg(ty)
                .arg(body),
        );
        Ok(())
    }

    /// Request to join `room`; the result arrives as `ChatJoined` or
    /// `JoinFailed`.
    pub fn join_chat(&mut self, room: &str) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        let raw_room = self.encode_room(room)?;
        self.pending_joins.insert(normalize(room.trim()));
        self.write(Command::new(OutboundOp::Join).arg(raw_room));
        Ok(())
    }

    pub fn leave_chat(&mut self, room: &str) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        let raw_room = self.encode_room(room)?;
        self.pending_joins.remove(&normalize(room.trim()));
        self.write(Command::new(OutboundOp::Leave).arg(raw_room));
        Ok(())
    }

    /// Set the user's status and propagate the away state to every room.
    pub fn set_status(&mut self, status: UserStatus) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        self.status = status;
        self.send_status();
        for room in self.directory.chats() {
            self.send_room_away(&room);
        }
        Ok(())
    }

    pub(crate) fn send_status(&mut self) {
        let command = match &self.status {
            UserStatus::Available => Command::new(OutboundOp::SetStatus)
                .arg("2")
                .arg("a")
                .arg(""),
            UserStatus::Away(message) => {
                let message = if message.is_empty() {
                    DEFAULT_AWAY_MESSAGE
                } else {
                    message.as_str()
                };
                Command::new(OutboundOp::SetStatus)
                    .arg("1")
                    .arg("a")
                    .arg(self.codec.encode_text(message))
            }
        };
        self.write(command);
    }

    pub(crate) fn send_room_away(&mut self, room: &str) {
        let raw_room = match self.encode_name(room) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(room = %room, error = %e, "Cannot send room away state");
                return;
            }
        };
        let away = if self.status.is_away() { "1" } else { "0" };
        self.write(
            Command::new(OutboundOp::RoomMessage)
                .arg(raw_room)
                .arg("0")
                .arg("away")
                .arg(away),
        );
    }

    pub fn request_room_list(&mut self) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        self.room_listing = true;
        self.write(Command::new(OutboundOp::RoomList));
        Ok(())
    }

    /// Stop collecting room list results. A late reply is ignored.
    pub fn cancel_room_list(&mut self) {
        self.room_listing = false;
    }

    pub fn ignore(&mut self, user: &str) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        let raw = self.encode_name(user)?;
        self.write(Command::new(OutboundOp::Ignore).arg(raw));
        Ok(())
    }

    /// Stop ignoring `user` and reload every roster, since the server hid
    /// ignored members from them.
    pub fn unignore(&mut self, user: &str) -> std::result::Result<(), ValidationError> {
        self.ensure_open()?;
        let raw = self.encode_name(user)?;
        self.write(Command::new(OutboundOp::Unignore).arg(raw));

        for room in self.directory.chats() {
            let Ok(raw_room) = self.encode_name(&room) else {
                continue;
            };
            self.emit(SessionEvent::ChatRosterCleared { room: room.clone() });
            self.write(Command::new(OutboundOp::Roster).arg(raw_room));
        }
        Ok(())
    }
}
