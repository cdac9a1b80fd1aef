//! The provider's session engine.
//!
//! [`ProviderServer`] owns the listening endpoint, the session table and the
//! readiness sets, and drives them from a single thread:
//!
//! 1. wait for readiness on a copy of the interest sets, bounded by the
//!    update interval;
//! 2. on timeout, publish one round of item updates to every active session;
//!    otherwise accept new connections and service readable/writable sessions;
//! 3. run the keepalive supervisor over every session;
//! 4. check the global run-time deadline.
//!
//! Per-session failures remove that session only. Global-fatal conditions
//! end in [`ProviderServer::shutdown_all`].

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::defs::{
    DEFAULT_RUNTIME_SEC, MAX_CLIENT_SESSIONS, MAX_SHUTDOWN_FLUSH_ATTEMPTS, UPDATE_INTERVAL_MSEC,
};
use crate::dispatch::{dispatch, Dispatch};
use crate::errors::{ServerError, SessionError, ShutdownReason};
use crate::handlers::DomainHandlers;
use crate::keepalive::ReceiveCheck;
use crate::poller::{Interest, Readiness, Selector};
use crate::session::{SessionId, SessionTable};
use crate::transport::{
    Channel, ConnectionState, FlushStatus, InitOutcome, Listener, ReadOutcome, SocketId,
};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrently admitted sessions.
    pub capacity: usize,
    /// Readiness wait timeout, and therefore the publish cadence.
    pub update_interval: Duration,
    /// How long to run before shutting everything down.
    pub run_time: Duration,
    /// Log every inbound and outbound message.
    pub trace_messages: bool,
    /// Log byte counts for every message read.
    pub show_transport_details: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_CLIENT_SESSIONS,
            update_interval: Duration::from_millis(UPDATE_INTERVAL_MSEC),
            run_time: Duration::from_secs(DEFAULT_RUNTIME_SEC),
            trace_messages: false,
            show_transport_details: false,
        }
    }
}

/// Outcome of a single loop iteration.
#[derive(Debug)]
pub enum Step {
    /// Keep looping.
    Continue,
    /// [`ProviderServer::shutdown_all`] ran; the server is finished.
    Shutdown(ShutdownReason),
}

/// Single-threaded provider: lifecycle controller, main loop and supervisors.
#[derive(Debug)]
pub struct ProviderServer<L: Listener, S, H, K> {
    listener: L,
    listener_socket: SocketId,
    selector: S,
    handlers: H,
    clock: K,
    config: ServerConfig,
    sessions: SessionTable<L::Channel>,
    interest: Interest,
    deadline: Instant,
    terminated: bool,
}

impl<L, S, H, K> ProviderServer<L, S, H, K>
where
    L: Listener,
    S: Selector,
    H: DomainHandlers,
    K: Clock,
{
    /// Registers the listening endpoint and fixes the run-time deadline.
    pub fn new(listener: L, selector: S, handlers: H, clock: K, config: ServerConfig) -> Self {
        let listener_socket = listener.socket_id();
        let mut interest = Interest::new();
        interest.register(listener_socket);
        let deadline = clock.now() + config.run_time;

        log::info!(
            "Provider engine ready on fd={} with capacity {}, update interval {:?}, run time {:?} ({})",
            listener_socket,
            config.capacity,
            config.update_interval,
            config.run_time,
            clock.name()
        );

        Self {
            listener,
            listener_socket,
            selector,
            handlers,
            clock,
            sessions: SessionTable::with_capacity(config.capacity),
            config,
            interest,
            deadline,
            terminated: false,
        }
    }

    /// Live sessions.
    pub fn sessions(&self) -> &SessionTable<L::Channel> {
        &self.sessions
    }

    /// Current readiness interest.
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Domain handlers.
    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Domain handlers, mutably.
    pub fn handlers_mut(&mut self) -> &mut H {
        &mut self.handlers
    }

    /// When the run time expires.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// [`ProviderServer::shutdown_all`] has run.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Runs until shutdown.
    ///
    /// # Errors
    /// [`ServerError::Poll`] if the readiness wait fails for any reason other
    /// than an interruption, [`ServerError::Terminated`] if the server had
    /// already shut down.
    pub fn run(&mut self) -> Result<ShutdownReason, ServerError> {
        log::info!("Provider main loop started");
        loop {
            if let Step::Shutdown(reason) = self.run_once()? {
                log::info!("Provider main loop finished: {}", reason);
                return Ok(reason);
            }
        }
    }

    /// One loop iteration.
    pub fn run_once(&mut self) -> Result<Step, ServerError> {
        if self.terminated {
            return Err(ServerError::Terminated);
        }

        let working = self.interest.clone();
        let readiness = match self.selector.select(&working, self.config.update_interval) {
            Ok(readiness) => readiness,
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                log::debug!("Readiness wait interrupted, retrying");
                return Ok(Step::Continue);
            }
            Err(e) => {
                log::error!("Readiness wait failed: {}", e);
                return Err(ServerError::Poll(e));
            }
        };

        if readiness.is_empty() {
            self.update_tick();
        } else if let Some(reason) = self.service_ready(&readiness) {
            return Ok(Step::Shutdown(self.shutdown_all(reason)));
        }

        if let Some(reason) = self.supervise_pings() {
            return Ok(Step::Shutdown(self.shutdown_all(reason)));
        }

        if self.clock.now() >= self.deadline {
            log::info!("Provider run-time expired");
            return Ok(Step::Shutdown(
                self.shutdown_all(ShutdownReason::RuntimeExpired),
            ));
        }

        Ok(Step::Continue)
    }

    fn service_ready(&mut self, readiness: &Readiness) -> Option<ShutdownReason> {
        log::trace!("{} sockets ready", readiness.count());

        if readiness.is_readable(self.listener_socket) {
            if let Err(reason) = self.accept_connection() {
                return Some(reason);
            }
        }

        for id in self.sessions.ids() {
            let socket = match self.sessions.get(id) {
                Some(session) => session.socket_id(),
                None => continue,
            };
            if readiness.is_readable(socket) || readiness.is_exceptional(socket) {
                if let Some(reason) = self.read_from_session(id) {
                    return Some(reason);
                }
            }

            let flush = match self.sessions.get(id) {
                Some(session) => {
                    session.write_pending()
                        && readiness.is_writable(session.socket_id())
                        && session.channel().state() == ConnectionState::Active
                }
                None => false,
            };
            if flush {
                self.flush_session(id);
            }
        }
        None
    }

    /// Accepts one pending connection.
    ///
    /// Returns the new session, or `None` when nothing was pending or the
    /// connection was turned away because every slot is taken.
    ///
    /// # Errors
    /// A failing accept is fatal to the whole provider.
    pub fn accept_connection(&mut self) -> Result<Option<SessionId>, ShutdownReason> {
        let channel = match self.listener.accept() {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                log::debug!("No connection pending on fd={}", self.listener_socket);
                return Ok(None);
            }
            Err(e) => {
                log::error!("Accept failed on fd={}: {}", self.listener_socket, e);
                return Err(ShutdownReason::AcceptFailed(e));
            }
        };

        match self.sessions.insert(channel) {
            Ok(id) => {
                let socket = self.sessions.get(id).map(|s| s.socket_id());
                if let Some(socket) = socket {
                    self.interest.register(socket);
                    log::info!(
                        "Server fd={}: new client on channel fd={} (session {}, {} live)",
                        self.listener_socket,
                        socket,
                        id,
                        self.sessions.len()
                    );
                }
                Ok(Some(id))
            }
            Err(mut channel) => {
                log::warn!(
                    "Rejecting connection on fd={}: all {} sessions in use",
                    channel.socket_id(),
                    self.sessions.capacity()
                );
                if let Err(e) = channel.reject("Provider has reached its session limit") {
                    log::warn!("Failed to reject channel: {}", e);
                }
                Ok(None)
            }
        }
    }

    fn read_from_session(&mut self, id: SessionId) -> Option<ShutdownReason> {
        let state = self.sessions.get(id)?.state();
        match state {
            ConnectionState::Initializing => {
                self.advance_channel_init(id);
                None
            }
            ConnectionState::Active => self.drain_reads(id),
            ConnectionState::Uninitialized | ConnectionState::Closed => {
                self.remove_session(id, SessionError::Closed);
                None
            }
        }
    }

    /// Drives one negotiation step of an initializing session.
    ///
    /// Nothing is read or dispatched here even if the channel turns active.
    pub fn advance_channel_init(&mut self, id: SessionId) {
        let now = self.clock.now();
        let (outcome, socket) = match self.sessions.get_mut(id) {
            Some(session) if session.state() == ConnectionState::Initializing => {
                let outcome = session.channel_mut().init();
                (outcome, session.socket_id())
            }
            _ => return,
        };

        match outcome {
            InitOutcome::InProgress {
                old_socket: Some(old),
            } => {
                log::info!(
                    "Channel in progress, new fd={} old fd={}",
                    socket,
                    old
                );
                self.sessions.rekey(old, socket);
                self.interest.replace(old, socket);
            }
            InitOutcome::InProgress { old_socket: None } => {
                log::debug!("Channel fd={} connection in progress", socket);
            }
            InitOutcome::Active => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.set_state(ConnectionState::Active);
                    session.prime_pings(now);
                    let info = session.channel().info();
                    log::info!(
                        "Client channel fd={} is now ACTIVE, ping timeout {:?}",
                        socket,
                        info.ping_timeout
                    );
                    for version in &info.component_versions {
                        log::info!("Connection is from {} device", version);
                    }
                }
            }
            InitOutcome::Failed(e) => {
                log::warn!("Session inactive fd={} <{}>", socket, e);
                self.remove_session(id, SessionError::Init(e));
                return;
            }
        }
        self.track_output(id);
    }

    fn drain_reads(&mut self, id: SessionId) -> Option<ShutdownReason> {
        loop {
            let (outcome, socket) = match self.sessions.get_mut(id) {
                Some(session) => (session.channel_mut().read(), session.socket_id()),
                None => return None,
            };

            match outcome {
                ReadOutcome::Message { data, stats, more } => {
                    if self.config.show_transport_details {
                        log::info!(
                            "Bytes in: {} uncompressed bytes in: {} on fd={}",
                            stats.bytes_read,
                            stats.uncompressed_bytes_read,
                            socket
                        );
                    }
                    let result = match self.sessions.get_mut(id) {
                        Some(session) => dispatch(
                            &mut self.handlers,
                            id,
                            session.channel_mut(),
                            &data,
                            self.config.trace_messages,
                        ),
                        None => return None,
                    };
                    self.track_output(id);
                    match result {
                        Dispatch::Continue => {
                            if let Some(session) = self.sessions.get_mut(id) {
                                session.mark_received();
                            }
                        }
                        Dispatch::RemoveSession(e) => {
                            self.remove_session(id, e);
                            return None;
                        }
                        Dispatch::Shutdown(reason) => return Some(reason),
                    }
                    if !more {
                        return None;
                    }
                }
                ReadOutcome::Ping { more } => {
                    log::trace!("Received ping on fd={}", socket);
                    if let Some(session) = self.sessions.get_mut(id) {
                        session.mark_received();
                    }
                    if !more {
                        return None;
                    }
                }
                ReadOutcome::WouldBlock => return None,
                ReadOutcome::FdChanged { old, new } => {
                    log::info!("Read fd change, old fd={} new fd={}", old, new);
                    self.sessions.rekey(old, new);
                    self.interest.replace(old, new);
                    return None;
                }
                ReadOutcome::Backpressure(signal) => {
                    let closed = self
                        .sessions
                        .get(id)
                        .map(|s| s.channel().state() == ConnectionState::Closed)
                        .unwrap_or(true);
                    if closed {
                        log::warn!("Channel fd={} closed after {:?}", socket, signal);
                        self.remove_session(id, SessionError::Closed);
                    } else {
                        log::warn!("Read backpressure on fd={}: {:?}", socket, signal);
                    }
                    return None;
                }
                ReadOutcome::Failure(e) => {
                    log::warn!("Channel inactive fd={} <{}>", socket, e);
                    self.remove_session(id, SessionError::Read(e));
                    return None;
                }
            }
        }
    }

    fn flush_session(&mut self, id: SessionId) {
        let now = self.clock.now();
        let (result, socket) = match self.sessions.get_mut(id) {
            Some(session) => {
                // A transport can finish negotiation on the socket while init
                // still reports progress; the first flush then arms the pings.
                if session.prime_pings(now) {
                    log::info!(
                        "Using {:?} as ping timeout for channel fd={}",
                        session.channel().ping_timeout(),
                        session.socket_id()
                    );
                }
                (session.channel_mut().flush(), session.socket_id())
            }
            None => return,
        };

        match result {
            Ok(FlushStatus::Drained) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.set_write_pending(false);
                }
                self.interest.clear_write(socket);
            }
            Ok(FlushStatus::MoreRemaining) => {
                log::trace!("Output still pending on fd={}", socket);
            }
            Err(e) => {
                log::warn!("Flush failed on fd={}: {}", socket, e);
                self.remove_session(id, SessionError::Flush(e));
            }
        }
    }

    /// Keeps the write-pending flag and write interest in step with the channel.
    fn track_output(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(id) {
            let pending = session.channel().has_pending_output();
            let socket = session.socket_id();
            session.set_write_pending(pending);
            if pending {
                self.interest.set_write(socket);
            } else {
                self.interest.clear_write(socket);
            }
        }
    }

    /// Publishes one round of item updates to every active session.
    pub fn update_tick(&mut self) {
        self.handlers.update_items();
        for id in self.sessions.ids() {
            let result = match self.sessions.get_mut(id) {
                Some(session) if session.state() == ConnectionState::Active => {
                    self.handlers.send_item_updates(id, session.channel_mut())
                }
                _ => continue,
            };
            match result {
                Ok(()) => self.track_output(id),
                Err(e) => {
                    self.remove_session(id, SessionError::Update(e));
                }
            }
        }
    }

    /// Sends due pings and removes sessions whose peer went silent.
    ///
    /// A ping that cannot be sent is fatal to the whole provider.
    pub fn supervise_pings(&mut self) -> Option<ShutdownReason> {
        let now = self.clock.now();
        for id in self.sessions.ids() {
            let session = match self.sessions.get_mut(id) {
                Some(session) => session,
                None => continue,
            };
            let mut schedule = match session.pings() {
                Some(schedule) => *schedule,
                None => continue,
            };
            let socket = session.socket_id();

            if schedule.send_due(now) {
                if let Err(e) = session.channel_mut().ping() {
                    log::error!("Failed to send ping on fd={}: {}", socket, e);
                    return Some(ShutdownReason::PingSendFailed(e));
                }
                log::trace!("Sent ping on fd={}", socket);
                schedule.ping_sent(now);
            }

            let check = schedule.check_receive(now, session.received_message());
            if let Some(pings) = session.pings_mut() {
                *pings = schedule;
            }
            match check {
                ReceiveCheck::NotDue => {}
                ReceiveCheck::Alive => session.clear_received(),
                ReceiveCheck::Lapsed => {
                    log::warn!("Lost contact with client fd={}", socket);
                    self.remove_session(id, SessionError::KeepaliveLapsed);
                    continue;
                }
            }
            self.track_output(id);
        }
        None
    }

    /// Removes a session. Returns `false` if it was already gone.
    pub fn remove_session(&mut self, id: SessionId, reason: SessionError) -> bool {
        if self.sessions.get(id).is_none() {
            log::debug!("Session {} already removed", id);
            return false;
        }
        log::warn!("Removing session {}: {}", id, reason);
        self.release(id)
    }

    fn release(&mut self, id: SessionId) -> bool {
        let mut session = match self.sessions.remove(id) {
            Some(session) => session,
            None => return false,
        };
        let socket = session.socket_id();
        self.interest.deregister(socket);
        self.handlers.session_closed(id);
        if let Err(e) = session.channel_mut().close() {
            log::warn!("Failed to close channel fd={}: {}", socket, e);
        }
        log::info!(
            "Session {} on fd={} closed, {} live",
            id,
            socket,
            self.sessions.len()
        );
        true
    }

    /// Closes every stream and channel, then the listening endpoint.
    ///
    /// Hands `reason` back so callers can report it.
    pub fn shutdown_all(&mut self, reason: ShutdownReason) -> ShutdownReason {
        log::info!("Shutting down provider: {}", reason);

        for id in self.sessions.ids() {
            if let Some(session) = self.sessions.get_mut(id) {
                if matches!(
                    session.state(),
                    ConnectionState::Active | ConnectionState::Initializing
                ) {
                    let socket = session.socket_id();
                    if let Err(e) = self.handlers.send_close_statuses(id, session.channel_mut()) {
                        log::warn!("Failed to send close statuses on fd={}: {}", socket, e);
                    }
                    if session.channel().has_pending_output() {
                        drain_output(session.channel_mut(), socket);
                    }
                }
            }
            self.release(id);
        }

        self.interest.deregister(self.listener_socket);
        if let Err(e) = self.listener.close() {
            log::warn!("Failed to close listener fd={}: {}", self.listener_socket, e);
        }
        self.terminated = true;
        log::info!("Provider shut down");
        reason
    }
}

fn drain_output<C: Channel + ?Sized>(channel: &mut C, socket: SocketId) {
    for _ in 0..MAX_SHUTDOWN_FLUSH_ATTEMPTS {
        match channel.flush() {
            Ok(FlushStatus::Drained) => return,
            Ok(FlushStatus::MoreRemaining) => continue,
            Err(e) => {
                log::warn!("Flush failed on fd={} during shutdown: {}", socket, e);
                return;
            }
        }
    }
    log::warn!("Output on fd={} still pending at shutdown", socket);
}
