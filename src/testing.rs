//! Scripted stand-ins for the transport, selector and domain handlers.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::errors::{HandlerError, TransportError};
use crate::handlers::DomainHandlers;
use crate::message::Message;
use crate::poller::{Interest, Readiness, Selector};
use crate::session::SessionId;
use crate::transport::{
    Channel, ChannelInfo, ConnectionState, FlushStatus, InitOutcome, Listener, ReadOutcome,
    SocketId, WriteStatus,
};

#[derive(Debug)]
pub(crate) struct ChannelScript {
    pub(crate) socket: SocketId,
    pub(crate) state: ConnectionState,
    pub(crate) ping_timeout: Duration,
    pub(crate) init: VecDeque<InitOutcome>,
    pub(crate) reads: VecDeque<ReadOutcome>,
    pub(crate) flushes: VecDeque<Result<FlushStatus, TransportError>>,
    /// Socket to switch to when an fd-change init outcome is consumed.
    pub(crate) next_socket: Option<SocketId>,
    pub(crate) written: Vec<Vec<u8>>,
    pub(crate) hold_output: bool,
    pub(crate) pending_output: bool,
    pub(crate) fail_writes: bool,
    pub(crate) fail_pings: bool,
    pub(crate) pings_sent: usize,
    pub(crate) flush_calls: usize,
    pub(crate) closed: usize,
    pub(crate) rejected: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct MockChannel {
    script: Rc<RefCell<ChannelScript>>,
}

impl MockChannel {
    pub(crate) fn new(socket: i32) -> Self {
        Self {
            script: Rc::new(RefCell::new(ChannelScript {
                socket: SocketId(socket),
                state: ConnectionState::Initializing,
                ping_timeout: Duration::from_secs(30),
                init: VecDeque::new(),
                reads: VecDeque::new(),
                flushes: VecDeque::new(),
                next_socket: None,
                written: Vec::new(),
                hold_output: false,
                pending_output: false,
                fail_writes: false,
                fail_pings: false,
                pings_sent: 0,
                flush_calls: 0,
                closed: 0,
                rejected: None,
            })),
        }
    }

    pub(crate) fn script(&self) -> RefMut<'_, ChannelScript> {
        self.script.borrow_mut()
    }

    pub(crate) fn push_init(&self, outcome: InitOutcome) {
        self.script().init.push_back(outcome);
    }

    pub(crate) fn push_read(&self, outcome: ReadOutcome) {
        self.script().reads.push_back(outcome);
    }

    /// Queues a data message; `more` chains it to the next queued read.
    pub(crate) fn push_message(&self, msg: &Message, more: bool) {
        self.push_read(ReadOutcome::Message {
            data: msg.encode().unwrap(),
            stats: Default::default(),
            more,
        });
    }

    pub(crate) fn written_messages(&self) -> Vec<Message> {
        self.script()
            .written
            .iter()
            .filter_map(|w| Message::decode(w).ok())
            .collect()
    }
}

impl Channel for MockChannel {
    fn socket_id(&self) -> SocketId {
        self.script.borrow().socket
    }

    fn state(&self) -> ConnectionState {
        self.script.borrow().state
    }

    fn ping_timeout(&self) -> Duration {
        self.script.borrow().ping_timeout
    }

    fn init(&mut self) -> InitOutcome {
        let mut s = self.script();
        let outcome = s
            .init
            .pop_front()
            .unwrap_or(InitOutcome::InProgress { old_socket: None });
        match &outcome {
            InitOutcome::Active => s.state = ConnectionState::Active,
            InitOutcome::Failed(_) => s.state = ConnectionState::Closed,
            InitOutcome::InProgress {
                old_socket: Some(_),
            } => {
                if let Some(next) = s.next_socket.take() {
                    s.socket = next;
                }
            }
            InitOutcome::InProgress { old_socket: None } => {}
        }
        outcome
    }

    fn read(&mut self) -> ReadOutcome {
        let mut s = self.script();
        let outcome = s.reads.pop_front().unwrap_or(ReadOutcome::WouldBlock);
        match &outcome {
            ReadOutcome::FdChanged { new, .. } => s.socket = *new,
            ReadOutcome::Failure(_) => s.state = ConnectionState::Closed,
            _ => {}
        }
        outcome
    }

    fn write(&mut self, data: &[u8]) -> Result<WriteStatus, TransportError> {
        let mut s = self.script();
        if s.fail_writes {
            return Err(TransportError::ConnectionClosed);
        }
        s.written.push(data.to_vec());
        if s.hold_output {
            s.pending_output = true;
            Ok(WriteStatus::Pending)
        } else {
            Ok(WriteStatus::Flushed)
        }
    }

    fn flush(&mut self) -> Result<FlushStatus, TransportError> {
        let mut s = self.script();
        s.flush_calls += 1;
        let result = s.flushes.pop_front().unwrap_or(Ok(FlushStatus::Drained));
        if let Ok(FlushStatus::Drained) = result {
            s.pending_output = false;
        }
        result
    }

    fn ping(&mut self) -> Result<WriteStatus, TransportError> {
        let mut s = self.script();
        if s.fail_pings {
            return Err(TransportError::ConnectionClosed);
        }
        s.pings_sent += 1;
        Ok(WriteStatus::Flushed)
    }

    fn has_pending_output(&self) -> bool {
        self.script.borrow().pending_output
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            ping_timeout: self.ping_timeout(),
            component_versions: vec!["mock".into()],
            peer: None,
        }
    }

    fn reject(&mut self, reason: &str) -> Result<(), TransportError> {
        self.script().rejected = Some(reason.to_string());
        self.close()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut s = self.script();
        s.closed += 1;
        s.state = ConnectionState::Closed;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockListener {
    pending: Rc<RefCell<VecDeque<Result<Option<MockChannel>, TransportError>>>>,
    pub(crate) closed: Rc<Cell<bool>>,
}

pub(crate) const LISTENER_SOCKET: SocketId = SocketId(3);

impl MockListener {
    pub(crate) fn new() -> Self {
        Self {
            pending: Rc::new(RefCell::new(VecDeque::new())),
            closed: Rc::new(Cell::new(false)),
        }
    }

    pub(crate) fn push(&self, channel: MockChannel) {
        self.pending.borrow_mut().push_back(Ok(Some(channel)));
    }

    pub(crate) fn push_error(&self, err: TransportError) {
        self.pending.borrow_mut().push_back(Err(err));
    }
}

impl Listener for MockListener {
    type Channel = MockChannel;

    fn socket_id(&self) -> SocketId {
        LISTENER_SOCKET
    }

    fn accept(&mut self) -> Result<Option<MockChannel>, TransportError> {
        self.pending.borrow_mut().pop_front().unwrap_or(Ok(None))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed.set(true);
        Ok(())
    }
}

/// Replays queued wait results; an exhausted script behaves like a timeout.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedSelector {
    script: Rc<RefCell<VecDeque<io::Result<Readiness>>>>,
    pub(crate) seen: Rc<RefCell<Vec<Interest>>>,
}

impl ScriptedSelector {
    pub(crate) fn push(&self, result: io::Result<Readiness>) {
        self.script.borrow_mut().push_back(result);
    }

    pub(crate) fn push_ready(&self, readable: &[SocketId], writable: &[SocketId]) {
        self.push(Ok(Readiness {
            readable: readable.iter().copied().collect(),
            writable: writable.iter().copied().collect(),
            exceptional: BTreeSet::new(),
        }));
    }

    pub(crate) fn push_timeout(&self) {
        self.push(Ok(Readiness::default()));
    }
}

impl Selector for ScriptedSelector {
    fn select(&mut self, interest: &Interest, _timeout: Duration) -> io::Result<Readiness> {
        self.seen.borrow_mut().push(interest.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Readiness::default()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Login,
    Directory,
    DictionaryRequest,
    DictionaryResponse,
    Item,
    NotSupported,
    DictionaryRequests,
    UpdateItems,
    ItemUpdates(SessionId),
    CloseStatuses(SessionId),
    SessionClosed(SessionId),
}

/// Records every call; writes a marker on the channel for outbound calls.
#[derive(Debug, Default)]
pub(crate) struct RecordingHandlers {
    pub(crate) calls: Vec<Call>,
    pub(crate) dictionary_ready: bool,
    pub(crate) download_supported: bool,
    pub(crate) fail_on: Option<Call>,
}

impl RecordingHandlers {
    pub(crate) fn ready() -> Self {
        Self {
            dictionary_ready: true,
            ..Self::default()
        }
    }

    fn record(&mut self, call: Call) -> Result<(), HandlerError> {
        self.calls.push(call);
        if self.fail_on == Some(call) {
            return Err(HandlerError::InvalidPayload(format!("{:?} failed", call)));
        }
        Ok(())
    }
}

impl DomainHandlers for RecordingHandlers {
    fn process_login(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
        _msg: &Message,
    ) -> Result<(), HandlerError> {
        self.record(Call::Login)
    }

    fn supports_dictionary_download(&self, _session: SessionId) -> bool {
        self.download_supported
    }

    fn process_directory(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
        _msg: &Message,
    ) -> Result<(), HandlerError> {
        self.record(Call::Directory)
    }

    fn process_dictionary_request(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
        _msg: &Message,
    ) -> Result<(), HandlerError> {
        self.record(Call::DictionaryRequest)
    }

    fn process_dictionary_response(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
        _msg: &Message,
    ) -> Result<(), HandlerError> {
        self.record(Call::DictionaryResponse)
    }

    fn process_item(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
        _msg: &Message,
    ) -> Result<(), HandlerError> {
        self.record(Call::Item)
    }

    fn send_not_supported(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
        _msg: &Message,
    ) -> Result<(), HandlerError> {
        self.record(Call::NotSupported)
    }

    fn is_dictionary_ready(&self) -> bool {
        self.dictionary_ready
    }

    fn send_dictionary_requests(
        &mut self,
        _session: SessionId,
        _channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        self.record(Call::DictionaryRequests)
    }

    fn update_items(&mut self) {
        self.calls.push(Call::UpdateItems);
    }

    fn send_item_updates(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        self.record(Call::ItemUpdates(session))?;
        channel.write(b"update")?;
        Ok(())
    }

    fn send_close_statuses(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        self.record(Call::CloseStatuses(session))?;
        channel.write(b"close-status")?;
        Ok(())
    }

    fn session_closed(&mut self, session: SessionId) {
        self.calls.push(Call::SessionClosed(session));
    }
}
