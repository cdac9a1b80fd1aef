//! Non-blocking TCP implementation of [`Listener`] and [`Channel`].

use bytes::{Buf, BytesMut};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use crate::defs::{COMPONENT_VERSION, DEFAULT_PING_TIMEOUT_SEC, MIN_PING_TIMEOUT_SEC};
use crate::errors::TransportError;
use crate::transport::frame::{self, FrameKind};
use crate::transport::{
    Channel, ChannelInfo, ConnectionState, FlushStatus, InitOutcome, Listener, ReadOutcome,
    ReadStats, SocketId, WriteStatus,
};

const READ_CHUNK: usize = 16 * 1024;
/// Reads spent draining a refused peer before the refusal goes out.
const REJECT_DRAIN_READS: usize = 4;

/// Per-channel settings offered during negotiation.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Largest ping timeout the provider will agree to.
    pub ping_timeout: Duration,
    /// Version string announced to the peer.
    pub component: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SEC as u64),
            component: COMPONENT_VERSION.to_string(),
        }
    }
}

/// Picks the ping timeout both sides can live with.
pub fn negotiate_ping_timeout(requested: Duration, offered: Duration) -> Duration {
    requested
        .min(offered)
        .max(Duration::from_secs(MIN_PING_TIMEOUT_SEC as u64))
}

/// Listening TCP endpoint.
///
/// Closing releases the socket right away; the endpoint keeps reporting the
/// descriptor it was registered under.
#[derive(Debug)]
pub struct TcpEndpoint {
    listener: Option<TcpListener>,
    socket: SocketId,
    options: ChannelOptions,
}

impl TcpEndpoint {
    /// Binds a non-blocking listener on `addr`.
    ///
    /// # Errors
    /// Returns [`TransportError::Bind`] if the address is unavailable.
    pub fn bind(addr: &str, options: ChannelOptions) -> Result<Self, TransportError> {
        log::info!("Binding provider endpoint to address: {}", addr);
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::Bind(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        let socket = SocketId(listener.as_raw_fd());
        Ok(Self {
            listener: Some(listener),
            socket,
            options,
        })
    }

    /// Address the endpoint is bound to.
    ///
    /// # Errors
    /// [`TransportError::NotActive`] once the endpoint is closed.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(TransportError::NotActive),
        }
    }

    /// Whether [`Listener::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }
}

impl Listener for TcpEndpoint {
    type Channel = TcpChannel;

    fn socket_id(&self) -> SocketId {
        self.socket
    }

    fn accept(&mut self) -> Result<Option<TcpChannel>, TransportError> {
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return Ok(None),
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                Ok(Some(TcpChannel::new(stream, peer, self.options.clone())))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(None)
            }
            Err(e) => Err(TransportError::Accept(e.to_string())),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.listener.take().is_some() {
            log::info!("Closed provider endpoint fd={}", self.socket);
        }
        Ok(())
    }
}

/// One accepted consumer connection.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    peer: SocketAddr,
    options: ChannelOptions,
    state: ConnectionState,
    ping_timeout: Duration,
    component_versions: Vec<String>,
    input: BytesMut,
    output: BytesMut,
}

enum Fill {
    Data,
    WouldBlock,
    Eof,
}

impl TcpChannel {
    fn new(stream: TcpStream, peer: SocketAddr, options: ChannelOptions) -> Self {
        Self {
            stream,
            peer,
            ping_timeout: options.ping_timeout,
            options,
            state: ConnectionState::Initializing,
            component_versions: Vec::new(),
            input: BytesMut::with_capacity(READ_CHUNK),
            output: BytesMut::new(),
        }
    }

    /// One non-blocking read of at most `limit` bytes into the input buffer.
    fn fill(&mut self, limit: usize) -> Result<Fill, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        let limit = limit.clamp(1, READ_CHUNK);
        loop {
            match self.stream.read(&mut chunk[..limit]) {
                Ok(0) => return Ok(Fill::Eof),
                Ok(n) => {
                    self.input.extend_from_slice(&chunk[..n]);
                    return Ok(Fill::Data);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Fill::WouldBlock),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn push_output(&mut self) -> Result<FlushStatus, TransportError> {
        while !self.output.is_empty() {
            match self.stream.write(&self.output) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => self.output.advance(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(FlushStatus::MoreRemaining)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(FlushStatus::Drained)
    }

    fn queue(&mut self, kind: FrameKind, payload: &[u8]) -> Result<WriteStatus, TransportError> {
        frame::encode(kind, payload, &mut self.output);
        match self.push_output()? {
            FlushStatus::Drained => Ok(WriteStatus::Flushed),
            FlushStatus::MoreRemaining => Ok(WriteStatus::Pending),
        }
    }

    fn accept_handshake(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let (requested, component) = frame::decode_handshake(payload)?;
        self.ping_timeout = negotiate_ping_timeout(requested, self.options.ping_timeout);
        if !component.is_empty() {
            self.component_versions.push(component);
        }
        let ack = frame::encode_handshake(self.ping_timeout, &self.options.component);
        self.queue(FrameKind::ConnectAck, &ack)?;
        self.state = ConnectionState::Active;
        Ok(())
    }
}

impl Channel for TcpChannel {
    fn socket_id(&self) -> SocketId {
        SocketId(self.stream.as_raw_fd())
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    fn init(&mut self) -> InitOutcome {
        if self.state != ConnectionState::Initializing {
            return InitOutcome::Failed(TransportError::Protocol(format!(
                "init called in state {:?}",
                self.state
            )));
        }
        loop {
            match frame::decode(&mut self.input) {
                Ok(Some(f)) if f.kind == FrameKind::ConnectRequest => {
                    return match self.accept_handshake(&f.payload) {
                        Ok(()) => InitOutcome::Active,
                        Err(e) => {
                            self.state = ConnectionState::Closed;
                            InitOutcome::Failed(e)
                        }
                    };
                }
                Ok(Some(f)) => {
                    self.state = ConnectionState::Closed;
                    return InitOutcome::Failed(TransportError::Protocol(format!(
                        "expected connect request, got {:?}",
                        f.kind
                    )));
                }
                Ok(None) => {}
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return InitOutcome::Failed(e);
                }
            }
            // Frames behind the connect request stay on the socket so the
            // readiness wait still reports them once the channel is active.
            let wanted = match frame::missing_len(&self.input) {
                Ok(wanted) => wanted,
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return InitOutcome::Failed(e);
                }
            };
            match self.fill(wanted) {
                Ok(Fill::Data) => continue,
                Ok(Fill::WouldBlock) => return InitOutcome::InProgress { old_socket: None },
                Ok(Fill::Eof) => {
                    self.state = ConnectionState::Closed;
                    return InitOutcome::Failed(TransportError::ConnectionClosed);
                }
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return InitOutcome::Failed(e);
                }
            }
        }
    }

    fn read(&mut self) -> ReadOutcome {
        if self.state != ConnectionState::Active {
            return ReadOutcome::Failure(TransportError::NotActive);
        }
        loop {
            match frame::decode(&mut self.input) {
                Ok(Some(f)) => {
                    let more = frame::has_complete_frame(&self.input);
                    return match f.kind {
                        FrameKind::Data => {
                            let wire_len = f.wire_len();
                            ReadOutcome::Message {
                                data: f.payload,
                                stats: ReadStats {
                                    bytes_read: wire_len,
                                    uncompressed_bytes_read: wire_len,
                                },
                                more,
                            }
                        }
                        FrameKind::Ping => ReadOutcome::Ping { more },
                        other => {
                            self.state = ConnectionState::Closed;
                            ReadOutcome::Failure(TransportError::Protocol(format!(
                                "unexpected {:?} frame on active channel",
                                other
                            )))
                        }
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return ReadOutcome::Failure(e);
                }
            }
            match self.fill(READ_CHUNK) {
                Ok(Fill::Data) => continue,
                Ok(Fill::WouldBlock) => return ReadOutcome::WouldBlock,
                Ok(Fill::Eof) => {
                    self.state = ConnectionState::Closed;
                    return ReadOutcome::Failure(TransportError::ConnectionClosed);
                }
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return ReadOutcome::Failure(e);
                }
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<WriteStatus, TransportError> {
        if self.state != ConnectionState::Active {
            return Err(TransportError::NotActive);
        }
        self.queue(FrameKind::Data, data)
    }

    fn flush(&mut self) -> Result<FlushStatus, TransportError> {
        self.push_output()
    }

    fn ping(&mut self) -> Result<WriteStatus, TransportError> {
        if self.state != ConnectionState::Active {
            return Err(TransportError::NotActive);
        }
        self.queue(FrameKind::Ping, &[])
    }

    fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    fn info(&self) -> ChannelInfo {
        ChannelInfo {
            ping_timeout: self.ping_timeout,
            component_versions: self.component_versions.clone(),
            peer: Some(self.peer),
        }
    }

    fn reject(&mut self, reason: &str) -> Result<(), TransportError> {
        // Unread input makes the close reset the connection before the NAK lands.
        for _ in 0..REJECT_DRAIN_READS {
            if !matches!(self.fill(READ_CHUNK), Ok(Fill::Data)) {
                break;
            }
        }
        frame::encode(FrameKind::ConnectNak, reason.as_bytes(), &mut self.output);
        // Best effort: the peer may already be gone.
        let _ = self.push_output();
        self.close()
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.state = ConnectionState::Closed;
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}
