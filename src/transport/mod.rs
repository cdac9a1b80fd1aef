//! Channel-level contracts the session engine consumes.
//!
//! The core never touches sockets directly. It binds a [`Listener`],
//! accepts [`Channel`]s from it and drives them through negotiation,
//! reads, writes and flushes. [`tcp`] provides the production
//! implementation; [`consumer`] is the matching client side.

pub mod consumer;
pub mod frame;
pub mod tcp;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::errors::TransportError;

/// Operating-system socket identifier, as registered in the readiness sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub i32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Negotiation progress of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet handed to the engine.
    Uninitialized,
    /// Negotiation in progress.
    Initializing,
    /// Negotiated; messages flow.
    Active,
    /// Unusable; the session must be removed.
    Closed,
}

/// Result of one negotiation step.
#[derive(Debug)]
pub enum InitOutcome {
    /// Still negotiating. `old_socket` is set when the channel moved to a
    /// new socket during this step.
    InProgress {
        /// Socket the channel left, if it moved.
        old_socket: Option<SocketId>,
    },
    /// Negotiation finished; the channel is active.
    Active,
    /// Negotiation failed; the channel is unusable.
    Failed(TransportError),
}

/// Byte counters reported with each message read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Bytes taken off the socket for the message, framing included.
    pub bytes_read: usize,
    /// The same count after decompression.
    pub uncompressed_bytes_read: usize,
}

/// Flow-control signals that do not by themselves close the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// The peer is not keeping up with our output.
    Congestion,
    /// We are not keeping up with the peer's input.
    SlowReader,
    /// Input arrived out of sequence.
    PacketGap,
}

/// Result of a single read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    /// One complete application message. `more` is set when another
    /// complete frame is already buffered.
    Message {
        /// Encoded message body.
        data: Vec<u8>,
        /// Byte counts for this read.
        stats: ReadStats,
        /// Another complete frame is buffered.
        more: bool,
    },
    /// A bare keepalive from the peer.
    Ping {
        /// Another complete frame is buffered.
        more: bool,
    },
    /// Nothing complete is available yet.
    WouldBlock,
    /// The channel moved from `old` to `new`.
    FdChanged {
        /// Socket the channel left.
        old: SocketId,
        /// Socket the channel uses now.
        new: SocketId,
    },
    /// Flow-control signal; check the channel state to see whether it survived.
    Backpressure(Backpressure),
    /// The channel failed and must be discarded.
    Failure(TransportError),
}

/// Result of queueing a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Everything written so far reached the socket.
    Flushed,
    /// Some output is still buffered; a flush is required.
    Pending,
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Nothing is left to write.
    Drained,
    /// Output is left; wait for writability and flush again.
    MoreRemaining,
}

/// Descriptive information about an active channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    /// Negotiated ping timeout.
    pub ping_timeout: Duration,
    /// Version strings the peer announced.
    pub component_versions: Vec<String>,
    /// Remote address, when the transport has one.
    pub peer: Option<SocketAddr>,
}

/// One established connection to a consumer.
pub trait Channel {
    /// Socket currently backing the channel.
    fn socket_id(&self) -> SocketId;

    /// Negotiation state as the transport sees it.
    fn state(&self) -> ConnectionState;

    /// Negotiated ping timeout. Only meaningful once active.
    fn ping_timeout(&self) -> Duration;

    /// Drives one step of channel negotiation.
    fn init(&mut self) -> InitOutcome;

    /// Reads at most one message.
    fn read(&mut self) -> ReadOutcome;

    /// Queues one application message and tries to push it out.
    fn write(&mut self, data: &[u8]) -> Result<WriteStatus, TransportError>;

    /// Pushes buffered output to the socket.
    fn flush(&mut self) -> Result<FlushStatus, TransportError>;

    /// Sends a keepalive ping.
    fn ping(&mut self) -> Result<WriteStatus, TransportError>;

    /// Whether output is still waiting for a flush.
    fn has_pending_output(&self) -> bool;

    /// Details for logging.
    fn info(&self) -> ChannelInfo;

    /// Refuses the connection before it becomes active.
    ///
    /// Transports without a refusal message simply close.
    fn reject(&mut self, reason: &str) -> Result<(), TransportError> {
        let _ = reason;
        self.close()
    }

    /// Closes the connection. Later calls are no-ops.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// The listening endpoint.
pub trait Listener {
    /// Channel type produced by [`Listener::accept`].
    type Channel: Channel;

    /// Listening socket, as registered for readiness.
    fn socket_id(&self) -> SocketId;

    /// Accepts one pending connection; `Ok(None)` when none was actually pending.
    fn accept(&mut self) -> Result<Option<Self::Channel>, TransportError>;

    /// Stops listening. Pending and later connections are refused.
    fn close(&mut self) -> Result<(), TransportError>;
}
