//! Blocking consumer side of the TCP transport.
//!
//! Used by the `consumer` binary and by tests that talk to a running
//! provider.

use bytes::BytesMut;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::errors::TransportError;
use crate::message::Message;
use crate::transport::frame::{self, FrameKind};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something the provider sent.
#[derive(Debug)]
pub enum ConsumerEvent {
    /// An application message.
    Message(Message),
    /// A keepalive.
    Ping,
}

/// Established connection to a provider.
#[derive(Debug)]
pub struct ConsumerConnection {
    stream: TcpStream,
    input: BytesMut,
    ping_timeout: Duration,
    provider_component: String,
}

impl ConsumerConnection {
    /// Connects and performs the channel handshake.
    ///
    /// # Errors
    /// [`TransportError::HandshakeRejected`] if the provider refused the
    /// connection, or an IO/protocol error.
    pub fn connect(
        addr: &str,
        ping_timeout: Duration,
        component: &str,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let mut conn = Self {
            stream,
            input: BytesMut::new(),
            ping_timeout,
            provider_component: String::new(),
        };

        let mut wire = BytesMut::new();
        frame::encode(
            FrameKind::ConnectRequest,
            &frame::encode_handshake(ping_timeout, component),
            &mut wire,
        );
        conn.stream.write_all(&wire)?;

        let ack = conn
            .next_frame(HANDSHAKE_TIMEOUT)?
            .ok_or_else(|| TransportError::Protocol("no handshake response".into()))?;
        match ack.kind {
            FrameKind::ConnectAck => {
                let (negotiated, provider) = frame::decode_handshake(&ack.payload)?;
                conn.ping_timeout = negotiated;
                conn.provider_component = provider;
                log::info!(
                    "Connected to {} ({}), ping timeout {:?}",
                    addr,
                    conn.provider_component,
                    negotiated
                );
                Ok(conn)
            }
            FrameKind::ConnectNak => Err(TransportError::HandshakeRejected(
                String::from_utf8_lossy(&ack.payload).into_owned(),
            )),
            other => Err(TransportError::Protocol(format!(
                "unexpected {:?} frame during handshake",
                other
            ))),
        }
    }

    /// Ping timeout agreed with the provider.
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Version string the provider announced.
    pub fn provider_component(&self) -> &str {
        &self.provider_component
    }

    /// Encodes and sends one message.
    pub fn send(&mut self, msg: &Message) -> Result<(), TransportError> {
        let body = msg.encode()?;
        self.send_raw(&body)
    }

    /// Sends an arbitrary data frame, bypassing message encoding.
    pub fn send_raw(&mut self, body: &[u8]) -> Result<(), TransportError> {
        let mut wire = BytesMut::new();
        frame::encode(FrameKind::Data, body, &mut wire);
        self.stream.write_all(&wire)?;
        Ok(())
    }

    /// Sends a keepalive.
    pub fn send_ping(&mut self) -> Result<(), TransportError> {
        let mut wire = BytesMut::new();
        frame::encode(FrameKind::Ping, &[], &mut wire);
        self.stream.write_all(&wire)?;
        Ok(())
    }

    /// Waits up to `timeout` for the next message or ping.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<ConsumerEvent>, TransportError> {
        match self.next_frame(timeout)? {
            None => Ok(None),
            Some(f) => match f.kind {
                FrameKind::Data => Ok(Some(ConsumerEvent::Message(Message::decode(&f.payload)?))),
                FrameKind::Ping => Ok(Some(ConsumerEvent::Ping)),
                other => Err(TransportError::Protocol(format!(
                    "unexpected {:?} frame",
                    other
                ))),
            },
        }
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<frame::Frame>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            if let Some(f) = frame::decode(&mut self.input)? {
                return Ok(Some(f));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => self.input.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::TimedOut
                        || e.kind() == ErrorKind::Interrupted =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
