//! Error types, one `thiserror` enum per layer.

use rand_distr::NormalError;
use thiserror::Error;

use crate::message::{DomainType, MsgClass};

/// Errors that may occur inside the [`PriceGenerator`](crate::price_generator::PriceGenerator).
#[derive(Error, Debug)]
pub enum PriceGeneratorError {
    /// Supplied volatility parameter is outside the allowed numeric range.
    ///
    /// Volatility must be within `(0.0, 1.0]`.
    #[error("Invalid volatility: {0}")]
    InvalidVolatility(f64),

    /// Failure retrieving the current system time.
    #[error("System time error: {0}")]
    TimeError(#[from] std::time::SystemTimeError),

    /// Error constructing the log-normal distribution used for
    /// generating price movements.
    #[error("Distribution error: {0}")]
    DistributionError(#[from] NormalError),
}

/// Errors produced while turning bytes into a [`Message`](crate::message::Message) and back.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is not a well-formed message document.
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The message class byte does not name a known class.
    #[error("Unknown message class: {0}")]
    UnknownMsgClass(u8),

    /// The frame kind byte does not name a known frame.
    #[error("Unknown frame kind: {0}")]
    UnknownFrameKind(u8),
}

/// Errors raised by the transport collaborators.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The listening endpoint failed to bind.
    #[error("Failed to bind listener: {0}")]
    Bind(String),

    /// Accepting a pending connection failed.
    #[error("Failed to accept connection: {0}")]
    Accept(String),

    /// Socket-level failure.
    #[error("Channel IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The peer sent something the framing layer does not allow here.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// A frame header announced a body larger than the allowed maximum.
    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    /// The provider refused the connection during negotiation.
    #[error("Connection rejected: {0}")]
    HandshakeRejected(String),

    /// An operation that needs an active channel was attempted too early or too late.
    #[error("Channel is not active")]
    NotActive,

    /// Frame contents could not be decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors returned by the domain handlers.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Writing a response on the channel failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response could not be encoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The login request was refused.
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    /// The handler does not accept this class of message on its domain.
    #[error("Unexpected {class:?} message on {domain:?} domain")]
    UnexpectedMessage {
        /// Domain of the offending message.
        domain: DomainType,
        /// Class of the offending message.
        class: MsgClass,
    },

    /// The message payload did not have the expected shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The upstream peer could not deliver the dictionary.
    #[error("Dictionary download failed: {0}")]
    DictionaryDownload(String),

    /// Item data could not be produced.
    #[error("Price generator error: {0}")]
    Generator(#[from] PriceGeneratorError),
}

/// Reasons a single session is removed. None of these affect other sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The message envelope could not be decoded.
    #[error("Decode failed: {0}")]
    Decode(#[from] CodecError),

    /// A domain handler failed while processing a message.
    #[error("Handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// A dictionary request arrived before any dictionary was available.
    #[error("Dictionary requested before it was ready")]
    DictionaryNotReady,

    /// Channel negotiation failed.
    #[error("Channel initialization failed: {0}")]
    Init(TransportError),

    /// Reading from the channel failed.
    #[error("Read failed: {0}")]
    Read(TransportError),

    /// Flushing buffered output failed.
    #[error("Flush failed: {0}")]
    Flush(TransportError),

    /// The channel reported itself closed.
    #[error("Channel closed")]
    Closed,

    /// Nothing was received from the peer within the ping timeout.
    #[error("Lost contact with peer")]
    KeepaliveLapsed,

    /// Publishing item updates failed.
    #[error("Item update failed: {0}")]
    Update(HandlerError),
}

/// Conditions that end the whole provider.
#[derive(Error, Debug)]
pub enum ShutdownReason {
    /// The configured run time elapsed.
    #[error("Run-time expired")]
    RuntimeExpired,

    /// A keepalive ping could not be sent.
    #[error("Failed to send ping: {0}")]
    PingSendFailed(TransportError),

    /// No dictionary is available and the connected peer cannot provide one.
    #[error("Dictionary could not be downloaded, the connection does not support provider dictionary download")]
    DictionaryDownloadUnsupported,

    /// The listening endpoint failed to accept.
    #[error("Accept failed: {0}")]
    AcceptFailed(TransportError),
}

/// Failures that end the main loop without the orderly shutdown path.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The readiness wait failed for a reason other than an interruption.
    #[error("Readiness wait failed: {0}")]
    Poll(std::io::Error),

    /// The server has already shut down.
    #[error("Server has already shut down")]
    Terminated,
}

/// Errors raised while loading dictionary files.
#[derive(Error, Debug)]
pub enum DictionaryError {
    /// The file could not be read.
    #[error("Failed to read dictionary {path}: {reason}")]
    Io {
        /// File that failed to open or read.
        path: String,
        /// Underlying error text.
        reason: String,
    },

    /// A line could not be parsed.
    #[error("Malformed dictionary entry on line {line}: {reason}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// A dictionary payload received on the wire had the wrong shape.
    #[error("Malformed dictionary payload: {0}")]
    Payload(String),
}

/// High-level errors returned by the provider and consumer binaries.
#[derive(Error, Debug)]
pub enum CliError {
    /// General wrapper around any textual failure.
    #[error("Cli failed with error: {0}")]
    GeneralError(String),
}

impl From<TransportError> for CliError {
    fn from(err: TransportError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<ServerError> for CliError {
    fn from(err: ServerError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<CodecError> for CliError {
    fn from(err: CodecError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}

impl From<PriceGeneratorError> for CliError {
    fn from(err: PriceGeneratorError) -> Self {
        CliError::GeneralError(err.to_string())
    }
}
