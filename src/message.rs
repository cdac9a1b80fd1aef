//! Message envelope and its JSON codec.
//!
//! Every data frame on a channel carries one [`Message`]. The core only
//! looks at the envelope (domain type, message class, stream id); the
//! domain handlers look at the key, state and payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::TryFrom;

use crate::errors::CodecError;

/// Application-level subject of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DomainType {
    /// Session login.
    Login,
    /// Source directory.
    Source,
    /// Field and enum-type dictionaries.
    Dictionary,
    /// Level 1 market price.
    MarketPrice,
    /// Order-level book.
    MarketByOrder,
    /// Price-level book.
    MarketByPrice,
    /// List of available item names.
    SymbolList,
    /// Yield curve.
    YieldCurve,
    /// Anything this provider has no handler for.
    Other(u8),
}

impl From<u8> for DomainType {
    fn from(value: u8) -> Self {
        match value {
            1 => DomainType::Login,
            4 => DomainType::Source,
            5 => DomainType::Dictionary,
            6 => DomainType::MarketPrice,
            7 => DomainType::MarketByOrder,
            8 => DomainType::MarketByPrice,
            10 => DomainType::SymbolList,
            22 => DomainType::YieldCurve,
            other => DomainType::Other(other),
        }
    }
}

impl From<DomainType> for u8 {
    fn from(domain: DomainType) -> Self {
        match domain {
            DomainType::Login => 1,
            DomainType::Source => 4,
            DomainType::Dictionary => 5,
            DomainType::MarketPrice => 6,
            DomainType::MarketByOrder => 7,
            DomainType::MarketByPrice => 8,
            DomainType::SymbolList => 10,
            DomainType::YieldCurve => 22,
            DomainType::Other(value) => value,
        }
    }
}

/// Role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MsgClass {
    /// Asks for an item, opening a stream when streaming.
    Request,
    /// Full image of an item.
    Refresh,
    /// State change without data, e.g. a stream closing.
    Status,
    /// Changes since the last image.
    Update,
    /// Ends a stream.
    Close,
    /// Acknowledges a post.
    Ack,
    /// Bidirectional message without fixed semantics.
    Generic,
    /// Contributed data from a consumer.
    Post,
}

impl TryFrom<u8> for MsgClass {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MsgClass::Request,
            2 => MsgClass::Refresh,
            3 => MsgClass::Status,
            4 => MsgClass::Update,
            5 => MsgClass::Close,
            6 => MsgClass::Ack,
            7 => MsgClass::Generic,
            8 => MsgClass::Post,
            other => return Err(CodecError::UnknownMsgClass(other)),
        })
    }
}

impl From<MsgClass> for u8 {
    fn from(class: MsgClass) -> Self {
        match class {
            MsgClass::Request => 1,
            MsgClass::Refresh => 2,
            MsgClass::Status => 3,
            MsgClass::Update => 4,
            MsgClass::Close => 5,
            MsgClass::Ack => 6,
            MsgClass::Generic => 7,
            MsgClass::Post => 8,
        }
    }
}

/// Identifies the item a request or response is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgKey {
    /// Item name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Service the item belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<u16>,
}

impl MsgKey {
    /// Key with a name and no service.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            service_id: None,
        }
    }

    /// Sets the service id.
    pub fn with_service(mut self, service_id: u16) -> Self {
        self.service_id = Some(service_id);
        self
    }
}

/// Whether a stream stays open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Updates follow.
    Open,
    /// A one-off snapshot; nothing follows.
    NonStreaming,
    /// The stream is gone and must not be reopened as is.
    Closed,
    /// The stream is gone but may be requested again.
    ClosedRecover,
}

/// Quality of the data on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
    /// Data is current.
    Ok,
    /// Data may be stale.
    Suspect,
}

/// Reason attached to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCode {
    /// No particular reason.
    None,
    /// Item or service is unknown.
    NotFound,
    /// The request itself is malformed.
    UsageError,
    /// The item is already open on another stream.
    AlreadyOpen,
    /// The per-session item limit was reached.
    TooManyItems,
    /// The user may not see the item.
    NotEntitled,
}

/// Stream and data state carried by refresh and status messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Stream state.
    pub stream: StreamState,
    /// Data state.
    pub data: DataState,
    /// Reason code.
    pub code: StateCode,
    /// Human-readable explanation.
    #[serde(default)]
    pub text: String,
}

impl State {
    /// Open stream with good data.
    pub fn open_ok(text: impl Into<String>) -> Self {
        Self {
            stream: StreamState::Open,
            data: DataState::Ok,
            code: StateCode::None,
            text: text.into(),
        }
    }

    /// Closed stream with suspect data.
    pub fn closed(code: StateCode, text: impl Into<String>) -> Self {
        Self {
            stream: StreamState::Closed,
            data: DataState::Suspect,
            code,
            text: text.into(),
        }
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message class.
    pub class: MsgClass,
    /// Domain the message belongs to.
    pub domain: DomainType,
    /// Stream the message travels on.
    pub stream_id: i32,
    /// Item the message is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MsgKey>,
    /// Stream state, set on refresh and status messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    /// Request wants a stream of updates rather than a single snapshot.
    #[serde(default, skip_serializing_if = "is_false")]
    pub streaming: bool,
    /// Refresh answers a request (as opposed to being unsolicited).
    #[serde(default, skip_serializing_if = "is_false")]
    pub solicited: bool,
    /// Last part of a refresh.
    #[serde(default, skip_serializing_if = "is_false")]
    pub complete: bool,
    /// Domain-specific body.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Message {
    fn bare(class: MsgClass, domain: DomainType, stream_id: i32) -> Self {
        Self {
            class,
            domain,
            stream_id,
            key: None,
            state: None,
            streaming: false,
            solicited: false,
            complete: false,
            payload: Value::Null,
        }
    }

    /// Streaming request for `key`.
    pub fn request(domain: DomainType, stream_id: i32, key: MsgKey) -> Self {
        Self {
            key: Some(key),
            streaming: true,
            ..Self::bare(MsgClass::Request, domain, stream_id)
        }
    }

    /// Solicited, complete refresh.
    pub fn refresh(domain: DomainType, stream_id: i32, state: State, payload: Value) -> Self {
        Self {
            state: Some(state),
            solicited: true,
            complete: true,
            payload,
            ..Self::bare(MsgClass::Refresh, domain, stream_id)
        }
    }

    /// Update carrying `payload`.
    pub fn update(domain: DomainType, stream_id: i32, payload: Value) -> Self {
        Self {
            payload,
            ..Self::bare(MsgClass::Update, domain, stream_id)
        }
    }

    /// Status carrying `state`.
    pub fn status(domain: DomainType, stream_id: i32, state: State) -> Self {
        Self {
            state: Some(state),
            ..Self::bare(MsgClass::Status, domain, stream_id)
        }
    }

    /// Close for `stream_id`.
    pub fn close(domain: DomainType, stream_id: i32) -> Self {
        Self::bare(MsgClass::Close, domain, stream_id)
    }

    /// Sets the key.
    pub fn with_key(mut self, key: MsgKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Item name from the key, if any.
    pub fn name(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| k.name.as_deref())
    }

    /// Service id from the key, if any.
    pub fn service_id(&self) -> Option<u16> {
        self.key.as_ref().and_then(|k| k.service_id)
    }

    /// Parses a message body.
    ///
    /// # Errors
    /// [`CodecError`] if `buf` is not a valid message.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(buf)?)
    }

    /// Serializes the message body.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }
}
