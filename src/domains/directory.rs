//! Source directory domain.

use serde_json::{json, Value};
use std::collections::HashMap;

use crate::defs::{ENUM_DICTIONARY_NAME, FIELD_DICTIONARY_NAME, MAX_ITEMS_PER_SESSION};
use crate::domains::send;
use crate::errors::HandlerError;
use crate::message::{DomainType, Message, MsgClass, State};
use crate::session::SessionId;
use crate::transport::Channel;

/// The one service this provider publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service name.
    pub name: String,
    /// Service id.
    pub id: u16,
    /// Vendor published with the service.
    pub vendor: String,
}

impl ServiceInfo {
    /// Service with the default vendor.
    pub fn new(name: &str, id: u16) -> Self {
        Self {
            name: name.to_string(),
            id,
            vendor: "market_provider".to_string(),
        }
    }

    /// Directory refresh payload describing the service.
    pub fn payload(&self) -> Value {
        json!({
            "services": [{
                "service_id": self.id,
                "info": {
                    "name": self.name,
                    "vendor": self.vendor,
                    "is_source": true,
                    "capabilities": [
                        u8::from(DomainType::Dictionary),
                        u8::from(DomainType::MarketPrice),
                        u8::from(DomainType::MarketByOrder),
                        u8::from(DomainType::SymbolList),
                    ],
                    "dictionaries_provided": [FIELD_DICTIONARY_NAME, ENUM_DICTIONARY_NAME],
                    "dictionaries_used": [FIELD_DICTIONARY_NAME, ENUM_DICTIONARY_NAME],
                    "qos": [{"timeliness": "realtime", "rate": "tick_by_tick"}],
                },
                "state": {
                    "service_up": true,
                    "accepting_requests": true,
                },
                "load": {
                    "open_limit": MAX_ITEMS_PER_SESSION,
                },
            }]
        })
    }
}

/// Answers source directory requests.
#[derive(Debug)]
pub struct DirectoryHandler {
    trace: bool,
    service: ServiceInfo,
    streams: HashMap<SessionId, i32>,
}

impl DirectoryHandler {
    /// Handler publishing `service`.
    pub fn new(service: ServiceInfo, trace: bool) -> Self {
        Self {
            trace,
            service,
            streams: HashMap::new(),
        }
    }

    /// The published service.
    pub fn service(&self) -> &ServiceInfo {
        &self.service
    }

    /// Open directory stream of a session.
    pub fn stream(&self, session: SessionId) -> Option<i32> {
        self.streams.get(&session).copied()
    }

    /// Handles a directory request or close.
    ///
    /// # Errors
    /// A write failure, or a message class other than request or close.
    pub fn process(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        match msg.class {
            MsgClass::Request => {
                log::info!(
                    "Received source directory request on stream {} from session {}",
                    msg.stream_id,
                    session
                );
                let refresh = Message::refresh(
                    DomainType::Source,
                    msg.stream_id,
                    State::open_ok("Source directory refresh completed"),
                    self.service.payload(),
                );
                if msg.streaming {
                    self.streams.insert(session, msg.stream_id);
                }
                send(channel, &refresh, self.trace)
            }
            MsgClass::Close => {
                log::info!(
                    "Received source directory close for stream {} on session {}",
                    msg.stream_id,
                    session
                );
                if self.stream(session) == Some(msg.stream_id) {
                    self.streams.remove(&session);
                }
                Ok(())
            }
            class => Err(HandlerError::UnexpectedMessage {
                domain: DomainType::Source,
                class,
            }),
        }
    }

    /// Forgets the directory stream of a removed session.
    pub fn session_closed(&mut self, session: SessionId) {
        self.streams.remove(&session);
    }
}
