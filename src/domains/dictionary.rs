//! Dictionary domain.
//!
//! Serves the local dictionary to consumers and, when it is incomplete,
//! downloads the missing parts from a peer on the fixed download streams.

use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use crate::defs::{
    ENUM_DICTIONARY_NAME, ENUM_DICTIONARY_STREAM_ID, FIELD_DICTIONARY_NAME,
    FIELD_DICTIONARY_STREAM_ID,
};
use crate::dictionary::DataDictionary;
use crate::domains::{send, send_reject};
use crate::errors::HandlerError;
use crate::message::{DomainType, Message, MsgClass, MsgKey, State, StateCode, StreamState};
use crate::session::SessionId;
use crate::transport::Channel;

/// The two parts of a dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryKind {
    /// Field definitions, `RWFFld`.
    Field,
    /// Enum-type tables, `RWFEnum`.
    Enum,
}

impl DictionaryKind {
    /// Dictionary name used in message keys.
    pub fn name(self) -> &'static str {
        match self {
            DictionaryKind::Field => FIELD_DICTIONARY_NAME,
            DictionaryKind::Enum => ENUM_DICTIONARY_NAME,
        }
    }

    /// Part named `name`, if it is one of the two.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            FIELD_DICTIONARY_NAME => Some(DictionaryKind::Field),
            ENUM_DICTIONARY_NAME => Some(DictionaryKind::Enum),
            _ => None,
        }
    }

    /// Stream this provider uses to download the part.
    pub fn download_stream(self) -> i32 {
        match self {
            DictionaryKind::Field => FIELD_DICTIONARY_STREAM_ID,
            DictionaryKind::Enum => ENUM_DICTIONARY_STREAM_ID,
        }
    }

    fn from_download_stream(stream_id: i32) -> Option<Self> {
        match stream_id {
            FIELD_DICTIONARY_STREAM_ID => Some(DictionaryKind::Field),
            ENUM_DICTIONARY_STREAM_ID => Some(DictionaryKind::Enum),
            _ => None,
        }
    }
}

/// Serves the local dictionary and downloads missing parts from peers.
#[derive(Debug)]
pub struct DictionaryHandler {
    trace: bool,
    service_id: u16,
    dictionary: DataDictionary,
    streams: HashMap<SessionId, BTreeMap<i32, DictionaryKind>>,
}

impl DictionaryHandler {
    /// Wraps the dictionary loaded at startup, complete or not.
    pub fn new(dictionary: DataDictionary, service_id: u16, trace: bool) -> Self {
        Self {
            trace,
            service_id,
            dictionary,
            streams: HashMap::new(),
        }
    }

    /// Both parts are loaded.
    pub fn is_ready(&self) -> bool {
        self.dictionary.is_ready()
    }

    /// The dictionary as it stands.
    pub fn dictionary(&self) -> &DataDictionary {
        &self.dictionary
    }

    /// Open dictionary streams of a session.
    pub fn open_streams(&self, session: SessionId) -> Vec<(i32, DictionaryKind)> {
        self.streams
            .get(&session)
            .map(|s| s.iter().map(|(id, kind)| (*id, *kind)).collect())
            .unwrap_or_default()
    }

    /// Answers a consumer's dictionary request or close.
    ///
    /// # Errors
    /// A write failure, or a message class other than request or close.
    pub fn process_request(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        match msg.class {
            MsgClass::Request => {
                let name = msg.name().unwrap_or_default();
                let kind = match DictionaryKind::from_name(name) {
                    Some(kind) => kind,
                    None => {
                        return send_reject(
                            channel,
                            msg,
                            StateCode::NotFound,
                            format!("Dictionary request rejected, unknown dictionary '{}'", name),
                            self.trace,
                        )
                    }
                };
                log::info!(
                    "Received dictionary request for {} on stream {} from session {}",
                    name,
                    msg.stream_id,
                    session
                );

                let content = match kind {
                    DictionaryKind::Field => self.dictionary.field_payload(),
                    DictionaryKind::Enum => self.dictionary.enum_payload(),
                };
                let mut state = State::open_ok("Dictionary refresh completed");
                if msg.streaming {
                    self.streams
                        .entry(session)
                        .or_default()
                        .insert(msg.stream_id, kind);
                } else {
                    state.stream = StreamState::NonStreaming;
                }
                let refresh = Message::refresh(
                    DomainType::Dictionary,
                    msg.stream_id,
                    state,
                    json!({ "name": kind.name(), "dictionary": content }),
                )
                .with_key(MsgKey::named(kind.name()).with_service(self.service_id));
                send(channel, &refresh, self.trace)
            }
            MsgClass::Close => {
                log::info!(
                    "Received dictionary close for stream {} on session {}",
                    msg.stream_id,
                    session
                );
                if let Some(streams) = self.streams.get_mut(&session) {
                    streams.remove(&msg.stream_id);
                }
                Ok(())
            }
            class => Err(HandlerError::UnexpectedMessage {
                domain: DomainType::Dictionary,
                class,
            }),
        }
    }

    /// Absorbs a peer's answer to [`send_requests`](Self::send_requests).
    pub fn process_response(
        &mut self,
        session: SessionId,
        _channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        match msg.class {
            MsgClass::Refresh => {
                let kind = msg
                    .name()
                    .and_then(DictionaryKind::from_name)
                    .or_else(|| DictionaryKind::from_download_stream(msg.stream_id))
                    .ok_or_else(|| {
                        HandlerError::InvalidPayload(format!(
                            "dictionary refresh on unknown stream {}",
                            msg.stream_id
                        ))
                    })?;
                let content = msg.payload.get("dictionary").ok_or_else(|| {
                    HandlerError::InvalidPayload("dictionary refresh without content".into())
                })?;
                let applied = match kind {
                    DictionaryKind::Field => self.dictionary.apply_field_payload(content),
                    DictionaryKind::Enum => self.dictionary.apply_enum_payload(content),
                };
                applied.map_err(|e| HandlerError::DictionaryDownload(e.to_string()))?;
                log::info!(
                    "Received {} dictionary from session {}",
                    kind.name(),
                    session
                );
                if self.dictionary.is_ready() {
                    log::info!("Dictionary ready, {} fields", self.dictionary.field_count());
                }
                Ok(())
            }
            MsgClass::Status => match &msg.state {
                Some(state)
                    if matches!(
                        state.stream,
                        StreamState::Closed | StreamState::ClosedRecover
                    ) =>
                {
                    log::error!(
                        "Dictionary stream {} closed by session {}: {}",
                        msg.stream_id,
                        session,
                        state.text
                    );
                    Err(HandlerError::DictionaryDownload(state.text.clone()))
                }
                state => {
                    log::info!("Dictionary status on stream {}: {:?}", msg.stream_id, state);
                    Ok(())
                }
            },
            class => {
                log::debug!(
                    "Ignoring {:?} dictionary message on stream {}",
                    class,
                    msg.stream_id
                );
                Ok(())
            }
        }
    }

    /// Requests both parts of the dictionary from the peer.
    pub fn send_requests(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        for kind in [DictionaryKind::Field, DictionaryKind::Enum] {
            let mut request = Message::request(
                DomainType::Dictionary,
                kind.download_stream(),
                MsgKey::named(kind.name()).with_service(self.service_id),
            );
            request.streaming = false;
            log::info!(
                "Requesting {} dictionary from session {}",
                kind.name(),
                session
            );
            send(channel, &request, self.trace)?;
        }
        Ok(())
    }

    /// Sends a closed status on every open dictionary stream of the session.
    pub fn send_close_statuses(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        for (stream_id, kind) in self.open_streams(session) {
            let status = Message::status(
                DomainType::Dictionary,
                stream_id,
                State::closed(StateCode::None, "Dictionary stream closed"),
            )
            .with_key(MsgKey::named(kind.name()));
            send(channel, &status, self.trace)?;
        }
        Ok(())
    }

    /// Forgets the streams of a removed session.
    pub fn session_closed(&mut self, session: SessionId) {
        self.streams.remove(&session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::parse_enums;
    use crate::testing::MockChannel;
    use serde_json::Value;
    use std::io::Write;

    const FIELDS: &str = "TRDPRC_1 \"LAST\" 6 NULL PRICE 17 REAL64 7\nBID \"BID\" 22 NULL PRICE 17 REAL64 7\n";
    const ENUMS: &str = "PRCTCK_1 14\n 0 \" \" unspecified\n 1 #DE# up tick\n";

    fn loaded() -> DataDictionary {
        let mut fields = tempfile::NamedTempFile::new().unwrap();
        write!(fields, "{}", FIELDS).unwrap();
        let mut enums = tempfile::NamedTempFile::new().unwrap();
        write!(enums, "{}", ENUMS).unwrap();
        let (dictionary, errors) = DataDictionary::load(fields.path(), enums.path());
        assert!(errors.is_empty());
        dictionary
    }

    fn request(stream_id: i32, name: &str, streaming: bool) -> Message {
        let mut msg = Message::request(DomainType::Dictionary, stream_id, MsgKey::named(name));
        msg.streaming = streaming;
        msg
    }

    #[test]
    fn test_serves_field_dictionary() {
        let mut handler = DictionaryHandler::new(loaded(), 1, false);
        let mut channel = MockChannel::new(10);

        handler
            .process_request(SessionId(0), &mut channel, &request(5, "RWFFld", true))
            .unwrap();

        let sent = channel.written_messages();
        assert_eq!(sent[0].class, MsgClass::Refresh);
        assert!(sent[0].complete);
        assert_eq!(sent[0].payload["name"], "RWFFld");
        assert_eq!(sent[0].payload["dictionary"]["fields"].as_array().unwrap().len(), 2);
        assert_eq!(
            handler.open_streams(SessionId(0)),
            vec![(5, DictionaryKind::Field)]
        );
    }

    #[test]
    fn test_non_streaming_request_not_tracked() {
        let mut handler = DictionaryHandler::new(loaded(), 1, false);
        let mut channel = MockChannel::new(10);

        handler
            .process_request(SessionId(0), &mut channel, &request(6, "RWFEnum", false))
            .unwrap();

        let sent = channel.written_messages();
        assert_eq!(
            sent[0].state.as_ref().unwrap().stream,
            StreamState::NonStreaming
        );
        assert!(handler.open_streams(SessionId(0)).is_empty());
    }

    #[test]
    fn test_unknown_dictionary_rejected() {
        let mut handler = DictionaryHandler::new(loaded(), 1, false);
        let mut channel = MockChannel::new(10);

        handler
            .process_request(SessionId(0), &mut channel, &request(5, "Bogus", true))
            .unwrap();

        let sent = channel.written_messages();
        assert_eq!(sent[0].class, MsgClass::Status);
        assert_eq!(sent[0].state.as_ref().unwrap().code, StateCode::NotFound);
    }

    #[test]
    fn test_download_requests_both_parts() {
        let mut handler = DictionaryHandler::new(DataDictionary::new(), 9, false);
        let mut channel = MockChannel::new(10);

        handler.send_requests(SessionId(0), &mut channel).unwrap();

        let sent = channel.written_messages();
        assert_eq!(
            sent.iter().map(|m| (m.stream_id, m.name())).collect::<Vec<_>>(),
            vec![
                (FIELD_DICTIONARY_STREAM_ID, Some("RWFFld")),
                (ENUM_DICTIONARY_STREAM_ID, Some("RWFEnum")),
            ]
        );
        assert!(sent.iter().all(|m| !m.streaming && m.service_id() == Some(9)));
    }

    #[test]
    fn test_download_completes_dictionary() {
        let source = loaded();
        let mut handler = DictionaryHandler::new(DataDictionary::new(), 1, false);
        let mut channel = MockChannel::new(10);

        handler.send_requests(SessionId(0), &mut channel).unwrap();
        assert_eq!(channel.written_messages().len(), 2);

        let field_refresh = Message::refresh(
            DomainType::Dictionary,
            FIELD_DICTIONARY_STREAM_ID,
            State::open_ok(""),
            json!({ "dictionary": source.field_payload() }),
        );
        handler
            .process_response(SessionId(0), &mut channel, &field_refresh)
            .unwrap();
        assert!(!handler.is_ready());

        let enum_refresh = Message::refresh(
            DomainType::Dictionary,
            ENUM_DICTIONARY_STREAM_ID,
            State::open_ok(""),
            json!({ "dictionary": { "enums": parse_enums(ENUMS).unwrap() } }),
        );
        handler
            .process_response(SessionId(0), &mut channel, &enum_refresh)
            .unwrap();

        assert!(handler.is_ready());
        assert_eq!(handler.dictionary(), &source);
    }

    #[test]
    fn test_closed_status_fails_download() {
        let mut handler = DictionaryHandler::new(DataDictionary::new(), 1, false);
        let mut channel = MockChannel::new(10);
        let status = Message::status(
            DomainType::Dictionary,
            FIELD_DICTIONARY_STREAM_ID,
            State::closed(StateCode::NotFound, "no dictionary here"),
        );

        let err = handler
            .process_response(SessionId(0), &mut channel, &status)
            .unwrap_err();

        assert!(matches!(err, HandlerError::DictionaryDownload(text) if text == "no dictionary here"));
    }

    #[test]
    fn test_malformed_refresh_fails() {
        let mut handler = DictionaryHandler::new(DataDictionary::new(), 1, false);
        let mut channel = MockChannel::new(10);
        let refresh = Message::refresh(
            DomainType::Dictionary,
            FIELD_DICTIONARY_STREAM_ID,
            State::open_ok(""),
            Value::Null,
        );

        assert!(matches!(
            handler.process_response(SessionId(0), &mut channel, &refresh),
            Err(HandlerError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_close_statuses_for_open_streams() {
        let mut handler = DictionaryHandler::new(loaded(), 1, false);
        let mut channel = MockChannel::new(10);
        handler
            .process_request(SessionId(0), &mut channel, &request(5, "RWFFld", true))
            .unwrap();
        handler
            .process_request(SessionId(0), &mut channel, &request(6, "RWFEnum", true))
            .unwrap();
        channel.script().written.clear();

        handler
            .send_close_statuses(SessionId(0), &mut channel)
            .unwrap();

        let sent = channel.written_messages();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.class == MsgClass::Status
            && m.state.as_ref().unwrap().stream == StreamState::Closed));
        assert_eq!(
            sent.iter().map(|m| m.stream_id).collect::<Vec<_>>(),
            vec![5, 6]
        );
    }
}
