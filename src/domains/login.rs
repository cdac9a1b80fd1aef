//! Login domain.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::domains::{send, send_reject};
use crate::errors::HandlerError;
use crate::message::{DomainType, Message, MsgClass, MsgKey, State, StateCode};
use crate::session::SessionId;
use crate::transport::Channel;

/// Optional attributes a consumer sends with its login request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct LoginAttributes {
    application_id: Option<String>,
    application_name: Option<String>,
    position: Option<String>,
    support_provider_dictionary_download: bool,
}

/// An accepted login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequestInfo {
    /// Login stream.
    pub stream_id: i32,
    /// User name from the key.
    pub user: String,
    /// Application id, if sent.
    pub application_id: Option<String>,
    /// Application name, if sent.
    pub application_name: Option<String>,
    /// Position (host or address), if sent.
    pub position: Option<String>,
    /// Peer can serve dictionaries to this provider.
    pub support_provider_dictionary_download: bool,
}

/// Accepted logins, one per session.
#[derive(Debug)]
pub struct LoginHandler {
    trace: bool,
    requests: HashMap<SessionId, LoginRequestInfo>,
}

impl LoginHandler {
    /// Handler with no logins.
    pub fn new(trace: bool) -> Self {
        Self {
            trace,
            requests: HashMap::new(),
        }
    }

    /// Login of a session.
    pub fn find(&self, session: SessionId) -> Option<&LoginRequestInfo> {
        self.requests.get(&session)
    }

    /// Whether the session's login offered dictionary download.
    pub fn supports_dictionary_download(&self, session: SessionId) -> bool {
        self.find(session)
            .map_or(false, |info| info.support_provider_dictionary_download)
    }

    /// Accepts, refreshes or closes a login.
    ///
    /// # Errors
    /// A write failure, a malformed login, or an unexpected message class.
    pub fn process(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        match msg.class {
            MsgClass::Request => self.process_request(session, channel, msg),
            MsgClass::Close => {
                log::info!(
                    "Received login close for stream {} on session {}",
                    msg.stream_id,
                    session
                );
                if self.find(session).map(|i| i.stream_id) == Some(msg.stream_id) {
                    self.requests.remove(&session);
                }
                Ok(())
            }
            class => Err(HandlerError::UnexpectedMessage {
                domain: DomainType::Login,
                class,
            }),
        }
    }

    fn process_request(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        let user = match msg.name() {
            Some(user) if !user.is_empty() => user.to_string(),
            _ => {
                send_reject(
                    channel,
                    msg,
                    StateCode::NotEntitled,
                    "Login request rejected, missing user name",
                    self.trace,
                )?;
                return Err(HandlerError::LoginRejected("missing user name".into()));
            }
        };

        if let Some(existing) = self.find(session) {
            if existing.stream_id != msg.stream_id {
                return send_reject(
                    channel,
                    msg,
                    StateCode::UsageError,
                    format!(
                        "Login stream already in use on stream {}",
                        existing.stream_id
                    ),
                    self.trace,
                );
            }
        }

        let attributes: LoginAttributes = match &msg.payload {
            Value::Null => LoginAttributes::default(),
            payload => serde_json::from_value(payload.clone())
                .map_err(|e| HandlerError::InvalidPayload(e.to_string()))?,
        };
        let info = LoginRequestInfo {
            stream_id: msg.stream_id,
            user,
            application_id: attributes.application_id,
            application_name: attributes.application_name,
            position: attributes.position,
            support_provider_dictionary_download: attributes.support_provider_dictionary_download,
        };
        log::info!(
            "Received login request from user {} on session {} (application {:?}, position {:?})",
            info.user,
            session,
            info.application_id,
            info.position
        );

        let refresh = Message::refresh(
            DomainType::Login,
            msg.stream_id,
            State::open_ok("Login accepted by host"),
            json!({
                "application_id": info.application_id.as_deref().unwrap_or("256"),
                "application_name": "market_provider",
                "position": info.position,
                "single_open": false,
                "support_batch_requests": false,
            }),
        )
        .with_key(MsgKey::named(info.user.clone()));
        self.requests.insert(session, info);
        send(channel, &refresh, self.trace)
    }

    /// Forgets the login of a removed session.
    pub fn session_closed(&mut self, session: SessionId) {
        self.requests.remove(&session);
    }
}
