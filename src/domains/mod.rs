//! Concrete domain handlers.
//!
//! [`Provider`] bundles the login, source directory, dictionary and item
//! handlers behind [`DomainHandlers`]. All per-session state is keyed by
//! [`SessionId`] and dropped in [`DomainHandlers::session_closed`].

pub mod dictionary;
pub mod directory;
pub mod items;
pub mod login;

use crate::defs::{DEFAULT_SERVICE_ID, DEFAULT_SERVICE_NAME, VOLATILITY};
use crate::dictionary::DataDictionary;
use crate::errors::{HandlerError, PriceGeneratorError};
use crate::handlers::DomainHandlers;
use crate::message::{Message, State, StateCode};
use crate::session::SessionId;
use crate::transport::Channel;

use self::dictionary::DictionaryHandler;
use self::directory::{DirectoryHandler, ServiceInfo};
use self::items::ItemHandler;
use self::login::LoginHandler;

/// Provider-wide settings shared by the handlers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Service name published in the directory.
    pub service_name: String,
    /// Service id published in the directory.
    pub service_id: u16,
    /// Log every outbound message.
    pub trace_messages: bool,
    /// Price volatility used by the item generator.
    pub volatility: f64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_id: DEFAULT_SERVICE_ID,
            trace_messages: false,
            volatility: VOLATILITY,
        }
    }
}

/// Encodes and writes one message.
pub(crate) fn send(
    channel: &mut dyn Channel,
    msg: &Message,
    trace: bool,
) -> Result<(), HandlerError> {
    let bytes = msg.encode()?;
    if trace {
        log::info!(
            "-> fd={} {}",
            channel.socket_id(),
            String::from_utf8_lossy(&bytes)
        );
    }
    channel.write(&bytes)?;
    Ok(())
}

/// Answers `msg` with a closed status on its own stream.
pub(crate) fn send_reject(
    channel: &mut dyn Channel,
    msg: &Message,
    code: StateCode,
    text: impl Into<String>,
    trace: bool,
) -> Result<(), HandlerError> {
    let text = text.into();
    log::info!(
        "Rejecting {:?} request on stream {}: {}",
        msg.domain,
        msg.stream_id,
        text
    );
    let mut status = Message::status(msg.domain, msg.stream_id, State::closed(code, text));
    status.key = msg.key.clone();
    send(channel, &status, trace)
}

/// All domain handlers of the provider.
#[derive(Debug)]
pub struct Provider {
    trace: bool,
    login: LoginHandler,
    directory: DirectoryHandler,
    dictionary: DictionaryHandler,
    items: ItemHandler,
}

impl Provider {
    /// Builds the handlers around a (possibly incomplete) local dictionary.
    ///
    /// # Errors
    /// Fails if the configured volatility is out of range.
    pub fn new(
        settings: ProviderSettings,
        dictionary: DataDictionary,
    ) -> Result<Self, PriceGeneratorError> {
        let trace = settings.trace_messages;
        let service = ServiceInfo::new(&settings.service_name, settings.service_id);
        if !dictionary.is_ready() {
            log::warn!(
                "No local dictionary found, will try to request it from a peer that supports provider dictionary download"
            );
        }
        Ok(Self {
            trace,
            login: LoginHandler::new(trace),
            directory: DirectoryHandler::new(service, trace),
            dictionary: DictionaryHandler::new(dictionary, settings.service_id, trace),
            items: ItemHandler::new(settings.service_id, settings.volatility, trace)?,
        })
    }

    /// Login handler.
    pub fn login(&self) -> &LoginHandler {
        &self.login
    }

    /// Directory handler.
    pub fn directory(&self) -> &DirectoryHandler {
        &self.directory
    }

    /// Dictionary handler.
    pub fn dictionary(&self) -> &DictionaryHandler {
        &self.dictionary
    }

    /// Item handler.
    pub fn items(&self) -> &ItemHandler {
        &self.items
    }
}

impl DomainHandlers for Provider {
    fn process_login(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        self.login.process(session, channel, msg)
    }

    fn supports_dictionary_download(&self, session: SessionId) -> bool {
        self.login.supports_dictionary_download(session)
    }

    fn process_directory(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        self.directory.process(session, channel, msg)
    }

    fn process_dictionary_request(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        self.dictionary.process_request(session, channel, msg)
    }

    fn process_dictionary_response(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        self.dictionary.process_response(session, channel, msg)
    }

    fn process_item(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        self.items.process(session, channel, msg)
    }

    fn send_not_supported(
        &mut self,
        _session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError> {
        send_reject(
            channel,
            msg,
            StateCode::UsageError,
            format!(
                "Request rejected for stream id {} - domain type {} is not supported",
                msg.stream_id,
                u8::from(msg.domain)
            ),
            self.trace,
        )
    }

    fn is_dictionary_ready(&self) -> bool {
        self.dictionary.is_ready()
    }

    fn send_dictionary_requests(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        self.dictionary.send_requests(session, channel)
    }

    fn update_items(&mut self) {
        self.items.update();
    }

    fn send_item_updates(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        self.items.send_updates(session, channel)
    }

    fn send_close_statuses(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        self.dictionary.send_close_statuses(session, channel)?;
        self.items.send_close_statuses(session, channel)
    }

    fn session_closed(&mut self, session: SessionId) {
        self.items.session_closed(session);
        self.dictionary.session_closed(session);
        self.directory.session_closed(session);
        self.login.session_closed(session);
    }
}
