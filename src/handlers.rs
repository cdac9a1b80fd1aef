//! Entry points into the domain handlers.
//!
//! The session engine knows nothing about login validation, directory
//! contents, dictionaries or item data. It calls through this trait and
//! treats any error as grounds to remove the session it was serving.

use crate::errors::HandlerError;
use crate::message::Message;
use crate::session::SessionId;
use crate::transport::Channel;

/// Domain logic the session engine drives.
///
/// Every method runs on the loop thread and may write to `channel`.
pub trait DomainHandlers {
    /// Handles a login-domain message.
    fn process_login(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError>;

    /// Whether the session's login advertised provider dictionary download.
    fn supports_dictionary_download(&self, session: SessionId) -> bool;

    /// Handles a source-directory message.
    fn process_directory(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError>;

    /// Serves a dictionary request from a consumer.
    fn process_dictionary_request(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError>;

    /// Absorbs a response to a dictionary request this provider sent upstream.
    fn process_dictionary_response(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError>;

    /// Market price, market by order, symbol list, market by price, yield curve.
    fn process_item(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError>;

    /// Rejects a request on a domain nobody handles.
    fn send_not_supported(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
        msg: &Message,
    ) -> Result<(), HandlerError>;

    /// Whether both dictionary parts are available.
    fn is_dictionary_ready(&self) -> bool;

    /// Asks the peer for the dictionaries this provider is missing.
    fn send_dictionary_requests(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError>;

    /// Advances item data by one publish tick.
    fn update_items(&mut self);

    /// Publishes the current tick to every open item stream of the session.
    fn send_item_updates(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError>;

    /// Closes every open stream of the session at shutdown.
    fn send_close_statuses(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError>;

    /// Drops all state held for a session that is going away.
    fn session_closed(&mut self, session: SessionId);
}
