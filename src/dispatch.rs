//! Routes decoded messages to the domain handlers.

use crate::errors::{CodecError, HandlerError, SessionError, ShutdownReason};
use crate::handlers::DomainHandlers;
use crate::message::{DomainType, Message, MsgClass};
use crate::session::SessionId;
use crate::transport::Channel;

/// What the loop should do after a message was routed.
#[derive(Debug)]
pub enum Dispatch {
    /// Message handled; keep reading.
    Continue,
    /// Drop this session and stop reading from it.
    RemoveSession(SessionError),
    /// Stop the whole provider.
    Shutdown(ShutdownReason),
}

impl From<SessionError> for Dispatch {
    fn from(err: SessionError) -> Self {
        Dispatch::RemoveSession(err)
    }
}

impl From<CodecError> for Dispatch {
    fn from(err: CodecError) -> Self {
        Dispatch::RemoveSession(SessionError::Decode(err))
    }
}

/// Decodes `data` and hands it to the matching handler.
pub fn dispatch<H: DomainHandlers + ?Sized>(
    handlers: &mut H,
    session: SessionId,
    channel: &mut dyn Channel,
    data: &[u8],
    trace: bool,
) -> Dispatch {
    let msg = match Message::decode(data) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!(
                "Decode error on session {} fd {} ({} bytes): {}",
                session,
                channel.socket_id(),
                data.len(),
                e
            );
            return e.into();
        }
    };
    if trace {
        log::info!("<- {} {}", session, String::from_utf8_lossy(data));
    }
    log::debug!(
        "Routing {:?} {:?} stream {} from session {}",
        msg.domain,
        msg.class,
        msg.stream_id,
        session
    );

    match route(handlers, session, channel, &msg) {
        Ok(dispatch) => dispatch,
        Err(e) => SessionError::Handler(e).into(),
    }
}

fn route<H: DomainHandlers + ?Sized>(
    handlers: &mut H,
    session: SessionId,
    channel: &mut dyn Channel,
    msg: &Message,
) -> Result<Dispatch, HandlerError> {
    match msg.domain {
        DomainType::Login => {
            handlers.process_login(session, channel, msg)?;
            if !handlers.is_dictionary_ready() {
                if handlers.supports_dictionary_download(session) {
                    handlers.send_dictionary_requests(session, channel)?;
                    log::info!("Sent dictionary requests on session {}", session);
                } else {
                    log::error!(
                        "Dictionary could not be downloaded, session {} does not support provider dictionary download",
                        session
                    );
                    return Ok(Dispatch::Shutdown(
                        ShutdownReason::DictionaryDownloadUnsupported,
                    ));
                }
            }
        }
        DomainType::Source => handlers.process_directory(session, channel, msg)?,
        DomainType::Dictionary => {
            if msg.class == MsgClass::Request {
                if !handlers.is_dictionary_ready() {
                    return Ok(SessionError::DictionaryNotReady.into());
                }
                handlers.process_dictionary_request(session, channel, msg)?;
            } else {
                handlers.process_dictionary_response(session, channel, msg)?;
            }
        }
        DomainType::MarketPrice
        | DomainType::MarketByOrder
        | DomainType::SymbolList
        | DomainType::MarketByPrice
        | DomainType::YieldCurve => {
            if handlers.is_dictionary_ready() {
                handlers.process_item(session, channel, msg)?;
            } else {
                log::debug!(
                    "Dictionary not ready, ignoring {:?} message on stream {}",
                    msg.domain,
                    msg.stream_id
                );
            }
        }
        DomainType::Other(domain) => match msg.class {
            MsgClass::Request => handlers.send_not_supported(session, channel, msg)?,
            MsgClass::Close => log::info!(
                "Received Close message with stream id {} and unsupported domain {}",
                msg.stream_id,
                domain
            ),
            class => log::info!(
                "Received unhandled message with class {:?}, stream id {} and unsupported domain {}",
                class,
                msg.stream_id,
                domain
            ),
        },
    }
    Ok(Dispatch::Continue)
}
