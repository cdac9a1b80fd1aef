//! Item domains: market price, market by order and symbol list.
//!
//! Item data lives in one cache per domain, shared by every stream that has
//! the item open. An item is created by its first request and dropped once
//! no stream refers to it any more.

use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::defs::MAX_ITEMS_PER_SESSION;
use crate::domains::{send, send_reject};
use crate::errors::{HandlerError, PriceGeneratorError};
use crate::market_by_order::MarketByOrderItem;
use crate::market_price::MarketPriceItem;
use crate::message::{DomainType, Message, MsgClass, MsgKey, State, StateCode, StreamState};
use crate::price_generator::{now_millis, PriceGenerator};
use crate::session::SessionId;
use crate::transport::Channel;

/// An open item stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStream {
    /// Stream id chosen by the consumer.
    pub stream_id: i32,
    /// Item domain.
    pub domain: DomainType,
    /// Item name.
    pub name: String,
}

/// Item streams of every session and the item cache they share.
#[derive(Debug)]
pub struct ItemHandler {
    trace: bool,
    service_id: u16,
    generator: PriceGenerator,
    market_price: BTreeMap<String, MarketPriceItem>,
    market_by_order: BTreeMap<String, MarketByOrderItem>,
    streams: HashMap<SessionId, BTreeMap<i32, ItemStream>>,
}

impl ItemHandler {
    /// Handler serving items of `service_id`.
    ///
    /// # Errors
    /// Fails if `volatility` is outside `(0, 1]`.
    pub fn new(service_id: u16, volatility: f64, trace: bool) -> Result<Self, PriceGeneratorError> {
        Ok(Self {
            trace,
            service_id,
            generator: PriceGenerator::new(volatility)?,
            market_price: BTreeMap::new(),
            market_by_order: BTreeMap::new(),
            streams: HashMap::new(),
        })
    }

    /// Open item streams of a session, ordered by stream id.
    pub fn open_streams(&self, session: SessionId) -> Vec<ItemStream> {
        self.streams
            .get(&session)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Cached market price item.
    pub fn market_price(&self, name: &str) -> Option<&MarketPriceItem> {
        self.market_price.get(name)
    }

    /// Cached order book.
    pub fn market_by_order(&self, name: &str) -> Option<&MarketByOrderItem> {
        self.market_by_order.get(name)
    }

    /// Names of every item currently cached, sorted and without duplicates.
    pub fn item_names(&self) -> Vec<String> {
        self.market_price
            .keys()
            .chain(self.market_by_order.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Handles an item request or close.
    ///
    /// # Errors
    /// Fails on a write or generator error, and on message classes other
    /// than request and close.
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
                    "Received item close for stream {} on session {}",
                    msg.stream_id,
                    session
                );
                if let Some(streams) = self.streams.get_mut(&session) {
                    streams.remove(&msg.stream_id);
                }
                self.prune();
                Ok(())
            }
            class => Err(HandlerError::UnexpectedMessage {
                domain: msg.domain,
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
        let trace = self.trace;
        if !matches!(
            msg.domain,
            DomainType::MarketPrice | DomainType::MarketByOrder | DomainType::SymbolList
        ) {
            return send_reject(
                channel,
                msg,
                StateCode::UsageError,
                format!(
                    "Request rejected for stream id {} - domain type {} is not supported",
                    msg.stream_id,
                    u8::from(msg.domain)
                ),
                trace,
            );
        }

        let name = match msg.name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return send_reject(
                    channel,
                    msg,
                    StateCode::UsageError,
                    "Item request rejected, missing item name",
                    trace,
                )
            }
        };

        if let Some(service_id) = msg.service_id() {
            if service_id != self.service_id {
                return send_reject(
                    channel,
                    msg,
                    StateCode::NotFound,
                    format!("Item request rejected, service id {} not found", service_id),
                    trace,
                );
            }
        }

        let open = self.streams.get(&session);
        let reissue = open.map_or(false, |s| s.contains_key(&msg.stream_id));
        if !reissue {
            let duplicate = open.map_or(false, |s| {
                s.values()
                    .any(|item| item.domain == msg.domain && item.name == name)
            });
            if duplicate {
                return send_reject(
                    channel,
                    msg,
                    StateCode::AlreadyOpen,
                    format!("Item {} already open on another stream", name),
                    trace,
                );
            }
            if msg.streaming && open.map_or(0, BTreeMap::len) >= MAX_ITEMS_PER_SESSION {
                return send_reject(
                    channel,
                    msg,
                    StateCode::TooManyItems,
                    format!("Item request rejected, item count reached {}", MAX_ITEMS_PER_SESSION),
                    trace,
                );
            }
        }

        log::info!(
            "Received {:?} request for {} on stream {} from session {}",
            msg.domain,
            name,
            msg.stream_id,
            session
        );
        let payload = self.refresh_payload(msg.domain, &name)?;
        let mut state = State::open_ok("Item refresh completed");
        if msg.streaming {
            self.streams.entry(session).or_default().insert(
                msg.stream_id,
                ItemStream {
                    stream_id: msg.stream_id,
                    domain: msg.domain,
                    name: name.clone(),
                },
            );
        } else {
            state.stream = StreamState::NonStreaming;
        }

        let refresh = Message::refresh(msg.domain, msg.stream_id, state, payload)
            .with_key(MsgKey::named(name).with_service(self.service_id));
        self.prune();
        send(channel, &refresh, trace)
    }

    /// Looks the item up, creating it on first use.
    fn refresh_payload(&mut self, domain: DomainType, name: &str) -> Result<Value, HandlerError> {
        let payload = match domain {
            DomainType::MarketPrice => match self.market_price.get(name) {
                Some(item) => item.fields(),
                None => {
                    let item = MarketPriceItem::new(name, now_millis()?);
                    let fields = item.fields();
                    self.market_price.insert(name.to_string(), item);
                    fields
                }
            },
            DomainType::MarketByOrder => match self.market_by_order.get(name) {
                Some(item) => item.book(),
                None => {
                    let item = MarketByOrderItem::new(name, now_millis()?);
                    let book = item.book();
                    self.market_by_order.insert(name.to_string(), item);
                    book
                }
            },
            _ => json!({ "symbols": self.item_names() }),
        };
        Ok(payload)
    }

    /// Drops cached items no open stream refers to.
    fn prune(&mut self) {
        let mut prices = BTreeSet::new();
        let mut books = BTreeSet::new();
        for stream in self.streams.values().flat_map(BTreeMap::values) {
            match stream.domain {
                DomainType::MarketPrice => prices.insert(stream.name.as_str()),
                DomainType::MarketByOrder => books.insert(stream.name.as_str()),
                _ => false,
            };
        }
        self.market_price.retain(|name, _| prices.contains(name.as_str()));
        self.market_by_order.retain(|name, _| books.contains(name.as_str()));
    }

    /// Advances every cached item by one tick.
    pub fn update(&mut self) {
        if let Err(e) = self.generator.update_items(self.market_price.values_mut()) {
            log::error!("Failed to update market price items: {}", e);
        }
        if let Err(e) = self.generator.update_items(self.market_by_order.values_mut()) {
            log::error!("Failed to update market by order items: {}", e);
        }
    }

    /// Sends an update on every market price and market by order stream of the session.
    pub fn send_updates(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        let Some(streams) = self.streams.get(&session) else {
            return Ok(());
        };
        for stream in streams.values() {
            let payload = match stream.domain {
                DomainType::MarketPrice => self.market_price.get(&stream.name).map(MarketPriceItem::fields),
                DomainType::MarketByOrder => {
                    self.market_by_order.get(&stream.name).map(MarketByOrderItem::book)
                }
                _ => None,
            };
            if let Some(payload) = payload {
                let update = Message::update(stream.domain, stream.stream_id, payload);
                send(channel, &update, self.trace)?;
            }
        }
        Ok(())
    }

    /// Sends a closed status on every open item stream of the session.
    pub fn send_close_statuses(
        &mut self,
        session: SessionId,
        channel: &mut dyn Channel,
    ) -> Result<(), HandlerError> {
        for stream in self.open_streams(session) {
            let status = Message::status(
                stream.domain,
                stream.stream_id,
                State::closed(StateCode::None, "Item stream closed"),
            )
            .with_key(MsgKey::named(stream.name).with_service(self.service_id));
            send(channel, &status, self.trace)?;
        }
        Ok(())
    }

    /// Forgets the streams of a removed session and drops items nobody watches.
    pub fn session_closed(&mut self, session: SessionId) {
        if self.streams.remove(&session).is_some() {
            self.prune();
        }
    }
}
