//! # Market Data Provider
//!
//! This crate implements a single-threaded interactive market data provider.
//! One thread drives a readiness loop over a listening endpoint and every
//! admitted consumer session. Sessions, channels and handler state are only
//! touched from that thread. The one exception is the update tick: the
//! [`price_generator`](crate::price_generator) fans the item random walk out
//! to rayon's global pool and joins before the tick sends anything.
//!
//! ## Features
//!
//! - Accept consumer connections up to a fixed session capacity.
//! - Negotiate each channel, then serve login, source directory,
//!   dictionary and item requests.
//! - Publish market price and market-by-order updates on every idle
//!   loop interval.
//! - Detect silent peers with a per-session ping schedule.
//! - Download a missing dictionary from a peer that offers it.
//! - Close every stream and shut down when the configured run time elapses.
//!
//! ## Architecture Overview
//!
//! - [`server`](crate::server): Session lifecycle controller, readiness loop
//!   and the keepalive and run-time supervisors.
//! - [`session`](crate::session): Session table with stable [`SessionId`](crate::session::SessionId) handles.
//! - [`poller`](crate::poller): Readiness interest sets and the `poll(2)` selector.
//! - [`keepalive`](crate::keepalive): Ping send and receive deadlines.
//! - [`dispatch`](crate::dispatch): Routes a decoded message to a handler.
//! - [`handlers`](crate::handlers): The seam between the engine and the domains.
//! - [`domains`](crate::domains): Login, directory, dictionary and item handlers.
//! - [`transport`](crate::transport): Channel abstraction, framing and TCP.
//! - [`message`](crate::message): Message envelope and codec.
//! - [`dictionary`](crate::dictionary): Field and enum-type dictionary files.
//! - [`market_price`](crate::market_price), [`market_by_order`](crate::market_by_order)
//!   and [`price_generator`](crate::price_generator): Item data and its random walk.
//! - [`defs`](crate::defs): Shared constants.
//! - [`errors`](crate::errors): Error types used across modules.
//!
//! ## Loop Iteration
//!
//! 1. Wait for readiness on a copy of the interest sets, bounded by the
//!    update interval.
//! 2. On timeout, advance all items and send updates to every active session.
//! 3. Otherwise accept new connections, progress channel negotiation,
//!    drain and dispatch inbound messages and flush pending output.
//! 4. Send due pings and drop sessions that went silent.
//! 5. Shut everything down once the run-time deadline passes.
//!
//! ## Example: Running the Provider
//!
//! ```no_run
//! use market_provider::clock::SystemClock;
//! use market_provider::dictionary::DataDictionary;
//! use market_provider::domains::{Provider, ProviderSettings};
//! use market_provider::poller::PollSelector;
//! use market_provider::server::{ProviderServer, ServerConfig};
//! use market_provider::transport::tcp::{ChannelOptions, TcpEndpoint};
//! use std::path::Path;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = TcpEndpoint::bind("0.0.0.0:14002", ChannelOptions::default())?;
//!     let (dictionary, _) = DataDictionary::load(
//!         Path::new("etc/RDMFieldDictionary"),
//!         Path::new("etc/enumtype.def"),
//!     );
//!     let provider = Provider::new(ProviderSettings::default(), dictionary)?;
//!
//!     let mut server = ProviderServer::new(
//!         endpoint,
//!         PollSelector,
//!         provider,
//!         SystemClock,
//!         ServerConfig::default(),
//!     );
//!     let reason = server.run()?;
//!     println!("provider stopped: {}", reason);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unreachable_pub)]

pub mod clock;
pub mod defs;
pub mod dictionary;
pub mod dispatch;
pub mod domains;
pub mod errors;
pub mod handlers;
pub mod keepalive;
pub mod market_by_order;
pub mod market_price;
pub mod message;
pub mod poller;
pub mod price_generator;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;
