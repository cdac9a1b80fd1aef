//! Session bookkeeping.
//!
//! A [`Session`] pairs one accepted channel with its keepalive timers and
//! flags. The [`SessionTable`] is a fixed-capacity arena of sessions
//! addressed by [`SessionId`], with a reverse index from socket to session.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::keepalive::PingSchedule;
use crate::transport::{Channel, ConnectionState, SocketId};

/// Stable handle of a session slot.
///
/// A slot index is reused after its session is removed; handler state keyed
/// by it is cleared on removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub usize);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One accepted connection.
#[derive(Debug)]
pub struct Session<C> {
    channel: C,
    state: ConnectionState,
    pings: Option<PingSchedule>,
    received_message: bool,
    write_pending: bool,
}

impl<C: Channel> Session<C> {
    fn new(channel: C) -> Self {
        Self {
            channel,
            state: ConnectionState::Initializing,
            pings: None,
            received_message: false,
            write_pending: false,
        }
    }

    /// The session's channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// The session's channel, mutably.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Socket the channel currently uses.
    pub fn socket_id(&self) -> SocketId {
        self.channel.socket_id()
    }

    /// Lifecycle state as tracked by the engine.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Records a lifecycle transition.
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    /// Keepalive timers are armed.
    pub fn pings_initialized(&self) -> bool {
        self.pings.is_some()
    }

    /// Keepalive timers, once armed.
    pub fn pings(&self) -> Option<&PingSchedule> {
        self.pings.as_ref()
    }

    /// Keepalive timers, mutably.
    pub fn pings_mut(&mut self) -> Option<&mut PingSchedule> {
        self.pings.as_mut()
    }

    /// Arms the keepalive timers from the channel's negotiated ping timeout.
    ///
    /// Returns `false` if they were already armed; priming happens once.
    pub fn prime_pings(&mut self, now: Instant) -> bool {
        if self.pings.is_some() {
            return false;
        }
        self.pings = Some(PingSchedule::new(self.channel.ping_timeout(), now));
        true
    }

    /// Something arrived since the last receive check.
    pub fn received_message(&self) -> bool {
        self.received_message
    }

    /// Notes inbound traffic.
    pub fn mark_received(&mut self) {
        self.received_message = true;
    }

    /// Resets the inbound flag after a receive check.
    pub fn clear_received(&mut self) {
        self.received_message = false;
    }

    /// Output is waiting for the socket to become writable.
    pub fn write_pending(&self) -> bool {
        self.write_pending
    }

    /// Sets the write-pending flag.
    pub fn set_write_pending(&mut self, pending: bool) {
        self.write_pending = pending;
    }
}

/// Fixed-capacity registry of live sessions.
#[derive(Debug)]
pub struct SessionTable<C> {
    slots: Vec<Option<Session<C>>>,
    by_socket: HashMap<SocketId, SessionId>,
    live: usize,
}

impl<C: Channel> SessionTable<C> {
    /// Table with `capacity` free slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            by_socket: HashMap::with_capacity(capacity),
            live: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live
    }

    /// No session is live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Every slot is taken.
    pub fn is_full(&self) -> bool {
        self.live >= self.slots.len()
    }

    /// Claims the first free slot for `channel`.
    ///
    /// Gives the channel back when every slot is taken.
    pub fn insert(&mut self, channel: C) -> Result<SessionId, C> {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => return Err(channel),
        };
        let id = SessionId(index);
        self.by_socket.insert(channel.socket_id(), id);
        self.slots[index] = Some(Session::new(channel));
        self.live += 1;
        Ok(id)
    }

    /// Frees a slot, handing back its session. `None` if already free.
    pub fn remove(&mut self, id: SessionId) -> Option<Session<C>> {
        let session = self.slots.get_mut(id.0)?.take()?;
        let socket = session.socket_id();
        if self.by_socket.get(&socket) == Some(&id) {
            self.by_socket.remove(&socket);
        }
        self.live -= 1;
        Some(session)
    }

    /// Session in slot `id`.
    pub fn get(&self, id: SessionId) -> Option<&Session<C>> {
        self.slots.get(id.0)?.as_ref()
    }

    /// Session in slot `id`, mutably.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session<C>> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    /// Session currently owning `socket`.
    pub fn find(&self, socket: SocketId) -> Option<SessionId> {
        self.by_socket.get(&socket).copied()
    }

    /// Points the reverse index at a session's new socket.
    pub fn rekey(&mut self, old: SocketId, new: SocketId) {
        if let Some(id) = self.by_socket.remove(&old) {
            self.by_socket.insert(new, id);
        }
    }

    /// Handles of all occupied slots, in slot order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| SessionId(index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChannel;
    use std::time::Duration;

    #[test]
    fn test_insert_claims_first_free_slot() {
        let mut table = SessionTable::with_capacity(3);
        let a = table.insert(MockChannel::new(10)).unwrap();
        let b = table.insert(MockChannel::new(11)).unwrap();
        assert_eq!((a, b), (SessionId(0), SessionId(1)));

        table.remove(a).unwrap();
        let c = table.insert(MockChannel::new(12)).unwrap();
        assert_eq!(c, SessionId(0));
        assert_eq!(table.find(SocketId(12)), Some(SessionId(0)));
        assert_eq!(table.find(SocketId(10)), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_insert_fails_when_full() {
        let mut table = SessionTable::with_capacity(1);
        table.insert(MockChannel::new(10)).unwrap();
        assert!(table.is_full());

        let rejected = table.insert(MockChannel::new(11)).unwrap_err();
        assert_eq!(rejected.socket_id(), SocketId(11));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut table = SessionTable::with_capacity(2);
        let id = table.insert(MockChannel::new(10)).unwrap();

        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_rekey_follows_socket_change() {
        let mut table = SessionTable::with_capacity(2);
        let id = table.insert(MockChannel::new(10)).unwrap();

        table.rekey(SocketId(10), SocketId(20));

        assert_eq!(table.find(SocketId(10)), None);
        assert_eq!(table.find(SocketId(20)), Some(id));
    }

    #[test]
    fn test_prime_pings_once() {
        let mut table = SessionTable::with_capacity(1);
        let channel = MockChannel::new(10);
        channel.script().ping_timeout = Duration::from_secs(9);
        let id = table.insert(channel).unwrap();
        let session = table.get_mut(id).unwrap();
        let now = Instant::now();

        assert!(session.prime_pings(now));
        assert!(!session.prime_pings(now + Duration::from_secs(1)));
        assert_eq!(
            session.pings().unwrap().next_send(),
            now + Duration::from_secs(3)
        );
    }
}
