//! Readiness multiplexer.
//!
//! [`Interest`] holds the three readiness sets (read, write, exception).
//! They always mirror the listening socket plus the socket of every live
//! session. Each loop iteration hands a copy to a [`Selector`], which
//! blocks until something is ready or the timeout elapses.

use std::collections::BTreeSet;
use std::io;
use std::time::Duration;

use crate::transport::SocketId;

/// The three interest sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interest {
    read: BTreeSet<SocketId>,
    write: BTreeSet<SocketId>,
    except: BTreeSet<SocketId>,
}

impl Interest {
    /// Empty sets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching a socket for reads and exceptional conditions.
    pub fn register(&mut self, id: SocketId) {
        self.read.insert(id);
        self.except.insert(id);
    }

    /// Forgets a socket in all three sets at once.
    pub fn deregister(&mut self, id: SocketId) {
        self.read.remove(&id);
        self.write.remove(&id);
        self.except.remove(&id);
    }

    /// Moves a socket's interest to a replacement socket.
    pub fn replace(&mut self, old: SocketId, new: SocketId) {
        let wants_write = self.write.contains(&old);
        self.deregister(old);
        self.register(new);
        if wants_write {
            self.write.insert(new);
        }
    }

    /// Watches a socket for writability.
    pub fn set_write(&mut self, id: SocketId) {
        self.write.insert(id);
    }

    /// Stops watching a socket for writability.
    pub fn clear_write(&mut self, id: SocketId) {
        self.write.remove(&id);
    }

    /// Socket is in the read set.
    pub fn wants_read(&self, id: SocketId) -> bool {
        self.read.contains(&id)
    }

    /// Socket is in the write set.
    pub fn wants_write(&self, id: SocketId) -> bool {
        self.write.contains(&id)
    }

    /// Socket is in the exception set.
    pub fn wants_except(&self, id: SocketId) -> bool {
        self.except.contains(&id)
    }

    /// Size of the read set.
    pub fn read_len(&self) -> usize {
        self.read.len()
    }

    /// Size of the write set.
    pub fn write_len(&self) -> usize {
        self.write.len()
    }

    /// Size of the exception set.
    pub fn except_len(&self) -> usize {
        self.except.len()
    }

    /// Every socket in any of the three sets, in ascending order.
    pub fn sockets(&self) -> BTreeSet<SocketId> {
        self.read
            .iter()
            .chain(self.write.iter())
            .chain(self.except.iter())
            .copied()
            .collect()
    }
}

/// What a wait found ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Sockets with input or a pending connection.
    pub readable: BTreeSet<SocketId>,
    /// Sockets that can take more output.
    pub writable: BTreeSet<SocketId>,
    /// Sockets with an error or hangup.
    pub exceptional: BTreeSet<SocketId>,
}

impl Readiness {
    /// Number of distinct ready sockets.
    pub fn count(&self) -> usize {
        self.readable
            .iter()
            .chain(self.writable.iter())
            .chain(self.exceptional.iter())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Nothing was ready, i.e. the wait timed out.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Socket was reported readable.
    pub fn is_readable(&self, id: SocketId) -> bool {
        self.readable.contains(&id)
    }

    /// Socket was reported writable.
    pub fn is_writable(&self, id: SocketId) -> bool {
        self.writable.contains(&id)
    }

    /// Socket was reported exceptional.
    pub fn is_exceptional(&self, id: SocketId) -> bool {
        self.exceptional.contains(&id)
    }
}

/// Platform wait primitive.
pub trait Selector {
    /// Blocks until a socket in `interest` is ready or `timeout` elapses.
    ///
    /// A timeout is an empty [`Readiness`]. An interrupted wait is an
    /// error of kind [`io::ErrorKind::Interrupted`].
    fn select(&mut self, interest: &Interest, timeout: Duration) -> io::Result<Readiness>;
}

/// [`Selector`] backed by `poll(2)`.
#[derive(Debug, Default)]
pub struct PollSelector;

impl Selector for PollSelector {
    fn select(&mut self, interest: &Interest, timeout: Duration) -> io::Result<Readiness> {
        let mut fds: Vec<libc::pollfd> = interest
            .sockets()
            .into_iter()
            .map(|id| {
                let mut events = 0;
                if interest.wants_read(id) {
                    events |= libc::POLLIN;
                }
                if interest.wants_write(id) {
                    events |= libc::POLLOUT;
                }
                if interest.wants_except(id) {
                    events |= libc::POLLPRI;
                }
                libc::pollfd {
                    fd: id.0,
                    events,
                    revents: 0,
                }
            })
            .collect();

        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
        // SAFETY: `fds` is a live, properly initialised slice for the duration of the call.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut ready = Readiness::default();
        if ret == 0 {
            return Ok(ready);
        }
        for fd in &fds {
            let id = SocketId(fd.fd);
            // Hang-ups surface as readable so the read path sees the EOF.
            if fd.revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                ready.readable.insert(id);
            }
            if fd.revents & libc::POLLOUT != 0 {
                ready.writable.insert(id);
            }
            if fd.revents & (libc::POLLPRI | libc::POLLERR | libc::POLLNVAL) != 0 {
                ready.exceptional.insert(id);
            }
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_deregister_clears_all_sets() {
        let mut interest = Interest::new();
        let id = SocketId(7);
        interest.register(id);
        interest.set_write(id);

        interest.deregister(id);

        assert!(!interest.wants_read(id));
        assert!(!interest.wants_write(id));
        assert!(!interest.wants_except(id));
        assert!(interest.sockets().is_empty());
    }

    #[test]
    fn test_replace_carries_write_interest() {
        let mut interest = Interest::new();
        interest.register(SocketId(5));
        interest.set_write(SocketId(5));

        interest.replace(SocketId(5), SocketId(9));

        assert!(!interest.wants_read(SocketId(5)));
        assert!(interest.wants_read(SocketId(9)));
        assert!(interest.wants_except(SocketId(9)));
        assert!(interest.wants_write(SocketId(9)));
        assert_eq!(interest.read_len(), 1);
    }

    #[test]
    fn test_readiness_count_is_distinct() {
        let mut ready = Readiness::default();
        ready.readable.insert(SocketId(1));
        ready.writable.insert(SocketId(1));
        ready.exceptional.insert(SocketId(2));
        assert_eq!(ready.count(), 2);
    }

    #[test]
    fn test_poll_times_out_then_sees_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let id = SocketId(listener.as_raw_fd());
        let mut interest = Interest::new();
        interest.register(id);

        let mut selector = PollSelector;
        let ready = selector
            .select(&interest, Duration::from_millis(20))
            .unwrap();
        assert!(ready.is_empty());

        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client.write_all(b"x").unwrap();
        let ready = selector
            .select(&interest, Duration::from_secs(5))
            .unwrap();
        assert!(ready.is_readable(id));
    }
}
