//! mio-backed multiplexer.
//!
//! The kernel keeps the interest set and a wait returns only descriptors
//! that became ready. Closing a descriptor removes it from the kernel's set,
//! so `forget` is bookkeeping only.
//!
//! mio registrations are edge-triggered, while the receive path performs a
//! single receive per wakeup and may leave data queued. Descriptors reported
//! by the previous wait are therefore re-checked with a zero-timeout
//! `poll(2)` and reported again while they stay readable.

use super::Multiplexer;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

pub struct QueueMultiplexer {
    poll: Poll,
    events: Events,
    registered: HashMap<usize, RawFd>,
    /// Ids reported by the previous wait.
    carried: Vec<usize>,
    pollfds: Vec<libc::pollfd>,
}

impl QueueMultiplexer {
    /// Create a multiplexer returning up to `batch_size` events per wait.
    pub fn new(batch_size: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(batch_size.max(1)),
            registered: HashMap::new(),
            carried: Vec::new(),
            pollfds: Vec::new(),
        })
    }

    /// Push carried ids that still have data waiting.
    fn recheck(&mut self, ready: &mut Vec<usize>) -> io::Result<()> {
        self.pollfds.clear();
        self.carried.retain(|id| self.registered.contains_key(id));
        for id in &self.carried {
            self.pollfds.push(libc::pollfd {
                fd: self.registered[id],
                events: libc::POLLIN,
                revents: 0,
            });
        }
        if self.pollfds.is_empty() {
            return Ok(());
        }

        // SAFETY: `pollfds` is a valid, exclusively borrowed array of pollfd
        // whose length is passed alongside it.
        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                0,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for (pfd, &id) in self.pollfds.iter().zip(self.carried.iter()) {
            if pfd.revents != 0 {
                ready.push(id);
            }
        }
        Ok(())
    }
}

impl Multiplexer for QueueMultiplexer {
    fn register(&mut self, id: usize, fd: RawFd) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(id), Interest::READABLE)?;
        self.registered.insert(id, fd);
        Ok(())
    }

    fn forget(&mut self, id: usize) {
        self.registered.remove(&id);
    }

    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<usize>) -> io::Result<()> {
        ready.clear();
        self.recheck(ready)?;

        let timeout = if ready.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let Token(id) = event.token();
            if self.registered.contains_key(&id) && !ready.contains(&id) {
                ready.push(id);
            }
        }

        self.carried.clear();
        self.carried.extend_from_slice(ready);
        Ok(())
    }

    fn len(&self) -> usize {
        self.registered.len()
    }
}
