//! `poll(2)`-backed multiplexer.
//!
//! Keeps the whole interest set in user space and hands it to the kernel
//! on every wait, then scans it for ready entries. Cost grows with the
//! number of descriptors, which is fine for the handful of sockets a
//! benchmark server usually watches.

use super::Multiplexer;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Default)]
pub struct ScanMultiplexer {
    /// Parallel to `ids`.
    fds: Vec<libc::pollfd>,
    ids: Vec<usize>,
}

impl ScanMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Multiplexer for ScanMultiplexer {
    fn register(&mut self, id: usize, fd: RawFd) -> io::Result<()> {
        if self.ids.contains(&id) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "descriptor already registered",
            ));
        }
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
        self.ids.push(id);
        Ok(())
    }

    fn forget(&mut self, id: usize) {
        if let Some(idx) = self.ids.iter().position(|&i| i == id) {
            self.fds.swap_remove(idx);
            self.ids.swap_remove(idx);
        }
    }

    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<usize>) -> io::Result<()> {
        ready.clear();

        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        // SAFETY: `fds` is a valid, exclusively borrowed array of pollfd
        // whose length is passed alongside it.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        let mut remaining = rc as usize;
        for (pfd, &id) in self.fds.iter_mut().zip(self.ids.iter()) {
            if remaining == 0 {
                break;
            }
            if pfd.revents != 0 {
                ready.push(id);
                pfd.revents = 0;
                remaining -= 1;
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}
