//! Server lifecycle: init, event loop, cleanup.
//!
//! [`Server::run`] always runs cleanup, whether initialization failed, the
//! exit signal was raised, or the multiplexer failed. All mutable state the
//! loop touches lives in one [`Context`] owned by the server.

use crate::config::Mode;
use crate::policy::{ActivityTracker, GapCalculator};
use crate::runtime::connection::{self, Accepted};
use crate::runtime::descriptor::DescriptorTable;
use crate::runtime::endpoint::Endpoint;
use crate::runtime::mux::Multiplexer;
use crate::runtime::reply;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Cooperative shutdown flag.
///
/// Backed by a static so an async signal handler can raise it.
#[derive(Debug, Clone, Copy)]
pub struct ExitSignal(&'static AtomicBool);

impl ExitSignal {
    pub fn new(flag: &'static AtomicBool) -> Self {
        Self(flag)
    }

    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// State shared by every operation of the event loop.
pub struct Context<E> {
    pub table: DescriptorTable<E>,
    /// Client data messages received so far.
    pub receive_count: u64,
    pub exit: ExitSignal,
    pub mode: Mode,
    /// Ring size for accepted connections.
    pub ring_capacity: usize,
    pub max_message_size: usize,
}

impl<E> Context<E> {
    pub fn new(
        table: DescriptorTable<E>,
        exit: ExitSignal,
        mode: Mode,
        ring_capacity: usize,
        max_message_size: usize,
    ) -> Self {
        Self {
            table,
            receive_count: 0,
            exit,
            mode,
            ring_capacity,
            max_message_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Running,
    Terminated,
}

/// Benchmark server over endpoint type `E`, multiplexer `M`, and the
/// activity/gap policies `A` and `G`.
pub struct Server<E, M, A, G> {
    ctx: Context<E>,
    mux: M,
    activity: A,
    gaps: G,
    poll_timeout: Option<Duration>,
    state: LifecycleState,
    ready: Vec<usize>,
}

impl<E, M, A, G> Server<E, M, A, G>
where
    E: Endpoint,
    M: Multiplexer,
    A: ActivityTracker,
    G: GapCalculator,
{
    pub fn new(
        ctx: Context<E>,
        mux: M,
        activity: A,
        gaps: G,
        poll_timeout: Option<Duration>,
    ) -> Self {
        Self {
            ctx,
            mux,
            activity,
            gaps,
            poll_timeout,
            state: LifecycleState::Init,
            ready: Vec::new(),
        }
    }

    /// Run init, the event loop, and cleanup, in that order.
    ///
    /// Cleanup runs on every path. The first error encountered is returned.
    pub fn run(&mut self) -> io::Result<()> {
        let result = self.init_before_loop().and_then(|()| self.run_loop());
        if let Err(ref e) = result {
            error!(error = %e, state = ?self.state, "Server stopped on error");
        }
        self.cleanup_after_loop();
        result
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &Context<E> {
        &self.ctx
    }

    pub fn activity(&self) -> &A {
        &self.activity
    }

    pub fn gaps(&self) -> &G {
        &self.gaps
    }

    /// Register every prepared descriptor with the multiplexer.
    fn init_before_loop(&mut self) -> io::Result<()> {
        if self.ctx.table.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no sockets to serve",
            ));
        }

        for id in self.ctx.table.ids() {
            let Some(record) = self.ctx.table.get(id) else {
                continue;
            };
            self.mux.register(id, record.endpoint.raw_fd())?;
            info!(id, addr = %record.addr, kind = ?record.kind, multicast = record.is_multicast, "Serving");
        }

        self.state = LifecycleState::Running;
        info!(descriptors = self.mux.len(), mode = ?self.ctx.mode, "Server running");
        Ok(())
    }

    /// Wait for readiness and dispatch until the exit signal is raised.
    fn run_loop(&mut self) -> io::Result<()> {
        while !self.ctx.exit.is_set() {
            self.mux.wait(self.poll_timeout, &mut self.ready)?;

            let ready = std::mem::take(&mut self.ready);
            for &id in &ready {
                if self.ctx.exit.is_set() {
                    break;
                }
                self.dispatch(id);
            }
            self.ready = ready;
        }
        Ok(())
    }

    #[inline]
    fn dispatch(&mut self, id: usize) {
        let is_listener = match self.ctx.table.get(id) {
            Some(record) => record.is_listener(),
            // Closed earlier in this batch.
            None => return,
        };

        if is_listener {
            self.accept_all(id);
        } else if reply::process(&mut self.ctx, id, &mut self.activity, &mut self.gaps) {
            self.mux.forget(id);
        }
    }

    fn accept_all(&mut self, listener: usize) {
        loop {
            match connection::accept(&mut self.ctx, listener) {
                Accepted::New(id) => {
                    let Some(record) = self.ctx.table.get(id) else {
                        continue;
                    };
                    if let Err(e) = self.mux.register(id, record.endpoint.raw_fd()) {
                        warn!(id, error = %e, "Failed to watch connection, closing");
                        connection::teardown(&mut self.ctx.table, id);
                    }
                }
                Accepted::Rejected => continue,
                Accepted::Drained => break,
            }
        }
    }

    /// Close every descriptor. Runs once; later calls are no-ops.
    fn cleanup_after_loop(&mut self) {
        if self.state == LifecycleState::Terminated {
            return;
        }

        let ids = self.ctx.table.ids();
        for &id in &ids {
            self.mux.forget(id);
            self.ctx.table.remove(id);
        }
        debug!(closed = ids.len(), "Descriptors released");

        self.activity.report();
        self.gaps.report();
        info!(received = self.ctx.receive_count, "Server stopped");
        self.state = LifecycleState::Terminated;
    }
}
