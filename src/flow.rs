//! Flow control between worker tasks and the mutation thread.
//!
//! The host engine only allows scene mutations on one designated thread. Worker tasks therefore
//! never touch the scene directly: they queue closures on that thread and wait for the result.
//!
//! # User-facing types
//!
//! - [`MainThread<S>`] is the cloneable, `Send` handle workers use to queue mutations
//! - [`MutationLoop<S>`] drains the queue on the thread that owns `S`
//! - [`Job<T>`] is the awaitable handle of one orchestrated invocation
//! - [`Progress`] carries the cancellation flag and the current [`Phase`] of a job
//!
//! # Hop pattern
//!
//! Every scene step is a blocking hop:
//! 1. the worker boxes a closure over owned data and sends it as [`FlowEvent::Mut`]
//! 2. the mutation thread runs it against `&mut S`
//! 3. the result travels back over a one-shot channel and the worker continues
//!
//! Later worker steps depend on ids produced by earlier mutations, so hops are never
//! fire-and-forget.

use std::{
    fmt::Debug,
    panic::AssertUnwindSafe,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread::{self, ThreadId},
};

use futures::{FutureExt, StreamExt, channel::mpsc};
use futures_intrusive::channel::shared::oneshot_channel;
use thiserror::Error;

pub type Mutation<S> = Box<dyn FnOnce(&mut S) + Send>;

pub(crate) enum FlowEvent<S: 'static> {
    Mut(Mutation<S>),
    Exit,
}

impl<S: 'static> Debug for FlowEvent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mut(_) => f.write_str("Mut(|&mut State| -> {...})"),
            Self::Exit => f.write_str("Exit"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationError {
    #[error("the mutation thread has shut down")]
    Closed,
    #[error("the mutation was dropped before it completed")]
    Dropped,
    #[error("blocking hop issued from the mutation thread itself")]
    Reentrant,
}

/// Creates a connected handle/loop pair. The loop binds to the first thread that drains it.
pub fn channel<S: 'static>() -> (MainThread<S>, MutationLoop<S>) {
    let (sender, receiver) = mpsc::unbounded();
    let thread = Arc::new(OnceLock::new());
    (
        MainThread {
            sender,
            thread: thread.clone(),
        },
        MutationLoop { receiver, thread },
    )
}

/// Spawns a dedicated mutation thread owning the state built by `init`.
///
/// The thread runs until every [`MainThread`] handle is dropped or [`MainThread::shutdown`] is
/// called, and hands the state back through the join handle.
pub fn spawn_main_thread<S, F>(init: F) -> (MainThread<S>, thread::JoinHandle<S>)
where
    S: Send + 'static,
    F: FnOnce() -> S + Send + 'static,
{
    let (main, mutation_loop) = channel();
    let handle = thread::spawn(move || {
        let mut state = init();
        mutation_loop.run_until_closed(&mut state);
        state
    });
    (main, handle)
}

pub struct MainThread<S: 'static> {
    sender: mpsc::UnboundedSender<FlowEvent<S>>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl<S: 'static> Clone for MainThread<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            thread: self.thread.clone(),
        }
    }
}

impl<S: 'static> Debug for MainThread<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThread")
            .field("thread", &self.thread.get())
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<S: 'static> MainThread<S> {
    pub fn is_mutation_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    /// Blocking hop: queue `f` and wait for its result.
    pub fn run<R, F>(&self, f: F) -> Result<R, MutationError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_mutation_thread() {
            return Err(MutationError::Reentrant);
        }
        futures::executor::block_on(self.run_async(f))
    }

    /// Queue `f` and await its result without blocking the calling executor thread.
    pub async fn run_async<R, F>(&self, f: F) -> Result<R, MutationError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot_channel::<R>();
        let job: Mutation<S> = Box::new(move |state: &mut S| {
            // The receiver may be gone if the worker was torn down.
            let _ = tx.send(f(state));
        });
        self.sender
            .unbounded_send(FlowEvent::Mut(job))
            .map_err(|_| MutationError::Closed)?;
        rx.receive().await.ok_or(MutationError::Dropped)
    }

    /// Asks the loop to stop after the mutations already queued.
    pub fn shutdown(&self) {
        if self.sender.unbounded_send(FlowEvent::Exit).is_err() {
            log::debug!("mutation thread already stopped");
        }
    }
}

pub struct MutationLoop<S: 'static> {
    receiver: mpsc::UnboundedReceiver<FlowEvent<S>>,
    thread: Arc<OnceLock<ThreadId>>,
}

impl<S: 'static> MutationLoop<S> {
    fn bind(&self) {
        let current = thread::current().id();
        let bound = *self.thread.get_or_init(|| current);
        if bound != current {
            log::error!(
                "mutation loop bound to {:?} is being drained from {:?}",
                bound,
                current
            );
        }
    }

    /// Runs every queued mutation without waiting for new ones. Returns how many ran.
    ///
    /// Hosts with their own frame loop call this once per frame.
    pub fn pump(&mut self, state: &mut S) -> usize {
        self.bind();
        let mut handled = 0;
        while let Some(Some(event)) = self.receiver.next().now_or_never() {
            match event {
                FlowEvent::Mut(job) => {
                    apply(job, state);
                    handled += 1;
                }
                FlowEvent::Exit => break,
            }
        }
        handled
    }

    /// Blocks the current thread, running mutations until shutdown or until all handles are gone.
    pub fn run_until_closed(mut self, state: &mut S) {
        self.bind();
        while let Some(event) = futures::executor::block_on(self.receiver.next()) {
            match event {
                FlowEvent::Mut(job) => apply(job, state),
                FlowEvent::Exit => break,
            }
        }
        log::debug!("mutation loop stopped");
    }
}

fn apply<S>(job: Mutation<S>, state: &mut S) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| job(state))).is_err() {
        log::error!("scene mutation panicked and was skipped");
    }
}

/// Steps of one orchestrated reconstruction.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Selecting = 0,
    Converting = 1,
    Destroying = 2,
    Rebuilding = 3,
    NotifyingCompletion = 4,
    Done = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Selecting,
            1 => Self::Converting,
            2 => Self::Destroying,
            3 => Self::Rebuilding,
            4 => Self::NotifyingCompletion,
            _ => Self::Done,
        }
    }
}

/// Cancellation flag and phase shared between a [`Job`] and its worker.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    phase: Arc<AtomicU8>,
    canceled: Arc<AtomicBool>,
}

impl Progress {
    pub fn enter(&self, phase: Phase) {
        log::debug!("entering {:?}", phase);
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Awaitable handle of one asynchronous invocation.
#[derive(Debug)]
pub struct Job<T> {
    handle: tokio::task::JoinHandle<anyhow::Result<T>>,
    progress: Progress,
}

impl<T: Send + 'static> Job<T> {
    /// Runs `body` on the runtime's blocking pool, where blocking hops are allowed.
    pub fn spawn<F>(runtime: &tokio::runtime::Handle, body: F) -> Self
    where
        F: FnOnce(Progress) -> anyhow::Result<T> + Send + 'static,
    {
        let progress = Progress::default();
        let worker_progress = progress.clone();
        let handle = runtime.spawn_blocking(move || body(worker_progress));
        Self { handle, progress }
    }

    /// Requests cooperative cancellation. Work already queued on the mutation thread still runs.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    pub fn phase(&self) -> Phase {
        self.progress.phase()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> anyhow::Result<T> {
        self.handle.await?
    }
}

/// Installs `env_logger` unless a logger is already set. `RUST_LOG` selects the level.
pub fn init_logging() {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }
}
