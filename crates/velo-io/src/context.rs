//! The reactor: readiness polling, timers, cross-thread posts.
//!
//! `IoContext` drives a current-thread tokio runtime plus a `LocalSet`
//! explicitly (`run`, `run_once`, `run_until`). The reactor contract is the
//! interesting part; the runtime underneath provides epoll registration and
//! the timer wheel:
//!
//! * callbacks posted from the loop thread run in FIFO order
//! * posts from other threads go through a lock-protected queue and wake
//!   the loop deterministically (the moral equivalent of a self-pipe)
//! * timers fire in ascending deadline order; a cancelled timer never fires
//! * no callback may block the loop, and callbacks must not re-enter
//!   `run_once`/`run`/`block_on`

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::runtime;
use tokio::sync::Notify;
use tokio::task::{AbortHandle, LocalSet};

use velo_error::Result;

use crate::task::Task;

/// How long a single `run`/`run_until` slice may sleep before re-checking
/// its exit condition.
const RUN_SLICE: Duration = Duration::from_millis(10);

/// Identifies a pending timer. Valid until the callback fires or
/// [`IoContext::cancel_timer`] is called. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Identifies an fd watch registered with [`IoContext::add_watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle(u64);

/// Readiness interest for fd watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    /// Wake when the fd becomes readable.
    pub const READABLE: Interest = Interest(0b01);
    /// Wake when the fd becomes writable.
    pub const WRITABLE: Interest = Interest(0b10);

    /// Whether this interest includes readability.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & 0b01 != 0
    }

    /// Whether this interest includes writability.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0 & 0b10 != 0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

type SendJob = Box<dyn FnOnce() + Send + 'static>;
type LocalJob = Box<dyn FnOnce() + 'static>;

/// State reachable from any thread.
struct Shared {
    queue:   Mutex<VecDeque<SendJob>>,
    notify:  Notify,
    stopped: AtomicBool,
}

struct WatchEntry {
    abort:    AbortHandle,
    interest: tokio::sync::watch::Sender<Interest>,
}

/// State owned by the loop thread.
struct Inner {
    local_queue: RefCell<VecDeque<LocalJob>>,
    timers:      RefCell<HashMap<u64, AbortHandle>>,
    watches:     RefCell<HashMap<u64, WatchEntry>>,
    next_id:     Cell<u64>,
    /// Notified whenever loop-side work happened (timer fired, watch
    /// delivered, callback drained) so `run_once` can return promptly.
    activity:    Notify,
}

impl Inner {
    fn alloc_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }
}

/// `AsyncFd` owner that borrows the caller's fd without closing it.
struct WatchFd(RawFd);

impl AsRawFd for WatchFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Cloneable, thread-safe handle to an [`IoContext`].
///
/// The only way other threads may talk to a reactor.
#[derive(Clone)]
pub struct IoHandle {
    shared: Arc<Shared>,
}

impl IoHandle {
    /// Schedule `f` to run on the loop thread. Wakes the reactor.
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.queue.lock().push_back(Box::new(f));
        self.shared.notify.notify_one();
    }

    /// Request the reactor to exit `run`. Idempotent.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

/// Single-owner readiness reactor.
///
/// Not `Send`: the context lives and dies on its loop thread. Use
/// [`IoContext::handle`] for cross-thread posting.
pub struct IoContext {
    rt:     runtime::Runtime,
    local:  LocalSet,
    shared: Arc<Shared>,
    inner:  Rc<Inner>,
}

impl IoContext {
    /// Create a reactor owned by the calling thread.
    pub fn new() -> Result<Self> {
        let rt = runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let local = LocalSet::new();
        let shared = Arc::new(Shared {
            queue:   Mutex::new(VecDeque::new()),
            notify:  Notify::new(),
            stopped: AtomicBool::new(false),
        });
        let inner = Rc::new(Inner {
            local_queue: RefCell::new(VecDeque::new()),
            timers:      RefCell::new(HashMap::new()),
            watches:     RefCell::new(HashMap::new()),
            next_id:     Cell::new(1),
            activity:    Notify::new(),
        });

        // Background drainer: keeps cross-thread posts flowing while the
        // loop thread is parked inside `block_on` on some other future.
        let drain_shared = Arc::clone(&shared);
        let drain_inner = Rc::clone(&inner);
        local.spawn_local(async move {
            loop {
                drain_shared.notify.notified().await;
                loop {
                    let job = drain_shared.queue.lock().pop_front();
                    match job {
                        Some(f) => f(),
                        None => break,
                    }
                }
                drain_inner.activity.notify_one();
            }
        });

        Ok(Self {
            rt,
            local,
            shared,
            inner,
        })
    }

    /// Thread-safe handle for posting work and stopping the loop.
    #[must_use]
    pub fn handle(&self) -> IoHandle {
        IoHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Schedule `f` on the loop thread. FIFO relative to other loop-thread
    /// posts. For posting from another thread, see [`IoHandle::post`].
    pub fn post(&self, f: impl FnOnce() + 'static) {
        self.inner.local_queue.borrow_mut().push_back(Box::new(f));
        self.inner.activity.notify_one();
    }

    /// Schedule `f` to run after `delay`. The returned id stays valid until
    /// the callback fires or the timer is cancelled.
    pub fn post_delayed(&self, delay: Duration, f: impl FnOnce() + 'static) -> TimerId {
        let id = self.inner.alloc_id();
        let inner = Rc::clone(&self.inner);
        let handle = self.local.spawn_local(async move {
            tokio::time::sleep(delay).await;
            inner.timers.borrow_mut().remove(&id);
            f();
            inner.activity.notify_one();
        });
        self.inner.timers.borrow_mut().insert(id, handle.abort_handle());
        TimerId(id)
    }

    /// Cancel a pending timer. A cancelled timer never fires; cancelling a
    /// timer that already fired is a no-op.
    pub fn cancel_timer(&self, id: TimerId) {
        if let Some(handle) = self.inner.timers.borrow_mut().remove(&id.0) {
            handle.abort();
        }
    }

    /// Watch a raw fd for readiness. `cb` runs on the loop thread with the
    /// readiness kind that fired.
    ///
    /// Delivery is edge-style: the callback must drain the fd, otherwise it
    /// will not be invoked again until new readiness arrives. The fd is
    /// borrowed, never closed; it must outlive the watch.
    ///
    /// # Errors
    ///
    /// Fails if the fd cannot be registered with the poller (unsupported
    /// file type, bad descriptor).
    pub fn add_watch(
        &self,
        fd: RawFd,
        interest: Interest,
        cb: impl FnMut(Interest) + 'static,
    ) -> Result<WatchHandle> {
        let _rt = self.rt.enter();
        let afd = AsyncFd::with_interest(
            WatchFd(fd),
            tokio::io::Interest::READABLE | tokio::io::Interest::WRITABLE,
        )?;

        let (tx, mut rx) = tokio::sync::watch::channel(interest);
        let id = self.inner.alloc_id();
        let inner = Rc::clone(&self.inner);
        let handle = self.local.spawn_local(async move {
            let mut cb = cb;
            loop {
                let want = *rx.borrow();
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    guard = afd.readable(), if want.is_readable() => {
                        match guard {
                            Ok(mut g) => {
                                g.clear_ready();
                                cb(Interest::READABLE);
                                inner.activity.notify_one();
                            }
                            Err(_) => break,
                        }
                    }
                    guard = afd.writable(), if want.is_writable() => {
                        match guard {
                            Ok(mut g) => {
                                g.clear_ready();
                                cb(Interest::WRITABLE);
                                inner.activity.notify_one();
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });
        self.inner.watches.borrow_mut().insert(
            id,
            WatchEntry {
                abort:    handle.abort_handle(),
                interest: tx,
            },
        );
        Ok(WatchHandle(id))
    }

    /// Change the readiness interest of an existing watch.
    pub fn update_watch(&self, handle: WatchHandle, interest: Interest) {
        if let Some(entry) = self.inner.watches.borrow().get(&handle.0) {
            let _ = entry.interest.send(interest);
        }
    }

    /// Deregister a watch. The callback will not be invoked again.
    pub fn remove_watch(&self, handle: WatchHandle) {
        if let Some(entry) = self.inner.watches.borrow_mut().remove(&handle.0) {
            entry.abort.abort();
        }
    }

    /// Detach a [`Task`]: run it to completion on this reactor with nobody
    /// awaiting the result. Errors are logged and dropped.
    pub fn spawn<T: 'static>(&self, task: Task<T>) {
        self.local.spawn_local(async move {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, code = e.error_code(), "detached task failed");
            }
        });
    }

    /// Drive `fut` to completion on this reactor, servicing timers, watches
    /// and cross-thread posts while it runs.
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.local.block_on(&self.rt, fut)
    }

    /// Run ready callbacks, then wait up to `timeout` for the next event
    /// (timer, watch, post) and process it. Returns after the first burst
    /// of activity or when the timeout elapses, whichever comes first.
    pub fn run_once(&self, timeout: Duration) {
        if self.drain_queues() {
            // Posted callbacks ran; let already-ready local tasks settle.
            self.local.block_on(&self.rt, async {
                tokio::task::yield_now().await;
            });
            self.drain_queues();
            return;
        }
        self.local.block_on(&self.rt, async {
            tokio::select! {
                () = self.inner.activity.notified() => {}
                () = self.shared.notify.notified() => {}
                () = tokio::time::sleep(timeout) => {}
            }
        });
        self.drain_queues();
    }

    /// Run the loop until `pred` returns true or [`IoContext::stop`] is
    /// called.
    pub fn run_until(&self, mut pred: impl FnMut() -> bool) {
        while !pred() && !self.is_stopped() {
            self.run_once(RUN_SLICE);
        }
    }

    /// Run the loop until [`IoContext::stop`] is called.
    pub fn run(&self) {
        while !self.is_stopped() {
            self.run_once(RUN_SLICE);
        }
    }

    /// Request the loop to exit `run`. Idempotent; safe from callbacks.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        self.inner.activity.notify_one();
    }

    /// Whether `stop` has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Run every queued callback. Returns whether any ran.
    ///
    /// Jobs are popped one at a time so a callback may post further work
    /// without deadlocking on the queue lock or the `RefCell`.
    fn drain_queues(&self) -> bool {
        let mut ran = false;
        loop {
            let job = self.shared.queue.lock().pop_front();
            match job {
                Some(f) => {
                    f();
                    ran = true;
                }
                None => break,
            }
        }
        loop {
            let job = self.inner.local_queue.borrow_mut().pop_front();
            match job {
                Some(f) => {
                    f();
                    ran = true;
                }
                None => break,
            }
        }
        ran
    }
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("stopped", &self.is_stopped())
            .field("timers", &self.inner.timers.borrow().len())
            .field("watches", &self.inner.watches.borrow().len())
            .finish()
    }
}
