//! Fixed-size connection pool with exclusive leases.
//!
//! Connections are created eagerly. Leases hand out round-robin across
//! healthy slots; when none is available, acquirers queue FIFO —
//! unbounded by default, bounded via [`PgPool::acquire_timeout`] which
//! gives up with `PoolError::Exhausted`. A lease returned broken triggers
//! a background recycle: a connection with a cancelled in-flight
//! operation is first drained to the next ReadyForQuery (avoiding wire
//! desynchronization), otherwise it is reconnected under exponential
//! backoff. [`PgPool::close`] stops leasing and fails queued waiters with
//! `PoolError::Closed`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use velo_error::{PoolError, Result};
use velo_io::Backoff;

use crate::connection::{ConnectionState, PgConnection};
use crate::conninfo::PgConfig;

/// How long a recycle may spend draining a cancelled operation's reply
/// before giving up and reconnecting.
const RESYNC_TIMEOUT: Duration = Duration::from_secs(1);

struct Slot {
    /// `None` while leased or while a recycle is replacing the connection.
    conn:    Option<PgConnection>,
    healthy: bool,
}

struct PoolInner {
    slots:   Vec<Slot>,
    rr:      usize,
    waiters: VecDeque<oneshot::Sender<()>>,
    closed:  bool,
}

impl PoolInner {
    /// Hand the freed-slot wakeup to the first waiter still listening.
    /// Waiters that timed out or were cancelled left a dead sender behind;
    /// skipping them keeps the wakeup from being lost.
    fn wake_one(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                break;
            }
        }
    }
}

/// Pool of [`PgConnection`]s owned by one reactor.
///
/// Cloning shares the same pool. All methods must run on the owning
/// reactor; `create` spawns the recycle task and therefore must be called
/// from reactor context.
#[derive(Clone)]
pub struct PgPool {
    inner:      Rc<RefCell<PoolInner>>,
    recycle_tx: mpsc::UnboundedSender<usize>,
    config:     Rc<PgConfig>,
}

impl PgPool {
    /// Eagerly connect `size` connections.
    ///
    /// # Errors
    ///
    /// Fails if any initial connection cannot be established; a pool never
    /// starts degraded.
    pub async fn create(config: PgConfig, size: usize) -> Result<PgPool> {
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = PgConnection::connect(&config).await?;
            slots.push(Slot {
                conn:    Some(conn),
                healthy: true,
            });
        }
        tracing::debug!(size, "pg pool ready");

        let (recycle_tx, recycle_rx) = mpsc::unbounded_channel();
        let pool = PgPool {
            inner: Rc::new(RefCell::new(PoolInner {
                slots,
                rr: 0,
                waiters: VecDeque::new(),
                closed: false,
            })),
            recycle_tx,
            config: Rc::new(config),
        };
        pool.spawn_recycler(recycle_rx);
        Ok(pool)
    }

    /// Number of slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    /// Whether the pool has no slots at all.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Slots currently healthy (leased ones count as healthy).
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.inner.borrow().slots.iter().filter(|s| s.healthy).count()
    }

    /// Lease a connection. Round-robin over healthy slots; waits FIFO when
    /// none is available.
    ///
    /// # Errors
    ///
    /// Fails with `PoolError::Closed` once [`PgPool::close`] was called.
    pub async fn acquire(&self) -> Result<ConnectionGuard> {
        loop {
            if self.is_closed() {
                return Err(PoolError::Closed.into());
            }
            if let Some((index, conn)) = self.try_take() {
                return Ok(ConnectionGuard {
                    conn: Some(conn),
                    index,
                    pool: Rc::downgrade(&self.inner),
                    recycle_tx: self.recycle_tx.clone(),
                    poisoned: false,
                });
            }
            let (tx, rx) = oneshot::channel();
            self.inner.borrow_mut().waiters.push_back(tx);
            let _ = rx.await;
        }
    }

    /// Lease a connection, waiting at most `max_wait`.
    ///
    /// # Errors
    ///
    /// Fails with `PoolError::Exhausted` when no connection frees up in
    /// time, or `PoolError::Closed` once the pool was closed.
    pub async fn acquire_timeout(&self, max_wait: Duration) -> Result<ConnectionGuard> {
        match tokio::time::timeout(max_wait, self.acquire()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PoolError::Exhausted.into()),
        }
    }

    /// Stop handing out leases. Queued waiters fail with
    /// `PoolError::Closed`; outstanding guards finish their work and their
    /// connections are dropped with the pool. Idempotent.
    pub fn close(&self) {
        let mut p = self.inner.borrow_mut();
        if p.closed {
            return;
        }
        p.closed = true;
        // Dropping the senders resumes every queued waiter, which then
        // observes the closed flag.
        p.waiters.clear();
        tracing::debug!("pg pool closed");
    }

    /// Whether [`PgPool::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    fn try_take(&self) -> Option<(usize, PgConnection)> {
        let mut p = self.inner.borrow_mut();
        let n = p.slots.len();
        for i in 0..n {
            let index = (p.rr + i) % n;
            if !p.slots[index].healthy {
                continue;
            }
            if let Some(conn) = p.slots[index].conn.take() {
                p.rr = (index + 1) % n;
                return Some((index, conn));
            }
        }
        None
    }

    fn spawn_recycler(&self, mut rx: mpsc::UnboundedReceiver<usize>) {
        let pool = Rc::downgrade(&self.inner);
        let config = Rc::clone(&self.config);
        tokio::task::spawn_local(async move {
            while let Some(index) = rx.recv().await {
                let Some(inner) = pool.upgrade() else { break };
                let returned = inner.borrow_mut().slots[index].conn.take();
                drop(inner);

                let restored = match returned {
                    // A cancelled operation left a reply on the wire:
                    // drain it rather than desynchronize.
                    Some(mut c) if c.state() == ConnectionState::Busy => {
                        match tokio::time::timeout(RESYNC_TIMEOUT, c.resync()).await {
                            Ok(Ok(())) => Some(c),
                            _ => None,
                        }
                    }
                    Some(c) if c.is_ready() => Some(c),
                    _ => None,
                };

                let conn = match restored {
                    Some(c) => c,
                    None => match reconnect(&config, &pool).await {
                        Some(c) => c,
                        None => break,
                    },
                };

                let Some(inner) = pool.upgrade() else { break };
                let mut p = inner.borrow_mut();
                p.slots[index].conn = Some(conn);
                p.slots[index].healthy = true;
                p.wake_one();
                tracing::debug!(slot = index, "pg connection recycled");
            }
        });
    }
}

async fn reconnect(config: &PgConfig, pool: &Weak<RefCell<PoolInner>>) -> Option<PgConnection> {
    let mut backoff = Backoff::new();
    loop {
        tokio::time::sleep(backoff.next_delay()).await;
        pool.upgrade()?;
        match PgConnection::connect(config).await {
            Ok(conn) => return Some(conn),
            Err(e) => {
                tracing::warn!(error = %e, code = e.error_code(), "pg reconnect failed");
            }
        }
    }
}

/// Exclusive, movable lease on one [`PgConnection`].
///
/// Returns its connection to the pool on drop. A connection that comes
/// back non-Ready (or explicitly poisoned) goes through the recycle path
/// instead of straight back into rotation.
pub struct ConnectionGuard {
    conn:       Option<PgConnection>,
    index:      usize,
    pool:       Weak<RefCell<PoolInner>>,
    recycle_tx: mpsc::UnboundedSender<usize>,
    poisoned:   bool,
}

impl ConnectionGuard {
    /// Force the connection through the recycle path on drop.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Slot index, for diagnostics.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.index
    }
}

impl Deref for ConnectionGuard {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("guard connection taken only on drop"),
        }
    }
}

impl DerefMut for ConnectionGuard {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("guard connection taken only on drop"),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let Some(inner) = self.pool.upgrade() else { return };
        let mut p = inner.borrow_mut();

        if !self.poisoned && conn.is_ready() {
            p.slots[self.index].conn = Some(conn);
            p.slots[self.index].healthy = true;
            p.wake_one();
        } else {
            p.slots[self.index].conn = Some(conn);
            p.slots[self.index].healthy = false;
            let _ = self.recycle_tx.send(self.index);
        }
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard").field("slot", &self.index).finish()
    }
}
