//! Round-robin pool of shared Redis clients.
//!
//! Redis connections pipeline, so the pool hands out shared clients rather
//! than exclusive leases: `next()` rotates across healthy clients and any
//! number of callers may hold the same client concurrently. Dead clients
//! are skipped and replaced in the background under exponential backoff,
//! until [`RedisPool::close`] ends replacement.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use velo_error::Result;
use velo_io::Backoff;

use crate::client::RedisClient;

struct Endpoint {
    host:     String,
    port:     u16,
    password: Option<String>,
}

struct PoolInner {
    clients:      Vec<RedisClient>,
    rr:           usize,
    reconnecting: Vec<bool>,
    closed:       bool,
}

/// Pool of [`RedisClient`]s owned by one reactor.
#[derive(Clone)]
pub struct RedisPool {
    inner:    Rc<RefCell<PoolInner>>,
    endpoint: Rc<Endpoint>,
}

impl RedisPool {
    /// Eagerly connect `size` clients.
    ///
    /// Must be called from reactor context (each client spawns its reply
    /// reader as a reactor-local task).
    ///
    /// # Errors
    ///
    /// Fails if any initial connection cannot be established.
    pub async fn create(
        host: &str,
        port: u16,
        password: Option<&str>,
        size: usize,
    ) -> Result<RedisPool> {
        let mut clients = Vec::with_capacity(size);
        for _ in 0..size {
            clients.push(RedisClient::connect(host, port, password).await?);
        }
        tracing::debug!(size, host, port, "redis pool ready");

        Ok(RedisPool {
            inner:    Rc::new(RefCell::new(PoolInner {
                reconnecting: vec![false; size],
                clients,
                rr: 0,
                closed: false,
            })),
            endpoint: Rc::new(Endpoint {
                host:     host.to_string(),
                port,
                password: password.map(str::to_string),
            }),
        })
    }

    /// Number of clients.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.borrow().clients.len()
    }

    /// Whether the pool has no clients at all.
    #[must_use]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Clients currently connected.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.inner.borrow().clients.iter().filter(|c| c.connected()).count()
    }

    /// End background replacement of dead clients. Handles already given
    /// out stay usable for as long as their connections live. Idempotent.
    pub fn close(&self) {
        let mut p = self.inner.borrow_mut();
        if p.closed {
            return;
        }
        p.closed = true;
        tracing::debug!("redis pool closed");
    }

    /// Whether [`RedisPool::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Next client, round-robin across connected ones.
    ///
    /// Dead clients are skipped and queued for background reconnection. If
    /// every client is dead, the rotation continues anyway so callers get
    /// a deterministic `ConnectionLost` instead of blocking.
    #[must_use]
    pub fn next(&self) -> RedisClient {
        let (client, dead) = {
            let mut p = self.inner.borrow_mut();
            let n = p.clients.len();
            assert!(n > 0, "next() on an empty pool");

            let mut dead = Vec::new();
            let mut chosen = None;
            for i in 0..n {
                let index = (p.rr + i) % n;
                if p.clients[index].connected() {
                    p.rr = (index + 1) % n;
                    chosen = Some(p.clients[index].clone());
                    break;
                }
                dead.push(index);
            }
            let client = chosen.unwrap_or_else(|| {
                let index = p.rr % n;
                p.rr = (index + 1) % n;
                p.clients[index].clone()
            });
            (client, dead)
        };

        for index in dead {
            self.kick_reconnect(index);
        }
        client
    }

    /// Start a background replacement for a dead slot, once.
    fn kick_reconnect(&self, index: usize) {
        {
            let mut p = self.inner.borrow_mut();
            if p.closed || p.reconnecting[index] || p.clients[index].connected() {
                return;
            }
            p.reconnecting[index] = true;
        }

        let pool: Weak<RefCell<PoolInner>> = Rc::downgrade(&self.inner);
        let endpoint = Rc::clone(&self.endpoint);
        tokio::task::spawn_local(async move {
            let mut backoff = Backoff::new();
            loop {
                tokio::time::sleep(backoff.next_delay()).await;
                let Some(inner) = pool.upgrade() else { return };
                let closed = inner.borrow().closed;
                if closed {
                    inner.borrow_mut().reconnecting[index] = false;
                    return;
                }
                drop(inner);
                match RedisClient::connect(
                    &endpoint.host,
                    endpoint.port,
                    endpoint.password.as_deref(),
                )
                .await
                {
                    Ok(client) => {
                        if let Some(inner) = pool.upgrade() {
                            let mut p = inner.borrow_mut();
                            p.clients[index] = client;
                            p.reconnecting[index] = false;
                            tracing::debug!(slot = index, "redis connection replaced");
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(slot = index, error = %e, "redis reconnect failed");
                    }
                }
            }
        });
    }
}
