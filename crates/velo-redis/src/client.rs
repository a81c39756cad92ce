//! Pipelined Redis client.
//!
//! One connection, any number of in-flight commands: RESP2 preserves reply
//! order, so each submitted command enqueues a waiter and a reactor-local
//! reader task completes waiters FIFO as replies arrive. Clients are
//! cheaply cloneable and safe to share within one reactor.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

use velo_error::{ConnectionError, Error, Result};

use crate::resp;
use crate::value::RedisValue;

type ReplyWaiter = oneshot::Sender<Result<RedisValue>>;

struct ClientInner {
    writer:    Mutex<OwnedWriteHalf>,
    pending:   RefCell<VecDeque<ReplyWaiter>>,
    connected: Cell<bool>,
}

/// A pipelined RESP2 connection. Clones share the connection.
#[derive(Clone)]
pub struct RedisClient {
    inner: Rc<ClientInner>,
}

impl RedisClient {
    /// Connect, optionally authenticating.
    ///
    /// Must be called from reactor context: the reply reader is spawned as
    /// a reactor-local task.
    ///
    /// # Errors
    ///
    /// Fails on TCP errors or a rejected AUTH.
    pub async fn connect(host: &str, port: u16, password: Option<&str>) -> Result<Self> {
        tracing::debug!(host, port, "redis connect");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let inner = Rc::new(ClientInner {
            writer:    Mutex::new(write_half),
            pending:   RefCell::new(VecDeque::new()),
            connected: Cell::new(true),
        });
        tokio::task::spawn_local(read_loop(read_half, Rc::downgrade(&inner)));

        let client = Self { inner };
        if let Some(password) = password {
            match client.exec(&["AUTH", password]).await? {
                RedisValue::Error(message) => {
                    client.inner.connected.set(false);
                    return Err(ConnectionError::Auth(message).into());
                }
                _ => tracing::debug!("redis authenticated"),
            }
        }
        Ok(client)
    }

    /// Whether the connection is still usable.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.inner.connected.get()
    }

    /// Whether two handles share one underlying connection.
    #[must_use]
    pub fn same_connection(&self, other: &RedisClient) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Submit one command and await its reply.
    ///
    /// In-band backend errors come back as `Ok(RedisValue::Error(_))`;
    /// `Err` means the connection itself failed and must be replaced.
    pub async fn exec(&self, args: &[impl AsRef<[u8]>]) -> Result<RedisValue> {
        if !self.connected() {
            return Err(ConnectionError::Closed.into());
        }

        let mut buf = BytesMut::new();
        resp::encode_command(&mut buf, args);

        // The waiter is enqueued while the writer lock is held so pending
        // order always matches wire order.
        let rx = {
            let mut writer = self.inner.writer.lock().await;
            let (tx, rx) = oneshot::channel();
            self.inner.pending.borrow_mut().push_back(tx);
            if let Err(e) = writer.write_all(&buf).await {
                self.inner.connected.set(false);
                let _ = self.inner.pending.borrow_mut().pop_back();
                return Err(e.into());
            }
            rx
        };

        match rx.await {
            Ok(reply) => reply,
            Err(_) => Err(ConnectionError::Lost("connection closed".into()).into()),
        }
    }
}

impl std::fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisClient")
            .field("connected", &self.connected())
            .field("in_flight", &self.inner.pending.borrow().len())
            .finish()
    }
}

/// Reply pump: parses values off the socket and completes waiters FIFO.
///
/// Holds only a weak handle so the task dies with the last client clone.
async fn read_loop(mut read_half: OwnedReadHalf, inner: Weak<ClientInner>) {
    let mut buf = BytesMut::with_capacity(4 * 1024);
    loop {
        loop {
            let Some(client) = inner.upgrade() else { return };
            match resp::decode_value(&mut buf) {
                Ok(Some(value)) => {
                    let waiter = client.pending.borrow_mut().pop_front();
                    match waiter {
                        // A dropped receiver is a cancelled caller: the
                        // reply is consumed here so the stream stays in
                        // sync, then discarded.
                        Some(tx) => drop(tx.send(Ok(value))),
                        None => tracing::warn!("unsolicited redis reply discarded"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "redis protocol error, tearing down");
                    fail_all(&client, || {
                        ConnectionError::Protocol("reply stream desynchronized".into()).into()
                    });
                    return;
                }
            }
        }

        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                if let Some(client) = inner.upgrade() {
                    fail_all(&client, || ConnectionError::Lost("peer closed".into()).into());
                }
                return;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(client) = inner.upgrade() {
                    let message = e.to_string();
                    fail_all(&client, move || ConnectionError::Lost(message.clone()).into());
                }
                return;
            }
        }
    }
}

fn fail_all(client: &Rc<ClientInner>, make_error: impl Fn() -> Error) {
    client.connected.set(false);
    let waiters: Vec<ReplyWaiter> = client.pending.borrow_mut().drain(..).collect();
    for waiter in waiters {
        let _ = waiter.send(Err(make_error()));
    }
}
