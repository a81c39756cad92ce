//! One socket, one wire state machine, at most one in-flight request.

use std::collections::HashMap;
use std::rc::Rc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use velo_error::{ConnectionError, Error, Result};

use crate::auth::{ScramFlow, SCRAM_SHA_256};
use crate::conninfo::PgConfig;
use crate::protocol::decode::decode_message;
use crate::protocol::encode;
use crate::protocol::message::{AuthRequest, BackendMessage, FieldDescription};
use crate::result::{PgResult, PgRow};
use crate::types::PgValue;

/// Connection lifecycle.
///
/// `Ready → Busy → Ready` cycles on every submitted operation; any
/// transport or protocol failure jumps to `Closed` and the connection must
/// be replaced through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket yet
    Disconnected,
    /// TCP connect in progress
    Connecting,
    /// Startup/authentication exchange in progress
    Handshaking,
    /// Idle, accepts the next operation
    Ready,
    /// One operation in flight
    Busy,
    /// Teardown requested
    Closing,
    /// Unusable
    Closed,
}

/// A PostgreSQL connection speaking the extended query protocol.
pub struct PgConnection {
    stream:      TcpStream,
    read_buf:    BytesMut,
    write_buf:   BytesMut,
    state:       ConnectionState,
    parameters:  HashMap<String, String>,
    backend_pid: i32,
}

impl PgConnection {
    /// Connect and authenticate.
    ///
    /// # Errors
    ///
    /// Fails on TCP errors, unsupported authentication schemes, rejected
    /// credentials, or protocol violations during the handshake.
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        tracing::debug!(host = %config.host, port = config.port, db = %config.dbname, "pg connect");
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::with_capacity(8 * 1024),
            state: ConnectionState::Handshaking,
            parameters: HashMap::new(),
            backend_pid: 0,
        };
        conn.handshake(config).await?;
        Ok(conn)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection can accept an operation.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Server parameter reported at startup (`server_version`, …).
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Backend process id, for diagnostics.
    #[must_use]
    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// Execute `sql` with `params` through the unnamed statement.
    ///
    /// Backend-level SQL errors land in [`PgResult::error`]; the connection
    /// stays usable. Transport and protocol failures close the connection
    /// and surface as `Err`.
    pub async fn exec(&mut self, sql: &str, params: &[PgValue]) -> Result<PgResult> {
        self.ensure_ready()?;
        self.state = ConnectionState::Busy;

        let oids: Vec<u32> = params.iter().map(PgValue::type_oid).collect();
        encode::parse(&mut self.write_buf, "", sql, &oids);
        encode::bind(&mut self.write_buf, "", "", params);
        encode::describe_portal(&mut self.write_buf, "");
        encode::execute(&mut self.write_buf, "", 0);
        encode::sync(&mut self.write_buf);
        self.flush().await?;

        self.collect_result().await
    }

    /// Parse `sql` into the named prepared statement `name`.
    ///
    /// # Errors
    ///
    /// A backend rejection (bad SQL) surfaces as [`Error::Backend`]; the
    /// connection stays usable.
    pub async fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        self.ensure_ready()?;
        self.state = ConnectionState::Busy;

        encode::parse(&mut self.write_buf, name, sql, &[]);
        encode::sync(&mut self.write_buf);
        self.flush().await?;

        let result = self.collect_result().await?;
        match result.error {
            Some(e) => Err(Error::Backend {
                code:    e.code,
                message: e.message,
            }),
            None => Ok(()),
        }
    }

    /// Execute a previously prepared statement.
    pub async fn exec_prepared(&mut self, name: &str, params: &[PgValue]) -> Result<PgResult> {
        self.ensure_ready()?;
        self.state = ConnectionState::Busy;

        encode::bind(&mut self.write_buf, "", name, params);
        encode::describe_portal(&mut self.write_buf, "");
        encode::execute(&mut self.write_buf, "", 0);
        encode::sync(&mut self.write_buf);
        self.flush().await?;

        self.collect_result().await
    }

    /// Discard the reply of a cancelled in-flight operation.
    ///
    /// A caller that dropped an `exec` future after the request was
    /// written leaves the connection `Busy` with a reply pending on the
    /// wire. Reading through to the next ReadyForQuery restores `Ready`
    /// without desynchronizing the stream.
    pub async fn resync(&mut self) -> Result<()> {
        if self.state != ConnectionState::Busy {
            return Ok(());
        }
        let discarded = self.collect_result().await?;
        tracing::debug!(rows = discarded.rows.len(), "discarded cancelled reply");
        Ok(())
    }

    /// Orderly shutdown: send Terminate and close the socket.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closing;
        encode::terminate(&mut self.write_buf);
        let _ = self.flush().await;
        let _ = self.stream.shutdown().await;
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == ConnectionState::Ready {
            Ok(())
        } else {
            Err(ConnectionError::Closed.into())
        }
    }

    fn teardown(&mut self, msg: impl Into<String>) -> Error {
        self.state = ConnectionState::Closed;
        ConnectionError::Protocol(msg.into()).into()
    }

    async fn handshake(&mut self, config: &PgConfig) -> Result<()> {
        encode::startup(&mut self.write_buf, &config.user, &config.dbname);
        self.flush().await?;

        let mut scram: Option<ScramFlow> = None;
        loop {
            match self.read_message().await? {
                BackendMessage::Authentication(req) => {
                    self.handle_auth(req, config, &mut scram).await?;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.backend_pid = process_id;
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(message = %notice.message, "startup notice");
                }
                BackendMessage::ErrorResponse(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(ConnectionError::Auth(e.message).into());
                }
                BackendMessage::ReadyForQuery { .. } => {
                    self.state = ConnectionState::Ready;
                    tracing::debug!(pid = self.backend_pid, "pg connection ready");
                    return Ok(());
                }
                other => {
                    return Err(self.teardown(format!(
                        "unexpected message during handshake: {other:?}"
                    )));
                }
            }
        }
    }

    async fn handle_auth(
        &mut self,
        req: AuthRequest,
        config: &PgConfig,
        scram: &mut Option<ScramFlow>,
    ) -> Result<()> {
        match req {
            AuthRequest::Ok => Ok(()),
            AuthRequest::CleartextPassword => {
                let password = require_password(config)?;
                encode::password(&mut self.write_buf, password);
                self.flush().await
            }
            AuthRequest::Sasl { mechanisms } => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(ConnectionError::Auth(format!(
                        "no supported SASL mechanism in {mechanisms:?}"
                    ))
                    .into());
                }
                let flow = ScramFlow::new(require_password(config)?);
                let first = flow.first_message();
                encode::sasl_initial(&mut self.write_buf, SCRAM_SHA_256, first.as_bytes());
                *scram = Some(flow);
                self.flush().await
            }
            AuthRequest::SaslContinue { data } => {
                let Some(flow) = scram.as_mut() else {
                    return Err(self.teardown("SASL continue outside an exchange"));
                };
                let server_first = std::str::from_utf8(&data)
                    .map_err(|_| ConnectionError::Protocol("non-utf8 SASL payload".into()))?;
                let response = flow.continue_with(server_first)?;
                encode::sasl_response(&mut self.write_buf, response.as_bytes());
                self.flush().await
            }
            AuthRequest::SaslFinal { data } => {
                let Some(flow) = scram.as_ref() else {
                    return Err(self.teardown("SASL final outside an exchange"));
                };
                let server_final = std::str::from_utf8(&data)
                    .map_err(|_| ConnectionError::Protocol("non-utf8 SASL payload".into()))?;
                flow.finish(server_final)
            }
            AuthRequest::Md5Password => {
                Err(ConnectionError::Auth("md5 password authentication is not supported".into())
                    .into())
            }
            AuthRequest::Other(code) => {
                Err(ConnectionError::Auth(format!("unsupported authentication scheme {code}"))
                    .into())
            }
        }
    }

    /// Read frames until the backend signals ReadyForQuery, assembling the
    /// result along the way.
    async fn collect_result(&mut self) -> Result<PgResult> {
        let mut result = PgResult::default();
        let mut desc: Option<Rc<Vec<FieldDescription>>> = None;

        loop {
            match self.read_message().await? {
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::CloseComplete
                | BackendMessage::NoData
                | BackendMessage::ParameterDescription(_)
                | BackendMessage::PortalSuspended
                | BackendMessage::EmptyQueryResponse => {}
                BackendMessage::RowDescription(fields) => {
                    desc = Some(Rc::new(fields));
                }
                BackendMessage::DataRow(columns) => {
                    let Some(fields) = desc.clone() else {
                        return Err(self.teardown("DataRow before RowDescription"));
                    };
                    if columns.len() != fields.len() {
                        return Err(self.teardown("DataRow column count mismatch"));
                    }
                    let mut values = Vec::with_capacity(columns.len());
                    for (column, field) in columns.into_iter().zip(fields.iter()) {
                        let value = match column {
                            None => PgValue::Null,
                            Some(raw) => match PgValue::decode_text(field.type_oid, &raw) {
                                Ok(v) => v,
                                Err(e) => {
                                    self.state = ConnectionState::Closed;
                                    return Err(e);
                                }
                            },
                        };
                        values.push(value);
                    }
                    result.rows.push(PgRow::new(fields, values));
                }
                BackendMessage::CommandComplete { tag } => {
                    result.command_tag = Some(tag);
                }
                BackendMessage::ErrorResponse(e) => {
                    tracing::debug!(code = %e.code, message = %e.message, "backend error");
                    result.error = Some(e);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!(message = %notice.message, "notice");
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::ReadyForQuery { .. } => {
                    self.state = ConnectionState::Ready;
                    return Ok(result);
                }
                other => {
                    return Err(self.teardown(format!(
                        "unexpected message during query: {other:?}"
                    )));
                }
            }
        }
    }

    async fn read_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&mut self.read_buf) {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => {}
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            }
            let read = self.stream.read_buf(&mut self.read_buf).await;
            match read {
                Ok(0) => {
                    self.state = ConnectionState::Closed;
                    return Err(ConnectionError::Lost("unexpected eof".into()).into());
                }
                Ok(_) => {}
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(e.into());
                }
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        let buf = self.write_buf.split();
        if let Err(e) = self.stream.write_all(&buf).await {
            self.state = ConnectionState::Closed;
            return Err(e.into());
        }
        if let Err(e) = self.stream.flush().await {
            self.state = ConnectionState::Closed;
            return Err(e.into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("state", &self.state)
            .field("backend_pid", &self.backend_pid)
            .finish()
    }
}

fn require_password(config: &PgConfig) -> Result<&str> {
    config
        .password
        .as_deref()
        .ok_or_else(|| ConnectionError::Auth("server requires a password, none configured".into()).into())
}
