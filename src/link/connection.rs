// SPDX-License-Identifier: Apache-2.0

//! Connection handle of a linked table
//!
//! Owns the single remote connection together with its prepared statement
//! cache. Every driver call (connect, prepare, bind, execute, close) and
//! every cache access happens while holding the handle's mutex, so two
//! callers never interleave their calls into the remote driver. The guard is
//! held across network round trips on purpose: the remote connection is not
//! safe for concurrent use.
//!
//! Remote failures are healed by discarding the connection (and every
//! statement prepared on it), reconnecting and retrying, at most
//! [`MAX_RETRY`] extra times.
//!
//! Streamed results ([`ConnectionHandle::stream`]) keep the handle locked
//! until the last row was handed over or the receiver went away.

use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::engine::error::{EngineError, EngineResult, RemoteError};
use crate::engine::traits::{RemoteConnection, RemoteDriver};
use crate::engine::types::{Row, StatementResult, Value};
use crate::link::config::LinkConfig;
use crate::link::introspect::{self, TableMetadata};
use crate::link::statement_cache::StatementCache;

/// Extra attempts after the first failed one.
pub const MAX_RETRY: u32 = 2;

pub type StatementOf<D> = <<D as RemoteDriver>::Connection as RemoteConnection>::Statement;

/// Connection state, checked before every operation.
pub enum LinkState<C> {
    Connected(C),
    /// The last connect failed; the error is replayed until a reconnect.
    Disconnected(EngineError),
    Closed,
}

struct Inner<D: RemoteDriver> {
    link: LinkState<D::Connection>,
    statements: StatementCache<StatementOf<D>>,
    /// Bumped whenever the connection is replaced or closed.
    generation: u64,
}

/// A prepared statement handed out to a caller that still reads its result.
pub struct StatementLease<S> {
    sql: String,
    statement: S,
    generation: u64,
}

impl<S> StatementLease<S> {
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Result of [`ConnectionHandle::execute`].
pub struct Executed<S> {
    pub result: StatementResult,
    /// Present unless the statement went straight back to the cache.
    pub lease: Option<StatementLease<S>>,
}

pub struct ConnectionHandle<D: RemoteDriver> {
    driver: D,
    config: LinkConfig,
    /// Host-side table name, for diagnostics.
    table: String,
    inner: Mutex<Inner<D>>,
}

impl<D: RemoteDriver> ConnectionHandle<D> {
    pub fn new(driver: D, config: LinkConfig, table: impl Into<String>) -> Self {
        Self {
            driver,
            config,
            table: table.into(),
            inner: Mutex::new(Inner {
                link: LinkState::Disconnected(EngineError::connection_failed("Not connected")),
                statements: StatementCache::new(),
                generation: 0,
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Opens a new connection, replacing any previous one, and reads the
    /// remote table's metadata.
    ///
    /// Retries up to [`MAX_RETRY`] times. A final failure is stored and
    /// returned by every later call until the next `connect`.
    #[instrument(skip(self), fields(table = %self.table, driver = self.driver.driver_id()))]
    pub async fn connect(&self) -> EngineResult<TableMetadata> {
        let mut inner = self.inner.lock().await;
        self.connect_locked(&mut inner).await
    }

    /// Runs one statement.
    ///
    /// With `reuse` the prepared statement returns to the cache right away;
    /// otherwise it is leased to the caller, who hands it back through
    /// [`ConnectionHandle::reuse_statement`] once done with the result.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        reuse: bool,
    ) -> EngineResult<Executed<StatementOf<D>>> {
        let mut inner = self.inner.lock().await;
        let mut attempt = 0;
        loop {
            let outcome = {
                let Inner {
                    link, statements, ..
                } = &mut *inner;
                let conn = match link {
                    LinkState::Connected(conn) => conn,
                    LinkState::Disconnected(err) => return Err(err.clone()),
                    LinkState::Closed => return Err(closed_error()),
                };
                self.trace_statement(sql, params);
                run_statement(conn, statements, sql, params).await
            };

            match outcome {
                Ok((statement, result)) => {
                    if reuse {
                        inner.statements.give_back(sql, statement);
                        return Ok(Executed {
                            result,
                            lease: None,
                        });
                    }
                    let lease = StatementLease {
                        sql: sql.to_string(),
                        statement,
                        generation: inner.generation,
                    };
                    return Ok(Executed {
                        result,
                        lease: Some(lease),
                    });
                }
                Err(err) => {
                    if attempt >= MAX_RETRY {
                        warn!(table = %self.table, sql, error = %err, "statement failed, giving up");
                        return Err(EngineError::linked_table_access(sql, &err));
                    }
                    attempt += 1;
                    warn!(
                        table = %self.table,
                        sql,
                        attempt,
                        error = %err,
                        "statement failed, reconnecting"
                    );
                    self.connect_locked(&mut inner).await?;
                }
            }
        }
    }

    /// Runs a query and sends its rows to `rows` while the remote produces
    /// them.
    ///
    /// Failures before the first row are retried like
    /// [`ConnectionHandle::execute`]. A failure after rows were delivered
    /// ends the stream with the wrapped error. The prepared statement goes
    /// back to the cache only if the result was read to the end.
    pub async fn stream(&self, sql: &str, params: &[Value], rows: mpsc::Sender<EngineResult<Row>>) {
        let mut inner = self.inner.lock().await;
        let mut attempt = 0;
        loop {
            let outcome = {
                let Inner {
                    link, statements, ..
                } = &mut *inner;
                let conn = match link {
                    LinkState::Connected(conn) => conn,
                    LinkState::Disconnected(err) => {
                        let _ = rows.send(Err(err.clone())).await;
                        return;
                    }
                    LinkState::Closed => {
                        let _ = rows.send(Err(closed_error())).await;
                        return;
                    }
                };
                self.trace_statement(sql, params);
                stream_statement(conn, statements, sql, params, &rows).await
            };

            let (err, delivered) = match outcome {
                Streamed::Done => return,
                Streamed::Failed { err, delivered } => (err, delivered),
            };
            if rows.is_closed() {
                return;
            }
            if delivered > 0 || attempt >= MAX_RETRY {
                warn!(table = %self.table, sql, delivered, error = %err, "streamed statement failed");
                let _ = rows
                    .send(Err(EngineError::linked_table_access(sql, &err)))
                    .await;
                return;
            }
            attempt += 1;
            warn!(
                table = %self.table,
                sql,
                attempt,
                error = %err,
                "statement failed, reconnecting"
            );
            if let Err(err) = self.connect_locked(&mut inner).await {
                let _ = rows.send(Err(err)).await;
                return;
            }
        }
    }

    /// Returns a leased statement to the cache. Statements prepared on a
    /// connection that has since been replaced are dropped.
    pub async fn reuse_statement(&self, lease: StatementLease<StatementOf<D>>) {
        let mut inner = self.inner.lock().await;
        if lease.generation == inner.generation && matches!(inner.link, LinkState::Connected(_)) {
            inner.statements.give_back(&lease.sql, lease.statement);
        }
    }

    /// Releases the connection and its cached statements. Closing a closed
    /// handle does nothing.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if matches!(inner.link, LinkState::Closed) {
            return;
        }
        discard(&mut inner).await;
        inner.link = LinkState::Closed;
        debug!(table = %self.table, "linked table connection closed");
    }

    pub async fn is_connected(&self) -> bool {
        matches!(self.inner.lock().await.link, LinkState::Connected(_))
    }

    /// The stored connect failure, if the handle is disconnected.
    pub async fn last_error(&self) -> Option<EngineError> {
        match &self.inner.lock().await.link {
            LinkState::Disconnected(err) => Some(err.clone()),
            _ => None,
        }
    }

    pub async fn cached_statements(&self) -> usize {
        self.inner.lock().await.statements.len()
    }

    async fn connect_locked(&self, inner: &mut Inner<D>) -> EngineResult<TableMetadata> {
        discard(inner).await;
        let mut attempt = 0;
        loop {
            match self.open_and_introspect().await {
                Ok((conn, metadata)) => {
                    inner.link = LinkState::Connected(conn);
                    info!(
                        table = %self.table,
                        remote = %metadata.qualified_name,
                        attempt,
                        "linked table connected"
                    );
                    return Ok(metadata);
                }
                Err(err) if err.is_retryable() && attempt < MAX_RETRY => {
                    attempt += 1;
                    warn!(table = %self.table, attempt, error = %err, "connect failed, retrying");
                }
                Err(err) => {
                    warn!(table = %self.table, error = %err, "connect failed");
                    inner.link = LinkState::Disconnected(err.clone());
                    return Err(err);
                }
            }
        }
    }

    async fn open_and_introspect(&self) -> EngineResult<(D::Connection, TableMetadata)> {
        let mut conn = self
            .driver
            .open(&self.config)
            .await
            .map_err(|e| EngineError::connection_failed(e.to_string()))?;
        match introspect::read_metadata(&mut conn, &self.config).await {
            Ok(metadata) => Ok((conn, metadata)),
            Err(err) => {
                conn.close().await;
                Err(err)
            }
        }
    }

    fn trace_statement(&self, sql: &str, params: &[Value]) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        let mut text = format!("{}:\n{}", self.table, sql);
        if !params.is_empty() {
            let bound: Vec<String> = params
                .iter()
                .enumerate()
                .map(|(i, v)| format!("{}: {}", i + 1, v.sql_literal()))
                .collect();
            text.push_str(&format!(" {{{}}}", bound.join(", ")));
        }
        text.push(';');
        debug!("{}", text);
    }
}

/// Closes the current connection (if any) and forgets its statements.
async fn discard<D: RemoteDriver>(inner: &mut Inner<D>) {
    inner.statements.clear();
    inner.generation += 1;
    let previous = std::mem::replace(
        &mut inner.link,
        LinkState::Disconnected(EngineError::connection_failed("Not connected")),
    );
    if let LinkState::Connected(mut conn) = previous {
        conn.close().await;
    }
}

async fn run_statement<C: RemoteConnection>(
    conn: &mut C,
    statements: &mut StatementCache<C::Statement>,
    sql: &str,
    params: &[Value],
) -> Result<(C::Statement, StatementResult), RemoteError> {
    let mut statement = match statements.checkout(sql) {
        Some(statement) => statement,
        None => conn.prepare(sql).await?,
    };
    let result = conn.execute(&mut statement, params).await?;
    Ok((statement, result))
}

enum Streamed {
    /// Every row was handed over, or the receiver stopped listening.
    Done,
    Failed { err: RemoteError, delivered: usize },
}

async fn stream_statement<C: RemoteConnection>(
    conn: &mut C,
    statements: &mut StatementCache<C::Statement>,
    sql: &str,
    params: &[Value],
    rows: &mpsc::Sender<EngineResult<Row>>,
) -> Streamed {
    let mut statement = match statements.checkout(sql) {
        Some(statement) => statement,
        None => match conn.prepare(sql).await {
            Ok(statement) => statement,
            Err(err) => return Streamed::Failed { err, delivered: 0 },
        },
    };

    let mut delivered = 0;
    let mut exhausted = true;
    {
        let mut fetched = conn.fetch(&mut statement, params);
        while let Some(next) = fetched.next().await {
            match next {
                Ok(row) => {
                    if rows.send(Ok(row)).await.is_err() {
                        exhausted = false;
                        break;
                    }
                    delivered += 1;
                }
                Err(err) => return Streamed::Failed { err, delivered },
            }
        }
    }
    if exhausted {
        statements.give_back(sql, statement);
    }
    Streamed::Done
}

fn closed_error() -> EngineError {
    EngineError::connection_failed("Linked table connection is closed")
}
