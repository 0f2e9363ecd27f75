//! Collaborator connection surface.
//!
//! The router does not speak any database protocol itself. The embedding
//! application implements [`Connector`] and [`Connection`] on top of its
//! driver of choice; the router only decides *which* connection a call
//! goes to.

use crate::clock::Clock;
use crate::errors::DriverError;
use async_trait::async_trait;
use std::fmt;

/// Network address of one database server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates a new endpoint descriptor.
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role of a connection within the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The single writable instance.
    Primary,
    /// A read-only instance replicating from the primary.
    Replica,
}

/// Column values of one result row.
#[derive(Clone, Debug, Default)]
pub struct QueryRow {
    /// Column values of the row.
    pub values: Vec<String>,
}

impl QueryRow {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }
}

/// Rows returned by a statement.
#[derive(Clone, Debug, Default)]
pub struct QueryResults {
    /// Result rows in server order.
    pub rows: Vec<QueryRow>,
}

/// One established database session.
///
/// Any call may fail with a [`DriverError`]; the router classifies the
/// failure and either clears the primary slot, falls back, or passes the
/// error through untouched.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Executes a statement and returns its rows.
    async fn execute(&self, statement: &str) -> Result<QueryResults, DriverError>;

    /// Opens a transaction.
    async fn begin(&self) -> Result<(), DriverError>;

    /// Commits the open transaction.
    async fn commit(&self) -> Result<(), DriverError>;

    /// Rolls back the open transaction.
    async fn rollback(&self) -> Result<(), DriverError>;

    /// Cheap liveness probe. `true` if the session is usable.
    async fn probe_liveness(&self) -> bool;

    /// Self-reported replication position: the "show primary status"
    /// equivalent on the primary, the "show replica status" equivalent on
    /// a replica. `Ok(None)` when the server reports no position.
    async fn current_position(&self) -> Result<Option<Clock>, DriverError>;
}

/// Factory for [`Connection`]s, implemented by the embedding application.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type this connector produces.
    type Conn: Connection;

    /// Establishes a session to `endpoint` using the named driver
    /// `adapter`, in the given cluster `role`.
    async fn connect(
        &self,
        adapter: &str,
        endpoint: &Endpoint,
        role: Role,
    ) -> Result<Self::Conn, DriverError>;
}
