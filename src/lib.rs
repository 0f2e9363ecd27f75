//! rwsplit is a read/write splitting query router for primary/replica
//! database clusters: one writable primary, N read-only replicas.
//!
//! ## Getting Started
//!
//! The router sits between application code and the cluster. Writes always
//! go to the primary; reads are distributed across replicas. A caller that
//! needs read-your-own-write freshness can hand the router a consistency
//! token (a [`Clock`], a replication position) and the router serves the
//! read from a replica only when that replica has replicated at least up
//! to the token, falling back to the primary otherwise. Once a write
//! transaction is open, every read in the same logical unit of work is
//! pinned to the primary. When the primary becomes unreachable the router
//! degrades gracefully: the broken handle is dropped, later calls retry a
//! fresh connection, and a small set of low-risk metadata reads silently
//! fall back to a replica.
//!
//! The router does not speak any database protocol itself: the embedding
//! application implements the [`Connector`] and [`Connection`] traits on
//! top of its driver of choice, and the router only decides which
//! connection each call goes to.
//!
//! Embedding the router looks like this:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use rwsplit::{
//!     Clock, Config, Connection, Connector, DriverError, Endpoint, QueryResults, Role, Router,
//! };
//!
//! struct MyConnection; // wraps your driver's session
//!
//! #[async_trait]
//! impl Connection for MyConnection {
//!     async fn execute(&self, _statement: &str) -> Result<QueryResults, DriverError> {
//!         todo!()
//!     }
//!     async fn begin(&self) -> Result<(), DriverError> {
//!         todo!()
//!     }
//!     async fn commit(&self) -> Result<(), DriverError> {
//!         todo!()
//!     }
//!     async fn rollback(&self) -> Result<(), DriverError> {
//!         todo!()
//!     }
//!     async fn probe_liveness(&self) -> bool {
//!         true
//!     }
//!     async fn current_position(&self) -> Result<Option<Clock>, DriverError> {
//!         todo!()
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     type Conn = MyConnection;
//!     async fn connect(
//!         &self,
//!         _adapter: &str,
//!         _endpoint: &Endpoint,
//!         _role: Role,
//!     ) -> Result<MyConnection, DriverError> {
//!         Ok(MyConnection)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config {
//!         primary: Endpoint::new("db-primary", 3306),
//!         replicas: vec![
//!             Endpoint::new("db-replica-1", 3306),
//!             Endpoint::new("db-replica-2", 3306),
//!         ],
//!         disable_connection_probe: false,
//!         adapter: "mysql".to_owned(),
//!         rng_seed: None,
//!     };
//!     let router = Router::connect(config, MyConnector).await?;
//!
//!     // One session per logical unit of work (e.g. per request).
//!     let mut session = router.session();
//!     session
//!         .execute_write("INSERT INTO users (name) VALUES ('ada')")
//!         .await?;
//!     // Reads in this session are now pinned to the primary.
//!     let rows = session.select("SELECT name FROM users").await?;
//!     println!("{:?}", rows);
//!     Ok(())
//! }
//! ```
//!
//! Replica freshness is a heuristic read of the replica's self-reported
//! position, not a proof; the router is not a consensus protocol, not a
//! SQL parser, and not a general-purpose connection pool.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod clock;
pub mod connection;
pub mod errors;
pub mod router;
mod set;

pub use clock::Clock;
pub use connection::{Connection, Connector, Endpoint, QueryResults, QueryRow, Role};
pub use errors::{classify, DriverError, ErrorKind, RouterError};
pub use router::{Config, Router, Session};
