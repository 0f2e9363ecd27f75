//! Shared test harness: a scripted in-memory cluster.
//!
//! The fake connector records which endpoint served every statement,
//! reports configurable replication positions, and can take the primary
//! down with a vendor connection-loss code.

use async_trait::async_trait;
use rwsplit::{
    Clock, Config, Connection, Connector, DriverError, Endpoint, QueryResults, QueryRow, Role,
    Router,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// MySQL client code for "server has gone away".
pub const CR_SERVER_GONE_ERROR: u32 = 2006;
/// MySQL client code for "can't connect to server".
pub const CR_CONN_HOST_ERROR: u32 = 2003;

#[derive(Default)]
struct ClusterState {
    primary_down: AtomicBool,
    primary_connect_attempts: AtomicUsize,
    primary_position: Mutex<Option<Clock>>,
    replica_positions: Mutex<HashMap<String, Clock>>,
    replica_dead: Mutex<HashMap<String, bool>>,
    fail_next_primary: Mutex<Option<(u32, String)>>,
    statements: Mutex<Vec<(String, String)>>,
}

/// Handle onto the scripted cluster, shared with every fake connection.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            state: Arc::clone(&self.state),
        }
    }

    pub fn set_primary_down(&self, down: bool) {
        self.state.primary_down.store(down, Ordering::SeqCst);
    }

    pub fn set_primary_position(&self, clock: Clock) {
        *self.state.primary_position.lock().unwrap() = Some(clock);
    }

    pub fn set_replica_position(&self, host: &str, clock: Clock) {
        self.state
            .replica_positions
            .lock()
            .unwrap()
            .insert(host.to_owned(), clock);
    }

    pub fn set_replica_dead(&self, host: &str, dead: bool) {
        self.state
            .replica_dead
            .lock()
            .unwrap()
            .insert(host.to_owned(), dead);
    }

    /// Makes the next primary-side statement fail with the given vendor
    /// code, without taking the primary down.
    pub fn fail_next_primary_statement(&self, code: u32, message: &str) {
        *self.state.fail_next_primary.lock().unwrap() = Some((code, message.to_owned()));
    }

    pub fn primary_connect_attempts(&self) -> usize {
        self.state.primary_connect_attempts.load(Ordering::SeqCst)
    }

    /// Host that served the most recent occurrence of `statement`.
    pub fn served_by(&self, statement: &str) -> Option<String> {
        self.state
            .statements
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, s)| s == statement)
            .map(|(host, _)| host.clone())
    }
}

pub struct FakeConnector {
    state: Arc<ClusterState>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Conn = FakeConnection;

    async fn connect(
        &self,
        _adapter: &str,
        endpoint: &Endpoint,
        role: Role,
    ) -> Result<FakeConnection, DriverError> {
        if role == Role::Primary {
            self.state
                .primary_connect_attempts
                .fetch_add(1, Ordering::SeqCst);
            if self.state.primary_down.load(Ordering::SeqCst) {
                return Err(DriverError::with_code(
                    CR_CONN_HOST_ERROR,
                    format!("can't connect to server on '{}'", endpoint),
                ));
            }
        }
        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            host: endpoint.host.clone(),
            role,
        })
    }
}

pub struct FakeConnection {
    state: Arc<ClusterState>,
    host: String,
    role: Role,
}

impl FakeConnection {
    fn check_primary_up(&self) -> Result<(), DriverError> {
        if self.role == Role::Primary && self.state.primary_down.load(Ordering::SeqCst) {
            return Err(DriverError::with_code(
                CR_SERVER_GONE_ERROR,
                "server has gone away",
            ));
        }
        Ok(())
    }

    fn record(&self, statement: &str) {
        self.state
            .statements
            .lock()
            .unwrap()
            .push((self.host.clone(), statement.to_owned()));
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(&self, statement: &str) -> Result<QueryResults, DriverError> {
        self.check_primary_up()?;
        if self.role == Role::Primary {
            if let Some((code, message)) = self.state.fail_next_primary.lock().unwrap().take() {
                return Err(DriverError::with_code(code, message));
            }
        }
        self.record(statement);
        Ok(QueryResults {
            rows: vec![QueryRow {
                values: vec![self.host.clone()],
            }],
        })
    }

    async fn begin(&self) -> Result<(), DriverError> {
        self.check_primary_up()?;
        self.record("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> Result<(), DriverError> {
        self.check_primary_up()?;
        self.record("COMMIT");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        self.check_primary_up()?;
        self.record("ROLLBACK");
        Ok(())
    }

    async fn probe_liveness(&self) -> bool {
        match self.role {
            Role::Primary => !self.state.primary_down.load(Ordering::SeqCst),
            Role::Replica => !self
                .state
                .replica_dead
                .lock()
                .unwrap()
                .get(&self.host)
                .copied()
                .unwrap_or(false),
        }
    }

    async fn current_position(&self) -> Result<Option<Clock>, DriverError> {
        match self.role {
            Role::Primary => {
                self.check_primary_up()?;
                Ok(self.state.primary_position.lock().unwrap().clone())
            }
            Role::Replica => Ok(self
                .state
                .replica_positions
                .lock()
                .unwrap()
                .get(&self.host)
                .cloned()),
        }
    }
}

/// Configuration for a cluster with hosts `primary`, `replica1`..`replicaN`.
pub fn config(replicas: usize) -> Config {
    Config {
        primary: Endpoint::new("primary", 3306),
        replicas: (1..=replicas)
            .map(|i| Endpoint::new(format!("replica{}", i), 3306))
            .collect(),
        disable_connection_probe: false,
        adapter: "mysql".to_owned(),
        rng_seed: Some(42),
    }
}

pub async fn make_router(replicas: usize) -> (Router<FakeConnector>, FakeCluster) {
    let _ = pretty_env_logger::try_init();
    let cluster = FakeCluster::new();
    let router = Router::connect(config(replicas), cluster.connector())
        .await
        .unwrap();
    (router, cluster)
}
