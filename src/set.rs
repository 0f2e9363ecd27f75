//! Connection set and replica consistency tracking.

use crate::clock::Clock;
use crate::connection::{Connection, Connector, Endpoint, Role};
use crate::errors::{classify, ErrorKind, RouterError};
use crate::router::Config;
use derivative::Derivative;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// The fixed connection set of one cluster: an optional primary handle
/// and a non-empty replica list.
///
/// The primary slot is cleared when a connection loss is detected and
/// re-established lazily, at most one attempt per [`primary`] call. The
/// replica list never changes after construction.
///
/// [`primary`]: ConnectionSet::primary
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub(crate) struct ConnectionSet<C: Connector> {
    #[derivative(Debug = "ignore")]
    connector: C,
    adapter: String,
    primary_endpoint: Endpoint,
    replica_endpoints: Vec<Endpoint>,
    #[derivative(Debug = "ignore")]
    primary: AsyncMutex<Option<Arc<C::Conn>>>,
    #[derivative(Debug = "ignore")]
    replicas: Vec<Arc<C::Conn>>,
    probe_disabled: bool,
    #[derivative(Debug = "ignore")]
    rng: Mutex<StdRng>,
}

impl<C: Connector> ConnectionSet<C> {
    /// Connects to every endpoint in `config`. Replica connect failures
    /// are fatal; a primary connect failure that classifies as connection
    /// loss leaves the slot empty for a lazy retry.
    pub(crate) async fn connect(connector: C, config: &Config) -> Result<Self, RouterError> {
        if config.replicas.is_empty() {
            return Err(RouterError::Configuration(
                "at least one replica endpoint is required".to_owned(),
            ));
        }
        let mut replicas = Vec::with_capacity(config.replicas.len());
        for endpoint in &config.replicas {
            let conn = connector
                .connect(&config.adapter, endpoint, Role::Replica)
                .await?;
            replicas.push(Arc::new(conn));
        }
        let primary = match connector
            .connect(&config.adapter, &config.primary, Role::Primary)
            .await
        {
            Ok(conn) => Some(Arc::new(conn)),
            Err(err) if classify(&err) == ErrorKind::ConnectionLost => {
                warn!(
                    "primary {} unreachable at startup, will reconnect lazily: {}",
                    config.primary, err
                );
                None
            }
            Err(err) => return Err(err.into()),
        };
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            connector,
            adapter: config.adapter.clone(),
            primary_endpoint: config.primary.clone(),
            replica_endpoints: config.replicas.clone(),
            primary: AsyncMutex::new(primary),
            replicas,
            probe_disabled: config.disable_connection_probe,
            rng: Mutex::new(rng),
        })
    }

    /// Returns the live primary handle, attempting exactly one reconnect
    /// if the slot is empty.
    pub(crate) async fn primary(&self) -> Result<Arc<C::Conn>, RouterError> {
        let mut slot = self.primary.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(conn));
        }
        match self
            .connector
            .connect(&self.adapter, &self.primary_endpoint, Role::Primary)
            .await
        {
            Ok(conn) => {
                info!("reconnected to primary {}", self.primary_endpoint);
                let conn = Arc::new(conn);
                *slot = Some(Arc::clone(&conn));
                Ok(conn)
            }
            Err(err) => {
                warn!("primary {} unreachable: {}", self.primary_endpoint, err);
                Err(RouterError::PrimaryUnavailable)
            }
        }
    }

    /// Clears the primary slot so the next [`primary`] call retries a
    /// fresh connect.
    ///
    /// [`primary`]: ConnectionSet::primary
    pub(crate) async fn mark_primary_lost(&self) {
        if self.primary.lock().await.take().is_some() {
            warn!("lost connection to primary {}", self.primary_endpoint);
        }
    }

    /// Picks one replica uniformly at random. Load balancing only; lag
    /// awareness lives in [`ConsistencyChecker`].
    pub(crate) fn pick_replica(&self) -> usize {
        self.rng.lock().unwrap().gen_range(0..self.replicas.len())
    }

    /// The replica handle at `idx`.
    pub(crate) fn replica(&self, idx: usize) -> Arc<C::Conn> {
        Arc::clone(&self.replicas[idx])
    }

    /// The endpoint of the replica at `idx`, for log records.
    pub(crate) fn replica_endpoint(&self, idx: usize) -> &Endpoint {
        &self.replica_endpoints[idx]
    }

    /// `true` if probing is disabled, else `true` only when every held
    /// connection answers a liveness probe.
    pub(crate) async fn is_healthy(&self) -> bool {
        if self.probe_disabled {
            return true;
        }
        let primary = self.primary.lock().await.as_ref().map(Arc::clone);
        if let Some(conn) = primary {
            if !conn.probe_liveness().await {
                return false;
            }
        }
        for conn in &self.replicas {
            if !conn.probe_liveness().await {
                return false;
            }
        }
        true
    }
}

/// Tracks the highest replication position each replica has reported.
///
/// The cache is shared across sessions. Concurrent observers may race;
/// keeping the maximum makes the race benign, since a lost update only
/// yields staleness, never inflated freshness.
#[derive(Debug, Default)]
pub(crate) struct ConsistencyChecker {
    last_seen: Mutex<HashMap<usize, Clock>>,
}

impl ConsistencyChecker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Polls `conn` for its current position. A transient poll failure or
    /// an absent position yields `None` without raising. On success the
    /// cache retains the maximum of the cached and polled values, and
    /// that maximum is returned.
    pub(crate) async fn observe<N: Connection>(&self, idx: usize, conn: &N) -> Option<Clock> {
        match conn.current_position().await {
            Ok(Some(clock)) => Some(self.retain_max(idx, clock)),
            Ok(None) => None,
            Err(err) => {
                debug!("replica {} position poll failed: {}", idx, err);
                None
            }
        }
    }

    /// `true` iff the replica at `idx` is known to have replicated at
    /// least up to `target`, refreshing the cache with one poll if the
    /// cached value is not sufficient.
    pub(crate) async fn is_caught_up<N: Connection>(
        &self,
        idx: usize,
        conn: &N,
        target: &Clock,
    ) -> bool {
        if matches!(self.cached(idx), Some(seen) if seen >= *target) {
            return true;
        }
        matches!(self.observe(idx, conn).await, Some(seen) if seen >= *target)
    }

    fn cached(&self, idx: usize) -> Option<Clock> {
        self.last_seen.lock().unwrap().get(&idx).cloned()
    }

    fn retain_max(&self, idx: usize, clock: Clock) -> Clock {
        let mut cache = self.last_seen.lock().unwrap();
        match cache.get_mut(&idx) {
            Some(seen) => {
                if *seen < clock {
                    *seen = clock;
                }
                seen.clone()
            }
            None => {
                cache.insert(idx, clock.clone());
                clock
            }
        }
    }
}
