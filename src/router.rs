//! Router and per-session routing state machine.

use crate::clock::Clock;
use crate::connection::{Connection, Connector, Endpoint, QueryResults};
use crate::errors::{classify, DriverError, ErrorKind, RouterError};
use crate::set::{ConnectionSet, ConsistencyChecker};
use derivative::Derivative;
use futures::future::BoxFuture;
use log::{debug, warn};
use std::collections::VecDeque;
use std::sync::Arc;

/// Router configuration, consumed at construction.
#[derive(Clone, Debug)]
pub struct Config {
    /// Endpoint of the writable primary.
    pub primary: Endpoint,
    /// Endpoints of the read-only replicas. Must be non-empty.
    pub replicas: Vec<Endpoint>,
    /// Disables the liveness probe in [`Router::is_healthy`].
    pub disable_connection_probe: bool,
    /// Driver/dialect identifier handed to the [`Connector`] when
    /// establishing sessions.
    pub adapter: String,
    /// Seed for the replica-picking RNG. Set it for deterministic replica
    /// selection in tests; leave `None` in production.
    pub rng_seed: Option<u64>,
}

/// Which connection a stack entry refers to.
///
/// Routes are resolved to handles at call time, so a `Primary` entry
/// observed after a reconnect resolves to the fresh connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Primary,
    Replica(usize),
}

/// Fallback policy of one primary-targeting operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fallback {
    /// Surface `PrimaryUnavailable` on connection loss.
    Deny,
    /// Retry the call once on a randomly picked replica.
    Replica,
}

type CommitCallback<'r, C> =
    Box<dyn FnOnce(&mut Session<'r, C>, Option<&Clock>) + Send + Sync + 'r>;
type RollbackCallback<'r, C> = Box<dyn FnOnce(&mut Session<'r, C>) + Send + Sync + 'r>;

/// The query router: owns the cluster's connection set and the shared
/// replica freshness cache.
///
/// A `Router` is created once and shared across logical threads of
/// execution; each unit of work obtains its own [`Session`] from
/// [`Router::session`].
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Router<C: Connector> {
    set: ConnectionSet<C>,
    checker: ConsistencyChecker,
}

impl<C: Connector> Router<C> {
    /// Connects to every configured endpoint and builds the router.
    ///
    /// Fails with [`RouterError::Configuration`] if the replica list is
    /// empty. Replica connect failures are fatal; an unreachable primary
    /// is tolerated and reconnected lazily.
    pub async fn connect(config: Config, connector: C) -> Result<Self, RouterError> {
        let set = ConnectionSet::connect(connector, &config).await?;
        Ok(Self {
            set,
            checker: ConsistencyChecker::new(),
        })
    }

    /// Creates a fresh session for one logical unit of work.
    pub fn session(&self) -> Session<'_, C> {
        Session::new(self)
    }

    /// `true` if health probing is disabled by configuration, else `true`
    /// only if every held connection answers a liveness probe.
    pub async fn is_healthy(&self) -> bool {
        self.set.is_healthy().await
    }
}

/// Per-logical-thread routing state: the active-connection stack, the
/// transaction flag, the tracked clock, and the commit/rollback callback
/// queues.
///
/// A session is owned by exactly one unit of work (one request, one job)
/// and is never shared; create a new one per unit, or call
/// [`reset`](Session::reset) at the boundary between units.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Session<'r, C: Connector> {
    router: &'r Router<C>,
    stack: Vec<Route>,
    tx_open: bool,
    current_clock: Option<Clock>,
    #[derivative(Debug = "ignore")]
    commit_callbacks: VecDeque<CommitCallback<'r, C>>,
    #[derivative(Debug = "ignore")]
    rollback_callbacks: VecDeque<RollbackCallback<'r, C>>,
}

impl<'r, C: Connector> Session<'r, C> {
    fn new(router: &'r Router<C>) -> Self {
        let stack = vec![Route::Replica(router.set.pick_replica())];
        Self {
            router,
            stack,
            tx_open: false,
            current_clock: None,
            commit_callbacks: VecDeque::new(),
            rollback_callbacks: VecDeque::new(),
        }
    }

    /// The last clock observed after a write in this session, if any.
    pub fn current_clock(&self) -> Option<&Clock> {
        self.current_clock.as_ref()
    }

    /// `true` while a write transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.tx_open
    }

    /// Clears all per-session state: the connection stack, the
    /// transaction flag, the tracked clock, and both callback queues.
    ///
    /// Call this at the boundary between independent units of work when a
    /// session is reused, so stale pinning and callbacks never leak from
    /// one unit into the next.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.stack.push(Route::Replica(self.router.set.pick_replica()));
        self.tx_open = false;
        self.current_clock = None;
        self.commit_callbacks.clear();
        self.rollback_callbacks.clear();
    }

    /// Runs `op` with the primary as the active connection.
    ///
    /// The primary is pushed onto the session's connection stack for the
    /// duration of `op` and popped on exit, also on failure.
    pub async fn with_primary<T, F>(&mut self, op: F) -> Result<T, RouterError>
    where
        F: for<'s> FnOnce(&'s mut Session<'r, C>) -> BoxFuture<'s, Result<T, RouterError>>,
    {
        self.scoped(Route::Primary, op).await
    }

    /// Runs `op` with a randomly picked replica as the active connection.
    ///
    /// While a transaction is open, reads inside the scope are still
    /// served by the primary: read-your-own-write correctness overrides
    /// the requested scope.
    pub async fn with_replica<T, F>(&mut self, op: F) -> Result<T, RouterError>
    where
        F: for<'s> FnOnce(&'s mut Session<'r, C>) -> BoxFuture<'s, Result<T, RouterError>>,
    {
        let route = Route::Replica(self.router.set.pick_replica());
        self.scoped(route, op).await
    }

    /// Runs `op` against a replica known to have replicated at least up
    /// to `target` (equality counts), falling back to the primary when no
    /// transaction-free caught-up replica is at hand.
    ///
    /// Returns `op`'s value together with the achieved clock: the
    /// session's tracked clock when that is at least `target` (a write
    /// inside the scope raises it), otherwise `target` unchanged.
    pub async fn with_consistency<T, F>(
        &mut self,
        target: Clock,
        op: F,
    ) -> Result<(T, Clock), RouterError>
    where
        F: for<'s> FnOnce(&'s mut Session<'r, C>) -> BoxFuture<'s, Result<T, RouterError>>,
    {
        let route = if self.tx_open {
            Route::Primary
        } else {
            let idx = self.router.set.pick_replica();
            let conn = self.router.set.replica(idx);
            if self
                .router
                .checker
                .is_caught_up(idx, conn.as_ref(), &target)
                .await
            {
                Route::Replica(idx)
            } else {
                debug!(
                    "replica {} behind {}, reading from primary",
                    self.router.set.replica_endpoint(idx),
                    target
                );
                Route::Primary
            }
        };
        let value = self.scoped(route, op).await?;
        let achieved = match &self.current_clock {
            Some(clock) if *clock >= target => clock.clone(),
            _ => target,
        };
        Ok((value, achieved))
    }

    /// Executes a read statement on the currently active connection.
    ///
    /// Routing: primary while a transaction is open; otherwise the top of
    /// the connection stack; otherwise a freshly picked replica. Failures
    /// propagate verbatim.
    pub async fn select(&self, statement: &str) -> Result<QueryResults, RouterError> {
        let route = self.connection_for_read();
        let conn = self.resolve(route).await?;
        conn.execute(statement).await.map_err(RouterError::from)
    }

    /// Executes a write statement on the primary. Never falls back.
    ///
    /// On success outside an open transaction the session's tracked clock
    /// is raised to the primary's resulting position and every later read
    /// in this session is pinned to the primary.
    pub async fn execute_write(&mut self, statement: &str) -> Result<QueryResults, RouterError> {
        let statement = statement.to_owned();
        let results = self
            .on_primary(Fallback::Deny, move |conn| {
                let statement = statement.clone();
                Box::pin(async move { conn.execute(&statement).await })
            })
            .await?;
        if !self.tx_open {
            self.track_primary_clock().await;
            self.pin_to_primary();
        }
        Ok(results)
    }

    /// Runs a low-risk metadata/introspection statement, preferring the
    /// primary.
    ///
    /// This is the fallback-eligible path: on a detected primary
    /// connection loss the call is retried once on a replica, observable
    /// only as a warning. Write paths never take this route.
    pub async fn metadata_query(&self, statement: &str) -> Result<QueryResults, RouterError> {
        let statement = statement.to_owned();
        self.on_primary(Fallback::Replica, move |conn| {
            let statement = statement.clone();
            Box::pin(async move { conn.execute(&statement).await })
        })
        .await
    }

    /// Opens a write transaction on the primary.
    ///
    /// While the transaction is open every read in this session is served
    /// by the primary, whatever scope is requested.
    pub async fn begin_transaction(&mut self) -> Result<(), RouterError> {
        self.on_primary(Fallback::Deny, |conn| {
            Box::pin(async move { conn.begin().await })
        })
        .await?;
        self.tx_open = true;
        Ok(())
    }

    /// Commits the open transaction on the primary.
    ///
    /// On success the commit callbacks are drained strictly in FIFO
    /// order, each invoked with the session's tracked clock; a callback
    /// enqueued while another runs is drained in the same pass.
    pub async fn commit(&mut self) -> Result<(), RouterError> {
        self.on_primary(Fallback::Deny, |conn| {
            Box::pin(async move { conn.commit().await })
        })
        .await?;
        self.tx_open = false;
        // A completed commit is a completed write: track the resulting
        // clock and keep using the primary.
        self.track_primary_clock().await;
        self.pin_to_primary();
        let clock = self.current_clock.clone();
        while let Some(callback) = self.commit_callbacks.pop_front() {
            callback(self, clock.as_ref());
        }
        Ok(())
    }

    /// Rolls back the open transaction on the primary.
    ///
    /// Pending commit callbacks are discarded unexecuted; the rollback
    /// callbacks are then drained strictly in FIFO order.
    pub async fn rollback(&mut self) -> Result<(), RouterError> {
        self.commit_callbacks.clear();
        self.on_primary(Fallback::Deny, |conn| {
            Box::pin(async move { conn.rollback().await })
        })
        .await?;
        self.tx_open = false;
        while let Some(callback) = self.rollback_callbacks.pop_front() {
            callback(self);
        }
        Ok(())
    }

    /// Registers a callback to run after the next successful commit.
    pub fn on_commit<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Session<'r, C>, Option<&Clock>) + Send + Sync + 'r,
    {
        self.commit_callbacks.push_back(Box::new(callback));
    }

    /// Registers a callback to run after the next rollback.
    pub fn on_rollback<F>(&mut self, callback: F)
    where
        F: FnOnce(&mut Session<'r, C>) + Send + Sync + 'r,
    {
        self.rollback_callbacks.push_back(Box::new(callback));
    }

    fn connection_for_read(&self) -> Route {
        if self.tx_open {
            return Route::Primary;
        }
        match self.stack.last() {
            Some(route) => *route,
            None => Route::Replica(self.router.set.pick_replica()),
        }
    }

    async fn resolve(&self, route: Route) -> Result<Arc<C::Conn>, RouterError> {
        match route {
            Route::Primary => self.router.set.primary().await,
            Route::Replica(idx) => Ok(self.router.set.replica(idx)),
        }
    }

    async fn scoped<T, F>(&mut self, route: Route, op: F) -> Result<T, RouterError>
    where
        F: for<'s> FnOnce(&'s mut Session<'r, C>) -> BoxFuture<'s, Result<T, RouterError>>,
    {
        self.stack.push(route);
        let result = op(self).await;
        // A write inside the scope may have collapsed the stack to the
        // single pinned primary entry; pop only when deeper so the pin
        // survives the scope.
        if self.stack.len() > 1 {
            self.stack.pop();
        }
        result
    }

    /// Runs `call` against the primary, applying the declared fallback
    /// policy on a classified connection loss. Unclassified failures
    /// propagate unchanged.
    async fn on_primary<T, F>(&self, fallback: Fallback, call: F) -> Result<T, RouterError>
    where
        F: Fn(Arc<C::Conn>) -> BoxFuture<'static, Result<T, DriverError>>,
    {
        let conn = match self.router.set.primary().await {
            Ok(conn) => conn,
            Err(RouterError::PrimaryUnavailable) if fallback == Fallback::Replica => {
                return self.fallback_to_replica(&call).await;
            }
            Err(err) => return Err(err),
        };
        match call(conn).await {
            Ok(value) => Ok(value),
            Err(err) => match classify(&err) {
                ErrorKind::ConnectionLost => {
                    self.router.set.mark_primary_lost().await;
                    match fallback {
                        Fallback::Replica => self.fallback_to_replica(&call).await,
                        Fallback::Deny => Err(RouterError::PrimaryUnavailable),
                    }
                }
                ErrorKind::Other => Err(err.into()),
            },
        }
    }

    async fn fallback_to_replica<T, F>(&self, call: &F) -> Result<T, RouterError>
    where
        F: Fn(Arc<C::Conn>) -> BoxFuture<'static, Result<T, DriverError>>,
    {
        let idx = self.router.set.pick_replica();
        warn!(
            "primary unavailable, retrying on replica {}",
            self.router.set.replica_endpoint(idx)
        );
        call(self.router.set.replica(idx))
            .await
            .map_err(RouterError::from)
    }

    async fn track_primary_clock(&mut self) {
        let conn = match self.router.set.primary().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        match conn.current_position().await {
            Ok(Some(clock)) => {
                if !matches!(&self.current_clock, Some(seen) if *seen >= clock) {
                    self.current_clock = Some(clock);
                }
            }
            Ok(None) => {}
            Err(err) => debug!("primary position poll failed: {}", err),
        }
    }

    fn pin_to_primary(&mut self) {
        self.stack.clear();
        self.stack.push(Route::Primary);
    }
}
