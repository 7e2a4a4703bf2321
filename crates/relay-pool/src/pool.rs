//! Two-tier relay pool with gated, fair checkout
//!
//! Surviving nodes live in one of two queues keyed by their disable deadline:
//! `active` (bounded by `max_concurrent`) and `standby` (unbounded overflow).
//! `acquire` takes a gate permit, pops from `active` (falling back to a
//! blocking pop on `standby`), waits out any disable window, and starts the
//! node if needed. The returned `Lease` puts the node back and frees the
//! permit when dropped.
//!
//! Recovery is lazy: a disabled node is only waited on when it reaches the
//! front of a queue. There is no background sweep task.

use std::collections::HashSet;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use subscription::Endpoint;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::launcher::Launcher;
use crate::node::{Node, check_acl};
use crate::probe::HealthProbe;
use crate::queue::PriorityQueue;

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum simultaneous leases; 0 means one per surviving node
    pub max_concurrent: usize,
    /// Default disable window used by `Pool::disable`
    pub disable_duration: Duration,
    /// Per-node probe timeout at start; zero skips probing entirely
    pub test_timeout: Duration,
    /// Route rules passed to every node
    pub acl: Option<PathBuf>,
    /// Probes in flight at once during start
    pub probe_concurrency: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            disable_duration: Duration::from_secs(60),
            test_timeout: Duration::from_secs(10),
            acl: None,
            probe_concurrency: 10,
        }
    }
}

type Tier = PriorityQueue<Arc<Node>, Option<Instant>>;

fn queue_key(node: &Arc<Node>) -> Option<Instant> {
    node.disabled_until()
}

struct Started {
    gate: ConcurrencyGate,
    /// Nodes that survived start, in construction order
    members: Vec<Arc<Node>>,
}

pub struct Pool {
    all: Vec<Arc<Node>>,
    active: Tier,
    standby: Tier,
    probe: Arc<dyn HealthProbe>,
    config: PoolConfig,
    starting: AtomicBool,
    started: OnceLock<Started>,
}

impl Pool {
    /// Build a pool from decoded endpoints. Duplicates (same server, method
    /// and password) are dropped, keeping the first occurrence.
    pub fn new(
        endpoints: impl IntoIterator<Item = Endpoint>,
        launcher: Arc<dyn Launcher>,
        probe: Arc<dyn HealthProbe>,
        config: PoolConfig,
    ) -> Self {
        let mut seen = HashSet::new();
        let all: Vec<Arc<Node>> = endpoints
            .into_iter()
            .filter(|ep| seen.insert(ep.clone()))
            .map(|ep| Arc::new(Node::new(ep, launcher.clone())))
            .collect();

        let active = match config.max_concurrent {
            0 => PriorityQueue::unbounded(queue_key),
            max => PriorityQueue::bounded(max, queue_key),
        };

        debug!(nodes = all.len(), max_concurrent = config.max_concurrent, "pool created");
        Self {
            all,
            active,
            standby: PriorityQueue::unbounded(queue_key),
            probe,
            config,
            starting: AtomicBool::new(false),
            started: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Every distinct node, in construction order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.all
    }

    pub fn is_started(&self) -> bool {
        self.started.get().is_some()
    }

    /// Start, health-check and enqueue nodes, then open the gate.
    ///
    /// Nodes that fail to start or fail the probe are excluded and stopped.
    /// Fails with `NoAvailableNodes` when nothing survives; the pool may be
    /// started again after that.
    pub async fn start(&self) -> Result<()> {
        if self.starting.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        let mut guard = StartGuard {
            pool: self,
            done: false,
        };
        self.start_inner().await?;
        guard.done = true;
        Ok(())
    }

    async fn start_inner(&self) -> Result<()> {
        let acl = self.config.acl.as_deref();
        if let Some(path) = acl {
            check_acl(path)?;
        }

        let survivors = if self.config.test_timeout.is_zero() {
            info!(nodes = self.all.len(), "health test disabled, nodes start on first use");
            self.all.clone()
        } else {
            self.start_and_probe().await
        };

        if survivors.is_empty() {
            error!(nodes = self.all.len(), "no nodes survived startup");
            return Err(Error::NoAvailableNodes);
        }

        for node in &survivors {
            if let Err(node) = self.active.try_push(node.clone()) {
                self.standby.push(node);
            }
        }

        let permits = match self.config.max_concurrent {
            0 => survivors.len(),
            max => max.min(survivors.len()),
        };
        info!(
            survivors = survivors.len(),
            excluded = self.all.len() - survivors.len(),
            active = self.active.len(),
            standby = self.standby.len(),
            permits,
            "pool started"
        );

        self.started
            .set(Started {
                gate: ConcurrencyGate::new(permits),
                members: survivors,
            })
            .map_err(|_| Error::AlreadyStarted)?;
        self.record_available();
        Ok(())
    }

    /// Start every node, then probe the ones that came up. Survivors keep
    /// construction order; failures are stopped.
    async fn start_and_probe(&self) -> Vec<Arc<Node>> {
        let acl = self.config.acl.as_deref();
        let started: Vec<Arc<Node>> = join_all(self.all.iter().map(|node| async move {
            match node.start(None, acl).await {
                Ok(()) => Some(node.clone()),
                Err(e) => {
                    warn!(node = %node, error = %e, "node failed to start, excluding");
                    metrics::counter!("relay_pool_node_start_failures_total").increment(1);
                    None
                }
            }
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        let timeout = self.config.test_timeout;
        let probe = &self.probe;
        let results: Vec<(Arc<Node>, bool)> = stream::iter(started)
            .map(|node| async move {
                let passed = tokio::time::timeout(timeout, probe.probe(&node, timeout))
                    .await
                    .unwrap_or(false);
                (node, passed)
            })
            .buffered(self.config.probe_concurrency.max(1))
            .collect()
            .await;

        let mut survivors = Vec::with_capacity(results.len());
        for (node, passed) in results {
            if passed {
                survivors.push(node);
            } else {
                warn!(node = %node, "node failed health probe, excluding");
                node.stop();
            }
        }
        survivors
    }

    /// Check out a node.
    ///
    /// Waits for a gate permit, then for a queued node, then for that node's
    /// disable window to pass. A node that is not running is started here;
    /// if that fails the node is disabled for the default window, put back,
    /// and the error returned. `stop` fails the call at whichever wait it is
    /// in with `PoolStopped`.
    pub async fn acquire(&self) -> Result<Lease<'_>> {
        let started = self.started.get().ok_or(Error::PoolNotStarted)?;
        let begun = Instant::now();
        let permit = started.gate.acquire().await?;

        let node = match self.active.try_pop() {
            Some(node) => node,
            None => {
                debug!("active tier empty, waiting on standby");
                tokio::select! {
                    node = self.standby.pop() => node,
                    () = started.gate.closed() => return Err(Error::PoolStopped),
                }
            }
        };
        // From here on, dropping the lease puts the node back and frees the permit
        let lease = Lease {
            pool: self,
            node,
            _permit: permit,
        };

        loop {
            if started.gate.is_closed() {
                return Err(Error::PoolStopped);
            }
            match lease.disabled_until() {
                Some(until) if until > Instant::now() => {
                    debug!(
                        node = %lease.node(),
                        wait_ms = (until - Instant::now()).as_millis() as u64,
                        "waiting for node to come off disable"
                    );
                    tokio::select! {
                        () = tokio::time::sleep_until(until) => {}
                        () = started.gate.closed() => {}
                    }
                }
                _ => break,
            }
        }

        if !lease.is_started() {
            debug!(node = %lease.node(), "starting node on acquire");
            if let Err(e) = lease.start(None, self.config.acl.as_deref()).await {
                warn!(node = %lease.node(), error = %e, "node failed to start on acquire");
                metrics::counter!("relay_pool_node_start_failures_total").increment(1);
                lease.disable(self.config.disable_duration);
                return Err(e);
            }
            // A stop that raced the launch must not leave the new process behind
            if started.gate.is_closed() {
                lease.stop();
                return Err(Error::PoolStopped);
            }
        }

        metrics::counter!("relay_pool_acquire_total").increment(1);
        metrics::histogram!("relay_pool_acquire_wait_seconds")
            .record(begun.elapsed().as_secs_f64());
        self.record_available();
        Ok(lease)
    }

    /// Return a node. Equivalent to dropping the lease.
    pub fn release(&self, lease: Lease<'_>) {
        debug_assert!(std::ptr::eq(self, lease.pool), "lease released to a different pool");
        drop(lease);
    }

    /// Disable a node for the configured default window.
    pub fn disable(&self, node: &Node) {
        self.disable_for(node, self.config.disable_duration);
    }

    pub fn disable_for(&self, node: &Node, duration: Duration) {
        node.disable(duration);
        metrics::counter!("relay_pool_node_disabled_total").increment(1);
        info!(node = %node, secs = duration.as_secs_f64(), "node disabled");
    }

    /// Stop every node, checked out or not, and fail pending and future
    /// acquires. Safe to call repeatedly and before `start`.
    pub fn stop(&self) {
        if let Some(started) = self.started.get() {
            started.gate.close();
        }
        for node in &self.all {
            node.stop();
        }
        debug!(nodes = self.all.len(), "pool stopped");
    }

    /// Nodes waiting in either tier. Checked-out nodes are not counted.
    pub fn count(&self) -> usize {
        self.active.len() + self.standby.len()
    }

    /// Free gate permits, `None` before start.
    pub fn permits_available(&self) -> Option<usize> {
        self.started.get().map(|s| s.gate.available())
    }

    /// Snapshot for the admin endpoint.
    ///
    /// `healthy` when no node in rotation is disabled, `degraded` when some
    /// are, `unhealthy` when all are or the pool is not running.
    pub fn health(&self) -> serde_json::Value {
        let (members, permits, closed) = match self.started.get() {
            Some(s) => (s.members.as_slice(), Some(s.gate.available()), s.gate.is_closed()),
            None => (&[][..], None, false),
        };
        let now = Instant::now();

        let mut disabled = 0usize;
        let nodes: Vec<serde_json::Value> = self
            .all
            .iter()
            .map(|node| {
                let in_rotation = members.iter().any(|m| Arc::ptr_eq(m, node));
                let remaining = node
                    .disabled_until()
                    .map(|until| until.saturating_duration_since(now).as_secs())
                    .unwrap_or(0);
                let status = if !in_rotation {
                    "excluded"
                } else if node.is_disabled() {
                    disabled += 1;
                    "disabled"
                } else if node.is_started() {
                    "running"
                } else {
                    "idle"
                };
                serde_json::json!({
                    "name": node.name(),
                    "server": node.endpoint().server_addr,
                    "status": status,
                    "port": node.port(),
                    "disabled_remaining_secs": remaining
                })
            })
            .collect();

        let available = self.count();
        let pool_status = if members.is_empty() || closed || disabled == members.len() {
            "unhealthy"
        } else if disabled > 0 {
            "degraded"
        } else {
            "healthy"
        };

        serde_json::json!({
            "status": pool_status,
            "nodes_total": self.all.len(),
            "nodes_in_rotation": members.len(),
            "nodes_available": available,
            "nodes_active": self.active.len(),
            "nodes_standby": self.standby.len(),
            "nodes_checked_out": members.len().saturating_sub(available),
            "nodes_disabled": disabled,
            "permits_available": permits,
            "nodes": nodes
        })
    }

    fn requeue(&self, node: Arc<Node>) {
        if node.is_disabled() {
            // No point keeping a relay alive through its cool-down
            node.stop();
            debug!(node = %node, "disabled node parked in standby");
            self.standby.push(node);
        } else if let Err(node) = self.active.try_push(node) {
            debug!(node = %node, "active tier full, node moved to standby");
            self.standby.push(node);
        }
        self.record_available();
    }

    fn record_available(&self) {
        metrics::gauge!("relay_pool_available_nodes").set(self.count() as f64);
    }
}

/// Undoes a start that failed or was cancelled part way: stops whatever was
/// launched and allows `start` again.
struct StartGuard<'a> {
    pool: &'a Pool,
    done: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        for node in &self.pool.all {
            node.stop();
        }
        self.pool.starting.store(false, Ordering::SeqCst);
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A checked-out node.
///
/// Dereferences to the `Node`. Dropping the lease requeues the node and then
/// releases its gate permit.
pub struct Lease<'a> {
    pool: &'a Pool,
    node: Arc<Node>,
    _permit: GatePermit,
}

impl Lease<'_> {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Deref for Lease<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.node
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        // Fields drop after this, so the node is queued before the permit frees
        self.pool.requeue(self.node.clone());
    }
}

impl std::fmt::Debug for Lease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("node", &self.node).finish()
    }
}
