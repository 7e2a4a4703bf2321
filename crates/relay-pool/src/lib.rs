//! Rotating pool of local relay listeners
//!
//! Each node wraps one remote relay endpoint and a locally bound `sslocal`
//! listener that tunnels to it. Callers borrow a node, route traffic through
//! its local URL, and give it back; the pool handles process startup, health
//! probing, temporary disabling, and fair rotation.
//!
//! Node lifecycle:
//! 1. `Pool::new` dedups endpoints into nodes (no processes yet)
//! 2. `Pool::start` launches every node, probes it through `HealthProbe`, and
//!    keeps the survivors in the `active`/`standby` tiers
//! 3. `Pool::acquire` returns a `Lease`; the caller may `disable` the node if
//!    it misbehaves
//! 4. Dropping the lease requeues the node, stopping its process first if it
//!    is disabled
//! 5. A disabled node is waited out the next time it reaches a queue's front
//!    and restarted on demand

pub mod error;
pub mod gate;
pub mod launcher;
pub mod node;
pub mod pool;
pub mod probe;
pub mod queue;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use gate::{ConcurrencyGate, GatePermit};
pub use launcher::{LaunchSpec, Launcher, RelayProcess, SsLocal};
pub use node::Node;
pub use pool::{Lease, Pool, PoolConfig};
pub use probe::{HealthProbe, IpApiProbe};
pub use queue::PriorityQueue;
