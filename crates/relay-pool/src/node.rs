//! A single relay node: identity, process lifecycle, disable timer
//!
//! A node is created from a decoded `Endpoint` as pure data. Starting it
//! spawns a local listener through the pool's `Launcher` and binds a loopback
//! port; stopping it terminates that listener. Nodes can be stopped and
//! restarted any number of times.
//!
//! Disable state is a single optional timestamp: a node is disabled while
//! `disabled_until` is in the future. A node that was never disabled has no
//! timestamp, so all fresh nodes share the same (lowest) queue key.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::RngExt;
use subscription::{Endpoint, Labeled};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::launcher::{LaunchSpec, Launcher, RelayProcess};

/// Ports tried when no explicit port is requested.
pub const PORT_RANGE: RangeInclusive<u16> = 10000..=60000;

/// Random ports tried before giving up on a start.
pub const MAX_PORT_ATTEMPTS: u32 = 16;

/// Listeners bind loopback only.
pub const LOCAL_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

struct Running {
    process: Box<dyn RelayProcess>,
    port: u16,
}

/// One managed relay endpoint.
///
/// Equality and hashing follow the endpoint identity
/// `(server_addr, method, password)`; the display name is ignored.
pub struct Node {
    endpoint: Endpoint,
    launcher: Arc<dyn Launcher>,
    disabled_until: Mutex<Option<Instant>>,
    running: Mutex<Option<Running>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Node {
    pub fn new(endpoint: Endpoint, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            endpoint,
            launcher,
            disabled_until: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    /// Local proxy URL. Only valid while the node is running.
    pub fn url(&self) -> Result<String> {
        self.port()
            .map(|port| format!("http://{LOCAL_HOST}:{port}"))
            .ok_or_else(|| Error::NotStarted(self.endpoint.to_string()))
    }

    /// Bound local port while running.
    pub fn port(&self) -> Option<u16> {
        lock(&self.running)
            .as_mut()
            .and_then(|r| (!r.process.has_exited()).then_some(r.port))
    }

    /// Whether a process is recorded and still alive.
    pub fn is_started(&self) -> bool {
        lock(&self.running)
            .as_mut()
            .is_some_and(|r| !r.process.has_exited())
    }

    /// Ensure the relay listener is running.
    ///
    /// With an explicit `port` the launch is attempted once and a conflict is
    /// returned as `StartFailed`. Without one, random ports from `PORT_RANGE`
    /// are tried up to `MAX_PORT_ATTEMPTS` times. Spawn errors are never
    /// retried. The ACL path, if any, is validated before anything is spawned.
    pub async fn start(&self, port: Option<u16>, acl: Option<&Path>) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        if let Some(path) = acl {
            check_acl(path)?;
        }

        if let Some(port) = port {
            return self.start_on(port, acl).await;
        }

        for attempt in 1..=MAX_PORT_ATTEMPTS {
            let port = rand::rng().random_range(PORT_RANGE);
            match self.start_on(port, acl).await {
                Ok(()) => return Ok(()),
                Err(Error::StartFailed(reason)) => {
                    debug!(node = %self, attempt, port, reason = %reason, "start failed, trying another port");
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::PortsExhausted {
            attempts: MAX_PORT_ATTEMPTS,
        })
    }

    async fn start_on(&self, port: u16, acl: Option<&Path>) -> Result<()> {
        let spec = LaunchSpec {
            bind: SocketAddr::from((LOCAL_HOST, port)),
            server_addr: &self.endpoint.server_addr,
            method: &self.endpoint.method,
            password: self.endpoint.password.expose(),
            acl,
        };
        let mut process = self.launcher.launch(&spec)?;

        // Exit during the grace period is the only signal of a bind conflict
        tokio::time::sleep(self.launcher.grace_period()).await;
        if process.has_exited() {
            return Err(Error::StartFailed(format!(
                "relay exited during startup on port {port}, port may be in use"
            )));
        }

        let mut running = lock(&self.running);
        if running.as_mut().is_some_and(|r| !r.process.has_exited()) {
            debug!(node = %self, "node started concurrently, discarding duplicate process");
            process.terminate();
            return Ok(());
        }
        *running = Some(Running { process, port });
        info!(node = %self, port, "node started");
        Ok(())
    }

    /// Terminate the relay if running. Idempotent.
    pub fn stop(&self) {
        let Some(mut running) = lock(&self.running).take() else {
            return;
        };
        if !running.process.has_exited() {
            running.process.terminate();
            info!(node = %self, port = running.port, "node stopped");
        }
    }

    /// Exclude the node from rotation for `duration` from now.
    pub fn disable(&self, duration: Duration) {
        *lock(&self.disabled_until) = Some(Instant::now() + duration);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_until().is_some_and(|until| until > Instant::now())
    }

    /// End of the most recent disable window, `None` if never disabled.
    pub fn disabled_until(&self) -> Option<Instant> {
        *lock(&self.disabled_until)
    }
}

/// Route rules must exist and be a regular file.
pub(crate) fn check_acl(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(Error::AclNotAFile(path.to_path_buf())),
        Err(_) => Err(Error::AclNotFound(path.to_path_buf())),
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.endpoint.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.endpoint, f)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("endpoint", &self.endpoint)
            .field("port", &self.port())
            .field("disabled_until", &self.disabled_until())
            .finish()
    }
}

impl Labeled for Node {
    fn label(&self) -> &str {
        self.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, endpoint};

    fn node(launcher: &Arc<FakeLauncher>) -> Node {
        Node::new(endpoint("hk1.example.com:8388"), launcher.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn url_requires_running_process() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        assert!(matches!(n.url(), Err(Error::NotStarted(_))));
        assert!(!n.is_started());

        n.start(Some(23456), None).await.unwrap();
        assert!(n.is_started());
        assert_eq!(n.url().unwrap(), "http://127.0.0.1:23456");
        assert_eq!(n.port(), Some(23456));
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_out_grace_period() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        let before = Instant::now();
        n.start(Some(23456), None).await.unwrap();
        assert!(Instant::now() - before >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_noop_when_running() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        n.start(None, None).await.unwrap();
        n.start(None, None).await.unwrap();
        assert_eq!(launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_port_conflict_is_not_retried() {
        let launcher = FakeLauncher::new();
        launcher.occupy_port(23456);
        let n = node(&launcher);

        let err = n.start(Some(23456), None).await.unwrap_err();
        assert!(matches!(err, Error::StartFailed(_)), "got: {err}");
        assert_eq!(launcher.launch_count(), 1);
        assert!(!n.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn random_port_retries_until_success() {
        let launcher = FakeLauncher::new();
        launcher.fail_next(3);
        let n = node(&launcher);

        n.start(None, None).await.unwrap();
        assert_eq!(launcher.launch_count(), 4);
        assert!(launcher.ports().iter().all(|p| PORT_RANGE.contains(p)));
        assert_eq!(n.port(), launcher.ports().last().copied());
    }

    #[tokio::test(start_paused = true)]
    async fn random_port_retry_is_bounded() {
        let launcher = FakeLauncher::new();
        launcher.fail_always(true);
        let n = node(&launcher);

        let err = n.start(None, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::PortsExhausted {
                attempts: MAX_PORT_ATTEMPTS
            }
        ));
        assert_eq!(launcher.launch_count(), MAX_PORT_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_error_is_not_retried() {
        let launcher = FakeLauncher::new();
        launcher.spawn_error(true);
        let n = node(&launcher);

        let err = n.start(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Spawn(_)), "got: {err}");
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acl_must_exist_before_spawn() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        let err = n
            .start(None, Some(Path::new("/nonexistent/rules.acl")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AclNotFound(_)), "got: {err}");
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acl_directory_is_rejected() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);
        let dir = tempfile::tempdir().unwrap();

        let err = n.start(None, Some(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::AclNotAFile(_)), "got: {err}");
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acl_file_is_passed_to_launcher() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);
        let dir = tempfile::tempdir().unwrap();
        let acl = dir.path().join("bypass.acl");
        std::fs::write(&acl, "[proxy_all]\n").unwrap();

        n.start(None, Some(acl.as_path())).await.unwrap();
        assert_eq!(launcher.last_acl(), Some(acl));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        n.stop();
        n.start(None, None).await.unwrap();
        assert_eq!(launcher.live_count(), 1);

        n.stop();
        n.stop();
        assert!(!n.is_started());
        assert_eq!(launcher.live_count(), 0);
        assert!(n.url().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        n.start(None, None).await.unwrap();
        n.stop();
        n.start(None, None).await.unwrap();
        assert!(n.is_started());
        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(launcher.live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_process_is_not_started() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        n.start(None, None).await.unwrap();
        launcher.crash_all();
        assert!(!n.is_started());
        assert!(n.port().is_none());
        assert!(matches!(n.url(), Err(Error::NotStarted(_))));

        // A crashed node can be started again
        n.start(None, None).await.unwrap();
        assert!(n.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_terminates_process() {
        let launcher = FakeLauncher::new();
        {
            let n = node(&launcher);
            n.start(None, None).await.unwrap();
            assert_eq!(launcher.live_count(), 1);
        }
        assert_eq!(launcher.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_window_expires() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);
        assert!(!n.is_disabled());
        assert!(n.disabled_until().is_none());

        n.disable(Duration::from_secs(5));
        assert!(n.is_disabled());
        assert_eq!(n.disabled_until(), Some(Instant::now() + Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(n.is_disabled());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!n.is_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_overwrites_previous_window() {
        let launcher = FakeLauncher::new();
        let n = node(&launcher);

        n.disable(Duration::from_secs(60));
        n.disable(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!n.is_disabled());
    }

    #[test]
    fn identity_ignores_display_name() {
        let launcher: Arc<dyn Launcher> = FakeLauncher::new();
        let a = Node::new(
            Endpoint::new("a.example.com:1", "aes-256-gcm", "pw", "first"),
            launcher.clone(),
        );
        let b = Node::new(
            Endpoint::new("a.example.com:1", "aes-256-gcm", "pw", "second"),
            launcher,
        );
        assert_eq!(a, b);
        assert_eq!(a.label(), "first");
    }
}
