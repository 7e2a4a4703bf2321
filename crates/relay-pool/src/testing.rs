//! In-memory launcher and probe for unit tests

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use subscription::Endpoint;

use crate::error::{Error, Result};
use crate::launcher::{LaunchSpec, Launcher, RelayProcess};
use crate::node::Node;
use crate::probe::HealthProbe;

pub(crate) fn endpoint(addr: &str) -> Endpoint {
    Endpoint::new(addr, "aes-256-gcm", "pw", format!("node {addr}"))
}

pub(crate) fn endpoints(addrs: &[&str]) -> Vec<Endpoint> {
    addrs.iter().map(|a| endpoint(a)).collect()
}

pub(crate) struct Launch {
    pub port: u16,
    pub server_addr: String,
    pub acl: Option<PathBuf>,
    exited: Arc<AtomicBool>,
}

struct FakeProcess {
    exited: Arc<AtomicBool>,
}

impl RelayProcess for FakeProcess {
    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn terminate(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Launcher whose processes are flags. Failure modes are toggled per test.
#[derive(Default)]
pub(crate) struct FakeLauncher {
    launches: Mutex<Vec<Launch>>,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    spawn_error: AtomicBool,
    busy_ports: Mutex<HashSet<u16>>,
    failing_servers: Mutex<HashSet<String>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `n` launches exit during the grace period.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    pub fn spawn_error(&self, fail: bool) {
        self.spawn_error.store(fail, Ordering::SeqCst);
    }

    pub fn occupy_port(&self, port: u16) {
        self.busy_ports.lock().unwrap().insert(port);
    }

    /// Launches for this server address exit immediately.
    pub fn fail_server(&self, server_addr: &str) {
        self.failing_servers
            .lock()
            .unwrap()
            .insert(server_addr.to_string());
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn live_count(&self) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|l| !l.exited.load(Ordering::SeqCst))
            .count()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.launches.lock().unwrap().iter().map(|l| l.port).collect()
    }

    pub fn last_acl(&self) -> Option<PathBuf> {
        self.launches
            .lock()
            .unwrap()
            .last()
            .and_then(|l| l.acl.clone())
    }

    /// Simulate every live process crashing.
    pub fn crash_all(&self) {
        for launch in self.launches.lock().unwrap().iter() {
            launch.exited.store(true, Ordering::SeqCst);
        }
    }

    fn should_fail(&self, spec: &LaunchSpec<'_>) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        if self.busy_ports.lock().unwrap().contains(&spec.bind.port()) {
            return true;
        }
        if self.failing_servers.lock().unwrap().contains(spec.server_addr) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn RelayProcess>> {
        if self.spawn_error.load(Ordering::SeqCst) {
            return Err(Error::Spawn("fake spawn failure".into()));
        }
        let exited = Arc::new(AtomicBool::new(self.should_fail(spec)));
        self.launches.lock().unwrap().push(Launch {
            port: spec.bind.port(),
            server_addr: spec.server_addr.to_string(),
            acl: spec.acl.map(PathBuf::from),
            exited: exited.clone(),
        });
        Ok(Box::new(FakeProcess { exited }))
    }

    fn grace_period(&self) -> Duration {
        Duration::from_millis(100)
    }
}

/// Probe that fails a fixed set of server addresses.
#[derive(Default)]
pub(crate) struct FakeProbe {
    failing: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    probed: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(addrs: &[&str]) -> Arc<Self> {
        let probe = Self::default();
        probe
            .failing
            .lock()
            .unwrap()
            .extend(addrs.iter().map(|a| a.to_string()));
        Arc::new(probe)
    }

    /// A probe that never answers within any reasonable timeout.
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            delay: Some(Duration::from_secs(3600)),
            ..Self::default()
        })
    }

    pub fn probed(&self) -> usize {
        self.probed.load(Ordering::SeqCst)
    }
}

impl HealthProbe for FakeProbe {
    fn probe<'a>(
        &'a self,
        node: &'a Node,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.probed.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            node.is_started()
                && !self
                    .failing
                    .lock()
                    .unwrap()
                    .contains(&node.endpoint().server_addr)
        })
    }
}
