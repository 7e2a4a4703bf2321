//! Relay process launching
//!
//! The pool only needs three things from a relay process: spawn it, ask
//! whether it has exited, and terminate it. `Launcher` captures that contract
//! so nodes can be backed by `sslocal` in production and by in-memory fakes in
//! tests.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{Error, Result};

/// How long a freshly spawned relay must stay alive before it counts as started.
///
/// A port conflict only shows up as the process exiting shortly after launch,
/// never as a spawn error.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Everything a launcher needs to bring up one relay listener.
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec<'a> {
    /// Local address the listener binds
    pub bind: SocketAddr,
    /// Remote relay `host:port`
    pub server_addr: &'a str,
    pub method: &'a str,
    pub password: &'a str,
    /// Optional route rules (ACL) file
    pub acl: Option<&'a Path>,
}

/// A running relay process.
pub trait RelayProcess: Send {
    /// Whether the process has exited (or can no longer be observed).
    fn has_exited(&mut self) -> bool;

    /// Ask the process to terminate. Must not block.
    fn terminate(&mut self);
}

/// Spawns relay processes for nodes.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn RelayProcess>>;

    fn grace_period(&self) -> Duration {
        DEFAULT_GRACE_PERIOD
    }
}

impl RelayProcess for Child {
    fn has_exited(&mut self) -> bool {
        !matches!(self.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        if let Err(e) = self.start_kill() {
            debug!(error = %e, "relay process already gone");
        }
    }
}

/// Launches shadowsocks-rust `sslocal` listeners.
///
/// Children are spawned with `kill_on_drop`, so a relay whose handle is
/// dropped (cancelled start, dropped node) is killed rather than orphaned.
#[derive(Debug, Clone)]
pub struct SsLocal {
    program: PathBuf,
}

impl SsLocal {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments for one listener.
    pub fn args(spec: &LaunchSpec<'_>) -> Vec<String> {
        let mut args = vec![
            "-b".to_string(),
            spec.bind.to_string(),
            "-s".to_string(),
            spec.server_addr.to_string(),
            "-m".to_string(),
            spec.method.to_string(),
            "-k".to_string(),
            spec.password.to_string(),
        ];
        if let Some(acl) = spec.acl {
            args.push("--acl".to_string());
            args.push(acl.display().to_string());
        }
        args
    }
}

impl Default for SsLocal {
    fn default() -> Self {
        Self::new("sslocal")
    }
}

impl Launcher for SsLocal {
    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn RelayProcess>> {
        let child = Command::new(&self.program)
            .args(Self::args(spec))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {e}", self.program.display())))?;
        debug!(bind = %spec.bind, pid = ?child.id(), "spawned sslocal");
        Ok(Box::new(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(acl: Option<&Path>) -> LaunchSpec<'_> {
        LaunchSpec {
            bind: "127.0.0.1:20000".parse().unwrap(),
            server_addr: "hk1.example.com:8388",
            method: "aes-256-gcm",
            password: "pw",
            acl,
        }
    }

    #[test]
    fn args_without_acl() {
        assert_eq!(
            SsLocal::args(&spec(None)),
            vec![
                "-b",
                "127.0.0.1:20000",
                "-s",
                "hk1.example.com:8388",
                "-m",
                "aes-256-gcm",
                "-k",
                "pw"
            ]
        );
    }

    #[test]
    fn args_with_acl() {
        let acl = Path::new("/etc/relay/bypass.acl");
        let args = SsLocal::args(&spec(Some(acl)));
        assert_eq!(&args[args.len() - 2..], ["--acl", "/etc/relay/bypass.acl"]);
    }

    #[test]
    fn default_program_is_sslocal() {
        assert_eq!(SsLocal::default().program(), Path::new("sslocal"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let launcher = SsLocal::new("/nonexistent/bin/sslocal");
        let err = launcher.launch(&spec(None)).err().expect("spawn must fail");
        assert!(matches!(err, Error::Spawn(_)), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_reports_exit_and_terminates() {
        let mut sleeper: Box<dyn RelayProcess> =
            Box::new(Command::new("sleep").arg("30").kill_on_drop(true).spawn().unwrap());
        assert!(!sleeper.has_exited());
        sleeper.terminate();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sleeper.has_exited());

        let mut quick: Box<dyn RelayProcess> =
            Box::new(Command::new("true").kill_on_drop(true).spawn().unwrap());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(quick.has_exited());
    }
}
