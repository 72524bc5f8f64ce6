//! Kill coordination
//!
//! [`ProcessHandle`] is the caller's side: it can request termination at any
//! time, even before the OS process exists. Requests are latched in a watch
//! cell and picked up by the launcher task that owns the child.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::platform::Platform;

/// Signal delivered by [`ProcessHandle::kill`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KillSignal {
    /// SIGTERM, or TerminateProcess on Windows
    #[default]
    Term,
    /// SIGKILL
    Kill,
    /// SIGINT
    Int,
    /// SIGHUP
    Hup,
}

#[cfg(unix)]
impl From<KillSignal> for nix::sys::signal::Signal {
    fn from(signal: KillSignal) -> Self {
        use nix::sys::signal::Signal;
        match signal {
            KillSignal::Term => Signal::SIGTERM,
            KillSignal::Kill => Signal::SIGKILL,
            KillSignal::Int => Signal::SIGINT,
            KillSignal::Hup => Signal::SIGHUP,
        }
    }
}

/// Lifecycle of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Created = 0,
    Spawning = 1,
    Running = 2,
    Closed = 3,
    Killed = 4,
    SpawnError = 5,
}

impl ProcessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessState::Created,
            1 => ProcessState::Spawning,
            2 => ProcessState::Running,
            3 => ProcessState::Closed,
            4 => ProcessState::Killed,
            _ => ProcessState::SpawnError,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Closed | ProcessState::Killed | ProcessState::SpawnError
        )
    }
}

#[derive(Debug)]
pub(crate) struct HandleState {
    pid: AtomicU32,
    state: AtomicU8,
    killed: AtomicBool,
    settled: AtomicBool,
}

impl HandleState {
    pub(crate) fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn mark_settled(&self) {
        self.settled.store(true, Ordering::Release);
    }
}

/// Caller-side control over a running execution
///
/// Cheap to clone. Holds the pid and a kill channel, never the child itself.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    state: Arc<HandleState>,
    requests: Arc<watch::Sender<Option<KillSignal>>>,
}

impl ProcessHandle {
    /// OS process id, once spawned
    pub fn pid(&self) -> Option<u32> {
        match self.state.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.state.load(Ordering::Acquire))
    }

    /// Whether a kill signal was actually delivered
    pub fn is_killed(&self) -> bool {
        self.state.killed.load(Ordering::Acquire)
    }

    /// Whether the outcome has been produced
    pub fn is_settled(&self) -> bool {
        self.state.settled.load(Ordering::Acquire)
    }

    /// Request termination with `signal`
    ///
    /// Returns `false` when the outcome is already settled. Before spawn the
    /// request is kept and applied as soon as the process exists.
    pub fn kill(&self, signal: KillSignal) -> bool {
        if self.is_settled() {
            return false;
        }
        debug!(pid = ?self.pid(), signal = ?signal, "Kill requested");
        self.requests.send_replace(Some(signal));
        true
    }

    /// Request termination with the platform default signal
    pub fn terminate(&self) -> bool {
        self.kill(KillSignal::default())
    }
}

/// Launcher side of the kill channel
#[derive(Debug)]
pub(crate) struct KillListener {
    requests: watch::Receiver<Option<KillSignal>>,
    state: Arc<HandleState>,
    open: bool,
}

impl KillListener {
    pub(crate) fn shared(&self) -> Arc<HandleState> {
        Arc::clone(&self.state)
    }

    pub(crate) fn set_state(&self, state: ProcessState) {
        self.state.set_state(state);
    }

    pub(crate) fn publish_pid(&self, pid: u32) {
        self.state.pid.store(pid, Ordering::Release);
    }

    pub(crate) fn mark_killed(&self) {
        self.state.killed.store(true, Ordering::Release);
    }

    /// Wait for the next kill request
    ///
    /// Never resolves once every handle is dropped without a pending request.
    pub(crate) async fn requested(&mut self) -> KillSignal {
        loop {
            if !self.open {
                std::future::pending::<()>().await;
            }
            match self.requests.changed().await {
                Ok(()) => {
                    if let Some(signal) = *self.requests.borrow_and_update() {
                        return signal;
                    }
                }
                Err(_) => self.open = false,
            }
        }
    }
}

/// Create a connected handle/listener pair
pub(crate) fn channel() -> (ProcessHandle, KillListener) {
    let state = Arc::new(HandleState {
        pid: AtomicU32::new(0),
        state: AtomicU8::new(ProcessState::Created as u8),
        killed: AtomicBool::new(false),
        settled: AtomicBool::new(false),
    });
    let (tx, rx) = watch::channel(None);
    (
        ProcessHandle {
            state: Arc::clone(&state),
            requests: Arc::new(tx),
        },
        KillListener {
            requests: rx,
            state,
            open: true,
        },
    )
}

/// Send `signal` to the child, then take its descendants down
///
/// A child leading its own process group (`grouped`) is signalled through
/// the group, which reaches everything it started. Without process groups
/// the descendants are enumerated and killed one by one.
pub(crate) async fn signal_process(
    child: &mut Child,
    signal: KillSignal,
    platform: &Platform,
    grouped: bool,
) -> io::Result<()> {
    let pid = child.id();
    send_signal(child, signal, grouped)?;

    if !platform.process_groups {
        if let Some(pid) = pid {
            kill_descendants(pid).await;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn send_signal(child: &mut Child, signal: KillSignal, grouped: bool) -> io::Result<()> {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    // Already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let target = Pid::from_raw(pid as i32);
    let sig = Signal::from(signal);
    if grouped {
        match killpg(target, sig) {
            Ok(()) => {
                debug!(pid = %pid, signal = ?signal, "Signal delivered to process group");
                return Ok(());
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to signal process group, trying process only")
            }
        }
    }
    kill(target, sig)?;
    debug!(pid = %pid, signal = ?signal, "Signal delivered");
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, signal: KillSignal, _grouped: bool) -> io::Result<()> {
    child.start_kill()?;
    debug!(pid = ?child.id(), signal = ?signal, "Process terminated");
    Ok(())
}

/// Terminate every direct child of `pid`, best effort
///
/// The children are listed with `wmic` (PowerShell `Get-CimInstance` when
/// `wmic` is unavailable) and killed with `taskkill /f /t`. Listing
/// failures are logged and otherwise ignored.
pub async fn kill_descendants(pid: u32) {
    let listing = match list_children(pid).await {
        Ok(listing) => listing,
        Err(e) => {
            debug!(pid = %pid, error = %e, "Could not enumerate child processes");
            return;
        }
    };

    for child_pid in parse_child_pids(&listing, pid) {
        let result = Command::new("taskkill")
            .args(["/pid", &child_pid.to_string(), "/f", "/t"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {
                debug!(pid = %pid, child = %child_pid, "Child process killed")
            }
            Ok(status) => {
                debug!(pid = %pid, child = %child_pid, code = ?status.code(), "taskkill failed")
            }
            Err(e) => warn!(pid = %pid, child = %child_pid, error = %e, "Failed to run taskkill"),
        }
    }
}

async fn list_children(pid: u32) -> io::Result<String> {
    let wmic = Command::new("wmic")
        .args([
            "process",
            "where",
            &format!("(ParentProcessId={})", pid),
            "get",
            "processid",
        ])
        .stdin(Stdio::null())
        .output()
        .await;
    if let Ok(output) = wmic {
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
    }

    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            &format!(
                "Get-CimInstance Win32_Process -Filter \"ParentProcessId={}\" | Select-Object -ExpandProperty ProcessId",
                pid
            ),
        ])
        .stdin(Stdio::null())
        .output()
        .await?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("child process query exited with {:?}", output.status.code()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract child pids from a process listing, skipping headers, zero and
/// the parent itself
pub fn parse_child_pids(listing: &str, parent: u32) -> Vec<u32> {
    let mut pids = Vec::new();
    for token in listing.split_whitespace() {
        if let Ok(pid) = token.parse::<u32>() {
            if pid != 0 && pid != parent && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_child_pids() {
        let listing = "ProcessId  \r\r\n4312       \r\r\n77         \r\r\n\r\r\n";
        assert_eq!(parse_child_pids(listing, 100), vec![4312, 77]);
        assert_eq!(parse_child_pids("ProcessId\n100\n0\n5\n5", 100), vec![5]);
        assert!(parse_child_pids("No Instance(s) Available.", 100).is_empty());
    }

    #[tokio::test]
    async fn test_kill_latched_before_listener_polls() {
        let (handle, mut listener) = channel();
        assert!(handle.kill(KillSignal::Int));
        let signal = tokio::time::timeout(std::time::Duration::from_secs(1), listener.requested())
            .await
            .unwrap();
        assert_eq!(signal, KillSignal::Int);
    }

    #[tokio::test]
    async fn test_latched_kill_survives_handle_drop() {
        let (handle, mut listener) = channel();
        handle.terminate();
        drop(handle);
        let signal = tokio::time::timeout(std::time::Duration::from_secs(1), listener.requested())
            .await
            .unwrap();
        assert_eq!(signal, KillSignal::Term);
    }

    #[tokio::test]
    async fn test_dropped_handle_never_requests() {
        let (handle, mut listener) = channel();
        drop(handle);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), listener.requested()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_settled_handle_rejects_kill() {
        let (handle, listener) = channel();
        assert_eq!(handle.pid(), None);
        assert_eq!(handle.state(), ProcessState::Created);

        listener.publish_pid(4242);
        listener.set_state(ProcessState::Running);
        assert_eq!(handle.pid(), Some(4242));
        assert_eq!(handle.state(), ProcessState::Running);

        listener.shared().mark_settled();
        assert!(handle.is_settled());
        assert!(!handle.kill(KillSignal::Kill));
        assert!(!handle.is_killed());
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProcessState::Closed.is_terminal());
        assert!(ProcessState::Killed.is_terminal());
        assert!(ProcessState::SpawnError.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
    }
}
