//! Process supervision for the debug target
//!
//! Spawns the target with its inspector enabled, watches its output streams
//! for the debug endpoint announcement, and exposes kill/restart lifecycle
//! controls. Discovery is surfaced through a one-shot transition on a watch
//! channel rather than by polling connection state.

pub mod discovery;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

use crate::common::{Error, Result};

/// How the debug target is launched
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Runtime executable (resolved path)
    pub runtime: PathBuf,
    /// Extra runtime arguments, placed before the script
    pub runtime_args: Vec<String>,
    /// Script to run under the runtime
    pub script: PathBuf,
    /// Arguments passed to the script
    pub script_args: Vec<String>,
    /// Diagnostic port for the inspector flag
    pub inspect_port: u16,
    /// Working directory (inherited if unset)
    pub cwd: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

/// Lifecycle of one spawned target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetPhase {
    /// Process is up, endpoint not yet discovered
    Running,
    /// Endpoint discovered; carries the ws:// address
    Ready(String),
    /// Process exited
    Exited(Option<i32>),
}

enum Control {
    Kill(oneshot::Sender<()>),
}

struct TargetHandle {
    phase_rx: watch::Receiver<TargetPhase>,
    ctl_tx: mpsc::Sender<Control>,
    pid: Option<u32>,
}

/// Spawns and supervises the debug target process
///
/// A spawn failure leaves the supervisor reusable for a later `start`;
/// `restart` kills the current target and re-runs discovery with the same
/// options, producing a fresh target record.
pub struct ProcessSupervisor {
    options: LaunchOptions,
    handle: Mutex<Option<TargetHandle>>,
}

impl ProcessSupervisor {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            options,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the target. Non-blocking: endpoint discovery continues in the
    /// background; await it with [`wait_ready`](Self::wait_ready).
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if let Some(existing) = handle.as_ref() {
            if !matches!(*existing.phase_rx.borrow(), TargetPhase::Exited(_)) {
                return Err(Error::AlreadyRunning);
            }
        }

        let opts = &self.options;
        let mut cmd = Command::new(&opts.runtime);
        cmd.arg(format!("--inspect={}", opts.inspect_port))
            .args(&opts.runtime_args)
            .arg(&opts.script)
            .args(&opts.script_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| Error::SpawnFailed {
            program: opts.runtime.display().to_string(),
            source,
        })?;

        let pid = child.id();
        tracing::info!(
            ?pid,
            script = %opts.script.display(),
            inspect_port = opts.inspect_port,
            "spawned debug target"
        );

        let (phase_tx, phase_rx) = watch::channel(TargetPhase::Running);
        let phase_tx = Arc::new(phase_tx);
        let discovered = Arc::new(AtomicBool::new(false));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_output(
                stdout,
                "stdout",
                phase_tx.clone(),
                discovered.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(scan_output(
                stderr,
                "stderr",
                phase_tx.clone(),
                discovered.clone(),
            ));
        }

        let (ctl_tx, ctl_rx) = mpsc::channel(1);
        tokio::spawn(supervise(child, ctl_rx, phase_tx));

        *handle = Some(TargetHandle {
            phase_rx,
            ctl_tx,
            pid,
        });
        Ok(())
    }

    /// Wait until the target announces its debug endpoint
    ///
    /// Fails with [`Error::TargetExited`] if the process dies first, and
    /// with [`Error::DiscoveryTimeout`] if the announcement never shows up
    /// within the window.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<String> {
        let mut phase_rx = {
            let handle = self.handle.lock();
            handle.as_ref().ok_or(Error::NotRunning)?.phase_rx.clone()
        };
        let secs = timeout.as_secs();

        tokio::time::timeout(timeout, async move {
            loop {
                let phase = phase_rx.borrow_and_update().clone();
                match phase {
                    TargetPhase::Ready(endpoint) => return Ok(endpoint),
                    TargetPhase::Exited(code) => return Err(Error::TargetExited { code }),
                    TargetPhase::Running => {}
                }
                if phase_rx.changed().await.is_err() {
                    return Err(Error::NotRunning);
                }
            }
        })
        .await
        .map_err(|_| Error::DiscoveryTimeout(secs))?
    }

    /// Discovered endpoint address, if the target is ready
    pub fn endpoint(&self) -> Option<String> {
        let handle = self.handle.lock();
        match handle.as_ref().map(|h| h.phase_rx.borrow().clone()) {
            Some(TargetPhase::Ready(endpoint)) => Some(endpoint),
            _ => None,
        }
    }

    /// Whether a target process is currently alive
    pub fn is_running(&self) -> bool {
        let handle = self.handle.lock();
        handle
            .as_ref()
            .map(|h| !matches!(*h.phase_rx.borrow(), TargetPhase::Exited(_)))
            .unwrap_or(false)
    }

    /// Process id of the current target
    pub fn pid(&self) -> Option<u32> {
        self.handle.lock().as_ref().and_then(|h| h.pid)
    }

    /// Terminate the target process
    pub async fn kill(&self) -> Result<()> {
        let ctl_tx = {
            let handle = self.handle.lock();
            match handle.as_ref() {
                Some(h) => h.ctl_tx.clone(),
                None => return Err(Error::NotRunning),
            }
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if ctl_tx.send(Control::Kill(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
        // a failed send means the process already exited

        self.handle.lock().take();
        Ok(())
    }

    /// Kill and re-spawn with the same options, re-running discovery
    pub async fn restart(&self) -> Result<()> {
        if self.handle.lock().is_some() {
            self.kill().await?;
        }
        self.start()
    }
}

/// Scan one output stream of the target line by line
///
/// Every line is passed through to the log; the first endpoint match flips
/// the one-shot discovered flag and publishes the ready phase. Later
/// matches are ignored.
async fn scan_output<R>(
    stream: R,
    name: &'static str,
    phase_tx: Arc<watch::Sender<TargetPhase>>,
    discovered: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::info!(target: "inspector_proxy::target", stream = name, "{}", line);
        if discovered.load(Ordering::Relaxed) {
            continue;
        }
        if let Some(endpoint) = discovery::scan_line(&line) {
            if !discovered.swap(true, Ordering::SeqCst) {
                tracing::info!(endpoint, stream = name, "debug endpoint discovered");
                let _ = phase_tx.send(TargetPhase::Ready(endpoint.to_string()));
            }
        }
    }
}

/// Own the child process: report its exit and serve kill requests
async fn supervise(
    mut child: Child,
    mut ctl_rx: mpsc::Receiver<Control>,
    phase_tx: Arc<watch::Sender<TargetPhase>>,
) {
    loop {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                tracing::info!(?code, "debug target exited");
                let _ = phase_tx.send(TargetPhase::Exited(code));
                return;
            }
            ctl = ctl_rx.recv() => match ctl {
                Some(Control::Kill(ack)) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill debug target");
                    }
                    let _ = phase_tx.send(TargetPhase::Exited(None));
                    let _ = ack.send(());
                    return;
                }
                // supervisor handle dropped; kill_on_drop reaps the child
                None => return,
            }
        }
    }
}
