// Tunnels that make a controller endpoint reachable from this host.
//
// `SshPortForward` and `Sshuttle` own an `ssh` / `sshuttle` child process.
// Children are spawned with `kill_on_drop(true)`, so a dropped tunnel never
// leaves an orphan behind even if `clean()` was skipped.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::CoreError;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// A way of reaching a controller.
#[derive(Debug)]
pub enum Tunnel {
    /// Controller is routable as configured; no subprocess.
    Direct { connected: bool },
    /// `ssh <destination> -N -L localhost:<local_port>:<remote_endpoint> [-J jump]...`
    SshPortForward {
        local_port: u16,
        remote_endpoint: String,
        destination: String,
        jumps: Vec<String>,
        process: Option<TunnelProcess>,
    },
    /// `sshuttle <subnets...> -r <destination> [-e "ssh -J jump ..."]`
    Sshuttle {
        subnets: Vec<String>,
        destination: String,
        jumps: Vec<String>,
        process: Option<TunnelProcess>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TunnelKind {
    Direct,
    SshPortForward,
    Sshuttle,
}

impl Tunnel {
    pub fn direct() -> Self {
        Self::Direct { connected: false }
    }

    pub fn ssh_port_forward(
        local_port: u16,
        remote_endpoint: impl Into<String>,
        destination: impl Into<String>,
        jumps: Vec<String>,
    ) -> Self {
        Self::SshPortForward {
            local_port,
            remote_endpoint: remote_endpoint.into(),
            destination: destination.into(),
            jumps,
            process: None,
        }
    }

    pub fn sshuttle(subnets: Vec<String>, destination: impl Into<String>, jumps: Vec<String>) -> Self {
        Self::Sshuttle {
            subnets,
            destination: destination.into(),
            jumps,
            process: None,
        }
    }

    pub fn kind(&self) -> TunnelKind {
        match self {
            Self::Direct { .. } => TunnelKind::Direct,
            Self::SshPortForward { .. } => TunnelKind::SshPortForward,
            Self::Sshuttle { .. } => TunnelKind::Sshuttle,
        }
    }

    /// Local address the tunnel listens on, for port-forwards.
    pub fn local_endpoint(&self) -> Option<String> {
        match self {
            Self::SshPortForward { local_port, .. } => Some(format!("localhost:{local_port}")),
            Self::Direct { .. } | Self::Sshuttle { .. } => None,
        }
    }

    /// Program and arguments spawned by [`connect`](Self::connect).
    pub fn command_line(&self) -> Option<(&'static str, Vec<String>)> {
        match self {
            Self::Direct { .. } => None,
            Self::SshPortForward {
                local_port,
                remote_endpoint,
                destination,
                jumps,
                ..
            } => {
                let mut args = vec![
                    destination.clone(),
                    "-N".to_owned(),
                    "-L".to_owned(),
                    format!("localhost:{local_port}:{remote_endpoint}"),
                ];
                args.extend(jump_flags(jumps));
                Some(("ssh", args))
            }
            Self::Sshuttle {
                subnets,
                destination,
                jumps,
                ..
            } => {
                let mut args = subnets.clone();
                args.push("-r".to_owned());
                args.push(destination.clone());
                if !jumps.is_empty() {
                    let ssh = std::iter::once("ssh".to_owned())
                        .chain(jump_flags(jumps))
                        .collect::<Vec<_>>()
                        .join(" ");
                    args.push("-e".to_owned());
                    args.push(ssh);
                }
                Some(("sshuttle", args))
            }
        }
    }

    /// Start the tunnel in the background and return immediately.
    ///
    /// Reachability is established by the retrying dial that follows, not
    /// here. Calling `connect` on a running tunnel is a no-op.
    pub fn connect(&mut self) -> Result<(), CoreError> {
        let command_line = self.command_line();
        match self {
            Self::Direct { connected } => {
                *connected = true;
                Ok(())
            }
            Self::SshPortForward { process, .. } | Self::Sshuttle { process, .. } => {
                if process.as_mut().is_some_and(TunnelProcess::is_alive) {
                    return Ok(());
                }
                let Some((program, args)) = command_line else {
                    return Err(CoreError::Internal("tunnel without a command line".into()));
                };
                *process = Some(TunnelProcess::spawn(program, &args)?);
                Ok(())
            }
        }
    }

    /// `true` while the subprocess is alive (or, for `Direct`, between
    /// `connect` and `clean`).
    pub fn is_connected(&mut self) -> bool {
        match self {
            Self::Direct { connected } => *connected,
            Self::SshPortForward { process, .. } | Self::Sshuttle { process, .. } => {
                process.as_mut().is_some_and(TunnelProcess::is_alive)
            }
        }
    }

    /// Terminate the subprocess. Never fails; safe to call repeatedly.
    pub async fn clean(&mut self) {
        match self {
            Self::Direct { connected } => *connected = false,
            Self::SshPortForward { process, .. } | Self::Sshuttle { process, .. } => {
                if let Some(process) = process.take() {
                    process.terminate().await;
                }
            }
        }
    }
}

impl fmt::Display for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command_line() {
            Some((program, args)) => write!(f, "{program} {}", args.join(" ")),
            None => f.write_str("direct"),
        }
    }
}

fn jump_flags(jumps: &[String]) -> impl Iterator<Item = String> + '_ {
    jumps
        .iter()
        .flat_map(|jump| ["-J".to_owned(), jump.clone()])
}

// ── Subprocess handling ──────────────────────────────────────────────

/// A background tunnel subprocess.
#[derive(Debug)]
pub struct TunnelProcess {
    program: String,
    child: Child,
}

impl TunnelProcess {
    /// Spawn `program args...` detached from our stdio.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, CoreError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::TunnelSpawn {
                program: program.to_owned(),
                reason: e.to_string(),
            })?;

        info!(program, pid = ?child.id(), args = ?args, "tunnel started");
        Ok(Self {
            program: program.to_owned(),
            child,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, wait up to [`TERMINATE_GRACE`], then SIGKILL.
    pub async fn terminate(mut self) {
        if !self.is_alive() {
            debug!(program = %self.program, "tunnel already exited");
            return;
        }

        send_sigterm(&mut self.child);

        match tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(program = %self.program, %status, "tunnel terminated"),
            Ok(Err(e)) => warn!(program = %self.program, error = %e, "failed to reap tunnel"),
            Err(_) => {
                warn!(program = %self.program, "tunnel ignored SIGTERM, killing");
                if let Err(e) = self.child.kill().await {
                    warn!(program = %self.program, error = %e, "failed to kill tunnel");
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "failed to stop tunnel");
    }
}
