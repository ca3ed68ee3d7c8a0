//! Player Process
//!
//! Spawns the external player and owns its lifecycle. Stdio is inherited so
//! player diagnostics stay on the invoking terminal. `kill_on_drop` keeps a
//! crashed run from orphaning the player.

use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::command::NormalizedCommand;
use crate::error::Error;

/// Observable lifecycle of the spawned player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    Exited(i32),
    Killed,
}

impl Lifecycle {
    pub fn is_running(&self) -> bool {
        matches!(self, Lifecycle::Running)
    }
}

/// The spawned player process
#[derive(Debug)]
pub struct Player {
    child: Child,
    command: String,
}

impl Player {
    /// Spawn the normalized command. Spawn failure is terminal; there is no
    /// retry.
    pub fn launch(cmd: &NormalizedCommand) -> Result<Self, Error> {
        let program = &cmd.argv[0];
        info!("Executing: {:?}", cmd.argv);

        let child = Command::new(program)
            .args(&cmd.argv[1..])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::SpawnFailed {
                command: program.clone(),
                source,
            })?;

        if let Some(pid) = child.id() {
            info!("Player started, pid {}", pid);
        }

        Ok(Self {
            child,
            command: program.clone(),
        })
    }

    /// Non-blocking lifecycle check.
    pub fn poll(&mut self) -> Lifecycle {
        match self.child.try_wait() {
            Ok(None) => Lifecycle::Running,
            Ok(Some(status)) => match status.code() {
                Some(code) => Lifecycle::Exited(code),
                None => Lifecycle::Killed, // ended by signal
            },
            Err(e) => {
                warn!("Failed to poll {}: {}", self.command, e);
                Lifecycle::Killed
            }
        }
    }

    /// Block until the player exits; returns its exit code (0 when ended by
    /// signal after our own terminate).
    pub async fn wait(&mut self) -> i32 {
        match self.child.wait().await {
            Ok(status) => status.code().unwrap_or(0),
            Err(e) => {
                warn!("Failed to wait for {}: {}", self.command, e);
                1
            }
        }
    }

    /// Forward termination to the player. Idempotent; used from the shutdown
    /// path so a parent signal never leaves the player behind.
    pub async fn terminate(&mut self) {
        if self.poll().is_running() {
            info!("Terminating player {}", self.command);
            if let Err(e) = self.child.kill().await {
                warn!("Failed to terminate player: {}", e);
            }
        }
    }
}
