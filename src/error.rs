//! Error taxonomy
//!
//! Startup errors (`EmptyCommand`, `DisplayUnavailable`, `SpawnFailed`) abort
//! before any child is running. Channel errors are best-effort and never end
//! the run; `DisplayLost` ends it mid-flight.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The player invocation had no tokens at all.
    #[error("no player command given; expected e.g. `livewall mpv video.mp4`")]
    EmptyCommand,

    /// Could not reach the X server.
    #[error("cannot connect to the X server (check $DISPLAY): {0}")]
    DisplayUnavailable(String),

    /// The player executable could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The control socket never accepted a connection.
    #[error("control socket {path} unavailable after {attempts} attempts")]
    ChannelUnavailable { path: String, attempts: u32 },

    /// A request got a malformed reply or the socket died mid-exchange.
    #[error("control protocol error: {0}")]
    ProtocolError(String),

    /// The X connection broke while serving events.
    #[error("lost connection to the X server: {0}")]
    DisplayLost(String),
}

impl Error {
    /// Channel errors degrade volume control to a no-op; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::ChannelUnavailable { .. } | Error::ProtocolError(_)
        )
    }
}
