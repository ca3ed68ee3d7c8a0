//! Control Channel
//!
//! Line-oriented JSON client for the player's IPC socket. The socket appears
//! asynchronously after spawn, so connecting retries with a fixed backoff.
//! Every exchange is one request line, one reply line, under a bounded
//! timeout; a broken exchange marks the channel and the next call makes a
//! single reconnect attempt before giving up for that invocation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::error::Error;

/// One request line on the wire
#[derive(Debug, Serialize)]
struct Request<'a> {
    command: &'a [Value],
}

/// One reply line. mpv answers with an `error` field; the generic shape uses
/// `status`. Either key is accepted, `"success"` means ok.
#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl Reply {
    fn outcome(&self) -> Result<(), String> {
        let field = self.status.as_deref().or(self.error.as_deref());
        match field {
            Some("success") => Ok(()),
            Some(other) => Err(other.to_string()),
            None => Err("reply carried no status".to_string()),
        }
    }
}

/// Client side of the player's control socket
#[derive(Debug)]
pub struct ControlChannel {
    path: PathBuf,
    send_timeout: Duration,
    stream: Option<BufReader<UnixStream>>,
}

impl ControlChannel {
    /// Connect, retrying while the player creates its endpoint.
    pub async fn connect(
        path: &Path,
        max_attempts: u32,
        backoff: Duration,
        send_timeout: Duration,
    ) -> Result<Self, Error> {
        for attempt in 1..=max_attempts {
            match UnixStream::connect(path).await {
                Ok(stream) => {
                    info!("Connected to control socket {} (attempt {})", path.display(), attempt);
                    return Ok(Self {
                        path: path.to_path_buf(),
                        send_timeout,
                        stream: Some(BufReader::new(stream)),
                    });
                }
                Err(e) => {
                    debug!(
                        "Control socket not ready ({}), attempt {}/{}",
                        e, attempt, max_attempts
                    );
                    // No point sleeping after the last attempt
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(Error::ChannelUnavailable {
            path: path.display().to_string(),
            attempts: max_attempts,
        })
    }

    /// One quick connection attempt, used to detect a live instance.
    pub async fn probe(path: &Path, timeout: Duration) -> Option<UnixStream> {
        match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => Some(stream),
            _ => None,
        }
    }

    /// Send one command, read exactly one reply line.
    ///
    /// A dead channel gets a single reconnect attempt first; failure of that
    /// attempt, an I/O error, a timeout, or a malformed reply all surface as
    /// an error and the caller drops the effect.
    pub async fn send(&mut self, command: &[Value]) -> Result<(), Error> {
        if self.stream.is_none() {
            debug!("Channel broken, attempting reconnect");
            let stream = UnixStream::connect(&self.path).await.map_err(|_| {
                Error::ChannelUnavailable {
                    path: self.path.display().to_string(),
                    attempts: 1,
                }
            })?;
            self.stream = Some(BufReader::new(stream));
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::ProtocolError("channel closed".into()));
        };

        match tokio::time::timeout(self.send_timeout, Self::exchange(stream, command)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stream = None;
                Err(e)
            }
            Err(_) => {
                self.stream = None;
                Err(Error::ProtocolError("request timed out".into()))
            }
        }
    }

    async fn exchange(
        stream: &mut BufReader<UnixStream>,
        command: &[Value],
    ) -> Result<(), Error> {
        let mut line = serde_json::to_string(&Request { command })
            .map_err(|e| Error::ProtocolError(e.to_string()))?;
        line.push('\n');

        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::ProtocolError(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::ProtocolError(e.to_string()))?;

        let mut reply_line = String::new();
        let n = stream
            .read_line(&mut reply_line)
            .await
            .map_err(|e| Error::ProtocolError(e.to_string()))?;
        if n == 0 {
            return Err(Error::ProtocolError("peer closed the socket".into()));
        }

        let reply: Reply = serde_json::from_str(reply_line.trim_end())
            .map_err(|e| Error::ProtocolError(format!("malformed reply: {e}")))?;

        reply
            .outcome()
            .map_err(|status| Error::ProtocolError(format!("peer reported: {status}")))
    }

    /// Relative volume adjustment; a failure here is logged and dropped.
    pub async fn adjust_volume(&mut self, delta: i64) -> Result<(), Error> {
        info!("Volume {}{}", if delta >= 0 { "+" } else { "" }, delta);
        self.send(&[json!("add"), json!("volume"), json!(delta)])
            .await
    }
}

/// Fire-and-forget command over a fresh connection, used by the
/// single-instance replace path where no reply is read (the running
/// instance's event loop owns the request/response stream).
pub async fn send_oneshot(path: &Path, command: &[Value]) {
    let mut line = match serde_json::to_string(&Request { command }) {
        Ok(line) => line,
        Err(e) => {
            warn!("IPC encode error: {}", e);
            return;
        }
    };
    line.push('\n');

    match UnixStream::connect(path).await {
        Ok(mut stream) => {
            if let Err(e) = stream.write_all(line.as_bytes()).await {
                warn!("IPC error: {}", e);
            }
        }
        Err(e) => warn!("IPC error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    const FAST: Duration = Duration::from_millis(10);

    /// Accept one client and answer each request line with `reply`.
    fn fake_player(listener: UnixListener, reply: &'static str) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            while stream.read_line(&mut line).await.unwrap() > 0 {
                let req: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
                assert!(req["command"].is_array());
                stream
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .unwrap();
                line.clear();
            }
        });
    }

    #[tokio::test]
    async fn connect_fails_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.sock");

        let err = ControlChannel::connect(&path, 3, FAST, FAST)
            .await
            .unwrap_err();
        match err {
            Error::ChannelUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected ChannelUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_does_not_sleep_after_the_last_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.sock");
        let backoff = Duration::from_millis(100);

        let start = std::time::Instant::now();
        let err = ControlChannel::connect(&path, 3, backoff, FAST)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable { .. }));
        // Two sleeps between three attempts, none after the last
        assert!(start.elapsed() < backoff * 3);
    }

    #[tokio::test]
    async fn adjust_volume_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        fake_player(UnixListener::bind(&path).unwrap(), r#"{"error":"success"}"#);

        let mut channel = ControlChannel::connect(&path, 5, FAST, Duration::from_secs(1))
            .await
            .unwrap();
        channel.adjust_volume(5).await.unwrap();
        channel.adjust_volume(-5).await.unwrap();
    }

    #[tokio::test]
    async fn status_field_is_accepted_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        fake_player(UnixListener::bind(&path).unwrap(), r#"{"status":"success"}"#);

        let mut channel = ControlChannel::connect(&path, 5, FAST, Duration::from_secs(1))
            .await
            .unwrap();
        channel.adjust_volume(5).await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_surfaces_as_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        fake_player(
            UnixListener::bind(&path).unwrap(),
            r#"{"error":"invalid parameter"}"#,
        );

        let mut channel = ControlChannel::connect(&path, 5, FAST, Duration::from_secs(1))
            .await
            .unwrap();
        let err = channel.adjust_volume(5).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[tokio::test]
    async fn malformed_reply_breaks_channel_then_one_reconnect_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&path).unwrap();

        // First connection answers garbage, later connections answer properly.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            stream.write_all(b"not json at all\n").await.unwrap();
            drop(stream);

            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            while stream.read_line(&mut line).await.unwrap() > 0 {
                stream
                    .write_all(b"{\"error\":\"success\"}\n")
                    .await
                    .unwrap();
                line.clear();
            }
        });

        let mut channel = ControlChannel::connect(&path, 5, FAST, Duration::from_secs(1))
            .await
            .unwrap();

        let err = channel.adjust_volume(5).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));

        // Single reconnect on the next call
        channel.adjust_volume(5).await.unwrap();
    }
}
