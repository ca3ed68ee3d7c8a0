//! Input Event Loop
//!
//! Serves two readiness sources from one task: the X11 event queue and the
//! player's lifecycle. The X11 file descriptor is watched by mio in a
//! background thread that pings a tokio `Notify`, so the select below never
//! blocks on the server while the player exits unnoticed; the player side is
//! covered by a bounded-interval poll.

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::ConnectionExt;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::config::Config;
use crate::error::Error;
use crate::ipc::ControlChannel;
use crate::player::{Lifecycle, Player};

const KEYSYM_UP: u32 = 0xff52;
const KEYSYM_DOWN: u32 = 0xff54;

/// Awaitable readiness for the X connection.
///
/// x11rb's `RustConnection` only offers blocking or non-blocking reads, so a
/// watcher thread parks on the connection's file descriptor with mio and
/// pings a `Notify` whenever bytes arrive. That turns "an X event may be
/// pending" into a future the volume loop can race against its other
/// sources. The watcher wakes every 100ms to check whether the stream was
/// dropped.
pub struct EventStream {
    conn: Arc<RustConnection>,
    notify: Arc<Notify>,
    _watcher_guard: oneshot::Receiver<()>,
}

impl EventStream {
    pub fn new(conn: Arc<RustConnection>) -> Result<Self> {
        let fd = conn.stream().as_raw_fd();
        let notify = Arc::new(Notify::new());
        let watcher_notify = notify.clone();

        let (guard, watcher_guard) = oneshot::channel::<()>();
        let mut poll = mio::Poll::new().context("mio poll setup failed")?;
        let mut readiness = mio::Events::with_capacity(1);

        poll.registry()
            .register(
                &mut mio::unix::SourceFd(&fd),
                mio::Token(0),
                mio::Interest::READABLE,
            )
            .context("could not watch the X connection's descriptor")?;

        let wake_interval = Duration::from_millis(100);
        tokio::task::spawn_blocking(move || {
            loop {
                // guard closes when the EventStream is dropped
                if guard.is_closed() {
                    debug!("X readiness watcher stopping");
                    return;
                }

                if let Err(err) = poll.poll(&mut readiness, Some(wake_interval)) {
                    warn!("X readiness watch error: {:?}", err);
                    continue;
                }

                readiness
                    .iter()
                    .filter(|event| event.token() == mio::Token(0))
                    .for_each(|_| watcher_notify.notify_one());
            }
        });

        Ok(Self {
            conn,
            notify,
            _watcher_guard: watcher_guard,
        })
    }

    /// Non-blocking: drain one already-buffered event, if any.
    pub fn poll_next_event(&self) -> Result<Option<Event>> {
        Ok(self.conn.as_ref().poll_for_event()?)
    }

    /// Resolves once the watcher sees the descriptor readable.
    pub async fn wait_readable(&self) {
        self.notify.notified().await;
    }

    pub fn flush(&self) -> Result<()> {
        self.conn.as_ref().flush()?;
        Ok(())
    }
}

/// Keycode-to-keysym table, fetched once from the server.
pub struct KeyMap {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

impl KeyMap {
    pub fn fetch(conn: &RustConnection) -> Result<Self, Error> {
        let setup = conn.setup();
        let min_keycode = setup.min_keycode;
        let count = setup.max_keycode - min_keycode + 1;

        let reply = conn
            .get_keyboard_mapping(min_keycode, count)
            .map_err(|e| Error::DisplayLost(e.to_string()))?
            .reply()
            .map_err(|e| Error::DisplayLost(e.to_string()))?;

        Ok(Self {
            min_keycode,
            keysyms_per_keycode: reply.keysyms_per_keycode,
            keysyms: reply.keysyms,
        })
    }

    /// Unshifted keysym for a keycode, if the server reported one.
    pub fn keysym(&self, keycode: u8) -> Option<u32> {
        if keycode < self.min_keycode {
            return None;
        }
        let index = (keycode - self.min_keycode) as usize * self.keysyms_per_keycode as usize;
        self.keysyms.get(index).copied()
    }
}

/// Direction a recognized volume key maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKey {
    Up,
    Down,
}

impl VolumeKey {
    pub fn from_keysym(keysym: u32) -> Option<Self> {
        match keysym {
            KEYSYM_UP => Some(VolumeKey::Up),
            KEYSYM_DOWN => Some(VolumeKey::Down),
            _ => None,
        }
    }

    pub fn delta(self, step: i64) -> i64 {
        match self {
            VolumeKey::Up => step,
            VolumeKey::Down => -step,
        }
    }
}

/// Loop lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    WaitingForWindow,
    ServingEvents,
    ShuttingDown,
}

/// Why the loop ended
#[derive(Debug)]
pub enum LoopOutcome {
    /// Player exited on its own; carries its exit code (0 when signalled).
    PlayerExited(i32),
    /// External shutdown signal; the caller terminates the player.
    Interrupted,
}

/// Drives key events into the control channel until the player exits.
pub struct EventLoop {
    stream: EventStream,
    keymap: KeyMap,
    channel: Option<ControlChannel>,
    volume_step: i64,
    poll_interval: Duration,
    state: LoopState,
}

impl EventLoop {
    pub fn new(
        conn: Arc<RustConnection>,
        channel: Option<ControlChannel>,
        config: &Config,
    ) -> Result<Self, Error> {
        let keymap = KeyMap::fetch(conn.as_ref())?;
        let stream = EventStream::new(conn)
            .map_err(|e| Error::DisplayLost(e.to_string()))?;

        Ok(Self {
            stream,
            keymap,
            channel,
            volume_step: config.volume.step,
            poll_interval: Duration::from_millis(config.channel.poll_interval_ms),
            state: LoopState::WaitingForWindow,
        })
    }

    /// Run until the player exits, the display dies, or a shutdown arrives.
    pub async fn run(
        &mut self,
        player: &mut Player,
        shutdown_rx: &mut mpsc::Receiver<()>,
    ) -> Result<LoopOutcome, Error> {
        self.state = LoopState::ServingEvents;
        info!("Serving key events");

        let mut poll_tick = tokio::time::interval(self.poll_interval);
        poll_tick.tick().await; // skip the immediate first tick

        loop {
            if self.state == LoopState::ShuttingDown {
                return Ok(LoopOutcome::Interrupted);
            }

            if let Err(e) = self.stream.flush() {
                return Err(Error::DisplayLost(e.to_string()));
            }

            tokio::select! {
                () = self.stream.wait_readable() => {
                    loop {
                        match self.stream.poll_next_event() {
                            Ok(Some(event)) => self.handle_event(event).await,
                            Ok(None) => break,
                            Err(e) => return Err(Error::DisplayLost(e.to_string())),
                        }
                    }
                }

                _ = poll_tick.tick() => {
                    if let Some(outcome) = Self::tick_outcome(player.poll()) {
                        info!("Player gone ({:?}), leaving event loop", outcome);
                        self.state = LoopState::ShuttingDown;
                        return Ok(outcome);
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, leaving event loop");
                    self.state = LoopState::ShuttingDown;
                }
            }
        }
    }

    /// Terminal-condition check run once per poll tick: a player that is no
    /// longer running ends the loop, carrying its exit code (0 when it was
    /// ended by a signal).
    fn tick_outcome(lifecycle: Lifecycle) -> Option<LoopOutcome> {
        match lifecycle {
            Lifecycle::Running => None,
            Lifecycle::Exited(code) => Some(LoopOutcome::PlayerExited(code)),
            Lifecycle::Killed => Some(LoopOutcome::PlayerExited(0)),
        }
    }

    async fn handle_event(&mut self, event: Event) {
        let Event::KeyPress(press) = event else {
            return;
        };

        let Some(key) = self
            .keymap
            .keysym(press.detail)
            .and_then(VolumeKey::from_keysym)
        else {
            return;
        };

        let delta = key.delta(self.volume_step);
        match self.channel.as_mut() {
            Some(channel) => {
                // Best effort: a dropped adjustment is not worth ending the run
                if let Err(e) = channel.adjust_volume(delta).await {
                    warn!("Volume adjustment dropped: {}", e);
                }
            }
            None => debug!("No control channel, ignoring volume key"),
        }
    }
}
