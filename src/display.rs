//! Display Session
//!
//! Owns the X11 connection and root-screen geometry. Every other component
//! borrows the connection from here; nothing opens its own.

use std::sync::Arc;
use tracing::info;
use x11rb::connection::Connection;
use x11rb::rust_connection::RustConnection;

use crate::error::Error;

/// One connection to the X server plus the default screen's geometry.
pub struct DisplaySession {
    pub conn: Arc<RustConnection>,
    pub root: u32,
    pub root_depth: u8,
    pub width: u16,
    pub height: u16,
}

impl DisplaySession {
    /// Connect to the server named by `$DISPLAY`.
    pub fn connect() -> Result<Self, Error> {
        let (conn, screen_num) =
            x11rb::connect(None).map_err(|e| Error::DisplayUnavailable(e.to_string()))?;
        let conn = Arc::new(conn);

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let root_depth = screen.root_depth;
        let width = screen.width_in_pixels;
        let height = screen.height_in_pixels;

        info!(
            "Connected to X server, screen {}, root window 0x{:x}, {}x{}",
            screen_num, root, width, height
        );

        Ok(Self {
            conn,
            root,
            root_depth,
            width,
            height,
        })
    }
}
