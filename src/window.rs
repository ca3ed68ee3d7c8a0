//! Host Window
//!
//! Creates the full-screen, override-redirect window the player renders into.
//! The window is classified `_NET_WM_WINDOW_TYPE_DESKTOP` so cooperating
//! managers and compositors keep it on the background layer, and it is never
//! explicitly destroyed; process exit tears it down.

use tracing::info;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::wrapper::ConnectionExt as _;

use crate::display::DisplaySession;
use crate::error::Error;

/// Holds the interned atoms the host window needs
#[derive(Debug)]
pub struct Atoms {
    pub net_wm_window_type: Atom,
    pub net_wm_window_type_desktop: Atom,
}

impl Atoms {
    /// Intern all required atoms
    pub fn new<C: Connection>(conn: &C) -> Result<Self, Error> {
        let intern = |name: &str| -> Result<Atom, Error> {
            Ok(conn
                .intern_atom(false, name.as_bytes())
                .map_err(|e| Error::DisplayLost(e.to_string()))?
                .reply()
                .map_err(|e| Error::DisplayLost(e.to_string()))?
                .atom)
        };

        Ok(Self {
            net_wm_window_type: intern("_NET_WM_WINDOW_TYPE")?,
            net_wm_window_type_desktop: intern("_NET_WM_WINDOW_TYPE_DESKTOP")?,
        })
    }
}

/// The mapped host window. `id` is what gets handed to the player.
pub struct HostWindow {
    pub id: u32,
}

impl HostWindow {
    /// Create, classify, and map the full-screen window.
    ///
    /// Returns only after a sync with the server, so the id is valid for
    /// substitution into the player's arguments.
    pub fn create(session: &DisplaySession) -> Result<Self, Error> {
        let conn = session.conn.as_ref();
        let x11 = |e: x11rb::errors::ConnectionError| Error::DisplayLost(e.to_string());
        let x11_id = |e: x11rb::errors::ReplyOrIdError| Error::DisplayLost(e.to_string());

        let atoms = Atoms::new(conn)?;

        let win = conn.generate_id().map_err(x11_id)?;
        conn.create_window(
            session.root_depth,
            win,
            session.root,
            0,
            0,
            session.width,
            session.height,
            0,
            WindowClass::INPUT_OUTPUT,
            0, // CopyFromParent visual
            &CreateWindowAux::new()
                .background_pixel(0)
                .override_redirect(1)
                .event_mask(
                    EventMask::EXPOSURE | EventMask::STRUCTURE_NOTIFY | EventMask::KEY_PRESS,
                ),
        )
        .map_err(x11)?;

        // Desktop-classified so compositors stack it with the background
        conn.change_property32(
            PropMode::REPLACE,
            win,
            atoms.net_wm_window_type,
            AtomEnum::ATOM,
            &[atoms.net_wm_window_type_desktop],
        )
        .map_err(x11)?;

        conn.map_window(win).map_err(x11)?;

        // Round-trip before returning so the id is server-valid
        conn.get_input_focus()
            .map_err(|e| Error::DisplayLost(e.to_string()))?
            .reply()
            .map_err(|e| Error::DisplayLost(e.to_string()))?;

        conn.configure_window(win, &ConfigureWindowAux::new().stack_mode(StackMode::BELOW))
            .map_err(x11)?;
        conn.flush().map_err(x11)?;

        info!("Host window id: 0x{:x}", win);

        Ok(Self { id: win })
    }

    /// Handle rendered the way it is substituted into player arguments.
    pub fn hex_id(&self) -> String {
        format!("0x{:x}", self.id)
    }
}
