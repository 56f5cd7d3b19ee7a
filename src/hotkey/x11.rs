//! X11 integration: connection, key grabs, keyboard grab, focus query and
//! the event thread.
//!
//! Wraps `x11rb::rust_connection::RustConnection`. Key events are read on
//! a dedicated polling thread and handed to the async loop over a channel.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use x11rb::connection::Connection;
use x11rb::errors::ConnectionError;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{self, Atom, GrabMode, GrabStatus, ModMask, Window};
use x11rb::rust_connection::RustConnection;

use super::HotkeyError;
use super::keybinding::Binding;

/// Lock modifier bits to mask during XGrabKey registration.
///
/// NumLock = Mod2 (bit 4), CapsLock = Lock (bit 1). Each grab is
/// registered with all four combinations so shortcuts fire regardless
/// of lock state.
const LOCK_MASK: u16 = 0x0002;
const NUM_LOCK_MASK: u16 = 0x0010;
const LOCK_MASKS: [u16; 4] = [0, LOCK_MASK, NUM_LOCK_MASK, LOCK_MASK | NUM_LOCK_MASK];

struct Atoms {
    net_active_window: Atom,
    net_wm_pid: Atom,
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom, HotkeyError> {
    Ok(xproto::intern_atom(conn, false, name)
        .map_err(|e| HotkeyError::X11(format!("intern_atom: {e}")))?
        .reply()
        .map_err(|e| HotkeyError::X11(format!("intern_atom reply: {e}")))?
        .atom)
}

/// One X11 client connection.
pub struct X11Context {
    conn: Arc<RustConnection>,
    root: Window,
    atoms: Atoms,
}

impl X11Context {
    /// Connect to `$DISPLAY` and intern the focus atoms.
    pub fn connect() -> Result<Self, HotkeyError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| HotkeyError::X11(format!("connect failed: {e}")))?;

        let root = conn.setup().roots[screen_num].root;
        let atoms = Atoms {
            net_active_window: intern(&conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_pid: intern(&conn, b"_NET_WM_PID")?,
        };

        Ok(Self {
            conn: Arc::new(conn),
            root,
            atoms,
        })
    }

    /// Register a passive grab for `binding` on the root window.
    ///
    /// Returns `Ok(false)` if any lock-mask variant conflicts with another
    /// client's grab; the variants that succeeded stay registered.
    pub fn grab_key(&self, binding: &Binding) -> Result<bool, HotkeyError> {
        let mut all_ok = true;

        for &lock_mask in &LOCK_MASKS {
            let mods = ModMask::from(binding.modifiers | lock_mask);

            let cookie = xproto::grab_key(
                &*self.conn,
                true,
                self.root,
                mods,
                binding.keycode,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
            )
            .map_err(|e| HotkeyError::X11(format!("grab_key send: {e}")))?;

            if let Err(e) = cookie.check() {
                tracing::warn!(
                    binding = %binding.raw,
                    lock_mask,
                    error = %e,
                    "XGrabKey failed, shortcut may be taken by another application"
                );
                all_ok = false;
            }
        }

        Ok(all_ok)
    }

    /// Drop all lock-mask variants of `binding`. Best-effort.
    pub fn ungrab_key(&self, binding: &Binding) {
        for &lock_mask in &LOCK_MASKS {
            let mods = ModMask::from(binding.modifiers | lock_mask);

            if let Err(e) = xproto::ungrab_key(&*self.conn, binding.keycode, self.root, mods) {
                tracing::debug!(binding = %binding.raw, error = %e, "XUngrabKey failed");
            }
        }
        self.flush();
    }

    /// Take the whole keyboard so the release of the held modifier is
    /// delivered to us. Returns whether the grab was granted.
    pub fn grab_keyboard(&self) -> Result<bool, HotkeyError> {
        let reply = xproto::grab_keyboard(
            &*self.conn,
            true,
            self.root,
            x11rb::CURRENT_TIME,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )
        .map_err(|e| HotkeyError::X11(format!("grab_keyboard: {e}")))?
        .reply()
        .map_err(|e| HotkeyError::X11(format!("grab_keyboard reply: {e}")))?;

        if reply.status != GrabStatus::SUCCESS {
            tracing::debug!(status = ?reply.status, "keyboard grab refused");
            return Ok(false);
        }
        Ok(true)
    }

    pub fn ungrab_keyboard(&self) {
        if let Err(e) = xproto::ungrab_keyboard(&*self.conn, x11rb::CURRENT_TIME) {
            tracing::debug!(error = %e, "XUngrabKeyboard failed");
        }
        self.flush();
    }

    /// Whether any of `keycodes` is currently down.
    pub fn any_key_down(&self, keycodes: &[u8]) -> Result<bool, HotkeyError> {
        let keys = xproto::query_keymap(&*self.conn)
            .map_err(|e| HotkeyError::X11(format!("query_keymap: {e}")))?
            .reply()
            .map_err(|e| HotkeyError::X11(format!("query_keymap reply: {e}")))?
            .keys;

        Ok(keycodes.iter().any(|&code| {
            let byte = keys[usize::from(code / 8)];
            byte & (1 << (code % 8)) != 0
        }))
    }

    /// PID of the focused top-level window.
    ///
    /// Reads `_NET_ACTIVE_WINDOW` on the root, then `_NET_WM_PID` on that
    /// window. `None` if either property is missing.
    pub fn get_active_window_pid(&self) -> Result<Option<u32>, HotkeyError> {
        let Some(window_id) =
            self.get_cardinal(self.root, self.atoms.net_active_window, xproto::AtomEnum::WINDOW)?
        else {
            return Ok(None);
        };
        if window_id == 0 {
            return Ok(None);
        }

        self.get_cardinal(window_id, self.atoms.net_wm_pid, xproto::AtomEnum::CARDINAL)
    }

    fn get_cardinal(
        &self,
        window: Window,
        property: Atom,
        kind: xproto::AtomEnum,
    ) -> Result<Option<u32>, HotkeyError> {
        let reply = xproto::get_property(&*self.conn, false, window, property, kind, 0, 1)
            .map_err(|e| HotkeyError::X11(format!("get_property: {e}")))?
            .reply()
            .map_err(|e| HotkeyError::X11(format!("get_property reply: {e}")))?;

        if reply.format != 32 || reply.value.len() < 4 {
            return Ok(None);
        }

        Ok(Some(u32::from_ne_bytes([
            reply.value[0],
            reply.value[1],
            reply.value[2],
            reply.value[3],
        ])))
    }

    pub fn flush(&self) {
        if let Err(e) = self.conn.flush() {
            tracing::debug!(error = %e, "X11 flush failed");
        }
    }

    pub fn conn(&self) -> &Arc<RustConnection> {
        &self.conn
    }
}

/// Why the event pump stopped.
#[derive(Debug)]
enum PumpEnd {
    Stopped,
    ReceiverGone,
    Failed,
}

/// Spawn a thread that polls the X11 connection and forwards events.
///
/// The connection's queue is drained before each 100ms poll of its fd,
/// so `stop` is noticed promptly and events read by reply waits are not
/// stranded. The thread exits when `stop` is set, the receiver is dropped
/// or the connection fails.
pub fn spawn_event_thread(
    conn: Arc<RustConnection>,
    stop: Arc<AtomicBool>,
) -> Result<(UnboundedReceiver<Event>, JoinHandle<()>), HotkeyError> {
    let (tx, rx) = unbounded_channel();

    let handle = std::thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            let end = pump_events(&*conn, &stop, &tx);
            tracing::debug!(?end, "x11 event thread exiting");
        })
        .map_err(HotkeyError::Thread)?;

    Ok((rx, handle))
}

/// What the pump reads from. Replies the main thread waits for can
/// pull events off the socket into the connection's own queue, where
/// polling the fd will not see them.
trait EventSource {
    type Event;

    /// Wait up to `timeout` for bytes on the wire.
    fn wait_readable(&self, timeout: PollTimeout) -> nix::Result<bool>;

    /// Next event already read, without blocking.
    fn next_queued(&self) -> Result<Option<Self::Event>, ConnectionError>;
}

impl EventSource for RustConnection {
    type Event = Event;

    fn wait_readable(&self, timeout: PollTimeout) -> nix::Result<bool> {
        // SAFETY: the fd belongs to `self`, which outlives this call.
        let fd = unsafe { BorrowedFd::borrow_raw(self.stream().as_raw_fd()) };
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        poll(&mut fds, timeout).map(|ready| ready > 0)
    }

    fn next_queued(&self) -> Result<Option<Event>, ConnectionError> {
        self.poll_for_event()
    }
}

fn pump_events<S: EventSource>(source: &S, stop: &AtomicBool, tx: &UnboundedSender<S::Event>) -> PumpEnd {
    while !stop.load(Ordering::Relaxed) {
        // Drain before every wait, not only after the fd turns readable.
        loop {
            match source.next_queued() {
                Ok(Some(event)) => {
                    if tx.send(event).is_err() {
                        return PumpEnd::ReceiverGone;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "X11 connection lost");
                    return PumpEnd::Failed;
                }
            }
        }

        match source.wait_readable(PollTimeout::from(100u16)) {
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => {
                tracing::error!(error = %e, "poll on X11 fd failed");
                return PumpEnd::Failed;
            }
        }
    }
    PumpEnd::Stopped
}
