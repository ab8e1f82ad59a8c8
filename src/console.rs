//! Virtual-console arbitration and controlling-terminal state.
//!
//! The kernel hands the console back and forth through a signal pair:
//! SIGUSR1 asks us to release it, SIGUSR2 tells us we got it back. The
//! handlers only flip atomic flags and issue the two async-signal-safe
//! ioctls (VT_RELDISP acknowledgement, DRM master toggle); everything
//! else, including re-rendering, happens on the event loop.
//!
//! The VT_* ioctl numbers are not exposed by the libc crate, so they are
//! defined here for the Linux console.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

const VT_GETMODE: libc::c_ulong = 0x5601;
const VT_SETMODE: libc::c_ulong = 0x5602;
const VT_RELDISP: libc::c_ulong = 0x5605;
const VT_ACKACQ: libc::c_long = 0x02;
const VT_PROCESS: libc::c_char = 0x01;

const DRM_IOCTL_SET_MASTER: libc::c_ulong = 0x641e;
const DRM_IOCTL_DROP_MASTER: libc::c_ulong = 0x641f;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct VtMode {
    mode: libc::c_char,
    waitv: libc::c_char,
    relsig: libc::c_short,
    acqsig: libc::c_short,
    frsig: libc::c_short,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
static DISPLAY_ACTIVE: AtomicBool = AtomicBool::new(true);
// Handlers reach the two descriptors through these; -1 means "not yet".
static CONSOLE_FD: AtomicI32 = AtomicI32::new(-1);
static DRM_FD: AtomicI32 = AtomicI32::new(-1);

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

pub fn display_active() -> bool {
    DISPLAY_ACTIVE.load(Ordering::SeqCst)
}

extern "C" fn on_terminate(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

extern "C" fn on_release(_sig: libc::c_int) {
    DISPLAY_ACTIVE.store(false, Ordering::SeqCst);
    let drm = DRM_FD.load(Ordering::SeqCst);
    if drm >= 0 {
        unsafe {
            libc::ioctl(drm, DRM_IOCTL_DROP_MASTER, 0 as libc::c_long);
        }
    }
    let tty = CONSOLE_FD.load(Ordering::SeqCst);
    if tty >= 0 {
        unsafe {
            libc::ioctl(tty, VT_RELDISP, 1 as libc::c_long);
        }
    }
}

extern "C" fn on_acquire(_sig: libc::c_int) {
    let drm = DRM_FD.load(Ordering::SeqCst);
    if drm >= 0 {
        unsafe {
            libc::ioctl(drm, DRM_IOCTL_SET_MASTER, 0 as libc::c_long);
        }
    }
    let tty = CONSOLE_FD.load(Ordering::SeqCst);
    if tty >= 0 {
        unsafe {
            libc::ioctl(tty, VT_RELDISP, VT_ACKACQ);
        }
    }
    DISPLAY_ACTIVE.store(true, Ordering::SeqCst);
}

pub struct Console {
    file: File,
    saved_termios: libc::termios,
    saved_vt: Option<VtMode>,
    restored: bool,
}

impl Console {
    /// Open the controlling terminal, switch it to raw, and install
    /// process-controlled VT switching with SIGUSR1/SIGUSR2. Termination
    /// signals are routed to a shutdown flag here as well.
    pub fn init(drm_fd: RawFd) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
        let fd = file.as_raw_fd();

        let mut tio = unsafe { std::mem::zeroed::<libc::termios>() };
        if unsafe { libc::tcgetattr(fd, &mut tio) } == -1 {
            return Err(io::Error::last_os_error());
        }
        let saved_termios = tio;
        unsafe { libc::cfmakeraw(&mut tio) };
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } == -1 {
            return Err(io::Error::last_os_error());
        }

        // VT arbitration only works on a real virtual console. A pty (ssh,
        // nested terminal) fails here; run without handoff in that case.
        let mut vt = unsafe { std::mem::zeroed::<VtMode>() };
        let saved_vt = if unsafe { libc::ioctl(fd, VT_GETMODE, &mut vt) } == -1 {
            log::warn!(
                "not a virtual console, running without VT handoff: {}",
                io::Error::last_os_error()
            );
            None
        } else {
            let saved = vt;
            let mut process_mode = vt;
            process_mode.mode = VT_PROCESS;
            process_mode.relsig = libc::SIGUSR1 as libc::c_short;
            process_mode.acqsig = libc::SIGUSR2 as libc::c_short;
            if unsafe { libc::ioctl(fd, VT_SETMODE, &process_mode) } == -1 {
                let e = io::Error::last_os_error();
                let _ = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &saved_termios) };
                return Err(e);
            }
            Some(saved)
        };

        install_handler(libc::SIGUSR1, on_release)?;
        install_handler(libc::SIGUSR2, on_acquire)?;
        install_handler(libc::SIGTERM, on_terminate)?;
        install_handler(libc::SIGINT, on_terminate)?;
        install_handler(libc::SIGHUP, on_terminate)?;

        CONSOLE_FD.store(fd, Ordering::SeqCst);
        DRM_FD.store(drm_fd, Ordering::SeqCst);
        DISPLAY_ACTIVE.store(true, Ordering::SeqCst);

        Ok(Console {
            file,
            saved_termios,
            saved_vt,
            restored: false,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Undo raw mode and VT process mode. Idempotent; also runs on drop.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;
        CONSOLE_FD.store(-1, Ordering::SeqCst);
        DRM_FD.store(-1, Ordering::SeqCst);
        let fd = self.file.as_raw_fd();
        if let Some(saved) = self.saved_vt {
            if unsafe { libc::ioctl(fd, VT_SETMODE, &saved) } == -1 {
                log::warn!("failed to restore VT mode: {}", io::Error::last_os_error());
            }
        }
        if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &self.saved_termios) } == -1 {
            log::warn!("failed to restore termios: {}", io::Error::last_os_error());
        }
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Install a handler without SA_RESTART, so the blocking poll wakes with
/// EINTR when a signal lands.
fn install_handler(sig: libc::c_int, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
    unsafe {
        let mut action = std::mem::zeroed::<libc::sigaction>();
        action.sa_sigaction = handler as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
