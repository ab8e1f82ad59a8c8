//! Control socket: topology commands from a second invocation.
//!
//! Protocol: one stream connection per command. The client writes the
//! long-form token and closes; the server reads at most 63 bytes within
//! 200 ms, applies the command, and closes. Anything unrecognised is
//! logged and dropped; the server never dies on protocol noise.

use std::fs;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted command payload.
const MAX_COMMAND_LEN: usize = 63;
const READ_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NewTab,
    NextTab,
    PrevTab,
    SplitVertical,
    FocusLeft,
    FocusRight,
}

impl Command {
    /// Accepts both the long and short client spellings.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "--new-tab" | "-nt" => Some(Command::NewTab),
            "--next" | "-n" => Some(Command::NextTab),
            "--prev" | "-p" => Some(Command::PrevTab),
            "--split-v" | "-s" => Some(Command::SplitVertical),
            "--left" | "-l" => Some(Command::FocusLeft),
            "--right" | "-r" => Some(Command::FocusRight),
            _ => None,
        }
    }

    /// Normalised long form put on the wire.
    pub fn wire(self) -> &'static str {
        match self {
            Command::NewTab => "--new-tab",
            Command::NextTab => "--next",
            Command::PrevTab => "--prev",
            Command::SplitVertical => "--split-v",
            Command::FocusLeft => "--left",
            Command::FocusRight => "--right",
        }
    }
}

pub fn socket_path() -> PathBuf {
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/vtmux_{uid}.sock"))
}

/// True when a live server answers on the per-user socket.
pub fn server_running() -> bool {
    UnixStream::connect(socket_path()).is_ok()
}

/// Client side: deliver one command to a running server. `Ok(false)` means
/// no server answered and the caller should become the server itself.
pub fn dispatch(command: Command) -> io::Result<bool> {
    match UnixStream::connect(socket_path()) {
        Ok(mut stream) => {
            stream.write_all(command.wire().as_bytes())?;
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

pub struct CtlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl CtlServer {
    pub fn bind() -> io::Result<Self> {
        Self::bind_at(socket_path())
    }

    fn bind_at(path: PathBuf) -> io::Result<Self> {
        // A leftover socket from a dead instance blocks bind; the caller
        // has already checked nothing answers on it.
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        log::info!("control socket at {}", path.display());
        Ok(CtlServer { listener, path })
    }

    pub fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Accept one pending client and read its command, if any.
    pub fn accept_command(&self) -> Option<Command> {
        let (mut stream, _) = match self.listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                log::warn!("control accept failed: {e}");
                return None;
            }
        };
        if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
            log::warn!("control client setup failed: {e}");
            return None;
        }

        let mut buf = [0u8; MAX_COMMAND_LEN + 1];
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                log::warn!("control client read failed: {e}");
                return None;
            }
        };
        if n == 0 {
            log::warn!("control client sent no command");
            return None;
        }
        if n > MAX_COMMAND_LEN {
            log::warn!("control command over {MAX_COMMAND_LEN} bytes dropped");
            return None;
        }
        let token = match std::str::from_utf8(&buf[..n]) {
            Ok(s) => s.trim_end_matches(['\n', '\0']),
            Err(_) => {
                log::warn!("control command was not UTF-8");
                return None;
            }
        };
        match Command::parse(token) {
            Some(command) => Some(command),
            None => {
                log::warn!("unknown control command {token:?}");
                None
            }
        }
    }
}

impl Drop for CtlServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
