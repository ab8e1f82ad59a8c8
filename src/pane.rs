//! One terminal session: a pseudo-terminal master, its child process, and
//! the emulator state fed from the master.
//!
//! The master is non-blocking; the event loop drains it after every wake.
//! Writes to the master must never drop bytes, so blocked writes wait for
//! writability in bounded 100 ms rounds before giving up.

use crate::term::ansi::AnsiHandler;
use crate::term::grid::Grid;
use filedescriptor::{POLLOUT, pollfd};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::env;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

const DRAIN_BUF: usize = 4096;
const WRITE_STALL: Duration = Duration::from_millis(100);
const MAX_WRITE_STALLS: u32 = 50;

const DEFAULT_SHELL: &str = "/bin/bash";

/// Lifecycle after `spawn` (which is itself the spawning state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneState {
    Running,
    /// Master saw EOF/EIO; child not yet reaped.
    Draining,
    Closed,
}

/// What one drain pass observed on the master.
#[derive(Debug, Clone, Copy)]
pub struct DrainOutcome {
    /// At least one byte reached the emulator.
    pub produced: bool,
    /// The child hung up; the pane must be closed.
    pub dead: bool,
}

pub struct Pane {
    grid: Grid,
    parser: vte::Parser,
    master: Option<Box<dyn MasterPty>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    fd: RawFd,
    pub child_pid: Option<u32>,
    /// Width of this pane in cells.
    pub cols: usize,
    /// Pixel x at which this pane's column 0 starts.
    pub start_col_px: usize,
    state: PaneState,
}

impl Pane {
    /// Open a PTY pair sized in both cells and pixels, spawn the user's
    /// shell on the slave, and put the master into non-blocking mode.
    pub fn spawn(
        rows: usize,
        cols: usize,
        start_col_px: usize,
        cw: usize,
        ch: usize,
    ) -> io::Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: rows as u16,
                cols: cols as u16,
                pixel_width: (cols * cw) as u16,
                pixel_height: (rows * ch) as u16,
            })
            .map_err(io::Error::other)?;

        let shell = env::var("SHELL").unwrap_or_else(|_| DEFAULT_SHELL.to_string());
        let mut cmd = CommandBuilder::new(&shell);
        cmd.env("TERM", "xterm-256color");

        let child = pair.slave.spawn_command(cmd).map_err(io::Error::other)?;
        drop(pair.slave);

        let master = pair.master;
        let fd = master
            .as_raw_fd()
            .ok_or_else(|| io::Error::other("pty master exposes no file descriptor"))?;
        set_nonblocking_cloexec(fd)?;

        let child_pid = child.process_id();
        log::info!("pane spawned: {shell} pid {child_pid:?}, {cols}x{rows} at px {start_col_px}");

        Ok(Pane {
            grid: Grid::new(cols, rows),
            parser: vte::Parser::new(),
            master: Some(master),
            child: Some(child),
            fd,
            child_pid,
            cols,
            start_col_px,
            state: PaneState::Running,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_running(&self) -> bool {
        self.state == PaneState::Running
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Push child output bytes through the parser into the grid.
    pub fn feed(&mut self, bytes: &[u8]) {
        let mut handler = AnsiHandler::new(&mut self.grid);
        self.parser.advance(&mut handler, bytes);
    }

    /// Write queued emulator replies (DSR, DA) back to the child.
    fn flush_responses(&mut self) {
        for reply in self.grid.take_responses() {
            if let Err(e) = self.write_all(reply.as_bytes()) {
                log::warn!("pane {:?}: dropped reply: {e}", self.child_pid);
            }
        }
    }

    /// Drain the master until it would block. EOF and EIO both mean the
    /// child side is gone.
    pub fn drain(&mut self) -> DrainOutcome {
        let mut produced = false;
        let mut buf = [0u8; DRAIN_BUF];
        loop {
            let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n > 0 {
                self.feed(&buf[..n as usize]);
                produced = true;
                continue;
            }
            if n == 0 {
                self.state = PaneState::Draining;
                return DrainOutcome {
                    produced,
                    dead: true,
                };
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => break,
                Some(libc::EIO) => {
                    self.state = PaneState::Draining;
                    return DrainOutcome {
                        produced,
                        dead: true,
                    };
                }
                _ => {
                    log::warn!("pane {:?}: read failed: {err}", self.child_pid);
                    self.state = PaneState::Draining;
                    return DrainOutcome {
                        produced,
                        dead: true,
                    };
                }
            }
        }
        if produced {
            self.flush_responses();
        }
        DrainOutcome {
            produced,
            dead: false,
        }
    }

    /// Write every byte to the master. Short writes resume, EINTR retries,
    /// and a blocked master is polled for writability for up to 100 ms per
    /// round, at most `MAX_WRITE_STALLS` consecutive rounds.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut rest = bytes;
        let mut stalls = 0u32;
        while !rest.is_empty() {
            let n = unsafe { libc::write(self.fd, rest.as_ptr().cast(), rest.len()) };
            if n > 0 {
                rest = &rest[n as usize..];
                stalls = 0;
                continue;
            }
            if n == 0 {
                stalls += 1;
            } else {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::EAGAIN) => stalls += 1,
                    _ => return Err(err),
                }
            }
            if stalls > MAX_WRITE_STALLS {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "pty master stayed unwritable",
                ));
            }
            let mut fds = [pollfd {
                fd: self.fd,
                events: POLLOUT,
                revents: 0,
            }];
            let _ = filedescriptor::poll(&mut fds, Some(WRITE_STALL));
        }
        Ok(())
    }

    /// Resize the emulator and propagate the new cell and pixel sizes to
    /// the kernel (SIGWINCH for the child).
    pub fn resize(&mut self, rows: usize, cols: usize, cw: usize, ch: usize) -> io::Result<()> {
        self.grid.resize(cols, rows);
        if let Some(master) = &self.master {
            master
                .resize(PtySize {
                    rows: rows as u16,
                    cols: cols as u16,
                    pixel_width: (cols * cw) as u16,
                    pixel_height: (rows * ch) as u16,
                })
                .map_err(io::Error::other)?;
        }
        self.cols = cols;
        Ok(())
    }

    /// Release the master and reap the child. Idempotent.
    pub fn close(&mut self) {
        if self.state == PaneState::Closed {
            return;
        }
        self.state = PaneState::Draining;
        self.master.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        log::info!("pane closed: pid {:?}", self.child_pid);
        self.state = PaneState::Closed;
    }
}

impl Drop for Pane {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags == -1 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
        let fdflags = libc::fcntl(fd, libc::F_GETFD);
        if fdflags == -1 || libc::fcntl(fd, libc::F_SETFD, fdflags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::grid::Cell;
    use std::time::Instant;

    fn wait_for<F: FnMut(&Pane) -> bool>(pane: &mut Pane, mut done: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            let outcome = pane.drain();
            if done(pane) {
                return;
            }
            if outcome.dead {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("pane never reached the expected state");
    }

    fn glyph_at(pane: &Pane, x: usize, y: usize) -> Option<char> {
        match pane.grid().cell(x, y) {
            Some(Cell::Glyph { ch, .. }) => Some(*ch),
            _ => None,
        }
    }

    // The printed "AB" lands at column 0 of whichever row follows the
    // echoed command line; scan rather than assume the prompt's shape.
    fn saw_output(pane: &Pane) -> bool {
        let grid = pane.grid();
        for y in 0..grid.rows().saturating_sub(1) {
            if glyph_at(pane, 0, y) == Some('A')
                && glyph_at(pane, 1, y) == Some('B')
                && glyph_at(pane, 0, y + 1) == Some('C')
            {
                return true;
            }
        }
        false
    }

    #[test]
    fn test_spawn_echo_and_reap() {
        unsafe { env::set_var("SHELL", "/bin/sh") };
        let mut pane = Pane::spawn(24, 80, 0, 10, 20).unwrap();
        assert!(pane.is_running());
        pane.write_all(b"printf 'AB\\r\\nC\\n'; exit\n").unwrap();
        wait_for(&mut pane, saw_output);
        pane.close();
        assert!(!pane.is_running());
    }

    #[test]
    fn test_resize_updates_grid_and_cols() {
        unsafe { env::set_var("SHELL", "/bin/sh") };
        let mut pane = Pane::spawn(20, 100, 0, 8, 16).unwrap();
        pane.resize(20, 50, 8, 16).unwrap();
        assert_eq!(pane.cols, 50);
        assert_eq!(pane.grid().cols(), 50);
        // Second identical resize is observationally a no-op.
        pane.resize(20, 50, 8, 16).unwrap();
        assert_eq!(pane.cols, 50);
        assert_eq!(pane.grid().cols(), 50);
    }
}
