//! Application context and the single-threaded event loop.
//!
//! One blocking poll covers every live pane master, the controlling
//! terminal, and the control-socket listener. Signals only flip flags (and
//! acknowledge VT transitions); the loop observes them at the top of each
//! iteration. At most one frame is rendered per wake, and none while the
//! user has switched away from our console.

use crate::compositor;
use crate::config::{Config, Theme};
use crate::console::{self, Console};
use crate::ctl::{Command, CtlServer};
use crate::display::Display;
use crate::font::FontRaster;
use crate::tab::Tab;
use filedescriptor::{POLLERR, POLLHUP, POLLIN, pollfd};
use std::io;

pub const MAX_TABS: usize = 8;

const INPUT_BUF: usize = 512;

/// What a ready poll slot refers to.
#[derive(Debug, Clone, Copy)]
enum PollTarget {
    Tty,
    Ctl,
    Pane { tab: usize, pane: usize },
}

// Field order is teardown order: raw mode and VT handoff first, then the
// socket, the sessions, and finally the display restore.
pub struct App {
    console: Console,
    ctl: CtlServer,
    tabs: Vec<Tab>,
    active_tab: usize,
    font: FontRaster,
    display: Display,
    theme: Theme,
    dirty: bool,
}

impl App {
    pub fn init(config: Config) -> io::Result<Self> {
        let display = Display::open()?;
        let mut font = FontRaster::load(config.font_path.as_deref(), config.font_px)?;

        let first = Tab::create(display.width, display.height, font.cw, font.ch)?;
        // Warm the cache so the first frame doesn't rasterise the ASCII set.
        for c in ' '..='~' {
            let _ = font.glyph(c);
        }

        let ctl = CtlServer::bind()?;
        let console = Console::init(display.raw_fd())?;

        let mut tabs = Vec::with_capacity(MAX_TABS);
        tabs.push(first);

        Ok(App {
            console,
            ctl,
            tabs,
            active_tab: 0,
            font,
            display,
            theme: config.theme,
            dirty: true,
        })
    }

    pub fn run(&mut self) -> io::Result<()> {
        let mut was_active = console::display_active();
        loop {
            if console::shutdown_requested() {
                log::info!("termination signal observed, shutting down");
                break;
            }

            self.sweep_dead_tabs();
            if self.tabs.is_empty() {
                log::info!("last session closed, shutting down");
                break;
            }

            let display_active = console::display_active();
            if display_active && !was_active {
                // The console came back; the CRTC may have been
                // reprogrammed while we were away.
                if let Err(e) = self.display.install() {
                    log::warn!("could not reinstall mode after VT acquire: {e}");
                }
                self.dirty = true;
            }
            was_active = display_active;

            if self.dirty && display_active {
                if let Err(e) = self.render() {
                    log::warn!("render failed: {e}");
                }
                self.dirty = false;
            }

            let (mut fds, targets) = self.poll_set();
            if filedescriptor::poll(&mut fds, None).is_err() {
                // EINTR from a signal; re-check the flags.
                continue;
            }

            for (slot, target) in fds.iter().zip(&targets) {
                if slot.revents & (POLLIN | POLLHUP | POLLERR) == 0 {
                    continue;
                }
                match *target {
                    PollTarget::Tty => self.forward_input(),
                    PollTarget::Ctl => {
                        if let Some(command) = self.ctl.accept_command() {
                            self.handle_command(command);
                        }
                    }
                    PollTarget::Pane { tab, pane } => self.drain_pane(tab, pane),
                }
            }
        }
        Ok(())
    }

    fn poll_set(&self) -> (Vec<pollfd>, Vec<PollTarget>) {
        let mut fds = Vec::with_capacity(2 + self.tabs.len() * 2);
        let mut targets = Vec::with_capacity(fds.capacity());
        let mut push = |fd, target| {
            fds.push(pollfd {
                fd,
                events: POLLIN,
                revents: 0,
            });
            targets.push(target);
        };
        push(self.console.fd(), PollTarget::Tty);
        push(self.ctl.fd(), PollTarget::Ctl);
        for (ti, tab) in self.tabs.iter().enumerate() {
            for (pi, pane) in tab.panes.iter().enumerate() {
                if pane.is_running() {
                    push(pane.fd(), PollTarget::Pane { tab: ti, pane: pi });
                }
            }
        }
        (fds, targets)
    }

    /// Keystrokes go verbatim to the active pane of the active tab.
    fn forward_input(&mut self) {
        let fd = self.console.fd();
        let mut buf = [0u8; INPUT_BUF];
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            return;
        }
        let bytes = &buf[..n as usize];
        if let Some(pane) = self
            .tabs
            .get_mut(self.active_tab)
            .and_then(|tab| tab.active_pane_mut())
        {
            if let Err(e) = pane.write_all(bytes) {
                log::warn!("input dropped, pane unwritable: {e}");
            }
        }
    }

    fn drain_pane(&mut self, tab_idx: usize, pane_idx: usize) {
        let Some(tab) = self.tabs.get_mut(tab_idx) else {
            return;
        };
        let Some(pane) = tab.panes.get_mut(pane_idx) else {
            return;
        };
        if !pane.is_running() {
            return;
        }
        let outcome = pane.drain();
        if outcome.produced && tab_idx == self.active_tab {
            self.dirty = true;
        }
        if outcome.dead {
            tab.close_pane(pane_idx);
            self.dirty = true;
        }
    }

    /// Drop tabs whose last pane has died; re-aim the active index at the
    /// first surviving tab when the active one goes.
    fn sweep_dead_tabs(&mut self) {
        if self.tabs.iter().all(Tab::is_active) {
            return;
        }
        let mut kept_before_active = 0;
        for (i, tab) in self.tabs.iter().enumerate() {
            if i < self.active_tab && tab.is_active() {
                kept_before_active += 1;
            }
        }
        let active_survives = self
            .tabs
            .get(self.active_tab)
            .map(Tab::is_active)
            .unwrap_or(false);
        self.tabs.retain(Tab::is_active);
        self.active_tab = if active_survives { kept_before_active } else { 0 };
        self.dirty = true;
    }

    fn handle_command(&mut self, command: Command) {
        log::debug!("control command: {command:?}");
        match command {
            Command::NewTab => {
                if self.tabs.len() >= MAX_TABS {
                    log::warn!("tab limit of {MAX_TABS} reached, new-tab ignored");
                    return;
                }
                match Tab::create(
                    self.display.width,
                    self.display.height,
                    self.font.cw,
                    self.font.ch,
                ) {
                    Ok(tab) => {
                        self.tabs.push(tab);
                        self.active_tab = self.tabs.len() - 1;
                        self.dirty = true;
                    }
                    Err(e) => log::error!("new tab failed: {e}"),
                }
            }
            Command::NextTab => {
                self.active_tab = next_index(self.active_tab, self.tabs.len());
                self.dirty = true;
            }
            Command::PrevTab => {
                self.active_tab = prev_index(self.active_tab, self.tabs.len());
                self.dirty = true;
            }
            Command::SplitVertical => {
                let (cw, ch) = (self.font.cw, self.font.ch);
                if let Some(tab) = self.tabs.get_mut(self.active_tab) {
                    match tab.split_vertical(cw, ch) {
                        Ok(()) => self.dirty = true,
                        Err(e) => log::warn!("split rejected: {e}"),
                    }
                }
            }
            Command::FocusLeft => self.focus_pane(0),
            Command::FocusRight => self.focus_pane(1),
        }
    }

    fn focus_pane(&mut self, index: usize) {
        if let Some(tab) = self.tabs.get_mut(self.active_tab) {
            tab.focus(index);
            self.dirty = true;
        }
    }

    fn render(&mut self) -> io::Result<()> {
        let mut canvas = self.display.canvas();
        compositor::render(
            &mut canvas,
            &mut self.font,
            &self.theme,
            &self.tabs,
            self.active_tab,
        )?;
        self.display.commit()
    }
}

fn next_index(current: usize, len: usize) -> usize {
    (current + 1) % len
}

fn prev_index(current: usize, len: usize) -> usize {
    (current + len - 1) % len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_cycling_wraps_both_ways() {
        assert_eq!(next_index(0, 2), 1);
        assert_eq!(next_index(1, 2), 0);
        assert_eq!(prev_index(0, 2), 1);
        assert_eq!(prev_index(1, 2), 0);
        assert_eq!(next_index(0, 1), 0);
        assert_eq!(prev_index(0, 1), 0);
    }
}
