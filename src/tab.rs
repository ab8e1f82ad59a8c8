//! One tab: a horizontal layout of one or two panes sharing a row count.

use crate::pane::Pane;
use std::io;

/// Minimum columns either side of a split may end up with.
const MIN_SPLIT_COLS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Single,
    Split,
    /// All panes have died; the tab is waiting to be swept.
    Closing,
}

pub struct Tab {
    pub panes: Vec<Pane>,
    pub active_pane: usize,
    /// Rows shared by every pane of the tab.
    pub term_rows: usize,
    /// Column budget fixed when the tab was created.
    pub total_cols: usize,
    state: TabState,
}

/// Cell layout for a display of `width_px` x `height_px`: the full column
/// budget and the row count with one line reserved for the tab bar.
pub fn layout(width_px: usize, height_px: usize, cw: usize, ch: usize) -> Option<(usize, usize)> {
    if cw == 0 || ch == 0 {
        return None;
    }
    let total_cols = width_px / cw;
    let rows = (height_px / ch).saturating_sub(1);
    if total_cols < 1 || rows < 1 {
        return None;
    }
    Some((total_cols, rows))
}

/// 50/50 column split; `None` when either side would drop below two columns.
pub fn split_widths(cols: usize) -> Option<(usize, usize)> {
    let left = cols / 2;
    let right = cols - left;
    if left < MIN_SPLIT_COLS || right < MIN_SPLIT_COLS {
        return None;
    }
    Some((left, right))
}

impl Tab {
    /// Spawn a tab with a single pane covering the whole column budget.
    pub fn create(width_px: usize, height_px: usize, cw: usize, ch: usize) -> io::Result<Self> {
        let (total_cols, term_rows) = layout(width_px, height_px, cw, ch).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("display {width_px}x{height_px} too small for a {cw}x{ch} cell grid"),
            )
        })?;
        let pane = Pane::spawn(term_rows, total_cols, 0, cw, ch)?;
        Ok(Tab {
            panes: vec![pane],
            active_pane: 0,
            term_rows,
            total_cols,
            state: TabState::Single,
        })
    }

    pub fn is_active(&self) -> bool {
        self.state != TabState::Closing
    }

    pub fn is_split(&self) -> bool {
        self.state == TabState::Split
    }

    /// Split the single pane vertically, 50/50. The existing pane keeps the
    /// left half and is shrunk first; if the right pane fails to spawn its
    /// old width is restored, leaving the tab untouched.
    pub fn split_vertical(&mut self, cw: usize, ch: usize) -> io::Result<()> {
        if self.state != TabState::Single || self.panes.len() != 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tab is already split",
            ));
        }
        let old_cols = self.panes[0].cols;
        let (left_cols, right_cols) = split_widths(old_cols).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{old_cols} columns is too narrow to split"),
            )
        })?;

        self.panes[0].resize(self.term_rows, left_cols, cw, ch)?;
        match Pane::spawn(self.term_rows, right_cols, left_cols * cw, cw, ch) {
            Ok(pane) => {
                self.panes.push(pane);
                self.active_pane = 1;
                self.state = TabState::Split;
                Ok(())
            }
            Err(e) => {
                if let Err(undo) = self.panes[0].resize(self.term_rows, old_cols, cw, ch) {
                    log::warn!("failed to restore pane width after split failure: {undo}");
                }
                Err(e)
            }
        }
    }

    /// Switch the active pane. Only meaningful on a split tab.
    pub fn focus(&mut self, index: usize) {
        if self.is_split() && index < self.panes.len() {
            self.active_pane = index;
        }
    }

    /// Close and remove one pane. A surviving left or right pane keeps its
    /// width and pixel origin; the layout does not reflow.
    pub fn close_pane(&mut self, index: usize) {
        if index >= self.panes.len() {
            return;
        }
        self.panes[index].close();
        self.panes.remove(index);
        if self.active_pane >= self.panes.len() {
            self.active_pane = self.panes.len().saturating_sub(1);
        }
        self.state = if self.panes.is_empty() {
            TabState::Closing
        } else {
            TabState::Single
        };
    }

    pub fn active_pane_mut(&mut self) -> Option<&mut Pane> {
        self.panes.get_mut(self.active_pane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_reserves_tab_bar_row() {
        // 1920x1080 with a 10x24 cell: 192 columns, 44 rows (45 minus the bar).
        assert_eq!(layout(1920, 1080, 10, 24), Some((192, 44)));
    }

    #[test]
    fn test_layout_rejects_tiny_displays() {
        assert_eq!(layout(8, 100, 10, 24), None); // under one column
        assert_eq!(layout(1920, 24, 10, 24), None); // bar eats the only row
        assert_eq!(layout(1920, 47, 10, 24), None);
    }

    #[test]
    fn test_split_widths_are_50_50() {
        assert_eq!(split_widths(192), Some((96, 96)));
        assert_eq!(split_widths(193), Some((96, 97)));
    }

    #[test]
    fn test_split_rejects_narrow_panes() {
        assert_eq!(split_widths(3), None);
        assert_eq!(split_widths(4), Some((2, 2)));
    }
}
