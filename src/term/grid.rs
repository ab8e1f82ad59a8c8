//! Terminal screen grid.
//!
//! Each cell is one of three shapes: a glyph (with its style and column
//! width), the continuation half of a double-width glyph, or a blank that
//! only contributes a background. The compositor iterates this grid
//! directly; there is no scrollback, lines scrolled off the top are gone.

use crate::term::color::Color;
use unicode_width::UnicodeWidthChar;

/// Display attributes carried by every written cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Style {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub reverse: bool,
}

/// One grid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// A printable glyph occupying `width` columns (1 or 2).
    Glyph { ch: char, width: u8, style: Style },
    /// The second column of a double-width glyph.
    Continuation,
    /// An empty cell that still paints its background.
    Blank { style: Style },
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Blank {
            style: Style::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub x: usize,
    pub y: usize,
    pub visible: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            visible: true,
        }
    }
}

pub struct Grid {
    cells: Vec<Vec<Cell>>,
    cols: usize,
    rows: usize,
    pub cursor: Cursor,
    /// Pen style applied to subsequently written glyphs.
    pub style: Style,
    scroll_top: usize,
    scroll_bottom: usize,
    saved_cursor: Option<(Cursor, Style)>,
    /// Main screen contents while the alternate screen is in use.
    main_screen: Option<Vec<Vec<Cell>>>,
    tab_stops: Vec<bool>,
    auto_wrap: bool,
    /// Replies (DSR, DA) waiting to be written back to the child.
    responses: Vec<String>,
}

impl Grid {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            cells: vec![vec![Cell::default(); cols]; rows],
            cols,
            rows,
            cursor: Cursor::default(),
            style: Style::default(),
            scroll_top: 0,
            scroll_bottom: rows.saturating_sub(1),
            saved_cursor: None,
            main_screen: None,
            tab_stops: default_tab_stops(cols),
            auto_wrap: true,
            responses: Vec::new(),
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Cell> {
        self.cells.get(y)?.get(x)
    }

    /// Blank cell carrying the current background (BCE).
    fn blank(&self) -> Cell {
        Cell::Blank {
            style: Style {
                fg: self.style.fg,
                bg: self.style.bg,
                bold: false,
                reverse: false,
            },
        }
    }

    fn set(&mut self, x: usize, y: usize, cell: Cell) {
        if let Some(slot) = self.cells.get_mut(y).and_then(|row| row.get_mut(x)) {
            *slot = cell;
        }
    }

    /// Overwriting either half of a double-width glyph orphans the other
    /// half; blank it so no stray continuation survives.
    fn clear_wide_at(&mut self, x: usize, y: usize) {
        match self.cell(x, y) {
            Some(Cell::Continuation) => {
                if x > 0 {
                    self.set(x - 1, y, Cell::default());
                }
            }
            Some(Cell::Glyph { width: 2, .. }) => {
                if x + 1 < self.cols {
                    self.set(x + 1, y, Cell::default());
                }
            }
            _ => {}
        }
    }

    /// Write a printable character at the cursor and advance it.
    pub fn put_char(&mut self, c: char) {
        let width = match UnicodeWidthChar::width(c) {
            Some(w) if w > 0 => w,
            _ => return,
        };
        if width > self.cols || self.cursor.y >= self.rows {
            return;
        }

        if self.cursor.x + width > self.cols {
            if self.auto_wrap {
                self.cursor.x = 0;
                self.linefeed();
            } else {
                self.cursor.x = self.cols - width;
            }
        }

        let (x, y) = (self.cursor.x, self.cursor.y);
        self.clear_wide_at(x, y);
        if width == 2 {
            self.clear_wide_at(x + 1, y);
        }
        self.set(
            x,
            y,
            Cell::Glyph {
                ch: c,
                width: width as u8,
                style: self.style,
            },
        );
        if width == 2 {
            self.set(x + 1, y, Cell::Continuation);
        }

        self.cursor.x += width;
        if self.cursor.x >= self.cols {
            if self.auto_wrap {
                self.cursor.x = 0;
                self.linefeed();
            } else {
                self.cursor.x = self.cols - 1;
            }
        }
    }

    pub fn linefeed(&mut self) {
        if self.cursor.y == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.y + 1 < self.rows {
            self.cursor.y += 1;
        }
    }

    pub fn reverse_linefeed(&mut self) {
        if self.cursor.y == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.y > 0 {
            self.cursor.y -= 1;
        }
    }

    pub fn next_line(&mut self) {
        self.linefeed();
        self.cursor.x = 0;
    }

    pub fn carriage_return(&mut self) {
        self.cursor.x = 0;
    }

    pub fn tab(&mut self) {
        for x in (self.cursor.x + 1)..self.cols {
            if self.tab_stops[x] {
                self.cursor.x = x;
                return;
            }
        }
        self.cursor.x = self.cols.saturating_sub(1);
    }

    pub fn backspace(&mut self) {
        if self.cursor.x > 0 {
            self.cursor.x -= 1;
        }
    }

    fn scroll_up_range(&mut self, top: usize, bottom: usize, n: usize) {
        if top > bottom || bottom >= self.rows {
            return;
        }
        let blank_row = vec![self.blank(); self.cols];
        for _ in 0..n {
            self.cells.remove(top);
            self.cells.insert(bottom, blank_row.clone());
        }
    }

    fn scroll_down_range(&mut self, top: usize, bottom: usize, n: usize) {
        if top > bottom || bottom >= self.rows {
            return;
        }
        let blank_row = vec![self.blank(); self.cols];
        for _ in 0..n {
            self.cells.remove(bottom);
            self.cells.insert(top, blank_row.clone());
        }
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.scroll_up_range(self.scroll_top, self.scroll_bottom, n);
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.scroll_down_range(self.scroll_top, self.scroll_bottom, n);
    }

    /// Insert blank lines at the cursor row (IL), within the scroll region.
    pub fn insert_lines(&mut self, n: usize) {
        if self.cursor.y >= self.scroll_top && self.cursor.y <= self.scroll_bottom {
            self.scroll_down_range(self.cursor.y, self.scroll_bottom, n);
        }
    }

    /// Delete lines at the cursor row (DL), within the scroll region.
    pub fn delete_lines(&mut self, n: usize) {
        if self.cursor.y >= self.scroll_top && self.cursor.y <= self.scroll_bottom {
            self.scroll_up_range(self.cursor.y, self.scroll_bottom, n);
        }
    }

    pub fn clear_screen(&mut self) {
        let blank = self.blank();
        for row in &mut self.cells {
            row.fill(blank);
        }
    }

    pub fn clear_line(&mut self) {
        let blank = self.blank();
        if let Some(row) = self.cells.get_mut(self.cursor.y) {
            row.fill(blank);
        }
    }

    pub fn erase_to_eol(&mut self) {
        let blank = self.blank();
        let x = self.cursor.x;
        if let Some(row) = self.cells.get_mut(self.cursor.y) {
            for cell in row.iter_mut().skip(x) {
                *cell = blank;
            }
        }
    }

    pub fn erase_to_bol(&mut self) {
        let blank = self.blank();
        let x = self.cursor.x;
        if let Some(row) = self.cells.get_mut(self.cursor.y) {
            for cell in row.iter_mut().take(x + 1) {
                *cell = blank;
            }
        }
    }

    pub fn erase_to_eos(&mut self) {
        self.erase_to_eol();
        let blank = self.blank();
        for row in self.cells.iter_mut().skip(self.cursor.y + 1) {
            row.fill(blank);
        }
    }

    pub fn erase_from_bos(&mut self) {
        self.erase_to_bol();
        let blank = self.blank();
        for row in self.cells.iter_mut().take(self.cursor.y) {
            row.fill(blank);
        }
    }

    /// Erase n cells at the cursor without moving it (ECH).
    pub fn erase_chars(&mut self, n: usize) {
        let blank = self.blank();
        let (x, y) = (self.cursor.x, self.cursor.y);
        let end = (x + n).min(self.cols);
        self.clear_wide_at(x, y);
        if end > 0 {
            self.clear_wide_at(end - 1, y);
        }
        if let Some(row) = self.cells.get_mut(y) {
            for cell in &mut row[x..end] {
                *cell = blank;
            }
        }
    }

    /// Shift the tail of the line right, opening n blanks at the cursor (ICH).
    pub fn insert_chars(&mut self, n: usize) {
        let blank = self.blank();
        let (x, y) = (self.cursor.x, self.cursor.y);
        if let Some(row) = self.cells.get_mut(y) {
            let n = n.min(self.cols.saturating_sub(x));
            for _ in 0..n {
                row.insert(x, blank);
                row.pop();
            }
        }
    }

    /// Shift the tail of the line left over n deleted cells (DCH).
    pub fn delete_chars(&mut self, n: usize) {
        let blank = self.blank();
        let (x, y) = (self.cursor.x, self.cursor.y);
        if let Some(row) = self.cells.get_mut(y) {
            let n = n.min(self.cols.saturating_sub(x));
            for _ in 0..n {
                row.remove(x);
                row.push(blank);
            }
        }
    }

    /// Move the cursor to an absolute position (0-indexed, clamped).
    pub fn goto(&mut self, x: usize, y: usize) {
        self.cursor.x = x.min(self.cols.saturating_sub(1));
        self.cursor.y = y.min(self.rows.saturating_sub(1));
    }

    pub fn move_cursor(&mut self, dx: isize, dy: isize) {
        let x = (self.cursor.x as isize + dx).max(0) as usize;
        let y = (self.cursor.y as isize + dy).max(0) as usize;
        self.goto(x, y);
    }

    pub fn save_cursor(&mut self) {
        self.saved_cursor = Some((self.cursor, self.style));
    }

    pub fn restore_cursor(&mut self) {
        if let Some((cursor, style)) = self.saved_cursor {
            self.cursor = cursor;
            self.style = style;
            self.goto(self.cursor.x, self.cursor.y);
        }
    }

    pub fn use_alt_screen(&mut self) {
        if self.main_screen.is_none() {
            self.main_screen = Some(std::mem::replace(
                &mut self.cells,
                vec![vec![Cell::default(); self.cols]; self.rows],
            ));
            self.cursor.x = 0;
            self.cursor.y = 0;
        }
    }

    pub fn use_main_screen(&mut self) {
        if let Some(main) = self.main_screen.take() {
            self.cells = main;
            self.goto(self.cursor.x, self.cursor.y);
        }
    }

    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let top = top.min(self.rows.saturating_sub(1));
        let bottom = bottom.min(self.rows.saturating_sub(1));
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
            self.goto(0, 0);
        }
    }

    pub fn set_auto_wrap(&mut self, on: bool) {
        self.auto_wrap = on;
    }

    /// Full reset (RIS): default style, primary screen, home cursor.
    pub fn reset(&mut self) {
        self.main_screen = None;
        self.style = Style::default();
        self.cells = vec![vec![Cell::default(); self.cols]; self.rows];
        self.cursor = Cursor::default();
        self.scroll_top = 0;
        self.scroll_bottom = self.rows.saturating_sub(1);
        self.saved_cursor = None;
        self.tab_stops = default_tab_stops(self.cols);
        self.auto_wrap = true;
        self.responses.clear();
    }

    /// Resize both screens, clamping the cursor and scroll region.
    pub fn resize(&mut self, new_cols: usize, new_rows: usize) {
        resize_screen(&mut self.cells, new_cols, new_rows);
        if let Some(main) = &mut self.main_screen {
            resize_screen(main, new_cols, new_rows);
        }
        self.cols = new_cols;
        self.rows = new_rows;
        self.tab_stops = default_tab_stops(new_cols);
        self.scroll_top = 0;
        self.scroll_bottom = new_rows.saturating_sub(1);
        self.cursor.x = self.cursor.x.min(new_cols.saturating_sub(1));
        self.cursor.y = self.cursor.y.min(new_rows.saturating_sub(1));
    }

    pub fn queue_response(&mut self, reply: String) {
        self.responses.push(reply);
    }

    pub fn queue_cursor_report(&mut self) {
        let reply = format!("\x1b[{};{}R", self.cursor.y + 1, self.cursor.x + 1);
        self.responses.push(reply);
    }

    pub fn take_responses(&mut self) -> Vec<String> {
        std::mem::take(&mut self.responses)
    }
}

fn default_tab_stops(cols: usize) -> Vec<bool> {
    let mut stops = vec![false; cols];
    for i in (0..cols).step_by(8) {
        stops[i] = true;
    }
    stops
}

fn resize_screen(cells: &mut Vec<Vec<Cell>>, new_cols: usize, new_rows: usize) {
    for row in cells.iter_mut() {
        row.resize(new_cols, Cell::default());
    }
    cells.resize(new_rows, vec![Cell::default(); new_cols]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph_at(grid: &Grid, x: usize, y: usize) -> char {
        match grid.cell(x, y) {
            Some(Cell::Glyph { ch, .. }) => *ch,
            other => panic!("expected glyph at ({x},{y}), got {other:?}"),
        }
    }

    fn feed_str(grid: &mut Grid, s: &str) {
        for c in s.chars() {
            match c {
                '\r' => grid.carriage_return(),
                '\n' => grid.linefeed(),
                c => grid.put_char(c),
            }
        }
    }

    #[test]
    fn test_echo_places_cells_and_cursor() {
        let mut grid = Grid::new(80, 24);
        feed_str(&mut grid, "AB\r\nC");
        assert_eq!(glyph_at(&grid, 0, 0), 'A');
        assert_eq!(glyph_at(&grid, 1, 0), 'B');
        assert_eq!(glyph_at(&grid, 0, 1), 'C');
        assert_eq!((grid.cursor.x, grid.cursor.y), (1, 1));
    }

    #[test]
    fn test_wrap_at_right_margin() {
        let mut grid = Grid::new(4, 3);
        feed_str(&mut grid, "abcde");
        assert_eq!(glyph_at(&grid, 3, 0), 'd');
        assert_eq!(glyph_at(&grid, 0, 1), 'e');
        assert_eq!((grid.cursor.x, grid.cursor.y), (1, 1));
    }

    #[test]
    fn test_wide_glyph_gets_continuation() {
        let mut grid = Grid::new(10, 2);
        grid.put_char('世');
        assert!(matches!(
            grid.cell(0, 0),
            Some(Cell::Glyph { width: 2, .. })
        ));
        assert!(matches!(grid.cell(1, 0), Some(Cell::Continuation)));
        assert_eq!(grid.cursor.x, 2);
    }

    #[test]
    fn test_overwrite_half_of_wide_glyph() {
        let mut grid = Grid::new(10, 2);
        grid.put_char('世');
        grid.goto(1, 0);
        grid.put_char('x');
        // The head must not survive as a dangling double-width glyph.
        assert!(matches!(grid.cell(0, 0), Some(Cell::Blank { .. })));
        assert_eq!(glyph_at(&grid, 1, 0), 'x');
    }

    #[test]
    fn test_scroll_region_confines_linefeed() {
        let mut grid = Grid::new(10, 5);
        grid.goto(0, 0);
        grid.put_char('T');
        grid.set_scroll_region(1, 3);
        grid.goto(0, 3);
        grid.put_char('S');
        grid.goto(0, 3);
        grid.linefeed();
        // Row 0 is outside the region and untouched; 'S' moved to row 2.
        assert_eq!(glyph_at(&grid, 0, 0), 'T');
        assert_eq!(glyph_at(&grid, 0, 2), 'S');
        assert!(matches!(grid.cell(0, 3), Some(Cell::Blank { .. })));
    }

    #[test]
    fn test_erase_uses_current_background() {
        let mut grid = Grid::new(4, 2);
        grid.style.bg = Color::Indexed(4);
        grid.erase_to_eol();
        match grid.cell(2, 0) {
            Some(Cell::Blank { style }) => assert_eq!(style.bg, Color::Indexed(4)),
            other => panic!("expected blank, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_and_delete_chars() {
        let mut grid = Grid::new(6, 2);
        feed_str(&mut grid, "abcdef");
        grid.goto(1, 0);
        grid.delete_chars(2);
        assert_eq!(glyph_at(&grid, 1, 0), 'd');
        assert!(matches!(grid.cell(5, 0), Some(Cell::Blank { .. })));
        grid.insert_chars(1);
        assert!(matches!(grid.cell(1, 0), Some(Cell::Blank { .. })));
        assert_eq!(glyph_at(&grid, 2, 0), 'd');
    }

    #[test]
    fn test_alt_screen_round_trip() {
        let mut grid = Grid::new(8, 2);
        feed_str(&mut grid, "hi");
        grid.use_alt_screen();
        assert!(matches!(grid.cell(0, 0), Some(Cell::Blank { .. })));
        feed_str(&mut grid, "alt");
        grid.use_main_screen();
        assert_eq!(glyph_at(&grid, 0, 0), 'h');
        assert_eq!(glyph_at(&grid, 1, 0), 'i');
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut grid = Grid::new(10, 5);
        feed_str(&mut grid, "keep");
        grid.resize(6, 4);
        let snapshot: Vec<Vec<Cell>> = (0..4)
            .map(|y| (0..6).map(|x| *grid.cell(x, y).unwrap()).collect())
            .collect();
        let cursor = (grid.cursor.x, grid.cursor.y);
        grid.resize(6, 4);
        for (y, row) in snapshot.iter().enumerate() {
            for (x, cell) in row.iter().enumerate() {
                assert_eq!(grid.cell(x, y), Some(cell));
            }
        }
        assert_eq!((grid.cursor.x, grid.cursor.y), cursor);
    }

    #[test]
    fn test_cursor_report_format() {
        let mut grid = Grid::new(80, 24);
        grid.goto(4, 2);
        grid.queue_cursor_report();
        assert_eq!(grid.take_responses(), vec!["\x1b[3;5R".to_string()]);
        assert!(grid.take_responses().is_empty());
    }
}
