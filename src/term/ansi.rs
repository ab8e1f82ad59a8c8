//! ANSI escape sequence handler that implements the VTE `Perform` trait.

use crate::term::color::Color;
use crate::term::grid::{Grid, Style};
use vte::{Params, Perform};

pub struct AnsiHandler<'a> {
    grid: &'a mut Grid,
}

impl<'a> AnsiHandler<'a> {
    pub fn new(grid: &'a mut Grid) -> Self {
        Self { grid }
    }

    fn handle_sgr(&mut self, params: &Params) {
        if params.is_empty() {
            self.grid.style = Style::default();
            return;
        }

        let mut iter = params.iter();
        while let Some(param) = iter.next() {
            match param[0] {
                0 => self.grid.style = Style::default(),
                1 => self.grid.style.bold = true,
                7 => self.grid.style.reverse = true,
                22 => self.grid.style.bold = false,
                27 => self.grid.style.reverse = false,
                n @ 30..=37 => self.grid.style.fg = Color::Indexed((n - 30) as u8),
                38 => {
                    if let Some(color) = parse_extended_color(&mut iter) {
                        self.grid.style.fg = color;
                    }
                }
                39 => self.grid.style.fg = Color::Default,
                n @ 40..=47 => self.grid.style.bg = Color::Indexed((n - 40) as u8),
                48 => {
                    if let Some(color) = parse_extended_color(&mut iter) {
                        self.grid.style.bg = color;
                    }
                }
                49 => self.grid.style.bg = Color::Default,
                n @ 90..=97 => self.grid.style.fg = Color::Indexed((n - 90 + 8) as u8),
                n @ 100..=107 => self.grid.style.bg = Color::Indexed((n - 100 + 8) as u8),
                _ => {}
            }
        }
    }
}

/// First parameter of a CSI sequence; absent or zero means `default`.
fn param(params: &Params, default: u16) -> u16 {
    let n = params
        .iter()
        .next()
        .and_then(|p| p.first())
        .copied()
        .unwrap_or(0);
    if n == 0 { default } else { n }
}

/// SGR 38/48 extension: `5;idx` palette or `2;r;g;b` truecolour.
fn parse_extended_color(iter: &mut vte::ParamsIter<'_>) -> Option<Color> {
    match iter.next()?[0] {
        2 => {
            let r = iter.next()?[0];
            let g = iter.next()?[0];
            let b = iter.next()?[0];
            Some(Color::Rgb(r as u8, g as u8, b as u8))
        }
        5 => Some(Color::Indexed(iter.next()?[0] as u8)),
        _ => None,
    }
}

impl Perform for AnsiHandler<'_> {
    fn print(&mut self, c: char) {
        self.grid.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\x0b' | b'\x0c' => self.grid.linefeed(),
            b'\r' => self.grid.carriage_return(),
            b'\t' => self.grid.tab(),
            b'\x08' => self.grid.backspace(),
            b'\x07' => {} // Bell
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {
        // Window titles and clipboard have no surface here.
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, c: char) {
        if ignore {
            return;
        }

        match (c, intermediates) {
            ('A', []) => self.grid.move_cursor(0, -(param(params, 1) as isize)),
            ('B', []) => self.grid.move_cursor(0, param(params, 1) as isize),
            ('C', []) => self.grid.move_cursor(param(params, 1) as isize, 0),
            ('D', []) => self.grid.move_cursor(-(param(params, 1) as isize), 0),
            ('E', []) => {
                self.grid.move_cursor(0, param(params, 1) as isize);
                self.grid.carriage_return();
            }
            ('F', []) => {
                self.grid.move_cursor(0, -(param(params, 1) as isize));
                self.grid.carriage_return();
            }
            ('G', []) => {
                let col = param(params, 1) as usize;
                self.grid.goto(col.saturating_sub(1), self.grid.cursor.y);
            }
            ('H', []) | ('f', []) => {
                let mut iter = params.iter();
                let row = iter.next().and_then(|p| p.first()).copied().unwrap_or(1) as usize;
                let col = iter.next().and_then(|p| p.first()).copied().unwrap_or(1) as usize;
                self.grid
                    .goto(col.saturating_sub(1), row.saturating_sub(1));
            }
            ('J', []) => match param(params, 0) {
                1 => self.grid.erase_from_bos(),
                2 | 3 => self.grid.clear_screen(),
                _ => self.grid.erase_to_eos(),
            },
            ('K', []) => match param(params, 0) {
                1 => self.grid.erase_to_bol(),
                2 => self.grid.clear_line(),
                _ => self.grid.erase_to_eol(),
            },
            ('@', []) => self.grid.insert_chars(param(params, 1) as usize),
            ('P', []) => self.grid.delete_chars(param(params, 1) as usize),
            ('X', []) => self.grid.erase_chars(param(params, 1) as usize),
            ('L', []) => self.grid.insert_lines(param(params, 1) as usize),
            ('M', []) => self.grid.delete_lines(param(params, 1) as usize),
            ('S', []) => self.grid.scroll_up(param(params, 1) as usize),
            ('T', []) => self.grid.scroll_down(param(params, 1) as usize),
            ('d', []) => {
                let row = param(params, 1) as usize;
                self.grid.goto(self.grid.cursor.x, row.saturating_sub(1));
            }
            ('m', []) => self.handle_sgr(params),
            ('n', []) => match param(params, 0) {
                5 => self.grid.queue_response("\x1b[0n".to_string()),
                6 => self.grid.queue_cursor_report(),
                _ => {}
            },
            ('c', []) => {
                // DA1: identify as a VT220 with no options.
                self.grid.queue_response("\x1b[?62;0c".to_string());
            }
            ('c', [b'>']) => {
                self.grid.queue_response("\x1b[>0;0;0c".to_string());
            }
            ('r', []) => {
                let mut iter = params.iter();
                let top = iter.next().and_then(|p| p.first()).copied().unwrap_or(1) as usize;
                let bottom = iter
                    .next()
                    .and_then(|p| p.first())
                    .copied()
                    .unwrap_or(self.grid.rows() as u16) as usize;
                self.grid
                    .set_scroll_region(top.saturating_sub(1), bottom.saturating_sub(1));
            }
            ('h', [b'?']) => {
                for p in params.iter() {
                    match p[0] {
                        7 => self.grid.set_auto_wrap(true),
                        25 => self.grid.cursor.visible = true,
                        47 | 1047 => self.grid.use_alt_screen(),
                        1048 => self.grid.save_cursor(),
                        1049 => {
                            self.grid.save_cursor();
                            self.grid.use_alt_screen();
                        }
                        _ => {}
                    }
                }
            }
            ('l', [b'?']) => {
                for p in params.iter() {
                    match p[0] {
                        7 => self.grid.set_auto_wrap(false),
                        25 => self.grid.cursor.visible = false,
                        47 | 1047 => self.grid.use_main_screen(),
                        1048 => self.grid.restore_cursor(),
                        1049 => {
                            self.grid.use_main_screen();
                            self.grid.restore_cursor();
                        }
                        _ => {}
                    }
                }
            }
            ('s', []) => self.grid.save_cursor(),
            ('u', []) => self.grid.restore_cursor(),
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        match (byte, intermediates) {
            (b'D', []) => self.grid.linefeed(),
            (b'M', []) => self.grid.reverse_linefeed(),
            (b'E', []) => self.grid.next_line(),
            (b'7', []) => self.grid.save_cursor(),
            (b'8', []) => self.grid.restore_cursor(),
            (b'c', []) => self.grid.reset(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::grid::Cell;
    use vte::Parser;

    fn feed(grid: &mut Grid, bytes: &[u8]) {
        let mut parser = Parser::new();
        let mut handler = AnsiHandler::new(grid);
        parser.advance(&mut handler, bytes);
    }

    fn glyph_at(grid: &Grid, x: usize, y: usize) -> char {
        match grid.cell(x, y) {
            Some(Cell::Glyph { ch, .. }) => *ch,
            other => panic!("expected glyph at ({x},{y}), got {other:?}"),
        }
    }

    #[test]
    fn test_plain_echo() {
        let mut grid = Grid::new(80, 24);
        feed(&mut grid, b"AB\r\nC");
        assert_eq!(glyph_at(&grid, 0, 0), 'A');
        assert_eq!(glyph_at(&grid, 1, 0), 'B');
        assert_eq!(glyph_at(&grid, 0, 1), 'C');
        assert_eq!((grid.cursor.x, grid.cursor.y), (1, 1));
    }

    #[test]
    fn test_cup_is_one_indexed() {
        let mut grid = Grid::new(80, 24);
        feed(&mut grid, b"\x1b[3;5Hx");
        assert_eq!(glyph_at(&grid, 4, 2), 'x');
    }

    #[test]
    fn test_sgr_basic_and_reset() {
        let mut grid = Grid::new(10, 2);
        feed(&mut grid, b"\x1b[1;7;31ma\x1b[0mb");
        match grid.cell(0, 0) {
            Some(Cell::Glyph { style, .. }) => {
                assert!(style.bold && style.reverse);
                assert_eq!(style.fg, Color::Indexed(1));
            }
            other => panic!("unexpected {other:?}"),
        }
        match grid.cell(1, 0) {
            Some(Cell::Glyph { style, .. }) => assert_eq!(*style, Style::default()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_sgr_extended_colors() {
        let mut grid = Grid::new(10, 2);
        feed(&mut grid, b"\x1b[38;5;196m\x1b[48;2;10;20;30mx");
        match grid.cell(0, 0) {
            Some(Cell::Glyph { style, .. }) => {
                assert_eq!(style.fg, Color::Indexed(196));
                assert_eq!(style.bg, Color::Rgb(10, 20, 30));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_bright_foregrounds_map_high() {
        let mut grid = Grid::new(10, 2);
        feed(&mut grid, b"\x1b[92mx");
        match grid.cell(0, 0) {
            Some(Cell::Glyph { style, .. }) => assert_eq!(style.fg, Color::Indexed(10)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_erase_line_variants() {
        let mut grid = Grid::new(6, 2);
        feed(&mut grid, b"abcdef");
        feed(&mut grid, b"\x1b[1;3H\x1b[K");
        assert_eq!(glyph_at(&grid, 1, 0), 'b');
        assert!(matches!(grid.cell(2, 0), Some(Cell::Blank { .. })));
        assert!(matches!(grid.cell(5, 0), Some(Cell::Blank { .. })));
    }

    #[test]
    fn test_cursor_visibility_modes() {
        let mut grid = Grid::new(10, 2);
        feed(&mut grid, b"\x1b[?25l");
        assert!(!grid.cursor.visible);
        feed(&mut grid, b"\x1b[?25h");
        assert!(grid.cursor.visible);
    }

    #[test]
    fn test_alt_screen_1049() {
        let mut grid = Grid::new(10, 2);
        feed(&mut grid, b"hi\x1b[?1049h");
        assert!(matches!(grid.cell(0, 0), Some(Cell::Blank { .. })));
        feed(&mut grid, b"Z\x1b[?1049l");
        assert_eq!(glyph_at(&grid, 0, 0), 'h');
        assert_eq!((grid.cursor.x, grid.cursor.y), (2, 0));
    }

    #[test]
    fn test_dsr_queues_reports() {
        let mut grid = Grid::new(80, 24);
        feed(&mut grid, b"\x1b[6;4H\x1b[6n\x1b[5n");
        let responses = grid.take_responses();
        assert_eq!(responses, vec!["\x1b[6;4R".to_string(), "\x1b[0n".to_string()]);
    }
}
