//! Rasterises the active tab into the shadow buffer.
//!
//! Rendering is strictly two passes: every cell background first, every
//! glyph second. Glyph bitmaps overhang their cell via bearings, so a
//! neighbour's background painted after a glyph would erase the overhang.
//! The tab bar occupies the bottom cell row; a one-pixel splitter divides
//! the panes of a split tab.

use crate::config::Theme;
use crate::font::{FontRaster, Glyph};
use crate::tab::Tab;
use crate::term::color::{self, Color, Rgb};
use crate::term::grid::{Cell, Style};
use std::io;

/// Stride-addressed view of a 32-bit XR24 pixel buffer.
pub struct Canvas<'a> {
    pub buf: &'a mut [u8],
    pub width: usize,
    pub height: usize,
    pub stride: usize,
}

impl Canvas<'_> {
    #[inline]
    fn put(&mut self, x: usize, y: usize, c: Rgb) {
        let offset = y * self.stride + x * 4;
        if let Some(px) = self.buf.get_mut(offset..offset + 4) {
            px[0] = c.b;
            px[1] = c.g;
            px[2] = c.r;
            px[3] = 0;
        }
    }

    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, c: Rgb) {
        let x_end = (x + w).min(self.width);
        let y_end = (y + h).min(self.height);
        for row in y..y_end {
            for col in x..x_end {
                self.put(col, row, c);
            }
        }
    }

    /// Blend an 8-bit coverage bitmap at (x, y), which may be negative or
    /// overhang the edges; out-of-bounds pixels are clipped. Zero coverage
    /// leaves the destination untouched.
    pub fn blend_glyph(&mut self, x: i32, y: i32, glyph: &Glyph, fg: Rgb, bg: Rgb) {
        for gy in 0..glyph.rows {
            let py = y + gy as i32;
            if py < 0 || py >= self.height as i32 {
                continue;
            }
            for gx in 0..glyph.width {
                let px = x + gx as i32;
                if px < 0 || px >= self.width as i32 {
                    continue;
                }
                let a = glyph.coverage[gy * glyph.pitch + gx];
                if a == 0 {
                    continue;
                }
                self.put(px as usize, py as usize, blend(fg, bg, a));
            }
        }
    }
}

/// `round((fg*a + bg*(255-a)) / 255)` per channel.
fn blend(fg: Rgb, bg: Rgb, a: u8) -> Rgb {
    let mix = |f: u8, b: u8| -> u8 {
        ((f as u32 * a as u32 + b as u32 * (255 - a as u32) + 127) / 255) as u8
    };
    Rgb {
        r: mix(fg.r, bg.r),
        g: mix(fg.g, bg.g),
        b: mix(fg.b, bg.b),
    }
}

/// Effective colours of one cell: defaults substituted, bold brightening
/// the low palette, reverse swapping the pair.
fn cell_colors(style: Style, theme: &Theme) -> (Rgb, Rgb) {
    let fg_color = match style.fg {
        Color::Indexed(i) if style.bold && i < 8 => Color::Indexed(i + 8),
        other => other,
    };
    let fg = color::resolve(fg_color, theme.fg);
    let bg = color::resolve(style.bg, theme.bg);
    if style.reverse { (bg, fg) } else { (fg, bg) }
}

/// Paint one full frame of the active tab into the canvas.
pub fn render(
    canvas: &mut Canvas<'_>,
    font: &mut FontRaster,
    theme: &Theme,
    tabs: &[Tab],
    active_tab: usize,
) -> io::Result<()> {
    let (cw, ch, asc) = (font.cw, font.ch, font.asc);
    let tab = match tabs.get(active_tab) {
        Some(t) => t,
        None => return Ok(()),
    };
    let content_height = canvas.height.saturating_sub(ch);

    // Slack to the right of the last pane and under the grid.
    canvas.fill_rect(0, 0, canvas.width, content_height, theme.bg);

    // Pass 1: backgrounds. Wide cells fill both their columns here, so the
    // continuation cell itself is skipped.
    for (pane_idx, pane) in tab.panes.iter().enumerate() {
        let grid = pane.grid();
        let cursor = grid.cursor;
        let is_active_pane = pane_idx == tab.active_pane;
        for r in 0..grid.rows() {
            for c in 0..grid.cols() {
                let (width, style) = match grid.cell(c, r) {
                    Some(Cell::Glyph { width, style, .. }) => (*width as usize, *style),
                    Some(Cell::Blank { style }) => (1, *style),
                    _ => continue,
                };
                let (_, mut bg) = cell_colors(style, theme);
                if is_active_pane && cursor.visible && r == cursor.y && c == cursor.x {
                    bg = theme.cursor_bg;
                }
                canvas.fill_rect(pane.start_col_px + c * cw, r * ch, width * cw, ch, bg);
            }
        }
    }

    // Pass 2: glyphs.
    for (pane_idx, pane) in tab.panes.iter().enumerate() {
        let grid = pane.grid();
        let cursor = grid.cursor;
        let is_active_pane = pane_idx == tab.active_pane;
        for r in 0..grid.rows() {
            for c in 0..grid.cols() {
                let (ch_code, width, style) = match grid.cell(c, r) {
                    Some(Cell::Glyph { ch, width, style }) => (*ch, *width as usize, *style),
                    _ => continue,
                };
                if ch_code == ' ' || ch_code == '\0' {
                    continue;
                }
                let (mut fg, mut bg) = cell_colors(style, theme);
                if is_active_pane && cursor.visible && r == cursor.y && c == cursor.x {
                    fg = theme.cursor_fg;
                    bg = theme.cursor_bg;
                }
                let glyph = font.glyph(ch_code)?;
                let centre = (width * cw).saturating_sub(glyph.advance) / 2;
                let gx = (pane.start_col_px + c * cw + centre) as i32 + glyph.left;
                let gy = (r * ch + asc) as i32 - glyph.top;
                canvas.blend_glyph(gx, gy, glyph, fg, bg);
            }
        }
    }

    // Splitter between the two panes of a split tab.
    if tab.panes.len() == 2 {
        let x = tab.panes[1].start_col_px.saturating_sub(1);
        canvas.fill_rect(x, 0, 1, tab.term_rows * ch, theme.bar_fg);
    }

    draw_tab_bar(canvas, font, theme, tabs.len(), active_tab)?;
    Ok(())
}

/// Bottom row: one numeric label per tab, active tab highlighted.
fn draw_tab_bar(
    canvas: &mut Canvas<'_>,
    font: &mut FontRaster,
    theme: &Theme,
    num_tabs: usize,
    active_tab: usize,
) -> io::Result<()> {
    let (cw, ch, asc) = (font.cw, font.ch, font.asc);
    let bar_y = canvas.height.saturating_sub(ch);
    canvas.fill_rect(0, bar_y, canvas.width, ch, theme.bar_bg);

    let mut pen = cw / 2;
    for i in 0..num_tabs {
        let (fg, bg) = if i == active_tab {
            (theme.cursor_fg, theme.bar_active_bg)
        } else {
            (theme.bar_fg, theme.bar_bg)
        };
        let label = format!(" {} ", i + 1);
        for chr in label.chars() {
            canvas.fill_rect(pen, bar_y, cw, ch, bg);
            if chr != ' ' {
                let glyph = font.glyph(chr)?;
                let centre = cw.saturating_sub(glyph.advance) / 2;
                let gx = (pen + centre) as i32 + glyph.left;
                let gy = (bar_y + asc) as i32 - glyph.top;
                canvas.blend_glyph(gx, gy, glyph, fg, bg);
            }
            pen += cw;
        }
        pen += cw / 2;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };
    const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };

    fn canvas_buf(height: usize, stride: usize) -> Vec<u8> {
        vec![0xAA; stride * height]
    }

    fn px(buf: &[u8], stride: usize, x: usize, y: usize) -> (u8, u8, u8) {
        let o = y * stride + x * 4;
        (buf[o + 2], buf[o + 1], buf[o])
    }

    #[test]
    fn test_fill_rect_respects_stride_and_bounds() {
        let stride = 8 * 4 + 16; // wider than width*4
        let mut buf = canvas_buf(4, stride);
        {
            let mut canvas = Canvas {
                buf: &mut buf,
                width: 8,
                height: 4,
                stride,
            };
            canvas.fill_rect(6, 2, 10, 10, RED);
        }
        assert_eq!(px(&buf, stride, 6, 2), (255, 0, 0));
        assert_eq!(px(&buf, stride, 7, 3), (255, 0, 0));
        // Outside the rect and in the stride padding: untouched.
        assert_eq!(px(&buf, stride, 5, 2), (0xAA, 0xAA, 0xAA));
        assert_eq!(buf[2 * stride + 8 * 4], 0xAA);
    }

    #[test]
    fn test_blend_endpoints_and_rounding() {
        assert_eq!(blend(WHITE, BLACK, 255), WHITE);
        assert_eq!(blend(WHITE, BLACK, 0), BLACK);
        // 128/255 of white rounds to 128.
        assert_eq!(blend(WHITE, BLACK, 128).r, 128);
    }

    #[test]
    fn test_blend_glyph_skips_transparent_pixels() {
        let stride = 4 * 4;
        let mut buf = canvas_buf(2, stride);
        let glyph = Glyph {
            // pitch 3 > width 2: the third byte per row must be ignored.
            coverage: vec![255, 0, 99, 0, 255, 99],
            width: 2,
            rows: 2,
            pitch: 3,
            left: 0,
            top: 0,
            advance: 2,
        };
        {
            let mut canvas = Canvas {
                buf: &mut buf,
                width: 4,
                height: 2,
                stride,
            };
            canvas.blend_glyph(0, 0, &glyph, WHITE, BLACK);
        }
        assert_eq!(px(&buf, stride, 0, 0), (255, 255, 255));
        assert_eq!(px(&buf, stride, 1, 1), (255, 255, 255));
        // a == 0 leaves the 0xAA background bytes alone.
        assert_eq!(px(&buf, stride, 1, 0), (0xAA, 0xAA, 0xAA));
        assert_eq!(px(&buf, stride, 0, 1), (0xAA, 0xAA, 0xAA));
        // pitch slack never painted anything.
        assert_eq!(px(&buf, stride, 2, 0), (0xAA, 0xAA, 0xAA));
    }

    #[test]
    fn test_blend_glyph_clips_negative_origin() {
        let stride = 4 * 4;
        let mut buf = canvas_buf(2, stride);
        let glyph = Glyph {
            coverage: vec![255; 4],
            width: 2,
            rows: 2,
            pitch: 2,
            left: 0,
            top: 0,
            advance: 2,
        };
        let mut canvas = Canvas {
            buf: &mut buf,
            width: 4,
            height: 2,
            stride,
        };
        // Must not panic or wrap around.
        canvas.blend_glyph(-1, -1, &glyph, WHITE, BLACK);
        assert_eq!(px(canvas.buf, stride, 0, 0), (255, 255, 255));
    }

    // Tests below exercise the real render path and need a system font
    // (and, for the tab test, a working /dev/ptmx); they bail out quietly
    // on hosts without one.
    fn try_font() -> Option<FontRaster> {
        FontRaster::load(None, 20).ok()
    }

    #[test]
    fn test_tab_bar_fills_bottom_cell_row() {
        let Some(mut font) = try_font() else { return };
        let theme = Theme::default();
        let (width, height) = (40 * font.cw, 6 * font.ch);
        let stride = width * 4;
        let mut buf = vec![0u8; stride * height];
        {
            let mut canvas = Canvas {
                buf: &mut buf,
                width,
                height,
                stride,
            };
            draw_tab_bar(&mut canvas, &mut font, &theme, 2, 0).unwrap();
        }
        let bar_y = height - font.ch;
        // Row above the bar untouched, bar background below, and the
        // active tab's label cell in the active background.
        assert_eq!(px(&buf, stride, 0, bar_y - 1), (0, 0, 0));
        assert_eq!(
            px(&buf, stride, 0, bar_y),
            (theme.bar_bg.r, theme.bar_bg.g, theme.bar_bg.b)
        );
        assert_eq!(
            px(&buf, stride, font.cw / 2, bar_y),
            (
                theme.bar_active_bg.r,
                theme.bar_active_bg.g,
                theme.bar_active_bg.b
            )
        );
    }

    #[test]
    fn test_render_fresh_tab_and_split() {
        let Some(mut font) = try_font() else { return };
        unsafe { std::env::set_var("SHELL", "/bin/sh") };
        let theme = Theme::default();
        let (cw, ch) = (font.cw, font.ch);
        let (width, height) = (20 * cw, 5 * ch);
        let stride = width * 4;

        let mut tabs = vec![Tab::create(width, height, cw, ch).unwrap()];
        let mut buf = vec![0u8; stride * height];
        {
            let mut canvas = Canvas {
                buf: &mut buf,
                width,
                height,
                stride,
            };
            render(&mut canvas, &mut font, &theme, &tabs, 0).unwrap();
        }
        // Nothing has been drained, so the cursor still sits at (0,0) and
        // every other cell shows the default background.
        let cur = theme.cursor_bg;
        assert_eq!(px(&buf, stride, 0, 0), (cur.r, cur.g, cur.b));
        assert_eq!(
            px(&buf, stride, cw, 0),
            (theme.bg.r, theme.bg.g, theme.bg.b)
        );

        // Split: left pane shrinks to 10 columns, the splitter sits one
        // pixel left of the new pane's origin, and the cursor follows the
        // new (active) pane.
        tabs[0].split_vertical(cw, ch).unwrap();
        assert_eq!(tabs[0].panes[0].cols, 10);
        assert_eq!(tabs[0].panes[1].start_col_px, 10 * cw);
        {
            let mut canvas = Canvas {
                buf: &mut buf,
                width,
                height,
                stride,
            };
            render(&mut canvas, &mut font, &theme, &tabs, 0).unwrap();
        }
        let split_x = 10 * cw - 1;
        assert_eq!(
            px(&buf, stride, split_x, 0),
            (theme.bar_fg.r, theme.bar_fg.g, theme.bar_fg.b)
        );
        assert_eq!(
            px(&buf, stride, 10 * cw, 0),
            (cur.r, cur.g, cur.b)
        );
        assert_eq!(
            px(&buf, stride, 0, 0),
            (theme.bg.r, theme.bg.g, theme.bg.b)
        );
    }

    #[test]
    fn test_reverse_swaps_and_cursor_colors() {
        let theme = Theme::default();
        let style = Style {
            reverse: true,
            ..Style::default()
        };
        let (fg, bg) = cell_colors(style, &theme);
        assert_eq!(fg, theme.bg);
        assert_eq!(bg, theme.fg);
    }

    #[test]
    fn test_bold_brightens_low_palette() {
        let theme = Theme::default();
        let style = Style {
            bold: true,
            fg: Color::Indexed(1),
            ..Style::default()
        };
        let (fg, _) = cell_colors(style, &theme);
        assert_eq!(fg, color::resolve(Color::Indexed(9), theme.fg));
    }
}
