//! Terminal colour model and palette resolution.
//!
//! Cells carry a `Color` which may be a palette index, a truecolour triple,
//! or the default marker. The marker is resolved against the configured
//! theme only at composite time, so changing the theme never requires
//! rewriting grid contents.

/// A resolved 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<[u8; 3]> for Rgb {
    fn from(v: [u8; 3]) -> Self {
        Rgb {
            r: v[0],
            g: v[1],
            b: v[2],
        }
    }
}

/// Colour of one cell as reported by the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// Use the configured default foreground/background.
    #[default]
    Default,
    /// xterm 256-colour palette entry.
    Indexed(u8),
    /// 24-bit truecolour.
    Rgb(u8, u8, u8),
}

/// The 16 base ANSI colours (xterm values).
const ANSI16: [Rgb; 16] = [
    Rgb { r: 0, g: 0, b: 0 },
    Rgb { r: 205, g: 0, b: 0 },
    Rgb { r: 0, g: 205, b: 0 },
    Rgb { r: 205, g: 205, b: 0 },
    Rgb { r: 0, g: 0, b: 238 },
    Rgb { r: 205, g: 0, b: 205 },
    Rgb { r: 0, g: 205, b: 205 },
    Rgb { r: 229, g: 229, b: 229 },
    Rgb { r: 127, g: 127, b: 127 },
    Rgb { r: 255, g: 0, b: 0 },
    Rgb { r: 0, g: 255, b: 0 },
    Rgb { r: 255, g: 255, b: 0 },
    Rgb { r: 92, g: 92, b: 255 },
    Rgb { r: 255, g: 0, b: 255 },
    Rgb { r: 0, g: 255, b: 255 },
    Rgb { r: 255, g: 255, b: 255 },
];

/// Resolve a cell colour to RGB, substituting `default` for the marker.
pub fn resolve(color: Color, default: Rgb) -> Rgb {
    match color {
        Color::Default => default,
        Color::Rgb(r, g, b) => Rgb { r, g, b },
        Color::Indexed(i) => palette256(i),
    }
}

/// xterm 256-colour palette: 16 ANSI entries, a 6x6x6 cube, a grey ramp.
fn palette256(index: u8) -> Rgb {
    match index {
        0..=15 => ANSI16[index as usize],
        16..=231 => {
            let i = index - 16;
            Rgb {
                r: cube_level(i / 36),
                g: cube_level((i % 36) / 6),
                b: cube_level(i % 6),
            }
        }
        232..=255 => {
            let v = 8 + 10 * (index - 232);
            Rgb { r: v, g: v, b: v }
        }
    }
}

fn cube_level(v: u8) -> u8 {
    if v == 0 { 0 } else { 55 + 40 * v }
}
