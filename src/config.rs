//! Compiled-in configuration with an optional TOML overlay.
//!
//! Everything has a built-in default; `~/.config/vtmux/config.toml` may
//! override the font and colour scheme. A missing or malformed file is
//! never fatal, it just logs and falls back.

use crate::term::color::Rgb;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_FONT_PX: u32 = 20;

/// Colour scheme for everything the compositor paints outside cell
/// contents: defaults, cursor, tab bar.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub fg: Rgb,
    pub bg: Rgb,
    pub cursor_fg: Rgb,
    pub cursor_bg: Rgb,
    pub bar_bg: Rgb,
    pub bar_fg: Rgb,
    pub bar_active_bg: Rgb,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            fg: Rgb {
                r: 216,
                g: 216,
                b: 216,
            },
            bg: Rgb { r: 16, g: 16, b: 16 },
            cursor_fg: Rgb { r: 16, g: 16, b: 16 },
            cursor_bg: Rgb {
                r: 216,
                g: 216,
                b: 216,
            },
            bar_bg: Rgb { r: 40, g: 40, b: 40 },
            bar_fg: Rgb {
                r: 160,
                g: 160,
                b: 160,
            },
            bar_active_bg: Rgb {
                r: 96,
                g: 96,
                b: 96,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub font_px: u32,
    pub font_path: Option<PathBuf>,
    pub theme: Theme,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            font_px: DEFAULT_FONT_PX,
            font_path: None,
            theme: Theme::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    font_px: Option<u32>,
    font_path: Option<PathBuf>,
    colors: RawColors,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawColors {
    foreground: Option<[u8; 3]>,
    background: Option<[u8; 3]>,
    cursor_foreground: Option<[u8; 3]>,
    cursor_background: Option<[u8; 3]>,
    bar_background: Option<[u8; 3]>,
    bar_foreground: Option<[u8; 3]>,
    bar_active_background: Option<[u8; 3]>,
}

impl Config {
    pub fn load() -> Self {
        let Some(path) = Self::file_path() else {
            return Config::default();
        };
        match fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text).unwrap_or_else(|e| {
                log::warn!("ignoring malformed {}: {e}", path.display());
                Config::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => {
                log::warn!("cannot read {}: {e}", path.display());
                Config::default()
            }
        }
    }

    fn file_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("vtmux").join("config.toml"))
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(text)?;
        let mut config = Config::default();
        if let Some(px) = raw.font_px {
            config.font_px = px;
        }
        config.font_path = raw.font_path;
        let t = &mut config.theme;
        let c = raw.colors;
        apply(&mut t.fg, c.foreground);
        apply(&mut t.bg, c.background);
        apply(&mut t.cursor_fg, c.cursor_foreground);
        apply(&mut t.cursor_bg, c.cursor_background);
        apply(&mut t.bar_bg, c.bar_background);
        apply(&mut t.bar_fg, c.bar_foreground);
        apply(&mut t.bar_active_bg, c.bar_active_background);
        Ok(config)
    }
}

fn apply(slot: &mut Rgb, value: Option<[u8; 3]>) {
    if let Some(v) = value {
        *slot = Rgb::from(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.font_px, DEFAULT_FONT_PX);
        assert!(config.font_path.is_none());
        assert_ne!(config.theme.fg, config.theme.bg);
    }

    #[test]
    fn test_toml_overlay_overrides_selected_fields() {
        let config = Config::from_toml(
            r#"
            font_px = 16
            [colors]
            background = [1, 2, 3]
            "#,
        )
        .unwrap();
        assert_eq!(config.font_px, 16);
        assert_eq!(config.theme.bg, Rgb { r: 1, g: 2, b: 3 });
        // Untouched fields keep their defaults.
        assert_eq!(config.theme.fg, Theme::default().fg);
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(Config::from_toml("font_px = \"shoes\"").is_err());
    }

    #[test]
    fn test_unknown_keys_are_tolerated() {
        let config = Config::from_toml("future_knob = true").unwrap();
        assert_eq!(config.font_px, DEFAULT_FONT_PX);
    }
}
