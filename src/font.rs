//! Monospace glyph rasterisation via FreeType.
//!
//! One face is loaded at a fixed pixel size for the lifetime of the
//! process. Cell metrics come from the face and a probe of `M`; every
//! glyph is rendered to an 8-bit coverage bitmap with its bearings and
//! advance, which is all the compositor needs to place it.

use freetype::face::LoadFlag;
use freetype::{Face, Library};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io;
use std::path::{Path, PathBuf};

/// Searched in order; the first readable file wins.
pub const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeMono.ttf",
];

/// One rasterised glyph: an 8-bit coverage grid plus placement metrics.
/// `pitch` is bytes per bitmap row and may exceed `width`.
#[derive(Debug, Clone)]
pub struct Glyph {
    pub coverage: Vec<u8>,
    pub width: usize,
    pub rows: usize,
    pub pitch: usize,
    /// Horizontal bearing: offset from the pen to the bitmap's left edge.
    pub left: i32,
    /// Vertical bearing: offset from the baseline up to the bitmap's top edge.
    pub top: i32,
    /// Pen advance in whole pixels.
    pub advance: usize,
}

pub struct FontRaster {
    face: Face,
    cache: HashMap<char, Glyph>,
    /// Cell advance width in pixels.
    pub cw: usize,
    /// Cell line height in pixels.
    pub ch: usize,
    /// Baseline distance from the cell top.
    pub asc: usize,
    _lib: Library,
}

impl FontRaster {
    /// Load the preferred path if given, else the first readable candidate,
    /// at `px` pixels. Fails if no face is found or the metrics probe
    /// reports a degenerate cell.
    pub fn load(preferred: Option<&Path>, px: u32) -> io::Result<Self> {
        let path = select_font_path(preferred).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "no monospace font found in the candidate list",
            )
        })?;

        let lib = Library::init().map_err(io::Error::other)?;
        let face = lib.new_face(&path, 0).map_err(io::Error::other)?;
        face.set_pixel_sizes(0, px).map_err(io::Error::other)?;

        // Probe 'M' for the advance; the face metrics give height/ascender.
        face.load_char('M' as usize, LoadFlag::RENDER)
            .map_err(io::Error::other)?;
        let cw = (face.glyph().advance().x >> 6).max(0) as usize;
        let metrics = face.size_metrics().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} carries no size metrics", path.display()),
            )
        })?;
        let ch = (metrics.height >> 6) as usize;
        let asc = (metrics.ascender >> 6) as usize;

        if cw == 0 || ch == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} reports a degenerate {}x{} cell at {}px",
                    path.display(),
                    cw,
                    ch,
                    px
                ),
            ));
        }

        log::info!(
            "font {} at {}px: cell {}x{}, ascender {}",
            path.display(),
            px,
            cw,
            ch,
            asc
        );

        Ok(FontRaster {
            face,
            cache: HashMap::new(),
            cw,
            ch,
            asc,
            _lib: lib,
        })
    }

    /// Rasterise (or fetch the cached raster of) one codepoint.
    pub fn glyph(&mut self, ch: char) -> io::Result<&Glyph> {
        let Self { face, cache, .. } = self;
        match cache.entry(ch) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => Ok(v.insert(raster(face, ch)?)),
        }
    }
}

fn select_font_path(preferred: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = preferred {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        log::warn!("configured font {} not readable, falling back", path.display());
    }
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

fn raster(face: &Face, ch: char) -> io::Result<Glyph> {
    face.load_char(ch as usize, LoadFlag::RENDER)
        .map_err(io::Error::other)?;
    let slot = face.glyph();
    let bitmap = slot.bitmap();
    let width = bitmap.width().max(0) as usize;
    let rows = bitmap.rows().max(0) as usize;
    let pitch = bitmap.pitch().unsigned_abs() as usize;
    // Whitespace renders as an empty bitmap; its buffer pointer is null.
    let coverage = if width == 0 || rows == 0 {
        Vec::new()
    } else {
        bitmap.buffer().to_vec()
    };
    Ok(Glyph {
        coverage,
        width,
        rows,
        pitch,
        left: slot.bitmap_left(),
        top: slot.bitmap_top(),
        advance: (slot.advance().x >> 6).max(0) as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_list_is_nonempty_and_absolute() {
        assert!(!FONT_CANDIDATES.is_empty());
        assert!(FONT_CANDIDATES.iter().all(|p| p.starts_with('/')));
    }

    #[test]
    fn test_load_and_probe_metrics() {
        // Skip quietly on hosts with no candidate font installed.
        if select_font_path(None).is_none() {
            return;
        }
        let mut font = FontRaster::load(None, 20).unwrap();
        assert!(font.cw > 0 && font.ch > 0);
        assert!(font.asc <= font.ch);

        let glyph = font.glyph('M').unwrap();
        assert!(glyph.width > 0 && glyph.rows > 0);
        assert!(glyph.pitch >= glyph.width);
        assert_eq!(glyph.coverage.len(), glyph.pitch * glyph.rows);
        assert!(glyph.advance > 0);

        // Whitespace carries no coverage.
        let space = font.glyph(' ').unwrap();
        assert_eq!(space.coverage.len(), 0);
    }

    #[test]
    fn test_missing_preferred_path_falls_back() {
        if select_font_path(None).is_none() {
            return;
        }
        let chosen = select_font_path(Some(Path::new("/nonexistent/font.ttf")));
        assert!(chosen.is_some());
    }
}
