//! DRM/KMS display driver.
//!
//! Owns the scan-out path end to end: the first usable card, a connected
//! connector and its native mode, a CRTC, a CPU-mapped dumb buffer with a
//! framebuffer object over it, and a heap shadow buffer of identical
//! layout. All painting goes to the shadow; a frame reaches the screen
//! only through `commit`, which bulk-copies the shadow into the dumb
//! buffer. The CRTC configuration found at startup is reinstalled on drop.

use drm::Device as DrmDevice;
use drm::buffer::{Buffer, DrmFourcc};
use drm::control::dumbbuffer::DumbBuffer;
use drm::control::{Device as ControlDevice, Mode, connector, crtc, framebuffer};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

/// A `/dev/dri/card*` node. The drm crate drives everything through the
/// two device traits; this wrapper only supplies the fd.
struct Card(File);

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl DrmDevice for Card {}
impl ControlDevice for Card {}

const CARD_GLOB: &str = "/dev/dri/card";
const MAX_CARDS: u32 = 8;

pub struct Display {
    card: Card,
    crtc: crtc::Handle,
    connector: connector::Handle,
    mode: Mode,
    fb: framebuffer::Handle,
    db: Option<DumbBuffer>,
    /// CRTC state captured before we touched it; reinstalled verbatim.
    saved_crtc: crtc::Info,
    pub width: usize,
    pub height: usize,
    /// Bytes per scan-out row; may exceed `width * 4`.
    pub stride: usize,
    /// Total mapped bytes of the scan-out buffer.
    pub size: usize,
    shadow: Vec<u8>,
}

impl Display {
    /// Probe cards in order and bring the first usable one up at its
    /// connector's native mode. Partial state is torn down on any failure.
    pub fn open() -> io::Result<Self> {
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no DRM card found");
        for index in 0..MAX_CARDS {
            let path = format!("{CARD_GLOB}{index}");
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(f) => f,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };
            match Self::init_card(Card(file), &path) {
                Ok(display) => return Ok(display),
                Err(e) => {
                    log::warn!("{path}: {e}");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn init_card(card: Card, path: &str) -> io::Result<Self> {
        let resources = card.resource_handles()?;
        if resources.connectors().is_empty() || resources.crtcs().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "card exposes no connector or CRTC",
            ));
        }

        // First connector with a physical link and at least one mode.
        let mut selected = None;
        for &conn in resources.connectors() {
            let info = card.get_connector(conn, false)?;
            if info.state() == connector::State::Connected && !info.modes().is_empty() {
                selected = Some(info);
                break;
            }
        }
        let conn_info = selected.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no connected monitor with modes")
        })?;
        let mode = conn_info.modes()[0];
        let (width, height) = (mode.size().0 as usize, mode.size().1 as usize);

        // Prefer the CRTC already wired to the connector's encoder.
        let current_crtc = match conn_info.current_encoder() {
            Some(enc) => card.get_encoder(enc)?.crtc(),
            None => None,
        };
        let crtc_handle = match current_crtc {
            Some(h) => h,
            None => resources.crtcs()[0],
        };
        let saved_crtc = card.get_crtc(crtc_handle)?;

        let mut db =
            card.create_dumb_buffer((width as u32, height as u32), DrmFourcc::Xrgb8888, 32)?;
        let stride = db.pitch() as usize;

        let fb = match card.add_framebuffer(&db, 24, 32) {
            Ok(fb) => fb,
            Err(e) => {
                let _ = card.destroy_dumb_buffer(db);
                return Err(e.into());
            }
        };

        // Map once up front: learns the byte size and proves the mapping
        // works before the mode is touched.
        let map_result = card.map_dumb_buffer(&mut db).map(|mut map| {
            let bytes = map.as_mut();
            bytes.fill(0);
            bytes.len()
        });
        let size = match map_result {
            Ok(size) => size,
            Err(e) => {
                let _ = card.destroy_framebuffer(fb);
                let _ = card.destroy_dumb_buffer(db);
                return Err(e.into());
            }
        };

        if let Err(e) = card.set_crtc(
            crtc_handle,
            Some(fb),
            (0, 0),
            &[conn_info.handle()],
            Some(mode),
        ) {
            let _ = card.destroy_framebuffer(fb);
            let _ = card.destroy_dumb_buffer(db);
            return Err(e.into());
        }

        log::info!(
            "{path}: {}x{} @{}Hz, stride {}, {} bytes",
            width,
            height,
            mode.vrefresh(),
            stride,
            size
        );

        Ok(Display {
            card,
            crtc: crtc_handle,
            connector: conn_info.handle(),
            mode,
            fb,
            db: Some(db),
            saved_crtc,
            width,
            height,
            stride,
            size,
            shadow: vec![0; size],
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.card.0.as_raw_fd()
    }

    /// The shadow buffer as a stride-addressed canvas.
    pub fn canvas(&mut self) -> crate::compositor::Canvas<'_> {
        crate::compositor::Canvas {
            buf: &mut self.shadow,
            width: self.width,
            height: self.height,
            stride: self.stride,
        }
    }

    /// Copy the shadow into the scan-out buffer. The copy is not
    /// synchronised against scan-out; at worst one frame tears.
    pub fn commit(&mut self) -> io::Result<()> {
        let db = match self.db.as_mut() {
            Some(db) => db,
            None => return Ok(()),
        };
        let mut map = self.card.map_dumb_buffer(db)?;
        let dst = map.as_mut();
        let n = dst.len().min(self.size);
        dst[..n].copy_from_slice(&self.shadow[..n]);
        Ok(())
    }

    /// Reinstall our framebuffer and mode. Needed after the console comes
    /// back from another VT owner that reprogrammed the CRTC.
    pub fn install(&self) -> io::Result<()> {
        self.card.set_crtc(
            self.crtc,
            Some(self.fb),
            (0, 0),
            &[self.connector],
            Some(self.mode),
        )
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        // Put the console back exactly as found, then release resources.
        let _ = self.card.set_crtc(
            self.crtc,
            self.saved_crtc.framebuffer(),
            self.saved_crtc.position(),
            &[self.connector],
            self.saved_crtc.mode(),
        );
        let _ = self.card.destroy_framebuffer(self.fb);
        if let Some(db) = self.db.take() {
            let _ = self.card.destroy_dumb_buffer(db);
        }
    }
}
