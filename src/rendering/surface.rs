/// Pixel surfaces, image chunks and surface ownership

use std::fmt;

use sha2::{Digest, Sha256};

use crate::{Error, Result, Viewport};

const BYTES_PER_PIXEL: usize = 4;

/// An RGBA8 tile produced by a `SurfaceRenderer`.
///
/// Row 0 is the top edge of the tile. The buffer always holds exactly
/// `width * height` pixels; chunks are built through `new` or `filled`.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageChunk {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageChunk {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(Error::SurfaceUnavailable(format!(
                "chunk buffer holds {} bytes, expected {} for {}x{}",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self { width, height, pixels })
    }

    /// A chunk with every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        Self {
            width,
            height,
            pixels: rgba.repeat(count),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// The mutable pixel-bearing drawing target.
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// Create a transparent surface.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        check_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes, row 0 at the top.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Reset every pixel to transparent.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Change the dimensions. Like a canvas, this discards the content.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        check_dimensions(width, height)?;
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels
            .resize(width as usize * height as usize * BYTES_PER_PIXEL, 0);
        Ok(())
    }

    /// Copy `chunk` so its top-left corner lands at `(x, y)`.
    ///
    /// Parts of the chunk outside the surface are clipped; the chunk replaces
    /// the pixels it covers.
    pub fn draw_image(&mut self, chunk: &ImageChunk, x: i64, y: i64) {
        let x0 = x.max(0);
        let x1 = (x + i64::from(chunk.width)).min(i64::from(self.width));
        if x1 <= x0 {
            return;
        }
        let span = (x1 - x0) as usize * BYTES_PER_PIXEL;
        let src_col = (x0 - x) as usize * BYTES_PER_PIXEL;

        for row in 0..chunk.height {
            let ty = y + i64::from(row);
            if ty < 0 || ty >= i64::from(self.height) {
                continue;
            }
            let src = row as usize * chunk.width as usize * BYTES_PER_PIXEL + src_col;
            let dst = (ty as usize * self.width as usize + x0 as usize) * BYTES_PER_PIXEL;
            self.pixels[dst..dst + span].copy_from_slice(&chunk.pixels[src..src + span]);
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.pixels[i..i + BYTES_PER_PIXEL]);
        Some(out)
    }

    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&b| b == 0)
    }

    /// Hex SHA-256 over the dimensions and pixels.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        hasher.update(&self.pixels);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ImageChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageChunk")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }
    Ok(())
}

/// Who holds drawing rights over a surface.
///
/// A slot starts out `Owned`; `transfer` hands the surface to another context
/// exactly once, after which the slot only remembers the last known size.
#[derive(Debug)]
pub enum SurfaceSlot {
    Owned(Surface),
    Transferred { width: u32, height: u32 },
}

impl SurfaceSlot {
    pub fn new(surface: Surface) -> Self {
        SurfaceSlot::Owned(surface)
    }

    /// Give up the surface. Fails on every call after the first.
    pub fn transfer(&mut self) -> Result<Surface> {
        let (width, height) = self.dimensions();
        match std::mem::replace(self, SurfaceSlot::Transferred { width, height }) {
            SurfaceSlot::Owned(surface) => Ok(surface),
            SurfaceSlot::Transferred { .. } => Err(Error::SurfaceTransferred),
        }
    }

    /// Drawing access, only while the surface has not been transferred.
    pub fn get_mut(&mut self) -> Result<&mut Surface> {
        match self {
            SurfaceSlot::Owned(surface) => Ok(surface),
            SurfaceSlot::Transferred { .. } => Err(Error::SurfaceUnavailable(
                "surface was transferred to the offload context".to_string(),
            )),
        }
    }

    pub fn is_transferred(&self) -> bool {
        matches!(self, SurfaceSlot::Transferred { .. })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            SurfaceSlot::Owned(surface) => (surface.width(), surface.height()),
            SurfaceSlot::Transferred { width, height } => (*width, *height),
        }
    }

    /// Record a size change applied by the current owner.
    pub(crate) fn set_dimensions(&mut self, new_width: u32, new_height: u32) -> Result<()> {
        match self {
            SurfaceSlot::Owned(surface) => surface.resize(new_width, new_height),
            SurfaceSlot::Transferred { width, height } => {
                check_dimensions(new_width, new_height)?;
                *width = new_width;
                *height = new_height;
                Ok(())
            }
        }
    }
}

/// How a surface is displayed inside a viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayLayout {
    pub width: f64,
    pub height: f64,
    pub left: i64,
    pub top: i64,
}

impl DisplayLayout {
    /// Shrink (never enlarge) the surface to fit the viewport and center it.
    pub fn fit(width: u32, height: u32, viewport: Viewport) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let (vw, vh) = (f64::from(viewport.width), f64::from(viewport.height));
        let scale = (vw / w).min(vh / h);
        let (w, h) = if scale < 1.0 { (w * scale, h * scale) } else { (w, h) };
        Self {
            width: w,
            height: h,
            left: ((vw - w) / 2.0).round() as i64,
            top: ((vh - h) / 2.0).round() as i64,
        }
    }
}
