/// Chunked rasterization: drives a `SurfaceRenderer` over a whole surface
/// one tile at a time, polling a cancellation flag between tiles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::rendering::{Surface, SurfaceRenderer};
use crate::scene::Scene;
use crate::{Error, Result};

/// Cooperative cancellation flag shared between a session and its chunk loop.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A tile origin in surface coordinates measured from the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
}

impl Tile {
    /// Top-left position of the tile on a surface of `height` rows.
    pub fn target(&self, height: u32, chunk_size: u32) -> (i64, i64) {
        (
            i64::from(self.x),
            i64::from(height) - (i64::from(self.y) + i64::from(chunk_size)),
        )
    }
}

/// Row-major tile order, bottom row first, left to right within a row.
#[derive(Debug, Clone)]
pub struct TileGrid {
    width: u32,
    height: u32,
    chunk_size: u32,
    x: u32,
    y: u32,
}

impl Iterator for TileGrid {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.y >= self.height || self.width == 0 {
            return None;
        }
        let tile = Tile { x: self.x, y: self.y };
        self.x = self.x.saturating_add(self.chunk_size);
        if self.x >= self.width {
            self.x = 0;
            self.y = self.y.saturating_add(self.chunk_size);
        }
        Some(tile)
    }
}

pub fn tile_origins(width: u32, height: u32, chunk_size: u32) -> TileGrid {
    TileGrid {
        width,
        height,
        chunk_size: chunk_size.max(1),
        x: 0,
        y: 0,
    }
}

/// One tile drawn onto the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDrawn {
    pub index: usize,
    pub x: i64,
    pub y: i64,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSummary {
    pub drawn: usize,
    pub cancelled: bool,
}

/// Lazily draws a scene onto a surface, one tile per step.
///
/// Iterating yields one `ChunkDrawn` per tile. The sequence ends after the
/// last tile, as soon as the cancel signal is observed, or after the first
/// error, and never restarts.
pub struct ChunkedRasterizer<'a, R: SurfaceRenderer + ?Sized> {
    scene: &'a Scene,
    renderer: &'a R,
    surface: &'a Mutex<Surface>,
    cancel: CancelSignal,
    chunk_size: u32,
    height: u32,
    tiles: TileGrid,
    started: bool,
    finished: bool,
    cancelled: bool,
    drawn: usize,
}

impl<'a, R: SurfaceRenderer + ?Sized> ChunkedRasterizer<'a, R> {
    pub fn new(
        scene: &'a Scene,
        renderer: &'a R,
        surface: &'a Mutex<Surface>,
        cancel: CancelSignal,
        chunk_size: u32,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::ConfigError("chunk size must be positive".to_string()));
        }
        let (width, height) = {
            let s = lock(surface)?;
            (s.width(), s.height())
        };
        Ok(Self {
            scene,
            renderer,
            surface,
            cancel,
            chunk_size,
            height,
            tiles: tile_origins(width, height, chunk_size),
            started: false,
            finished: false,
            cancelled: false,
            drawn: 0,
        })
    }

    /// Draw every remaining tile, yielding to the scheduler between tiles.
    pub async fn run(mut self) -> Result<RasterSummary> {
        while let Some(step) = self.next() {
            let chunk = step?;
            log::trace!("drew chunk {} at ({}, {})", chunk.index, chunk.x, chunk.y);
            tokio::task::yield_now().await;
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> RasterSummary {
        RasterSummary {
            drawn: self.drawn,
            cancelled: self.cancelled,
        }
    }

    fn stop(&mut self, cancelled: bool) {
        self.finished = true;
        self.cancelled = cancelled;
    }

    fn step(&mut self) -> Result<Option<ChunkDrawn>> {
        if self.cancel.is_cancelled() {
            self.stop(true);
            return Ok(None);
        }
        if !self.started {
            lock(self.surface)?.clear();
            self.started = true;
        }
        let Some(tile) = self.tiles.next() else {
            self.stop(false);
            return Ok(None);
        };

        let index = self.drawn;
        let offset = [
            self.scene.scene_offset[0] + f64::from(tile.x),
            self.scene.scene_offset[1] + f64::from(tile.y),
        ];
        let chunk = self
            .renderer
            .render_chunk(self.chunk_size, self.chunk_size, self.scene, offset)
            .map_err(|e| match e {
                Error::ChunkRenderFailure { .. } => e,
                other => Error::ChunkRenderFailure {
                    chunk: index,
                    reason: other.to_string(),
                },
            })?;

        let (x, y) = tile.target(self.height, self.chunk_size);
        {
            let mut surface = lock(self.surface)?;
            // the flag may have flipped while the chunk was being rendered
            if self.cancel.is_cancelled() {
                drop(surface);
                self.stop(true);
                return Ok(None);
            }
            surface.draw_image(&chunk, x, y);
        }
        self.drawn += 1;
        Ok(Some(ChunkDrawn {
            index,
            x,
            y,
            size: self.chunk_size,
        }))
    }
}

impl<R: SurfaceRenderer + ?Sized> Iterator for ChunkedRasterizer<'_, R> {
    type Item = Result<ChunkDrawn>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.stop(false);
                Some(Err(e))
            }
        }
    }
}

pub(crate) fn lock(surface: &Mutex<Surface>) -> Result<std::sync::MutexGuard<'_, Surface>> {
    surface
        .lock()
        .map_err(|_| Error::SurfaceUnavailable("surface lock poisoned".to_string()))
}
