//! Rendering: surfaces, surface renderers and the chunked rasterizer

pub mod paint;
pub mod raster;
pub mod surface;

pub use paint::{StarfieldRenderer, SurfaceRenderer};
pub use raster::{tile_origins, CancelSignal, ChunkDrawn, ChunkedRasterizer, RasterSummary, Tile};
pub use surface::{DisplayLayout, ImageChunk, Surface, SurfaceSlot};

/// Edge length of a square render tile, in pixels.
pub const CHUNK_SIZE: u32 = 256;
