//! Error types for scene generation and rendering

use thiserror::Error;

/// Result type alias for scene and render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while generating or rendering a scene
///
/// Supersession of a render is not an error: it is reported as
/// `RenderOutcome::Superseded`.
#[derive(Error, Debug)]
pub enum Error {
    /// A render was requested with an empty seed
    #[error("Seed is empty")]
    EmptySeed,

    /// The scene generator was given a seed it cannot use
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// Width or height is zero
    #[error("Invalid surface dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// No drawable surface is held by the calling context
    #[error("Surface unavailable: {0}")]
    SurfaceUnavailable(String),

    /// The surface was already handed to a background context
    #[error("Surface has already been transferred")]
    SurfaceTransferred,

    /// The background context is gone or stopped answering
    #[error("Offload context lost: {0}")]
    OffloadLost(String),

    /// The surface renderer failed on a chunk
    #[error("Rendering chunk {chunk} failed: {reason}")]
    ChunkRenderFailure { chunk: usize, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// No export format could be written
    #[error("Export failed: {0}")]
    ExportError(String),
}
