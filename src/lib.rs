//! Space Scene
//!
//! Procedurally generates a 2D space scene (background stars and a nebula)
//! from a textual seed and rasterizes it onto a pixel surface.
//!
//! # Features
//!
//! - **Deterministic scenes**: the same seed and dimensions always give the
//!   same `Scene` and the same pixels, whichever context renders them
//! - **Chunked rendering**: surfaces are drawn in 256x256 tiles with a
//!   cooperative cancellation check between tiles
//! - **Single-flight**: a new render supersedes the one in flight
//! - **Offload**: rendering can run on a background context that receives
//!   exclusive ownership of the surface, with a synchronous in-process
//!   fallback
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use space_scene::{Executor, RenderConfig, RenderRequest, StarfieldRenderer, Surface};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RenderConfig::default();
//! let surface = Surface::new(1024, 768)?;
//! let executor = Executor::probe(surface, Arc::new(StarfieldRenderer::new()), &config).await;
//! executor.render(&RenderRequest::new("abc123", 1024, 768)).await?;
//! let image = executor.snapshot().await?;
//! println!("digest: {}", image.digest());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod coordinator;
pub mod executor;
pub mod export;
pub mod offload;
pub mod rendering;
pub mod rng;
pub mod scene;

pub use coordinator::{RenderCoordinator, RenderOutcome, RenderSession, SessionState};
pub use executor::{Executor, ExecutorKind, InProcessExecutor, OffloadExecutor};
pub use export::ExportFormat;
pub use offload::OffloadChannel;
pub use rendering::{DisplayLayout, StarfieldRenderer, Surface, SurfaceRenderer};
pub use scene::Scene;

/// Configuration for rendering and offloading
///
/// Defaults are conservative: 256px tiles, offload preferred, a 30 second
/// bound on every reply awaited from the background context.
///
/// # Examples
///
/// ```
/// let cfg = space_scene::RenderConfig::default();
/// assert_eq!(cfg.chunk_size, 256);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Tile edge length in pixels
    pub chunk_size: u32,
    /// Display area the surface is scaled into
    pub viewport: Viewport,
    /// Prefer a background context when one can be started
    pub offload: bool,
    /// Upper bound on awaiting a reply from the background context
    pub offload_timeout_ms: u64,
    /// Export formats in decreasing order of preference
    pub export_formats: Vec<ExportFormat>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: rendering::CHUNK_SIZE,
            viewport: Viewport::default(),
            offload: true,
            offload_timeout_ms: 30000,
            export_formats: vec![ExportFormat::Png, ExportFormat::Pnm],
        }
    }
}

impl RenderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::ConfigError("chunk_size must be positive".to_string()));
        }
        if self.offload_timeout_ms == 0 {
            return Err(Error::ConfigError(
                "offload_timeout_ms must be positive".to_string(),
            ));
        }
        if self.export_formats.is_empty() {
            return Err(Error::ConfigError(
                "export_formats must name at least one format".to_string(),
            ));
        }
        Ok(())
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// The externally supplied render parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub seed: String,
    pub width: u32,
    pub height: u32,
}

impl RenderRequest {
    pub fn new(seed: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            seed: seed.into(),
            width,
            height,
        }
    }

    /// Fails with `EmptySeed` or `InvalidDimensions`.
    pub fn validate(&self) -> Result<()> {
        if self.seed.is_empty() {
            return Err(Error::EmptySeed);
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RenderConfig::default();
        assert_eq!(config.viewport.width, 1280);
        assert_eq!(config.viewport.height, 720);
        assert!(config.offload);
        assert_eq!(config.export_formats, vec![ExportFormat::Png, ExportFormat::Pnm]);
    }

    #[test]
    fn test_config_from_partial_json() {
        let config = RenderConfig::from_json_str(
            r#"{ "chunk_size": 64, "offload": false, "viewport": { "width": 800, "height": 600 } }"#,
        )
        .unwrap();
        assert_eq!(config.chunk_size, 64);
        assert!(!config.offload);
        assert_eq!(config.viewport, Viewport { width: 800, height: 600 });
        assert_eq!(config.offload_timeout_ms, 30000);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            RenderConfig::from_json_str(r#"{ "chunk_size": 0 }"#),
            Err(Error::ConfigError(_))
        ));
        assert!(matches!(
            RenderConfig::from_json_str("not json"),
            Err(Error::ConfigError(_))
        ));
        assert!(RenderConfig::from_json_file("/nonexistent/space-scene.json").is_err());
    }

    #[test]
    fn test_request_validation() {
        assert!(RenderRequest::new("s", 1, 1).validate().is_ok());
        assert!(matches!(
            RenderRequest::new("", 1, 1).validate(),
            Err(Error::EmptySeed)
        ));
        assert!(matches!(
            RenderRequest::new("s", 0, 1).validate(),
            Err(Error::InvalidDimensions { .. })
        ));
    }
}
