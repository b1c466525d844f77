//! Writing finished surfaces to image files

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::Deserialize;

use crate::rendering::Surface;
use crate::{Error, Result};

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Png,
    /// Binary PPM; transparency is dropped
    Pnm,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Pnm => "ppm",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Ok(ExportFormat::Png),
            "pnm" | "ppm" => Ok(ExportFormat::Pnm),
            other => Err(Error::ConfigError(format!("unknown export format {:?}", other))),
        }
    }

    fn write(&self, image: &RgbaImage, path: &Path) -> image::ImageResult<()> {
        match self {
            ExportFormat::Png => image.save_with_format(path, ImageFormat::Png),
            ExportFormat::Pnm => DynamicImage::ImageRgba8(image.clone())
                .to_rgb8()
                .save_with_format(path, ImageFormat::Pnm),
        }
    }
}

/// Save `surface` as `<stem>.<ext>`, trying `formats` in order until one
/// succeeds. Returns the path written.
pub fn save_surface(surface: &Surface, stem: impl AsRef<Path>, formats: &[ExportFormat]) -> Result<PathBuf> {
    let stem = stem.as_ref();
    let image = RgbaImage::from_raw(surface.width(), surface.height(), surface.pixels().to_vec())
        .ok_or_else(|| Error::ExportError("surface buffer does not match its dimensions".to_string()))?;

    for format in formats {
        let path = with_extension(stem, format.extension());
        match format.write(&image, &path) {
            Ok(()) => {
                log::info!("saved {}", path.display());
                return Ok(path);
            }
            Err(e) => log::warn!("failed to save {} as {:?}: {}", path.display(), format, e),
        }
    }
    Err(Error::ExportError(format!(
        "no export format succeeded for {}",
        stem.display()
    )))
}

fn with_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
