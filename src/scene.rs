//! Seed-driven scene description.
//!
//! `generate` turns a seed and surface dimensions into a `Scene`. The random
//! stream is consumed in a fixed order (offset, scale, stars, background,
//! nebula); changing that order changes every scene for every seed.

use serde::Serialize;

use crate::rng::SeededRng;
use crate::{Error, Result};

/// Linear RGB triple, each channel in `[0, 1]`.
pub type Rgb = [f64; 3];

pub const MAX_STARS: usize = 64;
pub const NEBULA_NEAR: f64 = 0.0;
pub const NEBULA_FAR: f64 = 500.0;
const OFFSET_RANGE: i64 = 5_000_000;

/// Normalized black-body colors from 1000K to 12000K in 250K steps.
pub const BLACK_BODY_COLORS: [Rgb; 45] = [
    [1.0000, 0.2664, 0.0000], // 1000K
    [1.0000, 0.3534, 0.0000], // 1250K
    [1.0000, 0.4245, 0.0000], // 1500K
    [1.0000, 0.4847, 0.0000], // 1750K
    [1.0000, 0.5367, 0.0545], // 2000K
    [1.0000, 0.5827, 0.1757], // 2250K
    [1.0000, 0.6238, 0.2748], // 2500K
    [1.0000, 0.6610, 0.3585], // 2750K
    [1.0000, 0.6949, 0.4310], // 3000K
    [1.0000, 0.7261, 0.4950], // 3250K
    [1.0000, 0.7550, 0.5523], // 3500K
    [1.0000, 0.7819, 0.6040], // 3750K
    [1.0000, 0.8071, 0.6513], // 4000K
    [1.0000, 0.8308, 0.6948], // 4250K
    [1.0000, 0.8531, 0.7350], // 4500K
    [1.0000, 0.8742, 0.7725], // 4750K
    [1.0000, 0.8942, 0.8076], // 5000K
    [1.0000, 0.9132, 0.8405], // 5250K
    [1.0000, 0.9313, 0.8716], // 5500K
    [1.0000, 0.9487, 0.9009], // 5750K
    [1.0000, 0.9653, 0.9288], // 6000K
    [1.0000, 0.9812, 0.9553], // 6250K
    [1.0000, 0.9965, 0.9806], // 6500K
    [0.9886, 0.9704, 1.0000], // 6750K
    [0.9514, 0.9496, 1.0000], // 7000K
    [0.9236, 0.9337, 1.0000], // 7250K
    [0.9014, 0.9209, 1.0000], // 7500K
    [0.8831, 0.9103, 1.0000], // 7750K
    [0.8675, 0.9011, 1.0000], // 8000K
    [0.8540, 0.8932, 1.0000], // 8250K
    [0.8421, 0.8861, 1.0000], // 8500K
    [0.8315, 0.8797, 1.0000], // 8750K
    [0.8219, 0.8740, 1.0000], // 9000K
    [0.8132, 0.8687, 1.0000], // 9250K
    [0.8052, 0.8638, 1.0000], // 9500K
    [0.7978, 0.8594, 1.0000], // 9750K
    [0.7910, 0.8552, 1.0000], // 10000K
    [0.7846, 0.8513, 1.0000], // 10250K
    [0.7787, 0.8476, 1.0000], // 10500K
    [0.7731, 0.8442, 1.0000], // 10750K
    [0.7678, 0.8409, 1.0000], // 11000K
    [0.7629, 0.8378, 1.0000], // 11250K
    [0.7581, 0.8349, 1.0000], // 11500K
    [0.7537, 0.8321, 1.0000], // 11750K
    [0.7494, 0.8294, 1.0000], // 12000K
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Star {
    /// World-space `(x, y, depth)`
    pub position: [f64; 3],
    pub color: Rgb,
    pub falloff: f64,
    pub diffraction_spike_falloff: f64,
    pub diffraction_spike_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Nebula {
    pub lacunarity: f64,
    pub gain: f64,
    pub absorption: f64,
    pub falloff: f64,
    pub near: f64,
    pub far: f64,
    pub layers: u32,
    pub density: f64,
    pub albedo_low: Rgb,
    pub albedo_high: Rgb,
    pub albedo_scale: f64,
}

/// Fully specified, reproducible description of one space scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub background_color: Rgb,
    pub stars: Vec<Star>,
    pub nebula: Nebula,
    /// World-space position of the surface's bottom-left corner
    pub scene_offset: [f64; 2],
    pub scale: f64,
}

/// Generate the scene for `seed` on a `width` x `height` surface.
pub fn generate(seed: &str, width: u32, height: u32) -> Result<Scene> {
    if seed.is_empty() {
        return Err(Error::InvalidSeed("seed is empty".to_string()));
    }
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimensions { width, height });
    }
    Ok(SceneBuilder::new(seed, width, height).build())
}

/// Threads one owned random stream through the generation steps.
///
/// Each builder owns its stream, so concurrent generations never share state.
pub struct SceneBuilder {
    rng: SeededRng,
    width: f64,
    height: f64,
}

impl SceneBuilder {
    pub fn new(seed: &str, width: u32, height: u32) -> Self {
        Self {
            rng: SeededRng::new(seed),
            width: f64::from(width),
            height: f64::from(height),
        }
    }

    /// Run every step in order and produce the scene.
    pub fn build(mut self) -> Scene {
        let scene_offset = self.scene_offset();
        let layers = nebula_layers();
        let scale = self.rng.uniform(0.001, 0.002);
        let stars = self.stars(scene_offset, scale);
        let background_color = self.random_intensity_color();
        let nebula = self.nebula(layers);

        Scene {
            background_color,
            stars,
            nebula,
            scene_offset,
            scale,
        }
    }

    fn scene_offset(&mut self) -> [f64; 2] {
        let x = self.rng.rand_range_between(-OFFSET_RANGE, OFFSET_RANGE) as f64 - self.width / 2.0;
        let y = self.rng.rand_range_between(-OFFSET_RANGE, OFFSET_RANGE) as f64 - self.height / 2.0;
        [x, y]
    }

    /// A black-body color scaled by a random intensity.
    fn random_intensity_color(&mut self) -> Rgb {
        let intensity = self.rng.random();
        let base = self
            .rng
            .choice(&BLACK_BODY_COLORS)
            .copied()
            .unwrap_or_default();
        base.map(|c| c * intensity)
    }

    fn stars(&mut self, offset: [f64; 2], scale: f64) -> Vec<Star> {
        let count = star_count(self.rng.rand_range(self.width * self.height * scale * scale));
        (0..count).map(|_| self.star(offset)).collect()
    }

    fn star(&mut self, offset: [f64; 2]) -> Star {
        let color = self.random_intensity_color();
        let x = offset[0] + self.rng.rand_range(self.width) as f64;
        let y = offset[1] + self.rng.rand_range(self.height) as f64;
        let depth = self.rng.uniform(NEBULA_NEAR, NEBULA_FAR);
        Star {
            position: [x, y, depth],
            color,
            falloff: 256.0,
            diffraction_spike_falloff: 1024.0,
            diffraction_spike_scale: self.rng.uniform(4.0, 8.0),
        }
    }

    fn nebula(&mut self, layers: u32) -> Nebula {
        let lacunarity = self.rng.uniform(1.8, 2.0);
        let falloff = self.rng.uniform(256.0, 1280.0);
        let density = self.rng.uniform(50.0, 150.0) / f64::from(layers);
        let albedo_low = [self.rng.random(), self.rng.random(), self.rng.random()];
        let albedo_high = [self.rng.random(), self.rng.random(), self.rng.random()];
        let albedo_scale = self.rng.uniform(0.0, 8.0);

        Nebula {
            lacunarity,
            gain: 0.5,
            absorption: 1.0,
            falloff,
            near: NEBULA_NEAR,
            far: NEBULA_FAR,
            layers,
            density,
            albedo_low,
            albedo_high,
            albedo_scale,
        }
    }
}

fn nebula_layers() -> u32 {
    (2.0 * (NEBULA_FAR - NEBULA_NEAR)) as u32
}

fn star_count(drawn: i64) -> usize {
    drawn.clamp(0, MAX_STARS as i64) as usize
}
