/// Surface renderers: turn one rectangle of a scene into pixels

use crate::rendering::ImageChunk;
use crate::scene::{Rgb, Scene};
use crate::Result;

const NEBULA_OCTAVES: u32 = 5;
/// Stars further than this many pixels from a pixel are not evaluated for it
const STAR_REACH: f64 = 64.0;

/// Rasterizes one chunk of a scene.
///
/// `offset` is the world-space position of the chunk's bottom-left corner.
/// World y grows upward, so row 0 of the returned chunk is its top edge.
/// Implementations must be pure: the same inputs give the same pixels.
pub trait SurfaceRenderer: Send + Sync {
    fn render_chunk(
        &self,
        width: u32,
        height: u32,
        scene: &Scene,
        offset: [f64; 2],
    ) -> Result<ImageChunk>;
}

/// Reference renderer: background tint, value-noise nebula and star glow.
#[derive(Debug, Clone, Copy, Default)]
pub struct StarfieldRenderer;

impl StarfieldRenderer {
    pub fn new() -> Self {
        StarfieldRenderer
    }

    fn shade(&self, scene: &Scene, wx: f64, wy: f64) -> Rgb {
        let mut color = scene.background_color;

        let nebula = &scene.nebula;
        let t = fbm(wx / nebula.falloff, wy / nebula.falloff, nebula.lacunarity, nebula.gain);
        let thickness = t * t * nebula.density * f64::from(nebula.layers) * 0.01;
        let transmit = (-nebula.absorption * thickness).exp();
        for c in 0..3 {
            let albedo = lerp(nebula.albedo_low[c], nebula.albedo_high[c], t);
            color[c] = color[c] * transmit + albedo * (1.0 - transmit) * nebula.albedo_scale * 0.25;
        }

        for star in &scene.stars {
            let dx = wx - star.position[0];
            let dy = wy - star.position[1];
            if dx.abs() > STAR_REACH || dy.abs() > STAR_REACH {
                continue;
            }
            let radius = star.falloff / 128.0;
            let glow = (-(dx * dx + dy * dy) / (2.0 * radius * radius)).exp();
            let reach = star.diffraction_spike_falloff / 512.0;
            let spikes = ((-dx.abs() / reach).exp() * (-dy * dy * 2.0).exp()
                + (-dy.abs() / reach).exp() * (-dx * dx * 2.0).exp())
                * star.diffraction_spike_scale
                / 16.0;
            let depth = 1.0 - 0.5 * star.position[2] / nebula.far.max(1.0);
            for c in 0..3 {
                color[c] += star.color[c] * (glow + spikes) * depth;
            }
        }

        color
    }
}

impl SurfaceRenderer for StarfieldRenderer {
    fn render_chunk(
        &self,
        width: u32,
        height: u32,
        scene: &Scene,
        offset: [f64; 2],
    ) -> Result<ImageChunk> {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for row in 0..height {
            let wy = offset[1] + f64::from(height - 1 - row);
            for col in 0..width {
                let wx = offset[0] + f64::from(col);
                let [r, g, b] = self.shade(scene, wx, wy);
                pixels.extend_from_slice(&[tone_map(r), tone_map(g), tone_map(b), 255]);
            }
        }
        ImageChunk::new(width, height, pixels)
    }
}

fn tone_map(v: f64) -> u8 {
    ((1.0 - (-v.max(0.0)).exp()) * 255.0).round() as u8
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

/// Hash a lattice point to `[0, 1)`.
fn lattice(ix: i64, iy: i64, octave: u32) -> f64 {
    let mut z = (ix as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (iy as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ u64::from(octave).wrapping_mul(0x1656_67B1_9E37_79F9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

fn value_noise(x: f64, y: f64, octave: u32) -> f64 {
    let (fx, fy) = (x.floor(), y.floor());
    let (ix, iy) = (fx as i64, fy as i64);
    let (tx, ty) = (smoothstep(x - fx), smoothstep(y - fy));
    let top = lerp(lattice(ix, iy, octave), lattice(ix + 1, iy, octave), tx);
    let bottom = lerp(lattice(ix, iy + 1, octave), lattice(ix + 1, iy + 1, octave), tx);
    lerp(top, bottom, ty)
}

/// Fractal sum of value noise, normalized to `[0, 1)`.
fn fbm(x: f64, y: f64, lacunarity: f64, gain: f64) -> f64 {
    let (mut sum, mut norm, mut amp, mut freq) = (0.0, 0.0, 1.0, 1.0);
    for octave in 0..NEBULA_OCTAVES {
        sum += amp * value_noise(x * freq, y * freq, octave);
        norm += amp;
        amp *= gain;
        freq *= lacunarity;
    }
    sum / norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{self, Star};

    #[test]
    fn chunk_has_requested_size_and_is_opaque() {
        let scene = scene::generate("paint", 64, 64).unwrap();
        let chunk = StarfieldRenderer::new()
            .render_chunk(16, 8, &scene, scene.scene_offset)
            .unwrap();
        assert_eq!((chunk.width(), chunk.height()), (16, 8));
        assert!(chunk.pixels().chunks(4).all(|p| p[3] == 255));
    }

    #[test]
    fn rendering_is_pure() {
        let scene = scene::generate("pure", 64, 64).unwrap();
        let r = StarfieldRenderer::new();
        let a = r.render_chunk(8, 8, &scene, [10.0, 20.0]).unwrap();
        let b = r.render_chunk(8, 8, &scene, [10.0, 20.0]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn star_brightens_its_pixel() {
        let mut scene = scene::generate("star", 64, 64).unwrap();
        scene.stars.clear();
        let r = StarfieldRenderer::new();
        let dark = r.render_chunk(1, 1, &scene, [5.0, 5.0]).unwrap();
        scene.stars.push(Star {
            position: [5.0, 5.0, 0.0],
            color: [1.0, 1.0, 1.0],
            falloff: 256.0,
            diffraction_spike_falloff: 1024.0,
            diffraction_spike_scale: 6.0,
        });
        let lit = r.render_chunk(1, 1, &scene, [5.0, 5.0]).unwrap();
        assert!(lit.pixels()[0] > dark.pixels()[0]);
    }

    #[test]
    fn noise_stays_in_unit_range() {
        for i in 0..200 {
            let v = fbm(i as f64 * 0.37 - 1e6, i as f64 * -1.3 + 4e6, 1.9, 0.5);
            assert!((0.0..1.0).contains(&v));
        }
    }
}
