use proptest::prelude::*;
use space_scene::scene::{self, MAX_STARS};
use space_scene::Error;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generation_is_deterministic(seed in "[a-zA-Z0-9]{1,22}", w in 1u32..4096, h in 1u32..4096) {
        let a = scene::generate(&seed, w, h).unwrap();
        let b = scene::generate(&seed, w, h).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn star_count_is_bounded(seed in ".{1,24}", w in 1u32..40_000, h in 1u32..40_000) {
        let scene = scene::generate(&seed, w, h).unwrap();
        prop_assert!(scene.stars.len() <= MAX_STARS);
        prop_assert!((0.001..0.002).contains(&scene.scale));
    }
}

#[test]
fn abc123_scene_is_pinned() {
    let scene = scene::generate("abc123", 512, 512).unwrap();
    assert!(scene.stars.is_empty());
    assert_eq!(
        scene.background_color,
        [0.7198385179211472, 0.5809816678141579, 0.4688308267220431]
    );
    assert_eq!(scene.scene_offset, [-3397079.0, 2459970.0]);
    assert_eq!(scene.scale, 0.0012209319676028136);
    assert_eq!(scene.nebula.lacunarity, 1.861046053532713);
    assert_eq!(scene.nebula.albedo_scale, 3.586832223082266);
    assert_eq!(scene, scene::generate("abc123", 512, 512).unwrap());
}

#[test]
fn dimensions_change_the_scene() {
    let small = scene::generate("abc123", 512, 512).unwrap();
    let wide = scene::generate("abc123", 1024, 512).unwrap();
    // same random draws, different centering
    assert_eq!(small.scene_offset[0] - 256.0, wide.scene_offset[0]);
    assert_eq!(small.scene_offset[1], wide.scene_offset[1]);
}

#[test]
fn empty_seed_is_invalid() {
    assert!(matches!(scene::generate("", 512, 512), Err(Error::InvalidSeed(_))));
}
