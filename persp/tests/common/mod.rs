#![allow(dead_code)]
use persp::{Color, Surface};

pub fn try_init_logger_for_default_harness() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn assert_color_near(actual: Color, expected: Color, tolerance: f32) {
    let d = [
        actual.r - expected.r,
        actual.g - expected.g,
        actual.b - expected.b,
        actual.a - expected.a,
    ];
    assert!(
        d.iter().all(|x| x.abs() <= tolerance),
        "{:?} is not close to {:?}",
        actual,
        expected
    );
}

pub fn max_alpha(surface: &Surface) -> f32 {
    surface.data().iter().map(|c| c.a).fold(0.0, f32::max)
}
