use std::borrow::Cow;
use std::time::Duration;

use palette::{Clamp, LinSrgb, Mix};

use crate::light::{limit, Frame, Light};

/// Mean energy the strand may draw. Empirically determined by a red/white
/// alternation test on the hardware.
pub const MAX_ENERGY: f64 = 0.55;

/// Cross-fades run linearly over this window.
pub const FADE_SECONDS: f64 = 2.0;

/// Alpha scale factor that keeps the total energy of the strand below
/// [`MAX_ENERGY`].
pub fn brightness_scale(lights: &[Light]) -> f64 {
    if lights.is_empty() {
        return 1.0;
    }

    let energy = lights.iter().map(Light::energy).sum::<f64>() / lights.len() as f64;
    if energy > MAX_ENERGY {
        MAX_ENERGY / energy
    } else {
        1.0
    }
}

pub fn fade_factor(elapsed: Duration) -> f64 {
    limit(elapsed.as_secs_f64() / FADE_SECONDS)
}

/// Blends color from `from` towards `to`. Alpha is taken from `to` as is.
pub fn blend(from: &[Light], to: &[Light], factor: f64) -> Frame {
    let f = limit(factor);
    from.iter()
        .zip(to)
        .map(|(a, b)| {
            let mixed = LinSrgb::<f64>::from(*a).mix(LinSrgb::<f64>::from(*b), f).clamp();
            Light::new(mixed.red, mixed.green, mixed.blue, b.a)
        })
        .collect()
}

pub fn fade<'a>(
    previous: Option<&[Light]>,
    current: &'a [Light],
    elapsed_seconds: f64,
    enabled: bool,
) -> Cow<'a, [Light]> {
    match previous {
        Some(previous) if enabled => {
            Cow::Owned(blend(previous, current, elapsed_seconds / FADE_SECONDS))
        }
        _ => Cow::Borrowed(current),
    }
}

/// Holds the frame a cross-fade starts from. The baseline is the last
/// frame that went out at full fade factor, so a new run fades in from
/// whatever the previous run ended on.
#[derive(Default)]
pub struct FrameProcessor {
    baseline: Option<Frame>,
}

impl FrameProcessor {
    pub fn new() -> FrameProcessor {
        FrameProcessor { baseline: None }
    }

    pub fn mix<'a>(&mut self, lights: &'a [Light], factor: f64) -> Cow<'a, [Light]> {
        match &self.baseline {
            Some(baseline) if factor < 1.0 => Cow::Owned(blend(baseline, lights, factor)),
            _ => {
                self.baseline = Some(lights.to_vec());
                Cow::Borrowed(lights)
            }
        }
    }

    pub fn baseline(&self) -> Option<&[Light]> {
        self.baseline.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::{blank_frame, LIGHT_COUNT};

    fn nearly_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn uniform(light: Light) -> Frame {
        vec![light; LIGHT_COUNT]
    }

    #[test]
    fn dim_frames_are_not_scaled() {
        assert_eq!(brightness_scale(&blank_frame()), 1.0);
        assert_eq!(brightness_scale(&uniform(Light::new(0.55, 0.55, 0.55, 1.0))), 1.0);
        assert_eq!(brightness_scale(&uniform(Light::new(1.0, 1.0, 1.0, 0.5))), 1.0);
    }

    #[test]
    fn full_white_is_capped() {
        let scale = brightness_scale(&uniform(Light::new(1.0, 1.0, 1.0, 1.0)));
        assert!(nearly_equal(scale, 0.55));
    }

    #[test]
    fn fade_factor_saturates() {
        assert_eq!(fade_factor(Duration::ZERO), 0.0);
        assert!(nearly_equal(fade_factor(Duration::from_millis(500)), 0.25));
        assert_eq!(fade_factor(Duration::from_secs(5)), 1.0);
    }

    #[test]
    fn fade_endpoints() {
        let prev = uniform(Light::new(1.0, 0.0, 0.2, 1.0));
        let cur = uniform(Light::new(0.0, 1.0, 0.6, 0.5));

        let start = fade(Some(&prev[..]), &cur, 0.0, true);
        for (out, p) in start.iter().zip(&prev) {
            assert!(nearly_equal(out.r, p.r));
            assert!(nearly_equal(out.g, p.g));
            assert!(nearly_equal(out.b, p.b));
        }

        let end = fade(Some(&prev[..]), &cur, 2.5, true);
        for (out, c) in end.iter().zip(&cur) {
            assert!(nearly_equal(out.r, c.r));
            assert!(nearly_equal(out.g, c.g));
            assert!(nearly_equal(out.b, c.b));
        }
    }

    #[test]
    fn disabled_fade_passes_current_through() {
        let prev = uniform(Light::new(1.0, 0.0, 0.0, 1.0));
        let cur = uniform(Light::new(0.0, 0.0, 1.0, 1.0));

        assert!(matches!(fade(Some(&prev[..]), &cur, 1.0, false), Cow::Borrowed(_)));
        assert_eq!(&*fade(Some(&prev[..]), &cur, 1.0, false), &cur[..]);
        assert_eq!(&*fade(None, &cur, 1.0, true), &cur[..]);
    }

    #[test]
    fn blend_keeps_current_alpha_and_clamps() {
        let prev = vec![Light::new(3.0, -2.0, 0.0, 0.1)];
        let cur = vec![Light::new(3.0, -2.0, 1.0, 0.9)];

        let out = blend(&prev, &cur, 0.5);
        assert_eq!(out[0].r, 1.0);
        assert_eq!(out[0].g, 0.0);
        assert!(nearly_equal(out[0].b, 0.5));
        assert_eq!(out[0].a, 0.9);
    }

    #[test]
    fn baseline_only_moves_at_full_factor() {
        let red = uniform(Light::new(1.0, 0.0, 0.0, 1.0));
        let blue = uniform(Light::new(0.0, 0.0, 1.0, 1.0));
        let mut processor = FrameProcessor::new();

        // Without a baseline the first frame passes and becomes it.
        assert_eq!(&*processor.mix(&red, 0.0), &red[..]);
        assert_eq!(processor.baseline(), Some(&red[..]));

        let halfway = processor.mix(&blue, 0.5).into_owned();
        assert!(nearly_equal(halfway[0].r, 0.5));
        assert!(nearly_equal(halfway[0].b, 0.5));
        assert_eq!(processor.baseline(), Some(&red[..]));

        assert_eq!(&*processor.mix(&blue, 1.0), &blue[..]);
        assert_eq!(processor.baseline(), Some(&blue[..]));
    }
}
