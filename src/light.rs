/// Number of addressable positions on the strand.
pub const LIGHT_COUNT: usize = 100;

/// Color and alpha of one position. Producers are not trusted to keep the
/// channels inside [0, 1], so every consumer goes through [`limit`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Light {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

pub type Frame = Vec<Light>;

pub fn limit(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

impl Light {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Light {
        Light { r, g, b, a }
    }

    /// Per-light energy as used for the strand power budget.
    pub fn energy(&self) -> f64 {
        (self.r + self.g + self.b) * self.a / 3.0
    }
}

impl From<Light> for palette::LinSrgb<f64> {
    fn from(light: Light) -> Self {
        Self::new(light.r, light.g, light.b)
    }
}

pub fn blank_frame() -> Frame {
    vec![Light::default(); LIGHT_COUNT]
}

/// Builds a full-length frame from whatever the script left behind. Slots
/// that are missing or did not hold a light become the default light.
pub fn sanitize<I>(slots: I) -> Frame
where
    I: IntoIterator<Item = Option<Light>>,
{
    let mut frame: Frame = slots
        .into_iter()
        .take(LIGHT_COUNT)
        .map(Option::unwrap_or_default)
        .collect();
    frame.resize(LIGHT_COUNT, Light::default());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_clamps_both_ends() {
        assert_eq!(limit(-0.5), 0.0);
        assert_eq!(limit(0.25), 0.25);
        assert_eq!(limit(7.0), 1.0);
    }

    #[test]
    fn sanitize_replaces_foreign_slots() {
        let red = Light::new(1.0, 0.0, 0.0, 1.0);
        let frame = sanitize(vec![Some(red), None, Some(red)]);

        assert_eq!(frame.len(), LIGHT_COUNT);
        assert_eq!(frame[0], red);
        assert_eq!(frame[1], Light::default());
        assert_eq!(frame[2], red);
        assert!(frame[3..].iter().all(|l| *l == Light::default()));
    }

    #[test]
    fn sanitize_truncates_long_input() {
        let frame = sanitize(std::iter::repeat(Some(Light::new(0.0, 1.0, 0.0, 1.0))).take(250));
        assert_eq!(frame.len(), LIGHT_COUNT);
    }

    #[test]
    fn white_has_unit_energy() {
        assert_eq!(Light::new(1.0, 1.0, 1.0, 1.0).energy(), 1.0);
        assert_eq!(Light::new(1.0, 1.0, 1.0, 0.0).energy(), 0.0);
    }
}
