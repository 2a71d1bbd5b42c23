use crate::light::{limit, Light};

/// Pi strand: 8 bit alpha, 4 bits per color channel.
// TODO Correct for gamma here once it is clear how it interacts with the
// brightness scale.
pub fn strand_bytes(light: &Light, scale: f64) -> [u8; 4] {
    [
        (scale * limit(light.a) * 255.0).round() as u8,
        (limit(light.r) * 15.0).round() as u8,
        (limit(light.g) * 15.0).round() as u8,
        (limit(light.b) * 15.0).round() as u8,
    ]
}

/// WS2812: 8 bits per color channel, alpha baked into the color. The
/// leading zero keeps every light on a 32 bit boundary for clients.
pub fn ws2812_bytes(light: &Light) -> [u8; 4] {
    let alpha = limit(light.a);
    [
        0,
        (limit(light.r * alpha) * 255.0).round() as u8,
        (limit(light.g * alpha) * 255.0).round() as u8,
        (limit(light.b * alpha) * 255.0).round() as u8,
    ]
}

/// Physical wiring runs opposite to the logical index, so the last light
/// goes out first.
pub fn encode_legacy(lights: &[Light], scale: f64) -> Vec<u8> {
    lights
        .iter()
        .rev()
        .flat_map(|light| strand_bytes(light, scale))
        .collect()
}

pub fn encode_ws2812(lights: &[Light]) -> Vec<u8> {
    lights.iter().rev().flat_map(ws2812_bytes).collect()
}
