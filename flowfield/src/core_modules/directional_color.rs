// THEORY:
// Direction is the most readable property of a flow field, so it is encoded as
// hue: the angle of (u, v) picks a spot on the colour wheel at full saturation and
// full value. Because only the angle matters, scaling a vector never changes its
// colour. Magnitude is carried by stroke length instead.

use image::Rgba;
use std::f64::consts::PI;

/// Stroke colour used for every vector in monochrome mode and for histogram bars (#FF6347).
pub const MONOCHROME: Rgba<u8> = Rgba([0xFF, 0x63, 0x47, 0xFF]);

/// Hue in degrees, in `[0, 360)`, of the vector (u, v).
pub fn hue_of(u: f64, v: f64) -> f64 {
    let to_degree = 180.0 / PI;
    (v.atan2(u) * to_degree + 360.0) % 360.0
}

/// Standard HSV to RGB conversion with channel values rounded to the nearest byte.
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgba<u8> {
    if saturation <= 0.0 {
        let d = to_channel(value);
        return Rgba([d, d, d, u8::MAX]);
    }

    let mut h = hue / 360.0;
    if h >= 1.0 {
        h = 0.0;
    }
    let h = 6.0 * h;
    let sector = h.floor();
    let f = h - sector;

    let a = to_channel(value * (1.0 - saturation));
    let b = to_channel(value * (1.0 - saturation * f));
    let c = to_channel(value * (1.0 - saturation * (1.0 - f)));
    let d = to_channel(value);

    match sector as i64 {
        0 => Rgba([d, c, a, u8::MAX]),
        1 => Rgba([b, d, a, u8::MAX]),
        2 => Rgba([a, d, c, u8::MAX]),
        3 => Rgba([a, b, d, u8::MAX]),
        4 => Rgba([c, a, d, u8::MAX]),
        5 => Rgba([d, a, b, u8::MAX]),
        // Negative or NaN hue: nothing sensible to draw.
        _ => Rgba([0, 0, u8::MAX, 0]),
    }
}

/// Colour of a flow vector, picked by its direction alone.
pub fn directional_color(u: f64, v: f64) -> Rgba<u8> {
    hsv_to_rgb(hue_of(u, v), 1.0, 1.0)
}

fn to_channel(fraction: f64) -> u8 {
    (255.0 * fraction).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinal_directions_map_to_primary_hues() {
        assert_eq!(directional_color(1.0, 0.0), Rgba([255, 0, 0, 255]));
        assert_eq!(directional_color(-1.0, 0.0), Rgba([0, 255, 255, 255]));

        // 90 and 270 degrees sit on a half-step; the red channel lands on 127 or 128.
        let down = directional_color(0.0, 1.0);
        assert_eq!((down.0[1], down.0[2]), (255, 0));
        assert!((127..=128).contains(&down.0[0]));
        let up = directional_color(0.0, -1.0);
        assert_eq!((up.0[1], up.0[2]), (0, 255));
        assert!((127..=128).contains(&up.0[0]));
    }

    #[test]
    fn hue_wraps_into_zero_to_360() {
        assert_eq!(hue_of(1.0, 0.0), 0.0);
        assert!((hue_of(0.0, -1.0) - 270.0).abs() < 1e-9);
        assert!((hue_of(-1.0, -1.0) - 225.0).abs() < 1e-9);
        assert!((0.0..360.0).contains(&hue_of(1.0, -1e-12)));
    }

    #[test]
    fn colour_depends_on_angle_only() {
        let vectors = [(1.0, 2.0), (-3.5, 0.25), (0.1, -7.0), (-2.0, -2.0), (42.0, 13.0)];
        for &(u, v) in &vectors {
            for &lambda in &[0.5, 2.0, 8.0, 1024.0] {
                assert_eq!(directional_color(u, v), directional_color(lambda * u, lambda * v));
            }
            assert!((hue_of(u, v) - hue_of(3.7 * u, 3.7 * v)).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_vector_is_red() {
        assert_eq!(directional_color(0.0, 0.0), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn desaturated_colours_are_gray() {
        assert_eq!(hsv_to_rgb(200.0, 0.0, 0.5), Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn every_colour_is_opaque() {
        for degree in 0..360 {
            let radians = (degree as f64).to_radians();
            assert_eq!(directional_color(radians.cos(), radians.sin()).0[3], 255);
        }
    }
}
