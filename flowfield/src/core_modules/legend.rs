// THEORY:
// The legend is the key to reading the vector field: a colour wheel drawn with the
// same stroke convention and the same colour mapper as the renderer, so a stroke
// in the field and a spoke of the wheel with the same colour point the same way.

use crate::core_modules::directional_color::directional_color;
use crate::core_modules::flow_renderer::draw_segment;
use image::{Rgba, RgbaImage};
use std::f64::consts::TAU;

/// Angular steps per radian; 100 gives a gap-free wheel at typical legend sizes.
const STEPS_PER_RADIAN: f64 = 100.0;

/// Renders a `size x size` colour wheel on a transparent background.
pub fn render_legend(size: u32) -> RgbaImage {
    let mut legend = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
    let centre = size as f64 / 2.0;
    let steps = (TAU * STEPS_PER_RADIAN).ceil() as u32;

    for i in 0..steps {
        let angle = i as f64 / STEPS_PER_RADIAN;
        let (sin, cos) = angle.sin_cos();
        let color = directional_color(cos, sin);
        let spoke_end = (centre - cos * centre, centre + sin * centre);
        draw_segment(&mut legend, (centre, centre), spoke_end, color);
    }

    legend
}
