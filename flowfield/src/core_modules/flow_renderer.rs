// THEORY:
// The `FlowRenderer` owns the output canvas and turns a tick's flow vectors into
// pixels. It is the last stage of the pipeline and the only one that mutates
// state visible to the display.
//
// Per tick it:
// 1.  Lays down a backdrop: either the previous canvas (trails) or the current
//     video frame.
// 2.  Fades the whole canvas toward black with alpha `transparency`. At 1.0 the
//     canvas is cleared, below that old strokes linger as motion trails.
// 3.  Draws a stroke from (x, y) to (x - u, y + v) for every vector whose magnitude
//     lies strictly between `min_flow` and `max_flow`, coloured by direction or in
//     the monochrome accent.
// 4.  Bins every vector's magnitude into a fresh `Histogram` and draws the growing
//     bar for the touched column from the bottom edge.
//
// Strokes are clipped to the canvas before rasterising, so a wild vector costs no
// more than one that crosses the frame.

use crate::core_modules::directional_color::{MONOCHROME, directional_color};
use crate::core_modules::flow_estimator::FlowVector;
use crate::core_modules::frame::FrameBuffer;
use crate::core_modules::histogram::Histogram;
use crate::pipeline::{Backdrop, FlowConfig};
use image::{Rgba, RgbaImage};

const CLEAR: Rgba<u8> = Rgba([0, 0, 0, u8::MAX]);

/// What one render pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    /// Vectors that passed the magnitude filter and were stroked.
    pub drawn: usize,
    /// Present when histogram mode was enabled for the tick.
    pub histogram: Option<Histogram>,
}

/// Owns the output canvas.
pub struct FlowRenderer {
    canvas: RgbaImage,
}

impl FlowRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::from_pixel(width, height, CLEAR),
        }
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// Reallocates a cleared canvas when the frame size changes. Returns `true` if it did.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        if self.canvas.dimensions() == (width, height) {
            return false;
        }
        self.canvas = RgbaImage::from_pixel(width, height, CLEAR);
        true
    }

    /// Blends every pixel toward black by `transparency`, leaving alpha opaque.
    pub fn fade(&mut self, transparency: f64) {
        let keep = 1.0 - transparency.clamp(0.0, 1.0);
        for pixel in self.canvas.pixels_mut() {
            for channel in &mut pixel.0[..3] {
                *channel = (*channel as f64 * keep).round() as u8;
            }
            pixel.0[3] = u8::MAX;
        }
    }

    /// Full render pass for one tick.
    pub fn render(&mut self, current: &FrameBuffer, vectors: &[FlowVector], config: &FlowConfig) -> RenderOutcome {
        self.resize(current.width(), current.height());
        if config.backdrop == Backdrop::Video {
            self.canvas.copy_from_slice(current.as_bytes());
        }
        self.fade(config.transparency);

        let (width, height) = self.canvas.dimensions();
        let mut histogram = config
            .histogram
            .then(|| Histogram::new(width as usize, config.min_flow, config.max_flow, config.histogram_bounds));
        let mut drawn = 0;

        for vector in vectors {
            let magnitude = vector.magnitude();

            if magnitude < config.max_flow && magnitude > config.min_flow {
                let color = if config.monochrome {
                    MONOCHROME
                } else {
                    directional_color(vector.u, vector.v)
                };
                let from = (vector.x as f64, vector.y as f64);
                let to = (vector.x as f64 - vector.u, vector.y as f64 + vector.v);
                draw_segment(&mut self.canvas, from, to, color);
                drawn += 1;
            }

            if let Some(histogram) = histogram.as_mut() {
                if let Some((column, count)) = histogram.record(magnitude) {
                    let bottom = height as f64 - 1.0;
                    let top = height as f64 - count as f64;
                    draw_segment(&mut self.canvas, (column as f64, bottom), (column as f64, top), MONOCHROME);
                }
            }
        }

        RenderOutcome { drawn, histogram }
    }
}

/// Rasterises the segment `from -> to` onto `canvas`, clipped to its bounds.
pub fn draw_segment(canvas: &mut RgbaImage, from: (f64, f64), to: (f64, f64), color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    let Some(((x0, y0), (x1, y1))) = clip_segment(from, to, width as f64 - 1.0, height as f64 - 1.0) else {
        return;
    };

    let (mut x, mut y) = (x0.round() as i64, y0.round() as i64);
    let (x1, y1) = (x1.round() as i64, y1.round() as i64);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
            canvas.put_pixel(x as u32, y as u32, color);
        }
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Liang-Barsky clip of a segment against `[0, max_x] x [0, max_y]`.
fn clip_segment(from: (f64, f64), to: (f64, f64), max_x: f64, max_y: f64) -> Option<((f64, f64), (f64, f64))> {
    if max_x < 0.0 || max_y < 0.0 || ![from.0, from.1, to.0, to.1].iter().all(|c| c.is_finite()) {
        return None;
    }
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    for (p, q) in [(-dx, from.0), (dx, max_x - from.0), (-dy, from.1), (dy, max_y - from.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    Some((
        (from.0 + t0 * dx, from.1 + t0 * dy),
        (from.0 + t1 * dx, from.1 + t1 * dy),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::histogram::HistogramBounds;

    fn vector(x: u32, y: u32, u: f64, v: f64) -> FlowVector {
        FlowVector { x, y, u, v }
    }

    fn lit_pixels(canvas: &RgbaImage) -> usize {
        canvas.pixels().filter(|p| p.0[..3] != [0, 0, 0]).count()
    }

    fn config() -> FlowConfig {
        FlowConfig {
            min_flow: 1.0,
            max_flow: 20.0,
            histogram: false,
            ..FlowConfig::default()
        }
    }

    #[test]
    fn strokes_point_from_zone_to_x_minus_u_y_plus_v() {
        let frame = FrameBuffer::from_fn(32, 32, |_, _| 0);
        let mut renderer = FlowRenderer::new(32, 32);
        let outcome = renderer.render(&frame, &[vector(10, 10, 4.0, 3.0)], &config());
        assert_eq!(outcome.drawn, 1);
        let canvas = renderer.canvas();
        let color = directional_color(4.0, 3.0);
        assert_eq!(*canvas.get_pixel(10, 10), color);
        assert_eq!(*canvas.get_pixel(6, 13), color);
    }

    #[test]
    fn magnitude_filter_is_strict_on_both_sides() {
        let frame = FrameBuffer::from_fn(32, 32, |_, _| 0);
        let mut renderer = FlowRenderer::new(32, 32);
        let vectors = [
            vector(5, 5, 1.0, 0.0),   // == min_flow
            vector(5, 5, 0.0, 20.0),  // == max_flow
            vector(5, 5, 0.0, 0.0),   // zero
            vector(16, 16, 3.0, 4.0), // 5, drawn
        ];
        let outcome = renderer.render(&frame, &vectors, &config());
        assert_eq!(outcome.drawn, 1);
        assert_eq!(*renderer.canvas().get_pixel(5, 5), CLEAR);
    }

    #[test]
    fn monochrome_uses_the_accent_colour() {
        let frame = FrameBuffer::from_fn(16, 16, |_, _| 0);
        let mut renderer = FlowRenderer::new(16, 16);
        let mono = FlowConfig { monochrome: true, ..config() };
        renderer.render(&frame, &[vector(8, 8, -2.0, 2.0)], &mono);
        assert_eq!(*renderer.canvas().get_pixel(8, 8), MONOCHROME);
    }

    #[test]
    fn full_transparency_clears_and_zero_keeps_trails() {
        let frame = FrameBuffer::from_fn(16, 16, |_, _| 0);
        let mut renderer = FlowRenderer::new(16, 16);
        renderer.render(&frame, &[vector(8, 8, 3.0, 0.0)], &config());
        assert!(lit_pixels(renderer.canvas()) > 0);

        let trails = FlowConfig { transparency: 0.0, ..config() };
        renderer.render(&frame, &[], &trails);
        assert!(lit_pixels(renderer.canvas()) > 0);

        renderer.render(&frame, &[], &config());
        assert_eq!(lit_pixels(renderer.canvas()), 0);
    }

    #[test]
    fn half_transparency_halves_previous_strokes() {
        let mut renderer = FlowRenderer::new(4, 4);
        draw_segment(&mut renderer.canvas, (0.0, 0.0), (0.0, 0.0), Rgba([200, 100, 50, 255]));
        renderer.fade(0.5);
        assert_eq!(*renderer.canvas().get_pixel(0, 0), Rgba([100, 50, 25, 255]));
    }

    #[test]
    fn video_backdrop_shows_the_current_frame() {
        let frame = FrameBuffer::from_fn(8, 8, |_, _| 200);
        let mut renderer = FlowRenderer::new(8, 8);
        let video = FlowConfig { backdrop: Backdrop::Video, transparency: 0.5, ..config() };
        renderer.render(&frame, &[], &video);
        assert_eq!(*renderer.canvas().get_pixel(3, 3), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn histogram_bars_grow_from_the_bottom() {
        let frame = FrameBuffer::from_fn(20, 10, |_, _| 0);
        let mut renderer = FlowRenderer::new(20, 10);
        let histogram = FlowConfig {
            min_flow: 0.0,
            max_flow: 20.0,
            histogram: true,
            ..FlowConfig::default()
        };
        // scale = 1 => index = round(m - 1); magnitude 5 lands in column 4.
        let vectors = [vector(0, 0, 3.0, 4.0), vector(10, 0, 0.0, 5.0), vector(15, 0, 5.0, 0.0)];
        let outcome = renderer.render(&frame, &vectors, &histogram);
        let bins = outcome.histogram.expect("histogram enabled");
        assert_eq!(bins.bins()[4], 3);
        assert_eq!(*renderer.canvas().get_pixel(4, 9), MONOCHROME);
        assert_eq!(*renderer.canvas().get_pixel(4, 7), MONOCHROME);
    }

    #[test]
    fn histogram_counts_every_vector_not_only_drawn_ones() {
        let frame = FrameBuffer::from_fn(100, 10, |_, _| 0);
        let mut renderer = FlowRenderer::new(100, 10);
        let cfg = FlowConfig {
            min_flow: 0.0,
            max_flow: 100.0,
            histogram: true,
            histogram_bounds: HistogramBounds::Drop,
            ..FlowConfig::default()
        };
        let vectors = [vector(1, 1, 50.0, 0.0), vector(1, 1, 500.0, 0.0), vector(1, 1, 1e12, 1e12)];
        let outcome = renderer.render(&frame, &vectors, &cfg);
        let histogram = outcome.histogram.unwrap();
        assert_eq!(outcome.drawn, 1);
        assert_eq!(histogram.binned() + histogram.dropped() as u64, 3);
        assert_eq!(histogram.dropped(), 2);
    }

    #[test]
    fn segments_far_outside_are_clipped_cheaply() {
        let mut canvas = RgbaImage::from_pixel(10, 10, CLEAR);
        draw_segment(&mut canvas, (5.0, 5.0), (5.0 - 1e15, 5.0 + 1e15), MONOCHROME);
        assert_eq!(*canvas.get_pixel(5, 5), MONOCHROME);
        draw_segment(&mut canvas, (-50.0, -50.0), (-20.0, -40.0), MONOCHROME);
        draw_segment(&mut canvas, (f64::NAN, 0.0), (3.0, 3.0), MONOCHROME);
        assert_eq!(lit_pixels(&canvas), 5);
    }

    #[test]
    fn resize_follows_the_frame() {
        let mut renderer = FlowRenderer::new(4, 4);
        let frame = FrameBuffer::from_fn(6, 3, |_, _| 0);
        renderer.render(&frame, &[], &config());
        assert_eq!(renderer.canvas().dimensions(), (6, 3));
    }
}
