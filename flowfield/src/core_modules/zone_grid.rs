// THEORY:
// The `ZoneGrid` plays the role the chunk grid plays in a block-based motion
// detector: it decides *where* the engine looks. It partitions the frame into a
// regular lattice of sample points ("zones") spaced `stride` pixels apart, and
// every zone later receives one flow vector per tick.
//
// Key architectural principles:
// 1.  **Row-Major Layout**: Zones are emitted with y as the outer loop and x as the
//     inner loop, so zone `i` sits at column `i % columns`, row `i / columns`. The
//     renderer and the histogram consume vectors in exactly this order.
// 2.  **Generate Once, Reuse Many**: The lattice only depends on (width, height,
//     stride). The grid caches it and regenerates only when one of the three
//     changes, which is rare compared to the tick rate.
// 3.  **No Margin**: Zones start at (0, 0) and run up to the last stride step inside
//     the frame. Windows around edge zones extend past the image; that is handled
//     by clamp-to-edge sampling in `FrameBuffer`, not by shrinking the grid.

use log::debug;

/// Placeholder displacement carried by a freshly generated zone until its first estimate.
pub const PLACEHOLDER_DISPLACEMENT: (f64, f64) = (1.0, 1.0);

/// A single grid point at which flow is estimated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleZone {
    pub x: u32,
    pub y: u32,
    /// Always `PLACEHOLDER_DISPLACEMENT` on creation; estimates are emitted as `FlowVector`s.
    pub displacement: (f64, f64),
}

impl SampleZone {
    pub fn new(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            displacement: PLACEHOLDER_DISPLACEMENT,
        }
    }
}

/// Builds the row-major lattice for a frame. A stride of 0 is treated as 1.
pub fn generate_zones(width: u32, height: u32, stride: u32) -> Vec<SampleZone> {
    let step = stride.max(1) as usize;
    let columns = (width as usize).div_ceil(step);
    let rows = (height as usize).div_ceil(step);
    let mut zones = Vec::with_capacity(columns * rows);

    for y in (0..height).step_by(step) {
        for x in (0..width).step_by(step) {
            zones.push(SampleZone::new(x, y));
        }
    }

    zones
}

/// Caches the zone lattice for the current (width, height, stride).
#[derive(Debug, Clone, Default)]
pub struct ZoneGrid {
    width: u32,
    height: u32,
    stride: u32,
    zones: Vec<SampleZone>,
    generated: bool,
}

impl ZoneGrid {
    pub fn new(width: u32, height: u32, stride: u32) -> Self {
        Self {
            width,
            height,
            stride,
            zones: generate_zones(width, height, stride),
            generated: true,
        }
    }

    /// Makes sure the cached lattice matches the given parameters.
    /// Returns `true` when the zones had to be regenerated.
    pub fn ensure(&mut self, width: u32, height: u32, stride: u32) -> bool {
        if self.width == width && self.height == height && self.stride == stride && self.generated {
            return false;
        }
        self.width = width;
        self.height = height;
        self.stride = stride;
        self.zones = generate_zones(width, height, stride);
        self.generated = true;
        debug!(
            "regenerated zone grid: {}x{} stride {} -> {} zones",
            width,
            height,
            stride,
            self.zones.len()
        );
        true
    }

    pub fn zones(&self) -> &[SampleZone] {
        &self.zones
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// The frame dimensions this lattice was generated for.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Zones per row.
    pub fn columns(&self) -> usize {
        (self.width as usize).div_ceil(self.stride.max(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vga_frame_at_stride_ten_yields_3072_zones() {
        let zones = generate_zones(640, 480, 10);
        assert_eq!(zones.len(), 64 * 48);
        assert_eq!((zones[0].x, zones[0].y), (0, 0));
        assert_eq!((zones[1].x, zones[1].y), (10, 0));
        assert_eq!((zones[2].x, zones[2].y), (20, 0));
        assert_eq!((zones[63].x, zones[63].y), (630, 0));
        assert_eq!((zones[64].x, zones[64].y), (0, 10));
        assert_eq!((zones[3071].x, zones[3071].y), (630, 470));
    }

    #[test]
    fn zones_start_with_placeholder_displacement() {
        let zones = generate_zones(20, 20, 5);
        assert!(zones.iter().all(|z| z.displacement == (1.0, 1.0)));
    }

    #[test]
    fn generation_is_deterministic() {
        assert_eq!(generate_zones(123, 77, 7), generate_zones(123, 77, 7));
    }

    #[test]
    fn uneven_dimensions_include_partial_steps() {
        // 25 / 10 -> x in {0, 10, 20}; 11 / 10 -> y in {0, 10}
        let zones = generate_zones(25, 11, 10);
        assert_eq!(zones.len(), 6);
        assert_eq!((zones[5].x, zones[5].y), (20, 10));
    }

    #[test]
    fn oversized_stride_degenerates_to_origin() {
        let zones = generate_zones(8, 6, 50);
        assert_eq!(zones, vec![SampleZone::new(0, 0)]);
        assert!(generate_zones(0, 6, 2).is_empty());
    }

    #[test]
    fn grid_regenerates_only_on_parameter_change() {
        let mut grid = ZoneGrid::default();
        assert!(grid.ensure(40, 30, 10));
        assert_eq!(grid.len(), 12);
        assert_eq!(grid.columns(), 4);
        assert!(!grid.ensure(40, 30, 10));
        assert!(grid.ensure(40, 30, 5));
        assert_eq!(grid.len(), 48);
        assert!(grid.ensure(50, 30, 5));
        assert_eq!(grid.dimensions(), (50, 30));
    }
}
