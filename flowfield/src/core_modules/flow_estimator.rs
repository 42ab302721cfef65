// THEORY:
// The flow estimator is the heart of the engine. For one sample zone it looks at a
// (2q+1) x (2q+1) window in two consecutive frames and asks: "which small
// displacement best explains how the brightness in this window changed?"
//
// Algorithm (Lucas-Kanade style, one window per zone):
// 1.  **Gradient Accumulation**: For every pixel of the window it measures the
//     horizontal and vertical brightness gradients in the current frame (central
//     differences, left minus right and above minus below) and the temporal
//     gradient (previous minus current). It sums their products into the 2x2
//     structure tensor [A2 A1B2; A1B2 B1] and the right-hand side (C2, C1).
// 2.  **Cramer Solve**: When the tensor is invertible the displacement is solved in
//     closed form by Cramer's rule, scaled by `quality / delta`.
// 3.  **Gradient-Direction Fallback**: A singular tensor (edges, flat regions) has no
//     unique 2D answer. The temporal change is projected onto the dominant gradient
//     direction instead. A window with no gradient at all yields the zero vector.
// 4.  **Outlier Override**: An `OutlierRule` decides whether an estimate is replaced
//     by the fixed sentinel (10, 10).
//
// The estimator is a pure function of (previous, current, zone, quality, rule). It
// holds no state and knows nothing about how zones are scheduled, which is what
// lets the sequential and parallel pipelines share it.

use crate::core_modules::frame::FrameBuffer;
use crate::core_modules::zone_grid::SampleZone;

/// Value written to both components when the outlier rule fires.
pub const OUTLIER_SENTINEL: f64 = 10.0;

/// Decides when an estimate is replaced by `OUTLIER_SENTINEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutlierRule {
    /// `-q > u && u > q && -q > v && v > q`. No real pair satisfies it, so estimates
    /// pass through untouched; this is the behaviour the vector field was tuned with.
    #[default]
    Literal,
    /// Overrides whenever either component leaves `[-q, q]`.
    AnyAxis,
}

impl OutlierRule {
    pub fn should_override(self, u: f64, v: f64, quality: f64) -> bool {
        match self {
            OutlierRule::Literal => -quality > u && u > quality && -quality > v && v > quality,
            OutlierRule::AnyAxis => u.abs() > quality || v.abs() > quality,
        }
    }
}

/// The estimated displacement at one zone for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowVector {
    pub x: u32,
    pub y: u32,
    pub u: f64,
    pub v: f64,
}

impl FlowVector {
    /// Euclidean length of (u, v).
    pub fn magnitude(&self) -> f64 {
        (self.u * self.u + self.v * self.v).sqrt()
    }
}

/// Accumulated gradient products over one window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StructureTensor {
    /// Sum of gradX^2.
    pub a2: f64,
    /// Sum of gradX * gradY.
    pub a1b2: f64,
    /// Sum of gradY^2.
    pub b1: f64,
    /// Sum of gradY * gradT.
    pub c1: f64,
    /// Sum of gradX * gradT.
    pub c2: f64,
}

impl StructureTensor {
    /// Sums gradients over the window of radius `quality` centred on (x, y).
    pub fn accumulate(previous: &FrameBuffer, current: &FrameBuffer, x: u32, y: u32, quality: u32) -> Self {
        let radius = quality as i64;
        let (cx, cy) = (x as i64, y as i64);
        let mut tensor = Self::default();

        for local_y in -radius..=radius {
            let py = cy + local_y;
            for local_x in -radius..=radius {
                let px = cx + local_x;
                let grad_x = current.intensity(px - 1, py) - current.intensity(px + 1, py);
                let grad_y = current.intensity(px, py - 1) - current.intensity(px, py + 1);
                let grad_t = previous.intensity(px, py) - current.intensity(px, py);

                tensor.a2 += grad_x * grad_x;
                tensor.a1b2 += grad_x * grad_y;
                tensor.b1 += grad_y * grad_y;
                tensor.c2 += grad_x * grad_t;
                tensor.c1 += grad_y * grad_t;
            }
        }

        tensor
    }

    /// `A1B2^2 - A2*B1`: the tensor determinant with its sign flipped.
    pub fn delta(&self) -> f64 {
        self.a1b2 * self.a1b2 - self.a2 * self.b1
    }

    /// Solves for (u, v), falling back to the gradient direction on a singular tensor.
    pub fn solve(&self, quality: f64) -> (f64, f64) {
        let delta = self.delta();
        if delta != 0.0 {
            let scale = quality / delta;
            let u = -(self.c1 * self.a1b2 - self.c2 * self.b1) * scale;
            let v = -(self.a1b2 * self.c2 - self.a2 * self.c1) * scale;
            return (u, v);
        }

        let gx = self.a1b2 + self.a2;
        let gy = self.b1 + self.a1b2;
        let norm = gx * gx + gy * gy;
        if norm != 0.0 {
            let temp = -(self.c1 + self.c2) * (quality / norm);
            (gx * temp, gy * temp)
        } else {
            (0.0, 0.0)
        }
    }
}

/// Estimates the displacement at a single zone.
pub fn estimate_zone(
    previous: &FrameBuffer,
    current: &FrameBuffer,
    zone: &SampleZone,
    quality: u32,
    rule: OutlierRule,
) -> FlowVector {
    let tensor = StructureTensor::accumulate(previous, current, zone.x, zone.y, quality);
    let q = quality as f64;
    let (mut u, mut v) = tensor.solve(q);

    if rule.should_override(u, v, q) {
        u = OUTLIER_SENTINEL;
        v = OUTLIER_SENTINEL;
    }

    FlowVector { x: zone.x, y: zone.y, u, v }
}

/// Estimates every zone in order. Output slot `i` belongs to `zones[i]`.
pub fn estimate_zones(
    previous: &FrameBuffer,
    current: &FrameBuffer,
    zones: &[SampleZone],
    quality: u32,
    rule: OutlierRule,
) -> Vec<FlowVector> {
    zones
        .iter()
        .map(|zone| estimate_zone(previous, current, zone, quality, rule))
        .collect()
}
