// THEORY:
// The `pipeline` module is the top-level API for the flow engine. It wraps the
// whole per-tick sequence (zone grid, estimator, colour mapper, renderer and
// histogram) behind one call: hand it the newest frame, get back a `Report`.
//
// Key architectural principles:
// 1.  **Two Frames, One Swap**: The pipeline owns the previous frame. Each tick it
//     estimates flow between that frame and the new one, then keeps the new one as
//     the next tick's previous. The first frame of a sequence only primes the swap
//     and sizes the canvas, with the backdrop laid down and no strokes.
// 2.  **Config Snapshots**: A `FlowConfig` is validated when installed and cloned at
//     the start of each tick. Nothing the UI does between ticks can change the
//     parameters of a tick that is already running.
// 3.  **Degenerate-Tolerant**: Nothing inside a tick fails. Singular windows fall
//     back, edge windows clamp, oversized magnitudes are bounded by the histogram
//     policy. Errors only exist at the edges: bad configs and bad frames.

use crate::core_modules::flow_estimator::{FlowVector, OutlierRule, estimate_zones};
use crate::core_modules::flow_renderer::FlowRenderer;
use crate::core_modules::frame::FrameBuffer;
use crate::core_modules::histogram::{Histogram, HistogramBounds};
use crate::core_modules::zone_grid::{SampleZone, ZoneGrid};
use crate::error::ConfigError;
use image::RgbaImage;
use log::{debug, warn};
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Smallest stride / window radius the estimator accepts.
pub const MIN_QUALITY: u32 = 2;

// Slider ranges offered by the control surface.
pub const QUALITY_RANGE: RangeInclusive<u32> = MIN_QUALITY..=100;
pub const MAX_FLOW_RANGE: RangeInclusive<f64> = 10.0..=2000.0;
pub const MIN_FLOW_RANGE: RangeInclusive<f64> = 1.0..=100.0;
pub const TRANSPARENCY_RANGE: RangeInclusive<f64> = 0.0..=1.0;

/// What the canvas shows under the strokes before the fade is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Backdrop {
    /// Keep the previous canvas, so low transparency leaves motion trails.
    #[default]
    Trails,
    /// Start every tick from the current video frame.
    Video,
}

/// Configuration for the flow pipeline. Validated on install, snapshotted per tick.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowConfig {
    /// Grid stride and estimation window radius.
    pub quality: u32,
    /// Strokes are drawn only for magnitudes strictly above this...
    pub min_flow: f64,
    /// ...and strictly below this. Also sets the histogram scale.
    pub max_flow: f64,
    /// Alpha of the black fill laid over the canvas each tick.
    pub transparency: f64,
    /// Draw every stroke in the accent colour instead of by direction.
    pub monochrome: bool,
    /// Build and draw the magnitude histogram.
    pub histogram: bool,
    pub outlier_rule: OutlierRule,
    pub histogram_bounds: HistogramBounds,
    pub backdrop: Backdrop,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            quality: 10,
            min_flow: 0.0,
            max_flow: 100.0,
            transparency: 1.0,
            monochrome: false,
            histogram: true,
            outlier_rule: OutlierRule::default(),
            histogram_bounds: HistogramBounds::default(),
            backdrop: Backdrop::default(),
        }
    }
}

impl FlowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality < MIN_QUALITY {
            return Err(ConfigError::QualityTooSmall {
                quality: self.quality,
                min: MIN_QUALITY,
            });
        }
        let finite = self.min_flow.is_finite() && self.max_flow.is_finite();
        if !finite || self.min_flow < 0.0 || self.min_flow >= self.max_flow {
            return Err(ConfigError::InvalidFlowRange {
                min_flow: self.min_flow,
                max_flow: self.max_flow,
            });
        }
        if !TRANSPARENCY_RANGE.contains(&self.transparency) {
            return Err(ConfigError::TransparencyOutOfRange(self.transparency));
        }
        Ok(())
    }
}

/// The data package for a tick that produced flow.
#[derive(Debug, Clone)]
pub struct FlowData {
    /// One vector per zone, in row-major zone order.
    pub vectors: Vec<FlowVector>,
    /// Present when histogram mode was on for the tick.
    pub histogram: Option<Histogram>,
    /// Vectors that passed the magnitude filter and were stroked.
    pub drawn: usize,
    /// Whether the zone lattice was rebuilt for this tick.
    pub grid_regenerated: bool,
}

/// The output of the pipeline for a single frame.
#[derive(Debug, Clone)]
pub enum Report {
    /// First frame of a sequence; stored as previous, nothing to compare against yet.
    Warmup,
    Flow(FlowData),
}

/// Inputs for the estimation step of one tick.
pub(crate) struct TickPlan {
    pub previous: Arc<FrameBuffer>,
    pub config: FlowConfig,
    pub grid_regenerated: bool,
}

/// Frame history, zone cache and canvas shared by the sequential and parallel pipelines.
pub(crate) struct TickState {
    config: FlowConfig,
    zone_grid: ZoneGrid,
    renderer: FlowRenderer,
    previous: Option<Arc<FrameBuffer>>,
    frame_count: u64,
}

impl TickState {
    pub(crate) fn new(config: FlowConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            zone_grid: ZoneGrid::default(),
            renderer: FlowRenderer::new(0, 0),
            previous: None,
            frame_count: 0,
        })
    }

    pub(crate) fn set_config(&mut self, config: FlowConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.validate() {
            warn!("rejected flow config: {e}");
            return Err(e);
        }
        self.config = config;
        Ok(())
    }

    /// Snapshots the config and decides whether this frame can be compared to the previous one.
    /// `None` means the frame starts a new sequence and the tick ends with `warm_up`.
    pub(crate) fn begin(&mut self, current: &FrameBuffer) -> Option<TickPlan> {
        self.frame_count += 1;
        let config = self.config.clone();

        let previous = match self.previous.take() {
            Some(previous) if previous.dimensions() == current.dimensions() => previous,
            Some(previous) => {
                debug!(
                    "frame size changed from {:?} to {:?}, restarting sequence",
                    previous.dimensions(),
                    current.dimensions()
                );
                return None;
            }
            None => return None,
        };

        let grid_regenerated = self.zone_grid.ensure(current.width(), current.height(), config.quality);
        Some(TickPlan {
            previous,
            config,
            grid_regenerated,
        })
    }

    pub(crate) fn zones(&self) -> &[SampleZone] {
        self.zone_grid.zones()
    }

    /// Renders the tick and swaps `current` in as the next previous frame.
    pub(crate) fn finish(&mut self, current: Arc<FrameBuffer>, plan: TickPlan, vectors: Vec<FlowVector>) -> Report {
        let outcome = self.renderer.render(&current, &vectors, &plan.config);
        self.store(current);
        Report::Flow(FlowData {
            vectors,
            histogram: outcome.histogram,
            drawn: outcome.drawn,
            grid_regenerated: plan.grid_regenerated,
        })
    }

    /// Ends the first tick of a sequence: the canvas takes the frame's size and backdrop,
    /// with nothing drawn on it, and the frame becomes the next previous frame.
    pub(crate) fn warm_up(&mut self, current: Arc<FrameBuffer>) -> Report {
        let config = FlowConfig { histogram: false, ..self.config.clone() };
        self.renderer.render(&current, &[], &config);
        self.store(current);
        Report::Warmup
    }

    pub(crate) fn store(&mut self, current: Arc<FrameBuffer>) {
        self.previous = Some(current);
    }

    pub(crate) fn reset(&mut self) {
        debug!("pipeline reset after {} frames", self.frame_count);
        self.previous = None;
    }

    pub(crate) fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub(crate) fn canvas(&self) -> &RgbaImage {
        self.renderer.canvas()
    }

    pub(crate) fn zone_count(&self) -> usize {
        self.zone_grid.len()
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// The main, top-level struct for the flow engine. Estimates zones sequentially on the caller's thread.
pub struct FlowPipeline {
    state: TickState,
}

impl FlowPipeline {
    pub fn new(config: FlowConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            state: TickState::new(config)?,
        })
    }

    /// Installs a new config for subsequent ticks. An invalid config is rejected and the old one kept.
    pub fn set_config(&mut self, config: FlowConfig) -> Result<(), ConfigError> {
        self.state.set_config(config)
    }

    pub fn process_frame(&mut self, frame: FrameBuffer) -> Report {
        let current = Arc::new(frame);
        let Some(plan) = self.state.begin(&current) else {
            return self.state.warm_up(current);
        };

        let vectors = estimate_zones(
            &plan.previous,
            &current,
            self.state.zones(),
            plan.config.quality,
            plan.config.outlier_rule,
        );
        self.state.finish(current, plan, vectors)
    }

    /// Convenience wrapper for a raw RGBA buffer straight from a decoder.
    pub fn process_rgba(&mut self, width: u32, height: u32, rgba: Vec<u8>) -> Result<Report, crate::error::FrameError> {
        Ok(self.process_frame(FrameBuffer::from_rgba(width, height, rgba)?))
    }

    /// Forgets the previous frame; the next frame starts a new sequence.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn config(&self) -> &FlowConfig {
        self.state.config()
    }

    /// The canvas as of the last tick.
    pub fn canvas(&self) -> &RgbaImage {
        self.state.canvas()
    }

    /// Zones in the current lattice ("flow points").
    pub fn zone_count(&self) -> usize {
        self.state.zone_count()
    }

    pub fn frame_count(&self) -> u64 {
        self.state.frame_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(width: u32, height: u32, offset: u32) -> FrameBuffer {
        FrameBuffer::from_fn(width, height, |x, y| {
            let xs = x + 64 - offset;
            (((xs * 7) % 31) * 5 + ((y * 3) % 11) * 4) as u8
        })
    }

    fn expect_flow(report: Report) -> FlowData {
        match report {
            Report::Flow(data) => data,
            Report::Warmup => panic!("expected a flow report"),
        }
    }

    #[test]
    fn default_config_matches_the_control_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.quality, 10);
        assert_eq!((config.min_flow, config.max_flow), (0.0, 100.0));
        assert_eq!(config.transparency, 1.0);
        assert!(!config.monochrome);
        assert!(config.histogram);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn misconfiguration_is_rejected_up_front() {
        let small = FlowConfig { quality: 1, ..FlowConfig::default() };
        assert_eq!(
            small.validate(),
            Err(ConfigError::QualityTooSmall { quality: 1, min: MIN_QUALITY })
        );
        assert!(FlowPipeline::new(small).is_err());

        let inverted = FlowConfig { min_flow: 50.0, max_flow: 50.0, ..FlowConfig::default() };
        assert!(matches!(inverted.validate(), Err(ConfigError::InvalidFlowRange { .. })));
        let negative = FlowConfig { min_flow: -1.0, ..FlowConfig::default() };
        assert!(negative.validate().is_err());
        let nan = FlowConfig { max_flow: f64::NAN, ..FlowConfig::default() };
        assert!(nan.validate().is_err());

        let opaque = FlowConfig { transparency: 1.5, ..FlowConfig::default() };
        assert_eq!(opaque.validate(), Err(ConfigError::TransparencyOutOfRange(1.5)));
    }

    #[test_log::test]
    fn rejected_config_keeps_the_previous_one() {
        let mut pipeline = FlowPipeline::new(FlowConfig::default()).unwrap();
        let bad = FlowConfig { quality: 0, ..FlowConfig::default() };
        assert!(pipeline.set_config(bad).is_err());
        assert_eq!(pipeline.config().quality, 10);
    }

    #[test]
    fn first_frame_only_primes_the_pipeline() {
        let mut pipeline = FlowPipeline::new(FlowConfig::default()).unwrap();
        assert!(matches!(pipeline.process_frame(scene(40, 30, 0)), Report::Warmup));
        let data = expect_flow(pipeline.process_frame(scene(40, 30, 0)));
        assert_eq!(data.vectors.len(), 4 * 3);
        assert!(data.grid_regenerated);
        assert_eq!(pipeline.frame_count(), 2);
    }

    #[test]
    fn warmup_sizes_the_canvas_to_the_frame() {
        let mut pipeline = FlowPipeline::new(FlowConfig::default()).unwrap();
        let frame = scene(64, 48, 0);
        let dimensions = frame.dimensions();
        assert!(matches!(pipeline.process_frame(frame), Report::Warmup));
        assert_eq!(pipeline.canvas().dimensions(), dimensions);

        assert!(matches!(pipeline.process_frame(scene(32, 16, 0)), Report::Warmup));
        assert_eq!(pipeline.canvas().dimensions(), (32, 16));
    }

    #[test]
    fn warmup_shows_the_video_backdrop() {
        let config = FlowConfig { backdrop: Backdrop::Video, transparency: 0.5, ..FlowConfig::default() };
        let mut pipeline = FlowPipeline::new(config).unwrap();
        pipeline.process_frame(FrameBuffer::from_fn(8, 6, |_, _| 200));
        assert_eq!(*pipeline.canvas().get_pixel(4, 3), image::Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn static_scene_produces_zero_flow() {
        let mut pipeline = FlowPipeline::new(FlowConfig { quality: 5, ..FlowConfig::default() }).unwrap();
        pipeline.process_frame(scene(50, 40, 0));
        let data = expect_flow(pipeline.process_frame(scene(50, 40, 0)));
        assert_eq!(data.vectors.len(), pipeline.zone_count());
        assert!(data.vectors.iter().all(|v| v.u == 0.0 && v.v == 0.0));
        assert_eq!(data.drawn, 0);
    }

    #[test]
    fn grid_is_reused_until_quality_changes() {
        let mut pipeline = FlowPipeline::new(FlowConfig { quality: 5, ..FlowConfig::default() }).unwrap();
        pipeline.process_frame(scene(40, 40, 0));
        assert!(expect_flow(pipeline.process_frame(scene(40, 40, 1))).grid_regenerated);
        assert!(!expect_flow(pipeline.process_frame(scene(40, 40, 2))).grid_regenerated);

        pipeline.set_config(FlowConfig { quality: 8, ..FlowConfig::default() }).unwrap();
        let data = expect_flow(pipeline.process_frame(scene(40, 40, 3)));
        assert!(data.grid_regenerated);
        assert_eq!(data.vectors.len(), 25);
    }

    #[test]
    fn histogram_accounts_for_every_vector() {
        let config = FlowConfig { quality: 4, min_flow: 0.0, max_flow: 50.0, ..FlowConfig::default() };
        let mut pipeline = FlowPipeline::new(config).unwrap();
        pipeline.process_frame(scene(64, 48, 0));
        let data = expect_flow(pipeline.process_frame(scene(64, 48, 2)));
        let histogram = data.histogram.expect("histogram on by default");
        assert_eq!(histogram.bins().len(), 64);
        assert_eq!(histogram.binned() + histogram.dropped() as u64, data.vectors.len() as u64);
    }

    #[test]
    fn histogram_can_be_switched_off() {
        let mut pipeline = FlowPipeline::new(FlowConfig { histogram: false, ..FlowConfig::default() }).unwrap();
        pipeline.process_frame(scene(30, 30, 0));
        assert!(expect_flow(pipeline.process_frame(scene(30, 30, 1))).histogram.is_none());
    }

    #[test_log::test]
    fn size_change_restarts_the_sequence() {
        let mut pipeline = FlowPipeline::new(FlowConfig::default()).unwrap();
        pipeline.process_frame(scene(40, 30, 0));
        assert!(matches!(pipeline.process_frame(scene(20, 20, 0)), Report::Warmup));
        assert!(matches!(pipeline.process_frame(scene(20, 20, 1)), Report::Flow(_)));
        assert_eq!(pipeline.canvas().dimensions(), (20, 20));
    }

    #[test]
    fn reset_drops_the_previous_frame() {
        let mut pipeline = FlowPipeline::new(FlowConfig::default()).unwrap();
        pipeline.process_frame(scene(30, 30, 0));
        pipeline.reset();
        assert!(matches!(pipeline.process_frame(scene(30, 30, 1)), Report::Warmup));
    }

    #[test]
    fn raw_buffers_are_validated() {
        let mut pipeline = FlowPipeline::new(FlowConfig::default()).unwrap();
        assert!(pipeline.process_rgba(4, 4, vec![0; 10]).is_err());
        assert!(matches!(pipeline.process_rgba(4, 4, vec![0; 64]), Ok(Report::Warmup)));
    }
}
