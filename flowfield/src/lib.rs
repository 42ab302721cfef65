// THEORY:
// This file is the main entry point for the `flowfield` library crate. It defines
// the public API exposed to external consumers such as the `visual_tester` harness
// and the web visualizer.
//
// The primary interface is `FlowPipeline` (or its pooled twin `ParallelPipeline`)
// together with `FlowConfig` and `Report`: hand the pipeline frames, read back
// flow vectors, the magnitude histogram and the rendered canvas. The numerical
// building blocks under `core_modules` stay public for callers that want to run a
// single stage on its own, such as rendering the direction legend.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use core_modules::flow_estimator::{FlowVector, OutlierRule};
pub use core_modules::frame::FrameBuffer;
pub use core_modules::histogram::{Histogram, HistogramBounds};
pub use error::{ConfigError, FlowError, FrameError};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{Backdrop, FlowConfig, FlowData, FlowPipeline, Report};
