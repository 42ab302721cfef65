// THEORY:
// The engine is numerically degenerate-tolerant: singular windows, textureless
// regions and oversized magnitudes are absorbed inside the estimator and the
// renderer and never surface as errors. What remains is configuration misuse,
// malformed frames handed over by the video collaborator, and (for the
// parallel pipeline) a worker pool that has gone away. Those are the only
// failures a caller ever sees.

use thiserror::Error;

/// Rejected configuration snapshots. Raised when a config is installed, never mid-tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("quality (grid stride) must be at least {min}, got {quality}")]
    QualityTooSmall { quality: u32, min: u32 },
    #[error("flow range must satisfy 0 <= min_flow < max_flow, got min_flow={min_flow} max_flow={max_flow}")]
    InvalidFlowRange { min_flow: f64, max_flow: f64 },
    #[error("transparency must lie in [0, 1], got {0}")]
    TransparencyOutOfRange(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("RGBA buffer for a {width}x{height} frame must be {expected} bytes, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Errors surfaced by the pipelines.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("worker pool is no longer accepting zone tasks")]
    WorkerUnavailable,
    #[error("worker dropped its result before replying")]
    WorkerDropped,
}
