// Example runner for the `flowfield` library. Feeds a synthetic drifting texture
// through the pipeline and writes the final canvas and the direction legend to PNG.
//
// Usage: flowfield [output_dir] [frames]

use anyhow::{Context, Result};
use flowfield::core_modules::legend::render_legend;
use flowfield::core_modules::utils::image_helper;
use flowfield::{FlowConfig, FlowPipeline, FrameBuffer, Report};
use log::info;
use std::path::PathBuf;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const LEGEND_SIZE: u32 = 100;
// Drift coordinates wrap here, so any frame count stays in range.
const TEXTURE_PERIOD: i64 = 1 << 16;

fn synthetic_frame(t: u32) -> FrameBuffer {
    FrameBuffer::from_fn(WIDTH, HEIGHT, |x, y| {
        // Texture drifts right one pixel per frame; the lower half also drifts down.
        let xs = (x as i64 - t as i64).rem_euclid(TEXTURE_PERIOD);
        let ys = if y > HEIGHT / 2 {
            (y as i64 - t as i64).rem_euclid(TEXTURE_PERIOD)
        } else {
            y as i64
        };
        (((xs * 7) % 29) * 4 + ((ys * 11) % 23) * 4 + (xs ^ ys) % 9) as u8
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let output_dir = PathBuf::from(args.next().unwrap_or_else(|| ".".to_string()));
    let frames: u32 = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("invalid frame count {raw:?}"))?,
        None => 30,
    };

    let config = FlowConfig {
        transparency: 0.2,
        max_flow: 40.0,
        ..FlowConfig::default()
    };
    let mut pipeline = FlowPipeline::new(config)?;
    info!("Flowfield Engine - Example Runner ({WIDTH}x{HEIGHT}, {frames} frames)");

    for t in 0..frames {
        match pipeline.process_frame(synthetic_frame(t)) {
            Report::Warmup => info!("frame {t}: warmup"),
            Report::Flow(data) => {
                let dropped = data.histogram.as_ref().map_or(0, |h| h.dropped());
                info!(
                    "frame {t}: {} flow points, {} drawn, {} outside histogram",
                    data.vectors.len(),
                    data.drawn,
                    dropped
                );
            }
        }
    }

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let canvas_path = output_dir.join("flowfield_canvas.png");
    image_helper::save(&canvas_path, pipeline.canvas())
        .with_context(|| format!("writing {}", canvas_path.display()))?;
    let legend_path = output_dir.join("flowfield_legend.png");
    image_helper::save(&legend_path, &render_legend(LEGEND_SIZE))
        .with_context(|| format!("writing {}", legend_path.display()))?;

    info!("wrote {} and {}", canvas_path.display(), legend_path.display());
    Ok(())
}
