use flowfield::{FlowConfig, FlowPipeline, FrameBuffer, Report};
use flowfield_visualizer::{ControlHandle, ControlReceivers, FlowSettings, FrameBus, FramePacket, Meta, ServerConfig, start_server};
use log::{info, warn};
use std::time::Duration;
use tokio::task::JoinHandle;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const JPEG_QUALITY: u8 = 80;

// A texture that orbits slowly, so every direction shows up on the page.
fn orbiting_frame(t: u32) -> FrameBuffer {
    let angle = t as f64 * 0.05;
    let dx = (angle.cos() * 20.0).round() as i64;
    let dy = (angle.sin() * 20.0).round() as i64;
    FrameBuffer::from_fn(WIDTH, HEIGHT, |x, y| {
        let xs = (x as i64 + dx + 64) as u64;
        let ys = (y as i64 + dy + 64) as u64;
        (((xs * 7) % 29) * 4 + ((ys * 11) % 23) * 4 + (xs ^ ys) % 9) as u8
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServerConfig {
        bind_addr: std::env::var("FF_BIND").unwrap_or_else(|_| "127.0.0.1:3001".to_string()),
        ..ServerConfig::default()
    };
    let bus = FrameBus::new(2);
    let base = FlowConfig { transparency: 0.3, max_flow: 60.0, ..FlowConfig::default() };
    let (control, receivers) = ControlHandle::new(true, FlowSettings::from(&base));
    let handle = start_server(bus.clone(), cfg, control).await?;

    info!("streaming synthetic flow at {WIDTH}x{HEIGHT}");
    let ticks = drive(handle, &bus, &receivers, &base, Duration::from_millis(33)).await?;
    warn!("visualizer server stopped after {ticks} ticks, shutting down");
    Ok(())
}

/// Renders and publishes one frame per `period` until the server task ends.
/// Returns the number of ticks processed.
async fn drive(
    handle: JoinHandle<()>,
    bus: &FrameBus,
    receivers: &ControlReceivers,
    base: &FlowConfig,
    period: Duration,
) -> anyhow::Result<u64> {
    let mut pipeline = FlowPipeline::new(base.clone())?;
    let mut ticker = tokio::time::interval(period);
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;
        if handle.is_finished() {
            return Ok(tick);
        }
        if !*receivers.play_rx.borrow() {
            continue;
        }
        let settings = *receivers.settings_rx.borrow();
        // Invalid settings are refused by the server; the pipeline logs anything else it rejects.
        let _ = pipeline.set_config(settings.apply(base));

        tick += 1;
        if let Report::Flow(data) = pipeline.process_frame(orbiting_frame(tick as u32)) {
            if !bus.has_viewers() {
                continue;
            }
            bus.publish_meta(Meta::from_flow(tick, &data, settings));
            bus.publish_frame(FramePacket::encode_jpeg(pipeline.canvas(), JPEG_QUALITY, tick * period.as_millis() as u64)?);
        }
    }
}
