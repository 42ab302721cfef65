use anyhow::{Context, Result, bail};
use flowfield::{Backdrop, FlowConfig, FlowPipeline, FrameBuffer, Report};
use log::{info, warn};
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        println!("Usage: visual_tester <input_video_path> <output_video_path> [quality]");
        return Ok(());
    }
    let input_path = &args[1];
    let output_path = &args[2];

    let mut config = FlowConfig {
        transparency: 0.5,
        backdrop: Backdrop::Video,
        ..FlowConfig::default()
    };
    if let Some(raw) = args.get(3) {
        config.quality = raw.parse().with_context(|| format!("invalid quality {raw:?}"))?;
    }

    // --- 2. Video I/O Initialization ---
    let mut cap = VideoCapture::from_file(input_path, videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        bail!("error opening video file {input_path}");
    }

    let frame_width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as u32;
    let frame_height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as u32;
    let fps = cap.get(videoio::CAP_PROP_FPS)?;

    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let mut writer = VideoWriter::new(
        output_path,
        fourcc,
        fps,
        core::Size::new(frame_width as i32, frame_height as i32),
        true,
    )?;

    // --- 3. Flow Pipeline Initialization ---
    let mut pipeline = FlowPipeline::new(config.clone())?;
    info!("processing {input_path} ({frame_width}x{frame_height} @ {fps:.1} fps, quality {})", config.quality);

    #[cfg(feature = "web")]
    let mut viewer = web::Viewer::start(&config).await?;

    // --- 4. Main Processing Loop ---
    let mut frame = Mat::default();
    let mut tick: u64 = 0;
    loop {
        match cap.read(&mut frame) {
            Ok(true) => {
                if frame.empty() {
                    break;
                }

                #[cfg(feature = "web")]
                viewer.sync(&mut pipeline, &config).await;

                // --- 5. Frame Conversion & Pipeline Processing ---
                // Convert the OpenCV Mat (BGR) to an RGBA buffer for our pipeline.
                let mut rgba_frame = Mat::default();
                imgproc::cvt_color(&frame, &mut rgba_frame, imgproc::COLOR_BGR2RGBA, 0)?;
                let size = rgba_frame.size()?;
                let buffer = FrameBuffer::from_rgba(size.width as u32, size.height as u32, rgba_frame.data_bytes()?.to_vec())?;

                tick += 1;
                let report = pipeline.process_frame(buffer);
                if let Report::Flow(data) = &report {
                    if tick % 100 == 0 {
                        info!("tick {tick}: {} flow points, {} drawn", data.vectors.len(), data.drawn);
                    }
                }

                // --- 6. Canvas Back To OpenCV ---
                let canvas = pipeline.canvas();
                let mut canvas_mat = Mat::new_rows_cols_with_default(
                    canvas.height() as i32,
                    canvas.width() as i32,
                    core::CV_8UC4,
                    Scalar::all(0.0),
                )?;
                canvas_mat.data_bytes_mut()?.copy_from_slice(canvas.as_raw());
                let mut output_frame = Mat::default();
                imgproc::cvt_color(&canvas_mat, &mut output_frame, imgproc::COLOR_RGBA2BGR, 0)?;

                // --- 7. Write Output Frame ---
                writer.write(&output_frame)?;

                #[cfg(feature = "web")]
                viewer.publish(tick, &report, &pipeline)?;
            }
            Ok(false) => {
                // End of video
                break;
            }
            Err(e) => {
                warn!("error reading frame: {e:?}");
                break;
            }
        }
    }

    info!("Processing complete ({tick} frames). Output saved to {output_path}");
    Ok(())
}

#[cfg(feature = "web")]
mod web {
    use anyhow::Result;
    use flowfield::{FlowConfig, FlowPipeline, Report};
    use flowfield_visualizer::{
        ControlHandle, ControlReceivers, FlowSettings, FrameBus, FramePacket, Meta, ServerConfig, start_server,
    };
    use log::info;

    const JPEG_QUALITY: u8 = 80;

    /// Streams the rendered canvas to the browser visualizer and applies its controls.
    pub struct Viewer {
        bus: FrameBus,
        receivers: ControlReceivers,
        settings: FlowSettings,
    }

    impl Viewer {
        pub async fn start(config: &FlowConfig) -> Result<Self> {
            let cfg = ServerConfig {
                bind_addr: std::env::var("FF_BIND").unwrap_or_else(|_| ServerConfig::default().bind_addr),
                ..ServerConfig::default()
            };
            let bus = FrameBus::new(2);
            let settings = FlowSettings::from(config);
            let (control, receivers) = ControlHandle::new(true, settings);
            start_server(bus.clone(), cfg, control).await?;
            Ok(Self { bus, receivers, settings })
        }

        /// Waits out a pause, then installs the page's latest settings for the next tick.
        pub async fn sync(&mut self, pipeline: &mut FlowPipeline, base: &FlowConfig) {
            while !*self.receivers.play_rx.borrow_and_update() {
                info!("paused");
                if self.receivers.play_rx.changed().await.is_err() {
                    break;
                }
            }
            let settings = *self.receivers.settings_rx.borrow_and_update();
            if settings != self.settings && pipeline.set_config(settings.apply(base)).is_ok() {
                self.settings = settings;
            }
        }

        pub fn publish(&self, tick: u64, report: &Report, pipeline: &FlowPipeline) -> Result<()> {
            if !self.bus.has_viewers() {
                return Ok(());
            }
            if let Report::Flow(data) = report {
                self.bus.publish_meta(Meta::from_flow(tick, data, self.settings));
            }
            self.bus.publish_frame(FramePacket::encode_jpeg(pipeline.canvas(), JPEG_QUALITY, tick)?);
            Ok(())
        }
    }
}
