// THEORY:
// The visualizer is the browser-facing half of the flow engine. It never touches
// the estimator itself. The process driving the pipeline publishes rendered
// canvases and per-tick metadata on a `FrameBus`, and the visualizer fans them out
// to every connected page over a WebSocket. The page talks back through plain HTTP
// POSTs that land on `watch` channels in a `ControlHandle`. The driver reads those
// channels once per tick, so a slider drag becomes a new config snapshot on the
// next frame and never in the middle of one.
//
// Everything except `start_server` compiles without the `web` feature, so drivers
// can depend on the bus and control types unconditionally.

use flowfield::core_modules::utils::image_helper;
use flowfield::{FlowConfig, FlowData, HistogramBounds, OutlierRule};
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, RgbaImage};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    Png,
}

impl FrameFormat {
    pub fn mime(self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
            FrameFormat::Png => "image/png",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FramePacket {
    pub ts_millis: u64,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Arc<[u8]>,
}

impl FramePacket {
    /// Encodes a rendered canvas as JPEG. Alpha is dropped; the canvas is opaque anyway.
    pub fn encode_jpeg(canvas: &RgbaImage, quality: u8, ts_millis: u64) -> Result<Self, image::ImageError> {
        let rgb: RgbImage = canvas.convert();
        let mut data = Vec::new();
        JpegEncoder::new_with_quality(&mut data, quality).encode_image(&rgb)?;
        Ok(Self {
            ts_millis,
            width: canvas.width(),
            height: canvas.height(),
            format: FrameFormat::Jpeg,
            data: data.into(),
        })
    }

    /// Lossless variant, for snapshots.
    pub fn encode_png(canvas: &RgbaImage, ts_millis: u64) -> Result<Self, image::ImageError> {
        Ok(Self {
            ts_millis,
            width: canvas.width(),
            height: canvas.height(),
            format: FrameFormat::Png,
            data: image_helper::encode_png(canvas)?.into(),
        })
    }
}

/// The user-adjustable subset of `FlowConfig`, as sent by the page's controls.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "web", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowSettings {
    pub quality: u32,
    pub max_flow: f64,
    pub min_flow: f64,
    pub transparency: f64,
    pub monochrome: bool,
    pub histogram: bool,
    pub outlier_rule: OutlierRule,
    pub histogram_bounds: HistogramBounds,
}

impl From<&FlowConfig> for FlowSettings {
    fn from(config: &FlowConfig) -> Self {
        Self {
            quality: config.quality,
            max_flow: config.max_flow,
            min_flow: config.min_flow,
            transparency: config.transparency,
            monochrome: config.monochrome,
            histogram: config.histogram,
            outlier_rule: config.outlier_rule,
            histogram_bounds: config.histogram_bounds,
        }
    }
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self::from(&FlowConfig::default())
    }
}

impl FlowSettings {
    /// Overlays these settings on `base`, keeping the fields the page cannot change.
    pub fn apply(&self, base: &FlowConfig) -> FlowConfig {
        FlowConfig {
            quality: self.quality,
            max_flow: self.max_flow,
            min_flow: self.min_flow,
            transparency: self.transparency,
            monochrome: self.monochrome,
            histogram: self.histogram,
            outlier_rule: self.outlier_rule,
            histogram_bounds: self.histogram_bounds,
            ..base.clone()
        }
    }
}

/// Per-tick summary shown next to the video.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "web", derive(serde::Serialize, serde::Deserialize))]
pub struct Meta {
    pub tick: u64,
    pub zone_count: usize,
    pub drawn: usize,
    pub dropped: u32,
    pub histogram: Vec<u32>,
    pub settings: FlowSettings,
}

impl Meta {
    pub fn from_flow(tick: u64, data: &FlowData, settings: FlowSettings) -> Self {
        let (histogram, dropped) = match &data.histogram {
            Some(histogram) => (histogram.bins().to_vec(), histogram.dropped()),
            None => (Vec::new(), 0),
        };
        Self {
            tick,
            zone_count: data.vectors.len(),
            drawn: data.drawn,
            dropped,
            histogram,
            settings,
        }
    }
}

#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<FramePacket>,
    pub meta_tx: broadcast::Sender<Meta>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        let (meta_tx, _) = broadcast::channel::<Meta>(capacity.max(1));
        Self { frames_tx, meta_tx }
    }

    /// Returns false when nobody is watching.
    pub fn publish_frame(&self, packet: FramePacket) -> bool {
        self.frames_tx.send(packet).is_ok()
    }

    pub fn publish_meta(&self, meta: Meta) -> bool {
        self.meta_tx.send(meta).is_ok()
    }

    pub fn has_viewers(&self) -> bool {
        self.frames_tx.receiver_count() > 0
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Legend image edge length in pixels.
    pub legend_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            legend_size: 100,
        }
    }
}

#[derive(Clone)]
pub struct ControlHandle {
    pub play_tx: watch::Sender<bool>,
    pub settings_tx: watch::Sender<FlowSettings>,
}

/// The driver's side of a `ControlHandle`.
pub struct ControlReceivers {
    pub play_rx: watch::Receiver<bool>,
    pub settings_rx: watch::Receiver<FlowSettings>,
}

impl ControlHandle {
    pub fn new(playing: bool, settings: FlowSettings) -> (Self, ControlReceivers) {
        let (play_tx, play_rx) = watch::channel(playing);
        let (settings_tx, settings_rx) = watch::channel(settings);
        (Self { play_tx, settings_tx }, ControlReceivers { play_rx, settings_rx })
    }
}

#[cfg(feature = "web")]
pub async fn start_server(bus: FrameBus, cfg: ServerConfig, control: ControlHandle) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::http::{StatusCode, header};
    use axum::response::{Html, IntoResponse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use flowfield::core_modules::legend::render_legend;
    use flowfield::pipeline::{MAX_FLOW_RANGE, MIN_FLOW_RANGE, QUALITY_RANGE};
    use futures_util::{SinkExt, StreamExt};
    use leptos::*;
    use log::{debug, error, info, warn};
    use tokio::sync::broadcast::error::RecvError;

    #[component]
    fn App(settings: FlowSettings, legend_size: u32) -> impl IntoView {
        let row = "display:flex; gap:8px; align-items:center; font-family:monospace; font-size:12px;";
        view! {
            <main>
                <h2>"Flowfield Visualizer"</h2>
                <div style="margin: 8px 0; display:flex; gap:12px; align-items:center;">
                    <button id="btn-play" style="padding:6px 12px;">"Play"</button>
                    <button id="btn-pause" style="padding:6px 12px;">"Pause"</button>
                    <span id="status" style="font-family:monospace; font-size:12px; color:#777">"idle"</span>
                    <span id="flow-points" style="font-family:monospace; font-size:12px;">"Flow points: 0"</span>
                </div>
                <div style="display:flex; gap:16px; align-items:flex-start;">
                    <canvas id="preview" width="1280" height="720" style="border:1px solid #444"></canvas>
                    <div id="controls" style="display:flex; flex-direction:column; gap:6px;">
                        <label style=row>"Quality"
                            <input type="range" id="quality"
                                min={QUALITY_RANGE.start().to_string()} max={QUALITY_RANGE.end().to_string()}
                                value={settings.quality.to_string()}/>
                        </label>
                        <label style=row>"Max flow"
                            <input type="range" id="max-flow"
                                min={MAX_FLOW_RANGE.start().to_string()} max={MAX_FLOW_RANGE.end().to_string()}
                                value={settings.max_flow.to_string()}/>
                        </label>
                        <label style=row>"Min flow"
                            <input type="range" id="min-flow"
                                min={MIN_FLOW_RANGE.start().to_string()} max={MIN_FLOW_RANGE.end().to_string()}
                                value={settings.min_flow.to_string()}/>
                        </label>
                        <label style=row>"Transparency %"
                            <input type="range" id="transparency" min="0" max="100"
                                value={(settings.transparency * 100.0).round().to_string()}/>
                        </label>
                        <label style=row>
                            <input type="checkbox" id="monochrome" checked={settings.monochrome}/>"Monochrome"
                        </label>
                        <label style=row>
                            <input type="checkbox" id="histogram" checked={settings.histogram}/>"Histogram"
                        </label>
                        <label style=row>
                            <input type="checkbox" id="outlier-any-axis"
                                checked={settings.outlier_rule == OutlierRule::AnyAxis}/>"Replace outliers"
                        </label>
                        <label style=row>
                            <input type="checkbox" id="histogram-clamp"
                                checked={settings.histogram_bounds == HistogramBounds::Clamp}/>"Clamp histogram"
                        </label>
                        <img src="/legend.png" alt="direction legend"
                            width={legend_size.to_string()} height={legend_size.to_string()}/>
                        <span id="dropped" style=row>"Outside histogram: 0"</span>
                    </div>
                </div>
                <script src="/client.js"></script>
            </main>
        }
    }

    const CLIENT_JS: &str = r#"(function(){
        const $ = (id)=> document.getElementById(id);
        const status = (t)=>{ const el=$('status'); if(el) el.textContent=t; };
        const btnPlay = $('btn-play');
        const btnPause = $('btn-pause');
        if(btnPlay){ btnPlay.onclick = ()=> fetch('/control/play', { method:'POST' }).then(()=>status('playing')); }
        if(btnPause){ btnPause.onclick = ()=> fetch('/control/pause', { method:'POST' }).then(()=>status('paused')); }
        const pushSettings = ()=>{
            const body = {
                quality: +$('quality').value,
                max_flow: +$('max-flow').value,
                min_flow: +$('min-flow').value,
                transparency: +$('transparency').value / 100,
                monochrome: $('monochrome').checked,
                histogram: $('histogram').checked,
                outlier_rule: $('outlier-any-axis').checked ? 'AnyAxis' : 'Literal',
                histogram_bounds: $('histogram-clamp').checked ? 'Clamp' : 'Drop',
            };
            fetch('/control/settings', { method:'POST', headers:{'Content-Type':'application/json'}, body: JSON.stringify(body) })
                .then((r)=>{ if(!r.ok) r.text().then((t)=>status('rejected: '+t)); });
        };
        document.querySelectorAll('#controls input').forEach((el)=> el.addEventListener('change', pushSettings));
        const canvas = $('preview');
        const ctx = canvas.getContext('2d');
        const ws = new WebSocket((location.protocol==='https:'?'wss://':'ws://')+location.host+'/ws/frames');
        ws.binaryType='arraybuffer';
        ws.onopen = ()=> status('connected');
        ws.onclose = ()=> status('disconnected');
        ws.onmessage = async (ev)=>{
            if(ev.data instanceof ArrayBuffer){
                const bmp = await createImageBitmap(new Blob([ev.data], {type:'image/jpeg'}));
                if(canvas.width!==bmp.width || canvas.height!==bmp.height){ canvas.width=bmp.width; canvas.height=bmp.height; }
                ctx.drawImage(bmp, 0, 0);
                return;
            }
            const meta = JSON.parse(ev.data);
            $('flow-points').textContent = 'Flow points: ' + meta.zone_count;
            $('dropped').textContent = 'Outside histogram: ' + meta.dropped;
        };
    })();"#;

    fn render_page(settings: FlowSettings, legend_size: u32) -> Html<String> {
        let body = leptos::ssr::render_to_string(move || view! { <App settings=settings legend_size=legend_size/> });
        Html(format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Flowfield Visualizer</title></head><body>{body}</body></html>"
        ))
    }

    async fn stream_frames(socket: WebSocket, bus: FrameBus) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let mut frames_rx = bus.frames_tx.subscribe();
        let mut meta_rx = bus.meta_tx.subscribe();
        debug!("frame stream client connected");

        loop {
            let outgoing = tokio::select! {
                frame = frames_rx.recv() => match frame {
                    Ok(packet) => Message::Binary(packet.data.to_vec()),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("client lagging, skipped {skipped} frames");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                meta = meta_rx.recv() => match meta {
                    Ok(meta) => match serde_json::to_string(&meta) {
                        Ok(text) => Message::Text(text),
                        Err(e) => {
                            warn!("failed to serialise frame metadata: {e}");
                            continue;
                        }
                    },
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                },
            };
            if ws_tx.send(outgoing).await.is_err() {
                break;
            }
        }
        debug!("frame stream client disconnected");
    }

    let legend_png: Arc<[u8]> = image_helper::encode_png(&render_legend(cfg.legend_size))?.into();
    let legend_size = cfg.legend_size;

    let page_settings = control.settings_tx.clone();
    let bus_ws = bus.clone();
    let app = Router::new()
        .route("/", get(move || {
            let settings = *page_settings.borrow();
            async move { render_page(settings, legend_size) }
        }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/client.js", get(|| async {
            ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS)
        }))
        .route("/legend.png", get(move || {
            let png = Arc::clone(&legend_png);
            async move { ([(header::CONTENT_TYPE, FrameFormat::Png.mime())], png.to_vec()) }
        }))
        .route("/ws/frames", get(move |ws: WebSocketUpgrade| {
            let bus = bus_ws.clone();
            async move { ws.on_upgrade(move |socket| stream_frames(socket, bus)) }
        }))
        .route("/control/play", post({
            let tx = control.play_tx.clone();
            move || {
                let tx = tx.clone();
                async move { let _ = tx.send(true); StatusCode::NO_CONTENT }
            }
        }))
        .route("/control/pause", post({
            let tx = control.play_tx.clone();
            move || {
                let tx = tx.clone();
                async move { let _ = tx.send(false); StatusCode::NO_CONTENT }
            }
        }))
        .route("/control/settings", post({
            let tx = control.settings_tx.clone();
            move |Json(settings): Json<FlowSettings>| {
                let tx = tx.clone();
                async move {
                    match settings.apply(&FlowConfig::default()).validate() {
                        Ok(()) => {
                            tx.send_replace(settings);
                            StatusCode::NO_CONTENT.into_response()
                        }
                        Err(e) => {
                            warn!("rejected settings from client: {e}");
                            (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
                        }
                    }
                }
            }
        }));

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!("Visualizer server listening on http://{}", cfg.bind_addr);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("visualizer server stopped: {e}");
        }
    });

    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(_bus: FrameBus, _cfg: ServerConfig, _control: ControlHandle) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for flowfield_visualizer"))
}
