// manual_frames daemon
// Frame extraction and step binding for video manuals over a Unix Domain Socket

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use manual_frames::dispatch::{Handler, ManualDispatcher, Request, Response};
use manual_frames::{CommandAnalyzer, FfmpegGrabber, FrameConfig, FrameSize, ManualService, Metrics};

/// Requests larger than this are refused before the body is read.
const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "manual_frames", version, about = "Frame extraction daemon for video manuals")]
struct Args {
    /// Unix socket path for UDS server
    #[arg(long, default_value = "/tmp/manual_frames.sock")]
    socket_path: String,

    /// Directory holding one frame directory per manual
    #[arg(long, default_value = "uploads/frames")]
    frames_root: PathBuf,

    /// Directory uploaded videos are read from
    #[arg(long, default_value = "uploads")]
    uploads_dir: PathBuf,

    /// URL prefix frames are served under
    #[arg(long, default_value = "/frames")]
    public_prefix: String,

    /// ffmpeg binary
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    #[arg(long, default_value_t = 1280)]
    frame_width: u32,

    #[arg(long, default_value_t = 720)]
    frame_height: u32,

    /// JPEG quality passed as -q:v (2-31, lower is better)
    #[arg(long, default_value_t = 2)]
    jpeg_quality: u8,

    /// Completed extractions kept in memory (unbounded when omitted)
    #[arg(long)]
    cache_capacity: Option<usize>,

    /// Per-invocation timeout for ffmpeg and the analyzer, 0 disables it
    #[arg(long, default_value_t = 60)]
    tool_timeout_secs: u64,

    /// Analyzer program; receives the video path as its last argument
    #[arg(long, default_value = "manual-analyzer")]
    analyzer: PathBuf,

    /// Extra arguments passed to the analyzer before the video path
    #[arg(long = "analyzer-arg", allow_hyphen_values = true)]
    analyzer_args: Vec<String>,
}

impl Args {
    fn frame_config(&self) -> FrameConfig {
        let tool_timeout = (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs));
        FrameConfig {
            frames_root: self.frames_root.clone(),
            uploads_dir: self.uploads_dir.clone(),
            public_prefix: self.public_prefix.clone(),
            frame_size: FrameSize {
                width: self.frame_width,
                height: self.frame_height,
            },
            jpeg_quality: self.jpeg_quality,
            cache_capacity: self.cache_capacity,
            tool_timeout,
            ffmpeg_bin: self.ffmpeg.clone(),
            ..FrameConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.frame_config();

    info!("Starting manual_frames daemon");
    info!(
        socket = %args.socket_path,
        frames_root = %config.frames_root.display(),
        uploads_dir = %config.uploads_dir.display(),
        ffmpeg = %config.ffmpeg_bin.display(),
        "Configuration loaded",
    );

    // Track startup time for health checks
    let start_time = std::time::Instant::now();

    tokio::fs::create_dir_all(&config.frames_root)
        .await
        .with_context(|| format!("Failed to create {}", config.frames_root.display()))?;

    let metrics = Metrics::new();
    let grabber = Arc::new(FfmpegGrabber::from_config(&config));
    let analyzer = Arc::new(CommandAnalyzer::new(
        args.analyzer.clone(),
        args.analyzer_args.clone(),
        config.tool_timeout,
    ));
    let service = Arc::new(ManualService::new(config, grabber, analyzer, metrics));
    let dispatcher = Arc::new(ManualDispatcher::new(service));

    info!(functions = dispatcher.describe().functions.len(), "Dispatcher initialized");

    // Remove old socket if exists
    let socket_path = PathBuf::from(&args.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("Failed to remove old socket")?;
    }

    // Create UDS listener
    let listener = UnixListener::bind(&socket_path).context("Failed to bind Unix socket")?;

    info!(socket = %args.socket_path, "Listening");

    // Serve requests
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, dispatcher, start_time).await {
                        error!("Connection error: {:#}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

/// Handle a single UDS connection
async fn handle_connection(
    mut stream: UnixStream,
    dispatcher: Arc<ManualDispatcher>,
    start_time: std::time::Instant,
) -> Result<()> {
    let mut buffer = vec![0u8; 65536]; // 64KB buffer

    loop {
        // Read request length (4 bytes)
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_REQUEST_BYTES {
            anyhow::bail!("Request of {} bytes exceeds the {} byte limit", len, MAX_REQUEST_BYTES);
        }
        if len > buffer.len() {
            buffer.resize(len, 0);
        }

        // Read request body
        stream.read_exact(&mut buffer[..len]).await?;

        let response = match serde_json::from_slice::<Request>(&buffer[..len]) {
            Ok(request) => {
                debug!(op = %request.op, "Received request");
                if request.op == "health" || request.op == "health.check" {
                    Response {
                        ok: true,
                        output: serde_json::json!({
                            "status": "healthy",
                            "service": "manual_frames",
                            "version": env!("CARGO_PKG_VERSION"),
                            "uptime_ms": start_time.elapsed().as_millis() as u64,
                        }),
                        latency_ms: 0,
                    }
                } else {
                    dispatcher.handle(request).await
                }
            }
            Err(e) => Response {
                ok: false,
                output: serde_json::json!({
                    "error": "InvalidRequest",
                    "message": e.to_string(),
                }),
                latency_ms: 0,
            },
        };

        // Serialize response
        let response_bytes = serde_json::to_vec(&response).context("Failed to serialize response")?;

        // Write response length + body
        let len_bytes = (response_bytes.len() as u32).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&response_bytes).await?;
        stream.flush().await?;

        debug!(ok = response.ok, latency_ms = response.latency_ms, "Sent response");
    }
}
