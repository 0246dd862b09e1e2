#![deny(warnings)]

mod console;

use anyhow::Context;
use clap::Parser;
use moody_mirror_core::analysis::{AnalysisService, CannedAnalysisService, HttpAnalysisService};
use moody_mirror_core::capture::{FrameDirectoryCamera, FrameEncoding, ImageFormat, ImageFrameRenderer};
use moody_mirror_core::config::{
    resolve_endpoint, resolve_interval, resolve_page_url, resolve_string_with_default,
    AnalysisBackend, AppConfig, StdEnv, DEFAULT_FRAMES_DIR, ENV_FRAMES_DIR,
};
use moody_mirror_core::present::ChannelSink;
use moody_mirror_core::session::{Collaborators, Session, SessionSettings};
use moody_mirror_core::share::{CommandShare, ShareTarget};
use moody_mirror_core::speech::{CommandSpeech, SilentSpeech, SpeechOutput};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const RENDER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "moody-mirror")]
#[command(about = "A mirror that roasts the face in front of it")]
struct Args {
    /// Analysis service URL (falls back to MOODY_MIRROR_ENDPOINT).
    #[arg(long)]
    endpoint: Option<String>,

    /// Milliseconds between automatic captures (falls back to MOODY_MIRROR_INTERVAL_MS).
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Directory of still images standing in for the camera.
    #[arg(long)]
    frames_dir: Option<String>,

    #[arg(long, default_value_t = 0.7)]
    jpeg_quality: f32,

    /// Send lossless PNG frames instead of JPEG.
    #[arg(long)]
    png: bool,

    /// espeak-compatible speech program.
    #[arg(long, default_value = "espeak")]
    speech_command: String,

    #[arg(long)]
    mute: bool,

    /// Command receiving shared roasts on stdin, e.g. "xclip -selection clipboard".
    #[arg(long, env = "MOODY_MIRROR_SHARE_COMMAND")]
    share_command: Option<String>,

    /// Link appended to shared roasts (falls back to MOODY_MIRROR_PAGE_URL).
    #[arg(long)]
    page_url: Option<String>,

    #[arg(long)]
    request_timeout_ms: Option<u64>,

    /// Roast from the built-in table instead of calling the service.
    #[arg(long)]
    offline: bool,

    /// Start the mirror without waiting for a command.
    #[arg(long)]
    autostart: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let speech = speech_output(&args);
    let share = args
        .share_command
        .as_deref()
        .and_then(CommandShare::from_command_line)
        .map(|share| Arc::new(share) as Arc<dyn ShareTarget>);
    let autostart = args.autostart;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        endpoint = %cfg.endpoint.url(),
        interval_ms = cfg.interval.period_ms,
        backend = ?cfg.backend,
        frames_dir = %cfg.frames_dir.display(),
        "config loaded"
    );

    let analysis = analysis_service(&cfg).await?;
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let renderer = tokio::spawn(console::render(rx, std::io::stdout()));

    let session = Session::new(
        SessionSettings::from_app(&cfg),
        Collaborators {
            camera: Arc::new(FrameDirectoryCamera::new(cfg.frames_dir.clone())),
            renderer: Arc::new(ImageFrameRenderer::new()),
            analysis,
            speech,
            sink: Arc::new(ChannelSink::new(tx)),
            share,
        },
    );

    if autostart {
        if let Err(e) = session.start().await {
            tracing::warn!(error = %e, "autostart failed");
        }
    }

    run_commands(&session).await?;

    shut_down(session, renderer).await;
    Ok(())
}

/// Stops the session and lets the console print what it already received.
/// An outstanding manual cycle keeps the sink open, so waiting is bounded.
async fn shut_down<W>(session: Session, renderer: JoinHandle<W>) -> Option<W> {
    session.stop();
    drop(session);
    match tokio::time::timeout(RENDER_DRAIN, renderer).await {
        Ok(Ok(out)) => Some(out),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "console renderer failed");
            None
        }
        Err(_) => {
            tracing::debug!("console renderer still busy at exit");
            None
        }
    }
}

async fn analysis_service(cfg: &AppConfig) -> anyhow::Result<Arc<dyn AnalysisService>> {
    match cfg.backend {
        AnalysisBackend::Canned => {
            tracing::info!("offline mode, roasting from the built-in table");
            Ok(Arc::new(CannedAnalysisService::new()))
        }
        AnalysisBackend::Remote => {
            let http = HttpAnalysisService::new(cfg.endpoint.clone(), cfg.request_timeout)
                .context("failed to build http client")?;
            match http.probe().await {
                Ok(health) if health.is_active() => tracing::info!(
                    endpoint = %http.endpoint().url(),
                    detail = health.message.as_deref().unwrap_or_default(),
                    "analysis service is up"
                ),
                Ok(health) => tracing::warn!(
                    endpoint = %http.endpoint().url(),
                    status = %health.status,
                    "analysis service reports not active"
                ),
                Err(e) => tracing::warn!(
                    endpoint = %http.endpoint().url(),
                    error = %e,
                    "analysis service health check failed"
                ),
            }
            Ok(Arc::new(http))
        }
    }
}

fn speech_output(args: &Args) -> Arc<dyn SpeechOutput> {
    if args.mute {
        Arc::new(SilentSpeech)
    } else {
        Arc::new(CommandSpeech::new(args.speech_command.clone()))
    }
}

/// Reads one command per stdin line until `quit` or end of input.
async fn run_commands(session: &Session) -> anyhow::Result<()> {
    console::print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        match line.trim() {
            "" => {}
            "start" => {
                if let Err(e) = session.start().await {
                    tracing::debug!(error = %e, "start failed");
                }
            }
            "stop" => session.stop(),
            "toggle" | "t" => {
                if let Err(e) = session.toggle().await {
                    tracing::debug!(error = %e, "toggle failed");
                }
            }
            "roast" | "r" => {
                let session = session.clone();
                tokio::spawn(async move {
                    let outcome = session.force_cycle().await;
                    tracing::debug!(?outcome, "manual roast finished");
                });
            }
            "karma" | "k" => {
                session.toggle_karma_mode();
            }
            "share" | "s" => {
                let outcome = session.share().await;
                tracing::debug!(?outcome, "share finished");
            }
            "status" => console::print_snapshot(&session.snapshot()),
            "help" | "?" => console::print_help(),
            "quit" | "q" | "exit" => break,
            other => println!("unknown command: {other} (try `help`)"),
        }
    }
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: Args, env: &impl moody_mirror_core::config::Env) -> anyhow::Result<AppConfig> {
    let endpoint = resolve_endpoint(args.endpoint, env)?;
    let mut cfg = AppConfig::with_endpoint(endpoint);

    cfg.interval = resolve_interval(args.interval_ms, env)?;
    cfg.page_url = resolve_page_url(args.page_url, env)?;
    cfg.frames_dir = PathBuf::from(resolve_string_with_default(
        args.frames_dir,
        ENV_FRAMES_DIR,
        env,
        DEFAULT_FRAMES_DIR,
    ));

    let format = if args.png {
        ImageFormat::Png
    } else {
        ImageFormat::Jpeg
    };
    cfg.encoding = FrameEncoding::new(format, args.jpeg_quality)?;
    cfg.request_timeout = args.request_timeout_ms.map(Duration::from_millis);
    if args.offline {
        cfg.backend = AnalysisBackend::Canned;
    }
    Ok(cfg)
}
