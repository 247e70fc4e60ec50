use armb::{DisplayMode, LocalWorker, RenderJob, RenderSettings, Renderer, Supervisor};
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Placeholder host renderer for the standalone binary: a real integration
/// (Blender or otherwise) supplies its own `Renderer` and drives `Supervisor`
/// directly as a library instead of going through this CLI.
struct NullRenderer {
    settings: RenderSettings,
}

impl Renderer for NullRenderer {
    fn create_render_settings(&self) -> RenderSettings {
        self.settings.clone()
    }

    fn apply_render_settings(&mut self, settings: &RenderSettings) {
        self.settings = settings.clone();
    }

    fn render_frame(&mut self, _frame: i64, _output_path: &std::path::Path) -> armb::RenderOutcome {
        armb::RenderOutcome::Cancelled
    }

    fn poll_render(&mut self) -> Option<armb::RenderOutcome> {
        None
    }

    fn filename_extension(&self) -> &str {
        ".png"
    }
}

#[derive(Parser, Debug)]
#[command(name = "armb-supervisor", about = "Coordinate an ARMB render farm")]
struct Cli {
    /// Directory rendered frames are written to
    #[arg(long)]
    output_dir: PathBuf,

    /// Per-message timeout, in seconds, before a stalled connection is dropped
    #[arg(long, default_value_t = 10)]
    msg_timeout_secs: u64,

    /// First frame of the job
    #[arg(long)]
    frame_start: i64,

    /// Last frame of the job
    #[arg(long)]
    frame_end: i64,

    #[arg(long, default_value_t = 1920)]
    resolution_x: i32,

    #[arg(long, default_value_t = 1080)]
    resolution_y: i32,

    #[arg(long, default_value_t = 100)]
    percentage: i32,

    #[arg(long, default_value = "AREA")]
    display_mode: String,

    /// A worker to dial, as host:port; may be passed more than once
    #[arg(long = "worker")]
    workers: Vec<SocketAddr>,

    /// Whether the supervisor itself also renders frames
    #[arg(long, action = ArgAction::SetTrue, default_value_t = true, overrides_with = "no_local_worker")]
    local_worker: bool,

    /// Disable the supervisor's embedded local worker
    #[arg(long, action = ArgAction::SetTrue, overrides_with = "local_worker")]
    no_local_worker: bool,
}

#[tokio::main]
async fn main() -> armb::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let local_worker_enabled = cli.local_worker && !cli.no_local_worker;
    let msg_timeout = Duration::from_secs(cli.msg_timeout_secs);
    let display_mode = display_mode_from_str(&cli.display_mode);

    let renderer = NullRenderer {
        settings: RenderSettings::new(cli.resolution_x, cli.resolution_y, cli.percentage, display_mode),
    };
    let mut supervisor = Supervisor::new(cli.output_dir, msg_timeout, LocalWorker::new(Box::new(renderer)));
    supervisor.set_local_worker_enabled(local_worker_enabled);

    for address in &cli.workers {
        supervisor.add_worker(*address).await;
    }

    let job = RenderJob::new(
        cli.frame_start,
        cli.frame_end,
        RenderSettings::new(cli.resolution_x, cli.resolution_y, cli.percentage, display_mode),
        msg_timeout,
    );
    supervisor.start_job(job);

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        ticker.tick().await;
        supervisor.tick();

        if supervisor.job().map_or(true, RenderJob::uploading_complete) {
            tracing::info!("job complete");
            break;
        }
    }

    Ok(())
}

fn display_mode_from_str(s: &str) -> DisplayMode {
    match s {
        "WINDOW" => DisplayMode::Window,
        "NONE" => DisplayMode::None,
        "SCREEN" => DisplayMode::Screen,
        "PREFERENCES" => DisplayMode::Preferences,
        _ => DisplayMode::Area,
    }
}
