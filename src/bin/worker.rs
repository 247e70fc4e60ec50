use armb::{DisplayMode, RenderOutcome, RenderSettings, Renderer, Worker};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Placeholder host renderer for the standalone binary: a real integration
/// supplies its own `Renderer` and drives `Worker` directly as a library.
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

    fn render_frame(&mut self, _frame: i64, _output_path: &std::path::Path) -> RenderOutcome {
        RenderOutcome::Cancelled
    }

    fn poll_render(&mut self) -> Option<RenderOutcome> {
        None
    }

    fn filename_extension(&self) -> &str {
        ".png"
    }
}

#[derive(Parser, Debug)]
#[command(name = "armb-worker", about = "Accept ARMB render jobs from a supervisor")]
struct Cli {
    /// Port to listen on for the supervisor's connection
    #[arg(long, default_value_t = 7210)]
    port: u16,

    /// Directory rendered frames are read from and written to
    #[arg(long)]
    output_dir: PathBuf,

    /// Per-message timeout, in seconds, before a stalled connection is dropped
    #[arg(long, default_value_t = 10)]
    msg_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> armb::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let renderer = NullRenderer {
        settings: RenderSettings::new(1920, 1080, 100, DisplayMode::Area),
    };

    let mut worker = Worker::bind(
        cli.port,
        cli.output_dir,
        Duration::from_secs(cli.msg_timeout_secs),
        Box::new(renderer),
    )
    .await?;

    tracing::info!(port = cli.port, "listening for supervisor connection");

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        ticker.tick().await;
        worker.tick();

        if !worker.ok() {
            tracing::error!("worker entered an unrecoverable error state, exiting");
            break;
        }
    }

    Ok(())
}
