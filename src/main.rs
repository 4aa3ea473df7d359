use anyhow::Context;
use camview_lib::config::AppConfig;
use camview_lib::recorder::RecordingMode;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "camview")]
#[command(version)]
#[command(about = "Record a network camera's live stream")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "camview.json")]
    config: PathBuf,

    /// Camera base URL, e.g. http://192.168.4.1
    #[arg(short, long)]
    device: Option<String>,

    /// Where to record: local or remote (the camera's SD card)
    #[arg(short, long)]
    mode: Option<RecordingMode>,

    /// Directory for local recordings
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Stop automatically after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    camview_lib::init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(device) = cli.device {
        config.device.base_url = device;
    }
    if let Some(mode) = cli.mode {
        config.recording.mode = mode;
    }
    if let Some(output) = cli.output {
        config.recording.output_dir = output;
    }

    camview_lib::run(config, cli.duration.map(Duration::from_secs)).await?;
    Ok(())
}
