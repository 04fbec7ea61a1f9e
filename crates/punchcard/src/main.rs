use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use punchcard_core::enroll::enroll_folder;
use punchcard_core::notify::LogNotifier;
use punchcard_core::recognition::GalleryRecognizer;
use punchcard_core::{AttendanceRegistry, ChannelNotifier, Gallery, SystemClock};
use punchcard_hw::Camera;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod encoder;
mod engine;
mod replay;
mod status;

use config::Config;
use encoder::ExternalEncoder;

#[derive(Parser)]
#[command(name = "punchcard", about = "Webcam face-recognition attendance tracker")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an attendance session; Ctrl-C ends it and writes the report
    Run,
    /// Encode reference images and list enrolled employees
    Enroll,
    /// Replay recorded detections (JSON lines) and write the report
    Replay {
        /// Detection log, one JSON object per line
        events: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Enroll => {
            let (_, registry) = enroll(&config, &mut encoder(&config)?)?;
            for employee in registry.employees() {
                println!("{}", employee.name());
            }
            Ok(())
        }
        Commands::Replay { events } => {
            let mut registry = AttendanceRegistry::new(config.repeat_punch);
            registry.add_notifier(LogNotifier);
            // Anyone named in the images folder is an employee; no encoder needed.
            for path in punchcard_core::enroll::reference_images(&config.images_dir)? {
                if let Some(label) = path.file_stem().and_then(|s| s.to_str()) {
                    registry.add_employee_if_absent(label);
                }
            }
            let registry = registry.into_shared();

            let file = std::fs::File::open(&events)
                .with_context(|| format!("opening {}", events.display()))?;
            replay::replay(std::io::BufReader::new(file), &registry)?;
            engine::export(&registry, &config.report_dir);
            Ok(())
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for dev in devices {
                println!("{}\t{}\t{} ({})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
    }
}

fn encoder(config: &Config) -> Result<ExternalEncoder> {
    match &config.encoder_cmd {
        Some(cmd) => Ok(ExternalEncoder::new(cmd.clone())),
        None => bail!("no face encoder configured; set PUNCHCARD_ENCODER_CMD or encoder_cmd"),
    }
}

fn enroll(config: &Config, encoder: &mut ExternalEncoder) -> Result<(Gallery, AttendanceRegistry)> {
    let mut gallery = Gallery::new();
    let mut registry = AttendanceRegistry::new(config.repeat_punch);

    let summary = enroll_folder(
        &config.images_dir,
        &config.encodings_dir,
        encoder,
        &mut gallery,
        &mut registry,
    )?;
    if !summary.skipped.is_empty() {
        tracing::warn!(skipped = ?summary.skipped, "reference images without a usable face");
    }
    Ok((gallery, registry))
}

async fn run(config: Config) -> Result<()> {
    let session_id = uuid::Uuid::new_v4();
    tracing::info!(%session_id, "punchcard starting");

    let mut encoder = encoder(&config)?;
    let (gallery, mut registry) = enroll(&config, &mut encoder)?;
    if gallery.is_empty() {
        bail!("no employees enrolled from {}", config.images_dir.display());
    }

    let (notifier, events) = ChannelNotifier::new();
    registry.add_notifier(notifier);
    let registry = registry.into_shared();

    let board = tokio::spawn(status::run_status_board(
        events,
        registry.clone(),
        config.sound_enabled,
        config.status_board,
        std::io::stdout(),
    ));

    let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
    let recognizer = GalleryRecognizer::new(
        encoder,
        gallery,
        config.frame_scale,
        config.match_tolerance,
    );
    let source = engine::CameraSource {
        camera,
        warmup_frames: config.warmup_frames,
    };
    let session = engine::Session::start(
        source,
        recognizer,
        registry.clone(),
        Arc::new(SystemClock),
    )?;
    tracing::info!(%session_id, "session running; press Ctrl-C to stop");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let finished = engine::finish_session(session, shutdown, &registry, &config.report_dir).await;
    board.abort();

    let punches = finished?;
    tracing::info!(%session_id, punches, "session finished");
    Ok(())
}
