use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camera_effects::camera::backend::CameraBackend;
use camera_effects::camera::dummy::DummyBackend;
use camera_effects::{settings, MethodCall, MethodChannel, SessionController};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "camfx-probe")]
#[command(about = "Drive a camera-effects session against the simulated camera")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the simulated cameras
    List,

    /// Take a photo through the effects pipeline
    Photo {
        /// Camera to use: front or back
        #[arg(short, long, default_value = "back")]
        lens: String,

        /// Colour preset to apply (sepia, grayscale, negative, ...)
        #[arg(short, long)]
        filter: Option<String>,

        /// Output file path (default: the gallery directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record a video through the effects pipeline
    Video {
        /// Camera to use: front or back
        #[arg(short, long, default_value = "back")]
        lens: String,

        /// Recording duration in seconds
        #[arg(short, long, default_value = "3")]
        duration: u64,

        /// Output file path (default: the configured output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=camera_effects=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let backend: Arc<dyn CameraBackend> = Arc::new(DummyBackend::new());

    if let Commands::List = cli.command {
        for device in backend.enumerate_devices()? {
            println!(
                "{}\t{}\t{:?}\tflash={}\tmax_zoom={}",
                device.id, device.name, device.lens, device.has_flash, device.max_zoom
            );
        }
        return Ok(());
    }

    let config = settings::load_from_env()?;
    let session = SessionController::new(backend, config).spawn();
    let channel = MethodChannel::new(session);

    let result = match cli.command {
        Commands::List => Value::Null,
        Commands::Photo {
            lens,
            filter,
            output,
        } => {
            open(&channel, &lens).await?;
            if let Some(preset) = filter {
                call(
                    &channel,
                    "setFilter",
                    json!({
                        "filterId": preset,
                        "filterType": "colorMatrix",
                        "intensity": 1.0,
                        "params": { "preset": preset },
                    }),
                )
                .await?;
            }
            let mut photo = call(
                &channel,
                "takePhoto",
                json!({ "saveToGallery": output.is_none(), "path": output }),
            )
            .await?;
            // The encoded image is already on disk.
            if let Some(map) = photo.as_object_mut() {
                map.remove("bytes");
            }
            photo
        }
        Commands::Video {
            lens,
            duration,
            output,
        } => {
            open(&channel, &lens).await?;
            call(&channel, "startRecording", json!({ "path": output })).await?;
            tokio::time::sleep(Duration::from_secs(duration)).await;
            call(&channel, "stopRecording", json!({})).await?
        }
    };

    let diagnostics = call(&channel, "getDiagnostics", Value::Null).await?;
    call(&channel, "dispose", Value::Null).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    Ok(())
}

async fn open(channel: &MethodChannel, lens: &str) -> Result<(), Box<dyn std::error::Error>> {
    call(channel, "initialize", json!({ "lens": lens })).await?;
    call(channel, "startPreview", Value::Null).await?;
    Ok(())
}

async fn call(
    channel: &MethodChannel,
    method: &str,
    arguments: Value,
) -> Result<Value, Box<dyn std::error::Error>> {
    tracing::debug!(method, "calling");
    Ok(channel.call(MethodCall::new(method, arguments)).await?)
}
