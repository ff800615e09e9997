//! CLI Entry Point for meal-kiosk
//!
//! Provides command-line access to the kiosk core:
//! - One capture with simulated devices, uploaded to the configured endpoint
//! - A calibration run against a simulated load cell
//! - Inspection of a stored RGBD container
//!
//! # Usage
//!
//! ```bash
//! meal-kiosk capture --user-id 7 --meal-type before_meal
//! meal-kiosk calibrate --object-weight 500
//! meal-kiosk inspect record/20240501/20240501080309_7_before_meal.npz
//! ```
//!
//! Real camera and load cell drivers implement `DepthSource` / `LoadCell` and
//! are wired in by the kiosk application; this binary always uses mocks.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use meal_kiosk::calibration::{CalibrationEvent, Key};
use meal_kiosk::capture::User;
use meal_kiosk::config::{KioskConfig, DEFAULT_CONFIG_PATH};
use meal_kiosk::config_store::TomlConfigStore;
use meal_kiosk::hardware::mock::{MockDepthCamera, MockLoadCell, MockScaleHandle};
use meal_kiosk::storage::read_container;
use meal_kiosk::upload::HttpUploader;
use meal_kiosk::{logging, Kiosk};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "meal-kiosk")]
#[command(about = "RGB-D + weight meal capture kiosk core", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log to the terminal at debug level instead of the daily log file
    #[arg(long = "show-log", visible_alias = "show_log", global = true)]
    show_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one meal with simulated sensors and upload it
    Capture {
        /// Server-side user id
        #[arg(long)]
        user_id: u64,

        /// Meal type, e.g. before_meal or after_meal
        #[arg(long)]
        meal_type: String,

        /// Load placed on the simulated scale
        #[arg(long, default_value_t = 250.0)]
        load: f64,
    },

    /// Calibrate the simulated load cell with a reference object
    Calibrate {
        /// Weight of the reference object
        #[arg(long)]
        object_weight: f64,
    },

    /// Print the contents of an RGBD container
    Inspect {
        /// Path to a .npz capture
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = KioskConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.application.show_log |= cli.show_log;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::Capture {
            user_id,
            meal_type,
            load,
        } => run_capture(config, &cli.config, user_id, &meal_type, load).await,
        Commands::Calibrate { object_weight } => {
            run_calibration(config, &cli.config, object_weight).await
        }
        Commands::Inspect { file } => inspect(&file),
    }
}

async fn start_kiosk(config: KioskConfig, config_path: &Path) -> Result<(Kiosk, MockScaleHandle)> {
    let cell = MockLoadCell::default().with_noise(2.0);
    let scale = cell.handle();
    let uploader = Arc::new(HttpUploader::new(&config.api)?);
    let store = Arc::new(TomlConfigStore::new(config_path));

    let kiosk = Kiosk::start(
        config,
        Box::new(MockDepthCamera::default()),
        Some(Box::new(cell)),
        uploader,
        store,
    )
    .await?;
    kiosk.wait_until_ready().await?;
    Ok((kiosk, scale))
}

async fn run_capture(
    config: KioskConfig,
    config_path: &Path,
    user_id: u64,
    meal_type: &str,
    load: f64,
) -> Result<()> {
    let (kiosk, scale) = start_kiosk(config, config_path).await?;
    scale.set_load(load);

    let committed = kiosk.capture(meal_type, &User::with_id(user_id)).await?;
    println!("Saved {}", committed.record.file_path.display());
    println!("   weight: {:.1}", committed.record.weight);

    let outcome = committed.upload.outcome().await;
    match &outcome.error {
        None => println!("Upload: {:?}", outcome.status),
        Some(e) => println!("Upload: {:?} ({})", outcome.status, e),
    }

    kiosk.shutdown().await?;
    Ok(())
}

async fn run_calibration(config: KioskConfig, config_path: &Path, object_weight: f64) -> Result<()> {
    if !(object_weight.is_finite() && object_weight > 0.0) {
        bail!("object weight must be positive");
    }
    let (kiosk, scale) = start_kiosk(config, config_path).await?;
    let mut routine = kiosk.calibration()?;

    scale.set_load(0.0);
    routine.trigger()?;
    println!("Sampling empty platform...");
    drive_sampling(&mut routine).await?;

    scale.set_load(object_weight);
    for c in object_weight.to_string().chars() {
        let key = match c {
            '.' => Key::Point,
            d => Key::Digit(d.to_digit(10).context("unexpected character in weight")? as u8),
        };
        routine.press(key)?;
    }
    routine.press(Key::Confirm)?;
    println!("Sampling with {} on the platform...", object_weight);
    drive_sampling(&mut routine).await?;

    if let Some(reference_unit) = routine.state().computed_reference_unit {
        println!("Reference unit: {:.4}", reference_unit);
    }
    routine.acknowledge().await?;
    kiosk.shutdown().await?;
    Ok(())
}

async fn drive_sampling(routine: &mut meal_kiosk::calibration::CalibrationRoutine) -> Result<()> {
    while let Some(event) = routine.advance().await? {
        match event {
            CalibrationEvent::Sample {
                collected, total, value, ..
            } if collected % 10 == 0 || collected == total => {
                println!("   {:>3}/{} raw {:.1}", collected, total, value);
            }
            CalibrationEvent::PhaseSampled { .. } => break,
            _ => {}
        }
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let container = read_container(path)?;
    let (height, width) = container.resolution();
    println!("{}", path.display());
    println!("   rgb_image:   {:?}", container.rgb_image.shape());
    println!("   depth_image: {:?}", container.depth_image.shape());
    println!("   resolution:  {}x{}", width, height);
    match container.depth_scale {
        Some(scale) => println!("   depth_scale: {}", scale),
        None => println!("   depth_scale: (absent)"),
    }
    println!("   fx, fy:      {}, {}", container.fx, container.fy);
    if let (Some(ppx), Some(ppy)) = (container.ppx, container.ppy) {
        println!("   ppx, ppy:    {}, {}", ppx, ppy);
    }
    Ok(())
}
