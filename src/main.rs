use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use wmsdetect::detection::yolo::DEFAULT_INPUT_SIZE;
use wmsdetect::pipeline::DEFAULT_WORKERS;
use wmsdetect::wms::{DEFAULT_FORMAT, DEFAULT_TILE_SIZE};
use wmsdetect::{
    Crs, TileConfig, WmsClient, WmsVersion, YoloDetector, create_train_val_split,
    process_all_tiles_in_parallel, read_and_filter_shapefile,
};

#[derive(Parser)]
#[command(name = "wmsdetect")]
#[command(about = "Detect objects on WMS tiles and export them as shapefiles")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch one tile per input geometry, run the model and write bbox_<i>.shp files
    Detect {
        /// Shapefile whose geometry bounds define the tiles
        #[arg(long, value_name = "SHP")]
        tiles: PathBuf,

        /// Base URL of the WMS endpoint
        #[arg(long, value_name = "URL")]
        wms_url: String,

        /// Layer to request
        #[arg(long)]
        layer: String,

        /// Detection model (.rten)
        #[arg(long, value_name = "FILE")]
        model: PathBuf,

        /// Directory for shapefiles and temporary rasters
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Spatial reference of the tile geometries and requests
        #[arg(long, default_value = "EPSG:32633", value_parser = Crs::from_str)]
        srs: Crs,

        /// Width and height of each requested tile in pixels
        #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        size: u32,

        /// Image format requested from the WMS
        #[arg(long, default_value = DEFAULT_FORMAT)]
        format: String,

        /// WMS protocol version (1.1.1 or 1.3.0)
        #[arg(long, default_value = "1.1.1", value_parser = WmsVersion::from_str)]
        wms_version: WmsVersion,

        /// Minimum detection confidence
        #[arg(long, default_value_t = 0.5, value_parser = validate_unit)]
        confidence: f64,

        /// Number of tiles processed concurrently
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Square input size of the model
        #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        imgsz: u32,

        /// Save annotated tiles to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },

    /// Write train.txt / val.txt manifests for an image directory
    Split {
        /// Directory containing the images
        #[arg(long, value_name = "DIR")]
        images_dir: PathBuf,

        /// Directory receiving train.txt and val.txt
        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Share of images listed in train.txt
        #[arg(long, default_value_t = 0.8, value_parser = validate_unit)]
        train_ratio: f64,

        /// Seed for a reproducible shuffle
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the number of features in a shapefile
    Inspect {
        #[arg(value_name = "SHP")]
        path: PathBuf,
    },
}

// Validate that the value is between 0.0 and 1.0
fn validate_unit(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("value must be between 0.0 and 1.0".to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match args.command {
        Command::Detect {
            tiles,
            wms_url,
            layer,
            model,
            output_dir,
            srs,
            size,
            format,
            wms_version,
            confidence,
            workers,
            imgsz,
            debug_out,
        } => {
            let Some(features) = read_and_filter_shapefile(&tiles)? else {
                info!("{} has no features, nothing to do", tiles.display());
                return Ok(());
            };
            let geometries: Vec<_> = features.into_iter().map(|(shape, _)| shape).collect();

            std::fs::create_dir_all(&output_dir)?;

            let mut config = TileConfig::new()
                .with_srs(srs)
                .with_size(size, size)
                .with_format(format)
                .with_version(wms_version)
                .with_confidence(confidence as f32)
                .with_workers(workers);
            if let Some(debug_dir) = debug_out {
                config = config.with_debug(debug_dir)?;
            }

            info!("Loading model: {}", model.display());
            let detector = YoloDetector::load(&model)?.with_input_size(imgsz)?;
            let wms = WmsClient::new(wms_url)?;

            let outcomes = process_all_tiles_in_parallel(
                &geometries,
                Arc::new(wms),
                &layer,
                Arc::new(detector),
                &output_dir,
                &config,
            )
            .await?;

            let total: usize = outcomes.iter().map(|o| o.detections).sum();
            println!("\n=== Detection Results ===");
            println!("Tiles processed: {}", outcomes.len());
            println!("Total detections: {}", total);
            if args.verbose {
                for outcome in &outcomes {
                    if let Some(path) = &outcome.shapefile {
                        println!(
                            "  Tile {}: {} detections -> {}",
                            outcome.index,
                            outcome.detections,
                            path.display()
                        );
                    }
                }
            }
        }

        Command::Split {
            images_dir,
            output_dir,
            train_ratio,
            seed,
        } => {
            let summary = create_train_val_split(&images_dir, &output_dir, train_ratio, seed)?;
            println!(
                "{}: {} images\n{}: {} images",
                summary.train_file.display(),
                summary.train_count,
                summary.val_file.display(),
                summary.val_count
            );
        }

        Command::Inspect { path } => match read_and_filter_shapefile(&path)? {
            Some(features) => println!("{}: {} features", path.display(), features.len()),
            None => println!("{}: no features", path.display()),
        },
    }

    Ok(())
}
