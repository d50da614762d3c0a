use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use serde::Serialize;
use snapfind::{
    annotate::FaceBox,
    archive, config,
    crop::{self, CropRatio},
    matcher::{self, MatchOptions},
    segment, storage, Embedding, Pipeline,
};
use snapfind_vision::{model, ModelPaths};

#[derive(Parser)]
#[command(name = "snapfind")]
#[command(version, about = "Find yourself in event photos using a selfie")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long = "config", global = true)]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScanArgs {
    /// Folder of group photos (defaults to `group_folder` in the config)
    #[arg(short, long)]
    folder: Option<PathBuf>,
    /// Maximum face distance for a match, lower is stricter
    #[arg(short, long)]
    tolerance: Option<f32>,
    /// Shrink photos by this factor before face detection
    #[arg(long)]
    downscale: Option<f32>,
    /// Print a JSON summary to stdout
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search group photos for the person in one or more selfies
    Search {
        /// Reference selfie, repeat for several people
        #[arg(short, long = "selfie")]
        selfies: Vec<PathBuf>,
        /// Stored references written by `encode`
        #[arg(long)]
        references: Option<PathBuf>,
        #[command(flatten)]
        scan: ScanArgs,
        /// ZIP archive to write the matches to
        #[arg(short, long, default_value = "matched_photos.zip")]
        output: PathBuf,
    },
    /// Search group photos for either of two people
    Friends {
        selfie_a: PathBuf,
        selfie_b: PathBuf,
        #[command(flatten)]
        scan: ScanArgs,
        /// ZIP archive to write the matches to
        #[arg(short, long, default_value = "friends_photos.zip")]
        output: PathBuf,
    },
    /// Store the face in a selfie for later searches
    Encode {
        selfie: PathBuf,
        /// Reference file to append to
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Cut the subject of a photo out of its background
    RemoveBg {
        input: PathBuf,
        #[arg(short, long, default_value = "background_removed.png")]
        output: PathBuf,
    },
    /// Crop a photo to a fixed aspect ratio
    Crop {
        input: PathBuf,
        /// 1:1, 16:9 or 4:3
        #[arg(short, long, default_value = "1:1")]
        ratio: CropRatio,
        #[arg(short, long, default_value = "cropped_photo.jpg")]
        output: PathBuf,
    },
    /// Open config file in editor
    Config {
        /// Write the default settings first
        #[arg(long)]
        init: bool,
    },
}

#[derive(Serialize)]
struct MatchedSummary {
    file: PathBuf,
    faces: Vec<FaceBox>,
}

#[derive(Serialize)]
struct SkippedSummary {
    file: PathBuf,
    reason: String,
}

#[derive(Serialize)]
struct SearchSummary {
    matched: Vec<MatchedSummary>,
    skipped: Vec<SkippedSummary>,
    archive: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config_file.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Search {
            selfies,
            references,
            scan,
            output,
        } => {
            let stored = match references {
                Some(file) => storage::load_references(&file)
                    .context("Failed to load stored references")?,
                None => Vec::new(),
            };
            search(&cfg, &selfies, stored, &scan, &output, archive::MATCHED_PREFIX)
        }
        Commands::Friends {
            selfie_a,
            selfie_b,
            scan,
            output,
        } => search(
            &cfg,
            &[selfie_a, selfie_b],
            Vec::new(),
            &scan,
            &output,
            archive::FRIENDS_PREFIX,
        ),
        Commands::Encode { selfie, out } => encode(&cfg, &selfie, &out),
        Commands::RemoveBg { input, output } => remove_background(&cfg, &input, &output),
        Commands::Crop {
            input,
            ratio,
            output,
        } => crop_photo(&cfg, &input, ratio, &output),
        Commands::Config { init } => open_config(config_path, init),
    }
}

fn open_pipeline(cfg: &config::Config) -> Result<Pipeline> {
    Pipeline::from_dir(&cfg.model_dir)
        .map(|p| p.with_thresholds(cfg.score_threshold, cfg.nms_threshold))
        .context("Failed to initialize face recognition pipeline")
}

fn search(
    cfg: &config::Config,
    selfies: &[PathBuf],
    references: Vec<Embedding>,
    scan: &ScanArgs,
    output: &Path,
    prefix: &str,
) -> Result<()> {
    let mut opts = MatchOptions::from(cfg);
    if let Some(t) = scan.tolerance {
        opts.tolerance = t;
    }
    if let Some(d) = scan.downscale {
        opts.downscale = d;
    }
    opts.validate()?;

    let folder = scan
        .folder
        .clone()
        .or_else(|| cfg.group_folder.clone())
        .context("No group photo folder: pass --folder or set group_folder in the config")?;

    let mut pipeline = open_pipeline(cfg)?;
    let report = matcher::search(&mut pipeline, selfies, references, &folder, &opts)
        .inspect_err(|e| error!("Search failed: {:#}", e))?;

    let written = archive::save_archive(
        output,
        report.matched.iter().map(|m| &m.image),
        prefix,
        cfg.jpeg_quality,
    )?;
    let archive_path = if written {
        info!("Found {} matched photos!", report.matched.len());
        info!("Wrote {}", output.display());
        Some(output.to_path_buf())
    } else {
        warn!("No matches found.");
        None
    };

    if !report.skipped.is_empty() {
        warn!("{} file(s) could not be processed", report.skipped.len());
    }

    if scan.json {
        let summary = SearchSummary {
            matched: report
                .matched
                .iter()
                .map(|m| MatchedSummary {
                    file: m.path.clone(),
                    faces: m.faces.clone(),
                })
                .collect(),
            skipped: report
                .skipped
                .iter()
                .map(|s| SkippedSummary {
                    file: s.path.clone(),
                    reason: s.reason.clone(),
                })
                .collect(),
            archive: archive_path,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

fn encode(cfg: &config::Config, selfie: &Path, out: &Path) -> Result<()> {
    let mut pipeline = open_pipeline(cfg)?;
    let embedding = matcher::load_reference(&mut pipeline, selfie)?;

    let source = selfie
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let record = storage::ReferenceRecord::new(source, &embedding);
    let id = record.id.clone();
    storage::save_record(out, record).context("Failed to save reference")?;

    info!("✓ Stored reference {} in {}", id, out.display());
    Ok(())
}

fn remove_background(cfg: &config::Config, input: &Path, output: &Path) -> Result<()> {
    let img = matcher::decode(input)?;
    let model_path = ModelPaths::in_dir(&cfg.model_dir).segmenter;
    let mut session = model::segmenter_session(&model_path)?;

    info!("Removing background from {}", input.display());
    let cut = segment::remove_background(&mut session, &img)?;
    cut.save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("writing {}", output.display()))?;

    info!("✓ Background removed: {}", output.display());
    Ok(())
}

fn crop_photo(cfg: &config::Config, input: &Path, ratio: CropRatio, output: &Path) -> Result<()> {
    let img = matcher::decode(input)?;
    let cropped = crop::crop(&img, ratio);
    let jpeg = archive::encode_jpeg(&cropped.to_rgb8(), cfg.jpeg_quality)?;
    std::fs::write(output, jpeg).with_context(|| format!("writing {}", output.display()))?;

    info!(
        "✓ Cropped to {} ({}x{}): {}",
        ratio,
        cropped.width(),
        cropped.height(),
        output.display()
    );
    Ok(())
}

fn open_config(path: Option<&Path>, init: bool) -> Result<()> {
    let config_path = path.unwrap_or(config::CONFIG_PATH.as_path());
    if init || !config_path.exists() {
        config::save_config(&config::Config::default(), Some(config_path))?;
        info!("Wrote settings to {}", config_path.display());
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
