//! Draft Lens CLI
//!
//! `detect` runs one pass over a saved screenshot. `monitor` replays a
//! directory of frames through the gate monitor and prints one JSON event
//! per line.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use draft_lens::config::{validate_regions, GateAnchor, Settings};
use draft_lens::detection::{annotate, MatchRecord};
use draft_lens::monitor::{AnchorProbe, Monitor};
use draft_lens::vision::DirectorySource;
use draft_lens::DraftScanner;

#[derive(Parser)]
#[command(name = "draftlens", version, about = "Draft-screen portrait recognition")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one detection pass on a screenshot
    Detect {
        #[command(flatten)]
        common: CommonArgs,
        /// Screenshot to analyse (defaults to the calibration's screen_path)
        #[arg(long)]
        screen: Option<PathBuf>,
        /// Directory for matches.json and annotated.png
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
    },
    /// Replay frames through the gate monitor
    Monitor {
        #[command(flatten)]
        common: CommonArgs,
        /// Directory of frames, replayed in file-name order
        #[arg(long)]
        frames: PathBuf,
        #[arg(long, default_value = "anchor_config.json")]
        anchor_config: PathBuf,
        #[arg(long, default_value = "anchor.png")]
        anchor_image: PathBuf,
        /// Start over after the last frame
        #[arg(long)]
        repeat: bool,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Template library directory
    #[arg(long, default_value = "templates")]
    templates: PathBuf,
    /// Slot calibration file
    #[arg(long, default_value = "roi_config.json")]
    roi_config: PathBuf,
    /// Banned marker image; skipped when the file is missing
    #[arg(long, default_value = "banned.png")]
    marker: PathBuf,
    /// Threshold overrides (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Use the whole-window gate tuning
    #[arg(long)]
    window_preset: bool,
}

impl CommonArgs {
    fn settings(&self) -> Result<Settings> {
        match &self.settings {
            Some(path) => Settings::load(path).context("failed to load settings"),
            None if self.window_preset => Ok(Settings::window_preset()),
            None => Ok(Settings::default()),
        }
    }

    fn scanner(&self) -> Result<DraftScanner> {
        DraftScanner::from_paths(
            self.settings()?,
            &self.templates,
            &self.roi_config,
            Some(&self.marker),
        )
        .context("failed to initialise detection")
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Detect {
            common,
            screen,
            out_dir,
        } => detect(&common, screen, &out_dir),
        Command::Monitor {
            common,
            frames,
            anchor_config,
            anchor_image,
            repeat,
        } => monitor(&common, &frames, &anchor_config, &anchor_image, repeat),
    }
}

fn detect(common: &CommonArgs, screen: Option<PathBuf>, out_dir: &Path) -> Result<()> {
    let scanner = common.scanner()?;

    let screen = screen
        .or_else(|| scanner.calibration().screen_file(common.roi_config.parent()))
        .context("no screenshot given and the calibration has no screen_path")?;
    let frame = image::open(&screen)
        .with_context(|| format!("cannot read screenshot {}", screen.display()))?
        .to_rgba8();

    let (width, height) = frame.dimensions();
    let regions = scanner.calibration().slot_regions(width, height);
    if let Err(e) = validate_regions(&regions, width, height) {
        log::warn!("Calibration does not fit this screenshot: {}", e);
    }

    let report = scanner.scan(&frame)?;
    let record = MatchRecord::new(&report, scanner.settings().clean_limit);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let json_path = out_dir.join("matches.json");
    std::fs::write(&json_path, record.to_json()?)
        .with_context(|| format!("failed to write {}", json_path.display()))?;

    let overlay_path = out_dir.join("annotated.png");
    annotate(&frame, &report)
        .save(&overlay_path)
        .with_context(|| format!("failed to write {}", overlay_path.display()))?;

    for slot in &record.results {
        log::info!("slot {}: {}", slot.slot, slot.label);
    }
    log::info!(
        "Wrote {} and {}",
        json_path.display(),
        overlay_path.display()
    );
    Ok(())
}

fn monitor(
    common: &CommonArgs,
    frames: &Path,
    anchor_config: &Path,
    anchor_image: &Path,
    repeat: bool,
) -> Result<()> {
    let scanner = common.scanner()?;
    let gate = scanner.settings().gate.clone();

    let anchor = GateAnchor::load(anchor_config, anchor_image)
        .context("failed to load gate anchor")?
        .with_base_size(scanner.calibration().base_size);
    let probe = AnchorProbe::from_settings(anchor, &gate);
    let source = DirectorySource::open(frames)?.repeating(repeat);

    let handle = Monitor::new(source, probe, Arc::new(scanner), gate)
        .spawn()
        .context("failed to start monitor")?;

    // the channel closes once the loop and its last pass are done
    while let Ok(event) = handle.events().recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    handle.join();
    Ok(())
}
