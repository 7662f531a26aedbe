mod colors;
mod config;
mod controls;
mod dataset;
mod gui;
mod loader;
mod player;
mod timing;

use anyhow::{ensure, Result};
use clap::Parser;
use colors::SemanticLut;
use config::{SemKittiConfig, Split};
use dataset::{DatasetOptions, LabelSource, ScanDataset};
use gui::{App, AppOptions};
use kiss3d::{light::Light, window::Window};
use loader::{LoaderOptions, ScanLoader};
use std::{path::PathBuf, time::Duration};
use timing::TimingLog;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Plays SemanticKITTI LiDAR sequences with their semantic labels.
#[derive(Debug, Parser)]
struct Opts {
    /// The dataset root that contains the sequences/ directory.
    #[clap(long, short = 'd')]
    pub dataset: PathBuf,

    /// The dataset config file.
    #[clap(long, short = 'c', default_value = "config/semantic-kitti.yaml")]
    pub config: PathBuf,

    /// The sequence to visualize.
    #[clap(long, short = 's', default_value = "00")]
    pub sequence: String,

    /// Visualize every sequence of a split (train, valid or test) instead
    /// of a single sequence.
    #[clap(long)]
    pub split: Option<Split>,

    /// Alternate label location. Must contain
    /// sequences/<seq>/predictions/*.label.
    #[clap(long, short = 'p')]
    pub predictions: Option<PathBuf>,

    /// Visualize uncolored point clouds.
    #[clap(long, short = 'i')]
    pub ignore_semantics: bool,

    /// Visualize instances too.
    #[clap(long, short = 'o')]
    pub do_instances: bool,

    /// The scan to start from.
    #[clap(long, default_value = "0")]
    pub offset: usize,

    /// Allow label counts that differ from scan and point counts.
    #[clap(long)]
    pub ignore_safety: bool,

    /// Color classes by the class they are trained as.
    #[clap(long)]
    pub color_learning_map: bool,

    /// Enable the burst key that advances many scans at once.
    #[clap(long)]
    pub debug_auto: bool,

    /// Visit the scans in random order.
    #[clap(long)]
    pub shuffle: bool,

    /// Share of the points of each scan that is drawn.
    #[clap(long, default_value = "1.0")]
    pub keep_fraction: f64,

    /// Write per-frame timings to a CSV file.
    #[clap(long)]
    pub log_timing: bool,

    /// The directory of the timing logs.
    #[clap(long, default_value = "timedata")]
    pub log_dir: PathBuf,

    /// Print per-frame timings.
    #[clap(long)]
    pub verbose_runtime: bool,

    /// Seconds between scans during auto advance.
    #[clap(long, default_value = "0.5")]
    pub interval: f64,

    /// Set the plotted point size.
    #[clap(long, default_value = "1.0")]
    pub point_size: f32,

    /// Distance between the raw and semantic clouds.
    #[clap(long, default_value = "120.0")]
    pub panel_gap: f32,
}

impl Opts {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.debug_auto || self.log_timing,
            "--debug-auto requires --log-timing"
        );
        ensure!(
            self.keep_fraction > 0.0 && self.keep_fraction <= 1.0,
            "--keep-fraction must be in (0, 1], got {}",
            self.keep_fraction
        );
        ensure!(
            self.interval > 0.0 && self.interval.is_finite(),
            "--interval must be positive, got {}",
            self.interval
        );
        ensure!(
            !self.do_instances || !self.ignore_semantics,
            "instances are only allowed with semantics"
        );
        ensure!(self.point_size > 0.0, "--point-size must be positive");
        Ok(())
    }

    fn semantics(&self) -> bool {
        !self.ignore_semantics
    }

    fn label_source(&self) -> LabelSource {
        match (&self.predictions, self.semantics()) {
            (_, false) => LabelSource::None,
            (Some(dir), true) => LabelSource::Predictions(dir.clone()),
            (None, true) => LabelSource::Ground,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let opts = Opts::parse();
    opts.validate()?;

    info!("{}", "*".repeat(80));
    info!("INTERFACE:");
    info!("dataset: {}", opts.dataset.display());
    info!("config: {}", opts.config.display());
    match opts.split {
        Some(split) => info!("split: {split}"),
        None => info!("sequence: {}", opts.sequence),
    }
    info!("predictions: {:?}", opts.predictions);
    info!("ignore_semantics: {}", opts.ignore_semantics);
    info!("do_instances: {}", opts.do_instances);
    info!("ignore_safety: {}", opts.ignore_safety);
    info!("color_learning_map: {}", opts.color_learning_map);
    info!("offset: {}", opts.offset);
    info!("debug_auto: {}", opts.debug_auto);
    info!("shuffle: {}", opts.shuffle);
    info!("keep_fraction: {}", opts.keep_fraction);
    info!("log_timing: {}", opts.log_timing);
    info!("log_dir: {}", opts.log_dir.display());
    info!("interval: {}s", opts.interval);
    info!("{}", "*".repeat(80));

    info!("opening config file {}", opts.config.display());
    let config = SemKittiConfig::load(&opts.config)?;
    let lut = SemanticLut::new(&config.color_dict(opts.color_learning_map)?);
    debug!(
        classes = config.labels.len(),
        entries = lut.len(),
        "built semantic color table"
    );

    let dataset_options = DatasetOptions {
        ignore_safety: opts.ignore_safety,
        keep_fraction: opts.keep_fraction,
        instances: opts.do_instances,
    };
    let dataset = match opts.split {
        Some(split) => ScanDataset::from_split(
            &opts.dataset,
            &config,
            split,
            opts.label_source(),
            lut,
            dataset_options,
        )?,
        None => ScanDataset::from_sequence(
            &opts.dataset,
            &opts.sequence,
            opts.label_source(),
            lut,
            dataset_options,
        )?,
    };
    ensure!(
        !dataset.is_empty(),
        "no scans found in {}",
        opts.dataset.display()
    );
    let loader = ScanLoader::new(
        dataset,
        LoaderOptions {
            offset: opts.offset,
            shuffle: opts.shuffle,
        },
    );

    let timing_log = if opts.log_timing {
        let (log, _path) = TimingLog::create_in(&opts.log_dir)?;
        Some(log)
    } else {
        None
    };

    let mut window = Window::new_with_size(env!("CARGO_BIN_NAME"), 1600, 600);
    window.set_light(Light::StickToCamera);
    window.set_point_size(opts.point_size);

    let app = App::build(
        loader,
        timing_log,
        AppOptions {
            semantics: opts.semantics(),
            instances: opts.do_instances,
            debug_auto: opts.debug_auto,
            verbose_runtime: opts.verbose_runtime,
            interval: Duration::from_secs_f64(opts.interval),
            panel_gap: opts.panel_gap,
        },
    )?;

    for line in controls::HELP.lines() {
        info!("{line}");
    }
    if opts.debug_auto {
        info!("{}", controls::DEBUG_HELP);
    }

    window.render_loop(app);

    Ok(())
}
