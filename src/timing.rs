use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

pub const HEADER: [&str; 4] = ["Points", "LoadData", "PlotRaw", "PlotSem"];

/// Per-frame timings. Durations are written as seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameTiming {
    #[serde(rename = "Points")]
    pub points: usize,
    #[serde(rename = "LoadData")]
    pub load_data: f64,
    #[serde(rename = "PlotRaw")]
    pub plot_raw: f64,
    #[serde(rename = "PlotSem")]
    pub plot_sem: f64,
}

impl FrameTiming {
    pub fn new(points: usize, load_data: Duration, plot_raw: Duration, plot_sem: Duration) -> Self {
        Self {
            points,
            load_data: load_data.as_secs_f64(),
            plot_raw: plot_raw.as_secs_f64(),
            plot_sem: plot_sem.as_secs_f64(),
        }
    }

    pub fn total(&self) -> f64 {
        self.load_data + self.plot_raw + self.plot_sem
    }
}

/// CSV sink of frame timings.
pub struct TimingLog<W: Write> {
    writer: csv::Writer<W>,
}

impl TimingLog<File> {
    /// Creates `<dir>/<local time>.csv`.
    pub fn create_in(dir: impl AsRef<Path>) -> Result<(Self, PathBuf)> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("unable to create log directory {}", dir.display()))?;

        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = dir.join(format!("{stamp}.csv"));
        let file = File::create(&path)
            .with_context(|| format!("unable to create timing log {}", path.display()))?;
        info!("logging frame timings to {}", path.display());

        Ok((Self::from_writer(file)?, path))
    }
}

impl<W: Write> TimingLog<W> {
    /// Writes the header row right away.
    pub fn from_writer(writer: W) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn record(&mut self, timing: &FrameTiming) -> Result<()> {
        self.writer.serialize(timing)?;
        self.writer.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("unable to flush timing log: {}", err.error()))
    }
}
