use crate::{
    colors::{self, SemanticLut},
    config::{SemKittiConfig, Split},
};
use anyhow::{bail, ensure, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use itertools::Itertools;
use nalgebra::Point3;
use pcd_rs::Field;
use rand::seq::SliceRandom;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

const SCAN_DIR: &str = "velodyne";
const LABEL_DIR: &str = "labels";
const PREDICTION_DIR: &str = "predictions";
const LABEL_EXT: &str = "label";

/// One loaded scan with its display colors.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub name: String,
    pub points: Vec<Point3<f32>>,
    pub remissions: Vec<f32>,
    pub labels: Vec<u32>,
    pub range_colors: Vec<Point3<f32>>,
    pub semantic_colors: Vec<Point3<f32>>,
    pub instance_colors: Option<Vec<Point3<f32>>>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Where per-point labels come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    None,
    Ground,
    Predictions(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub ignore_safety: bool,
    pub keep_fraction: f64,
    pub instances: bool,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            ignore_safety: false,
            keep_fraction: 1.0,
            instances: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    scan: PathBuf,
    label: Option<PathBuf>,
    labeled: bool,
}

/// The scans of one or more SemanticKITTI sequences.
#[derive(Debug)]
pub struct ScanDataset {
    entries: Vec<Entry>,
    lut: SemanticLut,
    options: DatasetOptions,
}

impl ScanDataset {
    pub fn from_sequence(
        root: impl AsRef<Path>,
        sequence: &str,
        labels: LabelSource,
        lut: SemanticLut,
        options: DatasetOptions,
    ) -> Result<Self> {
        let sequence = normalize_sequence(sequence)?;
        let entries = sequence_entries(root.as_ref(), &sequence, &labels, &options)?;
        Ok(Self {
            entries,
            lut,
            options,
        })
    }

    /// Every sequence listed under `split` in the config. The test split
    /// has no labels whatever `labels` says.
    pub fn from_split(
        root: impl AsRef<Path>,
        config: &SemKittiConfig,
        split: Split,
        labels: LabelSource,
        lut: SemanticLut,
        options: DatasetOptions,
    ) -> Result<Self> {
        let labels = match split {
            Split::Test => LabelSource::None,
            Split::Train | Split::Valid => labels,
        };

        let mut entries = vec![];
        for &sequence in config.sequences(split) {
            let sequence = format!("{sequence:02}");
            entries.extend(sequence_entries(
                root.as_ref(),
                &sequence,
                &labels,
                &options,
            )?);
        }
        info!("split {split} has {} scans", entries.len());

        Ok(Self {
            entries,
            lut,
            options,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Frame> {
        let Some(entry) = self.entries.get(index) else {
            bail!("scan index {index} is out of range (len {})", self.len());
        };

        let (mut points, mut remissions) = read_scan(&entry.scan)?;
        let mut labels = match &entry.label {
            Some(path) => read_labels(path)?,
            None => vec![],
        };

        if entry.labeled && labels.len() != points.len() {
            ensure!(
                self.options.ignore_safety,
                "{} has {} labels for {} points",
                entry.scan.display(),
                labels.len(),
                points.len()
            );
            warn!(
                "{}: {} labels for {} points",
                entry.scan.display(),
                labels.len(),
                points.len()
            );
        }
        labels.resize(points.len(), 0);

        // range colors are normalized over the whole scan
        let mut range_colors = colors::range_colors(&points);

        if self.options.keep_fraction < 1.0 {
            let mask = keep_mask(points.len(), self.options.keep_fraction);
            points = apply_mask(points, &mask);
            remissions = apply_mask(remissions, &mask);
            labels = apply_mask(labels, &mask);
            range_colors = apply_mask(range_colors, &mask);
        }

        let semantic_colors = self.lut.colors(&labels);
        let instance_colors = self
            .options
            .instances
            .then(|| colors::instance_colors(&labels));

        Ok(Frame {
            index,
            name: file_stem(&entry.scan),
            points,
            remissions,
            labels,
            range_colors,
            semantic_colors,
            instance_colors,
        })
    }
}

/// Sequence names are two digit numbers, "4" becomes "04".
pub fn normalize_sequence(sequence: &str) -> Result<String> {
    let number: u32 = sequence
        .trim()
        .parse()
        .with_context(|| format!("invalid sequence '{sequence}'"))?;
    Ok(format!("{number:02}"))
}

fn sequence_entries(
    root: &Path,
    sequence: &str,
    labels: &LabelSource,
    options: &DatasetOptions,
) -> Result<Vec<Entry>> {
    let scan_dir = root.join("sequences").join(sequence).join(SCAN_DIR);
    ensure!(
        scan_dir.is_dir(),
        "sequence folder {} doesn't exist",
        scan_dir.display()
    );
    info!("using scans from {}", scan_dir.display());
    let scans = list_files(&scan_dir, &["bin", "pcd"])?;

    let label_dir = match labels {
        LabelSource::None => None,
        LabelSource::Ground => Some(root.join("sequences").join(sequence).join(LABEL_DIR)),
        LabelSource::Predictions(dir) => {
            Some(dir.join("sequences").join(sequence).join(PREDICTION_DIR))
        }
    };

    let Some(label_dir) = label_dir else {
        return Ok(scans
            .into_iter()
            .map(|scan| Entry {
                scan,
                label: None,
                labeled: false,
            })
            .collect());
    };

    ensure!(
        label_dir.is_dir(),
        "labels folder {} doesn't exist",
        label_dir.display()
    );
    info!("using labels from {}", label_dir.display());

    let label_count = list_files(&label_dir, &[LABEL_EXT])?.len();
    if label_count != scans.len() {
        ensure!(
            options.ignore_safety,
            "{} has {label_count} label files for {} scans",
            label_dir.display(),
            scans.len()
        );
        warn!(
            "{} has {label_count} label files for {} scans",
            label_dir.display(),
            scans.len()
        );
    }

    let entries = scans
        .into_iter()
        .map(|scan| {
            let path = label_dir.join(format!("{}.{LABEL_EXT}", file_stem(&scan)));
            let label = (path.is_file() || path.is_symlink()).then_some(path);
            Entry {
                scan,
                label,
                labeled: true,
            }
        })
        .collect();
    Ok(entries)
}

fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<_> = dir
        .read_dir()
        .with_context(|| format!("unable to read directory {}", dir.display()))?
        .map(|entry| -> Result<_> {
            let entry = entry?;
            let file_type = entry.file_type()?;

            if !(file_type.is_file() || file_type.is_symlink()) {
                return Ok(None);
            }

            let path = entry.path();

            let Some(ext) = path.extension() else {
                return Ok(None);
            };
            if !extensions.iter().any(|&allowed| ext == allowed) {
                return Ok(None);
            }

            Ok(Some(path))
        })
        .filter_map(|path| path.transpose())
        .try_collect()?;
    files.sort_unstable();
    debug!("{} files in {}", files.len(), dir.display());
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads a scan as points and remissions, by file extension.
pub fn read_scan(path: &Path) -> Result<(Vec<Point3<f32>>, Vec<f32>)> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("pcd") => read_pcd_scan(path),
        _ => {
            let bytes = fs::read(path)
                .with_context(|| format!("unable to read scan {}", path.display()))?;
            decode_bin_scan(&bytes)
                .with_context(|| format!("invalid scan file {}", path.display()))
        }
    }
}

/// KITTI velodyne layout: x, y, z, remission as little-endian f32.
pub fn decode_bin_scan(bytes: &[u8]) -> Result<(Vec<Point3<f32>>, Vec<f32>)> {
    ensure!(
        bytes.len() % 16 == 0,
        "scan size {} is not a multiple of 16 bytes",
        bytes.len()
    );

    let mut values = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(bytes, &mut values);

    let (points, remissions) = values
        .chunks_exact(4)
        .map(|chunk| (Point3::new(chunk[0], chunk[1], chunk[2]), chunk[3]))
        .unzip();
    Ok((points, remissions))
}

fn read_pcd_scan(path: &Path) -> Result<(Vec<Point3<f32>>, Vec<f32>)> {
    let reader = pcd_rs::DynReader::open(path)
        .with_context(|| format!("unable to open scan {}", path.display()))?;

    let pairs: Vec<(Point3<f32>, f32)> = reader
        .map(|record| {
            let record = record?;
            let remission = match record.0.get(3) {
                Some(Field::F32(value)) => value.first().copied().unwrap_or(0.0),
                _ => 0.0,
            };
            let xyz: Option<[f32; 3]> = record.to_xyz();
            let Some(xyz) = xyz else {
                bail!("point without x, y, z fields in {}", path.display());
            };
            Ok((Point3::from(xyz), remission))
        })
        .try_collect()?;

    Ok(pairs.into_iter().unzip())
}

pub fn read_labels(path: &Path) -> Result<Vec<u32>> {
    let bytes =
        fs::read(path).with_context(|| format!("unable to read labels {}", path.display()))?;
    decode_labels(&bytes).with_context(|| format!("invalid label file {}", path.display()))
}

/// One little-endian u32 per point.
pub fn decode_labels(bytes: &[u8]) -> Result<Vec<u32>> {
    ensure!(
        bytes.len() % 4 == 0,
        "label size {} is not a multiple of 4 bytes",
        bytes.len()
    );
    let mut labels = vec![0u32; bytes.len() / 4];
    LittleEndian::read_u32_into(bytes, &mut labels);
    Ok(labels)
}

/// Drops `floor(len * (1 - keep_fraction))` randomly chosen points.
fn keep_mask(len: usize, keep_fraction: f64) -> Vec<bool> {
    let dropped = (len as f64 * (1.0 - keep_fraction)) as usize;
    let mut mask = vec![true; len];
    mask[..dropped.min(len)].iter_mut().for_each(|keep| *keep = false);
    mask.shuffle(&mut rand::thread_rng());
    mask
}

fn apply_mask<T>(values: Vec<T>, mask: &[bool]) -> Vec<T> {
    values
        .into_iter()
        .zip(mask)
        .filter_map(|(value, &keep)| keep.then_some(value))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// A fresh directory under the system temp dir, removed on drop.
    pub(crate) struct ScratchDir(PathBuf);

    impl std::ops::Deref for ScratchDir {
        type Target = Path;

        fn deref(&self) -> &Path {
            &self.0
        }
    }

    impl AsRef<Path> for ScratchDir {
        fn as_ref(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    pub(crate) fn scratch_dir(name: &str) -> ScratchDir {
        let dir = std::env::temp_dir().join(format!(
            "semkitti-player-{}-{name}",
            std::process::id()
        ));
        if dir.exists() {
            fs::remove_dir_all(&dir).unwrap();
        }
        fs::create_dir_all(&dir).unwrap();
        ScratchDir(dir)
    }

    pub(crate) fn encode_scan(points: &[[f32; 4]]) -> Vec<u8> {
        points
            .iter()
            .flatten()
            .flat_map(|value| value.to_le_bytes())
            .collect()
    }

    pub(crate) fn encode_labels(labels: &[u32]) -> Vec<u8> {
        labels.iter().flat_map(|label| label.to_le_bytes()).collect()
    }

    /// Writes a sequence with `scans` frames of `points` points each.
    pub(crate) fn write_sequence(root: &Path, sequence: &str, scans: usize, points: usize) {
        let seq_dir = root.join("sequences").join(sequence);
        fs::create_dir_all(seq_dir.join(SCAN_DIR)).unwrap();
        fs::create_dir_all(seq_dir.join(LABEL_DIR)).unwrap();

        for scan in 0..scans {
            let cloud: Vec<[f32; 4]> = (0..points)
                .map(|i| [scan as f32 + 1.0, i as f32, 0.0, 0.5])
                .collect();
            let labels: Vec<u32> = (0..points as u32).map(|i| (i << 16) | 10).collect();
            fs::write(
                seq_dir.join(SCAN_DIR).join(format!("{scan:06}.bin")),
                encode_scan(&cloud),
            )
            .unwrap();
            fs::write(
                seq_dir.join(LABEL_DIR).join(format!("{scan:06}.label")),
                encode_labels(&labels),
            )
            .unwrap();
        }
    }

    pub(crate) fn test_lut() -> SemanticLut {
        SemanticLut::new(&BTreeMap::from([(0, [0, 0, 0]), (10, [255, 0, 0])]))
    }

    #[test]
    fn decode_kitti_scan() -> Result<()> {
        let bytes = encode_scan(&[[1.0, 2.0, 3.0, 0.25], [-1.0, 0.0, 0.5, 1.0]]);
        let (points, remissions) = decode_bin_scan(&bytes)?;
        assert_eq!(points, vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-1.0, 0.0, 0.5)]);
        assert_eq!(remissions, vec![0.25, 1.0]);

        assert!(decode_bin_scan(&bytes[..10]).is_err());
        Ok(())
    }

    #[test]
    fn decode_label_words() -> Result<()> {
        let labels = decode_labels(&encode_labels(&[10, (3 << 16) | 40]))?;
        assert_eq!(labels, vec![10, (3 << 16) | 40]);
        assert!(decode_labels(&[0, 1, 2]).is_err());
        Ok(())
    }

    #[test]
    fn sequence_names_are_two_digits() -> Result<()> {
        assert_eq!(normalize_sequence("0")?, "00");
        assert_eq!(normalize_sequence("08")?, "08");
        assert_eq!(normalize_sequence("21")?, "21");
        assert!(normalize_sequence("ab").is_err());
        Ok(())
    }

    #[test]
    fn load_sequence_with_labels() -> Result<()> {
        let root = scratch_dir("load-sequence");
        write_sequence(&root, "04", 3, 5);

        let dataset = ScanDataset::from_sequence(
            &root,
            "4",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions {
                instances: true,
                ..Default::default()
            },
        )?;
        assert_eq!(dataset.len(), 3);

        let frame = dataset.get(1)?;
        assert_eq!(frame.index, 1);
        assert_eq!(frame.name, "000001");
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.remissions, vec![0.5; 5]);
        assert_eq!(frame.labels[2], (2 << 16) | 10);
        assert_eq!(frame.range_colors.len(), 5);
        assert_eq!(frame.semantic_colors[0], Point3::new(0.0, 0.0, 1.0));
        assert_eq!(frame.instance_colors.as_ref().map(Vec::len), Some(5));

        assert!(dataset.get(3).is_err());
        Ok(())
    }

    #[test]
    fn unlabeled_sequence_has_zero_labels() -> Result<()> {
        let root = scratch_dir("unlabeled");
        write_sequence(&root, "00", 2, 4);
        fs::remove_dir_all(root.join("sequences/00/labels"))?;

        let dataset = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::None,
            test_lut(),
            DatasetOptions::default(),
        )?;
        let frame = dataset.get(0)?;
        assert_eq!(frame.labels, vec![0; 4]);
        assert_eq!(frame.semantic_colors, vec![Point3::origin(); 4]);
        assert!(frame.instance_colors.is_none());
        Ok(())
    }

    #[test]
    fn missing_folders_are_errors() {
        let root = scratch_dir("missing");
        write_sequence(&root, "00", 1, 1);

        let lut = test_lut;
        let opts = DatasetOptions::default;
        assert!(
            ScanDataset::from_sequence(&root, "01", LabelSource::None, lut(), opts()).is_err()
        );
        let err = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Predictions(root.join("preds")),
            lut(),
            opts(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("predictions"));
    }

    #[test]
    fn label_count_mismatch_needs_ignore_safety() -> Result<()> {
        let root = scratch_dir("safety");
        write_sequence(&root, "00", 2, 3);
        fs::remove_file(root.join("sequences/00/labels/000001.label"))?;

        let strict = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions::default(),
        );
        assert!(strict.is_err());

        let lenient = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions {
                ignore_safety: true,
                ..Default::default()
            },
        )?;
        assert_eq!(lenient.get(1)?.labels, vec![0; 3]);
        Ok(())
    }

    #[test]
    fn short_label_file_needs_ignore_safety() -> Result<()> {
        let root = scratch_dir("short-labels");
        write_sequence(&root, "00", 1, 3);
        fs::write(
            root.join("sequences/00/labels/000000.label"),
            encode_labels(&[10]),
        )?;

        let strict = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions::default(),
        )?;
        assert!(strict.get(0).is_err());

        let lenient = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions {
                ignore_safety: true,
                ..Default::default()
            },
        )?;
        assert_eq!(lenient.get(0)?.labels, vec![10, 0, 0]);
        Ok(())
    }

    #[test]
    fn split_concatenates_sequences() -> Result<()> {
        let root = scratch_dir("split");
        write_sequence(&root, "00", 2, 1);
        write_sequence(&root, "01", 3, 1);
        let config = SemKittiConfig::from_yaml(
            "color_map: {0: [0, 0, 0]}\nsplit: {train: [0, 1], valid: [], test: [1]}",
        )?;

        let train = ScanDataset::from_split(
            &root,
            &config,
            Split::Train,
            LabelSource::Ground,
            test_lut(),
            DatasetOptions::default(),
        )?;
        assert_eq!(train.len(), 5);
        assert_eq!(train.get(4)?.labels, vec![10]);

        let test = ScanDataset::from_split(
            &root,
            &config,
            Split::Test,
            LabelSource::Ground,
            test_lut(),
            DatasetOptions::default(),
        )?;
        assert_eq!(test.len(), 3);
        assert_eq!(test.get(0)?.labels, vec![0]);
        Ok(())
    }

    #[test]
    fn split_without_label_folders() -> Result<()> {
        let root = scratch_dir("split-unlabeled");
        write_sequence(&root, "00", 2, 3);
        write_sequence(&root, "01", 1, 3);
        fs::remove_dir_all(root.join("sequences/00/labels"))?;
        fs::remove_dir_all(root.join("sequences/01/labels"))?;
        let config = SemKittiConfig::from_yaml(
            "color_map: {0: [0, 0, 0]}\nsplit: {train: [0, 1]}",
        )?;

        let ground = ScanDataset::from_split(
            &root,
            &config,
            Split::Train,
            LabelSource::Ground,
            test_lut(),
            DatasetOptions::default(),
        );
        assert!(ground.is_err());

        let unlabeled = ScanDataset::from_split(
            &root,
            &config,
            Split::Train,
            LabelSource::None,
            test_lut(),
            DatasetOptions::default(),
        )?;
        assert_eq!(unlabeled.len(), 3);
        assert_eq!(unlabeled.get(2)?.labels, vec![0; 3]);
        Ok(())
    }

    #[test]
    fn split_reads_predictions_per_sequence() -> Result<()> {
        let root = scratch_dir("split-predictions");
        write_sequence(&root, "00", 1, 2);
        write_sequence(&root, "01", 1, 2);
        let preds = root.join("preds");
        for sequence in ["00", "01"] {
            let dir = preds.join("sequences").join(sequence).join(PREDICTION_DIR);
            fs::create_dir_all(&dir)?;
            fs::write(dir.join("000000.label"), encode_labels(&[40, 40]))?;
        }
        let config = SemKittiConfig::from_yaml(
            "color_map: {0: [0, 0, 0]}\nsplit: {valid: [0, 1]}",
        )?;

        let dataset = ScanDataset::from_split(
            &root,
            &config,
            Split::Valid,
            LabelSource::Predictions(preds),
            test_lut(),
            DatasetOptions::default(),
        )?;
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.get(0)?.labels, vec![40, 40]);
        assert_eq!(dataset.get(1)?.labels, vec![40, 40]);
        Ok(())
    }

    #[test]
    fn keep_fraction_keeps_full_scan_range_colors() -> Result<()> {
        let root = scratch_dir("keep-fraction-colors");
        write_sequence(&root, "00", 1, 40);

        let full = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions::default(),
        )?
        .get(0)?;
        let half = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions {
                keep_fraction: 0.5,
                ..Default::default()
            },
        )?
        .get(0)?;

        assert_eq!(half.len(), 20);
        assert_eq!(half.range_colors.len(), 20);
        for (point, color) in half.points.iter().zip(&half.range_colors) {
            let index = full
                .points
                .iter()
                .position(|full_point| full_point == point)
                .unwrap();
            assert_eq!(*color, full.range_colors[index]);
        }
        Ok(())
    }

    #[test]
    fn keep_fraction_drops_points() -> Result<()> {
        let root = scratch_dir("keep-fraction");
        write_sequence(&root, "00", 1, 10);

        let dataset = ScanDataset::from_sequence(
            &root,
            "00",
            LabelSource::Ground,
            test_lut(),
            DatasetOptions {
                keep_fraction: 0.75,
                ..Default::default()
            },
        )?;
        let frame = dataset.get(0)?;
        assert_eq!(frame.len(), 8);
        assert_eq!(frame.remissions.len(), 8);
        assert_eq!(frame.labels.len(), 8);
        assert_eq!(frame.semantic_colors.len(), 8);
        Ok(())
    }

    #[test]
    fn mask_keeps_requested_share() {
        assert_eq!(keep_mask(10, 1.0), vec![true; 10]);
        assert_eq!(keep_mask(10, 0.5).iter().filter(|&&keep| keep).count(), 5);
        assert_eq!(apply_mask(vec![1, 2, 3], &[true, false, true]), vec![1, 3]);
    }
}
