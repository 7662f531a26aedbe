use crate::config::Bgr;
use nalgebra::Point3;
use palette::{FromColor, Hsv, Mix, Srgb};
use std::{collections::BTreeMap, sync::OnceLock};

/// Viridis sampled at 0.0, 0.1, ..., 1.0, in sRGB.
const VIRIDIS_ANCHORS: [[u8; 3]; 11] = [
    [0x44, 0x01, 0x54],
    [0x48, 0x24, 0x75],
    [0x41, 0x44, 0x87],
    [0x35, 0x5f, 0x8d],
    [0x2a, 0x78, 0x8e],
    [0x21, 0x91, 0x8c],
    [0x22, 0xa8, 0x84],
    [0x44, 0xbf, 0x70],
    [0x7a, 0xd1, 0x51],
    [0xbd, 0xdf, 0x26],
    [0xfd, 0xe7, 0x25],
];

/// Range compression exponent applied before normalization.
const RANGE_POWER: f32 = 16.0;

/// Extra rows past the largest class id in the semantic table.
const LUT_PADDING: usize = 100;

const BLACK: [f32; 3] = [0.0; 3];
const GRAY: [f32; 3] = [0.5; 3];

/// The 256-entry viridis table.
pub fn viridis() -> &'static [Point3<f32>; 256] {
    static TABLE: OnceLock<[Point3<f32>; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let anchors: Vec<Srgb<f32>> = VIRIDIS_ANCHORS
            .iter()
            .map(|&[r, g, b]| Srgb::new(r, g, b).into_format())
            .collect();
        let segments = (anchors.len() - 1) as f32;

        let mut table = [Point3::from(BLACK); 256];
        table.iter_mut().enumerate().for_each(|(index, entry)| {
            let pos = index as f32 / 255.0 * segments;
            let lower = (pos.floor() as usize).min(anchors.len() - 2);
            let factor = pos - lower as f32;
            let (r, g, b) = anchors[lower]
                .mix(anchors[lower + 1], factor)
                .into_components();
            *entry = Point3::new(r, g, b);
        });
        table
    })
}

/// Colors points by their distance to the sensor.
pub fn range_colors(points: &[Point3<f32>]) -> Vec<Point3<f32>> {
    let table = viridis();
    range_indices(points)
        .into_iter()
        .map(|index| table[index as usize])
        .collect()
}

fn range_indices(points: &[Point3<f32>]) -> Vec<u8> {
    let ranges: Vec<f32> = points
        .iter()
        .map(|point| point.coords.norm().powf(1.0 / RANGE_POWER))
        .collect();

    let min = ranges.iter().copied().fold(f32::INFINITY, f32::min);
    let max = ranges.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;

    ranges
        .iter()
        .map(|&range| {
            if spread > 0.0 {
                ((range - min) / spread * 255.0) as u8
            } else {
                0
            }
        })
        .collect()
}

/// Class id to RGB lookup table.
#[derive(Debug, Clone)]
pub struct SemanticLut {
    table: Vec<Point3<f32>>,
}

impl SemanticLut {
    pub fn new(color_dict: &BTreeMap<u32, Bgr>) -> Self {
        let size = color_dict
            .keys()
            .next_back()
            .map(|&max_key| max_key as usize + 1)
            .unwrap_or(0)
            + LUT_PADDING;

        let mut table = vec![Point3::from(BLACK); size];
        color_dict.iter().for_each(|(&key, &[b, g, r])| {
            let (r, g, b) = Srgb::new(r, g, b).into_format::<f32>().into_components();
            table[key as usize] = Point3::new(r, g, b);
        });

        Self { table }
    }

    /// Color of the semantic class in the lower half of a label word.
    pub fn color(&self, label: u32) -> Point3<f32> {
        let class = (label & 0xFFFF) as usize;
        self.table.get(class).copied().unwrap_or_else(|| Point3::from(BLACK))
    }

    pub fn colors(&self, labels: &[u32]) -> Vec<Point3<f32>> {
        labels.iter().map(|&label| self.color(label)).collect()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

/// Color of the instance id in the upper half of a label word.
pub fn instance_color(label: u32) -> Point3<f32> {
    let instance = label >> 16;
    if instance == 0 {
        return Point3::from(GRAY);
    }

    // spread consecutive ids around the hue circle
    let hue = (instance.wrapping_mul(137) % 360) as f32;
    let (r, g, b) = Srgb::from_color(Hsv::new(hue, 1.0, 1.0)).into_components();
    Point3::from([r, g, b])
}

pub fn instance_colors(labels: &[u32]) -> Vec<Point3<f32>> {
    labels.iter().map(|&label| instance_color(label)).collect()
}
