use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, fs, path::Path, str::FromStr};

/// BGR color triple as stored in the dataset config.
pub type Bgr = [u8; 3];

/// The SemanticKITTI dataset description, e.g. `semantic-kitti.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct SemKittiConfig {
    #[serde(default)]
    pub labels: BTreeMap<u32, String>,
    pub color_map: BTreeMap<u32, Bgr>,
    #[serde(default)]
    pub learning_map: BTreeMap<u32, u32>,
    #[serde(default)]
    pub learning_map_inv: BTreeMap<u32, u32>,
    #[serde(default)]
    pub split: SplitTable,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitTable {
    #[serde(default)]
    pub train: Vec<u32>,
    #[serde(default)]
    pub valid: Vec<u32>,
    #[serde(default)]
    pub test: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Valid,
    Test,
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = match s {
            "train" => Self::Train,
            "valid" | "val" => Self::Valid,
            "test" => Self::Test,
            _ => return Err(anyhow!("split must be train, valid or test, got '{s}'")),
        };
        Ok(split)
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        };
        f.write_str(name)
    }
}

impl SemKittiConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to open config file {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("error parsing config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Class id to BGR color. When `apply_learning_map` is set, every class
    /// is painted with the color of the class it is trained as.
    pub fn color_dict(&self, apply_learning_map: bool) -> Result<BTreeMap<u32, Bgr>> {
        if !apply_learning_map {
            return Ok(self.color_map.clone());
        }

        self.color_map
            .keys()
            .map(|&key| {
                let learned = self
                    .learning_map
                    .get(&key)
                    .ok_or_else(|| anyhow!("class {key} is missing in learning_map"))?;
                let original = self
                    .learning_map_inv
                    .get(learned)
                    .ok_or_else(|| anyhow!("class {learned} is missing in learning_map_inv"))?;
                let color = self
                    .color_map
                    .get(original)
                    .ok_or_else(|| anyhow!("class {original} is missing in color_map"))?;
                Ok((key, *color))
            })
            .collect()
    }

    pub fn sequences(&self, split: Split) -> &[u32] {
        match split {
            Split::Train => &self.split.train,
            Split::Valid => &self.split.valid,
            Split::Test => &self.split.test,
        }
    }
}
