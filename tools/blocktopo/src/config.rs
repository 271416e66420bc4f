use std::path::Path;

use blockmesh::prelude::*;
use eyre::Context as _;
use serde::de::DeserializeOwned;

/// Configuration read by `blocktopo`.
///
/// ```toml
/// workers = 4
/// rank = 0
///
/// [mesh]
/// dim = 2
/// root_blocks = [2, 2, 1]
///
/// [[refine]]
/// level = 1
/// lx = [0, 0, 0]
/// ```
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Number of workers to decompose the mesh over.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Worker whose topology is built and printed.
    #[serde(default)]
    pub rank: usize,
    pub mesh: MeshConfig,
    /// Blocks to refine, applied one after another.
    #[serde(default)]
    pub refine: Vec<LogicalLocation>,
    /// Per block cost overrides, applied after all refinement.
    #[serde(default)]
    pub costs: Vec<BlockCost>,
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct BlockCost {
    pub level: u32,
    pub lx: [i64; 3],
    pub cost: f64,
}

impl BlockCost {
    pub fn location(&self) -> LogicalLocation {
        LogicalLocation::new(self.level, self.lx)
    }
}

fn default_workers() -> usize {
    1
}

/// Deserialize data from a toml file.
pub fn import_toml<T: DeserializeOwned>(path: &Path) -> eyre::Result<T> {
    let string = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&string).with_context(|| format!("failed to parse {}", path.display()))
}
