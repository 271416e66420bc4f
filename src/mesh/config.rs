use thiserror::Error;

use crate::geometry::{Face, RootGrid, TreeError, NUM_AXES};

use super::boundary::{BoundaryConds, BoundaryFlag};

/// Error produced when a mesh configuration is inconsistent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("boundary conditions on axis {axis} must be periodic on both faces or neither")]
    PeriodicMismatch { axis: usize },
    #[error("{0:?} face can not use the block boundary flag")]
    BlockFlag(Face),
    #[error(transparent)]
    Grid(#[from] TreeError),
}

/// Parameters describing the root grid and global boundary conditions of a mesh.
///
/// ```toml
/// dim = 2
/// root_blocks = [4, 2, 1]
///
/// [boundary]
/// inner_x1 = "periodic"
/// outer_x1 = "periodic"
/// inner_x2 = "reflect"
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MeshConfig {
    /// Number of non-degenerate axes.
    pub dim: usize,
    /// Number of root blocks along each axis.
    pub root_blocks: [usize; NUM_AXES],
    /// Conditions applied along each face of the domain.
    #[serde(default)]
    pub boundary: BoundaryConds,
}

impl MeshConfig {
    pub fn new(dim: usize, root_blocks: [usize; NUM_AXES], boundary: BoundaryConds) -> Self {
        Self {
            dim,
            root_blocks,
            boundary,
        }
    }

    /// Periodicity of each axis, derived from the boundary conditions.
    pub fn periodicity(&self) -> Result<[bool; NUM_AXES], ConfigError> {
        let mut result = [false; NUM_AXES];

        for axis in 0..NUM_AXES {
            let inner = self.boundary.flag(Face::negative(axis));
            let outer = self.boundary.flag(Face::positive(axis));

            if inner.is_periodic() != outer.is_periodic() {
                return Err(ConfigError::PeriodicMismatch { axis });
            }

            result[axis] = inner.is_periodic();
        }

        Ok(result)
    }

    /// Validates the configuration and builds the root grid it describes.
    pub fn root_grid(&self) -> Result<RootGrid, ConfigError> {
        for (face, &flag) in self.boundary.to_faces().iter() {
            if flag == BoundaryFlag::Block {
                return Err(ConfigError::BlockFlag(face));
            }
        }

        let periodic = self.periodicity()?;
        Ok(RootGrid::new(self.dim, self.root_blocks, periodic)?)
    }
}
