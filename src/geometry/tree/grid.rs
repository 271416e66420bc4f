use crate::geometry::{LogicalLocation, NUM_AXES};

use super::TreeError;

/// The root-level arrangement of blocks that a `BlockTree` refines.
///
/// The tree's root node sits at level 0 and covers `2^root_level` blocks along
/// every active axis; `root_level` is the smallest level at which the requested
/// number of root blocks fits. Axes beyond `dim` are degenerate and always span
/// a single block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RootGridDef", into = "RootGridDef")]
pub struct RootGrid {
    dim: usize,
    blocks: [usize; NUM_AXES],
    periodic: [bool; NUM_AXES],
    root_level: u32,
}

impl RootGrid {
    /// Constructs a new root grid. Periodicity along degenerate axes is ignored.
    pub fn new(
        dim: usize,
        blocks: [usize; NUM_AXES],
        periodic: [bool; NUM_AXES],
    ) -> Result<Self, TreeError> {
        if !(1..=NUM_AXES).contains(&dim) {
            return Err(TreeError::InvalidDimension(dim));
        }

        for axis in 0..NUM_AXES {
            if blocks[axis] == 0 {
                return Err(TreeError::EmptyAxis { axis });
            }

            if axis >= dim && blocks[axis] != 1 {
                return Err(TreeError::DegenerateAxis {
                    axis,
                    blocks: blocks[axis],
                });
            }
        }

        let widest = blocks[..dim].iter().copied().max().unwrap_or(1);
        let mut root_level = 0;
        while (1usize << root_level) < widest {
            root_level += 1;
        }

        Ok(Self {
            dim,
            blocks,
            periodic: std::array::from_fn(|axis| axis < dim && periodic[axis]),
            root_level,
        })
    }

    /// Number of non-degenerate axes.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of root blocks along each axis.
    pub fn blocks(&self) -> [usize; NUM_AXES] {
        self.blocks
    }

    pub fn is_periodic(&self, axis: usize) -> bool {
        self.periodic[axis]
    }

    /// Level at which the root blocks live.
    pub fn root_level(&self) -> u32 {
        self.root_level
    }

    /// Number of children of a refined node.
    pub fn num_children(&self) -> usize {
        1 << self.dim
    }

    pub fn num_root_blocks(&self) -> usize {
        self.blocks.iter().product()
    }

    /// Number of nodes at `level` spanning the domain along `axis`.
    pub fn extent(&self, level: u32, axis: usize) -> i64 {
        if axis >= self.dim {
            return 1;
        }

        let blocks = self.blocks[axis] as i64;

        if level >= self.root_level {
            blocks << (level - self.root_level)
        } else {
            let shift = self.root_level - level;
            (blocks + (1 << shift) - 1) >> shift
        }
    }

    /// True if the location lies (at least partially) inside the domain.
    pub fn contains(&self, loc: &LogicalLocation) -> bool {
        (0..NUM_AXES).all(|axis| loc.lx[axis] >= 0 && loc.lx[axis] < self.extent(loc.level, axis))
    }

    /// Iterates the locations of all root blocks, with the first axis varying fastest.
    pub fn root_locations(&self) -> impl Iterator<Item = LogicalLocation> + '_ {
        let [nx, ny, nz] = self.blocks.map(|b| b as i64);
        let level = self.root_level;

        (0..nz).flat_map(move |k| {
            (0..ny).flat_map(move |j| (0..nx).map(move |i| LogicalLocation::new(level, [i, j, k])))
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RootGridDef {
    dim: usize,
    blocks: [usize; NUM_AXES],
    periodic: [bool; NUM_AXES],
}

impl From<RootGrid> for RootGridDef {
    fn from(value: RootGrid) -> Self {
        Self {
            dim: value.dim,
            blocks: value.blocks,
            periodic: value.periodic,
        }
    }
}

impl TryFrom<RootGridDef> for RootGrid {
    type Error = TreeError;

    fn try_from(value: RootGridDef) -> Result<Self, Self::Error> {
        RootGrid::new(value.dim, value.blocks, value.periodic)
    }
}
