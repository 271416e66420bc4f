use std::ops::Range;

use bitvec::prelude::*;
use datasize::DataSize;
use thiserror::Error;

#[cfg(feature = "parallel")]
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::geometry::{faces, BlockTree, Face, FaceArray, LogicalLocation, TreeError, NUM_FACES};

use super::boundary::{BoundaryClassifier, BoundaryConds, BoundaryFlag};
use super::dual::{DualArray, SyncError};
use super::neighbors::{num_slots, slot_width, NeighborEntry, NeighborResolver};

/// Error produced while building the topology of locally owned blocks. All of
/// these indicate an inconsistent tree or rank map, and nothing is published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("no rank is assigned to block {0}")]
    MissingRank(usize),
    #[error("rank map covers {found} blocks, but the tree has {expected}")]
    RankCount { expected: usize, found: usize },
    #[error("block {gid} borders {neighbor:?} across more than one level")]
    LevelJump {
        gid: usize,
        neighbor: LogicalLocation,
    },
    #[error("value {0} does not fit into a neighbor entry")]
    Overflow(usize),
    #[error("blocks {start}..{end} are out of range for a tree with {count} blocks")]
    InvalidRange {
        start: usize,
        end: usize,
        count: usize,
    },
}

/// Identity, boundary flags and neighbor tables of a contiguous range of blocks
/// (usually those owned by the local worker).
///
/// A topology is always rebuilt from scratch when the tree changes, and is only
/// handed out once every array has been published.
#[derive(Clone, Debug)]
pub struct MeshBlockTopology {
    dim: usize,
    gids: Range<usize>,
    /// Global id of each block.
    gid: DualArray<i32>,
    /// Refinement level of each block.
    level: DualArray<i32>,
    /// Six boundary flags per block.
    boundaries: DualArray<BoundaryFlag>,
    /// `num_slots * slot_width` entries per block.
    neighbors: DualArray<NeighborEntry>,
    /// Stores whether block face is on a physical boundary.
    physical: BitVec,
    /// Estimated cost of each block, consumed by the next decomposition.
    costs: Vec<f64>,
}

impl MeshBlockTopology {
    /// Builds the topology of blocks `gids` of the tree. Neighbor ranks are looked
    /// up in `ranks`, which must cover every block of the tree.
    pub fn build(
        tree: &BlockTree,
        conds: &BoundaryConds,
        gids: Range<usize>,
        ranks: &[usize],
    ) -> Result<Self, TopologyError> {
        if gids.start > gids.end || gids.end > tree.num_leaves() {
            return Err(TopologyError::InvalidRange {
                start: gids.start,
                end: gids.end,
                count: tree.num_leaves(),
            });
        }

        if ranks.len() != tree.num_leaves() {
            return Err(TopologyError::RankCount {
                expected: tree.num_leaves(),
                found: ranks.len(),
            });
        }

        let dim = tree.grid().dim();
        let count = gids.len();

        let mut result = Self {
            dim,
            gids: gids.clone(),
            gid: DualArray::new(0, -1),
            level: DualArray::new(0, -1),
            boundaries: DualArray::new(0, BoundaryFlag::Block),
            neighbors: DualArray::new(0, NeighborEntry::NONE),
            physical: BitVec::repeat(false, count * NUM_FACES),
            costs: vec![1.0; count],
        };

        result.build_identity(tree)?;
        result.build_boundaries(tree, conds);
        result.build_neighbors(tree, ranks)?;
        result.publish();

        log::debug!(
            "Built topology for blocks {}..{} ({} neighbor entries, {} physical faces)",
            gids.start,
            gids.end,
            result.neighbors.device().iter().filter(|e| e.is_some()).count(),
            result.physical.count_ones()
        );

        Ok(result)
    }

    fn build_identity(&mut self, tree: &BlockTree) -> Result<(), TopologyError> {
        let count = self.gids.len();

        let gid = self.gid.stage_resize(count, -1);
        for (local, global) in self.gids.clone().enumerate() {
            gid[local] = i32::try_from(global).map_err(|_| TopologyError::Overflow(global))?;
        }

        let level = self.level.stage_resize(count, -1);
        for (local, global) in self.gids.clone().enumerate() {
            level[local] = tree.location(global).level as i32;
        }

        Ok(())
    }

    fn build_boundaries(&mut self, tree: &BlockTree, conds: &BoundaryConds) {
        let classifier = BoundaryClassifier::new(*tree.grid(), conds);
        let boundaries = self
            .boundaries
            .stage_resize(self.gids.len() * NUM_FACES, BoundaryFlag::Block);

        for (local, global) in self.gids.clone().enumerate() {
            let flags = classifier.classify(&tree.location(global));

            for (face, &flag) in flags.iter() {
                let index = local * NUM_FACES + face.to_linear();
                boundaries[index] = flag;
                self.physical.set(index, flag.is_physical());
            }

            log::trace!("Block {global} boundaries {:?}", flags.into_inner());
        }
    }

    fn build_neighbors(&mut self, tree: &BlockTree, ranks: &[usize]) -> Result<(), TopologyError> {
        let resolver = NeighborResolver::new(tree, ranks);

        #[cfg(feature = "parallel")]
        let rows = self
            .gids
            .clone()
            .into_par_iter()
            .map(|gid| resolver.resolve_row(gid))
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(not(feature = "parallel"))]
        let rows = self
            .gids
            .clone()
            .map(|gid| resolver.resolve_row(gid))
            .collect::<Result<Vec<_>, _>>()?;

        let row_len = resolver.row_len();
        let neighbors = self
            .neighbors
            .stage_resize(self.gids.len() * row_len, NeighborEntry::NONE);

        for (local, row) in rows.into_iter().enumerate() {
            neighbors[local * row_len..(local + 1) * row_len].copy_from_slice(&row);
        }

        Ok(())
    }

    /// Makes every staged array visible on the compute side.
    fn publish(&mut self) {
        self.gid.publish();
        self.level.publish();
        self.boundaries.publish();
        self.neighbors.publish();
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_blocks(&self) -> usize {
        self.gids.len()
    }

    /// Range of global ids covered by this topology.
    pub fn gids(&self) -> Range<usize> {
        self.gids.clone()
    }

    /// Local index of a block, if it is part of this topology.
    pub fn local(&self, gid: usize) -> Option<usize> {
        self.gids.contains(&gid).then(|| gid - self.gids.start)
    }

    pub fn gid(&self, local: usize) -> usize {
        self.gid.device()[local] as usize
    }

    pub fn level(&self, local: usize) -> u32 {
        self.level.device()[local] as u32
    }

    /// Number of slots in each block's neighbor table.
    pub fn num_slots(&self) -> usize {
        num_slots(self.dim)
    }

    /// Number of entries in each slot.
    pub fn slot_width(&self) -> usize {
        slot_width(self.dim)
    }

    /// Boundary flags of every face of a block.
    pub fn boundary(&self, local: usize) -> FaceArray<BoundaryFlag> {
        let flags = &self.boundaries.device()[local * NUM_FACES..(local + 1) * NUM_FACES];
        FaceArray::from_fn(|face| flags[face.to_linear()])
    }

    /// Is the face filled by a physical boundary condition?
    pub fn is_physical(&self, local: usize, face: Face) -> bool {
        self.physical[local * NUM_FACES + face.to_linear()]
    }

    /// Faces of a block on a physical boundary.
    pub fn physical_faces(&self, local: usize) -> impl Iterator<Item = Face> + '_ {
        faces().filter(move |&face| self.is_physical(local, face))
    }

    /// The full neighbor table of a block.
    pub fn neighbors(&self, local: usize) -> &[NeighborEntry] {
        let len = self.num_slots() * self.slot_width();
        &self.neighbors.device()[local * len..(local + 1) * len]
    }

    /// The entries stored in one slot of a block's neighbor table. Unused entries are
    /// `NeighborEntry::NONE`.
    pub fn slot(&self, local: usize, slot: usize) -> &[NeighborEntry] {
        let width = self.slot_width();
        &self.neighbors(local)[slot * width..(slot + 1) * width]
    }

    /// Flat neighbor table of every block, as consumed by a transport layer.
    pub fn neighbor_table(&self) -> Result<&[NeighborEntry], SyncError> {
        self.neighbors.read()
    }

    /// Flat boundary flags of every block, six per block.
    pub fn boundary_table(&self) -> Result<&[BoundaryFlag], SyncError> {
        self.boundaries.read()
    }

    pub fn cost(&self, local: usize) -> f64 {
        self.costs[local]
    }

    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    /// Stores the estimated cost of a block for the next decomposition.
    pub fn set_cost(&mut self, local: usize, cost: f64) {
        self.costs[local] = cost;
    }
}

impl DataSize for MeshBlockTopology {
    const IS_DYNAMIC: bool = true;
    const STATIC_HEAP_SIZE: usize = 0;

    fn estimate_heap_size(&self) -> usize {
        self.gid.estimate_heap_size()
            + self.level.estimate_heap_size()
            + self.boundaries.len() * 2 * std::mem::size_of::<BoundaryFlag>()
            + self.neighbors.estimate_heap_size()
            + self.physical.capacity() / 8
            + self.costs.estimate_heap_size()
    }
}
