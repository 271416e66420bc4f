//! Module containing the `Mesh` driver, which keeps a block tree, its decomposition
//! over workers, and the topology of the locally owned blocks consistent with one another.
//!
//! Deciding *where* to refine is left to the caller. The mesh only rebuilds its
//! derived state after each adaptation or rebalance.

use datasize::DataSize;
use thiserror::Error;

use crate::geometry::{BlockTree, TreeError};

mod boundary;
mod config;
mod decompose;
mod dual;
mod neighbors;
mod topology;

pub use boundary::{BoundaryClassifier, BoundaryConds, BoundaryFlag};
pub use config::{ConfigError, MeshConfig};
pub use decompose::{DecomposeError, Decomposition};
pub use dual::{DualArray, SyncError};
pub use neighbors::{
    num_slots, reciprocal_slot, slot_index, slot_region, slot_regions, slot_width,
    NeighborEntry, NeighborResolver, MAX_SLOTS,
};
pub use topology::{MeshBlockTopology, TopologyError};

/// Error produced by any operation on a `Mesh`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("invalid mesh configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid block tree: {0}")]
    Tree(#[from] TreeError),
    #[error("failed to build topology: {0}")]
    Topology(#[from] TopologyError),
    #[error("failed to decompose mesh: {0}")]
    Decompose(#[from] DecomposeError),
    #[error("rank {rank} is out of range for {workers} workers")]
    InvalidRank { rank: usize, workers: usize },
    #[error("tree was built for a different root grid than the configuration describes")]
    GridMismatch,
    #[error("expected {expected} costs, found {found}")]
    CostCount { expected: usize, found: usize },
}

/// A block structured mesh, distributed over `workers` workers, as seen from a single worker.
///
/// Every worker holds the full tree and cost vector, and therefore derives the same
/// decomposition. Only the topology of locally owned blocks is built.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "MeshCheckpoint", into = "MeshCheckpoint")]
pub struct Mesh {
    config: MeshConfig,
    tree: BlockTree,
    /// Estimated cost of every block, in gid order.
    costs: Vec<f64>,
    /// Costs from which the current decomposition was computed.
    balanced: Vec<f64>,
    decomposition: Decomposition,
    /// Index of the local worker.
    rank: usize,
    topology: MeshBlockTopology,
}

impl Mesh {
    /// Constructs a uniform mesh with one block per root block, all with unit cost.
    pub fn new(config: MeshConfig, workers: usize, rank: usize) -> Result<Self, MeshError> {
        let tree = BlockTree::new(config.root_grid()?);
        let costs = vec![1.0; tree.num_leaves()];
        Self::from_tree(config, tree, costs, workers, rank)
    }

    /// Constructs a mesh from an existing tree and the costs of its blocks.
    pub fn from_tree(
        config: MeshConfig,
        tree: BlockTree,
        costs: Vec<f64>,
        workers: usize,
        rank: usize,
    ) -> Result<Self, MeshError> {
        Self::restore(config, tree, costs.clone(), costs, workers, rank)
    }

    /// Decomposes by `balanced`, while `costs` remain pending until the next rebuild.
    fn restore(
        config: MeshConfig,
        tree: BlockTree,
        balanced: Vec<f64>,
        costs: Vec<f64>,
        workers: usize,
        rank: usize,
    ) -> Result<Self, MeshError> {
        if rank >= workers {
            return Err(MeshError::InvalidRank { rank, workers });
        }

        if *tree.grid() != config.root_grid()? {
            return Err(MeshError::GridMismatch);
        }

        for found in [balanced.len(), costs.len()] {
            if found != tree.num_leaves() {
                return Err(MeshError::CostCount {
                    expected: tree.num_leaves(),
                    found,
                });
            }
        }

        Self::check_costs(&costs)?;

        let decomposition = Self::decompose(&balanced, workers)?;
        let topology = MeshBlockTopology::build(
            &tree,
            &config.boundary,
            decomposition.range_of(rank),
            decomposition.ranks(),
        )?;

        let mut result = Self {
            config,
            tree,
            costs,
            balanced,
            decomposition,
            rank,
            topology,
        };

        result.sync_local_costs();

        Ok(result)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    /// Topology of the blocks owned by this worker.
    pub fn topology(&self) -> &MeshBlockTopology {
        &self.topology
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_workers(&self) -> usize {
        self.decomposition.num_workers()
    }

    pub fn num_blocks(&self) -> usize {
        self.tree.num_leaves()
    }

    /// Estimated cost of every block, in gid order.
    pub fn costs(&self) -> &[f64] {
        &self.costs
    }

    /// Updates the estimated cost of a block. Takes effect at the next rebalance.
    pub fn set_cost(&mut self, gid: usize, cost: f64) -> Result<(), MeshError> {
        let count = self.num_blocks();

        if gid >= count {
            return Err(DecomposeError::InvalidGid { gid, count }.into());
        }

        if !cost.is_finite() || cost <= 0.0 {
            return Err(DecomposeError::InvalidCost { gid, cost }.into());
        }

        self.costs[gid] = cost;

        if let Some(local) = self.topology.local(gid) {
            self.topology.set_cost(local, cost);
        }

        Ok(())
    }

    /// Refines the flagged blocks (and any others required to keep neighboring
    /// blocks within one level of each other), then rebuilds the decomposition and
    /// local topology. Children inherit the cost of their parent.
    ///
    /// On error the mesh is left unchanged.
    pub fn refine(&mut self, flags: &[bool]) -> Result<(), MeshError> {
        let mut flags = flags.to_vec();
        let requested = flags.iter().filter(|&&f| f).count();
        self.tree.balance_refine_flags(&mut flags)?;
        let refined = flags.iter().filter(|&&f| f).count();

        if refined > requested {
            log::debug!("Balancing flagged {} additional blocks for refinement", refined - requested);
        }

        let mut tree = self.tree.clone();
        let map = tree.refine(&flags)?;
        let children = tree.grid().num_children();

        let mut costs = vec![0.0; tree.num_leaves()];
        for (old, &new) in map.iter().enumerate() {
            let count = if flags[old] { children } else { 1 };
            costs[new..new + count].fill(self.costs[old]);
        }

        self.rebuild(tree, costs)?;

        log::info!(
            "Refined {refined} blocks, mesh now has {} blocks",
            self.num_blocks()
        );

        Ok(())
    }

    /// Coarsens every complete family of flagged blocks whose coarsening keeps the
    /// mesh balanced, then rebuilds. Merged blocks take the mean cost of their children.
    ///
    /// On error the mesh is left unchanged.
    pub fn coarsen(&mut self, flags: &[bool]) -> Result<(), MeshError> {
        let mut flags = flags.to_vec();
        self.tree.balance_coarsen_flags(&mut flags)?;

        let before = self.num_blocks();
        let mut tree = self.tree.clone();
        let map = tree.coarsen(&flags)?;

        let mut sums = vec![0.0; tree.num_leaves()];
        let mut counts = vec![0usize; tree.num_leaves()];
        for (old, &new) in map.iter().enumerate() {
            sums[new] += self.costs[old];
            counts[new] += 1;
        }

        let costs = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| sum / count as f64)
            .collect();

        self.rebuild(tree, costs)?;

        log::info!(
            "Coarsened mesh from {before} to {} blocks",
            self.num_blocks()
        );

        Ok(())
    }

    /// Recomputes the decomposition from the current costs and rebuilds the local topology.
    pub fn rebalance(&mut self) -> Result<(), MeshError> {
        self.rebuild(self.tree.clone(), self.costs.clone())
    }

    fn check_costs(costs: &[f64]) -> Result<(), DecomposeError> {
        for (gid, &cost) in costs.iter().enumerate() {
            if !cost.is_finite() || cost <= 0.0 {
                return Err(DecomposeError::InvalidCost { gid, cost });
            }
        }

        Ok(())
    }

    fn decompose(costs: &[f64], workers: usize) -> Result<Decomposition, DecomposeError> {
        Decomposition::new(costs.iter().copied().enumerate(), workers)
    }

    /// Derives the decomposition and local topology of `tree`, and only replaces the
    /// current state once both have been built.
    fn rebuild(&mut self, tree: BlockTree, costs: Vec<f64>) -> Result<(), MeshError> {
        let decomposition = Self::decompose(&costs, self.num_workers())?;
        let topology = MeshBlockTopology::build(
            &tree,
            &self.config.boundary,
            decomposition.range_of(self.rank),
            decomposition.ranks(),
        )?;

        self.tree = tree;
        self.balanced.clone_from(&costs);
        self.costs = costs;
        self.decomposition = decomposition;
        self.topology = topology;
        self.sync_local_costs();

        log::debug!(
            "Rebuilt mesh: {} blocks, {} local, imbalance {:.3}",
            self.num_blocks(),
            self.topology.num_blocks(),
            self.decomposition.imbalance()
        );

        Ok(())
    }

    fn sync_local_costs(&mut self) {
        for local in 0..self.topology.num_blocks() {
            let gid = self.topology.gid(local);
            self.topology.set_cost(local, self.costs[gid]);
        }
    }
}

impl DataSize for Mesh {
    const IS_DYNAMIC: bool = true;
    const STATIC_HEAP_SIZE: usize = 0;

    fn estimate_heap_size(&self) -> usize {
        self.tree.estimate_heap_size()
            + self.costs.estimate_heap_size()
            + self.balanced.estimate_heap_size()
            + self.decomposition.estimate_heap_size()
            + self.topology.estimate_heap_size()
    }
}

/// Serialized form of a mesh. Derived data is rebuilt on load.
#[derive(serde::Serialize, serde::Deserialize)]
struct MeshCheckpoint {
    config: MeshConfig,
    tree: BlockTree,
    /// Costs not yet applied by a rebalance.
    costs: Vec<f64>,
    /// Costs the decomposition was computed from.
    balanced: Vec<f64>,
    workers: usize,
    rank: usize,
}

impl From<Mesh> for MeshCheckpoint {
    fn from(value: Mesh) -> Self {
        let workers = value.num_workers();

        Self {
            config: value.config,
            tree: value.tree,
            costs: value.costs,
            balanced: value.balanced,
            workers,
            rank: value.rank,
        }
    }
}

impl TryFrom<MeshCheckpoint> for Mesh {
    type Error = MeshError;

    fn try_from(value: MeshCheckpoint) -> Result<Self, Self::Error> {
        Mesh::restore(
            value.config,
            value.tree,
            value.balanced,
            value.costs,
            value.workers,
            value.rank,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Face, LogicalLocation, Region};

    fn config(dim: usize, blocks: [usize; 3], flag: BoundaryFlag) -> MeshConfig {
        MeshConfig::new(dim, blocks, BoundaryConds::uniform(flag))
    }

    #[test]
    fn one_dimensional() {
        let mesh = Mesh::new(config(1, [4, 1, 1], BoundaryFlag::Outflow), 2, 0).unwrap();
        assert_eq!(mesh.num_blocks(), 4);
        assert_eq!(mesh.decomposition().ranks(), &[0, 0, 1, 1]);

        let topology = mesh.topology();
        assert_eq!(topology.gids(), 0..2);
        assert!(topology.slot(0, 0)[0].is_none());
        assert!(topology.is_physical(0, Face::negative(0)));
        assert_eq!(
            topology.slot(0, 1)[0],
            NeighborEntry {
                gid: 1,
                level: 2,
                rank: 0,
                destn: 0
            }
        );
        assert_eq!(topology.slot(1, 1)[0].rank, 1);

        let last = Mesh::new(config(1, [4, 1, 1], BoundaryFlag::Outflow), 2, 1).unwrap();
        assert!(last.topology().slot(1, 1)[0].is_none());
        assert!(last.topology().is_physical(1, Face::positive(0)));
    }

    #[test]
    fn refinement_costs() {
        let mut mesh = Mesh::new(config(2, [2, 2, 1], BoundaryFlag::Reflect), 2, 1).unwrap();
        mesh.set_cost(3, 8.0).unwrap();
        mesh.refine(&[false, false, false, true]).unwrap();

        assert_eq!(mesh.num_blocks(), 7);
        assert_eq!(mesh.costs(), &[1.0, 1.0, 1.0, 8.0, 8.0, 8.0, 8.0]);

        // Total 35, the first cut lands after the first fine block.
        assert_eq!(mesh.decomposition().ranks(), &[0, 0, 0, 0, 1, 1, 1]);
        assert_eq!(mesh.topology().gids(), 4..7);
        assert_eq!(mesh.topology().cost(0), 8.0);

        let flags = vec![false, false, false, true, true, true, true];
        mesh.coarsen(&flags).unwrap();
        assert_eq!(mesh.num_blocks(), 4);
        assert_eq!(mesh.costs(), &[1.0, 1.0, 1.0, 8.0]);
    }

    #[test]
    fn balanced_refinement() {
        let mut mesh = Mesh::new(config(2, [2, 2, 1], BoundaryFlag::Outflow), 1, 0).unwrap();
        mesh.refine(&[true, false, false, false]).unwrap();

        // Refining the fine block next to the coarse blocks forces them to refine too.
        let mut flags = vec![false; 7];
        flags[3] = true;
        mesh.refine(&flags).unwrap();
        assert_eq!(mesh.num_blocks(), 3 + 4 + 3 * 4);
        assert_eq!(mesh.tree().max_level(), 3);
        assert_eq!(mesh.topology().num_blocks(), mesh.num_blocks());
    }

    #[test]
    fn finer_face_neighbors() {
        let mut mesh = Mesh::new(config(3, [2, 2, 2], BoundaryFlag::Outflow), 3, 0).unwrap();
        let mut flags = vec![false; 8];
        flags[0] = true;
        mesh.refine(&flags).unwrap();

        let rank = mesh.decomposition().rank_of(8);
        let mesh = Mesh::from_tree(
            *mesh.config(),
            mesh.tree().clone(),
            mesh.costs().to_vec(),
            3,
            rank,
        )
        .unwrap();

        let topology = mesh.topology();
        let local = topology.local(8).unwrap();
        assert_eq!(
            mesh.tree().location(8),
            LogicalLocation::new(1, [1, 0, 0])
        );

        let slot = slot_index(Region::from_face(Face::negative(0))).unwrap();
        let entries = topology.slot(local, slot);
        let gids: Vec<_> = entries.iter().map(|e| e.gid).collect();
        assert_eq!(gids, vec![1, 3, 5, 7]);
        assert!(entries.iter().all(|e| e.destn == 1 && e.level == 2));
        assert!(entries
            .iter()
            .all(|e| e.rank == mesh.decomposition().rank_of(e.gid as usize) as i32));
    }

    #[test]
    fn rebalance() {
        let mut mesh = Mesh::new(config(1, [4, 1, 1], BoundaryFlag::Outflow), 2, 0).unwrap();
        mesh.set_cost(0, 3.0).unwrap();
        assert_eq!(mesh.topology().cost(0), 3.0);
        assert_eq!(mesh.decomposition().ranks(), &[0, 0, 1, 1]);

        mesh.rebalance().unwrap();
        assert_eq!(mesh.decomposition().ranks(), &[0, 1, 1, 1]);
        assert_eq!(mesh.topology().gids(), 0..1);
        assert_eq!(mesh.topology().slot(0, 1)[0].rank, 1);
    }

    #[test]
    fn invalid() {
        let config = config(2, [2, 2, 1], BoundaryFlag::Outflow);
        assert_eq!(
            Mesh::new(config, 2, 2).unwrap_err(),
            MeshError::InvalidRank {
                rank: 2,
                workers: 2
            }
        );

        let tree = BlockTree::new(config.root_grid().unwrap());
        assert_eq!(
            Mesh::from_tree(config, tree.clone(), vec![1.0; 3], 1, 0).unwrap_err(),
            MeshError::CostCount {
                expected: 4,
                found: 3
            }
        );

        let other = MeshConfig::new(2, [4, 2, 1], config.boundary);
        assert_eq!(
            Mesh::from_tree(other, tree, vec![1.0; 4], 1, 0).unwrap_err(),
            MeshError::GridMismatch
        );

        let mut mesh = Mesh::new(config, 1, 0).unwrap();
        assert!(matches!(
            mesh.refine(&[true]),
            Err(MeshError::Tree(TreeError::FlagCount { .. }))
        ));
    }

    #[test]
    fn invalid_costs() {
        let mut mesh = Mesh::new(config(2, [2, 2, 1], BoundaryFlag::Outflow), 2, 0).unwrap();

        assert!(matches!(
            mesh.set_cost(3, f64::NAN),
            Err(MeshError::Decompose(DecomposeError::InvalidCost { gid: 3, .. }))
        ));
        assert_eq!(
            mesh.set_cost(3, 0.0),
            Err(MeshError::Decompose(DecomposeError::InvalidCost { gid: 3, cost: 0.0 }))
        );
        assert_eq!(
            mesh.set_cost(4, 2.0),
            Err(MeshError::Decompose(DecomposeError::InvalidGid { gid: 4, count: 4 }))
        );
        assert_eq!(mesh.costs(), &[1.0; 4]);

        // Refinement after a rejected cost still leaves every part of the mesh in agreement.
        mesh.refine(&[true, false, false, false]).unwrap();
        assert_eq!(mesh.num_blocks(), 7);
        assert_eq!(mesh.decomposition().num_blocks(), 7);
        assert_eq!(mesh.topology().level(0), 2);
        assert_eq!(mesh.tree().location(0).level, 2);

        let costs = vec![1.0, 1.0, f64::INFINITY, 1.0];
        let tree = BlockTree::new(mesh.config().root_grid().unwrap());
        assert!(matches!(
            Mesh::from_tree(*mesh.config(), tree, costs, 1, 0),
            Err(MeshError::Decompose(DecomposeError::InvalidCost { gid: 2, .. }))
        ));
    }

    #[test]
    fn failed_adaptation() {
        let mut mesh = Mesh::new(config(2, [2, 2, 1], BoundaryFlag::Outflow), 2, 1).unwrap();
        mesh.refine(&[true, false, false, false]).unwrap();

        let locations: Vec<_> = mesh.tree().locations().collect();
        let ranks = mesh.decomposition().ranks().to_vec();

        assert!(mesh.refine(&[true; 3]).is_err());
        assert!(mesh.coarsen(&[true; 8]).is_err());

        assert!(mesh.tree().locations().eq(locations.iter().copied()));
        assert_eq!(mesh.decomposition().ranks(), ranks.as_slice());
        assert_eq!(mesh.topology().gids(), mesh.decomposition().range_of(1));
    }

    #[test]
    fn checkpoint() {
        let mut mesh = Mesh::new(config(2, [3, 2, 1], BoundaryFlag::Periodic), 3, 2).unwrap();
        mesh.refine(&[false, true, false, false, false, false]).unwrap();
        mesh.set_cost(2, 5.0).unwrap();

        let data = ron::to_string(&mesh).unwrap();
        let mut restored: Mesh = ron::from_str(&data).unwrap();

        assert_eq!(restored.rank(), 2);
        assert_eq!(restored.num_workers(), 3);
        assert_eq!(restored.costs(), mesh.costs());
        assert!(restored.tree().locations().eq(mesh.tree().locations()));
        assert_eq!(restored.decomposition(), mesh.decomposition());
        assert_eq!(restored.topology().gids(), mesh.topology().gids());

        // The pending cost applies at the next rebalance on both sides.
        mesh.rebalance().unwrap();
        restored.rebalance().unwrap();
        assert_eq!(restored.decomposition(), mesh.decomposition());
        assert_eq!(mesh.decomposition().ranks(), &[0, 0, 1, 1, 2, 2, 2, 2, 2]);
        assert_eq!(mesh.decomposition().cost_of(1), 5.0 + 1.0);
    }
}
