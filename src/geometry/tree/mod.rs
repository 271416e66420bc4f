use crate::geometry::{regions, LogicalLocation, Octant, Region, NUM_AXES};
use datasize::DataSize;
use thiserror::Error;

mod grid;

pub use grid::RootGrid;

/// Null index, used internally to make storage of `Option<usize>` more efficent.
pub const NULL: usize = usize::MAX;

/// Index of a node within the tree's arena.
///
/// Node indices are only meaningful for the tree that produced them, and are
/// invalidated by any refinement or coarsening.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The root node is always stored at index 0.
    pub const ROOT: NodeId = NodeId(0);
}

/// Either a leaf, which owns a single mesh block, or an internal node which
/// owns the children covering its volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, DataSize)]
pub enum NodeKind {
    Leaf { gid: usize },
    Internal { children: [usize; Octant::COUNT] },
}

#[derive(Clone, Debug, DataSize)]
struct Node {
    loc: LogicalLocation,
    parent: usize,
    kind: NodeKind,
}

/// Error produced while building, querying or adapting a `BlockTree`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("mesh dimension {0} is invalid, expected 1, 2 or 3")]
    InvalidDimension(usize),
    #[error("axis {axis} has no root blocks")]
    EmptyAxis { axis: usize },
    #[error("degenerate axis {axis} must span exactly one root block, found {blocks}")]
    DegenerateAxis { axis: usize, blocks: usize },
    #[error("tree has no leaves")]
    Empty,
    #[error("leaf {0:?} lies outside of the domain")]
    OutsideDomain(LogicalLocation),
    #[error("leaf {0:?} is coarser than root level {1}")]
    AboveRootLevel(LogicalLocation, u32),
    #[error("leaf {0:?} overlaps another leaf")]
    Overlap(LogicalLocation),
    #[error("node {0:?} does not have children covering its volume")]
    Incomplete(LogicalLocation),
    #[error("node {0:?} was expected to be a leaf")]
    NotALeaf(LogicalLocation),
    #[error("direction {0:?} moves along a degenerate axis")]
    DegenerateDirection([i32; NUM_AXES]),
    #[error("expected {expected} flags, found {found}")]
    FlagCount { expected: usize, found: usize },
    #[error("coarsening flags around {0:?} do not cover a complete family")]
    InvalidCoarsenFlags(LogicalLocation),
}

/// An octree over mesh blocks, stored as a flat arena of nodes.
///
/// Leaves are numbered by a depth first traversal which visits children in
/// octant order. This z-order numbering is the global id (`gid`) of each block,
/// and is the order used for domain decomposition. Every refinement or
/// coarsening rebuilds the arena and renumbers the leaves.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "TreeCheckpoint", into = "TreeCheckpoint")]
pub struct BlockTree {
    grid: RootGrid,
    /// All nodes, root first.
    nodes: Vec<Node>,
    /// Map from gid to leaf node.
    leaves: Vec<usize>,
}

impl BlockTree {
    /// Constructs a uniform tree with one leaf for every root block.
    pub fn new(grid: RootGrid) -> Self {
        Self::from_leaves(grid, grid.root_locations())
            .expect("root blocks always tile the root grid")
    }

    /// Builds a tree from the locations of its leaves (in any order). The leaves
    /// must exactly tile the domain without overlapping.
    pub fn from_leaves(
        grid: RootGrid,
        leaves: impl IntoIterator<Item = LogicalLocation>,
    ) -> Result<Self, TreeError> {
        let mut result = Self {
            grid,
            nodes: vec![Node {
                loc: LogicalLocation::ROOT,
                parent: NULL,
                kind: NodeKind::Internal {
                    children: [NULL; Octant::COUNT],
                },
            }],
            leaves: Vec::new(),
        };

        let mut count = 0;
        for loc in leaves {
            result.insert(loc)?;
            count += 1;
        }

        if count == 0 {
            return Err(TreeError::Empty);
        }

        result.validate()?;
        result.assign_gids();

        log::trace!(
            "Built block tree with {} leaves, {} nodes, max level {}",
            result.num_leaves(),
            result.num_nodes(),
            result.max_level()
        );

        Ok(result)
    }

    /// The root grid this tree refines.
    pub fn grid(&self) -> &RootGrid {
        &self.grid
    }

    /// Number of leaves (mesh blocks) in the tree.
    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Total number of nodes, including internal nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Finest level of any leaf.
    pub fn max_level(&self) -> u32 {
        self.leaves
            .iter()
            .map(|&node| self.nodes[node].loc.level)
            .max()
            .unwrap_or(0)
    }

    /// Leaf node owning the given block.
    pub fn leaf(&self, gid: usize) -> NodeId {
        NodeId(self.leaves[gid])
    }

    /// Location of the given block.
    pub fn location(&self, gid: usize) -> LogicalLocation {
        self.nodes[self.leaves[gid]].loc
    }

    /// Locations of all blocks, in gid order.
    pub fn locations(&self) -> impl ExactSizeIterator<Item = LogicalLocation> + '_ {
        self.leaves.iter().map(|&node| self.nodes[node].loc)
    }

    pub fn node_location(&self, node: NodeId) -> LogicalLocation {
        self.nodes[node.0].loc
    }

    pub fn level(&self, node: NodeId) -> u32 {
        self.nodes[node.0].loc.level
    }

    pub fn kind(&self, node: NodeId) -> NodeKind {
        self.nodes[node.0].kind
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0].kind, NodeKind::Leaf { .. })
    }

    /// Global id of the block owned by `node`, or `None` for internal nodes.
    pub fn gid(&self, node: NodeId) -> Option<usize> {
        match self.nodes[node.0].kind {
            NodeKind::Leaf { gid } => Some(gid),
            NodeKind::Internal { .. } => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        let parent = self.nodes[node.0].parent;
        (parent != NULL).then_some(NodeId(parent))
    }

    /// Returns the given child of a node, or `None` if the node is a leaf or
    /// the child lies outside of the domain.
    pub fn child(&self, node: NodeId, octant: Octant) -> Option<NodeId> {
        match self.nodes[node.0].kind {
            NodeKind::Leaf { .. } => None,
            NodeKind::Internal { children } => {
                let child = children[octant.to_linear()];
                (child != NULL).then_some(NodeId(child))
            }
        }
    }

    /// Returns the given child of an internal node, which must itself be a leaf.
    pub fn get_leaf(&self, node: NodeId, octant: Octant) -> Result<NodeId, TreeError> {
        let Some(child) = self.child(node, octant) else {
            return Err(TreeError::Incomplete(self.node_location(node)));
        };

        if !self.is_leaf(child) {
            return Err(TreeError::NotALeaf(self.node_location(child)));
        }

        Ok(child)
    }

    /// Finds the leaf at exactly the given location.
    pub fn find_leaf(&self, loc: &LogicalLocation) -> Option<NodeId> {
        let mut node = NodeId::ROOT;

        for depth in 0..loc.level {
            node = self.child(node, loc.octant_at(depth))?;
        }

        self.is_leaf(node).then_some(node)
    }

    /// Finds the node adjacent to `loc` in the given direction.
    ///
    /// Returns `None` if the neighbor would lie across a non-periodic domain
    /// boundary. Otherwise the result is either a leaf at the same or a coarser
    /// level, or an internal node at the same level as `loc` whose children are
    /// the (finer) neighbors.
    pub fn find_neighbor(
        &self,
        loc: &LogicalLocation,
        region: Region,
    ) -> Result<Option<NodeId>, TreeError> {
        if !region.is_valid_for(self.grid.dim()) {
            return Err(TreeError::DegenerateDirection(region.offsets()));
        }

        let mut target = loc.shifted(region);

        for axis in 0..self.grid.dim() {
            let extent = self.grid.extent(loc.level, axis);

            if target.lx[axis] < 0 || target.lx[axis] >= extent {
                if !self.grid.is_periodic(axis) {
                    return Ok(None);
                }

                target.lx[axis] = target.lx[axis].rem_euclid(extent);
            }
        }

        let mut node = 0;

        for depth in 0..target.level {
            match self.nodes[node].kind {
                // Leaf reached early, neighbor is coarser.
                NodeKind::Leaf { .. } => return Ok(Some(NodeId(node))),
                NodeKind::Internal { children } => {
                    let child = children[target.octant_at(depth).to_linear()];

                    if child == NULL {
                        return Err(TreeError::Incomplete(self.nodes[node].loc));
                    }

                    node = child;
                }
            }
        }

        Ok(Some(NodeId(node)))
    }

    // *************************
    // Refinement **************

    /// Returns true if refining the flagged blocks keeps every pair of
    /// neighboring blocks within one level of each other.
    pub fn check_refine_flags(&self, flags: &[bool]) -> Result<bool, TreeError> {
        self.check_flag_count(flags)?;

        for gid in 0..self.num_leaves() {
            if !flags[gid] {
                continue;
            }

            for coarse in self.coarse_neighborhood(gid)? {
                if !flags[coarse] {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Balances the given refinement flags, flagging additional blocks
    /// for refinement to preserve the 2:1 ratio between neighbors.
    pub fn balance_refine_flags(&self, flags: &mut [bool]) -> Result<(), TreeError> {
        self.check_flag_count(flags)?;

        loop {
            let mut is_balanced = true;

            for gid in 0..self.num_leaves() {
                if !flags[gid] {
                    continue;
                }

                for coarse in self.coarse_neighborhood(gid)? {
                    if !flags[coarse] {
                        is_balanced = false;
                        flags[coarse] = true;
                    }
                }
            }

            if is_balanced {
                break;
            }
        }

        Ok(())
    }

    /// Replaces each flagged block with its children. Returns a map from old gids
    /// to new gids; a refined block maps to its first child.
    pub fn refine(&mut self, flags: &[bool]) -> Result<Vec<usize>, TreeError> {
        self.check_flag_count(flags)?;

        let dim = self.grid.dim();
        let mut map = Vec::with_capacity(self.num_leaves());
        let mut leaves = Vec::with_capacity(self.num_leaves());

        for gid in 0..self.num_leaves() {
            map.push(leaves.len());
            let loc = self.location(gid);

            if flags[gid] {
                leaves.extend(Octant::enumerate_dim(dim).map(|octant| loc.child(octant)));
            } else {
                leaves.push(loc);
            }
        }

        *self = Self::from_leaves(self.grid, leaves)?;

        Ok(map)
    }

    /// Clears coarsening flags that can not be honored: blocks whose siblings are
    /// not all flagged leaves, families at the root level, and families that
    /// border finer blocks.
    pub fn balance_coarsen_flags(&self, flags: &mut [bool]) -> Result<(), TreeError> {
        self.check_flag_count(flags)?;

        let count = self.grid.num_children();
        let mut gid = 0;

        while gid < self.num_leaves() {
            if self.family_parent(gid).is_none() {
                flags[gid] = false;
                gid += 1;
                continue;
            }

            let family = gid..gid + count;
            let keep = flags[family.clone()].iter().all(|&flag| flag)
                && !self.family_borders_finer(gid)?;
            flags[family].fill(keep);

            gid += count;
        }

        Ok(())
    }

    /// Merges each complete family of flagged blocks into its parent. Returns a
    /// map from old gids to new gids.
    pub fn coarsen(&mut self, flags: &[bool]) -> Result<Vec<usize>, TreeError> {
        self.check_flag_count(flags)?;

        let count = self.grid.num_children();
        let mut map = vec![0; self.num_leaves()];
        let mut leaves = Vec::with_capacity(self.num_leaves());
        let mut gid = 0;

        while gid < self.num_leaves() {
            if !flags[gid] {
                map[gid] = leaves.len();
                leaves.push(self.location(gid));
                gid += 1;
                continue;
            }

            let Some(parent) = self.family_parent(gid) else {
                return Err(TreeError::InvalidCoarsenFlags(self.location(gid)));
            };

            if !flags[gid..gid + count].iter().all(|&flag| flag) {
                return Err(TreeError::InvalidCoarsenFlags(self.location(gid)));
            }

            map[gid..gid + count].fill(leaves.len());
            leaves.push(self.node_location(parent));
            gid += count;
        }

        *self = Self::from_leaves(self.grid, leaves)?;

        Ok(map)
    }

    // *************************
    // Helpers *****************

    fn check_flag_count(&self, flags: &[bool]) -> Result<(), TreeError> {
        if flags.len() != self.num_leaves() {
            return Err(TreeError::FlagCount {
                expected: self.num_leaves(),
                found: flags.len(),
            });
        }

        Ok(())
    }

    /// Directions that are meaningful for this tree's dimension.
    fn directions(&self) -> impl Iterator<Item = Region> {
        let dim = self.grid.dim();
        regions().filter(move |region| *region != Region::CENTRAL && region.is_valid_for(dim))
    }

    /// All blocks coarser than the given block which touch it.
    fn coarse_neighborhood(&self, gid: usize) -> Result<Vec<usize>, TreeError> {
        let loc = self.location(gid);
        let mut result = Vec::new();

        for region in self.directions() {
            let Some(neighbor) = self.find_neighbor(&loc, region)? else {
                continue;
            };

            if let NodeKind::Leaf { gid: ngid } = self.kind(neighbor) {
                if self.level(neighbor) < loc.level {
                    result.push(ngid);
                }
            }
        }

        Ok(result)
    }

    /// If `gid` is the first child of a parent whose children are all leaves, and
    /// that parent may become a block, returns the parent.
    fn family_parent(&self, gid: usize) -> Option<NodeId> {
        let leaf = self.leaf(gid);
        let parent = self.parent(leaf)?;

        if self.level(parent) < self.grid.root_level() {
            return None;
        }

        let NodeKind::Internal { children } = self.kind(parent) else {
            return None;
        };

        if children[Octant::empty().to_linear()] != leaf.0 {
            return None;
        }

        Octant::enumerate_dim(self.grid.dim())
            .all(|octant| self.is_leaf(NodeId(children[octant.to_linear()])))
            .then_some(parent)
    }

    /// True if any block in the family starting at `gid` touches a finer block.
    fn family_borders_finer(&self, gid: usize) -> Result<bool, TreeError> {
        for member in gid..gid + self.grid.num_children() {
            let loc = self.location(member);

            for region in self.directions() {
                if let Some(neighbor) = self.find_neighbor(&loc, region)? {
                    if !self.is_leaf(neighbor) {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Inserts a leaf, creating internal nodes along the way.
    fn insert(&mut self, loc: LogicalLocation) -> Result<(), TreeError> {
        if loc.level < self.grid.root_level() {
            return Err(TreeError::AboveRootLevel(loc, self.grid.root_level()));
        }

        if !self.grid.contains(&loc) {
            return Err(TreeError::OutsideDomain(loc));
        }

        if loc.level == 0 {
            // A single root block, the root itself becomes the leaf.
            let is_empty = matches!(
                self.nodes[0].kind,
                NodeKind::Internal { children } if children.iter().all(|&c| c == NULL)
            );

            if !is_empty {
                return Err(TreeError::Overlap(loc));
            }

            self.nodes[0].kind = NodeKind::Leaf { gid: NULL };
            return Ok(());
        }

        let mut node = 0;

        for depth in 0..loc.level {
            let octant = loc.octant_at(depth);
            let is_target = depth + 1 == loc.level;

            let NodeKind::Internal { children } = self.nodes[node].kind else {
                return Err(TreeError::Overlap(loc));
            };

            let child = children[octant.to_linear()];

            if child != NULL {
                if is_target {
                    return Err(TreeError::Overlap(loc));
                }

                node = child;
                continue;
            }

            let index = self.nodes.len();
            let child_loc = self.nodes[node].loc.child(octant);
            self.nodes.push(Node {
                loc: child_loc,
                parent: node,
                kind: if is_target {
                    NodeKind::Leaf { gid: NULL }
                } else {
                    NodeKind::Internal {
                        children: [NULL; Octant::COUNT],
                    }
                },
            });

            if let NodeKind::Internal { children } = &mut self.nodes[node].kind {
                children[octant.to_linear()] = index;
            }

            node = index;
        }

        Ok(())
    }

    /// Ensures that every internal node owns exactly the children that
    /// intersect the domain.
    fn validate(&self) -> Result<(), TreeError> {
        let dim = self.grid.dim();

        for node in self.nodes.iter() {
            let NodeKind::Internal { children } = node.kind else {
                continue;
            };

            for octant in Octant::enumerate() {
                let expected =
                    octant.is_valid_for(dim) && self.grid.contains(&node.loc.child(octant));
                let present = children[octant.to_linear()] != NULL;

                if expected != present {
                    return Err(TreeError::Incomplete(node.loc));
                }
            }
        }

        Ok(())
    }

    /// Numbers leaves by a depth first traversal in octant order.
    fn assign_gids(&mut self) {
        self.leaves.clear();

        let mut stack = vec![0];

        while let Some(node) = stack.pop() {
            match &mut self.nodes[node].kind {
                NodeKind::Leaf { gid } => {
                    *gid = self.leaves.len();
                    self.leaves.push(node);
                }
                NodeKind::Internal { children } => {
                    stack.extend(children.iter().rev().copied().filter(|&c| c != NULL));
                }
            }
        }
    }
}

impl DataSize for BlockTree {
    const IS_DYNAMIC: bool = true;
    const STATIC_HEAP_SIZE: usize = 0;

    fn estimate_heap_size(&self) -> usize {
        self.nodes.estimate_heap_size() + self.leaves.estimate_heap_size()
    }
}

/// Serialized form of a tree. Only leaves are stored; the arena is rebuilt
/// (and validated) on load.
#[derive(serde::Serialize, serde::Deserialize)]
struct TreeCheckpoint {
    grid: RootGrid,
    leaves: Vec<LogicalLocation>,
}

impl From<BlockTree> for TreeCheckpoint {
    fn from(value: BlockTree) -> Self {
        Self {
            grid: value.grid,
            leaves: value.locations().collect(),
        }
    }
}

impl TryFrom<TreeCheckpoint> for BlockTree {
    type Error = TreeError;

    fn try_from(value: TreeCheckpoint) -> Result<Self, Self::Error> {
        BlockTree::from_leaves(value.grid, value.leaves)
    }
}
