//! Neighbor tables for mesh blocks.
//!
//! Each block stores one slot per direction it may exchange data along: 2 in 1D,
//! 8 in 2D and 26 in 3D. Slots are ordered
//!
//! | slots   | directions           |
//! |---------|----------------------|
//! | 0..2    | x1 faces             |
//! | 2..4    | x2 faces             |
//! | 4..8    | x1-x2 edges          |
//! | 8..10   | x3 faces             |
//! | 10..14  | x3-x1 edges          |
//! | 14..18  | x2-x3 edges          |
//! | 18..26  | corners              |
//!
//! and within each group the first listed axis varies fastest, negative direction first.
//! Applying the same formula to the reversed direction yields the reciprocal slot,
//! which is what a neighbor must use to address data sent back to this block.

use datasize::DataSize;

use crate::geometry::{regions, BlockTree, NodeKind, Octant, Region, Side, TreeError, NUM_AXES};

use super::TopologyError;

/// Maximum number of slots of any neighbor table.
pub const MAX_SLOTS: usize = 26;

/// A single neighbor of a block, in a layout that can be handed directly to a
/// transport layer. Absent neighbors have every field set to `-1`.
#[repr(C)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, DataSize,
)]
pub struct NeighborEntry {
    /// Global id of the neighbor.
    pub gid: i32,
    /// Refinement level of the neighbor.
    pub level: i32,
    /// Worker which owns the neighbor.
    pub rank: i32,
    /// Slot at which the neighbor stores this block.
    pub destn: i32,
}

impl NeighborEntry {
    pub const NONE: Self = Self {
        gid: -1,
        level: -1,
        rank: -1,
        destn: -1,
    };

    pub fn is_none(&self) -> bool {
        self.gid < 0
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }
}

impl Default for NeighborEntry {
    fn default() -> Self {
        Self::NONE
    }
}

/// Number of neighbor slots for a mesh of the given dimension.
pub fn num_slots(dim: usize) -> usize {
    match dim {
        1 => 2,
        2 => 8,
        _ => 26,
    }
}

/// Number of entries per slot. A slot holds one entry for a neighbor at the same
/// or a coarser level, and one per finer block touching the slot's face, edge or corner.
pub fn slot_width(dim: usize) -> usize {
    1 << (dim.clamp(1, NUM_AXES) - 1)
}

/// Linear slot index of the given direction, or `None` for the central region.
pub fn slot_index(region: Region) -> Option<usize> {
    let [n, m, l] = region.offsets();
    // Maps -1 to 0, 1 to 1.
    let half = |o: i32| ((1 + o) / 2) as usize;
    let full = |o: i32| (1 + o) as usize;

    let slot = match (n != 0, m != 0, l != 0) {
        (false, false, false) => return None,
        (true, false, false) => half(n),
        (false, true, false) => 2 + half(m),
        (true, true, false) => 4 + full(m) + half(n),
        (false, false, true) => 8 + half(l),
        (true, false, true) => 10 + full(l) + half(n),
        (false, true, true) => 14 + full(l) + half(m),
        (true, true, true) => 18 + 2 * full(l) + full(m) + half(n),
    };

    Some(slot)
}

/// Slot at which a neighbor in direction `region` stores this block.
pub fn reciprocal_slot(region: Region) -> Option<usize> {
    slot_index(region.reverse())
}

/// Direction associated with a slot.
pub fn slot_region(slot: usize) -> Option<Region> {
    regions().find(|&region| slot_index(region) == Some(slot))
}

/// Directions of a `dim` dimensional neighbor table, in slot order.
pub fn slot_regions(dim: usize) -> impl Iterator<Item = Region> {
    (0..num_slots(dim)).filter_map(slot_region)
}

/// Fills neighbor tables by walking a block tree.
///
/// Ranks are looked up in an externally supplied gid to worker map. Resolution
/// never mutates the tree, so a resolver may be shared across threads.
#[derive(Clone, Copy, Debug)]
pub struct NeighborResolver<'a> {
    tree: &'a BlockTree,
    ranks: &'a [usize],
}

impl<'a> NeighborResolver<'a> {
    pub fn new(tree: &'a BlockTree, ranks: &'a [usize]) -> Self {
        Self { tree, ranks }
    }

    pub fn dim(&self) -> usize {
        self.tree.grid().dim()
    }

    /// Length of one block's neighbor table (slots times entries per slot).
    pub fn row_len(&self) -> usize {
        num_slots(self.dim()) * slot_width(self.dim())
    }

    /// Computes the neighbor table of a single block. Entry `k` of slot `s` is
    /// stored at `s * slot_width + k`.
    pub fn resolve_row(&self, gid: usize) -> Result<Vec<NeighborEntry>, TopologyError> {
        let mut row = vec![NeighborEntry::NONE; self.row_len()];
        self.fill_row(gid, &mut row)?;
        Ok(row)
    }

    /// Fills a row of length `row_len()`, which must start out empty.
    fn fill_row(&self, gid: usize, row: &mut [NeighborEntry]) -> Result<(), TopologyError> {
        let dim = self.dim();
        let width = slot_width(dim);

        let loc = self.tree.location(gid);

        for region in slot_regions(dim) {
            let (Some(slot), Some(destn)) = (slot_index(region), reciprocal_slot(region)) else {
                continue;
            };

            let Some(node) = self.tree.find_neighbor(&loc, region)? else {
                // Physical boundary.
                continue;
            };

            let entries = &mut row[slot * width..(slot + 1) * width];

            match self.tree.kind(node) {
                NodeKind::Leaf { gid: neighbor } => {
                    let level = self.tree.level(node);

                    if loc.level - level > 1 {
                        return Err(TopologyError::LevelJump {
                            gid,
                            neighbor: self.tree.node_location(node),
                        });
                    }

                    // A coarser block reached through an edge or corner which does not lie
                    // on the matching edge or corner of our parent is already a face (or
                    // edge) neighbor, and covers this region from there.
                    if level < loc.level && !on_parent_boundary(loc.octant(), region) {
                        continue;
                    }

                    entries[0] = self.entry(neighbor, level, destn)?;
                }
                NodeKind::Internal { .. } => {
                    // Neighbor is finer, record every child facing this block.
                    for (k, octant) in region.reverse().adjacent_octants(dim).enumerate() {
                        let child = self.tree.get_leaf(node, octant).map_err(|err| match err {
                            TreeError::NotALeaf(neighbor) => {
                                TopologyError::LevelJump { gid, neighbor }
                            }
                            err => err.into(),
                        })?;

                        let neighbor = self
                            .tree
                            .gid(child)
                            .ok_or(TreeError::NotALeaf(self.tree.node_location(child)))?;

                        entries[k] = self.entry(neighbor, self.tree.level(child), destn)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn entry(&self, gid: usize, level: u32, destn: usize) -> Result<NeighborEntry, TopologyError> {
        let rank = *self
            .ranks
            .get(gid)
            .ok_or(TopologyError::MissingRank(gid))?;

        Ok(NeighborEntry {
            gid: to_i32(gid)?,
            level: to_i32(level as usize)?,
            rank: to_i32(rank)?,
            destn: to_i32(destn)?,
        })
    }
}

fn to_i32(value: usize) -> Result<i32, TopologyError> {
    i32::try_from(value).map_err(|_| TopologyError::Overflow(value))
}

/// True if a child in the given octant touches the boundary of its parent along
/// every axis the direction crosses.
fn on_parent_boundary(octant: Octant, region: Region) -> bool {
    (0..NUM_AXES).all(|axis| match region.side(axis) {
        Side::Left => !octant.is_set(axis),
        Side::Right => octant.is_set(axis),
        Side::Middle => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Face, LogicalLocation, RootGrid};

    fn build_tables(tree: &BlockTree, ranks: &[usize]) -> Vec<Vec<NeighborEntry>> {
        let resolver = NeighborResolver::new(tree, ranks);
        (0..tree.num_leaves())
            .map(|gid| resolver.resolve_row(gid).unwrap())
            .collect()
    }

    /// Every recorded neighbor must record us back at the reciprocal slot.
    fn check_reciprocity(tree: &BlockTree, tables: &[Vec<NeighborEntry>]) {
        let width = slot_width(tree.grid().dim());

        for (gid, row) in tables.iter().enumerate() {
            for (index, entry) in row.iter().enumerate() {
                if entry.is_none() {
                    continue;
                }

                let slot = index / width;
                let destn = entry.destn as usize;
                let other = &tables[entry.gid as usize][destn * width..(destn + 1) * width];

                let back = other
                    .iter()
                    .find(|e| e.gid == gid as i32)
                    .unwrap_or_else(|| panic!("block {gid} slot {slot} is not reciprocated"));

                assert_eq!(back.destn as usize, slot);
                assert_eq!(back.level as u32, tree.location(gid).level);
            }
        }
    }

    #[test]
    fn slot_layout() {
        for dim in 1..=3 {
            let mut slots: Vec<_> = regions()
                .filter(|r| r.is_valid_for(dim))
                .filter_map(slot_index)
                .collect();
            slots.sort();
            assert_eq!(slots, (0..num_slots(dim)).collect::<Vec<_>>());
            assert_eq!(slot_regions(dim).count(), num_slots(dim));
        }

        for region in regions().filter(|&r| r != Region::CENTRAL) {
            let slot = slot_index(region).unwrap();
            let destn = reciprocal_slot(region).unwrap();
            assert_eq!(slot_region(slot), Some(region));
            assert_eq!(reciprocal_slot(slot_region(destn).unwrap()), Some(slot));
        }

        let offsets = |slot| slot_region(slot).unwrap().offsets();
        assert_eq!(offsets(0), [-1, 0, 0]);
        assert_eq!(offsets(3), [0, 1, 0]);
        assert_eq!(offsets(5), [1, -1, 0]);
        assert_eq!(offsets(9), [0, 0, 1]);
        assert_eq!(offsets(12), [-1, 0, 1]);
        assert_eq!(offsets(15), [0, 1, -1]);
        assert_eq!(offsets(18), [-1, -1, -1]);
        assert_eq!(offsets(25), [1, 1, 1]);

        assert_eq!(slot_index(Region::CENTRAL), None);
        assert_eq!(slot_width(1), 1);
        assert_eq!(slot_width(3), 4);
    }

    #[test]
    fn one_dimensional() {
        let grid = RootGrid::new(1, [4, 1, 1], [false; 3]).unwrap();
        let tree = BlockTree::new(grid);
        let ranks = [0, 0, 1, 1];
        let tables = build_tables(&tree, &ranks);

        assert_eq!(tables[0][0], NeighborEntry::NONE);
        assert_eq!(
            tables[0][1],
            NeighborEntry {
                gid: 1,
                level: 2,
                rank: 0,
                destn: 0
            }
        );
        assert_eq!(tables[2][0].gid, 1);
        assert_eq!(tables[2][0].destn, 1);
        assert_eq!(tables[1][1].rank, 1);
        assert_eq!(tables[3][1], NeighborEntry::NONE);

        check_reciprocity(&tree, &tables);
    }

    #[test]
    fn uniform_counts() {
        for (dim, blocks) in [(1, [3, 1, 1]), (2, [3, 3, 1]), (3, [3, 3, 3])] {
            let grid = RootGrid::new(dim, blocks, [false; 3]).unwrap();
            let tree = BlockTree::new(grid);
            let ranks = vec![0; tree.num_leaves()];
            let tables = build_tables(&tree, &ranks);

            for (gid, row) in tables.iter().enumerate() {
                let loc = tree.location(gid);
                let interior = (0..dim).all(|axis| loc.lx[axis] == 1);

                // Uniform meshes only ever use the first entry of a slot.
                for (slot, entries) in row.chunks(slot_width(dim)).enumerate() {
                    assert!(entries[1..].iter().all(NeighborEntry::is_none));

                    let region = slot_region(slot).unwrap();
                    let leaves = (0..dim).any(|axis| {
                        let offset = region.offsets()[axis] as i64;
                        loc.lx[axis] + offset < 0 || loc.lx[axis] + offset >= 3
                    });
                    assert_eq!(entries[0].is_none(), leaves);
                }

                if interior {
                    assert_eq!(
                        row.iter().filter(|e| e.is_some()).count(),
                        num_slots(dim)
                    );
                }
            }

            check_reciprocity(&tree, &tables);

            let periodic = BlockTree::new(RootGrid::new(dim, blocks, [true; 3]).unwrap());
            let tables = build_tables(&periodic, &ranks);
            for row in tables.iter() {
                assert_eq!(row.iter().filter(|e| e.is_some()).count(), num_slots(dim));
            }
            check_reciprocity(&periodic, &tables);
        }
    }

    #[test]
    fn finer_face_neighbors() {
        let grid = RootGrid::new(3, [2, 2, 2], [false; 3]).unwrap();
        let mut tree = BlockTree::new(grid);
        let mut flags = vec![false; 8];
        flags[0] = true;
        tree.refine(&flags).unwrap();

        let ranks: Vec<_> = (0..tree.num_leaves()).map(|gid| gid / 4).collect();
        let tables = build_tables(&tree, &ranks);
        let width = slot_width(3);

        // Root block at (1, 0, 0) is now gid 8, its inner x1 face touches four children.
        let coarse = 8;
        assert_eq!(tree.location(coarse), LogicalLocation::new(1, [1, 0, 0]));

        let face = slot_index(Region::from_face(Face::negative(0))).unwrap();
        let entries = &tables[coarse][face * width..(face + 1) * width];
        let gids: Vec<_> = entries.iter().map(|e| e.gid).collect();
        assert_eq!(gids, vec![1, 3, 5, 7]);

        for entry in entries {
            assert_eq!(entry.level, 2);
            assert_eq!(entry.destn, 1);
            assert_eq!(entry.rank, ranks[entry.gid as usize] as i32);

            // Each child reports the coarse block on its outer x1 face.
            let back = tables[entry.gid as usize][width];
            assert_eq!(back.gid, coarse as i32);
            assert_eq!(back.level, 1);
            assert_eq!(back.destn, 0);
        }

        // Children tile the face exactly.
        let mut tiles: Vec<_> = entries
            .iter()
            .map(|e| {
                let lx = tree.location(e.gid as usize).lx;
                (lx[1], lx[2])
            })
            .collect();
        tiles.sort();
        assert_eq!(tiles, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        // Block (1, 1, 0) touches the refined block along an x1-x2 edge.
        let diagonal = 10;
        assert_eq!(tree.location(diagonal), LogicalLocation::new(1, [1, 1, 0]));
        let edge = slot_index(Region::from_offsets([-1, -1, 0]).unwrap()).unwrap();
        let entries = &tables[diagonal][edge * width..(edge + 1) * width];
        assert_eq!(entries[0].gid, 3);
        assert_eq!(entries[1].gid, 7);
        assert!(entries[2].is_none() && entries[3].is_none());

        // And at a corner.
        let corner = 14;
        assert_eq!(tree.location(corner), LogicalLocation::new(1, [1, 1, 1]));
        let slot = slot_index(Region::from_offsets([-1, -1, -1]).unwrap()).unwrap();
        assert_eq!(tables[corner][slot * width].gid, 7);
        assert_eq!(tables[corner][slot * width].destn, 25);

        check_reciprocity(&tree, &tables);
    }

    #[test]
    fn mixed_refinement_reciprocity() {
        for dim in 1..=3 {
            let blocks = std::array::from_fn(|axis| if axis < dim { 3 } else { 1 });
            for periodic in [false, true] {
                let grid = RootGrid::new(dim, blocks, [periodic; 3]).unwrap();
                let mut tree = BlockTree::new(grid);

                let mut flags: Vec<_> = (0..tree.num_leaves()).map(|gid| gid % 3 == 0).collect();
                tree.balance_refine_flags(&mut flags).unwrap();
                tree.refine(&flags).unwrap();

                let mut flags: Vec<_> = (0..tree.num_leaves()).map(|gid| gid % 7 == 2).collect();
                tree.balance_refine_flags(&mut flags).unwrap();
                tree.refine(&flags).unwrap();

                let ranks = vec![0; tree.num_leaves()];
                let tables = build_tables(&tree, &ranks);
                check_reciprocity(&tree, &tables);
            }
        }
    }

    #[test]
    fn errors() {
        let grid = RootGrid::new(1, [2, 1, 1], [false; 3]).unwrap();
        let mut tree = BlockTree::new(grid);

        let resolver = NeighborResolver::new(&tree, &[0]);
        assert_eq!(resolver.resolve_row(0), Err(TopologyError::MissingRank(1)));

        // Unbalanced trees are rejected.
        tree.refine(&[true, false]).unwrap();
        tree.refine(&[false, true, false]).unwrap();
        let ranks = vec![0; tree.num_leaves()];
        let resolver = NeighborResolver::new(&tree, &ranks);
        assert!(matches!(
            resolver.resolve_row(tree.num_leaves() - 1),
            Err(TopologyError::LevelJump { .. })
        ));
        assert_eq!(
            resolver.resolve_row(2),
            Err(TopologyError::LevelJump {
                gid: 2,
                neighbor: LogicalLocation::new(1, [1, 0, 0])
            })
        );
    }

    #[test]
    fn parent_boundary() {
        let edge = Region::from_offsets([1, 1, 0]).unwrap();
        assert!(on_parent_boundary(Octant::pack([true, true, false]), edge));
        assert!(on_parent_boundary(Octant::pack([true, true, true]), edge));
        assert!(!on_parent_boundary(Octant::pack([true, false, false]), edge));

        let face = Region::from_face(Face::negative(2));
        assert!(on_parent_boundary(Octant::pack([true, true, false]), face));
        assert!(!on_parent_boundary(Octant::pack([false, false, true]), face));
    }
}
