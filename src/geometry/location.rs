use super::{Octant, Region, NUM_AXES};

/// Position of a block (or tree node) in octree space. At `level` the domain is
/// tiled by blocks of equal size, and `lx` counts blocks from the lower corner
/// along each axis.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    datasize::DataSize,
)]
pub struct LogicalLocation {
    pub level: u32,
    pub lx: [i64; NUM_AXES],
}

impl LogicalLocation {
    /// The location of the tree's root node.
    pub const ROOT: Self = Self {
        level: 0,
        lx: [0; NUM_AXES],
    };

    pub const fn new(level: u32, lx: [i64; NUM_AXES]) -> Self {
        Self { level, lx }
    }

    pub fn lx1(&self) -> i64 {
        self.lx[0]
    }

    pub fn lx2(&self) -> i64 {
        self.lx[1]
    }

    pub fn lx3(&self) -> i64 {
        self.lx[2]
    }

    /// Location of the node containing this one, one level up.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }

        Some(Self {
            level: self.level - 1,
            lx: self.lx.map(|x| x >> 1),
        })
    }

    /// Location of the given child, one level down.
    pub fn child(&self, octant: Octant) -> Self {
        let mut lx = self.lx;

        for axis in 0..NUM_AXES {
            lx[axis] = 2 * lx[axis] + octant.is_set(axis) as i64;
        }

        Self {
            level: self.level + 1,
            lx,
        }
    }

    /// Which child of its parent this location is.
    pub fn octant(&self) -> Octant {
        Octant::pack(self.lx.map(|x| x & 1 == 1))
    }

    /// The octant taken at `depth` (`0 <= depth < level`) when descending from the
    /// root to this location.
    pub fn octant_at(&self, depth: u32) -> Octant {
        debug_assert!(depth < self.level);
        let shift = self.level - depth - 1;
        Octant::pack(self.lx.map(|x| (x >> shift) & 1 == 1))
    }

    /// Moves one block in the given direction at the same level. The result may
    /// lie outside of the domain.
    pub fn shifted(&self, region: Region) -> Self {
        let offsets = region.offsets();

        Self {
            level: self.level,
            lx: std::array::from_fn(|axis| self.lx[axis] + offsets[axis] as i64),
        }
    }

    /// True if `other` is this location or one of its descendants.
    pub fn contains(&self, other: &Self) -> bool {
        if other.level < self.level {
            return false;
        }

        let shift = other.level - self.level;
        (0..NUM_AXES).all(|axis| other.lx[axis] >> shift == self.lx[axis])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_and_children() {
        let loc = LogicalLocation::new(2, [3, 1, 0]);
        let parent = loc.parent().unwrap();
        assert_eq!(parent, LogicalLocation::new(1, [1, 0, 0]));
        assert_eq!(loc.octant(), Octant::pack([true, true, false]));
        assert_eq!(parent.child(loc.octant()), loc);
        assert!(LogicalLocation::ROOT.parent().is_none());

        assert!(parent.contains(&loc));
        assert!(LogicalLocation::ROOT.contains(&loc));
        assert!(!loc.contains(&parent));
        assert!(!LogicalLocation::new(1, [0, 0, 0]).contains(&loc));
    }

    #[test]
    fn descent_path() {
        let loc = LogicalLocation::new(3, [0b101, 0b011, 0]);
        assert_eq!(loc.octant_at(0), Octant::pack([true, false, false]));
        assert_eq!(loc.octant_at(1), Octant::pack([false, true, false]));
        assert_eq!(loc.octant_at(2), Octant::pack([true, true, false]));

        let mut cursor = LogicalLocation::ROOT;
        for depth in 0..loc.level {
            cursor = cursor.child(loc.octant_at(depth));
        }
        assert_eq!(cursor, loc);
    }

    #[test]
    fn shifting() {
        let loc = LogicalLocation::new(1, [0, 1, 1]);
        let region = Region::from_offsets([-1, 1, 0]).unwrap();
        assert_eq!(loc.shifted(region), LogicalLocation::new(1, [-1, 2, 1]));
    }
}
