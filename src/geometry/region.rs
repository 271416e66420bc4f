use super::{Face, Octant, NUM_AXES};

/// Position along a single axis relative to a block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Side {
    Left = 0,
    Middle = 1,
    Right = 2,
}

impl Side {
    pub fn reverse(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
            Self::Middle => Self::Middle,
        }
    }

    /// Converts an offset in `{-1, 0, 1}` into a side.
    pub fn from_offset(offset: i32) -> Option<Self> {
        match offset {
            -1 => Some(Self::Left),
            0 => Some(Self::Middle),
            1 => Some(Self::Right),
            _ => None,
        }
    }

    pub fn offset(self) -> i32 {
        self as i32 - 1
    }
}

/// One of the 27 regions around (and including) a block, i.e. a direction
/// `(ox1, ox2, ox3)` with each component in `{-1, 0, 1}`. Face neighbors lie in
/// regions with one non-middle side, edges with two, corners with three.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Region {
    sides: [Side; NUM_AXES],
}

impl Region {
    /// Number of regions.
    pub const COUNT: usize = 27;

    /// The block itself.
    pub const CENTRAL: Self = Self::new([Side::Middle; NUM_AXES]);

    pub const fn new(sides: [Side; NUM_AXES]) -> Self {
        Self { sides }
    }

    /// Builds a region from a direction tuple. Returns `None` if any component
    /// lies outside `{-1, 0, 1}`.
    pub fn from_offsets(offsets: [i32; NUM_AXES]) -> Option<Self> {
        Some(Self::new([
            Side::from_offset(offsets[0])?,
            Side::from_offset(offsets[1])?,
            Side::from_offset(offsets[2])?,
        ]))
    }

    /// Region adjacent to the given face.
    pub fn from_face(face: Face) -> Self {
        let mut result = Self::CENTRAL;
        result.sides[face.axis] = if face.side { Side::Right } else { Side::Left };
        result
    }

    pub fn side(&self, axis: usize) -> Side {
        self.sides[axis]
    }

    pub fn sides(&self) -> [Side; NUM_AXES] {
        self.sides
    }

    pub fn offsets(&self) -> [i32; NUM_AXES] {
        self.sides.map(Side::offset)
    }

    pub fn reverse(&self) -> Self {
        Self::new(self.sides.map(Side::reverse))
    }

    /// Number of axes along which this region leaves the block
    /// (1 for faces, 2 for edges, 3 for corners).
    pub fn adjacency(&self) -> usize {
        self.sides
            .into_iter()
            .filter(|&s| s != Side::Middle)
            .count()
    }

    /// True if the region only moves along the first `dim` axes.
    pub fn is_valid_for(&self, dim: usize) -> bool {
        (dim..NUM_AXES).all(|axis| self.sides[axis] == Side::Middle)
    }

    /// Iterates over all faces one has to cross to reach the region.
    pub fn adjacent_faces(&self) -> impl Iterator<Item = Face> + '_ {
        (0..NUM_AXES)
            .filter(|&axis| self.side(axis) != Side::Middle)
            .map(|axis| Face {
                axis,
                side: self.side(axis) == Side::Right,
            })
    }

    /// Children (of a node in a `dim` dimensional tree) which touch this region
    /// of their parent, in octant order.
    pub fn adjacent_octants(&self, dim: usize) -> impl Iterator<Item = Octant> + '_ {
        Octant::enumerate_dim(dim).filter(move |octant| {
            (0..dim).all(|axis| match self.side(axis) {
                Side::Left => !octant.is_set(axis),
                Side::Right => octant.is_set(axis),
                Side::Middle => true,
            })
        })
    }
}

/// Iterator over all regions, with the first axis varying fastest.
pub struct RegionIter {
    cursor: usize,
}

impl Iterator for RegionIter {
    type Item = Region;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= Region::COUNT {
            return None;
        }

        let linear = self.cursor;
        self.cursor += 1;

        let side = |digit: usize| match digit {
            0 => Side::Left,
            1 => Side::Middle,
            _ => Side::Right,
        };

        Some(Region::new([
            side(linear % 3),
            side((linear / 3) % 3),
            side(linear / 9),
        ]))
    }
}

pub fn regions() -> RegionIter {
    RegionIter { cursor: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets() {
        let region = Region::from_offsets([-1, 0, 1]).unwrap();
        assert_eq!(region.sides(), [Side::Left, Side::Middle, Side::Right]);
        assert_eq!(region.offsets(), [-1, 0, 1]);
        assert_eq!(region.reverse().offsets(), [1, 0, -1]);
        assert_eq!(region.adjacency(), 2);
        assert!(Region::from_offsets([2, 0, 0]).is_none());

        assert_eq!(
            Region::from_face(Face::positive(1)).offsets(),
            [0, 1, 0]
        );
    }

    #[test]
    fn enumeration() {
        assert_eq!(regions().count(), Region::COUNT);
        assert_eq!(regions().filter(|r| *r == Region::CENTRAL).count(), 1);
        assert_eq!(regions().filter(|r| r.adjacency() == 1).count(), 6);
        assert_eq!(regions().filter(|r| r.adjacency() == 2).count(), 12);
        assert_eq!(regions().filter(|r| r.adjacency() == 3).count(), 8);
        assert_eq!(regions().filter(|r| r.is_valid_for(2)).count(), 9);
    }

    #[test]
    fn adjacent_octants() {
        let face = Region::from_face(Face::negative(0));
        let octants: Vec<_> = face.adjacent_octants(3).map(Octant::to_linear).collect();
        assert_eq!(octants, vec![0, 2, 4, 6]);

        let edge = Region::from_offsets([1, 1, 0]).unwrap();
        let octants: Vec<_> = edge.adjacent_octants(3).map(Octant::to_linear).collect();
        assert_eq!(octants, vec![3, 7]);

        let corner = Region::from_offsets([1, -1, 1]).unwrap();
        let octants: Vec<_> = corner.adjacent_octants(3).map(Octant::to_linear).collect();
        assert_eq!(octants, vec![5]);

        let face = Region::from_face(Face::positive(1));
        let octants: Vec<_> = face.adjacent_octants(2).map(Octant::to_linear).collect();
        assert_eq!(octants, vec![2, 3]);
    }
}
