/// Number of axes of a logical location. Meshes of lower dimension keep the
/// extra axes degenerate (a single block spans them).
pub const NUM_AXES: usize = 3;

/// Identifies one of the eight children of an octree node. Bit `axis` is set if
/// the child lies in the upper half of its parent along that axis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Octant(u8);

impl Octant {
    pub const COUNT: usize = 8;

    /// Iterates all octants in linear order.
    pub const fn enumerate() -> OctantIter {
        OctantIter {
            cursor: 0,
            end: Self::COUNT,
        }
    }

    /// Iterates the `2^dim` octants a node may own in a mesh of the given
    /// dimension. Bits along degenerate axes are always clear.
    pub fn enumerate_dim(dim: usize) -> OctantIter {
        debug_assert!(dim <= NUM_AXES);
        OctantIter {
            cursor: 0,
            end: 1 << dim,
        }
    }

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_linear(linear: usize) -> Self {
        debug_assert!(linear < Self::COUNT);
        Self(linear as u8)
    }

    pub fn to_linear(self) -> usize {
        self.0 as usize
    }

    pub fn pack(bits: [bool; NUM_AXES]) -> Self {
        let mut result = Self::empty();

        for (axis, bit) in bits.into_iter().enumerate() {
            result.set_to(axis, bit);
        }

        result
    }

    pub fn unpack(self) -> [bool; NUM_AXES] {
        let mut result = [false; NUM_AXES];

        for axis in 0..NUM_AXES {
            result[axis] = self.is_set(axis);
        }

        result
    }

    pub fn set_to(&mut self, axis: usize, value: bool) {
        self.0 &= !(1 << axis);
        self.0 |= (value as u8) << axis;
    }

    pub fn toggled(mut self, axis: usize) -> Self {
        self.0 ^= 1 << axis;
        self
    }

    pub fn is_set(self, axis: usize) -> bool {
        (self.0 & (1 << axis)) != 0
    }

    /// Returns true if this octant has no bit set along any axis `>= dim`.
    pub fn is_valid_for(self, dim: usize) -> bool {
        (self.0 as usize) < (1 << dim)
    }
}

pub struct OctantIter {
    cursor: usize,
    end: usize,
}

impl Iterator for OctantIter {
    type Item = Octant;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }

        let result = self.cursor;
        self.cursor += 1;
        Some(Octant::from_linear(result))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.end - self.cursor;
        (len, Some(len))
    }
}

impl ExactSizeIterator for OctantIter {}
