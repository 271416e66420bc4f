use std::ops::{Index, IndexMut};

use super::NUM_AXES;

/// Number of faces of a block.
pub const NUM_FACES: usize = 2 * NUM_AXES;

/// A face of a block. Faces are ordered `inner_x1, outer_x1, inner_x2, ...`,
/// which is also their linear index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Face {
    pub axis: usize,
    pub side: bool,
}

impl Face {
    /// Face on negative side of axis.
    pub fn negative(axis: usize) -> Self {
        assert!(axis < NUM_AXES);
        Self { axis, side: false }
    }

    /// Face on positive side of axis.
    pub fn positive(axis: usize) -> Self {
        assert!(axis < NUM_AXES);
        Self { axis, side: true }
    }

    pub fn reversed(self) -> Self {
        Self {
            axis: self.axis,
            side: !self.side,
        }
    }

    /// Transforms a face into a linear index.
    pub fn to_linear(self) -> usize {
        2 * self.axis + self.side as usize
    }

    /// Constructs a face from a linear index.
    pub fn from_linear(linear: usize) -> Self {
        assert!(linear < NUM_FACES);

        Self {
            axis: linear / 2,
            side: linear % 2 == 1,
        }
    }
}

/// Iterator over all faces of a block.
#[derive(Debug)]
pub struct FaceIter {
    axis: usize,
    side: bool,
}

impl Iterator for FaceIter {
    type Item = Face;

    fn next(&mut self) -> Option<Self::Item> {
        if self.axis >= NUM_AXES {
            return None;
        }

        let result = Face {
            axis: self.axis,
            side: self.side,
        };

        self.axis += self.side as usize;
        self.side = !self.side;

        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = NUM_FACES - (2 * self.axis + self.side as usize);
        (len, Some(len))
    }
}

impl ExactSizeIterator for FaceIter {}

/// Iterates over all faces of a block.
pub fn faces() -> FaceIter {
    FaceIter {
        axis: 0,
        side: false,
    }
}

/// Stores one value for each face of a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct FaceArray<T>([T; NUM_FACES]);

impl<T> FaceArray<T> {
    pub fn from_fn(mut f: impl FnMut(Face) -> T) -> Self {
        Self(std::array::from_fn(|linear| f(Face::from_linear(linear))))
    }

    pub fn into_inner(self) -> [T; NUM_FACES] {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Face, &T)> {
        faces().zip(self.0.iter())
    }
}

impl<T> From<[T; NUM_FACES]> for FaceArray<T> {
    fn from(value: [T; NUM_FACES]) -> Self {
        Self(value)
    }
}

impl<T> Index<Face> for FaceArray<T> {
    type Output = T;

    fn index(&self, face: Face) -> &Self::Output {
        &self.0[face.to_linear()]
    }
}

impl<T> IndexMut<Face> for FaceArray<T> {
    fn index_mut(&mut self, face: Face) -> &mut Self::Output {
        &mut self.0[face.to_linear()]
    }
}
