//! Classification of block faces into domain boundaries and inter-block boundaries.

use crate::geometry::{faces, Face, FaceArray, LogicalLocation, RootGrid};

/// Indicates what kind of boundary lies along a particular face of a block.
///
/// Every variant except `Block` names a global domain boundary condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryFlag {
    /// The face is shared with another block, ghost cells are filled by exchange.
    Block,
    Reflect,
    Inflow,
    #[default]
    Outflow,
    /// Outflow which prevents inflow into the domain.
    Diode,
    /// Ghost cells are filled by a user supplied function.
    User,
    /// The domain wraps around, the face still has a neighbor.
    Periodic,
    ShearPeriodic,
    Vacuum,
}

impl BoundaryFlag {
    /// Does this face wrap around to the opposite side of the domain?
    pub fn is_periodic(self) -> bool {
        matches!(self, Self::Periodic | Self::ShearPeriodic)
    }

    /// Is this face filled by applying a boundary condition rather than by
    /// exchanging with a neighbor?
    pub fn is_physical(self) -> bool {
        !matches!(self, Self::Block) && !self.is_periodic()
    }
}

/// Global boundary conditions, one per face of the domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BoundaryConds {
    pub inner_x1: BoundaryFlag,
    pub outer_x1: BoundaryFlag,
    pub inner_x2: BoundaryFlag,
    pub outer_x2: BoundaryFlag,
    pub inner_x3: BoundaryFlag,
    pub outer_x3: BoundaryFlag,
}

impl BoundaryConds {
    /// Applies the same condition to every face.
    pub fn uniform(flag: BoundaryFlag) -> Self {
        Self::from(FaceArray::from_fn(|_| flag))
    }

    /// Condition along the given face of the domain.
    pub fn flag(&self, face: Face) -> BoundaryFlag {
        match (face.axis, face.side) {
            (0, false) => self.inner_x1,
            (0, true) => self.outer_x1,
            (1, false) => self.inner_x2,
            (1, true) => self.outer_x2,
            (2, false) => self.inner_x3,
            _ => self.outer_x3,
        }
    }

    pub fn to_faces(&self) -> FaceArray<BoundaryFlag> {
        FaceArray::from_fn(|face| self.flag(face))
    }
}

impl From<FaceArray<BoundaryFlag>> for BoundaryConds {
    fn from(value: FaceArray<BoundaryFlag>) -> Self {
        let [inner_x1, outer_x1, inner_x2, outer_x2, inner_x3, outer_x3] = value.into_inner();

        Self {
            inner_x1,
            outer_x1,
            inner_x2,
            outer_x2,
            inner_x3,
            outer_x3,
        }
    }
}

/// Decides, for each face of a block, whether it lies on the domain boundary.
#[derive(Clone, Copy, Debug)]
pub struct BoundaryClassifier {
    grid: RootGrid,
    conds: FaceArray<BoundaryFlag>,
}

impl BoundaryClassifier {
    pub fn new(grid: RootGrid, conds: &BoundaryConds) -> Self {
        Self {
            grid,
            conds: conds.to_faces(),
        }
    }

    /// Classifies every face of the block at `loc`. Faces on the outer edge of the
    /// domain take the global condition of that face, all others are `Block`.
    /// Both faces of a degenerate axis always take the global condition.
    pub fn classify(&self, loc: &LogicalLocation) -> FaceArray<BoundaryFlag> {
        let mut result = FaceArray::from_fn(|_| BoundaryFlag::Block);

        for face in faces() {
            if face.axis >= self.grid.dim() {
                result[face] = self.conds[face];
                continue;
            }

            let index = loc.lx[face.axis];
            let on_boundary = if face.side {
                index == self.grid.extent(loc.level, face.axis) - 1
            } else {
                index == 0
            };

            if on_boundary {
                result[face] = self.conds[face];
            }
        }

        result
    }
}
