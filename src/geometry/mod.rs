//! Geometric primitives for block structured meshes (octants, faces, regions, logical
//! locations) and the block tree built from them.

mod axis;
mod face;
mod location;
mod region;
mod tree;

pub use axis::{Octant, OctantIter, NUM_AXES};
pub use face::{faces, Face, FaceArray, FaceIter, NUM_FACES};
pub use location::LogicalLocation;
pub use region::{regions, Region, RegionIter, Side};
pub use tree::{BlockTree, NodeId, NodeKind, RootGrid, TreeError, NULL};
