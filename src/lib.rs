#![allow(clippy::needless_range_loop)]

//! Neighbor topology and domain decomposition for block structured, adaptively
//! refined meshes.
//!
//! Blocks are the leaves of a `BlockTree`. From the tree this crate derives, for
//! every block, the boundary flags of its faces and a table of neighbors across
//! faces, edges and corners (including neighbors one level coarser or finer), and
//! distributes blocks over workers in cost balanced, contiguous ranges.

pub mod geometry;
pub mod mesh;

/// Provides common types used for most `blockmesh` applications.
pub mod prelude {
    pub use crate::geometry::{
        BlockTree, Face, FaceArray, LogicalLocation, Octant, Region, RootGrid, TreeError,
    };
    pub use crate::mesh::{
        BoundaryConds, BoundaryFlag, Decomposition, Mesh, MeshBlockTopology, MeshConfig,
        MeshError, NeighborEntry,
    };
}
