//! # Voxels Module
//!
//! Sparse chunked storage of cell state and the dirty-tracking structure the
//! scheduler works from.
//!
//! ## Coordinate Spaces
//!
//! * **Cell coordinates** (`Point3<i32>`) address a single cell in the world.
//! * **Chunk coordinates** (`Point3<i32>`) address a 16x16x16 chunk; a cell at
//!   `c` lives in chunk `c.div_euclid(16)` at local position `c.rem_euclid(16)`.
//! * **Offsets** (`Vector3<i32>`) are relative neighbor positions used by rules.
//!
//! Euclidean division keeps negative coordinates in the chunk "below" zero,
//! so cell `-1` is local `15` of chunk `-1`.

use cgmath::{Point3, Vector3};

use chunk::{CHUNK_DIMENSION, CHUNK_PLANE_SIZE};

pub mod block;
pub mod chunk;
pub mod dirty_set;
pub mod world;

/// World-space cell coordinate.
pub type Coord = Point3<i32>;
/// Chunk-space coordinate.
pub type ChunkPos = Point3<i32>;
/// Relative neighbor offset.
pub type Offset = Vector3<i32>;

/// Returns the chunk containing the cell at `coord`.
pub fn chunk_of(coord: Coord) -> ChunkPos {
    Point3::new(
        coord.x.div_euclid(CHUNK_DIMENSION),
        coord.y.div_euclid(CHUNK_DIMENSION),
        coord.z.div_euclid(CHUNK_DIMENSION),
    )
}

/// Returns the linear index of `coord` inside its chunk.
///
/// The layout is `x + 16*y + 256*z`, the same order chunk generators push cells in.
pub fn local_index(coord: Coord) -> usize {
    let x = coord.x.rem_euclid(CHUNK_DIMENSION);
    let y = coord.y.rem_euclid(CHUNK_DIMENSION);
    let z = coord.z.rem_euclid(CHUNK_DIMENSION);
    (x + CHUNK_DIMENSION * y + CHUNK_PLANE_SIZE * z) as usize
}

/// Inverse of [`local_index`]: the world coordinate of cell `index` of chunk `chunk`.
pub fn coord_at(chunk: ChunkPos, index: usize) -> Coord {
    let index = index as i32;
    Point3::new(
        chunk.x * CHUNK_DIMENSION + index % CHUNK_DIMENSION,
        chunk.y * CHUNK_DIMENSION + (index / CHUNK_DIMENSION) % CHUNK_DIMENSION,
        chunk.z * CHUNK_DIMENSION + index / CHUNK_PLANE_SIZE,
    )
}

/// Returns `coord + offset`, or `None` when the result leaves `i32` space.
///
/// Cells past the edge of coordinate space do not exist; callers read them as
/// `Cell::VOID` and never mark them dirty.
pub fn shifted(coord: Coord, offset: Offset) -> Option<Coord> {
    Some(Point3::new(
        coord.x.checked_add(offset.x)?,
        coord.y.checked_add(offset.y)?,
        coord.z.checked_add(offset.z)?,
    ))
}

/// Total order on coordinates (`x`, then `y`, then `z`) used wherever output
/// must be reproducible.
pub fn coord_key(coord: &Coord) -> (i32, i32, i32) {
    (coord.x, coord.y, coord.z)
}
