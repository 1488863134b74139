//! # Neighborhood Module
//!
//! Named offsets and neighborhoods usable in rule definitions.
//!
//! Directions follow the block-game convention: `up` is +y, `north` is -z,
//! `east` is +x. Two-dimensional neighborhoods lie in the horizontal XZ plane.
//! Every neighborhood also exists as `<name>_self`, which adds the centre.

use cgmath::Vector3;

use crate::voxels::Offset;

/// Single-cell named offsets.
const NAMED_OFFSETS: [(&str, [i32; 3]); 11] = [
    ("self", [0, 0, 0]),
    ("up", [0, 1, 0]),
    ("down", [0, -1, 0]),
    ("north", [0, 0, -1]),
    ("south", [0, 0, 1]),
    ("east", [1, 0, 0]),
    ("west", [-1, 0, 0]),
    ("north_east", [1, 0, -1]),
    ("north_west", [-1, 0, -1]),
    ("south_east", [1, 0, 1]),
    ("south_west", [-1, 0, 1]),
];

/// Resolves a single named offset.
pub fn named_offset(name: &str) -> Option<Offset> {
    NAMED_OFFSETS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, [x, y, z])| Vector3::new(*x, *y, *z))
}

/// Resolves a neighborhood name to its offsets, in a fixed order.
///
/// Single-cell names resolve to a one-element list.
pub fn named_neighborhood(name: &str) -> Option<Vec<Offset>> {
    if let Some(offset) = named_offset(name) {
        return Some(vec![offset]);
    }
    let (base, with_self) = match name.strip_suffix("_self") {
        Some(base) => (base, true),
        None => (name, false),
    };
    let mut offsets = match base {
        "moore2d" => moore(false),
        "moore3d" => moore(true),
        "neumann2d" => neumann(false),
        "neumann3d" => neumann(true),
        "horizontal" => ["north", "east", "south", "west"]
            .iter()
            .filter_map(|name| named_offset(name))
            .collect(),
        "vertical" => vec![Vector3::new(0, 1, 0), Vector3::new(0, -1, 0)],
        _ => return None,
    };
    if with_self {
        offsets.insert(0, Vector3::new(0, 0, 0));
    }
    Some(offsets)
}

/// All cells at Chebyshev distance 1, in the XZ plane or in 3D.
fn moore(three_d: bool) -> Vec<Offset> {
    let ys: &[i32] = if three_d { &[-1, 0, 1] } else { &[0] };
    let mut offsets = Vec::new();
    for &y in ys {
        for z in -1..=1 {
            for x in -1..=1 {
                if (x, y, z) != (0, 0, 0) {
                    offsets.push(Vector3::new(x, y, z));
                }
            }
        }
    }
    offsets
}

/// All cells at Manhattan distance 1, in the XZ plane or in 3D.
fn neumann(three_d: bool) -> Vec<Offset> {
    let mut offsets = vec![
        Vector3::new(-1, 0, 0),
        Vector3::new(1, 0, 0),
        Vector3::new(0, 0, -1),
        Vector3::new(0, 0, 1),
    ];
    if three_d {
        offsets.push(Vector3::new(0, -1, 0));
        offsets.push(Vector3::new(0, 1, 0));
    }
    offsets
}
