/// Block and position utilities for a voxel world split into 16x16 columns.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::RegionId;

/// log2 of the terrain cell width in blocks.
pub const CELL_SHIFT: i32 = 4;

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn above(self, n: i32) -> Self {
        Self::new(self.x, self.y + n, self.z)
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Terrain cell column containing this block.
    pub fn cell_x(self) -> i32 {
        self.x >> CELL_SHIFT
    }

    pub fn cell_z(self) -> i32 {
        self.z >> CELL_SHIFT
    }

    /// Squared distance on the horizontal plane. Computed in i64 so that
    /// coordinates near the world edge don't overflow.
    pub fn horizontal_distance_sq(self, other: BlockPos) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dz = self.z as i64 - other.z as i64;
        dx * dx + dz * dz
    }

    /// Center of the block's top face, where an entity would stand.
    pub fn standing_center(self) -> Position {
        Position::new(self.x as f64 + 0.5, self.y as f64, self.z as f64 + 0.5)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Precise entity position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Block containing this position.
    pub fn block(self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

/// A position inside a specific region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub region: RegionId,
    pub pos: Position,
}

impl Location {
    pub fn new(region: RegionId, pos: Position) -> Self {
        Self { region, pos }
    }

    pub fn block(self) -> BlockPos {
        self.pos.block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_coordinates_floor_negative_blocks() {
        let pos = BlockPos::new(-1, 64, 15);
        assert_eq!(pos.cell_x(), -1);
        assert_eq!(pos.cell_z(), 0);
        assert_eq!(BlockPos::new(-17, 0, 16).cell_x(), -2);
    }

    #[test]
    fn horizontal_distance_ignores_height() {
        let a = BlockPos::new(0, 10, 0);
        let b = BlockPos::new(3, 200, 4);
        assert_eq!(a.horizontal_distance_sq(b), 25);
    }

    #[test]
    fn horizontal_distance_does_not_overflow_at_extremes() {
        let a = BlockPos::new(-100_000, 0, -100_000);
        let b = BlockPos::new(100_000, 0, 100_000);
        assert_eq!(a.horizontal_distance_sq(b), 80_000_000_000);
    }

    #[test]
    fn position_block_floors_negative_coordinates() {
        let pos = Position::new(-0.5, 64.9, 3.2);
        assert_eq!(pos.block(), BlockPos::new(-1, 64, 3));
    }

    #[test]
    fn standing_center_round_trips_to_same_block() {
        let block = BlockPos::new(-12, 70, 40);
        assert_eq!(block.standing_center().block(), block);
    }
}
