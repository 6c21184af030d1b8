//! Tile key types.

use std::fmt;

use super::{deinterleave, interleave};

/// Maximum quadtree subdivision level.
///
/// 31 levels keep the Morton marker bit and two 31-bit interleaved axes
/// inside a single `u64`.
pub const MAX_LEVEL: u8 = 31;

/// Errors produced when constructing or decoding a tile key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TileKeyError {
    /// Subdivision level exceeds [`MAX_LEVEL`].
    #[error("invalid subdivision level {0} (max {MAX_LEVEL})")]
    InvalidLevel(u8),

    /// Row is outside the `0..2^level` range.
    #[error("row {row} out of range for level {level}")]
    InvalidRow { row: u32, level: u8 },

    /// Column is outside the `0..2^level` range.
    #[error("column {col} out of range for level {level}")]
    InvalidColumn { col: u32, level: u8 },

    /// The value is not a well-formed Morton code.
    #[error("invalid morton code {0:#x}")]
    InvalidMortonCode(u64),
}

/// Hierarchical quadtree address of a map tile.
///
/// A key identifies one tile in a quadtree: `level` selects the subdivision
/// depth and `row`/`col` select the cell within the `2^level × 2^level` grid
/// at that depth.
///
/// # Example
///
/// ```
/// use tilemux::geo::TileKey;
///
/// let key = TileKey::new(14, 6294, 8583).unwrap();
/// let code = key.morton_code();
/// assert_eq!(TileKey::from_morton_code(code).unwrap(), key);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    level: u8,
    row: u32,
    col: u32,
}

impl TileKey {
    /// Creates a tile key, validating that row and column fit the level.
    pub fn new(level: u8, row: u32, col: u32) -> Result<Self, TileKeyError> {
        if level > MAX_LEVEL {
            return Err(TileKeyError::InvalidLevel(level));
        }
        let extent = 1u64 << level;
        if (row as u64) >= extent {
            return Err(TileKeyError::InvalidRow { row, level });
        }
        if (col as u64) >= extent {
            return Err(TileKeyError::InvalidColumn { col, level });
        }
        Ok(Self { level, row, col })
    }

    /// The root tile covering the whole world.
    pub fn root() -> Self {
        Self {
            level: 0,
            row: 0,
            col: 0,
        }
    }

    /// Subdivision level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Row within the level grid (increases southward).
    pub fn row(&self) -> u32 {
        self.row
    }

    /// Column within the level grid (increases eastward).
    pub fn col(&self) -> u32 {
        self.col
    }

    /// Number of rows (and columns) in this key's level grid.
    pub fn grid_extent(&self) -> u64 {
        1u64 << self.level
    }

    /// The parent tile one level up, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.level == 0 {
            return None;
        }
        Some(Self {
            level: self.level - 1,
            row: self.row >> 1,
            col: self.col >> 1,
        })
    }

    /// Encodes this key as a single 64-bit Morton code.
    ///
    /// The code carries a marker bit at position `2 * level` above the
    /// interleaved row/column bits, so the level is recoverable and codes of
    /// different levels never collide. This is the form used on the worker
    /// wire and as the dependency-dedup key during picking.
    pub fn morton_code(&self) -> u64 {
        (1u64 << (2 * self.level as u32)) | interleave(self.col, self.row)
    }

    /// Decodes a Morton code produced by [`TileKey::morton_code`].
    pub fn from_morton_code(code: u64) -> Result<Self, TileKeyError> {
        if code == 0 {
            return Err(TileKeyError::InvalidMortonCode(code));
        }
        let msb = 63 - code.leading_zeros();
        if msb % 2 != 0 {
            return Err(TileKeyError::InvalidMortonCode(code));
        }
        let level = (msb / 2) as u8;
        let (col, row) = deinterleave(code & !(1u64 << msb));
        Self::new(level, row, col)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.row, self.col)
    }
}
