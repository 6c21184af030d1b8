//! Tile addressing module
//!
//! Provides the quadtree [`TileKey`] address used throughout the engine and
//! its 64-bit Morton encoding. The Morton code is the canonical wire form of
//! a tile key: it crosses the worker serialization boundary as a single
//! integer and serves as the dependency-dedup key in the pick engine.

mod types;

pub use types::{TileKey, TileKeyError, MAX_LEVEL};

/// Spreads the low 31 bits of `v` so they occupy the even bit positions.
///
/// Classic "part1by1" bit twiddling, widened to 64-bit output.
#[inline]
fn part1by1(v: u32) -> u64 {
    let mut x = (v as u64) & 0x7fff_ffff;
    x = (x | (x << 16)) & 0x0000_ffff_0000_ffff;
    x = (x | (x << 8)) & 0x00ff_00ff_00ff_00ff;
    x = (x | (x << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// Collapses the even bit positions of `v` back into a compact 31-bit value.
#[inline]
fn compact1by1(v: u64) -> u32 {
    let mut x = v & 0x5555_5555_5555_5555;
    x = (x | (x >> 1)) & 0x3333_3333_3333_3333;
    x = (x | (x >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    x = (x | (x >> 4)) & 0x00ff_00ff_00ff_00ff;
    x = (x | (x >> 8)) & 0x0000_ffff_0000_ffff;
    x = (x | (x >> 16)) & 0x0000_0000_ffff_ffff;
    x as u32
}

/// Interleaves column bits (even positions) with row bits (odd positions).
#[inline]
pub(crate) fn interleave(col: u32, row: u32) -> u64 {
    part1by1(col) | (part1by1(row) << 1)
}

/// Splits an interleaved value back into `(col, row)`.
#[inline]
pub(crate) fn deinterleave(code: u64) -> (u32, u32) {
    (compact1by1(code), compact1by1(code >> 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_zero() {
        assert_eq!(interleave(0, 0), 0);
    }

    #[test]
    fn test_interleave_known_values() {
        // col bits land on even positions, row bits on odd positions
        assert_eq!(interleave(1, 0), 0b01);
        assert_eq!(interleave(0, 1), 0b10);
        assert_eq!(interleave(1, 1), 0b11);
        assert_eq!(interleave(0b10, 0b11), 0b1110);
    }

    #[test]
    fn test_deinterleave_inverts_interleave() {
        for (col, row) in [(0, 0), (1, 2), (12345, 54321), (0x7fff_ffff, 0)] {
            let code = interleave(col, row);
            assert_eq!(deinterleave(code), (col, row));
        }
    }
}
