//! Byte-offset arithmetic for the on-image regions.
//!
//! ```text
//! offset 0                  SUPERBLOCK_SIZE        block boundary
//! │ superblock │ volume bitmap ⌈T/8⌉ bytes │ pad │ block table T × B │
//! ```
//!
//! The block table begins at the first multiple of [`BLOCK_SIZE`] at or past
//! the end of the bitmap region.

use crate::{BLOCK_SIZE, BLOCK_META_SIZE};

/// Fixed superblock size in bytes.
pub const SUPERBLOCK_SIZE: u64 = 64;

/// Bytes 0..48 of the superblock hold the public IV quad and salt.
pub const SUPERBLOCK_PUBLIC_SIZE: u64 = 48;

/// Offset of the volume bitmap.
pub const fn bitmap_offset() -> u64 {
    SUPERBLOCK_SIZE
}

/// Length of the volume bitmap in bytes.
pub const fn bitmap_len(total_blocks: u64) -> u64 {
    total_blocks.div_ceil(8)
}

/// Offset of block 0: the first block boundary at or past the bitmap end.
pub const fn block_table_offset(total_blocks: u64) -> u64 {
    let regions_end = SUPERBLOCK_SIZE + bitmap_len(total_blocks);
    regions_end.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64
}

/// Offset of block `index`.
pub const fn block_offset(index: u64, total_blocks: u64) -> u64 {
    block_table_offset(total_blocks) + index * BLOCK_SIZE as u64
}

/// Offset of block `index`'s payload area.
pub const fn payload_offset(index: u64, total_blocks: u64) -> u64 {
    block_offset(index, total_blocks) + BLOCK_META_SIZE as u64
}

/// Total image size, fixed at creation.
pub const fn image_size(total_blocks: u64) -> u64 {
    block_table_offset(total_blocks) + total_blocks * BLOCK_SIZE as u64
}
