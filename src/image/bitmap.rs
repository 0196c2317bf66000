//! Volume bitmap: free-block tracking and the first-fit allocator.
//!
//! Bit `i` of the bitmap region is 1 iff block `i` is in use. Every
//! operation opens its own stream against the image, does its work, and
//! closes; the on-image bitmap is the sole owner of allocation state.

use std::io::SeekFrom;

use crate::codec;
use crate::context::SharedCoreIo;
use crate::error::{VaultError, VaultResult};
use crate::image::layout;
use crate::image::stream::ImageStream;

fn check_index(io: &SharedCoreIo, index: u64) -> VaultResult<()> {
    if index >= io.total_blocks() {
        return Err(VaultError::OutOfBounds {
            requested: index,
            limit: io.total_blocks(),
        });
    }
    Ok(())
}

/// Whether block `index` is marked in use.
pub fn is_block_in_use(io: &SharedCoreIo, index: u64) -> VaultResult<bool> {
    check_index(io, index)?;
    let mut stream = ImageStream::open(io)?;
    stream.seek_g(SeekFrom::Start(layout::bitmap_offset() + index / 8))?;
    let mut byte = [0u8; 1];
    stream.read(&mut byte)?;
    stream.close()?;
    Ok(codec::get_bit(&byte, index % 8))
}

/// Set or clear block `index`'s in-use bit.
pub fn set_block_in_use(io: &SharedCoreIo, index: u64, in_use: bool) -> VaultResult<()> {
    check_index(io, index)?;
    let byte_offset = layout::bitmap_offset() + index / 8;
    let mut stream = ImageStream::open(io)?;
    stream.seek_g(SeekFrom::Start(byte_offset))?;
    let mut byte = [0u8; 1];
    stream.read(&mut byte)?;
    codec::set_bit(&mut byte, index % 8, in_use);
    stream.seek_p(SeekFrom::Start(byte_offset))?;
    stream.write(&byte)?;
    stream.flush()?;
    stream.close()
}

/// Find, mark, and return the lowest free block index.
///
/// First-fit from index 0: the scan is monotonic and the first zero bit
/// wins. Returns [`VaultError::NoFreeBlocks`] when every index below the
/// block count is taken.
pub fn allocate_block(io: &SharedCoreIo) -> VaultResult<u64> {
    let total = io.total_blocks();
    let mut stream = ImageStream::open(io)?;
    stream.seek_g(SeekFrom::Start(layout::bitmap_offset()))?;
    let mut bits = vec![0u8; layout::bitmap_len(total) as usize];
    stream.read(&mut bits)?;

    for (byte_index, byte) in bits.iter().enumerate() {
        if *byte == 0xFF {
            continue;
        }
        for position in 0..8 {
            let index = byte_index as u64 * 8 + position;
            if index >= total {
                break;
            }
            if !codec::get_bit(&bits, index) {
                let mut updated = [*byte];
                codec::set_bit(&mut updated, position, true);
                stream.seek_p(SeekFrom::Start(
                    layout::bitmap_offset() + byte_index as u64,
                ))?;
                stream.write(&updated)?;
                stream.flush()?;
                stream.close()?;
                return Ok(index);
            }
        }
    }
    stream.close()?;
    Err(VaultError::NoFreeBlocks)
}

/// Clear block `index`'s in-use bit. Block contents are left as-is; readers
/// rely on payload lengths and chain linkage, never on stale payload bytes.
pub fn free_block(io: &SharedCoreIo, index: u64) -> VaultResult<()> {
    set_block_in_use(io, index, false)
}

/// Number of blocks currently marked in use.
pub fn allocated_block_count(io: &SharedCoreIo) -> VaultResult<u64> {
    let mut stream = ImageStream::open(io)?;
    stream.seek_g(SeekFrom::Start(layout::bitmap_offset()))?;
    let mut bits = vec![0u8; layout::bitmap_len(io.total_blocks()) as usize];
    stream.read(&mut bits)?;
    stream.close()?;
    Ok(bits.iter().map(|b| b.count_ones() as u64).sum())
}
