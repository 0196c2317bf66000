//! Per-block record: payload length, next-block index, payload area.
//!
//! A `FileBlock` is a view onto one block of the image; it holds no open
//! stream between calls and reopens the image for each operation. The
//! metadata layout within a block:
//!
//! ```text
//! offset 0: payload_len (u32 LE)
//! offset 4: next_index  (u64 LE)
//! offset 12: payload (BLOCK_PAYLOAD_SIZE bytes)
//! ```
//!
//! `next_index == own index` marks the terminal block of a chain. A write
//! that is partial (`n < BLOCK_PAYLOAD_SIZE`) or starts past the payload
//! start (`extra_offset > 0`) rewrites the next pointer to the block's own
//! index, so a freshly extended tail is always a well-formed terminal.

use std::io::SeekFrom;

use crate::codec;
use crate::context::SharedCoreIo;
use crate::error::{VaultError, VaultResult};
use crate::image::{bitmap, layout, stream::ImageStream};
use crate::{BLOCK_META_SIZE, BLOCK_PAYLOAD_SIZE};

/// A view onto one block in the image.
pub struct FileBlock {
    io: SharedCoreIo,
    index: u64,
    offset: u64,
    payload_len: u32,
    initial_payload_len: u32,
    next: u64,
    extra_offset: u64,
}

impl FileBlock {
    fn check_index(io: &SharedCoreIo, index: u64) -> VaultResult<()> {
        if index >= io.total_blocks() {
            return Err(VaultError::OutOfBounds {
                requested: index,
                limit: io.total_blocks(),
            });
        }
        Ok(())
    }

    /// Initialize block `index` on disk with an empty payload and
    /// `next_index = next`. Pass `next = index` to seed the terminal
    /// self-loop.
    pub fn create(io: &SharedCoreIo, index: u64, next: u64) -> VaultResult<Self> {
        Self::check_index(io, index)?;
        let offset = layout::block_offset(index, io.total_blocks());

        let mut meta = [0u8; BLOCK_META_SIZE];
        codec::encode_u32(0, &mut meta[0..4]);
        codec::encode_u64(next, &mut meta[4..12]);

        let mut stream = ImageStream::open(io)?;
        stream.seek_p(SeekFrom::Start(offset))?;
        stream.write(&meta)?;
        stream.flush()?;
        stream.close()?;

        Ok(Self {
            io: io.clone(),
            index,
            offset,
            payload_len: 0,
            initial_payload_len: 0,
            next,
            extra_offset: 0,
        })
    }

    /// Read block `index`'s metadata from disk.
    pub fn open(io: &SharedCoreIo, index: u64) -> VaultResult<Self> {
        Self::check_index(io, index)?;
        let offset = layout::block_offset(index, io.total_blocks());

        let mut stream = ImageStream::open(io)?;
        stream.seek_g(SeekFrom::Start(offset))?;
        let mut meta = [0u8; BLOCK_META_SIZE];
        stream.read(&mut meta)?;
        stream.close()?;

        let payload_len = codec::decode_u32(&meta[0..4]);
        let next = codec::decode_u64(&meta[4..12]);

        if payload_len as usize > BLOCK_PAYLOAD_SIZE {
            return Err(VaultError::CorruptImage {
                reason: format!(
                    "block {} claims {} payload bytes (capacity {})",
                    index, payload_len, BLOCK_PAYLOAD_SIZE
                ),
            });
        }
        if next >= io.total_blocks() {
            return Err(VaultError::CorruptImage {
                reason: format!("block {} links to out-of-range block {}", index, next),
            });
        }

        Ok(Self {
            io: io.clone(),
            index,
            offset,
            payload_len,
            initial_payload_len: payload_len,
            next,
            extra_offset: 0,
        })
    }

    /// Offset applied within the payload area by `read` and `write`.
    pub fn set_extra_offset(&mut self, extra_offset: u64) {
        self.extra_offset = extra_offset;
    }

    /// Read `buf.len()` payload bytes starting at the extra offset. Bounds
    /// against `payload_len` are the caller's responsibility.
    pub fn read(&self, buf: &mut [u8]) -> VaultResult<usize> {
        let mut stream = ImageStream::open(&self.io)?;
        stream.seek_g(SeekFrom::Start(
            self.offset + BLOCK_META_SIZE as u64 + self.extra_offset,
        ))?;
        stream.read(buf)?;
        stream.close()?;
        Ok(buf.len())
    }

    /// Write `buf` at the extra offset, growing the recorded payload length
    /// by `buf.len()`. A partial or offset write also rewrites the next
    /// pointer to this block's own index, making it the chain's terminal.
    pub fn write(&mut self, buf: &[u8]) -> VaultResult<usize> {
        debug_assert!(self.extra_offset + buf.len() as u64 <= BLOCK_PAYLOAD_SIZE as u64);

        let mut stream = ImageStream::open(&self.io)?;
        stream.seek_p(SeekFrom::Start(
            self.offset + BLOCK_META_SIZE as u64 + self.extra_offset,
        ))?;
        stream.write(buf)?;

        self.payload_len += buf.len() as u32;
        let mut length = [0u8; 4];
        codec::encode_u32(self.payload_len, &mut length);
        stream.seek_p(SeekFrom::Start(self.offset))?;
        stream.write(&length)?;

        if buf.len() < BLOCK_PAYLOAD_SIZE || self.extra_offset > 0 {
            self.next = self.index;
            let mut next = [0u8; 8];
            codec::encode_u64(self.next, &mut next);
            stream.write(&next)?;
        }

        stream.flush()?;
        stream.close()?;
        Ok(buf.len())
    }

    /// Persist a new next pointer.
    pub fn set_next(&mut self, next: u64) -> VaultResult<()> {
        self.next = next;
        let mut encoded = [0u8; 8];
        codec::encode_u64(next, &mut encoded);

        let mut stream = ImageStream::open(&self.io)?;
        stream.seek_p(SeekFrom::Start(self.offset + 4))?;
        stream.write(&encoded)?;
        stream.flush()?;
        stream.close()
    }

    /// Persist a shrunken payload length and reset the next pointer to this
    /// block, making it the chain's terminal.
    pub(crate) fn truncate_payload(&mut self, payload_len: u32) -> VaultResult<()> {
        debug_assert!(payload_len as usize <= BLOCK_PAYLOAD_SIZE);
        self.payload_len = payload_len;
        self.next = self.index;

        let mut meta = [0u8; BLOCK_META_SIZE];
        codec::encode_u32(self.payload_len, &mut meta[0..4]);
        codec::encode_u64(self.next, &mut meta[4..12]);

        let mut stream = ImageStream::open(&self.io)?;
        stream.seek_p(SeekFrom::Start(self.offset))?;
        stream.write(&meta)?;
        stream.flush()?;
        stream.close()
    }

    /// Mark this block in use in the volume bitmap.
    pub fn register_with_bitmap(&self) -> VaultResult<()> {
        bitmap::set_block_in_use(&self.io, self.index, true)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn payload_len(&self) -> u32 {
        self.payload_len
    }

    /// Payload length as read at open time, before any writes through this
    /// descriptor.
    pub fn initial_payload_len(&self) -> u32 {
        self.initial_payload_len
    }

    pub fn next_index(&self) -> u64 {
        self.next
    }

    pub fn block_offset(&self) -> u64 {
        self.offset
    }

    /// Whether this block is its chain's terminal (self-loop sentinel).
    pub fn is_terminal(&self) -> bool {
        self.next == self.index
    }
}
