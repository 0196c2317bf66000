//! Files as chains of blocks.
//!
//! A [`VaultFile`] composes a logical byte stream over a chain of
//! [`FileBlock`]s identified by its start block. Interior blocks are always
//! packed to full payload capacity; the terminal block points at itself.
//!
//! Writes are buffered and land on the chain when the current block fills to
//! capacity or on [`VaultFile::flush`]. When a flush needs a new block, the
//! fresh block's self-loop is persisted before the predecessor's next
//! pointer is rewritten, so a reader never observes a dangling link.

use std::io::SeekFrom;

use crate::block::FileBlock;
use crate::context::SharedCoreIo;
use crate::error::{VaultError, VaultResult};
use crate::image::bitmap;
use crate::BLOCK_PAYLOAD_SIZE;

/// How an existing file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDisposition {
    /// Read only; writes are rejected.
    ReadOnly,
    /// Read and write, positioned at the end; writes pack into the tail
    /// block's spare capacity before allocating.
    ReadWriteAppend,
    /// Truncate to empty at open, then write.
    ReadWriteOverwrite,
}

impl OpenDisposition {
    pub fn writable(&self) -> bool {
        !matches!(self, OpenDisposition::ReadOnly)
    }
}

/// Callback invoked with the new logical size after every size change, so a
/// directory entry can keep its recorded size current. Must not call back
/// into the owning file.
pub type SizeUpdateFn = Box<dyn FnMut(u64)>;

/// A logical byte stream over a chain of blocks.
pub struct VaultFile {
    io: SharedCoreIo,
    name: String,
    file_size: u64,
    blocks: Vec<FileBlock>,
    buffer: Vec<u8>,
    start_block: Option<u64>,
    disposition: OpenDisposition,
    pos: u64,
    size_callback: Option<SizeUpdateFn>,
}

impl VaultFile {
    /// Create a new empty file. No block is allocated until the first
    /// flush.
    pub fn create(io: &SharedCoreIo, name: &str) -> Self {
        Self {
            io: io.clone(),
            name: name.to_string(),
            file_size: 0,
            blocks: Vec::new(),
            buffer: Vec::new(),
            start_block: None,
            disposition: OpenDisposition::ReadWriteAppend,
            pos: 0,
            size_callback: None,
        }
    }

    /// Create a new empty file whose start block is claimed immediately, so
    /// the caller can record it before any data is written.
    pub fn create_enforcing_start(io: &SharedCoreIo, name: &str) -> VaultResult<Self> {
        let mut file = Self::create(io, name);
        file.push_new_block()?;
        Ok(file)
    }

    /// Open an existing file by its start block, walking the chain to build
    /// the block list and the logical size.
    pub fn open(
        io: &SharedCoreIo,
        name: &str,
        start_block: u64,
        disposition: OpenDisposition,
    ) -> VaultResult<Self> {
        let mut blocks = Vec::new();
        let mut file_size = 0u64;
        let mut current = start_block;
        let mut steps = 0u64;
        loop {
            steps += 1;
            if steps > io.total_blocks() {
                return Err(VaultError::CorruptImage {
                    reason: format!("chain from block {} never reaches a terminal", start_block),
                });
            }
            let block = FileBlock::open(io, current)?;
            file_size += block.payload_len() as u64;
            let terminal = block.is_terminal();
            let next = block.next_index();
            blocks.push(block);
            if terminal {
                break;
            }
            current = next;
        }

        let mut file = Self {
            io: io.clone(),
            name: name.to_string(),
            file_size,
            blocks,
            buffer: Vec::new(),
            start_block: Some(start_block),
            disposition,
            pos: 0,
            size_callback: None,
        };

        match disposition {
            OpenDisposition::ReadOnly => {}
            OpenDisposition::ReadWriteAppend => file.pos = file.file_size,
            OpenDisposition::ReadWriteOverwrite => file.reseed(start_block)?,
        }
        Ok(file)
    }

    /// Reset every chain block to the pristine empty-terminal state and
    /// clear its bitmap bit. A later open against any released index sees an
    /// empty file, never a stale chain.
    fn release_chain(&mut self) -> VaultResult<()> {
        for block in &self.blocks {
            FileBlock::create(&self.io, block.index(), block.index())?;
            bitmap::free_block(&self.io, block.index())?;
        }
        self.blocks.clear();
        Ok(())
    }

    /// Free the whole chain and re-seed it with one empty block at
    /// `start_block`, keeping the recorded start valid.
    fn reseed(&mut self, start_block: u64) -> VaultResult<()> {
        self.release_chain()?;

        let block = FileBlock::create(&self.io, start_block, start_block)?;
        block.register_with_bitmap()?;
        self.blocks.push(block);
        self.start_block = Some(start_block);
        self.file_size = 0;
        self.pos = 0;
        self.notify_size();
        Ok(())
    }

    pub fn filename(&self) -> &str {
        &self.name
    }

    /// Logical size: flushed bytes on the chain plus buffered bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size + self.buffer.len() as u64
    }

    /// Index of the first block in the chain, once one exists.
    pub fn start_block_index(&self) -> Option<u64> {
        self.start_block
    }

    /// Register the size-update callback, replacing any previous one.
    pub fn set_size_update_callback(&mut self, callback: SizeUpdateFn) {
        self.size_callback = Some(callback);
    }

    fn notify_size(&mut self) {
        let size = self.file_size;
        if let Some(callback) = self.size_callback.as_mut() {
            callback(size);
        }
    }

    /// Map a logical position to (index into `blocks`, offset within that
    /// block's payload). `None` at or past the flushed size.
    fn locate(&self, pos: u64) -> Option<(usize, u64)> {
        let mut prefix = 0u64;
        for (slot, block) in self.blocks.iter().enumerate() {
            let len = block.payload_len() as u64;
            if pos < prefix + len {
                return Some((slot, pos - prefix));
            }
            prefix += len;
        }
        None
    }

    /// Read up to `buf.len()` bytes from the current position, crossing
    /// block boundaries, stopping at end of file. Returns the byte count.
    pub fn read(&mut self, buf: &mut [u8]) -> VaultResult<usize> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        let mut total = 0usize;
        while total < buf.len() && self.pos < self.file_size {
            let Some((slot, offset)) = self.locate(self.pos) else {
                break;
            };
            let block = &mut self.blocks[slot];
            let available = block.payload_len() as u64 - offset;
            let n = available.min((buf.len() - total) as u64) as usize;
            block.set_extra_offset(offset);
            block.read(&mut buf[total..total + n])?;
            self.pos += n as u64;
            total += n;
        }
        Ok(total)
    }

    /// Spare payload capacity the buffer is currently filling toward: the
    /// tail block's remaining room, or a whole block when the tail is full
    /// or absent.
    fn fill_target(&self) -> usize {
        match self.blocks.last() {
            Some(tail) => {
                let spare = BLOCK_PAYLOAD_SIZE - tail.payload_len() as usize;
                if spare == 0 {
                    BLOCK_PAYLOAD_SIZE
                } else {
                    spare
                }
            }
            None => BLOCK_PAYLOAD_SIZE,
        }
    }

    /// Allocate and link a fresh block at the end of the chain. The new
    /// block's self-loop is on disk before the predecessor points at it.
    fn push_new_block(&mut self) -> VaultResult<()> {
        let index = bitmap::allocate_block(&self.io)?;
        let block = FileBlock::create(&self.io, index, index)?;
        match self.blocks.last_mut() {
            Some(previous) => previous.set_next(index)?,
            None => self.start_block = Some(index),
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Drain the write buffer onto the chain. Returns the bytes persisted
    /// and the error that stopped the drain, if any.
    fn write_buffered_data_to_blocks(&mut self) -> (u64, Option<VaultError>) {
        let mut persisted = 0u64;
        let stop = loop {
            if self.buffer.is_empty() {
                break None;
            }
            let needs_block = match self.blocks.last() {
                None => true,
                Some(tail) => tail.payload_len() as usize == BLOCK_PAYLOAD_SIZE,
            };
            if needs_block {
                if let Err(e) = self.push_new_block() {
                    break Some(e);
                }
            }
            let Some(tail) = self.blocks.last_mut() else {
                break Some(VaultError::NoFreeBlocks);
            };
            let spare = BLOCK_PAYLOAD_SIZE - tail.payload_len() as usize;
            let take = spare.min(self.buffer.len());
            tail.set_extra_offset(tail.payload_len() as u64);
            if let Err(e) = tail.write(&self.buffer[..take]) {
                break Some(e);
            }
            self.buffer.drain(..take);
            persisted += take as u64;
        };

        if persisted > 0 {
            self.file_size += persisted;
            self.pos = self.file_size;
            self.notify_size();
        }
        (persisted, stop)
    }

    /// Buffer `buf` for writing, draining to the chain whenever the buffer
    /// reaches the current block-fill target. Returns the bytes accepted; on
    /// allocator exhaustion this is the bytes of *this* call that reached
    /// the chain (short write, no rollback), and any still-buffered bytes
    /// are dropped.
    pub fn write(&mut self, buf: &[u8]) -> VaultResult<usize> {
        if !self.disposition.writable() {
            return Err(VaultError::InvalidArgument {
                reason: format!("file '{}' is open read-only", self.name),
            });
        }
        // Bytes carried over from earlier calls sit at the front of the
        // buffer and drain first; they were already reported by those calls.
        let carried = self.buffer.len() as u64;
        let mut drained = 0u64;
        let mut accepted = 0usize;
        while accepted < buf.len() {
            let target = self.fill_target();
            if self.buffer.len() < target {
                let take = (target - self.buffer.len()).min(buf.len() - accepted);
                self.buffer.extend_from_slice(&buf[accepted..accepted + take]);
                accepted += take;
            }

            if self.buffer.len() >= target {
                let (persisted, stop) = self.write_buffered_data_to_blocks();
                drained += persisted;
                match stop {
                    None => {}
                    Some(VaultError::NoFreeBlocks) => {
                        self.buffer.clear();
                        return Ok(drained.saturating_sub(carried) as usize);
                    }
                    Some(e) => return Err(e),
                }
            }
        }
        Ok(accepted)
    }

    /// Push any buffered bytes onto the chain. On allocator exhaustion the
    /// unwritable remainder is dropped and the error surfaced.
    pub fn flush(&mut self) -> VaultResult<()> {
        let (_, stop) = self.write_buffered_data_to_blocks();
        match stop {
            None => Ok(()),
            Some(e) => {
                if matches!(e, VaultError::NoFreeBlocks) {
                    self.buffer.clear();
                }
                Err(e)
            }
        }
    }

    /// Set the logical position, clamped to `[0, size]`. Returns the new
    /// position. Pending buffered writes are flushed first.
    pub fn seek(&mut self, pos: SeekFrom) -> VaultResult<u64> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => self.file_size as i128 + delta as i128,
        };
        self.pos = target.clamp(0, self.file_size as i128) as u64;
        Ok(self.pos)
    }

    /// Current logical position.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Shrink the file to `new_size` bytes. The retained terminal block's
    /// payload length is cut to the remainder and its next pointer reset to
    /// itself; every later block is freed. Truncating to 0 leaves a fresh
    /// empty file anchored at the same start block.
    pub fn truncate(&mut self, new_size: u64) -> VaultResult<()> {
        if !self.disposition.writable() {
            return Err(VaultError::InvalidArgument {
                reason: format!("file '{}' is open read-only", self.name),
            });
        }
        self.flush()?;
        if new_size >= self.file_size {
            return Ok(());
        }

        if new_size == 0 {
            if let Some(start) = self.start_block {
                return self.reseed(start);
            }
            return Ok(());
        }

        let Some((keep, offset)) = self.locate(new_size - 1) else {
            return Err(VaultError::CorruptImage {
                reason: "chain is shorter than the recorded file size".to_string(),
            });
        };
        let retained = offset as u32 + 1;
        self.blocks[keep].truncate_payload(retained)?;
        for block in self.blocks.drain(keep + 1..) {
            bitmap::free_block(&self.io, block.index())?;
        }

        self.file_size = new_size;
        self.pos = self.pos.min(new_size);
        self.notify_size();
        Ok(())
    }

    /// Free every block in the chain, resetting each to the empty-terminal
    /// state. The size reads 0 afterwards, including from a fresh open
    /// against the old start block.
    pub fn unlink(&mut self) -> VaultResult<()> {
        self.buffer.clear();
        self.release_chain()?;
        self.start_block = None;
        self.file_size = 0;
        self.pos = 0;
        self.notify_size();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{CipherVariant, EncryptionProps};
    use crate::context::CoreIo;
    use crate::image::format::ImageFormatter;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn formatted_image(variant: CipherVariant) -> (tempfile::TempDir, SharedCoreIo) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.img");
        let enc = EncryptionProps::generate("pw", variant);
        let io = CoreIo::new(path, 64, enc);
        ImageFormatter::new(Arc::clone(&io)).format().unwrap();
        (dir, io)
    }

    #[test]
    fn lazy_allocation_on_first_flush() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let mut file = VaultFile::create(&io, "lazy.txt");
        assert_eq!(file.start_block_index(), None);

        file.write(b"data").unwrap();
        file.flush().unwrap();
        assert_eq!(file.start_block_index(), Some(1));
        assert!(bitmap::is_block_in_use(&io, 1).unwrap());
    }

    #[test]
    fn enforced_start_claims_block_up_front() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let file = VaultFile::create_enforcing_start(&io, "eager.txt").unwrap();
        assert_eq!(file.start_block_index(), Some(1));
        assert!(bitmap::is_block_in_use(&io, 1).unwrap());
        assert_eq!(file.file_size(), 0);
    }

    #[test]
    fn write_to_read_only_rejected() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let mut file = VaultFile::create(&io, "a.txt");
        file.write(b"x").unwrap();
        file.flush().unwrap();
        let start = file.start_block_index().unwrap();

        let mut readonly =
            VaultFile::open(&io, "a.txt", start, OpenDisposition::ReadOnly).unwrap();
        assert!(matches!(
            readonly.write(b"y"),
            Err(VaultError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn overwrite_open_reseeds_same_start() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let mut file = VaultFile::create(&io, "o.txt");
        file.write(&vec![7u8; 3 * BLOCK_PAYLOAD_SIZE]).unwrap();
        file.flush().unwrap();
        let start = file.start_block_index().unwrap();
        assert_eq!(bitmap::allocated_block_count(&io).unwrap(), 4);

        let mut file =
            VaultFile::open(&io, "o.txt", start, OpenDisposition::ReadWriteOverwrite).unwrap();
        assert_eq!(file.file_size(), 0);
        assert_eq!(file.start_block_index(), Some(start));
        // Old tail blocks are free again; the start stays claimed.
        assert_eq!(bitmap::allocated_block_count(&io).unwrap(), 2);

        file.write(b"fresh").unwrap();
        file.flush().unwrap();
        assert_eq!(file.file_size(), 5);
    }

    #[test]
    fn seek_clamps_to_size() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let mut file = VaultFile::create(&io, "s.txt");
        file.write(b"0123456789").unwrap();
        file.flush().unwrap();

        assert_eq!(file.seek(SeekFrom::Start(4)).unwrap(), 4);
        assert_eq!(file.tell(), 4);
        assert_eq!(file.seek(SeekFrom::Current(-2)).unwrap(), 2);
        assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 7);
        assert_eq!(file.seek(SeekFrom::Start(1000)).unwrap(), 10);
        assert_eq!(file.seek(SeekFrom::Current(-1000)).unwrap(), 0);
    }

    #[test]
    fn size_callback_fires_on_growth_truncate_and_unlink() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let seen: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
        let mut file = VaultFile::create(&io, "cb.txt");
        file.set_size_update_callback({
            let seen = Rc::clone(&seen);
            Box::new(move |size| seen.borrow_mut().push(size))
        });

        file.write(b"hello world").unwrap();
        file.flush().unwrap();
        file.truncate(5).unwrap();
        file.unlink().unwrap();
        assert_eq!(&*seen.borrow(), &[11, 5, 0]);
    }

    #[test]
    fn truncate_mid_chain_frees_tail_blocks() {
        let (_dir, io) = formatted_image(CipherVariant::ChaCha20);
        let payload = BLOCK_PAYLOAD_SIZE as u64;
        let mut file = VaultFile::create(&io, "t.txt");
        let data: Vec<u8> = (0..payload * 3).map(|i| (i % 251) as u8).collect();
        file.write(&data).unwrap();
        file.flush().unwrap();

        let chain: Vec<u64> = file.blocks.iter().map(|b| b.index()).collect();
        assert_eq!(chain.len(), 3);

        let new_size = payload + 100;
        file.truncate(new_size).unwrap();
        assert_eq!(file.file_size(), new_size);
        assert!(bitmap::is_block_in_use(&io, chain[0]).unwrap());
        assert!(bitmap::is_block_in_use(&io, chain[1]).unwrap());
        assert!(!bitmap::is_block_in_use(&io, chain[2]).unwrap());

        // Retained terminal carries the remainder and the self-loop.
        let tail = crate::block::FileBlock::open(&io, chain[1]).unwrap();
        assert_eq!(tail.payload_len(), 101);
        assert!(tail.is_terminal());

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut back = vec![0u8; new_size as usize];
        assert_eq!(file.read(&mut back).unwrap(), new_size as usize);
        assert_eq!(back, &data[..new_size as usize]);
    }

    #[test]
    fn truncate_to_zero_keeps_file_usable() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        let mut file = VaultFile::create(&io, "z.txt");
        file.write(b"some bytes").unwrap();
        file.flush().unwrap();
        let start = file.start_block_index().unwrap();

        file.truncate(0).unwrap();
        assert_eq!(file.file_size(), 0);
        assert_eq!(file.start_block_index(), Some(start));
        assert!(bitmap::is_block_in_use(&io, start).unwrap());

        file.write(b"again").unwrap();
        file.flush().unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut back = [0u8; 5];
        file.read(&mut back).unwrap();
        assert_eq!(&back, b"again");
    }

    #[test]
    fn allocator_exhaustion_gives_short_write() {
        // 4 blocks total: anchor + 3 usable.
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.img");
        let enc = EncryptionProps::generate("pw", CipherVariant::Null);
        let io = CoreIo::new(path, 4, enc);
        ImageFormatter::new(Arc::clone(&io)).format().unwrap();

        let mut file = VaultFile::create(&io, "big.bin");
        let capacity = 3 * BLOCK_PAYLOAD_SIZE;
        let data = vec![0x5Au8; 4 * BLOCK_PAYLOAD_SIZE];
        let written = file.write(&data).unwrap();
        assert_eq!(written, capacity);
        assert_eq!(file.file_size(), capacity as u64);

        // The persisted prefix is intact.
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut back = vec![0u8; capacity];
        assert_eq!(file.read(&mut back).unwrap(), capacity);
        assert_eq!(back, &data[..capacity]);
    }

    #[test]
    fn short_write_with_carried_buffer() {
        // Buffer left over from an earlier unflushed write, then a later
        // write whose first flush attempt hits an exhausted allocator: only
        // the root anchor exists, so nothing persists.
        let dir = tempdir().unwrap();
        let enc = EncryptionProps::generate("pw", CipherVariant::Null);
        let io = CoreIo::new(dir.path().join("full.img"), 1, enc);
        ImageFormatter::new(Arc::clone(&io)).format().unwrap();

        let mut file = VaultFile::create(&io, "carry.bin");
        assert_eq!(file.write(b"small string").unwrap(), 12);
        assert_eq!(file.write(&vec![0u8; BLOCK_PAYLOAD_SIZE]).unwrap(), 0);
        assert_eq!(file.file_size(), 0);

        // With one usable block, the carried bytes and the first part of the
        // second write persist; the count reports this call's share only.
        let dir = tempdir().unwrap();
        let enc = EncryptionProps::generate("pw", CipherVariant::Null);
        let io = CoreIo::new(dir.path().join("two.img"), 2, enc);
        ImageFormatter::new(Arc::clone(&io)).format().unwrap();

        let mut file = VaultFile::create(&io, "carry.bin");
        assert_eq!(file.write(b"small string").unwrap(), 12);
        let written = file.write(&vec![1u8; 2 * BLOCK_PAYLOAD_SIZE]).unwrap();
        assert_eq!(written, BLOCK_PAYLOAD_SIZE - 12);
        assert_eq!(file.file_size(), BLOCK_PAYLOAD_SIZE as u64);

        // The persisted prefix holds the carried bytes then this call's.
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut back = vec![0u8; BLOCK_PAYLOAD_SIZE];
        assert_eq!(file.read(&mut back).unwrap(), BLOCK_PAYLOAD_SIZE);
        assert_eq!(&back[..12], b"small string");
        assert!(back[12..].iter().all(|&b| b == 1));
    }

    #[test]
    fn interior_blocks_stay_packed() {
        let (_dir, io) = formatted_image(CipherVariant::ChaCha20);
        let mut file = VaultFile::create(&io, "p.bin");
        let data = vec![1u8; 2 * BLOCK_PAYLOAD_SIZE + 11];
        file.write(&data).unwrap();
        file.flush().unwrap();

        for block in &file.blocks[..file.blocks.len() - 1] {
            assert_eq!(block.payload_len() as usize, BLOCK_PAYLOAD_SIZE);
            assert!(!block.is_terminal());
        }
        let tail = file.blocks.last().unwrap();
        assert_eq!(tail.payload_len(), 11);
        assert!(tail.is_terminal());
    }

    #[test]
    fn corrupt_cycle_detected_at_open() {
        let (_dir, io) = formatted_image(CipherVariant::Null);
        // Hand-build a two-block cycle with no terminal.
        let mut a = FileBlock::create(&io, 1, 2).unwrap();
        let mut b = FileBlock::create(&io, 2, 1).unwrap();
        a.write(&vec![0u8; 5]).unwrap();
        b.write(&vec![0u8; 5]).unwrap();
        a.set_next(2).unwrap();
        b.set_next(1).unwrap();

        assert!(matches!(
            VaultFile::open(&io, "cycle", 1, OpenDisposition::ReadOnly),
            Err(VaultError::CorruptImage { .. })
        ));
    }
}
