//! Image formatter.
//!
//! Lays down a fresh vault image: superblock, zeroed bitmap, and every block
//! pre-initialized as an empty terminal record (`payload_len = 0`,
//! `next_index = own index`). Block 0 is reserved as the root anchor for the
//! entry layer, so the first file in a fresh image starts at block 1.

use std::fs::OpenOptions;
use std::io::SeekFrom;

use crate::codec;
use crate::context::SharedCoreIo;
use crate::error::VaultResult;
use crate::image::bitmap;
use crate::image::layout;
use crate::image::stream::ImageStream;
use crate::image::superblock::Superblock;
use crate::BLOCK_META_SIZE;

/// One-shot builder that writes a fresh image for its context.
pub struct ImageFormatter {
    io: SharedCoreIo,
}

impl ImageFormatter {
    pub fn new(io: SharedCoreIo) -> Self {
        Self { io }
    }

    /// Create (or overwrite) the host file and write the full image layout.
    pub fn format(&self) -> VaultResult<()> {
        let total = self.io.total_blocks();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.io.image_path())?;
        file.set_len(layout::image_size(total))?;
        file.sync_all()?;
        drop(file);

        Superblock::new(self.io.encryption(), total).write(&self.io)?;
        self.zero_bitmap()?;
        self.init_blocks()?;
        bitmap::set_block_in_use(&self.io, 0, true)
    }

    /// Write the whole bitmap region as zeros (through the cipher).
    fn zero_bitmap(&self) -> VaultResult<()> {
        let mut stream = ImageStream::open(&self.io)?;
        stream.seek_p(SeekFrom::Start(layout::bitmap_offset()))?;
        stream.write(&vec![0u8; layout::bitmap_len(self.io.total_blocks()) as usize])?;
        stream.flush()?;
        stream.close()
    }

    /// Stamp every block's metadata: zero payload, self-loop next pointer.
    fn init_blocks(&self) -> VaultResult<()> {
        let total = self.io.total_blocks();
        let mut stream = ImageStream::open(&self.io)?;
        let mut meta = [0u8; BLOCK_META_SIZE];
        for index in 0..total {
            codec::encode_u32(0, &mut meta[0..4]);
            codec::encode_u64(index, &mut meta[4..12]);
            stream.seek_p(SeekFrom::Start(layout::block_offset(index, total)))?;
            stream.write(&meta)?;
        }
        stream.flush()?;
        stream.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{CipherVariant, EncryptionProps};
    use crate::context::CoreIo;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn formatted_image_has_expected_size_and_superblock() {
        for variant in [CipherVariant::Null, CipherVariant::ChaCha20] {
            let dir = tempdir().unwrap();
            let path = dir.path().join("vault.img");
            let enc = EncryptionProps::generate("pw", variant);
            let io = CoreIo::new(&path, 128, enc);
            ImageFormatter::new(Arc::clone(&io)).format().unwrap();

            let host_len = std::fs::metadata(&path).unwrap().len();
            assert_eq!(host_len, layout::image_size(128));

            let superblock = Superblock::load(&io).unwrap();
            assert_eq!(superblock.total_blocks, 128);
        }
    }

    #[test]
    fn formatted_blocks_are_empty_terminals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.img");
        let enc = EncryptionProps::generate("pw", CipherVariant::ChaCha20);
        let io = CoreIo::new(path, 32, enc);
        ImageFormatter::new(Arc::clone(&io)).format().unwrap();

        let mut stream = ImageStream::open(&io).unwrap();
        for index in [0u64, 1, 17, 31] {
            let mut meta = [0u8; BLOCK_META_SIZE];
            stream
                .seek_g(SeekFrom::Start(layout::block_offset(index, 32)))
                .unwrap();
            stream.read(&mut meta).unwrap();
            assert_eq!(codec::decode_u32(&meta[0..4]), 0);
            assert_eq!(codec::decode_u64(&meta[4..12]), index);
        }
    }

    #[test]
    fn reformat_resets_allocation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.img");
        let enc = EncryptionProps::generate("pw", CipherVariant::Null);
        let io = CoreIo::new(path, 32, enc);
        let formatter = ImageFormatter::new(Arc::clone(&io));
        formatter.format().unwrap();

        bitmap::allocate_block(&io).unwrap();
        bitmap::allocate_block(&io).unwrap();
        assert_eq!(bitmap::allocated_block_count(&io).unwrap(), 3);

        formatter.format().unwrap();
        assert_eq!(bitmap::allocated_block_count(&io).unwrap(), 1);
    }
}
