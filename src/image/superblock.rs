//! Image superblock.
//!
//! Fixed 64-byte header at offset 0:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ iv quad: 4 × u64 LE      offset  0   (public, raw)       │
//! │ salt: 16 bytes           offset 32   (public, raw)       │
//! │ magic: u32               offset 48   (ciphered)          │
//! │ version: u32             offset 52   (ciphered)          │
//! │ total_blocks: u64        offset 56   (ciphered)          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The IV quad and salt must be readable without the password (they feed key
//! derivation), so they are stored raw. Everything else traverses the
//! cipher, which makes the magic check double as a password check: a wrong
//! password decrypts to garbage and is reported as a corrupt image.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::cipher::{build_transformer, CipherProgressFn, CipherVariant, EncryptionProps};
use crate::codec;
use crate::context::{CoreIo, SharedCoreIo};
use crate::error::{VaultError, VaultResult};
use crate::image::layout::{SUPERBLOCK_PUBLIC_SIZE, SUPERBLOCK_SIZE};
use crate::image::stream::ImageStream;

/// Magic number identifying a vault image ("blv" + format byte).
pub const MAGIC: u32 = 0x626C_7601;

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const CIPHERED_SIZE: usize = (SUPERBLOCK_SIZE - SUPERBLOCK_PUBLIC_SIZE) as usize;

/// The decoded superblock.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub iv: [u64; 4],
    pub salt: [u8; 16],
    pub version: u32,
    pub total_blocks: u64,
}

impl Superblock {
    /// Superblock for a fresh image, taking the public cipher material from
    /// `enc`.
    pub fn new(enc: &EncryptionProps, total_blocks: u64) -> Self {
        Self {
            iv: enc.iv(),
            salt: enc.salt(),
            version: FORMAT_VERSION,
            total_blocks,
        }
    }

    /// Encode the ciphered half (magic, version, total block count).
    fn ciphered_bytes(&self) -> [u8; CIPHERED_SIZE] {
        let mut buf = [0u8; CIPHERED_SIZE];
        codec::encode_u32(MAGIC, &mut buf[0..4]);
        codec::encode_u32(self.version, &mut buf[4..8]);
        codec::encode_u64(self.total_blocks, &mut buf[8..16]);
        buf
    }

    /// Decode and validate the ciphered half.
    fn from_ciphered_bytes(buf: &[u8; CIPHERED_SIZE]) -> VaultResult<(u32, u64)> {
        let magic = codec::decode_u32(&buf[0..4]);
        if magic != MAGIC {
            return Err(VaultError::CorruptImage {
                reason: format!(
                    "bad magic {:#010x} (wrong password or not a vault image)",
                    magic
                ),
            });
        }
        let version = codec::decode_u32(&buf[4..8]);
        if version != FORMAT_VERSION {
            return Err(VaultError::CorruptImage {
                reason: format!("unsupported format version {}", version),
            });
        }
        let total_blocks = codec::decode_u64(&buf[8..16]);
        Ok((version, total_blocks))
    }

    /// Write the superblock: public half raw, ciphered half through the
    /// image stream.
    pub fn write(&self, io: &SharedCoreIo) -> VaultResult<()> {
        let mut public = [0u8; SUPERBLOCK_PUBLIC_SIZE as usize];
        for (i, word) in self.iv.iter().enumerate() {
            codec::encode_u64(*word, &mut public[i * 8..i * 8 + 8]);
        }
        public[32..48].copy_from_slice(&self.salt);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(io.image_path())?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&public)?;
        file.sync_data()?;
        drop(file);

        let mut stream = ImageStream::open(io)?;
        stream.seek_p(SeekFrom::Start(SUPERBLOCK_PUBLIC_SIZE))?;
        stream.write(&self.ciphered_bytes())?;
        stream.flush()?;
        stream.close()
    }

    /// Read back and validate the superblock of the context's image. The
    /// recorded block count must match the context's.
    pub fn load(io: &SharedCoreIo) -> VaultResult<Self> {
        let (iv, salt) = Self::read_public(io.image_path())?;

        let mut stream = ImageStream::open(io)?;
        stream.seek_g(SeekFrom::Start(SUPERBLOCK_PUBLIC_SIZE))?;
        let mut ciphered = [0u8; CIPHERED_SIZE];
        stream.read(&mut ciphered)?;
        stream.close()?;

        let (version, total_blocks) = Self::from_ciphered_bytes(&ciphered)?;
        if total_blocks != io.total_blocks() {
            return Err(VaultError::CorruptImage {
                reason: format!(
                    "superblock records {} blocks, context expects {}",
                    total_blocks,
                    io.total_blocks()
                ),
            });
        }
        Ok(Self {
            iv,
            salt,
            version,
            total_blocks,
        })
    }

    /// Read the public cipher material (IV quad and salt) without any key
    /// material.
    pub fn read_public(path: impl AsRef<Path>) -> VaultResult<([u64; 4], [u8; 16])> {
        let mut file = File::open(path)?;
        let mut public = [0u8; SUPERBLOCK_PUBLIC_SIZE as usize];
        file.read_exact(&mut public)?;

        let mut iv = [0u64; 4];
        for (i, word) in iv.iter_mut().enumerate() {
            *word = codec::decode_u64(&public[i * 8..i * 8 + 8]);
        }
        let mut salt = [0u8; 16];
        salt.copy_from_slice(&public[32..48]);
        Ok((iv, salt))
    }
}

/// Open an existing image: read the public cipher material, derive the key,
/// decrypt and validate the superblock, and build the context with the
/// recorded block count.
pub fn open_image(
    path: impl AsRef<Path>,
    password: &str,
    variant: CipherVariant,
) -> VaultResult<SharedCoreIo> {
    open_image_with_progress(path, password, variant, None)
}

/// Like [`open_image`], with a progress callback for key derivation.
pub fn open_image_with_progress(
    path: impl AsRef<Path>,
    password: &str,
    variant: CipherVariant,
    progress: Option<CipherProgressFn>,
) -> VaultResult<SharedCoreIo> {
    let path = path.as_ref();
    let (iv, salt) = Superblock::read_public(path)?;
    let enc = EncryptionProps::new(password, iv, salt, variant);
    let transformer = build_transformer(&enc, progress.as_ref());

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(SUPERBLOCK_PUBLIC_SIZE))?;
    let mut ciphered = [0u8; CIPHERED_SIZE];
    file.read_exact(&mut ciphered)?;
    drop(file);

    let mut plain = [0u8; CIPHERED_SIZE];
    transformer.decrypt(&ciphered, &mut plain, SUPERBLOCK_PUBLIC_SIZE);
    let (_version, total_blocks) = Superblock::from_ciphered_bytes(&plain)?;

    Ok(CoreIo::with_transformer(
        path,
        total_blocks,
        enc,
        progress,
        transformer,
    ))
}
