//! # blockvault
//!
//! An encrypted, single-file filesystem image core. A hosting file on an
//! ordinary filesystem is carved into a fixed grid of equal-size blocks;
//! files are composed from those blocks via linked chains, and every byte
//! crossing the image boundary passes through a position-keyed stream
//! cipher.
//!
//! ## Image layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Superblock (64 bytes at offset 0)                            │
//! │   iv quad + salt (public, raw)                               │
//! │   magic, version, total block count (ciphered)               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Volume bitmap (⌈T/8⌉ bytes, MSB-first, ciphered)             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Block table at the next block boundary: T × BLOCK_SIZE       │
//! │   block i = payload_len (u32) | next_index (u64) | payload   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A block whose `next_index` equals its own index is the terminal block of
//! its chain (self-loop sentinel). A file is identified by its start block;
//! its logical size is the sum of `payload_len` over the chain.
//!
//! ## Layering
//!
//! ```text
//! VaultFile (chain of blocks, read/write/seek/truncate/unlink)
//!     ↓
//! FileBlock (per-block metadata + payload record)
//!     ↓
//! ImageStream (seekable device, encrypts writes / decrypts reads)
//!     ↓
//! host image file
//! ```
//!
//! All operations are synchronous and single-threaded; each low-level
//! operation opens, uses, and closes its own stream against the image.

pub mod block;
pub mod cipher;
pub mod codec;
pub mod context;
pub mod error;
pub mod file;
pub mod image;

pub use block::FileBlock;
pub use cipher::{
    derive_key, ByteTransformer, CipherProgressFn, CipherVariant, EncryptionProps,
    NullTransformer, StreamTransformer, VaultKey,
};
pub use context::{CoreIo, SharedCoreIo};
pub use error::{VaultError, VaultResult};
pub use file::{OpenDisposition, SizeUpdateFn, VaultFile};
pub use image::{
    allocate_block, allocated_block_count, free_block, is_block_in_use, open_image,
    open_image_with_progress, set_block_in_use, ImageFormatter, ImageStream, Superblock,
};

/// Size of one image block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Per-block metadata: 4-byte payload length + 8-byte next-block index.
pub const BLOCK_META_SIZE: usize = 12;

/// Usable payload bytes per block.
pub const BLOCK_PAYLOAD_SIZE: usize = BLOCK_SIZE - BLOCK_META_SIZE;
