//! Common test utilities: image fixtures and deterministic payloads.

#![allow(dead_code)] // Utility functions may not be used by all tests

use std::path::Path;
use std::sync::Arc;

use blockvault::{
    CipherVariant, CoreIo, EncryptionProps, ImageFormatter, SharedCoreIo, BLOCK_PAYLOAD_SIZE,
};

/// Block count used by the scenario tests.
pub const TEST_BLOCKS: u64 = 2048;

/// The "big data" fixture spans five blocks, the last partially filled.
pub const BIG_SIZE: usize = 4 * BLOCK_PAYLOAD_SIZE + 37;

pub const TEST_PASSWORD: &str = "correct horse battery staple";

/// Format a fresh image under `dir` and return its context.
pub fn build_image(dir: &Path, variant: CipherVariant) -> SharedCoreIo {
    build_image_sized(dir, variant, TEST_BLOCKS)
}

/// Format a fresh image with an explicit block count.
pub fn build_image_sized(dir: &Path, variant: CipherVariant, total_blocks: u64) -> SharedCoreIo {
    let path = dir.join("vault.img");
    let enc = EncryptionProps::generate(TEST_PASSWORD, variant);
    let io = CoreIo::new(path, total_blocks, enc);
    ImageFormatter::new(Arc::clone(&io))
        .format()
        .expect("image format failed");
    io
}

/// Deterministic byte pattern of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 151 + 89) % 251) as u8).collect()
}

/// The big multi-block fixture.
pub fn big_pattern() -> Vec<u8> {
    pattern(BIG_SIZE)
}

/// Both transformer variants the scenarios run against.
pub fn variants() -> [CipherVariant; 2] {
    [CipherVariant::Null, CipherVariant::ChaCha20]
}
