//! ChaCha20 stream transformer and password key derivation.
//!
//! The keystream is generated by seeking a ChaCha20 cipher to the absolute
//! image offset, so the same offset always yields the same keystream bytes.
//! Key material comes from an iterated SHA-256 derivation over the password
//! and the superblock salt; the cipher nonce is digested from the public IV
//! quad.

use std::fmt;

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{ByteTransformer, CipherProgressFn, EncryptionProps};

/// Rounds of the iterated key derivation.
pub const KDF_ROUNDS: u64 = 65_536;

/// How often the derivation progress callback fires, in rounds.
const PROGRESS_INTERVAL: u64 = 4_096;

/// Cipher key (256-bit), zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl VaultKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey").field("key", &"[REDACTED]").finish()
    }
}

/// Derive a cipher key from a password and salt by iterated SHA-256.
///
/// Each round chains the previous digest with the password, salt, and round
/// counter. `progress`, if given, is invoked every [`PROGRESS_INTERVAL`]
/// rounds with `(rounds_done, rounds_total)`.
pub fn derive_key(
    password: &[u8],
    salt: &[u8; 16],
    progress: Option<&CipherProgressFn>,
) -> VaultKey {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    let mut digest = hasher.finalize();

    for round in 1..KDF_ROUNDS {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(password);
        hasher.update(salt);
        hasher.update(round.to_le_bytes());
        digest = hasher.finalize();

        if round % PROGRESS_INTERVAL == 0 {
            if let Some(cb) = progress {
                cb(round, KDF_ROUNDS);
            }
        }
    }
    if let Some(cb) = progress {
        cb(KDF_ROUNDS, KDF_ROUNDS);
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    VaultKey(key)
}

/// Digest the public IV quad down to the 12-byte cipher nonce.
fn derive_nonce(iv: [u64; 4]) -> [u8; 12] {
    let mut encoded = [0u8; 32];
    for (i, word) in iv.iter().enumerate() {
        encoded[i * 8..i * 8 + 8].copy_from_slice(&word.to_le_bytes());
    }
    let digest = Sha256::digest(encoded);
    let mut nonce = [0u8; 12];
    nonce.copy_from_slice(&digest[..12]);
    nonce
}

/// ChaCha20 transformer: XORs bytes with the keystream at their absolute
/// image offset.
pub struct StreamTransformer {
    key: VaultKey,
    nonce: [u8; 12],
}

impl StreamTransformer {
    /// Derive key material from `props` and build the transformer. Key
    /// derivation progress is reported through `progress` if given.
    pub fn new(props: &EncryptionProps, progress: Option<&CipherProgressFn>) -> Self {
        let key = derive_key(props.password().as_bytes(), &props.salt(), progress);
        Self {
            key,
            nonce: derive_nonce(props.iv()),
        }
    }

    fn apply_keystream(&self, input: &[u8], output: &mut [u8], start_pos: u64) {
        debug_assert_eq!(input.len(), output.len());
        output.copy_from_slice(input);
        let mut cipher = ChaCha20::new(
            chacha20::Key::from_slice(self.key.as_bytes()),
            chacha20::Nonce::from_slice(&self.nonce),
        );
        cipher.seek(start_pos);
        cipher.apply_keystream(output);
    }
}

impl ByteTransformer for StreamTransformer {
    fn encrypt(&self, input: &[u8], output: &mut [u8], start_pos: u64) {
        self.apply_keystream(input, output, start_pos);
    }

    fn decrypt(&self, input: &[u8], output: &mut [u8], start_pos: u64) {
        self.apply_keystream(input, output, start_pos);
    }
}
