//! Byte transformers: the cipher seam between file I/O and the host image.
//!
//! A transformer turns plaintext into ciphertext (and back) for a run of
//! bytes starting at an absolute image offset. The keystream is a pure
//! function of that offset, so `decrypt(encrypt(p, pos), pos) == p` holds for
//! any buffer and any position, and random-access reads and partial in-block
//! rewrites stay well-defined.
//!
//! Two implementations exist: [`NullTransformer`] (identity, for tests and
//! unencrypted images) and [`StreamTransformer`] (ChaCha20 keystream keyed
//! from the password).

mod null;
mod stream;

pub use null::NullTransformer;
pub use stream::{derive_key, StreamTransformer, VaultKey, KDF_ROUNDS};

use std::fmt;
use std::sync::Arc;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Progress callback for key derivation: `(rounds_done, rounds_total)`.
pub type CipherProgressFn = Box<dyn Fn(u64, u64)>;

/// Position-keyed symmetric transform applied to every byte crossing the
/// image boundary.
///
/// `input` and `output` must have the same length; `start_pos` is the
/// absolute image offset of `input[0]`.
pub trait ByteTransformer {
    fn encrypt(&self, input: &[u8], output: &mut [u8], start_pos: u64);
    fn decrypt(&self, input: &[u8], output: &mut [u8], start_pos: u64);
}

/// Which transformer an image is opened with.
///
/// The variant is not recorded on disk; the superblock magic check catches a
/// mismatch at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherVariant {
    /// Identity transform.
    Null,
    /// ChaCha20 keystream seeked to the absolute image offset.
    #[default]
    ChaCha20,
}

/// A password, zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    pub fn new(password: &str) -> Self {
        Self(password.to_string())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Password").field(&"[REDACTED]").finish()
    }
}

/// Encryption parameters for one image: the password plus the public cipher
/// material recorded in the superblock (four 64-bit IV components and the
/// key-derivation salt).
#[derive(Debug, Clone)]
pub struct EncryptionProps {
    password: Password,
    iv: [u64; 4],
    salt: [u8; 16],
    variant: CipherVariant,
}

impl EncryptionProps {
    pub fn new(password: &str, iv: [u64; 4], salt: [u8; 16], variant: CipherVariant) -> Self {
        Self {
            password: Password::new(password),
            iv,
            salt,
            variant,
        }
    }

    /// Fresh parameters for a new image: random IV quad and salt.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    pub fn generate(password: &str, variant: CipherVariant) -> Self {
        let mut raw = [0u8; 32];
        getrandom::getrandom(&mut raw).expect("getrandom failed");
        let mut iv = [0u64; 4];
        for (i, word) in iv.iter_mut().enumerate() {
            *word = u64::from_le_bytes(raw[i * 8..i * 8 + 8].try_into().unwrap());
        }
        let mut salt = [0u8; 16];
        getrandom::getrandom(&mut salt).expect("getrandom failed");
        Self::new(password, iv, salt, variant)
    }

    pub fn password(&self) -> &Password {
        &self.password
    }

    pub fn iv(&self) -> [u64; 4] {
        self.iv
    }

    pub fn salt(&self) -> [u8; 16] {
        self.salt
    }

    pub fn variant(&self) -> CipherVariant {
        self.variant
    }
}

/// Build the transformer selected by `props`, deriving key material for the
/// stream variant (reporting through `progress` if given).
pub fn build_transformer(
    props: &EncryptionProps,
    progress: Option<&CipherProgressFn>,
) -> Arc<dyn ByteTransformer> {
    match props.variant() {
        CipherVariant::Null => Arc::new(NullTransformer::new()),
        CipherVariant::ChaCha20 => Arc::new(StreamTransformer::new(props, progress)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_debug_is_redacted() {
        let password = Password::new("hunter2");
        let debug = format!("{:?}", password);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn generated_props_differ() {
        let a = EncryptionProps::generate("pw", CipherVariant::ChaCha20);
        let b = EncryptionProps::generate("pw", CipherVariant::ChaCha20);
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.iv(), b.iv());
    }

    #[test]
    fn transformer_symmetry_both_variants() {
        let plain: Vec<u8> = (0..=255).collect();
        for variant in [CipherVariant::Null, CipherVariant::ChaCha20] {
            let props = EncryptionProps::generate("pw", variant);
            let transformer = build_transformer(&props, None);
            let mut ciphered = vec![0u8; plain.len()];
            let mut recovered = vec![0u8; plain.len()];
            transformer.encrypt(&plain, &mut ciphered, 4096);
            transformer.decrypt(&ciphered, &mut recovered, 4096);
            assert_eq!(recovered, plain);
        }
    }
}
