//! Shared I/O context.
//!
//! A [`CoreIo`] carries everything needed to open a stream against the image:
//! the host path, the total block count, and the encryption properties. It is
//! built once and handed down by `Arc` to every component; the derived cipher
//! state is cached inside so the key-derivation cost is paid once per
//! context, not once per stream.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::cipher::{build_transformer, ByteTransformer, CipherProgressFn, EncryptionProps};

/// Shared handle to the immutable I/O context.
pub type SharedCoreIo = Arc<CoreIo>;

/// Immutable per-image context: path, geometry, and cipher parameters.
pub struct CoreIo {
    image_path: PathBuf,
    total_blocks: u64,
    enc: EncryptionProps,
    progress: Option<CipherProgressFn>,
    transformer: OnceLock<Arc<dyn ByteTransformer>>,
}

impl CoreIo {
    /// Build a context for an image at `image_path` with `total_blocks`
    /// blocks.
    pub fn new(
        image_path: impl Into<PathBuf>,
        total_blocks: u64,
        enc: EncryptionProps,
    ) -> SharedCoreIo {
        Self::with_progress(image_path, total_blocks, enc, None)
    }

    /// Like [`CoreIo::new`], with a progress callback for cipher key
    /// derivation.
    pub fn with_progress(
        image_path: impl Into<PathBuf>,
        total_blocks: u64,
        enc: EncryptionProps,
        progress: Option<CipherProgressFn>,
    ) -> SharedCoreIo {
        Arc::new(Self {
            image_path: image_path.into(),
            total_blocks,
            enc,
            progress,
            transformer: OnceLock::new(),
        })
    }

    /// Build a context around an already-derived transformer (used when the
    /// superblock has just been probed with one).
    pub(crate) fn with_transformer(
        image_path: impl Into<PathBuf>,
        total_blocks: u64,
        enc: EncryptionProps,
        progress: Option<CipherProgressFn>,
        transformer: Arc<dyn ByteTransformer>,
    ) -> SharedCoreIo {
        let lock = OnceLock::new();
        let _ = lock.set(transformer);
        Arc::new(Self {
            image_path: image_path.into(),
            total_blocks,
            enc,
            progress,
            transformer: lock,
        })
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    pub fn encryption(&self) -> &EncryptionProps {
        &self.enc
    }

    /// The transformer for this image. Derives key material on first use,
    /// reporting through the progress callback if one was registered.
    pub fn transformer(&self) -> Arc<dyn ByteTransformer> {
        self.transformer
            .get_or_init(|| build_transformer(&self.enc, self.progress.as_ref()))
            .clone()
    }
}
