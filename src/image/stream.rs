//! Seekable encrypting byte device over the host image.
//!
//! An [`ImageStream`] tracks independent read (`gpos`) and write (`ppos`)
//! positions as absolute image offsets. Every read decrypts and every write
//! encrypts with the transformer keyed by the *starting* position of the
//! run, so the same region always sees the same keystream regardless of
//! access order.
//!
//! A host I/O failure poisons the stream: the failed position sticks and all
//! further operations are refused until [`ImageStream::clear`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::cipher::ByteTransformer;
use crate::context::SharedCoreIo;
use crate::error::{VaultError, VaultResult};

/// Byte device over the image file with independent get/put positions and a
/// cipher on the boundary.
pub struct ImageStream {
    file: Option<File>,
    transformer: Arc<dyn ByteTransformer>,
    gpos: u64,
    ppos: u64,
    poisoned: bool,
}

impl ImageStream {
    /// Open the image named by the context for reading and writing. Both
    /// positions start at 0.
    pub fn open(io: &SharedCoreIo) -> VaultResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(io.image_path())?;
        Ok(Self {
            file: Some(file),
            transformer: io.transformer(),
            gpos: 0,
            ppos: 0,
            poisoned: false,
        })
    }

    fn file_mut(&mut self) -> VaultResult<&mut File> {
        if self.poisoned {
            return Err(VaultError::StreamClosed);
        }
        self.file.as_mut().ok_or(VaultError::StreamClosed)
    }

    /// Read exactly `buf.len()` bytes from the current get position,
    /// decrypting into `buf`. Advances `gpos`; poisons the stream on host
    /// failure.
    pub fn read(&mut self, buf: &mut [u8]) -> VaultResult<()> {
        let start = self.gpos;
        let file = self.file_mut()?;
        let mut ciphered = vec![0u8; buf.len()];
        let result = file
            .seek(SeekFrom::Start(start))
            .and_then(|_| file.read_exact(&mut ciphered));
        if let Err(e) = result {
            self.poisoned = true;
            return Err(e.into());
        }
        self.gpos += buf.len() as u64;
        self.transformer.decrypt(&ciphered, buf, start);
        Ok(())
    }

    /// Encrypt `buf` keyed by the current put position and write it there.
    /// Advances `ppos`; poisons the stream on host failure.
    pub fn write(&mut self, buf: &[u8]) -> VaultResult<()> {
        let start = self.ppos;
        let mut ciphered = vec![0u8; buf.len()];
        self.transformer.encrypt(buf, &mut ciphered, start);
        let file = self.file_mut()?;
        let result = file
            .seek(SeekFrom::Start(start))
            .and_then(|_| file.write_all(&ciphered));
        if let Err(e) = result {
            self.poisoned = true;
            return Err(e.into());
        }
        self.ppos += buf.len() as u64;
        Ok(())
    }

    /// Set the get position. Returns the new absolute position.
    pub fn seek_g(&mut self, pos: SeekFrom) -> VaultResult<u64> {
        let current = self.gpos;
        let file = self.file_mut()?;
        let resolved = match Self::resolve(file, current, pos) {
            Ok(p) => p,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };
        self.gpos = resolved;
        Ok(resolved)
    }

    /// Set the put position. Returns the new absolute position.
    pub fn seek_p(&mut self, pos: SeekFrom) -> VaultResult<u64> {
        let current = self.ppos;
        let file = self.file_mut()?;
        let resolved = match Self::resolve(file, current, pos) {
            Ok(p) => p,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };
        self.ppos = resolved;
        Ok(resolved)
    }

    /// Resolve a `SeekFrom` against the host cursor without moving the
    /// tracked positions.
    fn resolve(file: &mut File, current: u64, pos: SeekFrom) -> VaultResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => SeekFrom::Start(offset),
            SeekFrom::Current(delta) => {
                SeekFrom::Start(current.checked_add_signed(delta).ok_or_else(|| {
                    VaultError::OutOfBounds {
                        requested: delta.unsigned_abs(),
                        limit: current,
                    }
                })?)
            }
            SeekFrom::End(delta) => SeekFrom::End(delta),
        };
        Ok(file.seek(target)?)
    }

    /// Current get position.
    pub fn tell_g(&self) -> u64 {
        self.gpos
    }

    /// Current put position.
    pub fn tell_p(&self) -> u64 {
        self.ppos
    }

    /// Push buffered writes to the host. A durability hint, not a crash
    /// guarantee.
    pub fn flush(&mut self) -> VaultResult<()> {
        let file = self.file_mut()?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Flush and release the host file handle.
    pub fn close(&mut self) -> VaultResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Clear the sticky failure state.
    pub fn clear(&mut self) {
        self.poisoned = false;
    }
}
