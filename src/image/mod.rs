//! On-image layout and access: offset arithmetic, the encrypting stream,
//! the superblock, the volume bitmap with its allocator, and the formatter.

pub mod bitmap;
pub mod format;
pub mod layout;
pub mod stream;
pub mod superblock;

pub use bitmap::{
    allocate_block, allocated_block_count, free_block, is_block_in_use, set_block_in_use,
};
pub use format::ImageFormatter;
pub use stream::ImageStream;
pub use superblock::{open_image, open_image_with_progress, Superblock, FORMAT_VERSION, MAGIC};
