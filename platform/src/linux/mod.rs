pub mod cache;
pub mod ioctl;

pub use cache::FilePageCache;
pub use ioctl::Ext4IoctlEngine;
