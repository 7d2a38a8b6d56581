#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{Ext4IoctlEngine as PlatformEngine, FilePageCache as PlatformPageCache};
