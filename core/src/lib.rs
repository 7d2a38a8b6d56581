pub mod engine;
pub mod error;
pub mod options;
pub mod test_utils;
pub mod types;

pub use engine::{CacheWindow, PageCache, PageSnapshot, StorageEngine};
pub use error::{DefragError, EngineError, EngineResult, Request};
pub use options::DefragOptions;
pub use types::{
    BlockNumber, DefragMode, DefragRequest, ExtentRecord, FileInfo, GroupInfo, GroupNumber,
    InodeNumber, LogicalBlock, Page,
};
