// Common types shared by the defrag engine and its collaborators

use serde::{Deserialize, Serialize};

/// Physical block number (64-bit for ext4)
pub type BlockNumber = u64;

/// Logical block number inside a file
pub type LogicalBlock = u32;

/// Inode number
pub type InodeNumber = u64;

/// Block group number
pub type GroupNumber = u32;

/// One extent record as exchanged with the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtentRecord {
    /// First logical block inside the owning file
    pub logical: LogicalBlock,
    /// First physical block
    pub start: BlockNumber,
    /// Length in blocks
    pub len: u32,
}

impl ExtentRecord {
    pub fn new(logical: LogicalBlock, start: BlockNumber, len: u32) -> Self {
        Self { logical, start, len }
    }

    /// One past the last physical block
    pub fn end(&self) -> BlockNumber {
        self.start + self.len as u64
    }

    /// Whether the two physical ranges share at least one block
    pub fn overlaps(&self, other: &ExtentRecord) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Per-group geometry reported by the storage engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
}

/// The file a defrag attempt works on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub inode: InodeNumber,
    pub size_bytes: u64,
    pub block_size: u32,
}

impl FileInfo {
    pub fn new(inode: InodeNumber, size_bytes: u64, block_size: u32) -> Self {
        Self { inode, size_bytes, block_size }
    }

    /// File length rounded up to whole blocks
    pub fn len_blocks(&self) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.size_bytes.div_ceil(self.block_size as u64)
    }
}

/// One page of a paginated engine query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<R> {
    pub records: Vec<R>,
    /// Offset to request the next page from, `None` once exhausted
    pub next: Option<u32>,
}

impl<R> Page<R> {
    pub fn last(records: Vec<R>) -> Self {
        Self { records, next: None }
    }

    pub fn more(records: Vec<R>, next: u32) -> Self {
        Self { records, next: Some(next) }
    }
}

/// How the engine should treat a defrag request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefragMode {
    /// Let the engine pick any destination
    Normal,
    /// Keep the destination inside the file's own block group
    Force,
    /// Place the data into an already reserved destination
    ForceVictim,
}

impl DefragMode {
    /// Flag value understood by the kernel interface
    pub fn flag(self) -> i32 {
        match self {
            DefragMode::Normal => 0,
            DefragMode::Force => 1,
            DefragMode::ForceVictim => 2,
        }
    }
}

/// A request to move file data (`commit-defrag`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefragRequest {
    /// First logical block to move
    pub start_offset: LogicalBlock,
    /// Number of blocks to move
    pub defrag_size: u32,
    /// Allocation goal
    pub goal: Option<BlockNumber>,
    pub mode: DefragMode,
    /// Destination, only meaningful in `ForceVictim` mode
    pub dest: ExtentRecord,
}

impl DefragRequest {
    /// A request letting the engine choose where the data goes
    pub fn normal(start_offset: LogicalBlock, defrag_size: u32, mode: DefragMode) -> Self {
        Self {
            start_offset,
            defrag_size,
            goal: None,
            mode,
            dest: ExtentRecord::new(0, 0, 0),
        }
    }

    /// A request placing data into a reserved region starting at `start`
    pub fn into_region(start_offset: LogicalBlock, start: BlockNumber, len: u32) -> Self {
        Self {
            start_offset,
            defrag_size: len,
            goal: Some(start),
            mode: DefragMode::ForceVictim,
            dest: ExtentRecord::new(0, start, len),
        }
    }
}
