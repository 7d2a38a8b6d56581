// Attempt-scoped state threaded through one force defrag

use e4defrag_core::{BlockNumber, FileInfo, LogicalBlock};

use crate::scanner::BlockGroupContext;

/// Progress and tallies of a single attempt on one file
#[derive(Debug, Clone)]
pub struct Attempt {
    pub file: FileInfo,
    pub group: BlockGroupContext,
    pub victim_goal: Option<BlockNumber>,
    /// Next logical block of the file to place
    pub offset: LogicalBlock,
    pub victims_moved: usize,
    pub groups_committed: usize,
}

impl Attempt {
    pub fn new(file: FileInfo, group: BlockGroupContext, victim_goal: Option<BlockNumber>) -> Self {
        Self {
            file,
            group,
            victim_goal,
            offset: 0,
            victims_moved: 0,
            groups_committed: 0,
        }
    }

    pub fn file_blocks(&self) -> u64 {
        self.file.len_blocks()
    }

    /// Share of the file placed so far, in percent
    pub fn percent(&self) -> u64 {
        progress_percent(self.offset as u64, self.file.block_size, self.file.size_bytes)
    }
}

/// Percentage of `size_bytes` covered by `blocks` blocks, clamped to 100
pub fn progress_percent(blocks: u64, block_size: u32, size_bytes: u64) -> u64 {
    if size_bytes == 0 {
        return 100;
    }
    let done = blocks as u128 * block_size as u128 * 100 / size_bytes as u128;
    done.min(100) as u64
}
