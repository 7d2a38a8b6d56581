// Per-file defrag driver
// Moves a file in chunks and falls back to force mode when the engine
// cannot find contiguous space on its own.

use e4defrag_core::{
    DefragError, DefragMode, DefragOptions, DefragRequest, EngineError, FileInfo, LogicalBlock,
    PageCache, Request, StorageEngine,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::attempt::progress_percent;
use crate::defrag::force_defrag;
use crate::displace::{commit_with_cache, is_no_space};
use crate::scanner::count_extents;

/// What happened to one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    /// Extent count before the run, only counted in verbose mode
    pub extents_before: Option<usize>,
    pub extents_after: Option<usize>,
    pub blocks_moved: u64,
    /// Whether the force path placed the file
    pub forced: bool,
}

pub struct Defragmenter<E, P> {
    engine: E,
    cache: P,
    options: DefragOptions,
}

impl<E: StorageEngine, P: PageCache> Defragmenter<E, P> {
    pub fn new(engine: E, cache: P, options: DefragOptions) -> Result<Self, DefragError> {
        options.validate()?;
        Ok(Self { engine, cache, options })
    }

    /// Give back the collaborators
    pub fn into_parts(self) -> (E, P) {
        (self.engine, self.cache)
    }

    pub fn defrag_file(&mut self, file: &FileInfo) -> Result<FileReport, DefragError> {
        let total = file.len_blocks();
        if total == 0 {
            return Err(DefragError::EmptyFile);
        }

        let mut report = FileReport::default();
        if self.options.verbose {
            report.extents_before = Some(count_extents(&mut self.engine, file.inode)?);
        }

        self.engine
            .sync()
            .map_err(|e| DefragError::engine(Request::Sync, e))?;

        let chunk = self.options.chunk_bytes.div_ceil(file.block_size.max(1) as u64);
        let mode = if self.options.force {
            DefragMode::Force
        } else {
            DefragMode::Normal
        };

        let mut offset = 0u64;
        while offset < total {
            let start = LogicalBlock::try_from(offset)
                .map_err(|_| DefragError::RegionTooLarge { len: offset })?;
            let remaining = chunk.min(total - offset);
            let size = u32::try_from(remaining)
                .map_err(|_| DefragError::RegionTooLarge { len: remaining })?;
            let request = DefragRequest::normal(start, size, mode);

            match commit_with_cache(&mut self.engine, &mut self.cache, &request) {
                Ok(0) => {
                    return Err(DefragError::engine(
                        Request::CommitDefrag,
                        EngineError::Rejected(format!("no blocks moved at offset {start}")),
                    ));
                }
                Ok(placed) => {
                    offset += placed as u64;
                    report.blocks_moved += placed as u64;
                    info!(
                        "inode {}: progressing {}%",
                        file.inode,
                        progress_percent(offset, file.block_size, file.size_bytes)
                    );
                }
                Err(err) if is_no_space(&err) && self.options.allows_force(file.size_bytes) => {
                    warn!("inode {}: {}, retrying in force mode", file.inode, err);
                    let forced = force_defrag(&mut self.engine, &mut self.cache, file, &self.options)?;
                    if forced.placed_blocks < total {
                        return Err(DefragError::InsufficientSpace {
                            needed: total,
                            available: forced.placed_blocks,
                        });
                    }
                    // The force path places the whole file again from block 0
                    report.blocks_moved = forced.placed_blocks;
                    report.forced = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if self.options.verbose {
            report.extents_after = Some(count_extents(&mut self.engine, file.inode)?);
        }
        debug!("inode {}: {:?}", file.inode, report);
        Ok(report)
    }
}
