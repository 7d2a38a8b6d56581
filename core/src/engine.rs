// Collaborator interfaces used by the defrag engine
// The storage engine owns the on-disk bitmaps and performs the data moves;
// the page cache is flushed and dropped around every move.

use crate::error::EngineResult;
use crate::types::{
    BlockNumber, DefragRequest, ExtentRecord, GroupInfo, InodeNumber, LogicalBlock, Page,
};

/// Requests understood by the filesystem driver for one open file
///
/// Every request blocks until the driver answers. The driver serialises
/// conflicting reservations between concurrent callers; implementations of
/// this trait hold no locks of their own.
pub trait StorageEngine {
    /// Geometry of the block groups
    fn group_info(&mut self) -> EngineResult<GroupInfo>;

    /// Extents of `inode` starting at extent index `offset`
    ///
    /// Returns `EngineError::NoMapping` once the inode has no (more) extents.
    fn extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>>;

    /// Free runs of the block group holding `inode`, starting at the
    /// group-relative block `offset`
    fn free_extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>>;

    /// Relocate `extent` of `victim` somewhere else and free its range
    fn move_victim(
        &mut self,
        victim: InodeNumber,
        extent: &ExtentRecord,
        goal: Option<BlockNumber>,
    ) -> EngineResult<()>;

    /// Claim `region` for `inode`; fails if any block is in use or claimed
    fn reserve_region(&mut self, inode: InodeNumber, region: &ExtentRecord) -> EngineResult<()>;

    /// Drop every reservation made through this handle
    fn release_reservations(&mut self) -> EngineResult<()>;

    /// Move file data as described by `request`, returning the blocks placed
    fn commit_defrag(&mut self, request: &DefragRequest) -> EngineResult<u32>;

    /// Durability barrier for everything moved so far
    fn sync(&mut self) -> EngineResult<()>;
}

impl<E: StorageEngine + ?Sized> StorageEngine for &mut E {
    fn group_info(&mut self) -> EngineResult<GroupInfo> {
        (**self).group_info()
    }

    fn extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>> {
        (**self).extents(inode, offset)
    }

    fn free_extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>> {
        (**self).free_extents(inode, offset)
    }

    fn move_victim(
        &mut self,
        victim: InodeNumber,
        extent: &ExtentRecord,
        goal: Option<BlockNumber>,
    ) -> EngineResult<()> {
        (**self).move_victim(victim, extent, goal)
    }

    fn reserve_region(&mut self, inode: InodeNumber, region: &ExtentRecord) -> EngineResult<()> {
        (**self).reserve_region(inode, region)
    }

    fn release_reservations(&mut self) -> EngineResult<()> {
        (**self).release_reservations()
    }

    fn commit_defrag(&mut self, request: &DefragRequest) -> EngineResult<u32> {
        (**self).commit_defrag(request)
    }

    fn sync(&mut self) -> EngineResult<()> {
        (**self).sync()
    }
}

/// Byte window of a file covered by a defrag request, page aligned at the start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheWindow {
    pub offset: u64,
    pub len: u64,
    pub page_size: u64,
}

impl CacheWindow {
    /// Window for `count` blocks starting at logical block `start`
    pub fn for_blocks(start: LogicalBlock, count: u32, block_size: u32, page_size: u64) -> Self {
        let page_size = page_size.max(1);
        let offset = start as u64 * block_size as u64;
        let end = offset + count as u64 * block_size as u64;
        let aligned = offset / page_size * page_size;
        Self {
            offset: aligned,
            len: end - aligned,
            page_size,
        }
    }

    pub fn page_count(&self) -> usize {
        self.len.div_ceil(self.page_size) as usize
    }
}

/// Which pages of a window were resident before a move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub window: CacheWindow,
    pub resident: Vec<bool>,
}

impl PageSnapshot {
    pub fn resident_count(&self) -> usize {
        self.resident.iter().filter(|r| **r).count()
    }

    /// Byte offsets of the resident pages
    pub fn resident_offsets(&self) -> impl Iterator<Item = u64> + '_ {
        let window = self.window;
        self.resident
            .iter()
            .enumerate()
            .filter(|(_, r)| **r)
            .map(move |(i, _)| window.offset + i as u64 * window.page_size)
    }
}

/// Page cache of the file being defragmented
pub trait PageCache {
    /// Report which pages of the window for `count` blocks at `start` are resident
    fn snapshot(&mut self, start: LogicalBlock, count: u32) -> EngineResult<PageSnapshot>;

    /// Flush the window and drop the pages that were resident in `snapshot`
    fn release(&mut self, snapshot: &PageSnapshot) -> EngineResult<()>;
}

impl<P: PageCache + ?Sized> PageCache for &mut P {
    fn snapshot(&mut self, start: LogicalBlock, count: u32) -> EngineResult<PageSnapshot> {
        (**self).snapshot(start, count)
    }

    fn release(&mut self, snapshot: &PageSnapshot) -> EngineResult<()> {
        (**self).release(snapshot)
    }
}
