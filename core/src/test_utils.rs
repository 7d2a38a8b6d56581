/// Test utilities and mock collaborators - NEVER touch a real filesystem
///
/// `MockEngine` models a small ext4-like volume: a block ownership map split
/// into block groups, the extents of every inode in logical order, and the
/// reservations made through the handle. It answers the same requests a
/// kernel driver would, journals every call and can be told to fail a given
/// request.
use std::collections::{BTreeMap, HashMap};

use log::trace;

use crate::engine::{CacheWindow, PageCache, PageSnapshot, StorageEngine};
use crate::error::{EngineError, EngineResult, Request};
use crate::types::{
    BlockNumber, DefragMode, DefragRequest, ExtentRecord, GroupInfo, InodeNumber, LogicalBlock,
    Page,
};

/// Records per page when the test does not choose one
pub const MOCK_PAGE_SIZE: usize = 32;

/// Holder of one block in the mock volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOwner {
    Free,
    Inode(InodeNumber),
    Reserved,
    /// Bitmaps, inode tables and the like: neither free nor part of a file
    Metadata,
}

/// Kind of error an injected failure produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Rejected,
    NoSpace,
    Busy,
}

/// In-memory storage engine for tests
pub struct MockEngine {
    geometry: GroupInfo,
    map: Vec<BlockOwner>,
    files: BTreeMap<InodeNumber, Vec<ExtentRecord>>,
    target: InodeNumber,
    page_size: usize,
    calls: Vec<Request>,
    counts: HashMap<Request, usize>,
    failures: HashMap<Request, (usize, InjectedFailure)>,
    victims: Vec<(InodeNumber, ExtentRecord)>,
    reservations: Vec<ExtentRecord>,
}

impl MockEngine {
    /// An empty volume of `groups` block groups; `target` is the file being defragmented
    pub fn new(geometry: GroupInfo, groups: u32, target: InodeNumber) -> Self {
        let blocks = geometry.blocks_per_group as usize * groups as usize;
        Self {
            geometry,
            map: vec![BlockOwner::Free; blocks],
            files: BTreeMap::new(),
            target,
            page_size: MOCK_PAGE_SIZE,
            calls: Vec::new(),
            counts: HashMap::new(),
            failures: HashMap::new(),
            victims: Vec::new(),
            reservations: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Give `inode` the physical runs in `runs`, in logical order
    pub fn add_file(mut self, inode: InodeNumber, runs: &[(BlockNumber, u32)]) -> Self {
        let mut logical: LogicalBlock = 0;
        let extents = self.files.entry(inode).or_default();
        if let Some(last) = extents.last() {
            logical = last.logical + last.len;
        }
        for &(start, len) in runs {
            extents.push(ExtentRecord::new(logical, start, len));
            logical += len;
            for block in start..start + len as u64 {
                self.map[block as usize] = BlockOwner::Inode(inode);
            }
        }
        self
    }

    /// Mark blocks that belong to no file and are not free
    pub fn add_metadata(mut self, start: BlockNumber, len: u32) -> Self {
        for block in start..start + len as u64 {
            self.map[block as usize] = BlockOwner::Metadata;
        }
        self
    }

    /// Make the `nth` call (1-based) of `request` fail with a rejection
    pub fn fail_nth(self, request: Request, nth: usize) -> Self {
        self.fail_nth_with(request, nth, InjectedFailure::Rejected)
    }

    pub fn fail_nth_with(mut self, request: Request, nth: usize, kind: InjectedFailure) -> Self {
        self.failures.insert(request, (nth, kind));
        self
    }

    /// Every request received, in order
    pub fn calls(&self) -> &[Request] {
        &self.calls
    }

    pub fn count(&self, request: Request) -> usize {
        self.counts.get(&request).copied().unwrap_or(0)
    }

    /// Victim extents relocated so far, as they were before the move
    pub fn moved_victims(&self) -> &[(InodeNumber, ExtentRecord)] {
        &self.victims
    }

    pub fn reservations(&self) -> &[ExtentRecord] {
        &self.reservations
    }

    pub fn owner(&self, block: BlockNumber) -> BlockOwner {
        self.map[block as usize]
    }

    pub fn reserved_blocks(&self) -> usize {
        self.map.iter().filter(|o| **o == BlockOwner::Reserved).count()
    }

    pub fn file_extents(&self, inode: InodeNumber) -> &[ExtentRecord] {
        self.files.get(&inode).map(Vec::as_slice).unwrap_or(&[])
    }

    fn enter(&mut self, request: Request) -> EngineResult<()> {
        trace!("mock engine: {}", request);
        self.calls.push(request);
        let count = self.counts.entry(request).or_insert(0);
        *count += 1;
        match self.failures.get(&request) {
            Some(&(nth, kind)) if nth == *count => Err(match kind {
                InjectedFailure::Rejected => EngineError::Rejected(format!("injected {request} failure")),
                InjectedFailure::NoSpace => EngineError::NoSpace(format!("injected {request} failure")),
                InjectedFailure::Busy => EngineError::Busy { start: 0, len: 0 },
            }),
            _ => Ok(()),
        }
    }

    fn group_range(&self, inode: InodeNumber) -> (BlockNumber, BlockNumber) {
        let ipg = self.geometry.inodes_per_group.max(1) as u64;
        let bpg = self.geometry.blocks_per_group as u64;
        let group = inode.saturating_sub(1) / ipg;
        let start = group * bpg;
        (start, (start + bpg).min(self.map.len() as u64))
    }

    fn free_runs(&self, from: BlockNumber, to: BlockNumber) -> Vec<ExtentRecord> {
        let mut runs = Vec::new();
        let mut block = from;
        while block < to {
            if self.map[block as usize] != BlockOwner::Free {
                block += 1;
                continue;
            }
            let start = block;
            while block < to && self.map[block as usize] == BlockOwner::Free {
                block += 1;
            }
            runs.push(ExtentRecord::new(0, start, (block - start) as u32));
        }
        runs
    }

    /// First free run of at least `len` blocks in `[from, to)`
    fn find_free(&self, from: BlockNumber, to: BlockNumber, len: u32) -> Option<BlockNumber> {
        self.free_runs(from, to)
            .into_iter()
            .find(|run| run.len >= len)
            .map(|run| run.start)
    }

    fn physical_blocks(&self, inode: InodeNumber) -> Vec<BlockNumber> {
        let mut blocks = Vec::new();
        for extent in self.file_extents(inode) {
            blocks.extend(extent.start..extent.end());
        }
        blocks
    }

    fn store_blocks(&mut self, inode: InodeNumber, blocks: &[BlockNumber]) {
        let mut extents: Vec<ExtentRecord> = Vec::new();
        for (logical, &block) in blocks.iter().enumerate() {
            match extents.last_mut() {
                Some(last) if last.end() == block => last.len += 1,
                _ => extents.push(ExtentRecord::new(logical as LogicalBlock, block, 1)),
            }
        }
        self.files.insert(inode, extents);
    }

    /// Move logical blocks `[first, first + count)` of the target to `dest`
    fn relocate_target(&mut self, first: usize, count: usize, dest: BlockNumber) {
        let target = self.target;
        let mut blocks = self.physical_blocks(target);
        for (i, slot) in blocks.iter_mut().skip(first).take(count).enumerate() {
            self.map[*slot as usize] = BlockOwner::Free;
            *slot = dest + i as u64;
            self.map[*slot as usize] = BlockOwner::Inode(target);
        }
        self.store_blocks(target, &blocks);
    }
}

impl StorageEngine for MockEngine {
    fn group_info(&mut self) -> EngineResult<GroupInfo> {
        self.enter(Request::GroupInfo)?;
        Ok(self.geometry)
    }

    fn extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>> {
        self.enter(Request::GetExtents)?;
        let extents = match self.files.get(&inode) {
            Some(extents) if !extents.is_empty() => extents,
            _ => return Err(EngineError::NoMapping(inode)),
        };
        let offset = offset as usize;
        if offset >= extents.len() {
            return Ok(Page::last(Vec::new()));
        }
        let end = (offset + self.page_size).min(extents.len());
        let records = extents[offset..end].to_vec();
        if records.len() == self.page_size {
            Ok(Page::more(records, end as u32))
        } else {
            Ok(Page::last(records))
        }
    }

    fn free_extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>> {
        self.enter(Request::GetFreeExtents)?;
        let (group_start, group_end) = self.group_range(inode);
        let runs = self.free_runs(group_start + offset as u64, group_end);
        let records: Vec<ExtentRecord> = runs.into_iter().take(self.page_size).collect();
        let next = match records.last() {
            Some(last) if records.len() == self.page_size => Some((last.end() - group_start) as u32),
            _ => None,
        };
        Ok(Page { records, next })
    }

    fn move_victim(
        &mut self,
        victim: InodeNumber,
        extent: &ExtentRecord,
        goal: Option<BlockNumber>,
    ) -> EngineResult<()> {
        self.enter(Request::MoveVictim)?;
        let owned = (extent.start..extent.end())
            .all(|b| self.map.get(b as usize) == Some(&BlockOwner::Inode(victim)));
        if !owned {
            return Err(EngineError::Rejected(format!(
                "inode {victim} does not own {}+{}",
                extent.start, extent.len
            )));
        }

        // Victims go outside the target's block group, starting from the goal
        let (group_start, group_end) = self.group_range(self.target);
        let volume_end = self.map.len() as u64;
        let from = goal
            .filter(|g| *g < group_start || *g >= group_end)
            .unwrap_or(group_end % volume_end.max(1));
        let dest = self
            .find_free(from, volume_end, extent.len)
            .filter(|d| *d < group_start || *d >= group_end)
            .or_else(|| self.find_free(0, group_start, extent.len))
            .or_else(|| self.find_free(group_end, volume_end, extent.len))
            .ok_or_else(|| EngineError::NoSpace(format!("no room for victim of inode {victim}")))?;

        for i in 0..extent.len as u64 {
            self.map[(extent.start + i) as usize] = BlockOwner::Free;
            self.map[(dest + i) as usize] = BlockOwner::Inode(victim);
        }
        if let Some(extents) = self.files.get_mut(&victim) {
            if let Some(record) = extents.iter_mut().find(|e| e.start == extent.start) {
                record.start = dest;
            }
        }
        self.victims.push((victim, *extent));
        Ok(())
    }

    fn reserve_region(&mut self, _inode: InodeNumber, region: &ExtentRecord) -> EngineResult<()> {
        self.enter(Request::ReserveRegion)?;
        let free = (region.start..region.end())
            .all(|b| self.map.get(b as usize) == Some(&BlockOwner::Free));
        if !free {
            return Err(EngineError::Busy {
                start: region.start,
                len: region.len as u64,
            });
        }
        for block in region.start..region.end() {
            self.map[block as usize] = BlockOwner::Reserved;
        }
        self.reservations.push(*region);
        Ok(())
    }

    fn release_reservations(&mut self) -> EngineResult<()> {
        self.enter(Request::ReleaseReservations)?;
        for owner in self.map.iter_mut() {
            if *owner == BlockOwner::Reserved {
                *owner = BlockOwner::Free;
            }
        }
        self.reservations.clear();
        Ok(())
    }

    fn commit_defrag(&mut self, request: &DefragRequest) -> EngineResult<u32> {
        self.enter(Request::CommitDefrag)?;
        let total = self.physical_blocks(self.target).len();
        let first = request.start_offset as usize;
        let count = (request.defrag_size as usize).min(total.saturating_sub(first));
        if count == 0 {
            return Ok(0);
        }

        match request.mode {
            DefragMode::ForceVictim => {
                let dest = request.dest;
                let reserved = (dest.start..dest.start + count as u64)
                    .all(|b| self.map.get(b as usize) == Some(&BlockOwner::Reserved));
                if !reserved {
                    return Err(EngineError::Rejected(format!(
                        "destination {}+{} is not reserved",
                        dest.start, dest.len
                    )));
                }
                self.relocate_target(first, count, dest.start);
                for block in dest.start + count as u64..dest.end() {
                    if self.map[block as usize] == BlockOwner::Reserved {
                        self.map[block as usize] = BlockOwner::Free;
                    }
                }
                self.reservations.retain(|r| r.start != dest.start);
            }
            DefragMode::Normal | DefragMode::Force => {
                let (from, to) = if request.mode == DefragMode::Force {
                    self.group_range(self.target)
                } else {
                    (0, self.map.len() as u64)
                };
                let dest = self
                    .find_free(from, to, count as u32)
                    .ok_or_else(|| EngineError::NoSpace(format!("no run of {count} free blocks")))?;
                self.relocate_target(first, count, dest);
            }
        }
        Ok(count as u32)
    }

    fn sync(&mut self) -> EngineResult<()> {
        self.enter(Request::Sync)
    }
}

/// Page cache stand-in that reports every page resident
pub struct MockPageCache {
    block_size: u32,
    page_size: u64,
    fail_snapshot: bool,
    fail_release: bool,
    pub snapshots: Vec<PageSnapshot>,
    pub releases: usize,
}

impl MockPageCache {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            page_size: 4096,
            fail_snapshot: false,
            fail_release: false,
            snapshots: Vec::new(),
            releases: 0,
        }
    }

    pub fn failing_snapshot(mut self) -> Self {
        self.fail_snapshot = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

impl PageCache for MockPageCache {
    fn snapshot(&mut self, start: LogicalBlock, count: u32) -> EngineResult<PageSnapshot> {
        if self.fail_snapshot {
            return Err(EngineError::Rejected("mincore failed".to_string()));
        }
        let window = CacheWindow::for_blocks(start, count, self.block_size, self.page_size);
        let snapshot = PageSnapshot {
            window,
            resident: vec![true; window.page_count()],
        };
        self.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    fn release(&mut self, _snapshot: &PageSnapshot) -> EngineResult<()> {
        self.releases += 1;
        if self.fail_release {
            return Err(EngineError::Rejected("fadvise failed".to_string()));
        }
        Ok(())
    }
}
