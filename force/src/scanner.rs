// Block group scanner
// Collects the used and free extents of one block group into an ExtentList

use e4defrag_core::{
    BlockNumber, DefragError, EngineError, ExtentRecord, GroupInfo, GroupNumber, InodeNumber,
    Request, StorageEngine,
};
use log::debug;

use crate::extent::{Extent, ExtentList};

/// Inode and block windows of the block group holding a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGroupContext {
    pub group: GroupNumber,
    pub inode_start: InodeNumber,
    pub inode_end: InodeNumber,
    pub block_start: BlockNumber,
    pub block_end: BlockNumber,
    pub info: GroupInfo,
}

impl BlockGroupContext {
    pub fn for_inode(inode: InodeNumber, info: GroupInfo) -> Result<Self, DefragError> {
        if info.inodes_per_group == 0 || info.blocks_per_group == 0 {
            return Err(DefragError::InvalidOptions(format!(
                "invalid group geometry: {} inodes, {} blocks per group",
                info.inodes_per_group, info.blocks_per_group
            )));
        }
        if inode == 0 {
            return Err(DefragError::InvalidOptions("inode 0 does not exist".to_string()));
        }

        let ipg = info.inodes_per_group as u64;
        let bpg = info.blocks_per_group as u64;
        let group = (inode - 1) / ipg;
        Ok(Self {
            group: group as GroupNumber,
            inode_start: group * ipg + 1,
            inode_end: (group + 1) * ipg,
            block_start: group * bpg,
            block_end: (group + 1) * bpg - 1,
            info,
        })
    }

    /// Whether `record` lies entirely inside the block window
    pub fn contains(&self, record: &ExtentRecord) -> bool {
        record.len > 0 && record.start >= self.block_start && record.end() - 1 <= self.block_end
    }
}

/// Every extent of `inode`, walking the engine's pages.
///
/// `NoMapping` is passed back to the caller untouched so it can decide
/// whether an unmapped inode is an error.
pub fn for_each_extent<E, F>(engine: &mut E, inode: InodeNumber, mut f: F) -> Result<(), DefragError>
where
    E: StorageEngine + ?Sized,
    F: FnMut(ExtentRecord) -> Result<(), DefragError>,
{
    let mut offset = 0;
    loop {
        let page = engine
            .extents(inode, offset)
            .map_err(|e| DefragError::engine(Request::GetExtents, e))?;
        for record in page.records {
            f(record)?;
        }
        match page.next {
            Some(next) if next != offset => offset = next,
            _ => return Ok(()),
        }
    }
}

/// Number of extents the file currently has
pub fn count_extents<E>(engine: &mut E, inode: InodeNumber) -> Result<usize, DefragError>
where
    E: StorageEngine + ?Sized,
{
    let mut count = 0;
    for_each_extent(engine, inode, |_| {
        count += 1;
        Ok(())
    })?;
    Ok(count)
}

fn is_no_mapping(err: &DefragError) -> bool {
    matches!(
        err,
        DefragError::Engine {
            source: EngineError::NoMapping(_),
            ..
        }
    )
}

/// Add the used extents lying inside the group to `list`
pub fn get_used_extents<E>(
    engine: &mut E,
    ctx: &BlockGroupContext,
    list: &mut ExtentList,
) -> Result<usize, DefragError>
where
    E: StorageEngine + ?Sized,
{
    let mut added = 0;
    for inode in ctx.inode_start..=ctx.inode_end {
        let result = for_each_extent(engine, inode, |record| {
            if !ctx.contains(&record) {
                return Ok(());
            }
            list.insert(Extent::used(inode, record))?;
            added += 1;
            Ok(())
        });
        match result {
            Ok(()) => {}
            // Unmapped inode: nothing (more) to collect from it
            Err(err) if is_no_mapping(&err) => {}
            Err(err) => return Err(err),
        }
    }
    debug!("group {}: {} used extents", ctx.group, added);
    Ok(added)
}

/// Add the free runs of the group holding `inode` to `list`
pub fn get_free_extents<E>(
    engine: &mut E,
    ctx: &BlockGroupContext,
    inode: InodeNumber,
    list: &mut ExtentList,
) -> Result<usize, DefragError>
where
    E: StorageEngine + ?Sized,
{
    let mut added = 0;
    let mut offset = 0;
    while offset < ctx.info.blocks_per_group {
        let page = engine
            .free_extents(inode, offset)
            .map_err(|e| DefragError::engine(Request::GetFreeExtents, e))?;
        for record in page.records.into_iter().take_while(|r| r.len > 0) {
            list.insert(Extent::free(record))?;
            added += 1;
        }
        match page.next {
            Some(next) if next != offset => offset = next,
            _ => break,
        }
    }
    debug!("group {}: {} free extents", ctx.group, added);
    Ok(added)
}
