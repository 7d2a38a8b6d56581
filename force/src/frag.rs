use e4defrag_core::{DefragError, InodeNumber, StorageEngine};
use log::debug;

use crate::scanner::count_extents;

/// Refuse to go on unless `regions` is strictly fewer than the file's current extents
pub fn check_frag_count<E>(engine: &mut E, inode: InodeNumber, regions: usize) -> Result<usize, DefragError>
where
    E: StorageEngine + ?Sized,
{
    let extents = count_extents(engine, inode)?;
    debug!("inode {}: {} extents now, {} regions planned", inode, extents, regions);
    if regions >= extents {
        return Err(DefragError::NoImprovement { regions, extents });
    }
    Ok(extents)
}
