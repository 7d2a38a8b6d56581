// Force defrag: pack a file into its own block group, moving other data out
// of the way when the free space alone is too fragmented

use e4defrag_core::{DefragError, DefragOptions, FileInfo, PageCache, Request, StorageEngine};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::attempt::Attempt;
use crate::coalesce::{join_extents, Coalesced};
use crate::displace::defrag_proc;
use crate::extent::ExtentList;
use crate::frag::check_frag_count;
use crate::group::GroupList;
use crate::scanner::{get_free_extents, get_used_extents, BlockGroupContext};
use crate::selector::find_exts_group;

/// Outcome of a successful force defrag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceReport {
    /// Blocks of the file placed into the selected regions
    pub placed_blocks: u64,
    /// Contiguous regions the file now occupies
    pub regions: usize,
    /// Extents of other files moved out of the regions
    pub victims_moved: usize,
    pub groups_committed: usize,
    /// Whether one existing run could hold the whole file
    pub short_circuit: bool,
}

/// Defragment `file` inside its block group, displacing other data if needed.
///
/// Every list built here is dropped before returning, on success or failure.
/// Once a region has been reserved any failure releases all reservations of
/// the attempt before the error is returned.
pub fn force_defrag<E, P>(
    engine: &mut E,
    cache: &mut P,
    file: &FileInfo,
    options: &DefragOptions,
) -> Result<ForceReport, DefragError>
where
    E: StorageEngine + ?Sized,
    P: PageCache + ?Sized,
{
    let file_blocks = file.len_blocks();
    if file_blocks == 0 {
        return Err(DefragError::EmptyFile);
    }

    let geometry = engine
        .group_info()
        .map_err(|e| DefragError::engine(Request::GroupInfo, e))?;
    let ctx = BlockGroupContext::for_inode(file.inode, geometry)?;
    let mut attempt = Attempt::new(file.clone(), ctx, options.victim_goal);
    info!(
        "inode {}: force defrag of {} blocks in block group {}",
        file.inode, file_blocks, ctx.group
    );

    let mut extents = ExtentList::new();
    get_used_extents(engine, &ctx, &mut extents)?;
    let free = get_free_extents(engine, &ctx, file.inode, &mut extents)?;
    if free == 0 {
        warn!("inode {}: block group {} has no free extents", file.inode, ctx.group);
        return Err(DefragError::NoFreeExtents { group: ctx.group });
    }

    let mut targets = GroupList::new();
    let (regions, short_circuit) = match join_extents(&extents, file_blocks)? {
        Coalesced::ShortCircuit(group) => {
            targets.insert(group);
            (1, true)
        }
        Coalesced::Candidates { mut groups, total } => {
            if total < file_blocks {
                warn!(
                    "inode {}: block group {} holds {} blocks, file needs {}",
                    file.inode, ctx.group, total, file_blocks
                );
                return Err(DefragError::InsufficientSpace {
                    needed: file_blocks,
                    available: total,
                });
            }
            (find_exts_group(&mut targets, &mut groups, file_blocks)?, false)
        }
    };

    let extents_now = check_frag_count(engine, file.inode, regions)?;
    debug!(
        "inode {}: {} extents will become {} regions",
        file.inode, extents_now, regions
    );

    let placed = defrag_proc(&mut attempt, engine, cache, &mut extents, &targets)?;
    info!(
        "inode {}: force defrag placed {} blocks, moved {} victim extents",
        file.inode, placed, attempt.victims_moved
    );

    Ok(ForceReport {
        placed_blocks: placed as u64,
        regions,
        victims_moved: attempt.victims_moved,
        groups_committed: attempt.groups_committed,
        short_circuit,
    })
}
