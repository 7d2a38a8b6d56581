// Coalescer: turns an extent list into groups of contiguous extents

use e4defrag_core::DefragError;
use log::debug;

use crate::extent::ExtentList;
use crate::group::{ExtentGroup, GroupList};

/// Outcome of `join_extents`
#[derive(Debug)]
pub enum Coalesced {
    /// A single run already holds the whole file; nothing else was built
    ShortCircuit(ExtentGroup),
    /// Every maximal run, largest first, with their combined length
    Candidates { groups: GroupList, total: u64 },
}

/// Walk the ring once from its head, grouping physically adjacent extents.
///
/// Stops early as soon as the run being built reaches `file_blocks`.
pub fn join_extents(extents: &ExtentList, file_blocks: u64) -> Result<Coalesced, DefragError> {
    let head = extents.head().ok_or(DefragError::EmptyExtentList)?;

    let mut groups = GroupList::new();
    let mut total = 0u64;
    let mut run_start = head;
    let mut run_end = head;
    let mut run_len = extents[head].len() as u64;
    let mut cursor = extents.next(head);

    loop {
        if run_len >= file_blocks {
            debug!(
                "run at block {} holds {} of {} blocks, short-circuit",
                extents[run_start].start(),
                run_len,
                file_blocks
            );
            return Ok(Coalesced::ShortCircuit(ExtentGroup::new(run_start, run_end, run_len)));
        }

        let wrapped = cursor == head;
        if wrapped || !extents[run_end].is_adjacent(&extents[cursor]) {
            groups.insert(ExtentGroup::new(run_start, run_end, run_len));
            total += run_len;
            if wrapped {
                break;
            }
            run_start = cursor;
            run_len = 0;
        }
        run_len += extents[cursor].len() as u64;
        run_end = cursor;
        cursor = extents.next(cursor);
    }

    debug!("{} candidate groups, {} blocks in total", groups.len(), total);
    Ok(Coalesced::Candidates { groups, total })
}
