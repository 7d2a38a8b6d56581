// Displacement and commit engine
// Empties every selected group of foreign data, claims it, then moves the
// file into it. Any failure releases every reservation of the attempt.

use e4defrag_core::{
    DefragError, DefragRequest, EngineError, ExtentRecord, PageCache, Request, StorageEngine,
};
use log::{debug, error, info, warn};

use crate::attempt::Attempt;
use crate::extent::{ExtentList, ExtentStatus};
use crate::group::{ExtentGroup, GroupList};
use crate::wrap::WrapList;

/// Place the file into the groups of `targets`, head first.
///
/// Returns the logical offset reached, i.e. the number of blocks placed.
pub fn defrag_proc<E, P>(
    attempt: &mut Attempt,
    engine: &mut E,
    cache: &mut P,
    extents: &mut ExtentList,
    targets: &GroupList,
) -> Result<u32, DefragError>
where
    E: StorageEngine + ?Sized,
    P: PageCache + ?Sized,
{
    if targets.is_empty() {
        return Err(DefragError::InsufficientSpace {
            needed: attempt.file_blocks(),
            available: 0,
        });
    }

    let mut wraps = WrapList::new();
    match place_groups(attempt, engine, cache, extents, targets, &mut wraps) {
        Ok(()) => Ok(attempt.offset),
        Err(cause) => {
            wraps.clear();
            Err(rollback(engine, cause))
        }
    }
}

/// Release every reservation after `cause`, folding a failed release into the error
fn rollback<E>(engine: &mut E, cause: DefragError) -> DefragError
where
    E: StorageEngine + ?Sized,
{
    warn!("force defrag failed ({}), releasing reservations", cause);
    match engine.release_reservations() {
        Ok(()) => cause,
        Err(source) => {
            error!("release of reservations failed: {}", source);
            DefragError::RollbackFailed {
                cause: Box::new(cause),
                source,
            }
        }
    }
}

fn place_groups<E, P>(
    attempt: &mut Attempt,
    engine: &mut E,
    cache: &mut P,
    extents: &mut ExtentList,
    targets: &GroupList,
    wraps: &mut WrapList,
) -> Result<(), DefragError>
where
    E: StorageEngine + ?Sized,
    P: PageCache + ?Sized,
{
    for id in targets.ids() {
        let group = targets[id];
        displace_members(attempt, engine, extents, &group, wraps)?;

        engine
            .sync()
            .map_err(|e| DefragError::engine(Request::Sync, e))?;

        let first = extents[group.start];
        let region = ExtentRecord::new(first.data.logical, first.start(), region_len(&group)?);
        engine
            .reserve_region(attempt.file.inode, &region)
            .map_err(|e| DefragError::engine(Request::ReserveRegion, e))?;
        debug!("reserved {}+{} for inode {}", region.start, region.len, attempt.file.inode);

        let placed = do_defrag(attempt, engine, cache, extents, &group)?;
        attempt.offset += placed;
        attempt.groups_committed += 1;
        info!("inode {}: progressing {}%", attempt.file.inode, attempt.percent());
    }
    Ok(())
}

/// Mark the group's free members reserved and move every used one away
fn displace_members<E>(
    attempt: &mut Attempt,
    engine: &mut E,
    extents: &mut ExtentList,
    group: &ExtentGroup,
    wraps: &mut WrapList,
) -> Result<(), DefragError>
where
    E: StorageEngine + ?Sized,
{
    for id in group.members(extents) {
        let extent = extents[id];
        if extent.status != ExtentStatus::Used {
            extents[id].status = ExtentStatus::Reserved;
            continue;
        }

        wraps.track(id);
        engine
            .move_victim(extent.owner, &extent.data, attempt.victim_goal)
            .map_err(|e| DefragError::engine(Request::MoveVictim, e))?;
        wraps.mark_reserved(extents);
        wraps.clear();
        attempt.victims_moved += 1;
        debug!(
            "moved {}+{} of inode {} out of the way",
            extent.start(),
            extent.len(),
            extent.owner
        );
    }
    Ok(())
}

/// Move the file's next blocks into the reserved range of `group`
pub fn do_defrag<E, P>(
    attempt: &Attempt,
    engine: &mut E,
    cache: &mut P,
    extents: &mut ExtentList,
    group: &ExtentGroup,
) -> Result<u32, DefragError>
where
    E: StorageEngine + ?Sized,
    P: PageCache + ?Sized,
{
    let start = extents[group.start].start();
    let request = DefragRequest::into_region(attempt.offset, start, region_len(group)?);
    let placed = commit_with_cache(engine, cache, &request)?;

    for id in group.members(extents) {
        let extent = &mut extents[id];
        extent.status = ExtentStatus::Used;
        extent.owner = attempt.file.inode;
    }
    debug!("placed {} blocks at {}", placed, start);
    Ok(placed)
}

/// Issue `request` between a residency snapshot and a cache release.
///
/// The release runs even when the commit failed; the commit error wins.
pub fn commit_with_cache<E, P>(
    engine: &mut E,
    cache: &mut P,
    request: &DefragRequest,
) -> Result<u32, DefragError>
where
    E: StorageEngine + ?Sized,
    P: PageCache + ?Sized,
{
    let snapshot = cache
        .snapshot(request.start_offset, request.defrag_size)
        .map_err(DefragError::PageCache)?;
    let committed = engine.commit_defrag(request);
    let released = cache.release(&snapshot);

    let placed = committed.map_err(|e| DefragError::engine(Request::CommitDefrag, e))?;
    released.map_err(DefragError::PageCache)?;
    Ok(placed)
}

fn region_len(group: &ExtentGroup) -> Result<u32, DefragError> {
    u32::try_from(group.len).map_err(|_| DefragError::RegionTooLarge { len: group.len })
}

/// Whether `err` is the engine running out of space for a commit
pub fn is_no_space(err: &DefragError) -> bool {
    matches!(
        err,
        DefragError::Engine {
            request: Request::CommitDefrag,
            source: EngineError::NoSpace(_),
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use crate::scanner::BlockGroupContext;
    use e4defrag_core::test_utils::{BlockOwner, InjectedFailure, MockEngine, MockPageCache};
    use e4defrag_core::{FileInfo, GroupInfo};

    const FILE: u64 = 12;

    fn geometry() -> GroupInfo {
        GroupInfo { blocks_per_group: 64, inodes_per_group: 16 }
    }

    // Inode 7 holds [0, 3), [3, 6) is free, the file is split at the end of the group
    fn engine() -> MockEngine {
        MockEngine::new(geometry(), 2, FILE)
            .add_file(7, &[(0, 3)])
            .add_file(FILE, &[(40, 2), (44, 2), (48, 2)])
    }

    fn attempt() -> Attempt {
        let file = FileInfo::new(FILE, 6 * 4096, 4096);
        let ctx = BlockGroupContext::for_inode(FILE, geometry()).unwrap();
        Attempt::new(file, ctx, None)
    }

    fn single_target() -> (ExtentList, GroupList) {
        let mut extents = ExtentList::new();
        let used = extents.insert(Extent::used(7, ExtentRecord::new(0, 0, 3))).unwrap();
        let free = extents.insert(Extent::free(ExtentRecord::new(0, 3, 3))).unwrap();
        let mut targets = GroupList::new();
        targets.insert(ExtentGroup::new(used, free, 6));
        (extents, targets)
    }

    #[test]
    fn test_group_is_emptied_claimed_and_filled() {
        let mut engine = engine();
        let mut cache = MockPageCache::new(4096);
        let mut attempt = attempt();
        let (mut extents, targets) = single_target();

        let placed = defrag_proc(&mut attempt, &mut engine, &mut cache, &mut extents, &targets).unwrap();
        assert_eq!(placed, 6);
        assert_eq!(attempt.victims_moved, 1);
        assert_eq!(attempt.groups_committed, 1);

        let calls = engine.calls();
        let moved = calls.iter().position(|r| *r == Request::MoveVictim).unwrap();
        let reserved = calls.iter().position(|r| *r == Request::ReserveRegion).unwrap();
        assert!(moved < reserved);
        assert_eq!(engine.reservations().len(), 0);
        assert_eq!(engine.file_extents(FILE), &[ExtentRecord::new(0, 0, 6)]);
        assert!(extents.iter().all(|e| e.status == ExtentStatus::Used && e.owner == FILE));
        assert_eq!(cache.releases, 1);
    }

    #[test]
    fn test_sync_failure_rolls_back() {
        let mut engine = engine().fail_nth(Request::Sync, 1);
        let mut cache = MockPageCache::new(4096);
        let (mut extents, targets) = single_target();

        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &targets).unwrap_err();
        assert_eq!(err.request(), Some(Request::Sync));
        assert_eq!(engine.count(Request::ReleaseReservations), 1);
        assert_eq!(engine.count(Request::ReserveRegion), 0);
    }

    #[test]
    fn test_busy_region_rolls_back() {
        let mut engine = engine().fail_nth_with(Request::ReserveRegion, 1, InjectedFailure::Busy);
        let mut cache = MockPageCache::new(4096);
        let (mut extents, targets) = single_target();

        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &targets).unwrap_err();
        assert!(matches!(
            err,
            DefragError::Engine { request: Request::ReserveRegion, source: EngineError::Busy { .. } }
        ));
        assert_eq!(engine.count(Request::ReleaseReservations), 1);
        assert_eq!(engine.reserved_blocks(), 0);
    }

    #[test]
    fn test_failed_commit_still_releases_cache() {
        let mut engine = engine().fail_nth(Request::CommitDefrag, 1);
        let mut cache = MockPageCache::new(4096);
        let (mut extents, targets) = single_target();

        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &targets).unwrap_err();
        assert_eq!(err.request(), Some(Request::CommitDefrag));
        assert_eq!(cache.snapshots.len(), 1);
        assert_eq!(cache.releases, 1);
        assert_eq!(engine.reserved_blocks(), 0);
        assert_eq!(engine.owner(0), BlockOwner::Free);
    }

    #[test]
    fn test_cache_release_failure_fails_the_attempt() {
        let mut engine = engine();
        let mut cache = MockPageCache::new(4096).failing_release();
        let (mut extents, targets) = single_target();

        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &targets).unwrap_err();
        assert!(matches!(err, DefragError::PageCache(_)));
        assert_eq!(engine.count(Request::CommitDefrag), 1);
        assert_eq!(engine.count(Request::ReleaseReservations), 1);
        assert_eq!(cache.releases, 1);
    }

    #[test]
    fn test_snapshot_failure_skips_commit() {
        let mut engine = engine();
        let mut cache = MockPageCache::new(4096).failing_snapshot();
        let (mut extents, targets) = single_target();

        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &targets).unwrap_err();
        assert!(matches!(err, DefragError::PageCache(_)));
        assert_eq!(engine.count(Request::CommitDefrag), 0);
        assert_eq!(engine.count(Request::ReleaseReservations), 1);
    }

    #[test]
    fn test_failed_release_is_reported_with_cause() {
        let mut engine = engine()
            .fail_nth(Request::MoveVictim, 1)
            .fail_nth(Request::ReleaseReservations, 1);
        let mut cache = MockPageCache::new(4096);
        let (mut extents, targets) = single_target();

        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &targets).unwrap_err();
        match err {
            DefragError::RollbackFailed { cause, .. } => {
                assert_eq!(cause.request(), Some(Request::MoveVictim));
            }
            other => panic!("expected rollback failure, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_targets_are_rejected_without_requests() {
        let mut engine = engine();
        let mut cache = MockPageCache::new(4096);
        let mut extents = ExtentList::new();
        let err = defrag_proc(&mut attempt(), &mut engine, &mut cache, &mut extents, &GroupList::new())
            .unwrap_err();
        assert!(err.is_capacity());
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn test_no_space_detection() {
        let err = DefragError::engine(Request::CommitDefrag, EngineError::NoSpace("full".into()));
        assert!(is_no_space(&err));
        let err = DefragError::engine(Request::MoveVictim, EngineError::NoSpace("full".into()));
        assert!(!is_no_space(&err));
    }
}
