// Behaviour of the in-memory collaborators the defrag tests rely on

use e4defrag_core::test_utils::{BlockOwner, InjectedFailure, MockEngine, MockPageCache};
use e4defrag_core::{
    DefragMode, DefragRequest, EngineError, ExtentRecord, GroupInfo, PageCache, Request,
    StorageEngine,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn geometry() -> GroupInfo {
    GroupInfo { blocks_per_group: 32, inodes_per_group: 8 }
}

#[test]
fn test_region_commit_frees_unused_tail() {
    init_logging();
    let mut engine = MockEngine::new(geometry(), 2, 5).add_file(5, &[(40, 2), (50, 2)]);

    engine.reserve_region(5, &ExtentRecord::new(0, 0, 6)).unwrap();
    assert_eq!(engine.reserved_blocks(), 6);

    let placed = engine.commit_defrag(&DefragRequest::into_region(0, 0, 6)).unwrap();
    assert_eq!(placed, 4);
    assert_eq!(engine.file_extents(5), &[ExtentRecord::new(0, 0, 4)]);
    assert_eq!(engine.owner(4), BlockOwner::Free);
    assert_eq!(engine.owner(40), BlockOwner::Free);
    assert_eq!(engine.reserved_blocks(), 0);
}

#[test]
fn test_region_commit_needs_a_reservation() {
    init_logging();
    let mut engine = MockEngine::new(geometry(), 2, 5).add_file(5, &[(40, 2)]);
    let err = engine.commit_defrag(&DefragRequest::into_region(0, 0, 2)).unwrap_err();
    assert!(matches!(err, EngineError::Rejected(_)));
}

#[test]
fn test_force_mode_commit_stays_in_group() {
    init_logging();
    // Group 0 is full apart from the file itself
    let mut engine = MockEngine::new(geometry(), 2, 5)
        .add_metadata(0, 28)
        .add_file(5, &[(28, 1), (30, 1)]);

    let err = engine
        .commit_defrag(&DefragRequest::normal(0, 2, DefragMode::Force))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoSpace(_)));

    let placed = engine
        .commit_defrag(&DefragRequest::normal(0, 2, DefragMode::Normal))
        .unwrap();
    assert_eq!(placed, 2);
    // The first run of two free blocks straddles the group boundary
    assert_eq!(engine.file_extents(5), &[ExtentRecord::new(0, 31, 2)]);
}

#[test]
fn test_injected_failure_hits_only_the_nth_call() {
    init_logging();
    let mut engine = MockEngine::new(geometry(), 1, 5).fail_nth_with(Request::Sync, 2, InjectedFailure::NoSpace);
    assert!(engine.sync().is_ok());
    assert!(matches!(engine.sync(), Err(EngineError::NoSpace(_))));
    assert!(engine.sync().is_ok());
    assert_eq!(engine.count(Request::Sync), 3);
}

#[test]
fn test_page_cache_records_windows() {
    init_logging();
    let mut cache = MockPageCache::new(1024);
    let snapshot = cache.snapshot(5, 3).unwrap();
    // 5 KiB rounds down to the 4 KiB page
    assert_eq!(snapshot.window.offset, 4096);
    assert_eq!(snapshot.window.len, 8 * 1024 - 4096);
    assert_eq!(snapshot.resident_offsets().collect::<Vec<_>>(), vec![4096]);
    cache.release(&snapshot).unwrap();
    assert_eq!(cache.releases, 1);
}
