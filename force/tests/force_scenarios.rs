// End-to-end force defrag runs against the in-memory engine

use e4defrag_core::test_utils::{BlockOwner, MockEngine, MockPageCache};
use e4defrag_core::{DefragError, DefragOptions, ExtentRecord, FileInfo, GroupInfo, Request};
use e4defrag_force::{force_defrag, ForceReport};

const FILE: u64 = 12;
const BLOCK: u32 = 4096;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn geometry() -> GroupInfo {
    GroupInfo { blocks_per_group: 64, inodes_per_group: 16 }
}

/// Two groups; the file lives in group 1 so only the listed layout of group 0 matters
fn volume() -> MockEngine {
    MockEngine::new(geometry(), 2, FILE)
}

fn file(blocks: u64) -> FileInfo {
    FileInfo::new(FILE, blocks * BLOCK as u64, BLOCK)
}

fn run(engine: &mut MockEngine, blocks: u64) -> Result<ForceReport, DefragError> {
    let mut cache = MockPageCache::new(BLOCK);
    force_defrag(engine, &mut cache, &file(blocks), &DefragOptions::default())
}

#[test]
fn test_single_free_extent_short_circuits() {
    init_logging();
    let mut engine = volume()
        .add_metadata(0, 40)
        .add_metadata(50, 14)
        .add_file(FILE, &[(70, 5), (80, 5)]);

    // FILE is outside group 0's block window, so the list is only [40, 50) free
    let report = run(&mut engine, 10).unwrap();
    assert!(report.short_circuit);
    assert_eq!(report.regions, 1);
    assert_eq!(report.victims_moved, 0);
    assert_eq!(report.placed_blocks, 10);
    assert_eq!(engine.count(Request::MoveVictim), 0);
    assert!(engine.reservations().is_empty());
    assert_eq!(engine.file_extents(FILE), &[ExtentRecord::new(0, 40, 10)]);
}

#[test]
fn test_used_neighbour_is_moved_before_reservation() {
    init_logging();
    let mut engine = volume()
        .add_file(7, &[(0, 5)])
        .add_metadata(10, 54)
        .add_file(FILE, &[(70, 5), (80, 5)]);

    let report = run(&mut engine, 10).unwrap();
    assert_eq!(report.victims_moved, 1);
    assert_eq!(engine.moved_victims(), &[(7, ExtentRecord::new(0, 0, 5))]);

    let calls = engine.calls();
    let moves: Vec<_> = calls.iter().enumerate().filter(|(_, r)| **r == Request::MoveVictim).collect();
    let reserve = calls.iter().position(|r| *r == Request::ReserveRegion).unwrap();
    assert_eq!(moves.len(), 1);
    assert!(moves[0].0 < reserve);

    assert_eq!(engine.file_extents(FILE), &[ExtentRecord::new(0, 0, 10)]);
    // The victim left the group
    assert!(engine.file_extents(7)[0].start >= 64);
}

#[test]
fn test_insufficient_space_makes_no_reservation() {
    init_logging();
    let mut engine = volume()
        .add_metadata(4, 6)
        .add_metadata(14, 50)
        .add_file(FILE, &[(70, 10), (90, 10)]);

    let err = run(&mut engine, 20).unwrap_err();
    assert!(matches!(err, DefragError::InsufficientSpace { needed: 20, available: 8 }));
    assert!(err.is_capacity());
    assert_eq!(engine.count(Request::ReserveRegion), 0);
    assert_eq!(engine.count(Request::ReleaseReservations), 0);
    assert_eq!(engine.count(Request::MoveVictim), 0);
}

#[test]
fn test_overlapping_scan_aborts_before_reservation() {
    init_logging();
    // Two inodes claim blocks [2, 4)
    let mut engine = volume()
        .add_file(3, &[(0, 4)])
        .add_file(4, &[(2, 4)])
        .add_file(FILE, &[(70, 5), (80, 5)]);

    let err = run(&mut engine, 10).unwrap_err();
    assert!(matches!(err, DefragError::Overlap { .. }));
    assert_eq!(engine.count(Request::MoveVictim), 0);
    assert_eq!(engine.count(Request::ReserveRegion), 0);
    assert_eq!(engine.count(Request::ReleaseReservations), 0);
}

#[test]
fn test_failed_victim_move_releases_once() {
    init_logging();
    let mut engine = volume()
        .add_file(3, &[(0, 2)])
        .add_file(4, &[(2, 2)])
        .add_file(5, &[(4, 2)])
        .add_metadata(8, 56)
        .add_file(FILE, &[(70, 4), (80, 4)])
        .fail_nth(Request::MoveVictim, 2);

    let err = run(&mut engine, 8).unwrap_err();
    assert_eq!(err.request(), Some(Request::MoveVictim));
    assert_eq!(engine.count(Request::MoveVictim), 2);
    assert_eq!(engine.count(Request::ReleaseReservations), 1);
    assert_eq!(engine.count(Request::ReserveRegion), 0);
    assert_eq!(engine.moved_victims().len(), 1);
    assert_eq!(engine.owner(2), BlockOwner::Inode(4));
}

#[test]
fn test_failed_commit_leaves_no_reservation() {
    init_logging();
    let mut engine = volume()
        .add_file(7, &[(0, 5)])
        .add_metadata(10, 54)
        .add_file(FILE, &[(70, 5), (80, 5)])
        .fail_nth(Request::CommitDefrag, 1);

    let err = run(&mut engine, 10).unwrap_err();
    assert_eq!(err.request(), Some(Request::CommitDefrag));
    assert_eq!(engine.count(Request::ReleaseReservations), 1);
    assert_eq!(engine.reserved_blocks(), 0);
    assert!(engine.reservations().is_empty());
    // The file was not moved
    assert_eq!(engine.file_extents(FILE)[0], ExtentRecord::new(0, 70, 5));
}

#[test]
fn test_file_split_over_two_regions() {
    init_logging();
    let mut engine = volume()
        .add_metadata(6, 4)
        .add_metadata(14, 50)
        .add_file(FILE, &[(70, 4), (80, 3), (90, 3)]);

    let report = run(&mut engine, 10).unwrap();
    assert_eq!(report.regions, 2);
    assert_eq!(report.groups_committed, 2);
    assert!(!report.short_circuit);
    assert_eq!(
        engine.file_extents(FILE),
        &[ExtentRecord::new(0, 0, 6), ExtentRecord::new(6, 10, 4)]
    );
    assert_eq!(engine.reserved_blocks(), 0);
}

#[test]
fn test_no_improvement_is_declined_before_any_move() {
    init_logging();
    // Two regions would be needed for a file that already has two extents
    let mut engine = volume()
        .add_metadata(6, 4)
        .add_metadata(14, 50)
        .add_file(FILE, &[(70, 5), (80, 5)]);

    let err = run(&mut engine, 10).unwrap_err();
    assert!(matches!(err, DefragError::NoImprovement { regions: 2, extents: 2 }));
    assert_eq!(engine.count(Request::MoveVictim), 0);
    assert_eq!(engine.count(Request::ReserveRegion), 0);
}

#[test]
fn test_report_serializes() {
    init_logging();
    let mut engine = volume()
        .add_metadata(0, 40)
        .add_metadata(50, 14)
        .add_file(FILE, &[(70, 5), (80, 5)]);

    let report = run(&mut engine, 10).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["placed_blocks"], 10);
    assert_eq!(json["short_circuit"], true);
}
