// Selector: picks the groups the file will be placed into

use e4defrag_core::DefragError;
use log::debug;

use crate::group::{GroupId, GroupList};

/// Groups chosen for a file, in the order they were taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub groups: Vec<GroupId>,
    /// Blocks covered by the chosen groups
    pub len: u64,
}

impl Selection {
    pub fn regions(&self) -> usize {
        self.groups.len()
    }
}

/// Decide which candidates to take without touching the list.
///
/// While the largest remaining group cannot finish the file on its own it is
/// taken whole. Once it can, the smallest group that finishes the file is
/// taken instead and the search stops.
pub fn plan(candidates: &GroupList, file_blocks: u64) -> Result<Selection, DefragError> {
    // Candidates are ordered largest first
    let mut remaining: Vec<(GroupId, u64)> = candidates.ids().map(|id| (id, candidates[id].len)).collect();
    let mut selection = Selection { groups: Vec::new(), len: 0 };

    while let Some(&(largest, largest_len)) = remaining.first() {
        if largest_len + selection.len >= file_blocks {
            let pos = remaining
                .iter()
                .rposition(|&(_, len)| len + selection.len >= file_blocks)
                .unwrap_or(0);
            let (id, len) = remaining[pos];
            selection.groups.push(id);
            selection.len += len;
            return Ok(selection);
        }
        selection.groups.push(largest);
        selection.len += largest_len;
        remaining.remove(0);
    }

    Err(DefragError::InsufficientSpace {
        needed: file_blocks,
        available: selection.len,
    })
}

/// Move the planned groups from `candidates` into `target`.
///
/// Returns the number of regions the file will occupy. On failure neither
/// list is changed.
pub fn find_exts_group(
    target: &mut GroupList,
    candidates: &mut GroupList,
    file_blocks: u64,
) -> Result<usize, DefragError> {
    let selection = plan(candidates, file_blocks)?;
    for &id in &selection.groups {
        if let Some(group) = candidates.extract(id) {
            target.insert(group);
        }
    }
    debug!(
        "selected {} regions covering {} of {} blocks",
        selection.regions(),
        selection.len,
        file_blocks
    );
    Ok(selection.regions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::{Extent, ExtentList};
    use crate::group::ExtentGroup;
    use e4defrag_core::ExtentRecord;

    fn groups(lens: &[u64]) -> GroupList {
        let mut extents = ExtentList::new();
        let id = extents.insert(Extent::free(ExtentRecord::new(0, 0, 1))).unwrap();
        let mut list = GroupList::new();
        for &len in lens {
            list.insert(ExtentGroup::new(id, id, len));
        }
        list
    }

    fn lens(list: &GroupList) -> Vec<u64> {
        list.iter().map(|g| g.len).collect()
    }

    #[test]
    fn test_tightest_single_group_wins() {
        let mut candidates = groups(&[50, 30, 12, 8]);
        let mut target = GroupList::new();
        let regions = find_exts_group(&mut target, &mut candidates, 10).unwrap();
        assert_eq!(regions, 1);
        assert_eq!(lens(&target), vec![12]);
        assert_eq!(lens(&candidates), vec![50, 30, 8]);
    }

    #[test]
    fn test_exact_fit_preferred_over_larger() {
        let mut candidates = groups(&[40, 20, 10]);
        let mut target = GroupList::new();
        find_exts_group(&mut target, &mut candidates, 20).unwrap();
        assert_eq!(lens(&target), vec![20]);
    }

    #[test]
    fn test_largest_taken_until_remainder_fits() {
        // 30 is not enough, then 8 more are needed: 8 is the tightest fit
        let mut candidates = groups(&[30, 20, 9, 8, 3]);
        let mut target = GroupList::new();
        let regions = find_exts_group(&mut target, &mut candidates, 38).unwrap();
        assert_eq!(regions, 2);
        assert_eq!(lens(&target), vec![30, 8]);
        assert_eq!(lens(&candidates), vec![20, 9, 3]);
    }

    #[test]
    fn test_insufficient_space_leaves_lists_alone() {
        let mut candidates = groups(&[5, 4, 3]);
        let mut target = GroupList::new();
        let err = find_exts_group(&mut target, &mut candidates, 13).unwrap_err();
        assert!(matches!(err, DefragError::InsufficientSpace { needed: 13, available: 12 }));
        assert!(err.is_capacity());
        assert!(target.is_empty());
        assert_eq!(lens(&candidates), vec![5, 4, 3]);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let candidates = groups(&[50, 30, 12, 8, 8]);
        let first = plan(&candidates, 10).unwrap();
        let second = plan(&candidates, 10).unwrap();
        assert_eq!(first, second);
        assert_eq!(candidates[first.groups[0]].len, 12);
    }

    #[test]
    fn test_empty_candidates_fail() {
        let candidates = GroupList::new();
        assert!(plan(&candidates, 1).is_err());
    }
}
