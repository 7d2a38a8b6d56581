// Extents of one block group, kept in physical order

use e4defrag_core::{BlockNumber, DefragError, ExtentRecord, InodeNumber};
use log::trace;

use crate::ring::{NodeId, Ring};

pub type ExtentId = NodeId;

/// What currently occupies an extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentStatus {
    Used,
    Free,
    /// Claimed by this attempt: either free already or its data was moved away
    Reserved,
}

/// A contiguous run of physical blocks with a single owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub status: ExtentStatus,
    /// Owning inode, meaningful for used and reserved extents
    pub owner: InodeNumber,
    pub data: ExtentRecord,
}

impl Extent {
    pub fn used(owner: InodeNumber, data: ExtentRecord) -> Self {
        Self { status: ExtentStatus::Used, owner, data }
    }

    pub fn free(data: ExtentRecord) -> Self {
        Self { status: ExtentStatus::Free, owner: 0, data }
    }

    pub fn start(&self) -> BlockNumber {
        self.data.start
    }

    pub fn len(&self) -> u32 {
        self.data.len
    }

    pub fn is_empty(&self) -> bool {
        self.data.len == 0
    }

    pub fn end(&self) -> BlockNumber {
        self.data.end()
    }

    /// Whether `next` begins exactly where this extent ends
    pub fn is_adjacent(&self, next: &Extent) -> bool {
        self.end() == next.start()
    }
}

/// Ring of extents ordered by ascending physical start, never overlapping.
///
/// The head is always the extent with the lowest start.
#[derive(Debug, Default)]
pub struct ExtentList {
    ring: Ring<Extent>,
}

impl ExtentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn head(&self) -> Option<ExtentId> {
        self.ring.head()
    }

    pub fn next(&self, id: ExtentId) -> ExtentId {
        self.ring.next(id)
    }

    pub fn prev(&self, id: ExtentId) -> ExtentId {
        self.ring.prev(id)
    }

    pub fn get(&self, id: ExtentId) -> Option<&Extent> {
        self.ring.get(id)
    }

    pub fn get_mut(&mut self, id: ExtentId) -> Option<&mut Extent> {
        self.ring.get_mut(id)
    }

    /// Link `extent` at its physical position.
    ///
    /// Fails without touching the list if the extent overlaps its
    /// predecessor or successor; the caller keeps the rejected extent.
    pub fn insert(&mut self, extent: Extent) -> Result<ExtentId, DefragError> {
        let successor = self.ring.find(|e| extent.start() < e.start());
        let predecessor = match successor {
            Some(id) if Some(id) == self.ring.head() => None,
            Some(id) => Some(self.ring.prev(id)),
            None => self.ring.tail(),
        };

        let overlaps = |id: Option<ExtentId>| id.is_some_and(|id| self.ring[id].data.overlaps(&extent.data));
        if overlaps(predecessor) || overlaps(successor) {
            return Err(DefragError::Overlap {
                start: extent.start(),
                len: extent.len(),
            });
        }

        trace!(
            "extent {}+{} ({:?}, inode {}) linked",
            extent.start(),
            extent.len(),
            extent.status,
            extent.owner
        );
        Ok(self.ring.insert_before(successor, extent))
    }

    /// Extent handles in physical order
    pub fn ids(&self) -> impl Iterator<Item = ExtentId> + '_ {
        self.ring.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Extent> + '_ {
        self.ring.iter()
    }

    /// Handles from `start` through `end` inclusive, following ring order
    pub fn range(&self, start: ExtentId, end: ExtentId) -> Vec<ExtentId> {
        let mut ids = vec![start];
        let mut cursor = start;
        while cursor != end {
            cursor = self.ring.next(cursor);
            if cursor == start {
                break;
            }
            ids.push(cursor);
        }
        ids
    }

    /// Sum of the lengths from `start` through `end`
    pub fn range_len(&self, start: ExtentId, end: ExtentId) -> u64 {
        self.range(start, end)
            .into_iter()
            .map(|id| self.ring[id].len() as u64)
            .sum()
    }
}

impl std::ops::Index<ExtentId> for ExtentList {
    type Output = Extent;

    fn index(&self, id: ExtentId) -> &Extent {
        &self.ring[id]
    }
}

impl std::ops::IndexMut<ExtentId> for ExtentList {
    fn index_mut(&mut self, id: ExtentId) -> &mut Extent {
        &mut self.ring[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free(start: BlockNumber, len: u32) -> Extent {
        Extent::free(ExtentRecord::new(0, start, len))
    }

    fn starts(list: &ExtentList) -> Vec<BlockNumber> {
        list.iter().map(Extent::start).collect()
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let mut list = ExtentList::new();
        for start in [40, 10, 30, 0, 20] {
            list.insert(free(start, 5)).unwrap();
        }
        assert_eq!(starts(&list), vec![0, 10, 20, 30, 40]);
        assert_eq!(list[list.head().unwrap()].start(), 0);
    }

    #[test]
    fn test_overlap_with_successor_rejected() {
        let mut list = ExtentList::new();
        list.insert(free(10, 5)).unwrap();
        let err = list.insert(free(8, 3)).unwrap_err();
        assert!(matches!(err, DefragError::Overlap { start: 8, len: 3 }));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_overlap_with_predecessor_rejected() {
        let mut list = ExtentList::new();
        list.insert(free(0, 10)).unwrap();
        list.insert(free(20, 10)).unwrap();
        assert!(list.insert(free(9, 2)).is_err());
        assert!(list.insert(free(25, 10)).is_err());
        assert_eq!(starts(&list), vec![0, 20]);
    }

    #[test]
    fn test_touching_extents_are_not_overlapping() {
        let mut list = ExtentList::new();
        list.insert(free(10, 5)).unwrap();
        list.insert(free(5, 5)).unwrap();
        list.insert(free(15, 5)).unwrap();
        assert_eq!(starts(&list), vec![5, 10, 15]);
        let head = list.head().unwrap();
        assert!(list[head].is_adjacent(&list[list.next(head)]));
    }

    #[test]
    fn test_range_follows_ring() {
        let mut list = ExtentList::new();
        let a = list.insert(free(0, 2)).unwrap();
        list.insert(free(2, 3)).unwrap();
        let c = list.insert(free(5, 4)).unwrap();
        assert_eq!(list.range(a, c).len(), 3);
        assert_eq!(list.range_len(a, c), 9);
        assert_eq!(list.range(c, c), vec![c]);
    }
}
