// Extent groups: physically contiguous runs of extents

use crate::extent::{ExtentId, ExtentList};
use crate::ring::{NodeId, Ring};

pub type GroupId = NodeId;

/// A contiguous run `[start, end]` of extents from one `ExtentList`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtentGroup {
    pub start: ExtentId,
    pub end: ExtentId,
    /// Total blocks of the member extents
    pub len: u64,
}

impl ExtentGroup {
    pub fn new(start: ExtentId, end: ExtentId, len: u64) -> Self {
        Self { start, end, len }
    }

    /// Member extents in physical order
    pub fn members(&self, extents: &ExtentList) -> Vec<ExtentId> {
        extents.range(self.start, self.end)
    }

    /// Whether every member starts where the previous one ends
    pub fn is_contiguous(&self, extents: &ExtentList) -> bool {
        self.members(extents)
            .windows(2)
            .all(|pair| extents[pair[0]].is_adjacent(&extents[pair[1]]))
    }
}

/// Ring of groups ordered by non-increasing length; the head is the largest.
///
/// Groups of equal length keep their insertion order.
#[derive(Debug, Default)]
pub struct GroupList {
    ring: Ring<ExtentGroup>,
}

impl GroupList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// The largest group
    pub fn head(&self) -> Option<GroupId> {
        self.ring.head()
    }

    /// The smallest group
    pub fn tail(&self) -> Option<GroupId> {
        self.ring.tail()
    }

    pub fn next(&self, id: GroupId) -> GroupId {
        self.ring.next(id)
    }

    pub fn prev(&self, id: GroupId) -> GroupId {
        self.ring.prev(id)
    }

    pub fn get(&self, id: GroupId) -> Option<&ExtentGroup> {
        self.ring.get(id)
    }

    pub fn insert(&mut self, group: ExtentGroup) -> GroupId {
        let before = self.ring.find(|g| g.len < group.len);
        self.ring.insert_before(before, group)
    }

    /// Detach `id` from the ring and return it
    pub fn extract(&mut self, id: GroupId) -> Option<ExtentGroup> {
        self.ring.remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.ring.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtentGroup> + '_ {
        self.ring.iter()
    }
}

impl std::ops::Index<GroupId> for GroupList {
    type Output = ExtentGroup;

    fn index(&self, id: GroupId) -> &ExtentGroup {
        &self.ring[id]
    }
}
