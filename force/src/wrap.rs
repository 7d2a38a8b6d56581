// In-flight victim extents of one displacement batch

use crate::extent::{ExtentId, ExtentList, ExtentStatus};
use crate::ring::Ring;

/// Non-owning references to used extents whose data is being moved away.
///
/// The batch is either marked reserved as a whole once every move went
/// through, or dropped unmarked.
#[derive(Debug, Default)]
pub struct WrapList {
    ring: Ring<ExtentId>,
}

impl WrapList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn track(&mut self, extent: ExtentId) {
        self.ring.insert_before(None, extent);
    }

    /// Mark every tracked extent reserved, returning how many were marked
    pub fn mark_reserved(&self, extents: &mut ExtentList) -> usize {
        let mut marked = 0;
        for &id in self.ring.iter() {
            if let Some(extent) = extents.get_mut(id) {
                extent.status = ExtentStatus::Reserved;
                marked += 1;
            }
        }
        marked
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use e4defrag_core::ExtentRecord;

    #[test]
    fn test_mark_only_touches_tracked_extents() {
        let mut list = ExtentList::new();
        let a = list.insert(Extent::used(7, ExtentRecord::new(0, 0, 4))).unwrap();
        let b = list.insert(Extent::used(8, ExtentRecord::new(0, 4, 4))).unwrap();

        let mut wraps = WrapList::new();
        wraps.track(a);
        assert_eq!(wraps.mark_reserved(&mut list), 1);
        assert_eq!(list[a].status, ExtentStatus::Reserved);
        assert_eq!(list[b].status, ExtentStatus::Used);

        wraps.clear();
        assert!(wraps.is_empty());
    }
}
