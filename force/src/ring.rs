// Circular doubly-linked list stored in an arena
// Nodes are addressed by `NodeId`; links are indices into the arena, so
// unlinking a node never leaves anything dangling and the whole ring is
// dropped in one go with the arena.

/// Handle to a node of a `Ring`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug)]
struct Node<T> {
    value: T,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct Ring<T> {
    slots: Vec<Option<Node<T>>>,
    vacant: Vec<usize>,
    head: Option<usize>,
    len: usize,
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Ring<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head.map(NodeId)
    }

    /// The node just before the head, i.e. the last one in ring order
    pub fn tail(&self) -> Option<NodeId> {
        self.head.map(|h| NodeId(self.node(h).prev))
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id.0).and_then(|s| s.as_ref()).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut()).map(|n| &mut n.value)
    }

    /// Successor of `id`; wraps from the tail back to the head
    pub fn next(&self, id: NodeId) -> NodeId {
        NodeId(self.node(id.0).next)
    }

    pub fn prev(&self, id: NodeId) -> NodeId {
        NodeId(self.node(id.0).prev)
    }

    /// First node, walking from the head, that satisfies `pred`
    pub fn find(&self, mut pred: impl FnMut(&T) -> bool) -> Option<NodeId> {
        self.ids().find(|id| pred(&self.node(id.0).value))
    }

    /// Link `value` in front of `before`, or at the tail when `before` is `None`.
    ///
    /// Inserting in front of the head makes the new node the head. An empty
    /// ring takes the value as its only, self-linked member.
    pub fn insert_before(&mut self, before: Option<NodeId>, value: T) -> NodeId {
        let idx = self.alloc(value);
        match self.head {
            None => {
                self.head = Some(idx);
            }
            Some(head) => {
                let anchor = before.map(|b| b.0).unwrap_or(head);
                let prev = self.node(anchor).prev;
                self.link(prev, idx, anchor);
                if before.map(|b| b.0) == Some(head) {
                    self.head = Some(idx);
                }
            }
        }
        self.len += 1;
        NodeId(idx)
    }

    /// Unlink `id` and hand its value back.
    ///
    /// When `id` was the head, the head moves on to its successor, or the
    /// ring becomes empty if it was the only member.
    pub fn remove(&mut self, id: NodeId) -> Option<T> {
        let node = self.slots.get_mut(id.0)?.take()?;
        if self.len == 1 {
            self.head = None;
        } else {
            self.node_mut(node.prev).next = node.next;
            self.node_mut(node.next).prev = node.prev;
            if self.head == Some(id.0) {
                self.head = Some(node.next);
            }
        }
        self.len -= 1;
        self.vacant.push(id.0);
        Some(node.value)
    }

    /// Drop every node
    pub fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
        self.head = None;
        self.len = 0;
    }

    /// Node handles in ring order, starting at the head
    pub fn ids(&self) -> Ids<'_, T> {
        Ids {
            ring: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Values in ring order, starting at the head
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.ids().map(move |id| &self.node(id.0).value)
    }

    fn alloc(&mut self, value: T) -> usize {
        let idx = self.vacant.pop().unwrap_or(self.slots.len());
        let node = Some(Node { value, prev: idx, next: idx });
        if idx == self.slots.len() {
            self.slots.push(node);
        } else {
            self.slots[idx] = node;
        }
        idx
    }

    fn link(&mut self, prev: usize, idx: usize, next: usize) {
        self.node_mut(idx).prev = prev;
        self.node_mut(idx).next = next;
        self.node_mut(prev).next = idx;
        self.node_mut(next).prev = idx;
    }

    fn node(&self, idx: usize) -> &Node<T> {
        match self.slots.get(idx) {
            Some(Some(node)) => node,
            _ => panic!("ring node {idx} is not linked"),
        }
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<T> {
        match self.slots.get_mut(idx) {
            Some(Some(node)) => node,
            _ => panic!("ring node {idx} is not linked"),
        }
    }
}

impl<T> std::ops::Index<NodeId> for Ring<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        &self.node(id.0).value
    }
}

impl<T> std::ops::IndexMut<NodeId> for Ring<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.node_mut(id.0).value
    }
}

/// Iterator over node handles, see `Ring::ids`
pub struct Ids<'a, T> {
    ring: &'a Ring<T>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, T> Iterator for Ids<'a, T> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.cursor?;
        self.remaining -= 1;
        self.cursor = Some(self.ring.node(idx).next);
        Some(NodeId(idx))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
