use parking_lot::Mutex;

use crate::metric::MetricElem;

/// Payload slot of a chain node. `None` marks a tombstoned element awaiting
/// physical removal at the end of the flush that consumed it.
pub(crate) type PayloadSlot = Mutex<Option<Box<dyn MetricElem>>>;

/// Opaque position of an element in its list. Returned by `push_back`; stays
/// valid until the element is collected after a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    index: usize,
    generation: u64,
}

struct Node {
    payload: PayloadSlot,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Slot {
    node: Option<Node>,
    generation: u64,
}

/// Slab-backed doubly-linked chain of aggregation elements.
///
/// Links give O(1) tail append and O(1) interior removal without per-insert
/// allocation beyond the slab slot; freed slots are recycled through a free
/// list with a bumped generation so stale handles never alias a new element.
///
/// Structure (links, head/tail, free list) is only mutated through `&mut
/// self`, i.e. under the owning list's write lock. Payloads sit behind
/// per-node mutexes so the flusher can tombstone elements while holding only
/// the read lock.
pub(crate) struct ElementChain {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ElementChain {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an element at the tail and returns its handle.
    pub fn push_back(&mut self, elem: Box<dyn MetricElem>) -> ElementHandle {
        let node = Node {
            payload: Mutex::new(Some(elem)),
            prev: self.tail,
            next: None,
        };

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    node: Some(node),
                    generation: 0,
                });
                self.slots.len() - 1
            }
        };

        match self.tail {
            Some(tail) => {
                self.slots[tail]
                    .node
                    .as_mut()
                    .expect("tail slot must be occupied")
                    .next = Some(index);
            }
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        ElementHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    /// Unlinks the node at `index` and recycles its slot. Returns `false` if
    /// the slot is already free.
    pub fn remove(&mut self, index: usize) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        let Some(node) = slot.node.take() else {
            return false;
        };
        slot.generation += 1;

        match node.prev {
            Some(prev) => {
                self.slots[prev]
                    .node
                    .as_mut()
                    .expect("prev slot must be occupied")
                    .next = node.next;
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                self.slots[next]
                    .node
                    .as_mut()
                    .expect("next slot must be occupied")
                    .prev = node.prev;
            }
            None => self.tail = node.prev,
        }

        self.free.push(index);
        self.len -= 1;
        true
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        self.slots.get(index)?.node.as_ref()?.next
    }

    /// The payload mutex of the node at `index`, if occupied.
    pub fn payload(&self, index: usize) -> Option<&PayloadSlot> {
        Some(&self.slots.get(index)?.node.as_ref()?.payload)
    }

    /// Whether `handle` still refers to a live slot (same generation).
    pub fn contains(&self, handle: ElementHandle) -> bool {
        self.slots
            .get(handle.index)
            .is_some_and(|slot| slot.node.is_some() && slot.generation == handle.generation)
    }
}
