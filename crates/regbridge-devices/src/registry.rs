/*!
 * Device registry for regbridge.
 *
 * Devices live in a circular doubly-linked list threaded through an arena.
 * Each slot carries a generation, so a [`RecordHandle`] taken before a
 * removal can never reach the record that later reuses its slot.
 */
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{DeviceError, Result};
use crate::storage::DeviceRecord;

/// Stable handle to a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordHandle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node {
    record: DeviceRecord,
    next: usize,
    prev: usize,
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    node: Option<Node>,
}

/// Circular list of device records
#[derive(Debug)]
pub struct DeviceRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    len: usize,
    max_devices: usize,
}

impl DeviceRegistry {
    /// Create an empty registry holding at most `max_devices` records
    pub fn new(max_devices: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            len: 0,
            max_devices,
        }
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no device is registered
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Most devices the registry accepts
    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    /// Append a record at the tail of the list
    pub fn insert(&mut self, record: DeviceRecord) -> Result<RecordHandle> {
        if record.uid().is_empty() {
            return Err(DeviceError::InvalidId("empty device id".to_string()));
        }
        if self.len >= self.max_devices {
            return Err(DeviceError::CapacityExceeded(format!(
                "registry holds {} of {} devices",
                self.len, self.max_devices
            )));
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                });
                self.slots.len() - 1
            }
        };

        let (next, prev) = match self.head {
            None => (index, index),
            Some(head) => {
                let tail = self.node(head).prev;
                self.node_mut(tail).next = index;
                self.node_mut(head).prev = index;
                (head, tail)
            }
        };
        if self.head.is_none() {
            self.head = Some(index);
        }

        debug!("Registered device {} in slot {}", record.uid(), index);
        let slot = &mut self.slots[index];
        slot.node = Some(Node { record, next, prev });
        self.len += 1;

        Ok(RecordHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Unlink a record and hand its storage back
    pub fn remove(&mut self, handle: RecordHandle) -> Result<DeviceRecord> {
        if !self.contains(handle) {
            return Err(DeviceError::not_found(format!("device slot {}", handle.index)));
        }
        let index = handle.index;
        let (next, prev) = {
            let node = self.node(index);
            (node.next, node.prev)
        };

        if next == index {
            self.head = None;
        } else {
            self.node_mut(prev).next = next;
            self.node_mut(next).prev = prev;
            if self.head == Some(index) {
                self.head = Some(next);
            }
        }

        let slot = &mut self.slots[index];
        let node = slot
            .node
            .take()
            .ok_or_else(|| DeviceError::not_found(format!("device slot {}", index)))?;
        slot.generation += 1;
        self.free.push(index);
        self.len -= 1;

        debug!("Unregistered device {} from slot {}", node.record.uid(), index);
        Ok(node.record)
    }

    /// Find a device by unique id, scanning from the head once around the ring
    pub fn find_by_uid(&self, uid: &str) -> Option<RecordHandle> {
        self.handles().find(|handle| {
            self.get(*handle)
                .map(|record| record.uid().as_str() == uid)
                .unwrap_or(false)
        })
    }

    /// Whether a handle still refers to a registered record
    pub fn contains(&self, handle: RecordHandle) -> bool {
        self.slots
            .get(handle.index)
            .map(|slot| slot.generation == handle.generation && slot.node.is_some())
            .unwrap_or(false)
    }

    /// Record behind a handle
    pub fn get(&self, handle: RecordHandle) -> Option<&DeviceRecord> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
            .map(|node| &node.record)
    }

    /// Mutable record behind a handle
    pub fn get_mut(&mut self, handle: RecordHandle) -> Option<&mut DeviceRecord> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
            .map(|node| &mut node.record)
    }

    /// Handle of the head record
    pub fn head(&self) -> Option<RecordHandle> {
        self.head.map(|index| self.handle_at(index))
    }

    /// Successor of a record in the ring
    pub fn next(&self, handle: RecordHandle) -> Option<RecordHandle> {
        if !self.contains(handle) {
            return None;
        }
        Some(self.handle_at(self.node(handle.index).next))
    }

    /// Predecessor of a record in the ring
    pub fn prev(&self, handle: RecordHandle) -> Option<RecordHandle> {
        if !self.contains(handle) {
            return None;
        }
        Some(self.handle_at(self.node(handle.index).prev))
    }

    /// Handles in list order, starting at the head
    pub fn handles(&self) -> Handles<'_> {
        Handles {
            registry: self,
            current: self.head,
            remaining: self.len,
        }
    }

    /// Records in list order, starting at the head
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> + '_ {
        self.handles().filter_map(move |handle| self.get(handle))
    }

    fn handle_at(&self, index: usize) -> RecordHandle {
        RecordHandle {
            index,
            generation: self.slots[index].generation,
        }
    }

    // Only called with indices that are linked into the ring.
    fn node(&self, index: usize) -> &Node {
        match self.slots[index].node.as_ref() {
            Some(node) => node,
            None => unreachable!("slot {} is linked but empty", index),
        }
    }

    fn node_mut(&mut self, index: usize) -> &mut Node {
        match self.slots[index].node.as_mut() {
            Some(node) => node,
            None => unreachable!("slot {} is linked but empty", index),
        }
    }
}

/// Iterator over registry handles, stopping on return to the head
#[derive(Debug)]
pub struct Handles<'a> {
    registry: &'a DeviceRegistry,
    current: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Handles<'a> {
    type Item = RecordHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.current?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let next = self.registry.node(index).next;
        self.current = if Some(next) == self.registry.head {
            None
        } else {
            Some(next)
        };
        Some(self.registry.handle_at(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regbridge_core::types::DeviceUid;

    fn record(uid: &str) -> DeviceRecord {
        DeviceRecord::new(DeviceUid::new(uid), format!("h-{}", uid), 2).unwrap()
    }

    fn uids(registry: &DeviceRegistry) -> Vec<String> {
        registry.iter().map(|r| r.uid().to_string()).collect()
    }

    fn assert_closed(registry: &DeviceRegistry) {
        let Some(head) = registry.head() else {
            assert_eq!(registry.len(), 0);
            return;
        };
        let mut forward = head;
        let mut backward = head;
        for _ in 0..registry.len() {
            forward = registry.next(forward).unwrap();
            backward = registry.prev(backward).unwrap();
        }
        assert_eq!(forward, head);
        assert_eq!(backward, head);
    }

    #[test]
    fn test_insert_appends_at_tail() {
        let mut registry = DeviceRegistry::new(8);
        let a = registry.insert(record("A")).unwrap();
        assert_eq!(registry.next(a), Some(a));
        assert_eq!(registry.prev(a), Some(a));

        registry.insert(record("B")).unwrap();
        registry.insert(record("C")).unwrap();

        assert_eq!(uids(&registry), vec!["A", "B", "C"]);
        assert_eq!(registry.head(), Some(a));
        assert_closed(&registry);
    }

    #[test]
    fn test_remove_sole_node_empties_registry() {
        let mut registry = DeviceRegistry::new(8);
        let a = registry.insert(record("A")).unwrap();

        let removed = registry.remove(a).unwrap();
        assert_eq!(removed.uid().as_str(), "A");
        assert!(registry.is_empty());
        assert_eq!(registry.head(), None);
        assert_eq!(registry.find_by_uid("A"), None);
    }

    #[test]
    fn test_remove_head_advances_head() {
        let mut registry = DeviceRegistry::new(8);
        let a = registry.insert(record("A")).unwrap();
        let b = registry.insert(record("B")).unwrap();
        registry.insert(record("C")).unwrap();

        registry.remove(a).unwrap();
        assert_eq!(registry.head(), Some(b));
        assert_eq!(uids(&registry), vec!["B", "C"]);
        assert_closed(&registry);
    }

    #[test]
    fn test_remove_middle_keeps_ring_closed() {
        let mut registry = DeviceRegistry::new(8);
        registry.insert(record("A")).unwrap();
        let b = registry.insert(record("B")).unwrap();
        registry.insert(record("C")).unwrap();

        registry.remove(b).unwrap();
        assert_eq!(uids(&registry), vec!["A", "C"]);
        assert_closed(&registry);
        assert!(registry.find_by_uid("B").is_none());
        assert!(registry.find_by_uid("C").is_some());
    }

    #[test]
    fn test_stale_handle_is_not_found() {
        let mut registry = DeviceRegistry::new(8);
        let a = registry.insert(record("A")).unwrap();
        registry.remove(a).unwrap();

        let reused = registry.insert(record("B")).unwrap();
        assert!(!registry.contains(a));
        assert!(registry.get(a).is_none());
        assert!(matches!(registry.remove(a), Err(DeviceError::NotFound(_))));
        assert_eq!(registry.get(reused).unwrap().uid().as_str(), "B");
    }

    #[test]
    fn test_capacity_and_empty_uid() {
        let mut registry = DeviceRegistry::new(1);
        registry.insert(record("A")).unwrap();
        assert!(matches!(
            registry.insert(record("B")),
            Err(DeviceError::CapacityExceeded(_))
        ));
        assert_eq!(registry.len(), 1);

        let mut registry = DeviceRegistry::new(4);
        assert!(matches!(
            registry.insert(record("")),
            Err(DeviceError::InvalidId(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_uid_scans_whole_ring() {
        let mut registry = DeviceRegistry::new(8);
        for uid in ["A", "B", "C", "D"] {
            registry.insert(record(uid)).unwrap();
        }
        let d = registry.find_by_uid("D").unwrap();
        assert_eq!(registry.next(d), registry.head());
        assert_eq!(registry.find_by_uid("E"), None);
    }
}
