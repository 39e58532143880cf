use std::collections::BTreeSet;

pub type EntityId = u32;
pub type ClientId = u16;

pub const MIN_ENTITY_ID: EntityId = 1;
pub const MAX_ENTITY_ID: EntityId = 0xFFFF;
pub const MIN_CLIENT_ID: u32 = 0;
pub const MAX_CLIENT_ID: u32 = 0xFFFF;

/// Bounded id pool that always hands out the lowest free id.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    min: u32,
    max: u32,
    next_unused: u64,
    released: BTreeSet<u32>,
}

impl IdAllocator {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min,
            max,
            next_unused: min as u64,
            released: BTreeSet::new(),
        }
    }

    pub fn entities() -> Self {
        Self::new(MIN_ENTITY_ID, MAX_ENTITY_ID)
    }

    pub fn clients() -> Self {
        Self::new(MIN_CLIENT_ID, MAX_CLIENT_ID)
    }

    /// `None` once every id in the range is in use.
    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(id) = self.released.pop_first() {
            return Some(id);
        }
        if self.next_unused > self.max as u64 {
            return None;
        }
        let id = self.next_unused as u32;
        self.next_unused += 1;
        Some(id)
    }

    /// Returns `id` to the pool. Ids outside the range or not in use are ignored.
    pub fn free(&mut self, id: u32) -> bool {
        if !self.is_allocated(id) {
            return false;
        }
        if id as u64 + 1 == self.next_unused {
            self.next_unused -= 1;
            // Shrink past any released ids now adjoining the unused tail.
            while self.next_unused > self.min as u64 {
                let below = (self.next_unused - 1) as u32;
                if !self.released.remove(&below) {
                    break;
                }
                self.next_unused -= 1;
            }
        } else {
            self.released.insert(id);
        }
        true
    }

    pub fn is_allocated(&self, id: u32) -> bool {
        id >= self.min && (id as u64) < self.next_unused && !self.released.contains(&id)
    }

    pub fn in_use(&self) -> usize {
        (self.next_unused - self.min as u64) as usize - self.released.len()
    }

    pub fn clear(&mut self) {
        self.next_unused = self.min as u64;
        self.released.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_id_is_reused_first() {
        let mut ids = IdAllocator::entities();
        let allocated: Vec<_> = (0..50).filter_map(|_| ids.allocate()).collect();
        assert_eq!(allocated.first(), Some(&1));
        assert!(allocated.contains(&42));

        assert!(ids.free(42));
        assert!(!ids.free(42));
        assert_eq!(ids.allocate(), Some(42));
        assert_eq!(ids.allocate(), Some(51));
    }

    #[test]
    fn exhaustion_and_tail_shrink() {
        let mut ids = IdAllocator::new(0, 2);
        assert_eq!(ids.allocate(), Some(0));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
        assert_eq!(ids.allocate(), None);

        ids.free(1);
        ids.free(2);
        assert_eq!(ids.in_use(), 1);
        assert!(!ids.is_allocated(2));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));
    }

    #[test]
    fn out_of_range_free_is_ignored() {
        let mut ids = IdAllocator::entities();
        assert!(!ids.free(0));
        assert!(!ids.free(7));
        assert_eq!(ids.in_use(), 0);
    }
}
