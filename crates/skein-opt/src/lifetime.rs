//! Qubit lifetimes and the physical slot pool.

use tracing::debug;

use crate::node::{PhysicalQid, VirtualQid};

/// A closed interval of cycles during which a qubit is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifeTime {
    begin: u32,
    end: u32,
}

impl LifeTime {
    /// Create a lifetime spanning `[begin, end]` inclusive.
    pub fn new(begin: u32, end: u32) -> Self {
        assert!(end >= begin, "invalid lifetime");
        Self { begin, end }
    }

    /// Returns true if `self` is entirely after `other`.
    pub fn is_after(self, other: LifeTime) -> bool {
        self.begin > other.end
    }

    /// Returns true if the two lifetimes share at least one cycle.
    pub fn is_overlapping(self, other: LifeTime) -> bool {
        !self.is_after(other) && !other.is_after(self)
    }

    /// The number of cycles between the end of the earlier lifetime
    /// and the beginning of the later one. 0 if they overlap.
    pub fn distance(self, other: LifeTime) -> u32 {
        if self.is_overlapping(other) {
            return 0;
        }
        self.begin.max(other.begin) - self.end.min(other.end)
    }

    /// Expand `self` to cover `other` and any gap between them.
    pub fn combine(&mut self, other: LifeTime) {
        self.begin = self.begin.min(other.begin);
        self.end = self.end.max(other.end);
    }

    /// First cycle of the lifetime.
    pub fn begin(self) -> u32 {
        self.begin
    }

    /// Last cycle of the lifetime.
    pub fn end(self) -> u32 {
        self.end
    }
}

/// Pool of physical qubit slots with lifetime-based reuse.
///
/// Slot index equals the [`PhysicalQid`]. A slot holding `None` is
/// known to the pool but not occupied in the current frame; nested
/// scopes use [`LifetimePool::clear_frame`] to allocate in a pristine
/// view while the parent recombines afterwards.
#[derive(Debug)]
pub struct LifetimePool {
    name: String,
    slots: Vec<Option<LifeTime>>,
}

impl LifetimePool {
    /// Create an empty pool for the named wire set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: vec![],
        }
    }

    /// Find a physical slot for `lifetime`, preferring to reuse an
    /// existing slot whose occupant does not overlap it, minimizing
    /// the gap distance. Falls back to an empty slot, then to a fresh
    /// one.
    pub fn allocate_physical(&mut self, qid: VirtualQid, lifetime: LifeTime) -> PhysicalQid {
        let mut best_reuse: Option<usize> = None;
        let mut empty: Option<usize> = None;
        let mut best_distance = u32::MAX;

        for (i, slot) in self.slots.iter().enumerate() {
            let Some(other) = slot else {
                empty = Some(i);
                continue;
            };
            let distance = lifetime.distance(*other);
            if !lifetime.is_overlapping(*other) && distance < best_distance {
                best_reuse = Some(i);
                best_distance = distance;
            }
        }

        let phys = if let Some(i) = best_reuse {
            // Reuse based on lifetime in the same frame.
            self.slots[i]
                .as_mut()
                .expect("best-fit slot must be occupied")
                .combine(lifetime);
            i
        } else if let Some(i) = empty {
            // Reuse a slot last used in a different frame.
            self.slots[i] = Some(lifetime);
            i
        } else {
            self.slots.push(Some(lifetime));
            self.slots.len() - 1
        };

        debug!(
            "{qid} in use cycles {}..={} mapped to physical slot {phys}",
            lifetime.begin(),
            lifetime.end()
        );
        PhysicalQid(u32::try_from(phys).expect("physical slot overflow"))
    }

    /// Install `lifetime` on an already-known slot. The slot must not
    /// be occupied in the current frame.
    pub fn reallocate_physical(&mut self, phys: PhysicalQid, lifetime: LifeTime) {
        let idx = phys.0 as usize;
        assert!(idx < self.slots.len(), "illegal qubit to reallocate");
        assert!(
            self.slots[idx].is_none(),
            "cannot reallocate qubit still allocated"
        );
        self.slots[idx] = Some(lifetime);
    }

    /// Detach and return the physical qubits occupied in the current
    /// frame, resetting their slots to unoccupied.
    pub fn clear_frame(&mut self) -> Vec<PhysicalQid> {
        let mut frame = vec![];
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.take().is_some() {
                frame.push(PhysicalQid(i as u32));
            }
        }
        frame
    }

    /// Total number of physical slots ever allocated.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Log the per-slot cycle ranges.
    pub fn dump(&self) {
        let ranges: Vec<String> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(lt) => format!("{} - {}", lt.begin(), lt.end()),
                None => "unused".to_string(),
            })
            .collect();
        debug!(
            "{}: # qubits: {}, cycles: {}",
            self.name,
            self.count(),
            ranges.join(" ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifetime_relations() {
        let a = LifeTime::new(0, 2);
        let b = LifeTime::new(5, 7);
        assert!(b.is_after(a));
        assert!(!a.is_after(b));
        assert!(!a.is_overlapping(b));
        assert_eq!(a.distance(b), 3);
        assert_eq!(b.distance(a), 3);

        let c = LifeTime::new(2, 4);
        assert!(a.is_overlapping(c));
        assert_eq!(a.distance(c), 0);
    }

    #[test]
    fn test_lifetime_combine() {
        let mut a = LifeTime::new(3, 5);
        a.combine(LifeTime::new(8, 9));
        assert_eq!(a.begin(), 3);
        assert_eq!(a.end(), 9);
    }

    #[test]
    #[should_panic(expected = "invalid lifetime")]
    fn test_lifetime_rejects_inverted() {
        let _ = LifeTime::new(4, 2);
    }

    #[test]
    fn test_pool_best_fit_reuse() {
        let mut pool = LifetimePool::new("wires");
        let p0 = pool.allocate_physical(VirtualQid(0), LifeTime::new(0, 2));
        let p1 = pool.allocate_physical(VirtualQid(1), LifeTime::new(0, 9));
        // Non-overlapping with slot 0 (distance 1) and slot 1 overlaps,
        // so slot 0 is reused.
        let p2 = pool.allocate_physical(VirtualQid(2), LifeTime::new(4, 6));
        assert_eq!(p2, p0);
        assert_ne!(p2, p1);
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn test_pool_picks_minimum_distance() {
        let mut pool = LifetimePool::new("wires");
        let _p0 = pool.allocate_physical(VirtualQid(0), LifeTime::new(0, 1));
        let p1 = pool.allocate_physical(VirtualQid(1), LifeTime::new(0, 5));
        // Distance 1 to slot 1, distance 5 to slot 0.
        let p2 = pool.allocate_physical(VirtualQid(2), LifeTime::new(7, 8));
        assert_eq!(p2, p1);
    }

    #[test]
    fn test_pool_grows_when_all_overlap() {
        let mut pool = LifetimePool::new("wires");
        pool.allocate_physical(VirtualQid(0), LifeTime::new(0, 4));
        pool.allocate_physical(VirtualQid(1), LifeTime::new(1, 4));
        pool.allocate_physical(VirtualQid(2), LifeTime::new(2, 4));
        assert_eq!(pool.count(), 3);
    }

    #[test]
    fn test_clear_frame_and_empty_reuse() {
        let mut pool = LifetimePool::new("wires");
        pool.allocate_physical(VirtualQid(0), LifeTime::new(0, 4));
        pool.allocate_physical(VirtualQid(1), LifeTime::new(2, 6));
        let frame = pool.clear_frame();
        assert_eq!(frame, vec![PhysicalQid(0), PhysicalQid(1)]);
        assert_eq!(pool.count(), 2);

        // An overlapping request now claims an empty slot, not a new
        // one. The scan remembers the last empty slot it saw.
        let p = pool.allocate_physical(VirtualQid(2), LifeTime::new(0, 6));
        assert_eq!(p, PhysicalQid(1));
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn test_reallocate_physical() {
        let mut pool = LifetimePool::new("wires");
        pool.allocate_physical(VirtualQid(0), LifeTime::new(0, 3));
        pool.clear_frame();
        pool.reallocate_physical(PhysicalQid(0), LifeTime::new(1, 2));
        // Slot 0 is occupied again, so the next allocation grows the pool.
        let p = pool.allocate_physical(VirtualQid(1), LifeTime::new(0, 5));
        assert_eq!(p, PhysicalQid(1));
    }

    #[test]
    #[should_panic(expected = "cannot reallocate qubit still allocated")]
    fn test_reallocate_occupied_slot_panics() {
        let mut pool = LifetimePool::new("wires");
        pool.allocate_physical(VirtualQid(0), LifeTime::new(0, 3));
        pool.reallocate_physical(PhysicalQid(0), LifeTime::new(4, 5));
    }
}
