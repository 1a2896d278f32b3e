//! Frame-indexed ring of resources with current/previous accessors.
//!
//! Used for every double-buffered per-frame resource: motion vectors, TAA
//! resolve targets, camera uniforms. [`Temporal::proceed`] is the only way
//! the slot index changes and must run once per frame, after that frame's
//! reads have been recorded.

use std::ops::{Index, IndexMut};

/// Fixed-size ring of `N` frame resources.
#[derive(Debug, Clone)]
pub struct Temporal<T, const N: usize> {
    data: [T; N],
    index: usize,
}

impl<T, const N: usize> Temporal<T, N> {
    /// Wrap `N` pre-built resources. Slot 0 is current.
    pub fn new(data: [T; N]) -> Self {
        assert!(N > 0, "Temporal ring needs at least one slot");
        Self { data, index: 0 }
    }

    /// Build each slot with `f(slot_index)`.
    pub fn from_fn(f: impl FnMut(usize) -> T) -> Self {
        Self::new(std::array::from_fn(f))
    }

    /// Fallible variant of [`Temporal::from_fn`].
    pub fn try_from_fn<E>(mut f: impl FnMut(usize) -> Result<T, E>) -> Result<Self, E> {
        let mut slots = Vec::with_capacity(N);
        for slot in 0..N {
            slots.push(f(slot)?);
        }
        match slots.try_into() {
            Ok(data) => Ok(Self::new(data)),
            Err(_) => unreachable!("slot count matches N"),
        }
    }

    pub fn current(&self) -> &T {
        &self.data[self.index]
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.data[self.index]
    }

    pub fn previous(&self) -> &T {
        &self.data[self.previous_index()]
    }

    pub fn previous_mut(&mut self) -> &mut T {
        let idx = self.previous_index();
        &mut self.data[idx]
    }

    /// Advance to the next slot.
    pub fn proceed(&mut self) {
        self.index = (self.index + 1) % N;
    }

    /// Slot index currently returned by [`Temporal::current`].
    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn previous_index(&self) -> usize {
        (N + self.index - 1) % N
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Iterate slots in storage order (not frame order).
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.data.iter_mut()
    }
}

impl<T: Default, const N: usize> Default for Temporal<T, N> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T, const N: usize> Index<usize> for Temporal<T, N> {
    type Output = T;

    fn index(&self, slot: usize) -> &T {
        &self.data[slot]
    }
}

impl<T, const N: usize> IndexMut<usize> for Temporal<T, N> {
    fn index_mut(&mut self, slot: usize) -> &mut T {
        &mut self.data[slot]
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a Temporal<T, N> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_and_previous_differ() {
        let ring = Temporal::new(["a", "b"]);
        assert_eq!(*ring.current(), "a");
        assert_eq!(*ring.previous(), "b");
        assert_ne!(ring.current_index(), ring.previous_index());
    }

    #[test]
    fn test_proceed_moves_current_to_previous() {
        let mut ring = Temporal::<u32, 2>::from_fn(|i| i as u32 * 10);
        for _ in 0..5 {
            let before = *ring.current();
            ring.proceed();
            assert_eq!(*ring.previous(), before);
        }
    }

    #[test]
    fn test_even_proceeds_return_to_start() {
        let mut ring = Temporal::<u8, 2>::default();
        let start = ring.current_index();
        for _ in 0..4 {
            ring.proceed();
        }
        assert_eq!(ring.current_index(), start);
    }

    #[test]
    fn test_three_slot_ring() {
        let mut ring = Temporal::new([0, 1, 2]);
        assert_eq!(*ring.previous(), 2);
        ring.proceed();
        assert_eq!((*ring.previous(), *ring.current()), (0, 1));
        ring.proceed();
        ring.proceed();
        assert_eq!(*ring.current(), 0);
    }

    #[test]
    fn test_current_mut_writes_slot() {
        let mut ring = Temporal::<Vec<u32>, 2>::default();
        ring.current_mut().push(7);
        ring.proceed();
        assert_eq!(ring.previous().as_slice(), &[7]);
        assert!(ring.current().is_empty());
    }

    #[test]
    fn test_try_from_fn_propagates_error() {
        let res: Result<Temporal<u32, 2>, &str> =
            Temporal::try_from_fn(|i| if i == 1 { Err("slot 1") } else { Ok(0) });
        assert_eq!(res.err(), Some("slot 1"));
    }
}
