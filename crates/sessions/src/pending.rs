//! Scoped reservation of wallet/session indices.
//!
//! An index is reserved inside the owner's critical section and released
//! when the [`IndexReservation`] is dropped, whatever the exit path. Calling
//! [`IndexReservation::complete`] instead moves the index from pending to
//! present under one lock acquisition.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// State that tracks indices currently mid-creation.
pub trait PendingSlots {
    fn pending(&mut self) -> &mut BTreeSet<u32>;
}

/// Guard for one reserved index.
///
/// Create it while holding the owner's lock, and let that lock guard go out
/// of scope before the reservation can be dropped: the lock is not
/// re-entrant.
pub struct IndexReservation<S: PendingSlots> {
    slots: Arc<Mutex<S>>,
    index: u32,
    armed: bool,
}

impl<S: PendingSlots> IndexReservation<S> {
    /// Record `index` as pending in `state` and return its guard.
    pub fn reserve(slots: &Arc<Mutex<S>>, state: &mut S, index: u32) -> Self {
        state.pending().insert(index);
        Self {
            slots: Arc::clone(slots),
            index,
            armed: true,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Release the index and run `f` in the same critical section.
    pub fn complete<R>(mut self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut state = self.slots.lock();
        state.pending().remove(&self.index);
        self.armed = false;
        f(&mut state)
    }
}

impl<S: PendingSlots> Drop for IndexReservation<S> {
    fn drop(&mut self) {
        if self.armed {
            self.slots.lock().pending().remove(&self.index);
            tracing::debug!(index = self.index, "index reservation released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Slots {
        pending: BTreeSet<u32>,
        present: Vec<u32>,
    }

    impl PendingSlots for Slots {
        fn pending(&mut self) -> &mut BTreeSet<u32> {
            &mut self.pending
        }
    }

    fn reserve(slots: &Arc<Mutex<Slots>>, index: u32) -> IndexReservation<Slots> {
        let mut state = slots.lock();
        IndexReservation::reserve(slots, &mut state, index)
    }

    #[test]
    fn drop_releases_index() {
        let slots = Arc::new(Mutex::new(Slots::default()));
        let r = reserve(&slots, 4);
        assert!(slots.lock().pending.contains(&4));
        drop(r);
        assert!(slots.lock().pending.is_empty());
    }

    #[test]
    fn early_return_releases_index() {
        fn failing(slots: &Arc<Mutex<Slots>>) -> Result<(), &'static str> {
            let _r = reserve(slots, 1);
            Err("connect refused")
        }
        let slots = Arc::new(Mutex::new(Slots::default()));
        assert!(failing(&slots).is_err());
        assert!(slots.lock().pending.is_empty());
    }

    #[test]
    fn complete_moves_index_to_present() {
        let slots = Arc::new(Mutex::new(Slots::default()));
        let r = reserve(&slots, 2);
        let index = r.index();
        r.complete(|s| s.present.push(index));

        let state = slots.lock();
        assert!(state.pending.is_empty());
        assert_eq!(state.present, vec![2]);
    }
}
