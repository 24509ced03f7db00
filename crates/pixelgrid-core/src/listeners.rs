//! Listener registry for grid snapshots.
//!
//! Registration is per slot: adding the same callback twice occupies two
//! slots, and each returned [`Subscription`] removes exactly its own slot.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

type Callback<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Slot<T: ?Sized> {
    id: u64,
    callback: Callback<T>,
}

struct Registry<T: ?Sized> {
    next_id: u64,
    slots: Vec<Slot<T>>,
}

/// A set of callbacks notified in registration order.
pub struct Listeners<T: ?Sized> {
    inner: Rc<RefCell<Registry<T>>>,
}

impl<T: ?Sized + 'static> Listeners<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry { next_id: 0, slots: Vec::new() })),
        }
    }

    /// Register a callback. Dropping the returned handle does not unsubscribe.
    pub fn add(&self, callback: impl FnMut(&T) + 'static) -> Subscription {
        let mut registry = self.inner.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.slots.push(Slot { id, callback: Rc::new(RefCell::new(callback)) });

        let weak: Weak<RefCell<Registry<T>>> = Rc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.borrow_mut().slots.retain(|slot| slot.id != id);
                }
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener with `value`.
    ///
    /// Callbacks run outside the registry borrow, so they may subscribe or
    /// unsubscribe. A panicking callback is logged and skipped; the rest are
    /// still notified. Returns the number of callbacks that completed.
    pub fn notify(&self, value: &T) -> usize {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .borrow()
            .slots
            .iter()
            .map(|slot| Rc::clone(&slot.callback))
            .collect();

        let mut delivered = 0;
        for callback in callbacks {
            let Ok(mut callback) = callback.try_borrow_mut() else {
                log::warn!("Skipping re-entrant grid listener");
                continue;
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)(value)));
            match result {
                Ok(()) => delivered += 1,
                Err(_) => log::error!("Grid listener panicked; continuing with remaining listeners"),
            }
        }
        delivered
    }
}

impl<T: ?Sized + 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle that removes one listener slot.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Remove the slot. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.remove.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_same_callback_twice_takes_two_slots() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Rc::new(Cell::new(0));
        let make = || {
            let hits = hits.clone();
            move |_: &u32| hits.set(hits.get() + 1)
        };
        let mut first = listeners.add(make());
        let _second = listeners.add(make());

        listeners.notify(&1);
        assert_eq!(hits.get(), 2);

        first.unsubscribe();
        first.unsubscribe();
        listeners.notify(&2);
        assert_eq!(hits.get(), 3);
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let listeners: Listeners<u32> = Listeners::new();
        let seen = Rc::new(Cell::new(0));
        let _bad = listeners.add(|_| panic!("listener failure"));
        let seen_clone = seen.clone();
        let _good = listeners.add(move |v| seen_clone.set(*v));

        assert_eq!(listeners.notify(&7), 1);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn test_unsubscribe_inside_callback() {
        let listeners: Rc<Listeners<u32>> = Rc::new(Listeners::new());
        let handle: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let handle_clone = handle.clone();
        let sub = listeners.add(move |_| {
            if let Some(mut sub) = handle_clone.borrow_mut().take() {
                sub.unsubscribe();
            }
        });
        *handle.borrow_mut() = Some(sub);

        assert_eq!(listeners.notify(&0), 1);
        assert!(listeners.is_empty());
    }
}
