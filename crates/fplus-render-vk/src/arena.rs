// SPDX-License-Identifier: CEPL-1.0
//! Ownership of raw GPU handles.
//!
//! Vulkan handles are plain `Copy` integers with no destructor, so every
//! object the renderer creates is adopted into a [`ResourceArena`] together
//! with the call that destroys it. Arenas tear down in reverse creation
//! order: views before images, images before their memory, pipelines before
//! layouts. [`Scoped`] does the same for a single short-lived handle.

use std::fmt;

/// Stable index into a [`ResourceArena`]. Stays valid (as a tombstone)
/// after early release, so ids are never reused within one arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(usize);

type Destroy<C> = Box<dyn FnOnce(&C)>;

struct Slot<C> {
    label: &'static str,
    destroy: Option<Destroy<C>>,
}

pub struct ResourceArena<C> {
    name: &'static str,
    slots: Vec<Slot<C>>,
    live: usize,
}

impl<C> ResourceArena<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Takes ownership of a resource; `destroy` runs exactly once.
    pub fn adopt(&mut self, label: &'static str, destroy: impl FnOnce(&C) + 'static) -> ResourceId {
        self.slots.push(Slot {
            label,
            destroy: Some(Box::new(destroy)),
        });
        self.live += 1;
        ResourceId(self.slots.len() - 1)
    }

    /// Destroys one resource ahead of the rest. Returns false if it was
    /// already gone.
    pub fn release(&mut self, id: ResourceId, ctx: &C) -> bool {
        match self.slots.get_mut(id.0).and_then(|s| s.destroy.take()) {
            Some(destroy) => {
                destroy(ctx);
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    pub fn label(&self, id: ResourceId) -> Option<&'static str> {
        self.slots.get(id.0).map(|s| s.label)
    }

    /// Number of resources still owned.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Destroys everything, newest first, and resets the id space.
    pub fn destroy_all(&mut self, ctx: &C) {
        let count = self.live;
        while let Some(slot) = self.slots.pop() {
            if let Some(destroy) = slot.destroy {
                destroy(ctx);
            }
        }
        self.live = 0;
        if count > 0 {
            tracing::debug!("{}: destroyed {} resources", self.name, count);
        }
    }
}

impl<C> fmt::Debug for ResourceArena<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceArena")
            .field("name", &self.name)
            .field("live", &self.live)
            .finish()
    }
}

impl<C> Drop for ResourceArena<C> {
    fn drop(&mut self) {
        // No context to destroy with here; owners must call destroy_all first.
        if self.live > 0 {
            let labels: Vec<_> = self
                .slots
                .iter()
                .filter(|s| s.destroy.is_some())
                .map(|s| s.label)
                .collect();
            tracing::warn!("{}: leaking {} resources: {:?}", self.name, self.live, labels);
        }
    }
}

/// A single handle destroyed when the guard leaves scope, unless
/// [`Scoped::into_inner`] hands it on.
pub struct Scoped<'c, C, T: Copy> {
    ctx: &'c C,
    handle: Option<T>,
    destroy: fn(&C, T),
}

impl<'c, C, T: Copy> Scoped<'c, C, T> {
    pub fn new(ctx: &'c C, handle: T, destroy: fn(&C, T)) -> Self {
        Self {
            ctx,
            handle: Some(handle),
            destroy,
        }
    }

    pub fn get(&self) -> T {
        // Only `into_inner` clears the slot, and it consumes the guard.
        match self.handle {
            Some(h) => h,
            None => unreachable!("scoped handle read after hand-off"),
        }
    }

    pub fn into_inner(mut self) -> T {
        let h = self.get();
        self.handle = None;
        h
    }
}

impl<C, T: Copy> Drop for Scoped<'_, C, T> {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            (self.destroy)(self.ctx, h);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    type Log = RefCell<Vec<&'static str>>;

    fn push(label: &'static str) -> impl FnOnce(&Log) {
        move |log: &Log| log.borrow_mut().push(label)
    }

    #[test]
    fn destroys_in_reverse_creation_order() {
        let log = Log::default();
        let mut arena = ResourceArena::new("test");
        arena.adopt("memory", push("memory"));
        arena.adopt("image", push("image"));
        arena.adopt("view", push("view"));
        assert_eq!(arena.len(), 3);
        arena.destroy_all(&log);
        assert_eq!(*log.borrow(), vec!["view", "image", "memory"]);
        assert!(arena.is_empty());
    }

    #[test]
    fn early_release_runs_once_and_keeps_ids_stable() {
        let log = Log::default();
        let mut arena = ResourceArena::new("test");
        let a = arena.adopt("a", push("a"));
        let b = arena.adopt("b", push("b"));
        assert!(arena.release(a, &log));
        assert!(!arena.release(a, &log));
        assert_eq!(arena.label(b), Some("b"));
        assert_eq!(arena.len(), 1);
        arena.destroy_all(&log);
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn arena_is_reusable_after_destroy_all() {
        let log = Log::default();
        let mut arena = ResourceArena::new("test");
        arena.adopt("first", push("first"));
        arena.destroy_all(&log);
        let id = arena.adopt("second", push("second"));
        assert_eq!(id, ResourceId(0));
        arena.destroy_all(&log);
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn scoped_destroys_unless_handed_off() {
        fn record(log: &RefCell<Vec<u32>>, handle: u32) {
            log.borrow_mut().push(handle);
        }
        let log = RefCell::new(Vec::<u32>::new());
        {
            let s = Scoped::new(&log, 7u32, record);
            assert_eq!(s.get(), 7);
        }
        let kept = Scoped::new(&log, 9u32, record).into_inner();
        assert_eq!(kept, 9);
        assert_eq!(*log.borrow(), vec![7]);
    }
}
