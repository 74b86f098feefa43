//! Re-entrant storage for user callbacks.
//!
//! A handler is taken out of its slot while it runs, so it may freely call
//! back into the object that owns the slot, including replacing or clearing
//! the handler itself. After the call the handler is put back unless the
//! slot was cleared or refilled in the meantime.

use std::cell::{Cell, RefCell};

pub(crate) struct HandlerSlot<F: ?Sized> {
    handler: RefCell<Option<Box<F>>>,
    installed: Cell<bool>,
}

impl<F: ?Sized> HandlerSlot<F> {
    pub(crate) fn new() -> Self {
        Self {
            handler: RefCell::new(None),
            installed: Cell::new(false),
        }
    }

    pub(crate) fn set(&self, handler: Box<F>) {
        let old = self.handler.borrow_mut().replace(handler);
        self.installed.set(true);
        drop(old);
    }

    /// Remove the handler, returning it if it was not running.
    pub(crate) fn clear(&self) -> Option<Box<F>> {
        self.installed.set(false);
        self.handler.borrow_mut().take()
    }

    /// True while a handler is installed, including while it is running.
    pub(crate) fn is_set(&self) -> bool {
        self.installed.get()
    }

    /// Run the handler if one is installed and not already running.
    pub(crate) fn invoke<R>(&self, call: impl FnOnce(&mut F) -> R) -> Option<R> {
        let mut handler = self.handler.borrow_mut().take()?;
        let result = call(&mut *handler);
        if self.installed.get() {
            let mut slot = self.handler.borrow_mut();
            if slot.is_none() {
                *slot = Some(handler);
                return Some(result);
            }
        }
        // Cleared or replaced while running; the borrow is released before
        // the old handler's captures are dropped.
        drop(handler);
        Some(result)
    }
}

impl<F: ?Sized> Default for HandlerSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}
