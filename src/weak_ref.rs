//! Weak references cleared by participant teardown.
//!
//! Many components keep a non-owning pointer to another participant purely
//! for bookkeeping: a selection iterator remembers its table, a menu item
//! remembers its director. They do not need messages, only to forget the
//! pointer once the other side is destroyed. A [`WeakRef`] does exactly
//! that without a link or any hooks.
//!
//! Unlike a bare [`std::rc::Weak`], a `WeakRef` is cleared when the
//! participant is destroyed through the hub, even if somebody still holds
//! an `Rc` to the object.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::hub::{Hub, HubInner};
use crate::registry::{ClearSlot, ParticipantId};

struct Watched<T: ?Sized> {
    target: ParticipantId,
    referent: Weak<T>,
}

struct WatchCell<T: ?Sized> {
    slot: RefCell<Option<Watched<T>>>,
}

impl<T: ?Sized> ClearSlot for WatchCell<T> {
    fn clear(&self, target: ParticipantId) {
        let mut slot = self.slot.borrow_mut();
        if slot.as_ref().is_some_and(|w| w.target == target) {
            *slot = None;
        }
    }
}

/// Non-owning reference to a participant, cleared on its destruction.
pub struct WeakRef<T: ?Sized + 'static> {
    cell: Rc<WatchCell<T>>,
    hub: Weak<HubInner>,
}

impl<T: ?Sized + 'static> WeakRef<T> {
    /// An empty reference that watches nothing.
    pub fn new() -> Self {
        Self {
            cell: Rc::new(WatchCell {
                slot: RefCell::new(None),
            }),
            hub: Weak::new(),
        }
    }

    pub(crate) fn watching(hub: &Hub, target: ParticipantId, referent: &Rc<T>) -> Result<Self> {
        let cell = Rc::new(WatchCell {
            slot: RefCell::new(Some(Watched {
                target,
                referent: Rc::downgrade(referent),
            })),
        });
        let watcher: Weak<dyn ClearSlot> = Rc::downgrade(&cell) as Weak<dyn ClearSlot>;
        hub.registry().borrow_mut().add_watcher(target, watcher)?;
        Ok(Self {
            cell,
            hub: hub.downgrade(),
        })
    }

    /// The referenced object, unless its participant was destroyed or the
    /// object itself was dropped.
    pub fn get(&self) -> Option<Rc<T>> {
        self.cell
            .slot
            .borrow()
            .as_ref()
            .and_then(|w| w.referent.upgrade())
    }

    /// Handle of the watched participant, until it is destroyed.
    pub fn target(&self) -> Option<ParticipantId> {
        self.cell.slot.borrow().as_ref().map(|w| w.target)
    }

    /// Whether the reference has been cleared (or never set).
    pub fn is_empty(&self) -> bool {
        self.cell.slot.borrow().is_none()
    }

    /// Stop watching and clear the reference.
    pub fn forget(&self) {
        let Some(watched) = self.cell.slot.borrow_mut().take() else {
            return;
        };
        let Some(inner) = self.hub.upgrade() else {
            return;
        };
        let watcher: Weak<dyn ClearSlot> = Rc::downgrade(&self.cell) as Weak<dyn ClearSlot>;
        // The registry may be mid-teardown of this very participant.
        let Ok(mut registry) = inner.registry.try_borrow_mut() else {
            return;
        };
        registry.remove_watcher(watched.target, &watcher);
    }
}

impl<T: ?Sized + 'static> Default for WeakRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> Drop for WeakRef<T> {
    fn drop(&mut self) {
        self.forget();
    }
}

impl<T: ?Sized + 'static> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("target", &self.target())
            .finish()
    }
}
