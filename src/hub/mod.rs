//! Hub: the shared registry that participants link through.
//!
//! A [`Hub`] owns the link registry for one component tree. It is a cheap,
//! clonable handle (`Rc` inside) and is deliberately neither `Send` nor
//! `Sync`: everything happens on the thread that runs the event loop.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐ attach(Weak<T>)   ┌──────────────────────────────┐
//!  │ Component  │ ────────────────▶ │ Hub                          │
//!  │ ┌────────┐ │                   │  RefCell<Registry>           │
//!  │ │Endpoint│◀──── ParticipantId ─│   slots[id] = {              │
//!  │ └────────┘ │                   │     hooks: Weak<dyn ..>,     │
//!  └────────────┘                   │     senders, recipients,     │
//!        ▲                          │     call targets, watchers } │
//!        │ receive(hub, sender, msg)└──────────────────────────────┘
//!        └──────────── dispatch pass (no borrow held) ───┘
//! ```
//!
//! The registry borrow is never held while user code runs. Dispatch takes a
//! snapshot of the recipient list, then revalidates each link right before
//! delivering, so hooks may link, unlink and destroy at will.

mod dispatch;
mod endpoint;
mod teardown;

pub use endpoint::Endpoint;

use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::Result;
use crate::message::{Message, MessageKind, MessageType};
use crate::participant::Participant;
use crate::registry::{Callback, ParticipantId, Registry};
use crate::weak_ref::WeakRef;

/// Configuration for a [`Hub`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of nested dispatch passes before the hub assumes a
    /// runaway broadcast cycle and panics.
    pub max_dispatch_depth: usize,
    /// Number of participant slots reserved up front.
    pub initial_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_dispatch_depth: 256,
            initial_capacity: 64,
        }
    }
}

pub(crate) struct HubInner {
    pub(crate) config: HubConfig,
    pub(crate) registry: RefCell<Registry>,
    depth: Cell<usize>,
}

/// Shared registry of participants and their links.
#[derive(Clone)]
pub struct Hub {
    inner: Rc<HubInner>,
}

impl Hub {
    /// Create a hub with default configuration.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    pub fn with_config(config: HubConfig) -> Self {
        debug!(?config, "hub created");
        let registry = Registry::with_capacity(config.initial_capacity);
        Self {
            inner: Rc::new(HubInner {
                config,
                registry: RefCell::new(registry),
                depth: Cell::new(0),
            }),
        }
    }

    /// The configuration this hub was created with.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub(crate) fn registry(&self) -> &RefCell<Registry> {
        &self.inner.registry
    }

    pub(crate) fn downgrade(&self) -> Weak<HubInner> {
        Rc::downgrade(&self.inner)
    }

    /// Whether two handles refer to the same hub.
    pub fn same_hub(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a participant whose hooks live behind `hooks`.
    ///
    /// The hub keeps only the weak pointer. The usual pattern is to build
    /// the component with [`Rc::new_cyclic`] and store the returned
    /// [`Endpoint`] inside it:
    ///
    /// ```
    /// use std::rc::Rc;
    /// use relay::{Endpoint, Hub, Participant};
    ///
    /// struct Table {
    ///     endpoint: Endpoint,
    /// }
    ///
    /// impl Participant for Table {}
    ///
    /// let hub = Hub::new();
    /// let table = Rc::new_cyclic(|me| Table { endpoint: hub.attach(me.clone()) });
    /// assert!(hub.is_alive(table.endpoint.id()));
    /// ```
    pub fn attach<T: Participant + 'static>(&self, hooks: Weak<T>) -> Endpoint {
        let label = type_name::<T>();
        let hooks: Weak<dyn Participant> = hooks;
        let id = self.inner.registry.borrow_mut().insert(label, Some(hooks));
        trace!(participant = %id, label, "participant attached");
        Endpoint::new(self.clone(), id)
    }

    /// Register a participant with no hooks, e.g. a data model that only
    /// ever broadcasts.
    pub fn endpoint(&self, label: &'static str) -> Endpoint {
        let id = self.inner.registry.borrow_mut().insert(label, None);
        trace!(participant = %id, label, "participant attached");
        Endpoint::new(self.clone(), id)
    }

    /// Whether `id` names a live participant (not destroyed, not in teardown).
    pub fn is_alive(&self, id: ParticipantId) -> bool {
        self.inner.registry.borrow().is_alive(id)
    }

    /// Number of registered participants.
    pub fn participant_count(&self) -> usize {
        self.inner.registry.borrow().live_count()
    }

    /// Human-readable description of a participant, for logs.
    pub fn describe(&self, id: ParticipantId) -> String {
        match self.inner.registry.borrow().label(id) {
            Some(label) => format!("{label} ({id})"),
            None => format!("<destroyed> ({id})"),
        }
    }

    /// Nesting depth of the dispatch pass currently running (0 when idle).
    pub fn dispatch_depth(&self) -> usize {
        self.inner.depth.get()
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Make `recipient` listen to `sender`. Does nothing if it already does.
    ///
    /// The recipient is prepended to the sender's list, so it will not see a
    /// broadcast that is already in progress.
    ///
    /// # Errors
    ///
    /// [`HubError::Stale`](crate::HubError::Stale) if either handle is dead,
    /// [`HubError::GoingAway`](crate::HubError::GoingAway) if either side is
    /// being torn down.
    pub fn listen_to(&self, recipient: ParticipantId, sender: ParticipantId) -> Result<()> {
        let linked = self.inner.registry.borrow_mut().link(sender, recipient)?;
        if linked {
            trace!(%sender, %recipient, "linked");
        }
        Ok(())
    }

    /// Stop `recipient` listening to `sender`. Returns whether a link was removed.
    pub fn stop_listening(&self, recipient: ParticipantId, sender: ParticipantId) -> bool {
        let removed = self.inner.registry.borrow_mut().unlink(sender, recipient);
        if removed {
            trace!(%sender, %recipient, "unlinked");
        }
        removed
    }

    /// Call `f` whenever `sender` broadcasts a message of type `M`.
    ///
    /// The closure is owned by `sender`'s registry slot and released when
    /// either participant is destroyed. Capture weak pointers, not `Rc`s,
    /// or the captured component can never be dropped. Registering again
    /// for the same sender and type replaces the previous closure.
    ///
    /// # Errors
    ///
    /// Same as [`listen_to`](Self::listen_to).
    pub fn listen_for<M, F>(&self, recipient: ParticipantId, sender: ParticipantId, f: F) -> Result<()>
    where
        M: MessageType,
        F: Fn(&Self, ParticipantId, &M) + 'static,
    {
        let callback: Callback = Rc::new(move |hub: &Self, from: ParticipantId, message: &dyn Message| {
            if let Some(message) = message.downcast_ref::<M>() {
                f(hub, from, message);
            }
        });
        let replaced = self
            .inner
            .registry
            .borrow_mut()
            .register_call(sender, recipient, M::KIND, callback)?;
        trace!(%sender, %recipient, kind = %M::KIND, replaced = replaced.is_some(), "function listener registered");
        drop(replaced);
        Ok(())
    }

    /// Remove a closure registered with [`listen_for`](Self::listen_for).
    pub fn stop_listening_for(
        &self,
        recipient: ParticipantId,
        sender: ParticipantId,
        kind: MessageKind,
    ) -> bool {
        let removed = self
            .inner
            .registry
            .borrow_mut()
            .unregister_call(sender, recipient, kind);
        removed.is_some()
    }

    /// Track `target` without listening to it.
    ///
    /// `referent` must be the object that `target` was attached for. The
    /// returned [`WeakRef`] yields it until `target` is destroyed, at which
    /// point it is cleared before any going-away hook runs.
    ///
    /// # Errors
    ///
    /// Fails if `target` is dead or going away.
    pub fn watch_for_destruction<T: ?Sized + 'static>(
        &self,
        target: ParticipantId,
        referent: &Rc<T>,
    ) -> Result<WeakRef<T>> {
        WeakRef::watching(self, target, referent)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether `id` listens to anybody.
    pub fn has_senders(&self, id: ParticipantId) -> bool {
        self.sender_count(id) > 0
    }

    /// Number of participants `id` listens to.
    pub fn sender_count(&self, id: ParticipantId) -> usize {
        self.inner.registry.borrow().sender_count(id)
    }

    /// Whether anybody listens to `id`.
    pub fn has_recipients(&self, id: ParticipantId) -> bool {
        self.recipient_count(id) > 0
    }

    /// Number of participants listening to `id`.
    pub fn recipient_count(&self, id: ParticipantId) -> usize {
        self.inner.registry.borrow().recipient_count(id)
    }

    /// Participants `id` listens to, most recent first.
    pub fn senders(&self, id: ParticipantId) -> Vec<ParticipantId> {
        self.inner
            .registry
            .borrow()
            .senders(id)
            .into_iter()
            .map(|entry| entry.peer)
            .collect()
    }

    /// Participants listening to `id`, in dispatch order.
    pub fn recipients(&self, id: ParticipantId) -> Vec<ParticipantId> {
        self.inner
            .registry
            .borrow()
            .recipients(id)
            .into_iter()
            .map(|entry| entry.peer)
            .collect()
    }

    /// Whether `recipient` listens to `sender`.
    pub fn is_listening(&self, recipient: ParticipantId, sender: ParticipantId) -> bool {
        self.inner.registry.borrow().is_listening(recipient, sender)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let participants = self
            .inner
            .registry
            .try_borrow()
            .map(|registry| registry.live_count())
            .ok();
        f.debug_struct("Hub")
            .field("participants", &participants)
            .field("dispatch_depth", &self.inner.depth.get())
            .finish()
    }
}
