//! Lifecycle teardown: unlink everything, then notify.

use tracing::{debug, trace};

use super::Hub;
use crate::registry::{Detached, ParticipantId};

/// Releases the slot when teardown ends, including by a going-away hook
/// unwinding. Recipients not yet notified at that point are not told.
struct ReleaseGuard<'a> {
    hub: &'a Hub,
    id: ParticipantId,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.hub.inner.registry.try_borrow_mut() {
            let hooks = registry.release(self.id);
            drop(registry);
            drop(hooks);
        }
    }
}

impl Hub {
    /// Destroy a participant.
    ///
    /// Runs in two phases. First every link, function listener and watcher
    /// involving `id` is removed in both directions and every [`WeakRef`]
    /// watching it is cleared. Then each former recipient that is still
    /// alive gets [`receive_going_away`], most recently registered first.
    /// Senders are not told. Each going-away hook therefore sees a registry
    /// in which `id` is already fully unlinked and no longer alive; `id`
    /// cannot gain new links while the hooks run.
    ///
    /// Dropping an [`Endpoint`](crate::Endpoint) calls this. Returns `false`
    /// if `id` was already dead or already being destroyed.
    ///
    /// If a going-away hook panics, the slot is still released as the panic
    /// unwinds, but the remaining recipients are not notified.
    ///
    /// [`WeakRef`]: crate::WeakRef
    /// [`receive_going_away`]: crate::Participant::receive_going_away
    pub fn destroy(&self, id: ParticipantId) -> bool {
        let detached = {
            let mut registry = self.inner.registry.borrow_mut();
            if !registry.begin_teardown(id) {
                return false;
            }
            registry.detach_all(id)
        };
        let _release = ReleaseGuard { hub: self, id };

        let Detached {
            recipients,
            senders,
            callbacks,
            watchers,
        } = detached;
        debug!(
            participant = %id,
            recipients = recipients.len(),
            senders = senders.len(),
            function_listeners = callbacks.len(),
            "tearing down"
        );
        drop(callbacks);

        for watcher in watchers {
            if let Some(watcher) = watcher.upgrade() {
                watcher.clear(id);
            }
        }

        for recipient in recipients {
            let hooks = self.inner.registry.borrow().hooks(recipient);
            if let Some(hooks) = hooks {
                trace!(participant = %id, %recipient, "going away");
                hooks.receive_going_away(self, id);
            }
        }
        true
    }
}
