//! Link registry: generation-checked arena of participants and their links.
//!
//! The registry is pure bookkeeping. It never calls user code, so the hub
//! can hold a `RefCell` borrow of it for the duration of any method here and
//! release the borrow before invoking hooks. Anything that could run user
//! code when dropped (closures registered with `listen_for`) is handed back
//! to the caller instead of being dropped in place.

mod id;
mod slot;

use std::collections::VecDeque;
use std::rc::{Rc, Weak};

pub use id::ParticipantId;
pub(crate) use slot::{Callback, CallSource, CallTarget, ClearSlot, LinkEntry};

use slot::{remove_entry, Slot, SlotState};

use crate::error::{HubError, Result};
use crate::message::MessageKind;
use crate::participant::Participant;

/// Everything removed from a participant at the start of teardown.
#[derive(Default)]
pub(crate) struct Detached {
    /// Former recipients, most recently registered first.
    pub recipients: Vec<ParticipantId>,
    /// Former senders.
    pub senders: Vec<ParticipantId>,
    /// Function listeners removed in either direction.
    pub callbacks: Vec<Callback>,
    /// Weak-reference slots watching the participant.
    pub watchers: Vec<Weak<dyn ClearSlot>>,
}

/// Arena of participant slots.
pub(crate) struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_serial: u64,
    live: usize,
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            next_serial: 0,
            live: 0,
        }
    }

    /// Allocate a slot for a new participant.
    pub fn insert(
        &mut self,
        label: &'static str,
        hooks: Option<Weak<dyn Participant>>,
    ) -> ParticipantId {
        let index = if let Some(index) = self.free.pop() {
            index
        } else {
            self.slots.push(Slot::vacant());
            u32::try_from(self.slots.len() - 1).unwrap_or_else(|_| {
                panic!("participant arena exceeded {} slots", u32::MAX)
            })
        };

        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::LIVE;
        slot.label = label;
        slot.hooks = hooks;
        self.live += 1;
        ParticipantId::new(index, slot.generation)
    }

    fn slot(&self, id: ParticipantId) -> Option<&Slot> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation() && slot.is_occupied())
    }

    fn slot_mut(&mut self, id: ParticipantId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation() && slot.is_occupied())
    }

    fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    fn check_linkable(&self, id: ParticipantId) -> Result<()> {
        match self.slot(id) {
            None => Err(HubError::Stale(id)),
            Some(slot) if !slot.is_alive() => Err(HubError::GoingAway(id)),
            Some(_) => Ok(()),
        }
    }

    /// Number of participants currently registered, including ones in teardown.
    pub const fn live_count(&self) -> usize {
        self.live
    }

    pub fn is_alive(&self, id: ParticipantId) -> bool {
        self.slot(id).is_some_and(Slot::is_alive)
    }

    pub fn label(&self, id: ParticipantId) -> Option<&'static str> {
        self.slot(id).map(|slot| slot.label)
    }

    /// Upgrade the hooks of a live participant.
    pub fn hooks(&self, id: ParticipantId) -> Option<Rc<dyn Participant>> {
        self.slot(id)
            .filter(|slot| slot.is_alive())
            .and_then(|slot| slot.hooks.as_ref())
            .and_then(Weak::upgrade)
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Link `recipient` to `sender`. Returns `Ok(false)` if already linked.
    pub fn link(&mut self, sender: ParticipantId, recipient: ParticipantId) -> Result<bool> {
        self.check_linkable(sender)?;
        self.check_linkable(recipient)?;
        if self.link_serial(sender, recipient).is_some() {
            return Ok(false);
        }

        let serial = self.next_serial();
        if let Some(slot) = self.slot_mut(sender) {
            slot.recipients
                .get_or_insert_with(VecDeque::new)
                .push_front(LinkEntry { peer: recipient, serial });
        }
        if let Some(slot) = self.slot_mut(recipient) {
            slot.senders
                .get_or_insert_with(VecDeque::new)
                .push_front(LinkEntry { peer: sender, serial });
        }
        Ok(true)
    }

    /// Remove the link, if any. Returns whether a link was removed.
    pub fn unlink(&mut self, sender: ParticipantId, recipient: ParticipantId) -> bool {
        let removed = self
            .slot_mut(recipient)
            .is_some_and(|slot| remove_entry(&mut slot.senders, sender));
        if removed {
            if let Some(slot) = self.slot_mut(sender) {
                remove_entry(&mut slot.recipients, recipient);
            }
        }
        removed
    }

    /// Serial of the (sender, recipient) link, if it exists.
    pub fn link_serial(&self, sender: ParticipantId, recipient: ParticipantId) -> Option<u64> {
        self.slot(sender)?
            .recipient_entry(recipient)
            .map(|entry| entry.serial)
    }

    pub fn recipients(&self, id: ParticipantId) -> Vec<LinkEntry> {
        self.slot(id)
            .and_then(|slot| slot.recipients.as_ref())
            .map(|list| list.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn senders(&self, id: ParticipantId) -> Vec<LinkEntry> {
        self.slot(id)
            .and_then(|slot| slot.senders.as_ref())
            .map(|list| list.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn recipient_count(&self, id: ParticipantId) -> usize {
        self.slot(id)
            .and_then(|slot| slot.recipients.as_ref())
            .map_or(0, VecDeque::len)
    }

    pub fn sender_count(&self, id: ParticipantId) -> usize {
        self.slot(id)
            .and_then(|slot| slot.senders.as_ref())
            .map_or(0, VecDeque::len)
    }

    pub fn is_listening(&self, recipient: ParticipantId, sender: ParticipantId) -> bool {
        self.slot(recipient)
            .is_some_and(|slot| slot.sender_entry(sender).is_some())
    }

    // ------------------------------------------------------------------
    // Function listeners
    // ------------------------------------------------------------------

    /// Register `callback` for messages of `kind` from `sender`.
    ///
    /// Replaces any callback the recipient already had for that pair and
    /// returns the old one so the caller can drop it outside the borrow.
    pub fn register_call(
        &mut self,
        sender: ParticipantId,
        recipient: ParticipantId,
        kind: MessageKind,
        callback: Callback,
    ) -> Result<Option<Callback>> {
        self.check_linkable(sender)?;
        self.check_linkable(recipient)?;

        let serial = self.next_serial();
        let Some(slot) = self.slot_mut(sender) else {
            return Err(HubError::Stale(sender));
        };
        let targets = slot.call_targets.get_or_insert_with(VecDeque::new);
        if let Some(existing) = targets
            .iter_mut()
            .find(|t| t.recipient == recipient && t.kind == kind)
        {
            existing.serial = serial;
            return Ok(Some(std::mem::replace(&mut existing.callback, callback)));
        }
        targets.push_front(CallTarget {
            recipient,
            kind,
            serial,
            callback,
        });

        if let Some(slot) = self.slot_mut(recipient) {
            slot.call_sources
                .get_or_insert_with(Vec::new)
                .push(CallSource { sender, kind });
        }
        Ok(None)
    }

    /// Remove a function listener. Returns the removed callback.
    pub fn unregister_call(
        &mut self,
        sender: ParticipantId,
        recipient: ParticipantId,
        kind: MessageKind,
    ) -> Option<Callback> {
        if let Some(slot) = self.slot_mut(recipient) {
            remove_source(&mut slot.call_sources, sender, kind);
        }
        self.slot_mut(sender)
            .and_then(|slot| remove_target(&mut slot.call_targets, recipient, kind))
    }

    /// Function listeners on `sender` for `kind`, newest first.
    pub fn call_targets(&self, sender: ParticipantId, kind: MessageKind) -> Vec<CallTarget> {
        self.slot(sender)
            .and_then(|slot| slot.call_targets.as_ref())
            .map(|targets| targets.iter().filter(|t| t.kind == kind).cloned().collect())
            .unwrap_or_default()
    }

    /// Serial of a function listener, if it is still registered.
    pub fn call_serial(
        &self,
        sender: ParticipantId,
        recipient: ParticipantId,
        kind: MessageKind,
    ) -> Option<u64> {
        self.slot(sender)?
            .call_targets
            .as_ref()?
            .iter()
            .find(|t| t.recipient == recipient && t.kind == kind)
            .map(|t| t.serial)
    }

    pub fn call_target_count(&self, sender: ParticipantId) -> usize {
        self.slot(sender)
            .and_then(|slot| slot.call_targets.as_ref())
            .map_or(0, VecDeque::len)
    }

    // ------------------------------------------------------------------
    // Weak-reference watchers
    // ------------------------------------------------------------------

    pub fn add_watcher(&mut self, target: ParticipantId, watcher: Weak<dyn ClearSlot>) -> Result<()> {
        self.check_linkable(target)?;
        if let Some(slot) = self.slot_mut(target) {
            let watchers = slot.watchers.get_or_insert_with(Vec::new);
            watchers.retain(|w| w.strong_count() > 0);
            watchers.push(watcher);
        }
        Ok(())
    }

    pub fn remove_watcher(&mut self, target: ParticipantId, watcher: &Weak<dyn ClearSlot>) -> bool {
        let Some(slot) = self.slot_mut(target) else {
            return false;
        };
        let Some(watchers) = slot.watchers.as_mut() else {
            return false;
        };
        let before = watchers.len();
        watchers.retain(|w| !Weak::ptr_eq(w, watcher) && w.strong_count() > 0);
        let removed = watchers.len() < before;
        if watchers.is_empty() {
            slot.watchers = None;
        }
        removed
    }

    pub fn watcher_count(&self, target: ParticipantId) -> usize {
        self.slot(target)
            .and_then(|slot| slot.watchers.as_ref())
            .map_or(0, |watchers| watchers.iter().filter(|w| w.strong_count() > 0).count())
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Mark a live participant as going away. Returns `false` if it is
    /// already dead or already in teardown.
    pub fn begin_teardown(&mut self, id: ParticipantId) -> bool {
        match self.slot_mut(id) {
            Some(slot) if slot.is_alive() => {
                slot.state.insert(SlotState::GOING_AWAY);
                true
            }
            _ => false,
        }
    }

    /// Remove every link, function listener and watcher involving `id`.
    pub fn detach_all(&mut self, id: ParticipantId) -> Detached {
        let Some(slot) = self.slot_mut(id) else {
            return Detached::default();
        };
        let recipients = slot.recipients.take().unwrap_or_default();
        let senders = slot.senders.take().unwrap_or_default();
        let targets = slot.call_targets.take().unwrap_or_default();
        let sources = slot.call_sources.take().unwrap_or_default();
        let watchers = slot.watchers.take().unwrap_or_default();

        for entry in &recipients {
            if let Some(peer) = self.slot_mut(entry.peer) {
                remove_entry(&mut peer.senders, id);
            }
        }
        for entry in &senders {
            if let Some(peer) = self.slot_mut(entry.peer) {
                remove_entry(&mut peer.recipients, id);
            }
        }

        let mut callbacks = Vec::with_capacity(targets.len() + sources.len());
        for target in targets {
            if let Some(peer) = self.slot_mut(target.recipient) {
                remove_source(&mut peer.call_sources, id, target.kind);
            }
            callbacks.push(target.callback);
        }
        for source in sources {
            if let Some(peer) = self.slot_mut(source.sender) {
                callbacks.extend(remove_target(&mut peer.call_targets, id, source.kind));
            }
        }

        Detached {
            recipients: recipients.into_iter().map(|e| e.peer).collect(),
            senders: senders.into_iter().map(|e| e.peer).collect(),
            callbacks,
            watchers,
        }
    }

    /// Free the slot and invalidate every outstanding handle to it.
    ///
    /// Returns the hooks pointer so it is dropped outside the borrow.
    pub fn release(&mut self, id: ParticipantId) -> Option<Weak<dyn Participant>> {
        let slot = self.slot_mut(id)?;
        let hooks = slot.hooks.take();
        slot.vacate();
        self.free.push(id.index());
        self.live -= 1;
        hooks
    }
}

fn remove_source(sources: &mut Option<Vec<CallSource>>, sender: ParticipantId, kind: MessageKind) {
    if let Some(list) = sources.as_mut() {
        list.retain(|s| !(s.sender == sender && s.kind == kind));
        if list.is_empty() {
            *sources = None;
        }
    }
}

fn remove_target(
    targets: &mut Option<VecDeque<CallTarget>>,
    recipient: ParticipantId,
    kind: MessageKind,
) -> Option<Callback> {
    let list = targets.as_mut()?;
    let pos = list
        .iter()
        .position(|t| t.recipient == recipient && t.kind == kind)?;
    let removed = list.remove(pos).map(|t| t.callback);
    if list.is_empty() {
        *targets = None;
    }
    removed
}
