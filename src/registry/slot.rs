//! Arena slots: per-participant link bookkeeping.

use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use super::ParticipantId;
use crate::hub::Hub;
use crate::message::{Message, MessageKind};
use crate::participant::Participant;

bitflags! {
    /// Lifecycle state of an arena slot.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub(crate) struct SlotState: u8 {
        /// Slot holds a participant.
        const LIVE = 0b0000_0001;
        /// Participant is being torn down; no new links allowed.
        const GOING_AWAY = 0b0000_0010;
    }
}

/// One side of a link, as stored in either endpoint's list.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct LinkEntry {
    /// The participant on the other end.
    pub peer: ParticipantId,
    /// Serial assigned when the link was created. Both sides store the same value.
    pub serial: u64,
}

/// Closure registered with [`Endpoint::listen_for`](crate::Endpoint::listen_for).
pub(crate) type Callback = Rc<dyn Fn(&Hub, ParticipantId, &dyn Message)>;

/// Function listener stored on the sender side.
#[derive(Clone)]
pub(crate) struct CallTarget {
    pub recipient: ParticipantId,
    pub kind: MessageKind,
    pub serial: u64,
    pub callback: Callback,
}

/// Function listener as seen from the recipient side.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct CallSource {
    pub sender: ParticipantId,
    pub kind: MessageKind,
}

/// Something a teardown pass must clear when its target goes away.
pub(crate) trait ClearSlot {
    /// Forget `target` if this slot currently refers to it.
    fn clear(&self, target: ParticipantId);
}

/// A single arena entry.
///
/// The lists are `None` until first used and reset to `None` when they
/// empty out again, so an unlinked participant costs only the slot itself.
pub(crate) struct Slot {
    pub generation: u32,
    pub state: SlotState,
    pub label: &'static str,
    pub hooks: Option<Weak<dyn Participant>>,
    pub senders: Option<VecDeque<LinkEntry>>,
    pub recipients: Option<VecDeque<LinkEntry>>,
    pub call_targets: Option<VecDeque<CallTarget>>,
    pub call_sources: Option<Vec<CallSource>>,
    pub watchers: Option<Vec<Weak<dyn ClearSlot>>>,
}

impl Slot {
    /// A fresh, vacant slot.
    pub const fn vacant() -> Self {
        Self {
            generation: 0,
            state: SlotState::empty(),
            label: "",
            hooks: None,
            senders: None,
            recipients: None,
            call_targets: None,
            call_sources: None,
            watchers: None,
        }
    }

    /// Whether this slot currently holds a participant, dying or not.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.state.contains(SlotState::LIVE)
    }

    /// Whether this slot holds a participant that is not being torn down.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.state.contains(SlotState::LIVE) && !self.state.contains(SlotState::GOING_AWAY)
    }

    /// Reset to vacant and bump the generation.
    pub fn vacate(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::vacant();
        self.generation = generation;
    }

    pub fn sender_entry(&self, sender: ParticipantId) -> Option<LinkEntry> {
        find_entry(self.senders.as_ref(), sender)
    }

    pub fn recipient_entry(&self, recipient: ParticipantId) -> Option<LinkEntry> {
        find_entry(self.recipients.as_ref(), recipient)
    }
}

fn find_entry(list: Option<&VecDeque<LinkEntry>>, peer: ParticipantId) -> Option<LinkEntry> {
    list.and_then(|entries| entries.iter().find(|e| e.peer == peer).copied())
}

/// Remove `peer` from a lazily-allocated list, dropping the list when it
/// becomes empty. Returns whether anything was removed.
pub(crate) fn remove_entry(list: &mut Option<VecDeque<LinkEntry>>, peer: ParticipantId) -> bool {
    let Some(entries) = list.as_mut() else {
        return false;
    };
    let Some(pos) = entries.iter().position(|e| e.peer == peer) else {
        return false;
    };
    entries.remove(pos);
    if entries.is_empty() {
        *list = None;
    }
    true
}
