//! Endpoint: the registry capability a component embeds.

use std::fmt;

use super::Hub;
use crate::error::Result;
use crate::message::{Message, MessageKind, MessageType};
use crate::registry::ParticipantId;

/// A component's membership in a [`Hub`].
///
/// Owning an `Endpoint` is what makes a component a participant. All
/// operations act on behalf of the endpoint's own participant. Dropping it
/// destroys the participant: links are removed, watchers cleared and
/// listeners told that it went away.
pub struct Endpoint {
    hub: Hub,
    id: ParticipantId,
}

impl Endpoint {
    pub(crate) fn new(hub: Hub, id: ParticipantId) -> Self {
        Self { hub, id }
    }

    /// This participant's handle.
    #[inline]
    pub const fn id(&self) -> ParticipantId {
        self.id
    }

    /// The hub this endpoint belongs to.
    #[inline]
    pub const fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Whether the participant has not been destroyed yet.
    pub fn is_alive(&self) -> bool {
        self.hub.is_alive(self.id)
    }

    /// Destroy the participant now rather than on drop.
    pub fn destroy(&self) -> bool {
        self.hub.destroy(self.id)
    }

    /// Start listening to `sender`. See [`Hub::listen_to`].
    ///
    /// # Errors
    ///
    /// Fails if either participant is dead or going away.
    pub fn listen_to(&self, sender: ParticipantId) -> Result<()> {
        self.hub.listen_to(self.id, sender)
    }

    /// Stop listening to `sender`. Returns whether a link was removed.
    pub fn stop_listening(&self, sender: ParticipantId) -> bool {
        self.hub.stop_listening(self.id, sender)
    }

    /// Run `f` for every `M` broadcast by `sender`. See [`Hub::listen_for`].
    ///
    /// # Errors
    ///
    /// Fails if either participant is dead or going away.
    pub fn listen_for<M, F>(&self, sender: ParticipantId, f: F) -> Result<()>
    where
        M: MessageType,
        F: Fn(&Hub, ParticipantId, &M) + 'static,
    {
        self.hub.listen_for(self.id, sender, f)
    }

    /// Remove a closure registered with [`listen_for`](Self::listen_for).
    pub fn stop_listening_for(&self, sender: ParticipantId, kind: MessageKind) -> bool {
        self.hub.stop_listening_for(self.id, sender, kind)
    }

    /// Broadcast to every listener. See [`Hub::broadcast`].
    pub fn broadcast(&self, message: &dyn Message) -> usize {
        self.hub.broadcast(self.id, message)
    }

    /// Broadcast a feedback message. See [`Hub::broadcast_with_feedback`].
    pub fn broadcast_with_feedback(&self, message: &mut dyn Message) -> usize {
        self.hub.broadcast_with_feedback(self.id, message)
    }

    /// Deliver to one participant without a link.
    pub fn send(&self, recipient: ParticipantId, message: &dyn Message) -> bool {
        self.hub.send(self.id, recipient, message)
    }

    /// Deliver a feedback message to one participant without a link.
    pub fn send_with_feedback(&self, recipient: ParticipantId, message: &mut dyn Message) -> bool {
        self.hub.send_with_feedback(self.id, recipient, message)
    }

    /// Whether this participant listens to anybody.
    pub fn has_senders(&self) -> bool {
        self.hub.has_senders(self.id)
    }

    /// Number of participants this one listens to.
    pub fn sender_count(&self) -> usize {
        self.hub.sender_count(self.id)
    }

    /// Whether anybody listens to this participant.
    pub fn has_recipients(&self) -> bool {
        self.hub.has_recipients(self.id)
    }

    /// Number of participants listening to this one.
    pub fn recipient_count(&self) -> usize {
        self.hub.recipient_count(self.id)
    }

    /// Participants this one listens to.
    pub fn senders(&self) -> Vec<ParticipantId> {
        self.hub.senders(self.id)
    }

    /// Participants listening to this one, in dispatch order.
    pub fn recipients(&self) -> Vec<ParticipantId> {
        self.hub.recipients(self.id)
    }

    /// Whether this participant listens to `sender`.
    pub fn is_listening_to(&self, sender: ParticipantId) -> bool {
        self.hub.is_listening(self.id, sender)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.hub.destroy(self.id);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl From<&Endpoint> for ParticipantId {
    fn from(endpoint: &Endpoint) -> Self {
        endpoint.id
    }
}
