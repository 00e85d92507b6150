//! The receive hooks a participant may override.

use crate::hub::Hub;
use crate::message::Message;
use crate::registry::ParticipantId;

/// Hooks invoked by the [`Hub`] on a participant.
///
/// Every method defaults to doing nothing, so a pure sender can implement
/// the trait with an empty `impl` block. Hooks take `&self`: a participant
/// may be re-entered (a hook can broadcast, and the broadcast can come back
/// around), so mutable state belongs in `Cell`/`RefCell` fields.
///
/// The `hub` argument is the hub doing the delivery. Hooks may freely link,
/// unlink, broadcast, or destroy participants through it, including the
/// sender and the participant itself.
pub trait Participant {
    /// A message broadcast by `sender`.
    fn receive(&self, hub: &Hub, sender: ParticipantId, message: &dyn Message) {
        let _ = (hub, sender, message);
    }

    /// A feedback message broadcast by `sender`. Write results into the
    /// message; recipients later in the pass see what earlier ones wrote.
    fn receive_with_feedback(&self, hub: &Hub, sender: ParticipantId, message: &mut dyn Message) {
        let _ = (hub, sender, message);
    }

    /// `sender` has been destroyed.
    ///
    /// The sender's links are already gone and its handle is no longer
    /// alive. Keep this to simple state updates such as forgetting a stored
    /// handle; it may run while the owner of `sender` is being dropped.
    fn receive_going_away(&self, hub: &Hub, sender: ParticipantId) {
        let _ = (hub, sender);
    }
}
