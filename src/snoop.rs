//! Snooper: a participant that logs everything a sender broadcasts.
//!
//! Attach one to a misbehaving component while debugging:
//!
//! ```
//! use relay::{Hub, Snooper};
//!
//! let hub = Hub::new();
//! let window = hub.endpoint("window");
//! let snooper = Snooper::attach(&hub, window.id()).unwrap();
//! assert_eq!(snooper.seen(), 0);
//! ```

use std::cell::Cell;
use std::rc::Rc;

use tracing::{info, warn};

use crate::error::Result;
use crate::hub::{Endpoint, Hub};
use crate::message::Message;
use crate::participant::Participant;
use crate::registry::ParticipantId;

/// Logs every message received from the participant it watches.
#[derive(Debug)]
pub struct Snooper {
    endpoint: Endpoint,
    target: Cell<Option<ParticipantId>>,
    seen: Cell<usize>,
}

impl Snooper {
    /// Start snooping on `target`.
    ///
    /// # Errors
    ///
    /// Fails if `target` is dead or going away.
    pub fn attach(hub: &Hub, target: ParticipantId) -> Result<Rc<Self>> {
        let snooper = Rc::new_cyclic(|me| Self {
            endpoint: hub.attach(me.clone()),
            target: Cell::new(Some(target)),
            seen: Cell::new(0),
        });
        snooper.endpoint.listen_to(target)?;
        Ok(snooper)
    }

    /// The watched participant, until it goes away.
    pub fn target(&self) -> Option<ParticipantId> {
        self.target.get()
    }

    /// Number of messages observed so far.
    pub fn seen(&self) -> usize {
        self.seen.get()
    }

    /// The snooper's own endpoint.
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Participant for Snooper {
    fn receive(&self, hub: &Hub, sender: ParticipantId, message: &dyn Message) {
        self.seen.set(self.seen.get() + 1);
        info!(sender = %hub.describe(sender), kind = %message.kind(), ?message, "broadcast");
    }

    fn receive_with_feedback(&self, hub: &Hub, sender: ParticipantId, message: &mut dyn Message) {
        self.seen.set(self.seen.get() + 1);
        info!(sender = %hub.describe(sender), kind = %message.kind(), ?message, "feedback broadcast");
    }

    fn receive_going_away(&self, hub: &Hub, sender: ParticipantId) {
        warn!(sender = %hub.describe(sender), "went away");
        if self.target.get() == Some(sender) {
            self.target.set(None);
        }
    }
}
