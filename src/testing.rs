//! Test helpers for components that broadcast.
//!
//! [`BroadcastTester`] listens to a component and checks that it broadcasts
//! exactly the expected kinds, in order. Outside this crate it needs the
//! `test-utils` feature.
//!
//! ```rust
//! # #[cfg(feature = "test-utils")]
//! # fn main() {
//! use relay::{message_kind, Hub, MessageType};
//! use relay::testing::BroadcastTester;
//!
//! #[derive(Debug)]
//! struct TextSet;
//! message_kind!(TextSet, "TextSet::Editor");
//!
//! let hub = Hub::new();
//! let editor = hub.endpoint("editor");
//! let tester = BroadcastTester::attach(&hub, editor.id());
//!
//! tester.expect(TextSet::KIND);
//! editor.broadcast(&TextSet);
//! tester.assert_done();
//! # }
//! # #[cfg(not(feature = "test-utils"))]
//! # fn main() {}
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::thread;

use crate::hub::{Endpoint, Hub};
use crate::message::{Message, MessageKind};
use crate::participant::Participant;
use crate::registry::ParticipantId;

/// Asserts the sequence of messages a sender broadcasts.
///
/// Every delivery must match the next expectation, otherwise the receive
/// hook panics. Dropping the tester with expectations left over panics too.
#[derive(Debug)]
pub struct BroadcastTester {
    endpoint: Endpoint,
    expected: RefCell<VecDeque<MessageKind>>,
    received: RefCell<Vec<MessageKind>>,
    expect_going_away: Cell<bool>,
    went_away: Cell<bool>,
}

impl BroadcastTester {
    /// Start listening to `sender`.
    ///
    /// # Panics
    ///
    /// Panics if `sender` is not a live participant.
    pub fn attach(hub: &Hub, sender: ParticipantId) -> Rc<Self> {
        let tester = Rc::new_cyclic(|me| Self {
            endpoint: hub.attach(me.clone()),
            expected: RefCell::new(VecDeque::new()),
            received: RefCell::new(Vec::new()),
            expect_going_away: Cell::new(false),
            went_away: Cell::new(false),
        });
        if let Err(err) = tester.endpoint.listen_to(sender) {
            panic!("cannot test broadcasts of {sender}: {err}");
        }
        tester
    }

    /// Expect the next broadcast to be of `kind`.
    pub fn expect(&self, kind: MessageKind) {
        self.expected.borrow_mut().push_back(kind);
    }

    /// Expect the sender to be destroyed.
    pub fn expect_going_away(&self) {
        self.expect_going_away.set(true);
    }

    /// Kinds received so far, in order.
    pub fn received(&self) -> Vec<MessageKind> {
        self.received.borrow().clone()
    }

    /// Number of expectations not yet met.
    pub fn pending(&self) -> usize {
        self.expected.borrow().len() + usize::from(self.expect_going_away.get() && !self.went_away.get())
    }

    /// Panic unless every expectation has been met.
    ///
    /// # Panics
    ///
    /// Panics if expected broadcasts or an expected going-away never arrived.
    pub fn assert_done(&self) {
        let missing: Vec<_> = self.expected.borrow().iter().copied().collect();
        assert!(missing.is_empty(), "expected broadcasts never arrived: {missing:?}");
        assert!(
            !self.expect_going_away.get() || self.went_away.get(),
            "expected the sender to go away"
        );
    }

    fn check(&self, hub: &Hub, sender: ParticipantId, kind: MessageKind) {
        self.received.borrow_mut().push(kind);
        let next = self.expected.borrow_mut().pop_front();
        match next {
            Some(expected) => assert_eq!(
                kind,
                expected,
                "{} broadcast {kind}, expected {expected}",
                hub.describe(sender)
            ),
            None => panic!("{} broadcast unexpected {kind}", hub.describe(sender)),
        }
    }
}

impl Participant for BroadcastTester {
    fn receive(&self, hub: &Hub, sender: ParticipantId, message: &dyn Message) {
        self.check(hub, sender, message.kind());
    }

    fn receive_with_feedback(&self, hub: &Hub, sender: ParticipantId, message: &mut dyn Message) {
        self.check(hub, sender, message.kind());
    }

    fn receive_going_away(&self, hub: &Hub, sender: ParticipantId) {
        assert!(
            self.expect_going_away.get(),
            "{} went away unexpectedly",
            hub.describe(sender)
        );
        self.went_away.set(true);
    }
}

impl Drop for BroadcastTester {
    fn drop(&mut self) {
        if !thread::panicking() {
            self.assert_done();
        }
    }
}
