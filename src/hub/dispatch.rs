//! Dispatch engine: broadcast passes over a snapshot of the recipient list.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{trace, trace_span};

use super::Hub;
use crate::message::Message;
use crate::participant::Participant;
use crate::registry::{CallTarget, LinkEntry, ParticipantId};

/// Restores the dispatch depth when a pass ends, including by unwinding.
struct PassGuard<'a> {
    depth: &'a Cell<usize>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

impl Hub {
    fn enter_pass(&self) -> PassGuard<'_> {
        let depth = self.inner.depth.get() + 1;
        let limit = self.inner.config.max_dispatch_depth;
        assert!(
            depth <= limit,
            "dispatch passes nested {depth} deep (limit {limit}); a broadcast cycle never settles"
        );
        self.inner.depth.set(depth);
        PassGuard {
            depth: &self.inner.depth,
        }
    }

    /// Hooks of the recipient in `entry`, provided the exact link from the
    /// snapshot still exists. A link that was removed, or removed and made
    /// again, during the pass no longer matches.
    fn linked_hooks(&self, sender: ParticipantId, entry: LinkEntry) -> Option<Rc<dyn Participant>> {
        let registry = self.inner.registry.borrow();
        if registry.link_serial(sender, entry.peer) != Some(entry.serial) {
            return None;
        }
        registry.hooks(entry.peer)
    }

    fn call_still_registered(&self, sender: ParticipantId, target: &CallTarget) -> bool {
        self.inner
            .registry
            .borrow()
            .call_serial(sender, target.recipient, target.kind)
            == Some(target.serial)
    }

    /// Deliver `message` from `sender` to everyone listening to it.
    ///
    /// Recipients are visited most recently registered first. The set is
    /// fixed when the pass starts: recipients that stop listening or are
    /// destroyed before their turn are skipped, and recipients added during
    /// the pass wait for the next broadcast. Function listeners registered
    /// for the message's kind run after the hooks.
    ///
    /// Returns the number of deliveries made.
    pub fn broadcast(&self, sender: ParticipantId, message: &dyn Message) -> usize {
        let kind = message.kind();
        let (recipients, calls) = {
            let registry = self.inner.registry.borrow();
            (registry.recipients(sender), registry.call_targets(sender, kind))
        };
        if recipients.is_empty() && calls.is_empty() {
            return 0;
        }

        let _pass = self.enter_pass();
        let _span = trace_span!("broadcast", %sender, %kind).entered();

        let mut delivered = 0;
        for entry in recipients {
            let Some(hooks) = self.linked_hooks(sender, entry) else {
                trace!(recipient = %entry.peer, "skipped");
                continue;
            };
            trace!(recipient = %entry.peer, "deliver");
            hooks.receive(self, sender, message);
            delivered += 1;
        }

        for target in calls {
            if !self.call_still_registered(sender, &target) {
                continue;
            }
            trace!(recipient = %target.recipient, "deliver to function listener");
            (target.callback)(self, sender, message);
            delivered += 1;
        }
        delivered
    }

    /// Deliver a mutable `message` to everyone listening to `sender`.
    ///
    /// Same traversal as [`broadcast`](Self::broadcast). Each recipient sees
    /// what earlier recipients wrote, so the last one visited has the final
    /// say. Function listeners are not invoked.
    pub fn broadcast_with_feedback(&self, sender: ParticipantId, message: &mut dyn Message) -> usize {
        let recipients = self.inner.registry.borrow().recipients(sender);
        if recipients.is_empty() {
            return 0;
        }

        let _pass = self.enter_pass();
        let _span = trace_span!("broadcast_with_feedback", %sender, kind = %message.kind()).entered();

        let mut delivered = 0;
        for entry in recipients {
            let Some(hooks) = self.linked_hooks(sender, entry) else {
                trace!(recipient = %entry.peer, "skipped");
                continue;
            };
            trace!(recipient = %entry.peer, "deliver");
            hooks.receive_with_feedback(self, sender, message);
            delivered += 1;
        }
        delivered
    }

    /// Deliver `message` to a single participant, linked or not.
    ///
    /// Returns `false` if either side is dead or the recipient has no hooks.
    pub fn send(&self, sender: ParticipantId, recipient: ParticipantId, message: &dyn Message) -> bool {
        let Some(hooks) = self.direct_hooks(sender, recipient) else {
            return false;
        };
        let _pass = self.enter_pass();
        hooks.receive(self, sender, message);
        true
    }

    /// Deliver a mutable `message` to a single participant, linked or not.
    ///
    /// Returns `false` if either side is dead or the recipient has no hooks.
    pub fn send_with_feedback(
        &self,
        sender: ParticipantId,
        recipient: ParticipantId,
        message: &mut dyn Message,
    ) -> bool {
        let Some(hooks) = self.direct_hooks(sender, recipient) else {
            return false;
        };
        let _pass = self.enter_pass();
        hooks.receive_with_feedback(self, sender, message);
        true
    }

    fn direct_hooks(&self, sender: ParticipantId, recipient: ParticipantId) -> Option<Rc<dyn Participant>> {
        let registry = self.inner.registry.borrow();
        if !registry.is_alive(sender) {
            return None;
        }
        registry.hooks(recipient)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::{message_kind, Endpoint, Hub, HubConfig, Message, MessageType, Participant, ParticipantId};

    #[derive(Debug)]
    struct Ping;
    message_kind!(Ping, "Ping::Test");

    #[derive(Debug)]
    struct Pong;
    message_kind!(Pong, "Pong::Test");

    #[derive(Debug, Default)]
    struct Vote {
        v: i32,
        voters: usize,
    }
    message_kind!(Vote, "Vote::Test");

    /// Records every delivery, optionally running an action on receive.
    struct Recorder {
        endpoint: Endpoint,
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        on_receive: RefCell<Option<Box<dyn Fn(&Hub, &Recorder, ParticipantId)>>>,
        vote: Cell<Option<i32>>,
    }

    impl Recorder {
        fn new(hub: &Hub, name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Rc<Self> {
            Rc::new_cyclic(|me| Self {
                endpoint: hub.attach(me.clone()),
                name,
                log: log.clone(),
                on_receive: RefCell::new(None),
                vote: Cell::new(None),
            })
        }

        fn id(&self) -> ParticipantId {
            self.endpoint.id()
        }

        fn on_receive(&self, f: impl Fn(&Hub, &Recorder, ParticipantId) + 'static) {
            *self.on_receive.borrow_mut() = Some(Box::new(f));
        }
    }

    impl Participant for Recorder {
        fn receive(&self, hub: &Hub, sender: ParticipantId, message: &dyn Message) {
            if message.is(Ping::KIND) {
                self.log.borrow_mut().push(self.name);
            }
            if let Some(action) = self.on_receive.borrow().as_ref() {
                action(hub, self, sender);
            }
        }

        fn receive_with_feedback(&self, hub: &Hub, sender: ParticipantId, message: &mut dyn Message) {
            if let (Some(vote), Some(v)) = (message.downcast_mut::<Vote>(), self.vote.get()) {
                vote.v = v;
                vote.voters += 1;
            }
            if let Some(action) = self.on_receive.borrow().as_ref() {
                action(hub, self, sender);
            }
        }
    }

    fn log() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_broadcast_to_nobody_is_silent() {
        let hub = Hub::new();
        let sender = hub.endpoint("model");
        assert_eq!(sender.broadcast(&Ping), 0);
        assert_eq!(hub.dispatch_depth(), 0);
    }

    #[test]
    fn test_broadcast_order_is_most_recent_first() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();

        assert_eq!(sender.broadcast(&Ping), 2);
        assert_eq!(*log.borrow(), vec!["r2", "r1"]);
    }

    #[test]
    fn test_removing_a_later_recipient_skips_it() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();

        let r1_id = r1.id();
        r2.on_receive(move |hub, _me, sender| {
            hub.stop_listening(r1_id, sender);
        });

        assert_eq!(sender.broadcast(&Ping), 1);
        assert_eq!(*log.borrow(), vec!["r2"]);
    }

    #[test]
    fn test_destroying_a_later_recipient_mid_pass() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();

        let r1_id = r1.id();
        r2.on_receive(move |hub, _me, _sender| {
            hub.destroy(r1_id);
        });

        assert_eq!(sender.broadcast(&Ping), 1);
        assert_eq!(*log.borrow(), vec!["r2"]);
        assert!(!hub.is_alive(r1.id()));
    }

    #[test]
    fn test_relink_during_pass_is_treated_as_new() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();

        let r1_id = r1.id();
        r2.on_receive(move |hub, _me, sender| {
            hub.stop_listening(r1_id, sender);
            hub.listen_to(r1_id, sender).unwrap();
        });

        sender.broadcast(&Ping);
        assert_eq!(*log.borrow(), vec!["r2"]);

        log.borrow_mut().clear();
        sender.broadcast(&Ping);
        assert_eq!(*log.borrow(), vec!["r1", "r2"]);
    }

    #[test]
    fn test_sender_destroyed_mid_pass_stops_delivery() {
        let hub = Hub::new();
        let log = log();
        let sender = Recorder::new(&hub, "sender", &log);
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();

        r2.on_receive(|hub, _me, sender| {
            hub.destroy(sender);
        });

        assert_eq!(sender.endpoint.broadcast(&Ping), 1);
        assert_eq!(*log.borrow(), vec!["r2"]);
    }

    #[test]
    fn test_feedback_last_writer_wins() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();
        // r2 is visited first, r1 last.
        r2.vote.set(Some(1));
        r1.vote.set(Some(2));

        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 2);
        assert_eq!(vote.v, 2);
        assert_eq!(vote.voters, 2);
    }

    #[test]
    fn test_feedback_self_removal_mid_pass() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();
        r2.vote.set(Some(1));
        r1.vote.set(Some(2));
        r2.on_receive(|_hub, me, sender| {
            me.endpoint.stop_listening(sender);
        });

        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 2);
        assert_eq!((vote.v, vote.voters), (2, 2));

        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 1);
        assert_eq!((vote.v, vote.voters), (2, 1));
    }

    #[test]
    fn test_feedback_skips_recipient_destroyed_mid_pass() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();
        r2.vote.set(Some(1));
        r1.vote.set(Some(2));

        let r1_id = r1.id();
        r2.on_receive(move |hub, _me, _sender| {
            hub.destroy(r1_id);
        });

        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 1);
        assert_eq!((vote.v, vote.voters), (1, 1));
        assert!(!hub.is_alive(r1_id));
    }

    #[test]
    fn test_feedback_recipient_added_mid_pass_waits() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        let r3 = Recorder::new(&hub, "r3", &log);
        r1.endpoint.listen_to(sender.id()).unwrap();
        r2.endpoint.listen_to(sender.id()).unwrap();
        r1.vote.set(Some(1));
        r2.vote.set(Some(2));
        r3.vote.set(Some(3));

        let r3_id = r3.id();
        r2.on_receive(move |hub, _me, sender| {
            hub.listen_to(r3_id, sender).unwrap();
        });

        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 2);
        assert_eq!((vote.v, vote.voters), (1, 2));
        assert!(r3.endpoint.is_listening_to(sender.id()));

        // r3 is now newest, so it writes first and r1 still writes last.
        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 3);
        assert_eq!((vote.v, vote.voters), (1, 3));
    }

    #[test]
    fn test_send_with_feedback_needs_no_link() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        r1.vote.set(Some(7));

        let mut vote = Vote::default();
        assert!(sender.send_with_feedback(r1.id(), &mut vote));
        assert_eq!(vote.v, 7);

        assert!(!sender.send_with_feedback(sender.id(), &mut vote));
        assert!(sender.send(r1.id(), &Ping));
        assert_eq!(*log.borrow(), vec!["r1"]);
    }

    #[test]
    fn test_function_listener_fires_for_its_kind_only() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let pings = Rc::new(Cell::new(0));

        let counter = pings.clone();
        r1.endpoint
            .listen_for::<Ping, _>(sender.id(), move |_hub, _sender, _ping| {
                counter.set(counter.get() + 1);
            })
            .unwrap();

        assert_eq!(sender.broadcast(&Ping), 1);
        assert_eq!(sender.broadcast(&Pong), 0);
        assert_eq!(pings.get(), 1);
        assert!(log.borrow().is_empty());

        assert!(r1.endpoint.stop_listening_for(sender.id(), Ping::KIND));
        sender.broadcast(&Ping);
        assert_eq!(pings.get(), 1);
    }

    #[test]
    fn test_function_listener_released_with_recipient() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let pings = Rc::new(Cell::new(0));
        {
            let r1 = Recorder::new(&hub, "r1", &log);
            let counter = pings.clone();
            r1.endpoint
                .listen_for::<Ping, _>(sender.id(), move |_, _, _| counter.set(counter.get() + 1))
                .unwrap();
        }
        assert_eq!(Rc::strong_count(&pings), 1);
        assert_eq!(sender.broadcast(&Ping), 0);
    }

    #[test]
    fn test_function_listeners_run_newest_first() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        let calls = Rc::new(RefCell::new(Vec::new()));

        for recorder in [&r1, &r2] {
            let calls = calls.clone();
            let name = recorder.name;
            recorder
                .endpoint
                .listen_for::<Ping, _>(sender.id(), move |_, _, _| calls.borrow_mut().push(name))
                .unwrap();
        }

        assert_eq!(sender.broadcast(&Ping), 2);
        assert_eq!(*calls.borrow(), vec!["r2", "r1"]);
    }

    #[test]
    fn test_function_listener_removed_mid_pass_is_skipped() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        let calls = Rc::new(RefCell::new(Vec::new()));

        let r1_calls = calls.clone();
        r1.endpoint
            .listen_for::<Ping, _>(sender.id(), move |_, _, _| r1_calls.borrow_mut().push("r1"))
            .unwrap();
        let r2_calls = calls.clone();
        let r1_id = r1.id();
        r2.endpoint
            .listen_for::<Ping, _>(sender.id(), move |hub, sender, _| {
                r2_calls.borrow_mut().push("r2");
                hub.stop_listening_for(r1_id, sender, Ping::KIND);
            })
            .unwrap();

        assert_eq!(sender.broadcast(&Ping), 1);
        assert_eq!(*calls.borrow(), vec!["r2"]);
    }

    #[test]
    fn test_function_listener_added_mid_pass_waits() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        let calls = Rc::new(RefCell::new(Vec::new()));

        let r1_id = r1.id();
        let recruit_calls = calls.clone();
        let recruited = Cell::new(false);
        r2.endpoint
            .listen_for::<Ping, _>(sender.id(), move |hub, sender, _| {
                recruit_calls.borrow_mut().push("r2");
                if recruited.replace(true) {
                    return;
                }
                let late_calls = recruit_calls.clone();
                hub.listen_for::<Ping, _>(r1_id, sender, move |_, _, _| {
                    late_calls.borrow_mut().push("r1");
                })
                .unwrap();
            })
            .unwrap();

        assert_eq!(sender.broadcast(&Ping), 1);
        assert_eq!(*calls.borrow(), vec!["r2"]);

        calls.borrow_mut().clear();
        assert_eq!(sender.broadcast(&Ping), 2);
        assert_eq!(*calls.borrow(), vec!["r1", "r2"]);
    }

    #[test]
    fn test_feedback_never_reaches_function_listeners() {
        let hub = Hub::new();
        let log = log();
        let sender = hub.endpoint("model");
        let r1 = Recorder::new(&hub, "r1", &log);
        let r2 = Recorder::new(&hub, "r2", &log);
        r2.endpoint.listen_to(sender.id()).unwrap();
        r2.vote.set(Some(4));
        let calls = Rc::new(Cell::new(0));

        let counter = calls.clone();
        r1.endpoint
            .listen_for::<Vote, _>(sender.id(), move |_, _, _| counter.set(counter.get() + 1))
            .unwrap();

        let mut vote = Vote::default();
        assert_eq!(sender.broadcast_with_feedback(&mut vote), 1);
        assert_eq!((vote.v, vote.voters), (4, 1));
        assert_eq!(calls.get(), 0);

        assert_eq!(sender.broadcast(&Vote::default()), 2);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    #[should_panic(expected = "a broadcast cycle never settles")]
    fn test_runaway_cycle_hits_depth_limit() {
        let hub = Hub::with_config(HubConfig {
            max_dispatch_depth: 8,
            ..HubConfig::default()
        });
        let log = log();
        let a = Recorder::new(&hub, "a", &log);
        let b = Recorder::new(&hub, "b", &log);
        a.endpoint.listen_to(b.id()).unwrap();
        b.endpoint.listen_to(a.id()).unwrap();
        a.on_receive(|hub, me, _| {
            hub.broadcast(me.id(), &Ping);
        });
        b.on_receive(|hub, me, _| {
            hub.broadcast(me.id(), &Ping);
        });
        a.endpoint.broadcast(&Ping);
    }

    #[test]
    fn test_depth_restored_after_nested_pass() {
        let hub = Hub::new();
        let log = log();
        let outer = hub.endpoint("outer");
        let relay = Recorder::new(&hub, "relay", &log);
        let leaf = Recorder::new(&hub, "leaf", &log);
        relay.endpoint.listen_to(outer.id()).unwrap();
        leaf.endpoint.listen_to(relay.id()).unwrap();

        let seen = Rc::new(Cell::new(0));
        let depth = seen.clone();
        leaf.on_receive(move |hub, _, _| depth.set(hub.dispatch_depth()));
        relay.on_receive(|hub, me, _| {
            hub.broadcast(me.id(), &Ping);
        });

        outer.broadcast(&Ping);
        assert_eq!(seen.get(), 2);
        assert_eq!(hub.dispatch_depth(), 0);
        assert_eq!(*log.borrow(), vec!["relay", "leaf"]);
    }
}
