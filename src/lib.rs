//! # Relay
//!
//! Intrusive publish/subscribe for single-threaded component trees.
//!
//! Relay is the notification backbone for Flywheel components: tables tell
//! selection iterators that rows moved, data models tell widgets that
//! values changed, menus tell their directors that an item was chosen. No
//! component needs a compile-time dependency on the ones listening to it.
//!
//! ## Core Concepts
//!
//! - **Participants**: components embed an [`Endpoint`] and implement the
//!   [`Participant`] hooks they care about
//! - **Links**: `listen_to` records "recipient listens to sender" on both
//!   sides; dropping either side removes it
//! - **Reentrant dispatch**: hooks may link, unlink, broadcast and destroy
//!   while a broadcast is in flight
//! - **Lifetime safety**: participants are arena handles with generations,
//!   so a destroyed participant is never touched again
//!
//! ## Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use relay::{message_kind, Endpoint, Hub, Message, Participant, ParticipantId};
//!
//! #[derive(Debug)]
//! struct RowsInserted { count: usize }
//! message_kind!(RowsInserted, "RowsInserted::Table");
//!
//! struct RowCounter {
//!     endpoint: Endpoint,
//!     rows: Cell<usize>,
//! }
//!
//! impl Participant for RowCounter {
//!     fn receive(&self, _hub: &Hub, _sender: ParticipantId, message: &dyn Message) {
//!         if let Some(inserted) = message.downcast_ref::<RowsInserted>() {
//!             self.rows.set(self.rows.get() + inserted.count);
//!         }
//!     }
//! }
//!
//! let hub = Hub::new();
//! let table = hub.endpoint("table");
//! let counter = Rc::new_cyclic(|me| RowCounter {
//!     endpoint: hub.attach(me.clone()),
//!     rows: Cell::new(0),
//! });
//!
//! counter.endpoint.listen_to(table.id()).unwrap();
//! table.broadcast(&RowsInserted { count: 3 });
//! assert_eq!(counter.rows.get(), 3);
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod error;
mod hub;
mod message;
mod participant;
mod registry;
mod snoop;
mod weak_ref;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports for convenience
pub use error::{HubError, Result};
pub use hub::{Endpoint, Hub, HubConfig};
pub use message::{AsAny, Message, MessageKind, MessageType};
pub use participant::Participant;
pub use registry::ParticipantId;
pub use snoop::Snooper;
pub use weak_ref::WeakRef;
