//! Messages: kind-tagged payloads passed to recipients by reference.
//!
//! Every message type carries a [`MessageKind`], a process-wide tag compared
//! by value. Recipients receive `&dyn Message`, check the kind, and narrow to
//! the concrete type:
//!
//! ```
//! use relay::{message_kind, Message, MessageType};
//!
//! #[derive(Debug)]
//! struct RowsInserted {
//!     first: usize,
//!     count: usize,
//! }
//! message_kind!(RowsInserted, "RowsInserted::Table");
//!
//! let msg = RowsInserted { first: 3, count: 2 };
//! let any: &dyn Message = &msg;
//! assert!(any.is(RowsInserted::KIND));
//! assert_eq!(any.downcast_ref::<RowsInserted>().map(|m| m.count), Some(2));
//! ```

mod kind;

pub use kind::{AsAny, Message, MessageKind, MessageType};

/// Implement [`Message`] and [`MessageType`] for a type.
///
/// The name is conventionally `"<Message>::<Owner>"`, e.g.
/// `"SelectionChanged::Table"`, so kinds from different owners never clash.
#[macro_export]
macro_rules! message_kind {
    ($ty:ty, $name:expr) => {
        impl $crate::MessageType for $ty {
            const KIND: $crate::MessageKind = $crate::MessageKind::new($name);
        }

        impl $crate::Message for $ty {
            fn kind(&self) -> $crate::MessageKind {
                <$ty as $crate::MessageType>::KIND
            }
        }
    };
}
