//! Message kind identity and type-safe narrowing.

use std::any::Any;
use std::fmt;

/// Process-wide tag identifying a message kind.
///
/// Kinds are compared by value, never by instance identity, so two
/// independently constructed `MessageKind::new("TextSet::Editor")` are equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKind(&'static str);

impl MessageKind {
    /// Create a kind from its name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The kind's name.
    #[inline]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKind({})", self.0)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Access to a value as [`Any`], implemented for every `'static` type.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Borrow as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A value that can be broadcast.
///
/// Implement it with [`message_kind!`](crate::message_kind) rather than by
/// hand so that [`Message::kind`] and [`MessageType::KIND`] agree.
pub trait Message: AsAny + fmt::Debug {
    /// The kind tag of this message.
    fn kind(&self) -> MessageKind;
}

/// A concrete message type with a statically known kind.
pub trait MessageType: Message + Sized {
    /// The kind every value of this type reports.
    const KIND: MessageKind;
}

impl<'a> dyn Message + 'a {
    /// Check the kind tag.
    #[inline]
    pub fn is(&self, kind: MessageKind) -> bool {
        self.kind() == kind
    }

    /// Narrow to `M` if the kind matches.
    pub fn downcast_ref<M: MessageType>(&self) -> Option<&M> {
        if self.is(M::KIND) {
            self.as_any().downcast_ref::<M>()
        } else {
            None
        }
    }

    /// Narrow to `&mut M` if the kind matches. Used by feedback recipients.
    pub fn downcast_mut<M: MessageType>(&mut self) -> Option<&mut M> {
        if self.is(M::KIND) {
            self.as_any_mut().downcast_mut::<M>()
        } else {
            None
        }
    }

    /// Narrow to `M`, treating a mismatch as a programming error.
    ///
    /// # Panics
    ///
    /// Panics if the message is not an `M`. Check [`is`](Self::is) first.
    pub fn cast<M: MessageType>(&self) -> &M {
        let kind = self.kind();
        match self.downcast_ref::<M>() {
            Some(message) => message,
            None => panic!("message of kind {kind} cast to {}", M::KIND),
        }
    }

    /// Mutable counterpart of [`cast`](Self::cast).
    ///
    /// # Panics
    ///
    /// Panics if the message is not an `M`.
    pub fn cast_mut<M: MessageType>(&mut self) -> &mut M {
        let kind = self.kind();
        match self.downcast_mut::<M>() {
            Some(message) => message,
            None => panic!("message of kind {kind} cast to {}", M::KIND),
        }
    }
}
