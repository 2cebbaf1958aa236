//! Callback registration types.

use std::fmt;

use crate::message::Message;
use crate::service::HandlerError;

/// Receives inbound messages for the (type, topic) pairs it is registered on.
///
/// Closures of the form `Fn(&Message) -> Result<(), HandlerError>` implement
/// this trait. An `Err` or a panic is logged and counted; it never stops
/// other callbacks or later messages.
pub trait MessageCallback: Send + Sync {
    fn on_message(&self, message: &Message) -> Result<(), HandlerError>;
}

impl<F> MessageCallback for F
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_message(&self, message: &Message) -> Result<(), HandlerError> {
        self(message)
    }
}

/// Token identifying one registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub(crate) u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback-{}", self.0)
    }
}
