//! Application-facing channel and call handles.

pub mod call;
pub mod channel;

pub use call::{Call, CallStatus, UnaryResponse};
pub use channel::Channel;
