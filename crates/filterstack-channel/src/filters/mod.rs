//! Built-in filters.

pub mod connected;
pub mod message_size;

pub use connected::ConnectedFilter;
pub use message_size::MessageSizeFilter;
