//! Top-level facade crate for filterstack.
//!
//! Re-exports core types and the channel library so users can depend on a single crate.

pub mod core {
    pub use filterstack_core::*;
}

pub mod channel {
    pub use filterstack_channel::*;
}
