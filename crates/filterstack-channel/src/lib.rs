//! filterstack channel library entry.
//!
//! This crate assembles per-channel filter stacks and runs calls through them:
//! configuration, service-config parsing, the stack builder and its
//! registration stages, the built-in filters, an in-process transport, and the
//! channel/call surface. It is consumed by the demo binary (`main.rs`) and by
//! integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod core_config;
pub mod filters;
pub mod service_config;
pub mod stack;
pub mod surface;
pub mod transport;

pub use config::ChannelArgs;
pub use core_config::CoreConfiguration;
pub use stack::ChannelType;
pub use surface::{Call, CallStatus, Channel};
