//! Channel stacks: filter traits, registration stages, the builder, and the
//! per-channel / per-call element arrays.

pub mod builder;
pub mod channel_init;
pub mod channel_stack;
pub mod filter;

pub use builder::ChannelStackBuilder;
pub use channel_init::{
    ChannelInit, ChannelInitBuilder, ChannelType, BUILTIN_PRIORITY, PRIORITY_HIGH, PRIORITY_LOW,
    PRIORITY_MED, PRIORITY_VERY_HIGH,
};
pub use channel_stack::{CallNext, CallStack, ChannelNext, ChannelStack};
pub use filter::{
    CallElement, CallElementArgs, ChannelElement, ChannelElementArgs, ChannelFilter, ChannelInfo,
    ChannelOp,
};
