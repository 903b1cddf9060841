//! Message size enforcement.
//!
//! Outbound messages over the send limit fail their batch with
//! `RESOURCE_EXHAUSTED`. Inbound messages over the receive limit are still
//! delivered, but the violation sticks to the call and becomes its final
//! status. Channel defaults come from [`ChannelArgs`](crate::config::ChannelArgs);
//! a per-method service config entry may only tighten them.

pub mod filter;
pub mod parser;

use std::sync::Arc;

use filterstack_core::error::Result;

use crate::core_config::CoreConfigurationBuilder;
use crate::stack::{ChannelStackBuilder, ChannelType, BUILTIN_PRIORITY};

pub use filter::{limits_from_channel_args, MessageSizeCallElem, MessageSizeFilter, FILTER_NAME};
pub use parser::{
    effective_limit, exceeds, MessageSizeLimits, MessageSizeParsedConfig, MessageSizeParser,
    PARSER_NAME,
};

pub fn register(builder: &mut CoreConfigurationBuilder) {
    builder
        .service_config_parser()
        .register_parser(Box::new(MessageSizeParser));

    let init = builder.channel_init();
    init.register_stage(
        ChannelType::ClientSubchannel,
        BUILTIN_PRIORITY,
        FILTER_NAME,
        add_message_size_filter,
    );
    init.register_stage(
        ChannelType::ClientDirectChannel,
        BUILTIN_PRIORITY,
        FILTER_NAME,
        maybe_add_message_size_filter,
    );
    init.register_stage(
        ChannelType::ServerChannel,
        BUILTIN_PRIORITY,
        FILTER_NAME,
        maybe_add_message_size_filter,
    );
}

fn add_message_size_filter(builder: &mut ChannelStackBuilder) -> Result<()> {
    if builder.channel_args().want_minimal_stack() {
        return Ok(());
    }
    builder.prepend_filter(Arc::new(MessageSizeFilter));
    Ok(())
}

/// Only pay for the filter when some limit or per-method policy can apply.
fn maybe_add_message_size_filter(builder: &mut ChannelStackBuilder) -> Result<()> {
    let args = builder.channel_args();
    if args.want_minimal_stack() {
        return Ok(());
    }
    let limits = limits_from_channel_args(args);
    let enable = limits.max_send_size != -1
        || limits.max_recv_size != -1
        || args.service_config.is_some();
    if enable {
        builder.prepend_filter(Arc::new(MessageSizeFilter));
    } else {
        tracing::debug!(channel_type = %builder.channel_type(), "message_size filter skipped, no limits");
    }
    Ok(())
}
