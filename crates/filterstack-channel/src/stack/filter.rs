use std::sync::Arc;

use filterstack_core::error::{CallError, Result};
use filterstack_core::{CallCombiner, Closure, OpBatch};

use crate::config::ChannelArgs;
use crate::core_config::CoreConfiguration;
use crate::service_config::CallContext;
use crate::stack::channel_init::ChannelType;
use crate::stack::channel_stack::{CallNext, ChannelNext};
use crate::transport::Transport;

/// A filter kind. One is registered per stage; it creates one channel element
/// per channel it is part of.
pub trait ChannelFilter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Terminal filters talk to the transport and never forward.
    fn is_terminal(&self) -> bool {
        false
    }

    fn init_channel_elem(&self, args: &ChannelElementArgs<'_>) -> Result<Box<dyn ChannelElement>>;
}

/// Per-channel instance of a filter. Holds channel-scoped config only.
pub trait ChannelElement: Send + Sync {
    fn init_call_elem(&self, args: &CallElementArgs<'_>) -> Result<Box<dyn CallElement>>;

    fn start_transport_op(&self, op: ChannelOp, next: ChannelNext<'_>) {
        next.start_transport_op(op);
    }

    fn get_info(&self, info: &mut ChannelInfo, next: ChannelNext<'_>) {
        next.get_info(info);
    }
}

/// Per-call instance of a filter.
///
/// `start_batch` is entered holding the call combiner. It must either forward
/// the batch through `next` (the hold goes with it) or complete the batch
/// itself, which yields the hold.
pub trait CallElement: Send + Sync {
    fn start_batch(&self, batch: OpBatch, next: CallNext<'_>);
}

pub struct ChannelElementArgs<'a> {
    pub channel_type: ChannelType,
    pub target: &'a str,
    pub channel_args: &'a ChannelArgs,
    pub config: &'a CoreConfiguration,
    pub transport: Option<&'a Arc<dyn Transport>>,
    pub is_first: bool,
    pub is_last: bool,
}

pub struct CallElementArgs<'a> {
    pub path: &'a str,
    pub call_combiner: &'a Arc<CallCombiner>,
    pub context: &'a CallContext,
}

/// Channel-level query answered by walking the stack.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    pub service_config_json: Option<String>,
    pub transport_name: Option<&'static str>,
}

/// Channel-level operation passed down to the transport.
#[derive(Debug, Default)]
pub struct ChannelOp {
    pub disconnect_with_error: Option<CallError>,
    pub on_consumed: Option<Closure>,
}
