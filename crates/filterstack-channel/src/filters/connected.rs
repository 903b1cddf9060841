//! Terminal filter handing batches to the transport.

use std::sync::Arc;

use filterstack_core::error::{FilterStackError, Result};
use filterstack_core::{CallCombiner, OpBatch};

use crate::core_config::CoreConfigurationBuilder;
use crate::stack::{
    CallElement, CallElementArgs, CallNext, ChannelElement, ChannelElementArgs, ChannelFilter,
    ChannelInfo, ChannelNext, ChannelOp, ChannelStackBuilder, ChannelType, PRIORITY_VERY_HIGH,
};
use crate::transport::{Stream, Transport};

pub const FILTER_NAME: &str = "connected";

pub fn register(builder: &mut CoreConfigurationBuilder) {
    for channel_type in ChannelType::ALL {
        builder.channel_init().register_stage(
            channel_type,
            PRIORITY_VERY_HIGH,
            FILTER_NAME,
            add_connected_filter,
        );
    }
}

fn add_connected_filter(builder: &mut ChannelStackBuilder) -> Result<()> {
    if builder.transport().is_none() {
        return Err(FilterStackError::ChannelBuild("no transport set on the channel".into()));
    }
    builder.append_filter(Arc::new(ConnectedFilter));
    Ok(())
}

#[derive(Debug, Default)]
pub struct ConnectedFilter;

impl ChannelFilter for ConnectedFilter {
    fn name(&self) -> &'static str {
        FILTER_NAME
    }

    fn is_terminal(&self) -> bool {
        true
    }

    fn init_channel_elem(&self, args: &ChannelElementArgs<'_>) -> Result<Box<dyn ChannelElement>> {
        let transport = args
            .transport
            .ok_or_else(|| FilterStackError::ChannelBuild("connected filter needs a transport".into()))?;
        Ok(Box::new(ConnectedChannelElem {
            transport: Arc::clone(transport),
            service_config_json: args.channel_args.service_config.clone(),
        }))
    }
}

struct ConnectedChannelElem {
    transport: Arc<dyn Transport>,
    service_config_json: Option<String>,
}

impl ChannelElement for ConnectedChannelElem {
    fn init_call_elem(&self, args: &CallElementArgs<'_>) -> Result<Box<dyn CallElement>> {
        let stream = self
            .transport
            .init_stream(args.path, Arc::clone(args.call_combiner))?;
        Ok(Box::new(ConnectedCallElem {
            stream,
            combiner: Arc::clone(args.call_combiner),
        }))
    }

    fn start_transport_op(&self, op: ChannelOp, _next: ChannelNext<'_>) {
        self.transport.perform_op(op);
    }

    fn get_info(&self, info: &mut ChannelInfo, _next: ChannelNext<'_>) {
        if info.service_config_json.is_none() {
            info.service_config_json = self.service_config_json.clone();
        }
        info.transport_name = Some(self.transport.name());
    }
}

struct ConnectedCallElem {
    stream: Arc<dyn Stream>,
    combiner: Arc<CallCombiner>,
}

impl CallElement for ConnectedCallElem {
    fn start_batch(&self, batch: OpBatch, _next: CallNext<'_>) {
        self.stream.perform_stream_op(batch);
        self.combiner.stop("passed batch to transport");
    }
}
