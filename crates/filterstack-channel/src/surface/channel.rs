use std::sync::Arc;

use filterstack_core::error::{CallError, Result};

use crate::config::ChannelArgs;
use crate::core_config::CoreConfiguration;
use crate::service_config::{CallContext, ServiceConfig, ServiceConfigCallData};
use crate::stack::{ChannelInfo, ChannelOp, ChannelStack, ChannelStackBuilder, ChannelType};
use crate::surface::call::Call;
use crate::transport::Transport;

/// A built channel: its filter stack plus the parsed service config.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    target: String,
    args: ChannelArgs,
    stack: ChannelStack,
    service_config: Option<Arc<ServiceConfig>>,
}

impl Channel {
    /// Build with the global [`CoreConfiguration`].
    pub fn create(
        target: &str,
        channel_type: ChannelType,
        args: ChannelArgs,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self> {
        Self::create_with_config(&CoreConfiguration::global(), target, channel_type, args, transport)
    }

    /// Parse the service config (an invalid one fails creation), run the init
    /// stages for `channel_type`, then build the stack.
    pub fn create_with_config(
        config: &CoreConfiguration,
        target: &str,
        channel_type: ChannelType,
        args: ChannelArgs,
        transport: Option<Arc<dyn Transport>>,
    ) -> Result<Self> {
        let service_config = match args.service_config.as_deref() {
            Some(json) => Some(Arc::new(ServiceConfig::parse(
                &args,
                json,
                config.service_config_parsers(),
            )?)),
            None => None,
        };

        let mut builder = ChannelStackBuilder::new(channel_type, target, args.clone());
        if let Some(transport) = transport {
            builder.set_transport(transport);
        }
        config.channel_init().create_stack(&mut builder)?;
        let stack = builder.build(config)?;

        tracing::info!(channel_target = %target, %channel_type, filters = ?stack.filter_names(), "channel created");
        Ok(Self {
            inner: Arc::new(ChannelInner {
                target: target.to_owned(),
                args,
                stack,
                service_config,
            }),
        })
    }

    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn channel_type(&self) -> ChannelType {
        self.inner.stack.channel_type()
    }

    pub fn channel_args(&self) -> &ChannelArgs {
        &self.inner.args
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.inner.stack.filter_names()
    }

    pub fn service_config(&self) -> Option<&Arc<ServiceConfig>> {
        self.inner.service_config.as_ref()
    }

    pub fn info(&self) -> ChannelInfo {
        self.inner.stack.get_info()
    }

    /// Start a call on `path` (`/service/method`).
    pub fn create_call(&self, path: &str) -> Result<Call> {
        let call_data = self
            .inner
            .service_config
            .as_ref()
            .map(|sc| ServiceConfigCallData::new(Arc::clone(sc), path));
        Call::new(&self.inner.stack, path, CallContext::new(call_data))
    }

    /// Tell the transport to drop the connection; open streams fail with `error`.
    pub fn disconnect(&self, error: CallError) {
        tracing::info!(channel_target = %self.inner.target, %error, "channel disconnect");
        self.inner.stack.start_transport_op(ChannelOp {
            disconnect_with_error: Some(error),
            on_consumed: None,
        });
    }
}
