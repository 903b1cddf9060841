use std::collections::VecDeque;
use std::sync::Arc;

use filterstack_core::error::{FilterStackError, Result};

use crate::config::ChannelArgs;
use crate::core_config::CoreConfiguration;
use crate::stack::channel_init::ChannelType;
use crate::stack::channel_stack::{ChannelEntry, ChannelStack};
use crate::stack::filter::{ChannelElementArgs, ChannelFilter};
use crate::transport::Transport;

/// Mutable filter list handed to each registration stage.
pub struct ChannelStackBuilder {
    channel_type: ChannelType,
    target: String,
    args: ChannelArgs,
    transport: Option<Arc<dyn Transport>>,
    filters: VecDeque<Arc<dyn ChannelFilter>>,
}

impl ChannelStackBuilder {
    pub fn new(channel_type: ChannelType, target: impl Into<String>, args: ChannelArgs) -> Self {
        Self {
            channel_type,
            target: target.into(),
            args,
            transport: None,
            filters: VecDeque::new(),
        }
    }

    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn channel_args(&self) -> &ChannelArgs {
        &self.args
    }

    pub fn set_transport(&mut self, transport: Arc<dyn Transport>) {
        self.transport = Some(transport);
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub fn prepend_filter(&mut self, filter: Arc<dyn ChannelFilter>) {
        tracing::debug!(filter = filter.name(), channel_type = %self.channel_type, "prepend filter");
        self.filters.push_front(filter);
    }

    pub fn append_filter(&mut self, filter: Arc<dyn ChannelFilter>) {
        tracing::debug!(filter = filter.name(), channel_type = %self.channel_type, "append filter");
        self.filters.push_back(filter);
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Initialize one channel element per filter, in order.
    ///
    /// The last filter must be terminal and no other may be.
    pub fn build(self, config: &CoreConfiguration) -> Result<ChannelStack> {
        let n = self.filters.len();
        if n == 0 {
            return Err(FilterStackError::ChannelBuild(format!(
                "no filters registered for {}",
                self.channel_type
            )));
        }
        for (i, f) in self.filters.iter().enumerate() {
            let last = i + 1 == n;
            if f.is_terminal() != last {
                let why = if last { "last filter is not terminal" } else { "terminal filter is not last" };
                return Err(FilterStackError::ChannelBuild(format!("{why}: {}", f.name())));
            }
        }

        let mut elements = Vec::with_capacity(n);
        for (i, filter) in self.filters.iter().enumerate() {
            let args = ChannelElementArgs {
                channel_type: self.channel_type,
                target: &self.target,
                channel_args: &self.args,
                config,
                transport: self.transport.as_ref(),
                is_first: i == 0,
                is_last: i + 1 == n,
            };
            let element = filter.init_channel_elem(&args)?;
            elements.push(ChannelEntry::new(filter.name(), element));
        }

        let stack = ChannelStack::new(self.channel_type, elements);
        tracing::debug!(channel_type = %self.channel_type, channel_target = %self.target, filters = ?stack.filter_names(), "channel stack built");
        Ok(stack)
    }
}
