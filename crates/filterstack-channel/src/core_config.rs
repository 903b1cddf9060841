//! Process-wide registrations: channel init stages and service config parsers.
//!
//! A [`CoreConfiguration`] is built once and threaded explicitly into channel
//! creation. [`CoreConfiguration::global`] lazily builds the default one with
//! every built-in filter registered.

use std::sync::{Arc, OnceLock};

use crate::filters::{connected, message_size};
use crate::service_config::ServiceConfigParserRegistry;
use crate::stack::{ChannelInit, ChannelInitBuilder};

pub struct CoreConfiguration {
    channel_init: ChannelInit,
    service_config_parsers: ServiceConfigParserRegistry,
}

#[derive(Default)]
pub struct CoreConfigurationBuilder {
    channel_init: ChannelInitBuilder,
    service_config_parsers: ServiceConfigParserRegistry,
}

impl CoreConfigurationBuilder {
    pub fn channel_init(&mut self) -> &mut ChannelInitBuilder {
        &mut self.channel_init
    }

    pub fn service_config_parser(&mut self) -> &mut ServiceConfigParserRegistry {
        &mut self.service_config_parsers
    }

    pub fn build(self) -> CoreConfiguration {
        CoreConfiguration {
            channel_init: self.channel_init.build(),
            service_config_parsers: self.service_config_parsers,
        }
    }
}

impl CoreConfiguration {
    /// Empty builder: no filters, no parsers.
    pub fn builder() -> CoreConfigurationBuilder {
        CoreConfigurationBuilder::default()
    }

    /// Builder with every built-in registration applied.
    pub fn builtin_builder() -> CoreConfigurationBuilder {
        let mut builder = Self::builder();
        register_builtins(&mut builder);
        builder
    }

    pub fn global() -> Arc<CoreConfiguration> {
        static GLOBAL: OnceLock<Arc<CoreConfiguration>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::builtin_builder().build())))
    }

    pub fn channel_init(&self) -> &ChannelInit {
        &self.channel_init
    }

    pub fn service_config_parsers(&self) -> &ServiceConfigParserRegistry {
        &self.service_config_parsers
    }
}

pub fn register_builtins(builder: &mut CoreConfigurationBuilder) {
    connected::register(builder);
    message_size::register(builder);
}
