use std::sync::Arc;

use crate::service_config::{ParsedConfig, ParsedConfigVector, ServiceConfig};

/// Service config view for one call, resolved once from its path.
#[derive(Clone)]
pub struct ServiceConfigCallData {
    service_config: Arc<ServiceConfig>,
    method_configs: Option<Arc<ParsedConfigVector>>,
}

impl ServiceConfigCallData {
    pub fn new(service_config: Arc<ServiceConfig>, path: &str) -> Self {
        let method_configs = service_config.method_parsed_config_vector(path);
        Self {
            service_config,
            method_configs,
        }
    }

    pub fn service_config(&self) -> &Arc<ServiceConfig> {
        &self.service_config
    }

    pub fn method_parsed_config(&self, index: usize) -> Option<&dyn ParsedConfig> {
        self.method_configs
            .as_ref()
            .and_then(|v| v.get(index))
            .and_then(|c| c.as_deref())
    }

    pub fn global_parsed_config(&self, index: usize) -> Option<&dyn ParsedConfig> {
        self.service_config.global_parsed_config(index)
    }
}

/// Per-call context shared with every call element at init.
#[derive(Clone, Default)]
pub struct CallContext {
    service_config_call_data: Option<ServiceConfigCallData>,
}

impl CallContext {
    pub fn new(service_config_call_data: Option<ServiceConfigCallData>) -> Self {
        Self {
            service_config_call_data,
        }
    }

    pub fn service_config_call_data(&self) -> Option<&ServiceConfigCallData> {
        self.service_config_call_data.as_ref()
    }
}
