use std::collections::HashSet;

use serde::Deserialize;
use filterstack_core::error::{FilterStackError, Result};

use crate::stack::ChannelType;

/// Default outbound limit: unbounded.
pub const DEFAULT_MAX_SEND_MESSAGE_LENGTH: i32 = -1;
/// Default inbound limit: 4 MiB.
pub const DEFAULT_MAX_RECV_MESSAGE_LENGTH: i32 = 4 * 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    pub version: u32,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl StackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(FilterStackError::UnsupportedVersion);
        }
        if self.channels.is_empty() {
            return Err(FilterStackError::BadConfig("channels must not be empty".into()));
        }

        let mut names = HashSet::new();
        for ch in &self.channels {
            if !names.insert(ch.name.as_str()) {
                return Err(FilterStackError::BadConfig(format!(
                    "duplicate channel name: {}",
                    ch.name
                )));
            }
            ch.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub channel_type: ChannelType,

    #[serde(default = "default_target")]
    pub target: String,

    #[serde(default)]
    pub args: ChannelArgs,

    /// Method path used by the demo probe call.
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: usize,
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FilterStackError::BadConfig("channel name must not be empty".into()));
        }
        if !self.probe_path.starts_with('/') {
            return Err(FilterStackError::BadConfig(format!(
                "channels[{}].probe_path must start with '/'",
                self.name
            )));
        }
        self.args
            .validate()
            .map_err(|e| FilterStackError::BadConfig(format!("channels[{}].args: {e}", self.name)))
    }
}

fn default_target() -> String {
    "inproc".into()
}
fn default_probe_path() -> String {
    "/filterstack.Echo/Ping".into()
}
fn default_probe_bytes() -> usize {
    16
}

/// Immutable per-channel arguments.
///
/// Loaded strictly from config files, but read leniently at channel build
/// time: an out-of-range limit set programmatically is logged and replaced by
/// its default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelArgs {
    #[serde(default)]
    pub max_send_message_length: Option<i64>,

    #[serde(default)]
    pub max_receive_message_length: Option<i64>,

    /// Raw service config JSON.
    #[serde(default)]
    pub service_config: Option<String>,

    #[serde(default)]
    pub minimal_stack: bool,
}

impl ChannelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_send_message_length(mut self, v: i64) -> Self {
        self.max_send_message_length = Some(v);
        self
    }

    pub fn with_max_receive_message_length(mut self, v: i64) -> Self {
        self.max_receive_message_length = Some(v);
        self
    }

    pub fn with_service_config(mut self, json: impl Into<String>) -> Self {
        self.service_config = Some(json.into());
        self
    }

    pub fn with_minimal_stack(mut self, minimal: bool) -> Self {
        self.minimal_stack = minimal;
        self
    }

    pub fn want_minimal_stack(&self) -> bool {
        self.minimal_stack
    }

    pub fn max_send_message_length(&self) -> i32 {
        limit_in_range(
            "max_send_message_length",
            self.max_send_message_length,
            DEFAULT_MAX_SEND_MESSAGE_LENGTH,
        )
    }

    pub fn max_receive_message_length(&self) -> i32 {
        limit_in_range(
            "max_receive_message_length",
            self.max_receive_message_length,
            DEFAULT_MAX_RECV_MESSAGE_LENGTH,
        )
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("max_send_message_length", self.max_send_message_length),
            ("max_receive_message_length", self.max_receive_message_length),
        ] {
            if let Some(v) = v {
                if !(-1..=i64::from(i32::MAX)).contains(&v) {
                    return Err(FilterStackError::BadConfig(format!(
                        "{name} must be between -1 and {}",
                        i32::MAX
                    )));
                }
            }
        }
        if matches!(self.service_config.as_deref(), Some(s) if s.trim().is_empty()) {
            return Err(FilterStackError::BadConfig("service_config must not be empty".into()));
        }
        Ok(())
    }
}

fn limit_in_range(name: &'static str, value: Option<i64>, default: i32) -> i32 {
    match value {
        None => default,
        Some(v) => match i32::try_from(v) {
            Ok(v) if v >= -1 => v,
            _ => {
                tracing::warn!(arg = name, value = v, default, "channel arg out of range, using default");
                default
            }
        },
    }
}
