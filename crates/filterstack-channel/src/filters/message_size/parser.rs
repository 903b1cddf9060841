use std::any::Any;

use serde_json::{Map, Value};
use filterstack_core::error::{FilterStackError, Result};

use crate::config::ChannelArgs;
use crate::service_config::{CallContext, ParsedConfig, ServiceConfigParser};

/// Registry name of [`MessageSizeParser`].
pub const PARSER_NAME: &str = "message_size";

const PARSER_CONTEXT: &str = "Message size parser";

/// Send/receive limits in bytes; −1 means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSizeLimits {
    pub max_send_size: i32,
    pub max_recv_size: i32,
}

impl MessageSizeLimits {
    pub const UNBOUNDED: MessageSizeLimits = MessageSizeLimits {
        max_send_size: -1,
        max_recv_size: -1,
    };

    /// Apply a per-method override to channel defaults.
    pub fn tightened_by(self, method: MessageSizeLimits) -> Self {
        Self {
            max_send_size: effective_limit(self.max_send_size, method.max_send_size),
            max_recv_size: effective_limit(self.max_recv_size, method.max_recv_size),
        }
    }
}

/// The override wins only when it is set and stricter than the default.
pub fn effective_limit(default: i32, method: i32) -> i32 {
    if method >= 0 && (method < default || default < 0) {
        method
    } else {
        default
    }
}

/// Whether a message of `len` bytes breaks `max`.
pub fn exceeds(len: usize, max: i32) -> bool {
    usize::try_from(max).map(|max| len > max).unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSizeParsedConfig {
    limits: MessageSizeLimits,
}

impl MessageSizeParsedConfig {
    pub fn new(limits: MessageSizeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> MessageSizeLimits {
        self.limits
    }

    /// The method config resolved for this call, if the service config has one.
    pub fn from_call_context(context: &CallContext, parser_index: usize) -> Option<&Self> {
        context
            .service_config_call_data()?
            .method_parsed_config(parser_index)?
            .as_any()
            .downcast_ref::<Self>()
    }
}

impl ParsedConfig for MessageSizeParsedConfig {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reads `maxRequestMessageBytes` / `maxResponseMessageBytes`.
#[derive(Debug, Default)]
pub struct MessageSizeParser;

impl ServiceConfigParser for MessageSizeParser {
    fn name(&self) -> &'static str {
        PARSER_NAME
    }

    fn parse_per_method_params(
        &self,
        _args: &ChannelArgs,
        json: &Map<String, Value>,
    ) -> Result<Option<Box<dyn ParsedConfig>>> {
        let mut errors = Vec::new();
        let max_request = size_field(json, "maxRequestMessageBytes", &mut errors);
        let max_response = size_field(json, "maxResponseMessageBytes", &mut errors);
        if !errors.is_empty() {
            return Err(FilterStackError::ConfigParse {
                context: PARSER_CONTEXT.into(),
                errors,
            });
        }
        Ok(Some(Box::new(MessageSizeParsedConfig::new(MessageSizeLimits {
            max_send_size: max_request,
            max_recv_size: max_response,
        }))))
    }
}

fn size_field(json: &Map<String, Value>, field: &str, errors: &mut Vec<String>) -> i32 {
    let text = match json.get(field) {
        None => return -1,
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => {
            errors.push(format!("field:{field} error:should be of type number"));
            return -1;
        }
    };
    match parse_nonnegative_int(&text) {
        Some(v) => v,
        None => {
            errors.push(format!("field:{field} error:should be non-negative"));
            -1
        }
    }
}

/// Decimal digits only, no sign, fitting in `i32`.
fn parse_nonnegative_int(text: &str) -> Option<i32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<i32>().ok()
}
