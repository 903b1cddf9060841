//! Service config: a JSON policy document with per-method sections.
//!
//! Every registered parser sees the global object and each `methodConfig`
//! entry. Entries are keyed by their `name` list; a call's path
//! `/service/method` resolves to the exact entry, then the service-wide
//! `/service/` entry, then the default (empty name) entry.

pub mod call_data;
pub mod parser;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use filterstack_core::error::{FilterStackError, Result};

use crate::config::ChannelArgs;

pub use call_data::{CallContext, ServiceConfigCallData};
pub use parser::{ParsedConfig, ParsedConfigVector, ServiceConfigParser, ServiceConfigParserRegistry};

const PARSE_CONTEXT: &str = "Service config parsing error";

pub struct ServiceConfig {
    json_string: String,
    global: ParsedConfigVector,
    method_configs: HashMap<String, Arc<ParsedConfigVector>>,
    default_method_config: Option<Arc<ParsedConfigVector>>,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("json_string", &self.json_string)
            .field("method_names", &self.method_configs.keys().collect::<Vec<_>>())
            .field("has_default", &self.default_method_config.is_some())
            .finish()
    }
}

impl ServiceConfig {
    /// Parse `json_string`, running every parser in `registry`.
    ///
    /// All defects across the document are reported together.
    pub fn parse(
        args: &ChannelArgs,
        json_string: &str,
        registry: &ServiceConfigParserRegistry,
    ) -> Result<Self> {
        let json: Value = serde_json::from_str(json_string)
            .map_err(|e| parse_error(vec![format!("JSON parse error: {e}")]))?;
        let Value::Object(root) = json else {
            return Err(parse_error(vec!["top-level value is not an object".into()]));
        };

        let mut errors = Vec::new();

        let global = match registry.parse_global_parameters(args, &root) {
            Ok(v) => v,
            Err(errs) => {
                errors.extend(errs.into_iter().map(|e| format!("global params: {e}")));
                Vec::new()
            }
        };

        let mut method_configs = HashMap::new();
        let mut default_method_config = None;
        match root.get("methodConfig") {
            None => {}
            Some(Value::Array(entries)) => {
                for (i, entry) in entries.iter().enumerate() {
                    let prefix = format!("methodConfig[{i}]");
                    let Value::Object(entry) = entry else {
                        errors.push(format!("{prefix}: is not an object"));
                        continue;
                    };
                    parse_method_config(
                        args,
                        registry,
                        entry,
                        &prefix,
                        &mut method_configs,
                        &mut default_method_config,
                        &mut errors,
                    );
                }
            }
            Some(_) => errors.push("field:methodConfig error:not of type array".into()),
        }

        if !errors.is_empty() {
            return Err(parse_error(errors));
        }

        tracing::debug!(
            methods = method_configs.len(),
            has_default = default_method_config.is_some(),
            "service config parsed"
        );
        Ok(Self {
            json_string: json_string.to_owned(),
            global,
            method_configs,
            default_method_config,
        })
    }

    pub fn json_string(&self) -> &str {
        &self.json_string
    }

    pub fn global_parsed_config(&self, index: usize) -> Option<&dyn ParsedConfig> {
        self.global.get(index).and_then(|c| c.as_deref())
    }

    /// Parsed configs for `path` (`/service/method`), if any entry matches.
    pub fn method_parsed_config_vector(&self, path: &str) -> Option<Arc<ParsedConfigVector>> {
        if let Some(v) = self.method_configs.get(path) {
            return Some(Arc::clone(v));
        }
        if let Some(pos) = path.rfind('/') {
            if let Some(v) = self.method_configs.get(&path[..=pos]) {
                return Some(Arc::clone(v));
            }
        }
        self.default_method_config.clone()
    }
}

fn parse_error(errors: Vec<String>) -> FilterStackError {
    FilterStackError::ConfigParse {
        context: PARSE_CONTEXT.into(),
        errors,
    }
}

fn parse_method_config(
    args: &ChannelArgs,
    registry: &ServiceConfigParserRegistry,
    entry: &Map<String, Value>,
    prefix: &str,
    method_configs: &mut HashMap<String, Arc<ParsedConfigVector>>,
    default_method_config: &mut Option<Arc<ParsedConfigVector>>,
    errors: &mut Vec<String>,
) {
    let parsed = match registry.parse_per_method_parameters(args, entry) {
        Ok(v) => Arc::new(v),
        Err(errs) => {
            errors.extend(errs.into_iter().map(|e| format!("{prefix}: {e}")));
            return;
        }
    };

    let names = match entry.get("name") {
        None => Vec::new(),
        Some(Value::Array(names)) => names.as_slice().iter().collect(),
        Some(_) => {
            errors.push(format!("{prefix}: field:name error:not of type array"));
            return;
        }
    };

    for (j, name) in names.into_iter().enumerate() {
        match method_key(name) {
            Err(e) => errors.push(format!("{prefix}: field:name[{j}] {e}")),
            Ok(None) => {
                if default_method_config.is_some() {
                    errors.push(format!("{prefix}: field:name[{j}] error:duplicate default method config"));
                } else {
                    *default_method_config = Some(Arc::clone(&parsed));
                }
            }
            Ok(Some(key)) => {
                if method_configs.contains_key(&key) {
                    errors.push(format!("{prefix}: field:name[{j}] error:multiple method configs with same name {key}"));
                } else {
                    method_configs.insert(key, Arc::clone(&parsed));
                }
            }
        }
    }
}

/// `/service/method`, `/service/` for a service-wide entry, `None` for the
/// default entry.
fn method_key(name: &Value) -> std::result::Result<Option<String>, String> {
    let Value::Object(name) = name else {
        return Err("error:not of type object".into());
    };
    let service = string_field(name, "service")?.filter(|s| !s.is_empty());
    let method = string_field(name, "method")?.filter(|s| !s.is_empty());
    match (service, method) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err("error:method name populated without service name".into()),
        (Some(service), method) => Ok(Some(format!("/{service}/{}", method.unwrap_or_default()))),
    }
}

fn string_field<'a>(obj: &'a Map<String, Value>, key: &str) -> std::result::Result<Option<&'a str>, String> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(format!("error:field {key} is not of type string")),
    }
}
