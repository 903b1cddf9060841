use std::any::Any;
use std::fmt;

use serde_json::{Map, Value};
use filterstack_core::error::{FilterStackError, Result};

use crate::config::ChannelArgs;

/// Parser output stored in a service config, looked up by parser index.
pub trait ParsedConfig: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Parsed configs of one method config entry (or the global section), indexed
/// like the registry.
pub type ParsedConfigVector = Vec<Option<Box<dyn ParsedConfig>>>;

/// Turns one section of a service config into a [`ParsedConfig`].
///
/// `Ok(None)` means the section holds nothing for this parser.
pub trait ServiceConfigParser: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn parse_global_params(
        &self,
        _args: &ChannelArgs,
        _json: &Map<String, Value>,
    ) -> Result<Option<Box<dyn ParsedConfig>>> {
        Ok(None)
    }

    fn parse_per_method_params(
        &self,
        _args: &ChannelArgs,
        _json: &Map<String, Value>,
    ) -> Result<Option<Box<dyn ParsedConfig>>> {
        Ok(None)
    }
}

/// Registered parsers. A parser's index is its registration position.
#[derive(Default)]
pub struct ServiceConfigParserRegistry {
    parsers: Vec<Box<dyn ServiceConfigParser>>,
}

impl ServiceConfigParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_parser(&mut self, parser: Box<dyn ServiceConfigParser>) -> usize {
        if self.index_of(parser.name()).is_some() {
            tracing::warn!(parser = parser.name(), "service config parser registered twice, first one wins lookups");
        }
        self.parsers.push(parser);
        self.parsers.len() - 1
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parsers.iter().position(|p| p.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn parse_global_parameters(
        &self,
        args: &ChannelArgs,
        json: &Map<String, Value>,
    ) -> std::result::Result<ParsedConfigVector, Vec<String>> {
        self.run_all(|p| p.parse_global_params(args, json))
    }

    pub fn parse_per_method_parameters(
        &self,
        args: &ChannelArgs,
        json: &Map<String, Value>,
    ) -> std::result::Result<ParsedConfigVector, Vec<String>> {
        self.run_all(|p| p.parse_per_method_params(args, json))
    }

    /// Run every parser; keep going after failures so every defect is reported.
    fn run_all<F>(&self, mut parse: F) -> std::result::Result<ParsedConfigVector, Vec<String>>
    where
        F: FnMut(&dyn ServiceConfigParser) -> Result<Option<Box<dyn ParsedConfig>>>,
    {
        let mut out = Vec::with_capacity(self.parsers.len());
        let mut errors = Vec::new();
        for p in &self.parsers {
            match parse(p.as_ref()) {
                Ok(parsed) => out.push(parsed),
                Err(e) => {
                    errors.extend(flatten_error(&e));
                    out.push(None);
                }
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }
}

/// One line per defect, each prefixed with the context that produced it.
pub(crate) fn flatten_error(e: &FilterStackError) -> Vec<String> {
    match e {
        FilterStackError::ConfigParse { context, errors } => {
            errors.iter().map(|err| format!("{context}: {err}")).collect()
        }
        other => vec![other.to_string()],
    }
}
