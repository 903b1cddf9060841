//! Stack config loader (strict parsing).

pub mod schema;

use std::fs;

use filterstack_core::error::{FilterStackError, Result};

pub use schema::{ChannelArgs, ChannelConfig, StackConfig};

pub fn load_from_file(path: &str) -> Result<StackConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| FilterStackError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<StackConfig> {
    let cfg: StackConfig = serde_yaml::from_str(s)
        .map_err(|e| FilterStackError::BadConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
