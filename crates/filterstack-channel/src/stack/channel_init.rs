//! Registration stages that decide which filters a channel gets.
//!
//! Stages are keyed by channel type and ordered by priority; registration
//! order breaks ties, so the resulting stack is deterministic.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use filterstack_core::error::{FilterStackError, Result};

use crate::stack::builder::ChannelStackBuilder;

pub const PRIORITY_LOW: i32 = 0;
pub const PRIORITY_MED: i32 = 10_000;
pub const PRIORITY_HIGH: i32 = 20_000;
pub const PRIORITY_VERY_HIGH: i32 = 30_000;
/// Priority used by the built-in policy filters.
pub const BUILTIN_PRIORITY: i32 = PRIORITY_MED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    ClientSubchannel,
    ClientDirectChannel,
    ServerChannel,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [
        ChannelType::ClientSubchannel,
        ChannelType::ClientDirectChannel,
        ChannelType::ServerChannel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::ClientSubchannel => "client_subchannel",
            ChannelType::ClientDirectChannel => "client_direct_channel",
            ChannelType::ServerChannel => "server_channel",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage inspects the builder's args and may prepend or append filters.
pub type Stage = Arc<dyn Fn(&mut ChannelStackBuilder) -> Result<()> + Send + Sync>;

#[derive(Clone)]
struct StageEntry {
    name: &'static str,
    priority: i32,
    seq: usize,
    stage: Stage,
}

#[derive(Default)]
pub struct ChannelInitBuilder {
    stages: HashMap<ChannelType, Vec<StageEntry>>,
    next_seq: usize,
}

impl ChannelInitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_stage<F>(
        &mut self,
        channel_type: ChannelType,
        priority: i32,
        name: &'static str,
        stage: F,
    ) where
        F: Fn(&mut ChannelStackBuilder) -> Result<()> + Send + Sync + 'static,
    {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stages.entry(channel_type).or_default().push(StageEntry {
            name,
            priority,
            seq,
            stage: Arc::new(stage),
        });
    }

    pub fn build(mut self) -> ChannelInit {
        for entries in self.stages.values_mut() {
            entries.sort_by_key(|e| (e.priority, e.seq));
        }
        ChannelInit { stages: self.stages }
    }
}

/// Frozen, ordered stage lists.
pub struct ChannelInit {
    stages: HashMap<ChannelType, Vec<StageEntry>>,
}

impl ChannelInit {
    /// Run every stage registered for the builder's channel type.
    ///
    /// The first failing stage aborts construction.
    pub fn create_stack(&self, builder: &mut ChannelStackBuilder) -> Result<()> {
        let channel_type = builder.channel_type();
        let Some(entries) = self.stages.get(&channel_type) else {
            return Ok(());
        };
        for entry in entries {
            tracing::trace!(stage = entry.name, priority = entry.priority, %channel_type, "run channel init stage");
            (entry.stage)(builder).map_err(|e| {
                tracing::debug!(stage = entry.name, %channel_type, error = %e, "channel init stage failed");
                let detail = match e {
                    FilterStackError::ChannelBuild(msg) => msg,
                    other => other.to_string(),
                };
                FilterStackError::ChannelBuild(format!("stage '{}': {detail}", entry.name))
            })?;
        }
        Ok(())
    }

    /// Stage names for `channel_type`, in execution order.
    pub fn stage_names(&self, channel_type: ChannelType) -> Vec<&'static str> {
        self.stages
            .get(&channel_type)
            .map(|v| v.iter().map(|e| e.name).collect())
            .unwrap_or_default()
    }
}
