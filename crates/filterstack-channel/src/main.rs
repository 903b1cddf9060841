//! filterstack demo
//!
//! Loads a stack config, builds every configured channel over an echo
//! in-process transport, and runs one unary probe call per channel.
//!
//! Usage: `filterstack-channel [config.yaml]` (default `filterstack.yaml`).
//! Log level via `RUST_LOG`.

use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use filterstack_channel::config::{self, ChannelConfig};
use filterstack_channel::transport::{InProcTransport, Transport};
use filterstack_channel::Channel;
use filterstack_core::error::Result;

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "filterstack.yaml".into());
    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, config = %path, "filterstack demo failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> Result<()> {
    let cfg = config::load_from_file(path)?;
    tracing::info!(channels = cfg.channels.len(), "filterstack demo starting");

    let mut probes = Vec::new();
    for ch in &cfg.channels {
        probes.push(tokio::spawn(probe(build(ch)?, ch.name.clone(), ch.probe_path.clone(), ch.probe_bytes)));
    }
    for probe in probes {
        if let Err(e) = probe.await {
            tracing::error!(error = %e, "probe task failed");
        }
    }
    Ok(())
}

fn build(ch: &ChannelConfig) -> Result<Channel> {
    let transport: Arc<dyn Transport> = InProcTransport::echo();
    let channel = Channel::create(&ch.target, ch.channel_type, ch.args.clone(), Some(transport))?;
    println!("{} ({}): {}", ch.name, ch.channel_type, channel.filter_names().join(" -> "));
    Ok(channel)
}

async fn probe(channel: Channel, name: String, path: String, bytes: usize) {
    let call = match channel.create_call(&path) {
        Ok(call) => call,
        Err(e) => {
            tracing::error!(channel = %name, error = %e, "create call failed");
            return;
        }
    };
    let response = call.unary(vec![b'x'; bytes]).await;
    let echoed = response.message.map(|m| m.len());
    println!("{name} {path} [{bytes} bytes]: {} (echoed {echoed:?})", response.status);
}
