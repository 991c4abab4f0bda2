//! Tether command-line client

use crate::{Channel, ChannelConfig, ChannelState, CommandTable};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use tether_network::TcpConnector;
use tether_state::Markers;
use tracing::info;

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Tether client - mirror a remote data model")]
struct Args {
    /// Address of the model owner (host:port)
    server: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Diff marker dialect, overrides the config file
    #[arg(long, value_enum)]
    markers: Option<Markers>,

    /// Reconnect attempts before giving up, overrides the config file
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Print every event with this name (repeatable)
    #[arg(short, long)]
    watch: Vec<String>,

    /// Remote method to call once the model has arrived
    #[arg(long)]
    call: Option<String>,

    /// Arguments for --call as a JSON array
    #[arg(long, default_value = "[]", requires = "call")]
    args: String,
}

/// File, then `TETHER_*` variables read through `env`, then command line flags
fn load_config(args: &Args, env: impl Fn(&str) -> Option<String>) -> Result<ChannelConfig> {
    let mut config = match &args.config {
        Some(path) => ChannelConfig::load(path)?,
        None => ChannelConfig::default(),
    };
    config.apply_overrides_from(env);

    if let Some(markers) = args.markers {
        config.markers = markers;
    }
    if let Some(attempts) = args.max_reconnect_attempts {
        config.max_reconnect_attempts = attempts;
    }
    Ok(config)
}

/// Text as-is, everything else as JSON
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub async fn run() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level {
        LogLevel::Trace => tracing::Level::TRACE,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Error => tracing::Level::ERROR,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .init();

    let config = load_config(&args, |key| std::env::var(key).ok())?;
    let call_args: Vec<Value> =
        serde_json::from_str(&args.args).context("--args must be a JSON array")?;

    let connector = TcpConnector::new(args.server.clone()).with_max_frame_len(config.max_frame_len);
    let commands = CommandTable::new().with("print", |values| {
        let line: Vec<String> = values.iter().map(display).collect();
        println!("{}", line.join(" "));
    });
    let channel = Channel::builder(config)
        .commands(commands)
        .on_terminated(|notice| eprintln!("{notice}"))
        .spawn(connector);

    for name in &args.watch {
        channel.subscribe(name.clone(), |event| {
            println!("{} {}", event.name(), event.payload());
        });
    }

    channel
        .connect()
        .await
        .with_context(|| format!("no model received from {}", args.server))?;
    println!("{}", serde_json::to_string_pretty(&channel.snapshot())?);

    if let Some(name) = args.call {
        let reply = channel
            .call_method(name.clone(), call_args)
            .response()
            .await
            .with_context(|| format!("call to {name} failed"))?;
        println!("{}", serde_json::to_string_pretty(&reply.into_value())?);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, closing channel");
            channel.shutdown().await;
        }
        state = channel.wait_for_state(|s| matches!(s, ChannelState::Disconnected | ChannelState::Terminated)) => {
            info!("Channel stopped: {:?}", state);
        }
    }

    Ok(())
}
