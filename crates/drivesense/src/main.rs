//! `drivesense` - CLI for the telemetry ingest service.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use tokio::net::UdpSocket;

use drivesense::cli::{Cli, Command, ConfigCommand, SendCommand};
use drivesense::config::BackendKind;
use drivesense::storage::open_backend;
use drivesense::{decode, init_logging, server, Config, Decoded};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config_path = cli.config.clone();
    match cli.command {
        Command::Serve(cmd) => handle_serve(&load_config(config_path)?, !cmd.no_http).await,
        Command::Status(cmd) => handle_status(&load_config(config_path)?, cmd.json).await,
        Command::Send(cmd) => handle_send(&load_config(config_path)?, &cmd).await,
        Command::Config(cmd) => handle_config(config_path, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("loading configuration")
}

async fn handle_serve(config: &Config, with_http: bool) -> anyhow::Result<()> {
    let report = server::serve(config, with_http).await?;
    println!(
        "Received {} datagrams ({} accepted, {} rejected, {} dropped); {} merges, {} unpersisted",
        report.listener.received,
        report.listener.accepted,
        report.listener.rejected,
        report.listener.dropped,
        report.store.merges,
        report.store.persist_failures,
    );
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    if config.storage.backend == BackendKind::Memory {
        bail!("the memory backend keeps no snapshot between runs");
    }

    let backend = open_backend(config)?;
    let stored = backend.load().await?.map(|mut snapshot| {
        snapshot.recompute();
        snapshot
    });

    if json {
        let status = serde_json::json!({
            "backend": backend.describe(),
            "snapshot": stored,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("drivesense status");
    println!("-----------------");
    println!("Backend:       {}", backend.describe());
    let Some(snapshot) = stored else {
        println!("Snapshot:      none recorded yet");
        return Ok(());
    };
    let updated = chrono::DateTime::from_timestamp_millis(snapshot.timestamp)
        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
    println!("Updated:       {updated}");
    println!(
        "Acceleration:  x={:.3} y={:.3} z={:.3}",
        snapshot.ax, snapshot.ay, snapshot.az
    );
    println!(
        "Gyroscope:     x={:.3} y={:.3} z={:.3}",
        snapshot.gx, snapshot.gy, snapshot.gz
    );
    println!("Hard braking:  {}", snapshot.hb);
    println!("Rapid accel:   {}", snapshot.ra);
    println!("Turn speed:    {:.3}", snapshot.mts);
    Ok(())
}

async fn handle_send(config: &Config, cmd: &SendCommand) -> anyhow::Result<()> {
    if let Decoded::Rejected(reason) = decode(cmd.payload.as_bytes()) {
        eprintln!("warning: the listener will reject this payload ({reason})");
    }

    let target = cmd.target_or(config.listener.port);
    let addr = tokio::net::lookup_host(&target)
        .await
        .with_context(|| format!("resolving {target}"))?
        .next()
        .with_context(|| format!("no address for {target}"))?;
    let local = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };

    let socket = UdpSocket::bind(local).await?;
    let sent = socket
        .send_to(cmd.payload.as_bytes(), addr)
        .await
        .with_context(|| format!("sending to {addr}"))?;
    println!("Sent {sent} bytes to {addr}");
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Listener]");
                println!("  Bind address:       {}", config.listener.bind_address);
                println!("  Port:               {}", config.listener.port);
                println!("  Max datagram size:  {}", config.listener.max_datagram_size);
                println!();
                println!("[HTTP]");
                println!("  Enabled:            {}", config.http.enabled);
                println!("  Bind address:       {}", config.http.bind_address);
                println!("  Port:               {}", config.http.port);
                println!("  Route:              {}", config.http.route);
                println!();
                println!("[Storage]");
                println!("  Backend:            {}", config.storage.backend);
                println!("  Path:               {}", config.snapshot_path().display());
                println!("  Persist timeout:    {} ms", config.storage.persist_timeout_ms);
                println!();
                println!("[Store]");
                println!("  Queue capacity:     {}", config.store.queue_capacity);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            handle_validate(&path)?;
        }
    }
    Ok(())
}

fn handle_validate(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    match Config::load_from(Some(path.to_path_buf())) {
        Ok(_) => {
            println!("Configuration is valid.");
            Ok(())
        }
        Err(e) => bail!("configuration error: {e}"),
    }
}
