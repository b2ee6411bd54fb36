// keybeacon: Complete Desktop CLI
//
// Every role of the tag system from one binary: accessory (Linux/BlueZ),
// scanner, owner provisioning and query, key management and a local
// directory server.

mod ble;
mod config;
mod directory_server;
mod logging;
#[cfg(target_os = "linux")]
mod peripheral;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use keybeacon_core::shutdown::{shutdown_channel, wait_for_shutdown, ShutdownSignal};
use keybeacon_core::{
    load_public_key_material, query_reports, run_provisioning_task, run_scan_task,
    ConfigCandidate, DirectoryClient, FileKeyStore, HttpDirectory, KeyStore, MemoryDirectory,
    NodeStats, OwnerKeys, Reporter, ScanStats, ScannerNode, StaticLocation,
};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(name = "keybeacon")]
#[command(about = "keybeacon: BLE tag provisioning, beaconing and report lookup", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter, e.g. "debug" or "keybeacon_core=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the owner RSA-512 key pair
    Keygen {
        /// Replace an existing key pair
        #[arg(short, long)]
        force: bool,
    },
    /// Write the owner's 64-byte key to a raw accessory key file
    ExportKey {
        /// Destination file (defaults to the accessory key in the data dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run as a tag: provisioning service until keyed, then fragment beacons
    Accessory {
        /// Key file to use instead of the one in the data dir
        #[arg(short, long)]
        key_file: Option<PathBuf>,
    },
    /// Collect tag fragments and upload encrypted reports
    Scan,
    /// Provision the first config-mode tag in range with the owner key
    OwnerSet,
    /// Fetch and decrypt reports for the owner key
    OwnerFind,
    /// Serve the report directory locally
    ServeDirectory {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;
    let _log_guard = logging::init(
        cli.log_level.as_deref(),
        config.log_dir.as_deref().map(Path::new),
    )?;

    match cli.command {
        Commands::Keygen { force } => cmd_keygen(&config, force).await,
        Commands::ExportKey { output } => cmd_export_key(&config, output).await,
        Commands::Accessory { key_file } => cmd_accessory(&config, key_file).await,
        Commands::Scan => cmd_scan(&config).await,
        Commands::OwnerSet => cmd_owner_set(&config).await,
        Commands::OwnerFind => cmd_owner_find(&config).await,
        Commands::ServeDirectory { port, bind } => cmd_serve_directory(&bind, port).await,
        Commands::Config { action } => cmd_config(config, action).await,
    }
}

/// Shutdown channel flipped by Ctrl-C
fn ctrl_c_shutdown() -> (Arc<watch::Sender<bool>>, ShutdownSignal) {
    let (tx, rx) = shutdown_channel();
    let tx = Arc::new(tx);
    let signal_tx = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            let _ = signal_tx.send(true);
        }
    });
    (tx, rx)
}

fn http_directory(config: &config::Config) -> Arc<dyn DirectoryClient> {
    Arc::new(HttpDirectory::new(config.directory_config()))
}

async fn cmd_keygen(config: &config::Config, force: bool) -> Result<()> {
    let (private_path, public_path) = config.owner_key_paths()?;
    if private_path.exists() && !force {
        anyhow::bail!(
            "Owner key already exists at {} (use --force to replace it)",
            private_path.display()
        );
    }

    println!("{}", "Generating owner key pair...".bold());
    let keys = OwnerKeys::generate().context("Failed to generate key pair")?;
    keys.save_pem(&private_path, &public_path)
        .context("Failed to save key pair")?;
    let material = keys
        .key_material()
        .context("Generated key has an unexpected size")?;

    println!("{} Owner key pair created", "✓".green());
    println!("  Private: {}", private_path.display());
    println!("  Public:  {}", public_path.display());
    println!("  Key:     {}", material.to_hex().bright_yellow());
    Ok(())
}

async fn cmd_export_key(config: &config::Config, output: Option<PathBuf>) -> Result<()> {
    let (_, public_path) = config.owner_key_paths()?;
    let material = load_public_key_material(&public_path).with_context(|| {
        format!(
            "Failed to read owner public key {} (run `keybeacon keygen` first)",
            public_path.display()
        )
    })?;

    let output = match output {
        Some(path) => path,
        None => config.tag_key_path()?,
    };
    FileKeyStore::new(&output)
        .store(&material)
        .context("Failed to write key file")?;

    println!("{} Key written to {}", "✓".green(), output.display());
    Ok(())
}

#[cfg(target_os = "linux")]
async fn cmd_accessory(config: &config::Config, key_file: Option<PathBuf>) -> Result<()> {
    use keybeacon_core::AccessoryRuntime;

    let key_path = match key_file {
        Some(path) => path,
        None => config.tag_key_path()?,
    };
    let store = Arc::new(FileKeyStore::new(&key_path));
    match store.load() {
        Ok(Some(key)) => println!("{} Key loaded, beaconing {}", "✓".green(), key.to_hex().dimmed()),
        Ok(None) => println!("{} No key yet, waiting for provisioning", "•".yellow()),
        Err(e) => return Err(e).context("Failed to read key file"),
    }

    let radio = Arc::new(
        peripheral::BluezRadio::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let runtime = AccessoryRuntime::new(radio, store, config.accessory_config());
    let (_shutdown_tx, shutdown) = ctrl_c_shutdown();

    runtime.run(shutdown).await.context("Accessory stopped")?;
    println!("{} Accessory stopped", "✓".green());
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn cmd_accessory(_config: &config::Config, _key_file: Option<PathBuf>) -> Result<()> {
    anyhow::bail!("The accessory role needs BlueZ and is only available on Linux")
}

async fn cmd_scan(config: &config::Config) -> Result<()> {
    let adapter = ble::default_adapter()
        .await
        .context("Failed to open Bluetooth adapter")?;
    let stream = ble::scan(&adapter).await.context("Failed to start scan")?;
    let (_shutdown_tx, shutdown) = ctrl_c_shutdown();

    let reporter = Reporter::new(http_directory(config), Arc::new(StaticLocation::default()));
    let mut node = ScannerNode::new(config.node_config(), reporter);
    let (tx, rx) = node.sighting_channel();

    println!("{}", "Scanning for tags (Ctrl-C to stop)".bold());
    let scan_task = tokio::spawn(run_scan_task(stream, tx, shutdown.clone()));
    let stats = node.run(rx, shutdown).await;
    let scan_stats = scan_task.await.context("Scan task panicked")?;

    print_scan_summary(&scan_stats, &stats);
    Ok(())
}

fn print_scan_summary(scan_stats: &ScanStats, stats: &NodeStats) {
    println!();
    println!("{}", "Scan summary".bold());
    println!("  Advertisements:  {}", scan_stats.reports);
    println!("  Sightings:       {}", stats.sightings);
    println!("  Keys completed:  {}", stats.keys_completed);
    println!("  Invalid keys:    {}", stats.invalid_keys);
    println!(
        "  Uploads:         {} ok, {} failed",
        stats.uploads_ok.to_string().green(),
        stats.uploads_failed.to_string().red()
    );
    println!("  Evicted tags:    {}", stats.evicted);
}

async fn cmd_owner_set(config: &config::Config) -> Result<()> {
    let (_, public_path) = config.owner_key_paths()?;
    let key = load_public_key_material(&public_path)
        .context("Failed to read owner public key (run `keybeacon keygen` first)")?;

    let adapter = ble::default_adapter()
        .await
        .context("Failed to open Bluetooth adapter")?;
    let stream = ble::scan(&adapter).await.context("Failed to start scan")?;
    let connector = Arc::new(ble::BtleplugConnector::new(adapter));
    let (_shutdown_tx, mut shutdown) = ctrl_c_shutdown();

    let (candidate_tx, candidate_rx) = mpsc::channel::<ConfigCandidate>(8);
    let reporter = Reporter::new(http_directory(config), Arc::new(StaticLocation::default()));
    let mut node =
        ScannerNode::new(config.node_config(), reporter).with_config_candidates(candidate_tx);
    let (tx, rx) = node.sighting_channel();

    println!("{}", "Waiting for a tag in config mode (Ctrl-C to stop)".bold());
    let scan_task = tokio::spawn(run_scan_task(stream, tx, shutdown.clone()));
    let node_shutdown = shutdown.clone();
    let node_task = tokio::spawn(async move { node.run(rx, node_shutdown).await });

    match run_provisioning_task(
        connector,
        key,
        candidate_rx,
        shutdown.clone(),
        config.provision_config(),
    )
    .await
    {
        Ok(outcome) => println!(
            "{} Key written to {} ({} round(s), {} writes)",
            "✓".green(),
            outcome.address.bright_cyan(),
            outcome.report.rounds,
            outcome.report.writes
        ),
        Err(e) => println!("{} Provisioning failed: {}", "✗".red(), e),
    }
    println!("{}", "Still scanning and reporting (Ctrl-C to stop)".bold());

    wait_for_shutdown(&mut shutdown).await;
    let scan_stats = scan_task.await.context("Scan task panicked")?;
    let stats = node_task.await.context("Scanner loop panicked")?;
    print_scan_summary(&scan_stats, &stats);
    Ok(())
}

async fn cmd_owner_find(config: &config::Config) -> Result<()> {
    let (private_path, _) = config.owner_key_paths()?;
    let owner = OwnerKeys::load_private_pem(&private_path)
        .context("Failed to read owner private key (run `keybeacon keygen` first)")?;
    let directory = http_directory(config);

    let reports = query_reports(directory.as_ref(), &owner)
        .await
        .context("Directory query failed")?;

    if reports.is_empty() {
        println!("{}", "No reports yet".dimmed());
        return Ok(());
    }

    println!("{} ({})", "Reports".bold(), reports.len());
    for report in reports {
        let when = format_timestamp(report.timestamp);
        match report.content {
            Ok(content) => println!(
                "  {} -> {}",
                when.dimmed(),
                String::from_utf8_lossy(&content)
            ),
            Err(e) => println!("  {} -> {} {}", when.dimmed(), "✗".red(), e),
        }
    }
    Ok(())
}

async fn cmd_serve_directory(bind: &str, port: u16) -> Result<()> {
    let ip = bind
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid bind address: {}", bind))?;
    let addr = SocketAddr::new(ip, port);

    println!("{} Serving directory on http://{}", "✓".green(), addr);
    println!("  Point scanners at it with:");
    println!(
        "  {}",
        format!("keybeacon config set directory_url http://{}", addr).bright_cyan()
    );

    tokio::select! {
        _ = directory_server::serve(MemoryDirectory::new(), addr) => {}
        _ = tokio::signal::ctrl_c() => println!("{} Directory stopped", "✓".green()),
    }
    Ok(())
}

async fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None if config.list().iter().any(|(k, _)| *k == key) => {
                println!("{} = {}", key.bright_cyan(), "(unset)".dimmed())
            }
            None => anyhow::bail!("Unknown config key: {}", key),
        },

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<30} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

fn format_timestamp(timestamp_ms: i64) -> String {
    use chrono::{DateTime, Local, Utc};

    let dt = DateTime::from_timestamp_millis(timestamp_ms).unwrap_or_else(Utc::now);
    let local: DateTime<Local> = dt.into();
    local.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_directory() {
        let cli = Cli::try_parse_from(["keybeacon", "serve-directory", "--port", "9000"]).unwrap();
        match cli.command {
            Commands::ServeDirectory { port, bind } => {
                assert_eq!(port, 9000);
                assert_eq!(bind, "0.0.0.0");
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["keybeacon", "scan", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Scan));
    }

    #[test]
    fn test_format_timestamp_is_millisecond_based() {
        let formatted = format_timestamp(1_700_000_000_000);
        assert!(formatted.starts_with("2023-11-1"));
    }
}
