//! mbprobe - Modbus TCP probe
//!
//! Connects to one slave, optionally reads a block of holding registers
//! (once, or repeatedly with `--interval-ms`), then disposes the master.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use common::logging::{self, LogConfig};
use common::{config_loader, shutdown};
use modbus_master::{TcpMaster, TcpMasterConfig};
use tracing::{info, Level};

/// Environment variable prefix for config overrides, e.g. `MBPROBE_PORT=1502`
const ENV_PREFIX: &str = "MBPROBE_";

#[derive(Parser, Debug)]
#[command(name = "mbprobe")]
#[command(about = "Probe a Modbus TCP slave")]
#[command(version)]
struct Cli {
    /// Master config file (YAML or TOML)
    #[arg(short, long, env = "MBPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Slave IP address, overrides the config file
    #[arg(long)]
    ip: Option<String>,

    /// Slave port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// First holding register to read
    #[arg(short, long)]
    address: Option<u16>,

    /// Number of registers to read
    #[arg(short = 'n', long, default_value_t = 10)]
    count: u16,

    /// Keep polling at this interval until Ctrl+C
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Also write logs to a daily file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, requires = "log_dir")]
    log_json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn master_config(&self) -> Result<TcpMasterConfig> {
        let mut config: TcpMasterConfig =
            config_loader::load_config(self.config.as_deref(), ENV_PREFIX)?;
        if let Some(ip) = &self.ip {
            config.ip_address = ip.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.validate().context("invalid master configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_with_config(LogConfig {
        service_name: "mbprobe".to_string(),
        log_dir: cli.log_dir.clone(),
        console_level: if cli.verbose { Level::DEBUG } else { Level::INFO },
        enable_json: cli.log_json,
        ..Default::default()
    })?;

    let config = cli.master_config()?;
    let master = TcpMaster::new();
    master.initialize(&config)?;

    let shutdown = shutdown::shutdown_token();
    let outcome = tokio::select! {
        result = probe(&master, &cli) => result,
        _ = shutdown.cancelled() => {
            info!("Shutdown requested");
            Ok(())
        },
    };

    master.dispose().await;
    outcome
}

async fn probe(master: &TcpMaster, cli: &Cli) -> Result<()> {
    let endpoint = master
        .endpoint()
        .map(|e| e.to_string())
        .unwrap_or_default();

    master
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}", endpoint))?;
    if !master.is_connected() {
        bail!("connection to {} was aborted", endpoint);
    }

    let Some(address) = cli.address else {
        println!("{}: connected", endpoint);
        return Ok(());
    };

    loop {
        let values = master
            .read_holding_registers(address, cli.count)
            .await
            .with_context(|| format!("read of {} registers at {} failed", cli.count, address))?;
        print_registers(address, &values);

        match cli.interval_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => return Ok(()),
        }
    }
}

fn print_registers(start: u16, values: &[u16]) {
    for (offset, value) in values.iter().enumerate() {
        let register = start as usize + offset;
        println!("{:>5}  {:>5}  0x{:04X}", register, value, value);
    }
}
