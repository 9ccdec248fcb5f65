use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use host_traffic::{
    TableConfig,
    config::{DEFAULT_CAPACITY, DEFAULT_EXPIRE_TICKS},
    report::ReportFormat,
};

mod capture;
mod node;

#[derive(Parser)]
#[command(name = "host-traffic")]
#[command(about = "Per-host LAN traffic accounting agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture on LAN interfaces and keep per-host counters
    Node(NodeCommand),
}

#[derive(Args)]
struct NodeCommand {
    /// LAN-facing interface to capture on; repeat for bridge ports
    #[arg(long = "lan-iface", value_name = "IFACE", required = true)]
    lan_ifaces: Vec<String>,
    /// Number of hosts tracked at once (power of two)
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,
    /// Milliseconds per rate interval
    #[arg(long, value_name = "MILLIS", default_value_t = 1000)]
    tick_ms: u64,
    /// Intervals without traffic before a host is forgotten
    #[arg(long, value_name = "TICKS", default_value_t = DEFAULT_EXPIRE_TICKS)]
    expire_ticks: u64,
    /// Seconds between host reports
    #[arg(long, default_value_t = 5)]
    report_interval_secs: u64,
    /// Report rendering
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    report_format: ReportFormat,
    /// Write each report to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    report_path: Option<PathBuf>,
    /// Size of each tpacket block (bytes)
    #[arg(long, value_name = "BYTES", default_value_t = capture::DEFAULT_BLOCK_SIZE)]
    block_size: u32,
    /// Number of blocks provisioned for the RX ring
    #[arg(long, value_name = "COUNT", default_value_t = capture::DEFAULT_BLOCK_COUNT)]
    block_count: u32,
    /// Size of each frame within a block (bytes)
    #[arg(long, value_name = "BYTES", default_value_t = capture::DEFAULT_FRAME_SIZE)]
    frame_size: u32,
    /// Milliseconds before an idle block is recycled
    #[arg(long, value_name = "MILLIS", default_value_t = capture::DEFAULT_BLOCK_TIMEOUT_MS)]
    block_timeout_ms: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("host-traffic error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Node(cmd)) => {
            let opts = node::NodeOptions {
                lan_ifaces: cmd.lan_ifaces,
                table: TableConfig {
                    capacity: cmd.capacity,
                    tick_interval: Duration::from_millis(cmd.tick_ms),
                    expire_ticks: cmd.expire_ticks,
                },
                report: node::ReportOptions {
                    interval: Duration::from_secs(cmd.report_interval_secs.max(1)),
                    format: cmd.report_format,
                    path: cmd.report_path,
                },
                ring: capture::RingConfig {
                    block_size: cmd.block_size,
                    block_count: cmd.block_count,
                    frame_size: cmd.frame_size,
                    block_timeout_ms: cmd.block_timeout_ms,
                },
            };
            node::run_node(opts).await?;
        }
        None => {
            Cli::command().print_help().ok();
            println!();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn node_defaults() {
        let cli = Cli::try_parse_from(["host-traffic", "node", "--lan-iface", "eth1"]).unwrap();
        let Some(Commands::Node(cmd)) = cli.command else {
            panic!("expected node subcommand");
        };
        assert_eq!(cmd.lan_ifaces, vec!["eth1".to_string()]);
        assert_eq!(cmd.capacity, DEFAULT_CAPACITY);
        assert_eq!(cmd.tick_ms, 1000);
        assert_eq!(cmd.expire_ticks, DEFAULT_EXPIRE_TICKS);
        assert_eq!(cmd.report_format, ReportFormat::Text);
    }

    #[test]
    fn node_requires_an_interface() {
        assert!(Cli::try_parse_from(["host-traffic", "node"]).is_err());
    }

    #[test]
    fn repeated_interfaces_and_json() {
        let cli = Cli::try_parse_from([
            "host-traffic",
            "node",
            "--lan-iface",
            "eth1",
            "--lan-iface",
            "ath0",
            "--report-format",
            "json",
        ])
        .unwrap();
        let Some(Commands::Node(cmd)) = cli.command else {
            panic!("expected node subcommand");
        };
        assert_eq!(cmd.lan_ifaces, vec!["eth1".to_string(), "ath0".to_string()]);
        assert_eq!(cmd.report_format, ReportFormat::Json);
    }
}
