//! Server configuration: CLI surface (spec §6) plus an optional
//! config-file layer under the CLI flags.

use crate::cpuset::CpuMask;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// `rdpma-server` CLI, matching spec §6's flag list one-for-one.
#[derive(Parser, Debug)]
#[command(name = "rdpma-server")]
#[command(about = "Memory-side RDMA key-value pool server", long_about = None)]
pub struct Args {
    /// TCP bootstrap port.
    #[arg(short = 't', long, default_value_t = 7471)]
    pub tcp_port: u16,

    /// IB device port index.
    #[arg(short = 'i', long, default_value_t = 1)]
    pub ib_port: u16,

    /// Initial table size, in pairs.
    #[arg(short = 's', long, default_value_t = 1 << 16)]
    pub table_size: usize,

    /// Expected dataset size, used to size the page log pools.
    #[arg(short = 'n', long, default_value_t = 1 << 20)]
    pub dataset_size: usize,

    /// Persistent pool file name suffix; per-NUMA files live at
    /// `/mnt/pmemN/<suffix>`.
    #[arg(short = 'z', long, default_value = "rdpma.pool")]
    pub pool_suffix: String,

    /// CPU bitmask (hex) for the receive/dispatch thread.
    #[arg(short = 'W', long, default_value = "0x1")]
    pub net_mask: CpuMask,

    /// CPU bitmask (hex) for KV-worker threads; one worker per set bit.
    #[arg(short = 'K', long, default_value = "0x2")]
    pub kv_mask: CpuMask,

    /// CPU bitmask (hex) for CQ-poll threads.
    #[arg(short = 'P', long, default_value = "0x1")]
    pub cq_mask: CpuMask,

    /// Verbose logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print human-readable index stats and exit.
    #[arg(short = 'h', long = "human-stats")]
    pub human_stats: bool,

    /// Optional TOML config file; CLI flags above override its values.
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print index diagnostics (depth, capacity, utilization, per-node
    /// loads) for the pools named by `-z` and exit without serving.
    Stats,
    /// Run Recovery against the existing pools and exit, without
    /// starting the dispatch engine or accepting connections.
    RecoverOnly,
}

/// Resolved server configuration: CLI flags layered over an optional
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub tcp_port: u16,
    pub ib_port: u16,
    pub table_size: usize,
    pub dataset_size: usize,
    pub pool_suffix: String,
    pub verbose: bool,
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            tcp_port: args.tcp_port,
            ib_port: args.ib_port,
            table_size: args.table_size,
            dataset_size: args.dataset_size,
            pool_suffix: args.pool_suffix.clone(),
            verbose: args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_parse_with_no_arguments() {
        let args = Args::parse_from(["rdpma-server"]);
        assert_eq!(args.tcp_port, 7471);
        assert_eq!(args.kv_mask.count(), 1);
    }

    #[test]
    fn cpu_masks_parse_from_hex_flags() {
        let args = Args::parse_from(["rdpma-server", "-K", "0xff"]);
        assert_eq!(args.kv_mask.count(), 8);
    }

    #[test]
    fn stats_subcommand_parses() {
        let args = Args::parse_from(["rdpma-server", "stats"]);
        assert!(matches!(args.command, Some(Commands::Stats)));
    }
}
