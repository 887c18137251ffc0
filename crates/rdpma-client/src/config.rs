//! Client configuration: CLI surface (spec §6's bootstrap parameters,
//! client side) mirroring `rdpma-server::config::ServerConfig`'s
//! CLI-flags-plus-file layering.

use clap::Parser;
use serde::{Deserialize, Serialize};

/// `rdpma-client-demo` CLI: just enough to name a server and drive one
/// session's worth of PUT/GET traffic against it.
#[derive(Parser, Debug)]
#[command(name = "rdpma-client")]
#[command(about = "Client submission path for a disaggregated RDMA key-value pool", long_about = None)]
pub struct Args {
    /// Bootstrap server host.
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    pub server_addr: String,

    /// TCP bootstrap port.
    #[arg(short = 't', long, default_value_t = 7471)]
    pub tcp_port: u16,

    /// IB device port index.
    #[arg(short = 'i', long, default_value_t = 1)]
    pub ib_port: u16,

    /// Number of server-side qids this client may select among (spec
    /// §4.2 step 1's "qid from CPU id").
    #[arg(short = 'q', long, default_value_t = 1)]
    pub num_qids: u8,

    /// Maximum pages per PUT/GET (spec §4's 4-bit `num` field bound).
    #[arg(short = 'n', long, default_value_t = 15)]
    pub max_num_pages: u8,

    /// Verbose logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Print per-stage submission timing after the demo run.
    #[arg(short = 's', long)]
    pub print_stats: bool,
}

/// Resolved client configuration, mirroring `ServerConfig`'s role as a
/// serializable settled-on view of the CLI flags above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_addr: String,
    pub tcp_port: u16,
    pub ib_port: u16,
    pub num_qids: u8,
    pub max_num_pages: u8,
    pub verbose: bool,
}

impl ClientConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            server_addr: args.server_addr.clone(),
            tcp_port: args.tcp_port,
            ib_port: args.ib_port,
            num_qids: args.num_qids,
            max_num_pages: args.max_num_pages,
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
        let args = Args::parse_from(["rdpma-client"]);
        assert_eq!(args.tcp_port, 7471);
        assert_eq!(args.num_qids, 1);
        assert!(!args.verbose);
    }

    #[test]
    fn server_addr_and_qid_count_parse() {
        let args = Args::parse_from(["rdpma-client", "-a", "10.0.0.5", "-q", "4"]);
        assert_eq!(args.server_addr, "10.0.0.5");
        assert_eq!(args.num_qids, 4);
    }

    #[test]
    fn from_args_copies_every_field() {
        let args = Args::parse_from(["rdpma-client", "-n", "8"]);
        let cfg = ClientConfig::from_args(&args);
        assert_eq!(cfg.max_num_pages, 8);
        assert_eq!(cfg.server_addr, "127.0.0.1");
    }
}
