// Kite TFTP server binary.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use kite_tftp::server::{ServerConfig, TftpServer};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Read-only TFTP server
#[derive(Parser, Debug)]
#[command(name = "kite-tftp-server")]
#[command(about = "Read-only TFTP server", long_about = None)]
struct Cli {
    /// UDP port to listen on
    listen_port: u16,

    /// Directory the served files live in
    files_dir: PathBuf,

    /// Log level filter (e.g. info, kite_tftp=debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit structured audit events
    #[arg(long)]
    audit: bool,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    if !cli.files_dir.is_dir() {
        eprintln!("{} is not a directory", cli.files_dir.display());
        process::exit(1);
    }

    let config = ServerConfig {
        bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), cli.listen_port),
        root_dir: cli.files_dir,
        audit_enabled: cli.audit,
    };

    let server = match TftpServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    // serve() returns only on a fatal socket error; the server otherwise
    // runs until killed.
    if let Err(e) = server.serve().await {
        error!("server terminated: {}", e);
        process::exit(1);
    }
}
