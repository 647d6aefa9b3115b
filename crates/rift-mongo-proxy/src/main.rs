//! rift-mongo-proxy CLI
//!
//! Usage:
//!   rift-mongo-proxy --listen 127.0.0.1:28017 --target-uri "mongodb://a:27017,b:27017/?replicaSet=rs0"

use anyhow::Context;
use clap::Parser;
use rift_mongo_proxy::{metrics, Config, ProxyServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// MongoDB wire-protocol proxy with in-band fault injection
#[derive(Parser, Debug)]
#[command(name = "rift-mongo-proxy")]
#[command(author, version, about)]
struct Args {
    /// Address to accept client connections on
    #[arg(long, env = "RIFT_MONGO_LISTEN")]
    listen: Option<String>,

    /// Target host:port, used when no target URI is given
    #[arg(long, env = "RIFT_MONGO_TARGET")]
    target: Option<String>,

    /// Target connection string (mongodb://...)
    #[arg(long, env = "RIFT_MONGO_TARGET_URI")]
    target_uri: Option<String>,

    /// CA certificate (PEM) for the upstream; enables TLS
    #[arg(long, env = "RIFT_MONGO_CA_FILE")]
    ca_file: Option<String>,

    /// Client certificate and key (PEM) for the upstream; enables TLS
    #[arg(long, env = "RIFT_MONGO_KEY_FILE")]
    key_file: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "RIFT_MONGO_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// YAML configuration file; flags override its values
    #[arg(short, long, env = "RIFT_MONGO_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(listen) = self.listen {
            config = config.with_listen_addr(listen);
        }
        if let Some(target) = self.target {
            config = config.with_target_addr(target);
        }
        if let Some(uri) = self.target_uri {
            config = config.with_target_uri(uri);
        }
        if let Some(ca_file) = self.ca_file {
            config = config.with_ca_file(ca_file);
        }
        if let Some(key_file) = self.key_file {
            config = config.with_key_file(key_file);
        }
        if let Some(addr) = self.metrics_addr {
            config = config.with_metrics_addr(addr);
        }
        Ok(config)
    }
}

fn init_tracing(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result.context("Failed to initialize tracing subscriber")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;

    if let Some(addr) = config.metrics_addr {
        tokio::spawn(async move {
            if let Err(e) = metrics::serve_metrics(addr).await {
                warn!("Metrics endpoint stopped: {:#}", e);
            }
        });
    }

    let listener = ProxyServer::new(config).await?.bind()?;

    tokio::select! {
        res = listener.serve() => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args.log_level, args.log_json) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
