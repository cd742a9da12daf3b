use anyhow::Result;
use clap::Parser;
use dnsseeder::config::Config;
use dnsseeder::crawler::{resolve_default_seeder, Crawler};
use dnsseeder::dns::DnsServer;
use dnsseeder::grpc::GrpcServer;
use dnsseeder::logging::init_logging;
use dnsseeder::manager::AddressManager;
use dnsseeder::profiling::ProfilingServer;
use dnsseeder::types::{NetAddress, SF_NODE_NETWORK};
use dnsseeder::version;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dnsseeder")]
#[command(about = "Kaspa DNS seeder")]
#[command(version)]
struct Cli {
    /// TOML configuration file; explicit flags override its values
    #[arg(short, long)]
    config: Option<String>,

    /// DNS zone this seeder is authoritative for
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Hostname of the nameserver advertised in NS records
    #[arg(short, long)]
    nameserver: Option<String>,

    /// UDP listen address for DNS
    #[arg(short, long)]
    listen: Option<String>,

    /// TCP listen address for gRPC
    #[arg(long)]
    grpc_listen: Option<String>,

    /// Bootstrap peer whose probe failure is fatal (host, ip, or ip:port)
    #[arg(short = 's', long)]
    default_seeder: Option<String>,

    /// Comma-separated ip:port peers inserted as pre-good entries
    #[arg(long)]
    known_peers: Option<String>,

    /// Application data directory
    #[arg(long)]
    app_dir: Option<String>,

    /// Enable HTTP profiling on the given port (1024-65535)
    #[arg(long)]
    profile: Option<u16>,

    /// Testnet suffix (only 11 is supported)
    #[arg(long)]
    net_suffix: Option<u16>,

    /// Apply the wanted-services bitmask when selecting good addresses
    #[arg(long)]
    filter_services: bool,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Disable writing log files
    #[arg(long)]
    nologfiles: bool,
}

impl Cli {
    /// Configuration file values first, explicit flags on top.
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(nameserver) = self.nameserver {
            config.nameserver = nameserver;
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(grpc_listen) = self.grpc_listen {
            config.grpc_listen = grpc_listen;
        }
        if let Some(app_dir) = self.app_dir {
            config.app_dir = app_dir;
        }
        if self.default_seeder.is_some() {
            config.default_seeder = self.default_seeder;
        }
        if self.known_peers.is_some() {
            config.known_peers = self.known_peers;
        }
        if self.profile.is_some() {
            config.profile = self.profile;
        }
        if self.net_suffix.is_some() {
            config.net_suffix = self.net_suffix;
        }
        if self.filter_services {
            config.filter_services = true;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if self.nologfiles {
            config.nologfiles = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;
    let params = config.network_params();

    let app_dir = config.app_dir().join(params.network_name());
    std::fs::create_dir_all(&app_dir)?;

    let log_file = app_dir.join("dnsseeder.log");
    init_logging(
        &config.log_level,
        if config.nologfiles {
            None
        } else {
            Some(log_file.as_path())
        },
    )?;
    info!("Version {}", version::version());
    info!("Serving network {} from {}", params.network_name(), app_dir.display());

    let shutdown = Arc::new(AtomicBool::new(false));
    let manager = Arc::new(AddressManager::new(
        &app_dir,
        params.default_port(),
        config.filter_services,
    )?);
    let manager_handle = manager.clone().start();

    // The default seeder enters the registry up front so the first batch
    // probes it; its failure is the one fatal per-peer error.
    let default_seeder = config
        .default_seeder
        .as_deref()
        .and_then(|raw| resolve_default_seeder(raw, params.default_port()));
    if let Some((ip, port)) = default_seeder {
        info!("Default seeder: {}:{}", ip, port);
        manager.add_addresses(
            vec![NetAddress::with_services(ip, port, SF_NODE_NETWORK)],
            true,
        );
    }

    let config = Arc::new(config);

    if let Some(port) = config.profile {
        let profiling = ProfilingServer::new(port, manager.clone());
        tokio::spawn(async move {
            if let Err(e) = profiling.run().await {
                error!("Profiling server error: {}", e);
            }
        });
    }

    let crawler = Crawler::new(
        manager.clone(),
        config.clone(),
        params,
        default_seeder,
        shutdown.clone(),
    );
    let crawler_handle = tokio::spawn(async move {
        if let Err(e) = crawler.run().await {
            error!("Crawler error: {}", e);
        }
    });

    let dns_server = DnsServer::new(
        &config.host,
        &config.nameserver,
        &config.listen,
        manager.clone(),
        shutdown.clone(),
    )?;
    let dns_handle = tokio::spawn(async move {
        if let Err(e) = dns_server.run().await {
            error!("DNS server error: {}", e);
        }
    });

    let (grpc_shutdown_tx, grpc_shutdown_rx) = oneshot::channel();
    let grpc_server = GrpcServer::new(manager.clone());
    let grpc_listen = config.grpc_listen.clone();
    let grpc_handle = tokio::spawn(async move {
        if let Err(e) = grpc_server.run(&grpc_listen, grpc_shutdown_rx).await {
            error!("gRPC server error: {}", e);
        }
    });

    signal::ctrl_c().await?;
    info!("Gracefully shutting down the seeder...");

    shutdown.store(true, Ordering::SeqCst);
    let _ = grpc_shutdown_tx.send(());
    manager.shutdown().await;

    for (name, handle) in [
        ("crawler", crawler_handle),
        ("DNS server", dns_handle),
        ("gRPC server", grpc_handle),
        ("address manager", manager_handle),
    ] {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    info!("Seeder shutdown complete");
    Ok(())
}
