use crate::config::{Config, NetworkParams};
use crate::constants::{CRAWLER_IDLE_TICKS, MAX_CONCURRENT_POLLS};
use crate::dns_seed_discovery::DnsSeedDiscovery;
use crate::errors::Result as WireResult;
use crate::manager::AddressManager;
use crate::netadapter::NetAdapter;
use crate::types::{NetAddress, SF_NODE_NETWORK};
use anyhow::Result;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// The crawler drives every known node toward a recent success or failure
/// outcome: it pulls stale candidates from the address manager, probes each
/// one concurrently, and feeds returned addresses back in.
pub struct Crawler {
    manager: Arc<AddressManager>,
    net_adapter: Arc<NetAdapter>,
    config: Arc<Config>,
    params: NetworkParams,
    default_seeder: Option<(IpAddr, u16)>,
    shutdown: Arc<AtomicBool>,
    semaphore: Arc<Semaphore>,
}

impl Crawler {
    pub fn new(
        manager: Arc<AddressManager>,
        config: Arc<Config>,
        params: NetworkParams,
        default_seeder: Option<(IpAddr, u16)>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            manager,
            net_adapter: Arc::new(NetAdapter::new(params.network_name())),
            config,
            params,
            default_seeder,
            shutdown,
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_POLLS)),
        }
    }

    pub async fn run(self) -> Result<()> {
        self.seed_known_peers();
        self.creep().await
    }

    /// Inserts operator-supplied peers and marks them attempted and good, so
    /// they survive the first prune and show up in answers without waiting
    /// for a handshake.
    fn seed_known_peers(&self) {
        let Some(raw) = self.config.known_peers.as_deref() else {
            return;
        };

        let peers: Vec<NetAddress> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| match s.parse::<SocketAddr>() {
                Ok(addr) => Some(NetAddress::with_services(
                    addr.ip(),
                    addr.port(),
                    SF_NODE_NETWORK,
                )),
                Err(e) => {
                    warn!("Invalid known peer address {:?}: {}", s, e);
                    None
                }
            })
            .collect();
        if peers.is_empty() {
            return;
        }

        let added = self.manager.add_addresses(peers.clone(), true);
        info!("Added {} known peers", added);

        for peer in peers {
            self.manager.attempt(&peer.ip);
            self.manager.good(&peer.ip, None);
        }
    }

    /// The main crawl loop. Runs until the shutdown flag is set.
    async fn creep(&self) -> Result<()> {
        loop {
            let mut peers = self.manager.addresses();
            if peers.is_empty() && self.manager.address_count() == 0 {
                DnsSeedDiscovery::seed_from_dns(self.params, &self.manager).await;
                peers = self.manager.addresses();
            }

            if peers.is_empty() {
                info!("No stale addresses -- sleeping for 10 minutes");
                for _ in 0..CRAWLER_IDLE_TICKS {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if self.shutdown.load(Ordering::SeqCst) {
                        info!("Creep task shutdown");
                        return Ok(());
                    }
                }
                continue;
            }

            let mut batch = Vec::with_capacity(peers.len());
            let mut interrupted = false;
            for addr in peers {
                if self.shutdown.load(Ordering::SeqCst) {
                    interrupted = true;
                    break;
                }

                let permit = match self.semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let manager = self.manager.clone();
                let net_adapter = self.net_adapter.clone();
                let fatal = self.is_default_seeder(&addr);

                batch.push(tokio::spawn(async move {
                    let result = poll_peer(&net_adapter, &manager, &addr).await;
                    drop(permit);
                    if let Err(e) = result {
                        warn!("{}", e);
                        if fatal {
                            error!("Failed to poll default seeder {}", addr);
                            std::process::exit(1);
                        }
                    }
                }));
            }

            if interrupted {
                info!("Waiting for in-flight probes to terminate");
            }
            futures::future::join_all(batch).await;
            if interrupted || self.shutdown.load(Ordering::SeqCst) {
                info!("Creep task shutdown");
                return Ok(());
            }
        }
    }

    /// Whether this candidate is the operator-configured bootstrap peer,
    /// whose probe failure is the one fatal per-peer error.
    pub fn is_default_seeder(&self, addr: &NetAddress) -> bool {
        self.default_seeder
            .map_or(false, |(ip, port)| addr.ip == ip && addr.port == port)
    }
}

/// One probe: register the attempt, dial, handshake, request addresses,
/// feed them back, and mark the node good. The routes close on scope exit
/// even when any step fails.
async fn poll_peer(
    net_adapter: &NetAdapter,
    manager: &AddressManager,
    addr: &NetAddress,
) -> WireResult<()> {
    manager.attempt(&addr.ip);

    let peer_address = addr.to_string();
    let (mut routes, peer_version) = net_adapter.connect(&peer_address).await?;
    let response = net_adapter.request_addresses(&mut routes).await?;

    let sent = response.addresses.len();
    let added = manager.add_addresses(response.addresses, false);
    info!(
        "Peer {} ({}) sent {} addresses, {} new",
        peer_address, peer_version.user_agent, sent, added
    );

    manager.good(&addr.ip, peer_version.subnetwork_id);
    Ok(())
}

/// Resolves the `--default-seeder` value: `ip:port` is honored as given, a
/// bare IP gets the network default port, and a hostname resolves to its
/// first address. Resolution failures are logged and ignored.
pub fn resolve_default_seeder(raw: &str, default_port: u16) -> Option<(IpAddr, u16)> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some((addr.ip(), addr.port()));
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some((ip, default_port));
    }
    match (raw, default_port).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().map(|addr| (addr.ip(), default_port)),
        Err(e) => {
            warn!("Failed to resolve seed host {:?}: {}, ignoring", raw, e);
            None
        }
    }
}
