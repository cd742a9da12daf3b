use crate::config::NetworkParams;
use crate::manager::AddressManager;
use crate::types::{NetAddress, SF_NODE_NETWORK};
use anyhow::{Context, Result};
use std::net::ToSocketAddrs;
use tracing::{debug, info, warn};

/// Cold-start bootstrap: resolves the network's upstream DNS seeds and feeds
/// whatever they return into the address manager.
pub struct DnsSeedDiscovery;

impl DnsSeedDiscovery {
    pub async fn seed_from_dns(params: NetworkParams, manager: &AddressManager) {
        debug!("Attempting to seed from DNS");

        for seed_server in params.dns_seeds() {
            match Self::query_seed_server(seed_server, params.default_port()).await {
                Ok(addresses) if !addresses.is_empty() => {
                    info!(
                        "Discovered {} addresses from DNS seeder {}",
                        addresses.len(),
                        seed_server
                    );
                    let added = manager.add_addresses(addresses, false);
                    debug!("{} new from {}", added, seed_server);
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to query DNS seeder {}: {}", seed_server, e),
            }
        }
    }

    /// Resolves one seed hostname. The system resolver call is blocking, so
    /// it runs off the async worker threads.
    pub async fn query_seed_server(
        seed_server: &str,
        default_port: u16,
    ) -> Result<Vec<NetAddress>> {
        let host = seed_server.to_string();
        let addrs = tokio::task::spawn_blocking(move || {
            (host.as_str(), default_port)
                .to_socket_addrs()
                .map(|addrs| addrs.collect::<Vec<_>>())
        })
        .await
        .context("seed lookup task failed")??;

        Ok(addrs
            .into_iter()
            .map(|addr| NetAddress::with_services(addr.ip(), addr.port(), SF_NODE_NETWORK))
            .collect())
    }
}
