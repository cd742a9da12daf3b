use crate::constants::{QTYPE_A, QTYPE_AAAA};
use crate::manager::AddressManager;
use crate::pb::peer_service_server::{PeerService, PeerServiceServer};
use crate::pb::{GetPeersListRequest, GetPeersListResponse, NetAddress as ProtoNetAddress};
use crate::types::{NetAddress, SubnetworkId};
use anyhow::{Context, Result};
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::sync::oneshot;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info};

/// gRPC face of the registry: one unary method returning the current good
/// addresses in wire form.
pub struct PeerListService {
    manager: Arc<AddressManager>,
}

impl PeerListService {
    pub fn new(manager: Arc<AddressManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl PeerService for PeerListService {
    async fn get_peers_list(
        &self,
        request: Request<GetPeersListRequest>,
    ) -> std::result::Result<Response<GetPeersListResponse>, Status> {
        let request = request.into_inner();

        let subnetwork_id = if request.subnetwork_id.is_empty() {
            None
        } else {
            Some(
                SubnetworkId::from_bytes(&request.subnetwork_id)
                    .map_err(|e| Status::invalid_argument(e.to_string()))?,
            )
        };

        let mut addresses = self.manager.good_addresses(
            QTYPE_A,
            request.service_flag,
            request.include_all_subnetworks,
            subnetwork_id,
        );
        addresses.extend(self.manager.good_addresses(
            QTYPE_AAAA,
            request.service_flag,
            request.include_all_subnetworks,
            subnetwork_id,
        ));
        debug!("GetPeersList returning {} addresses", addresses.len());

        Ok(Response::new(GetPeersListResponse {
            addresses: addresses.iter().map(to_protobuf_address).collect(),
        }))
    }
}

fn to_protobuf_address(address: &NetAddress) -> ProtoNetAddress {
    let ip = match address.ip {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    ProtoNetAddress {
        timestamp: address
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64,
        services: address.services,
        ip,
        port: u32::from(address.port),
    }
}

pub struct GrpcServer {
    manager: Arc<AddressManager>,
}

impl GrpcServer {
    pub fn new(manager: Arc<AddressManager>) -> Self {
        Self { manager }
    }

    /// Serves until the shutdown channel fires. Method failures are returned
    /// to the caller as their status; the server keeps running.
    pub async fn run(self, listen: &str, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        let addr = listen
            .to_socket_addrs()
            .with_context(|| format!("invalid gRPC listen address {:?}", listen))?
            .next()
            .with_context(|| format!("no usable gRPC listen address for {:?}", listen))?;
        info!("gRPC server listening on {}", addr);

        Server::builder()
            .add_service(PeerServiceServer::new(PeerListService::new(self.manager)))
            .serve_with_shutdown(addr, async {
                let _ = shutdown_rx.await;
            })
            .await?;

        info!("gRPC server shutdown");
        Ok(())
    }
}
