use crate::constants::{CONNECTION_TIMEOUT, MAX_FRAME_SIZE, NODE_TIMEOUT, PROTOCOL_VERSION};
use crate::errors::{Result, SeederError};
use crate::types::{
    AddressesMessage, NetworkMessage, RequestAddressesMessage, VersionMessage, CMD_ADDRESSES,
    CMD_VERACK, CMD_VERSION,
};
use crate::version;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// Client side of the peer wire protocol: dials a node, runs the
/// version/verack handshake, and requests its known addresses.
pub struct NetAdapter {
    network: String,
}

impl NetAdapter {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }

    /// Dials `address` and completes the handshake. Returns the open routes
    /// and the peer's version message.
    pub async fn connect(&self, address: &str) -> Result<(Routes, VersionMessage)> {
        let stream = timeout(CONNECTION_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| SeederError::Timeout {
                peer: address.to_string(),
                command: "connect",
            })?
            .map_err(|source| SeederError::Connect {
                peer: address.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let mut routes = Routes::new(stream, address.to_string());
        let peer_version = self.handshake(&mut routes).await?;
        Ok((routes, peer_version))
    }

    async fn handshake(&self, routes: &mut Routes) -> Result<VersionMessage> {
        let local_version = VersionMessage {
            protocol_version: PROTOCOL_VERSION,
            network: self.network.clone(),
            services: 0,
            timestamp: unix_now(),
            id: Uuid::new_v4().as_bytes().to_vec(),
            user_agent: version::user_agent(),
            disable_relay_tx: true,
            subnetwork_id: None,
        };
        routes.send(&NetworkMessage::version(&local_version)?).await?;

        let peer_version: VersionMessage =
            routes.wait_for_message(CMD_VERSION).await?.decode_payload()?;
        if peer_version.network != self.network {
            return Err(SeederError::Handshake {
                peer: routes.peer().to_string(),
                reason: format!(
                    "network {:?} does not match {:?}",
                    peer_version.network, self.network
                ),
            });
        }
        debug!(
            "Handshake completed with {}: {}",
            routes.peer(),
            peer_version.user_agent
        );

        routes.send(&NetworkMessage::verack()).await?;
        routes.wait_for_message(CMD_VERACK).await?;

        Ok(peer_version)
    }

    /// Asks the peer for every address it knows, across all subnetworks.
    pub async fn request_addresses(&self, routes: &mut Routes) -> Result<AddressesMessage> {
        let request = RequestAddressesMessage {
            include_all_subnetworks: true,
            subnetwork_id: None,
        };
        routes.send(&NetworkMessage::request_addresses(&request)?).await?;
        routes.wait_for_message(CMD_ADDRESSES).await?.decode_payload()
    }
}

/// An open message exchange with one peer. Frames are a 4-byte big-endian
/// length prefix followed by a bincode-encoded `NetworkMessage`. The
/// underlying stream closes when the routes are dropped.
#[derive(Debug)]
pub struct Routes {
    stream: TcpStream,
    peer: String,
}

impl Routes {
    pub fn new(stream: TcpStream, peer: String) -> Self {
        Self { stream, peer }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, message: &NetworkMessage) -> Result<()> {
        let frame = bincode::serialize(message).map_err(|e| SeederError::Wire(e.to_string()))?;
        if frame.len() > MAX_FRAME_SIZE {
            return Err(SeederError::Wire(format!(
                "outgoing frame of {} bytes exceeds the limit",
                frame.len()
            )));
        }
        self.stream.write_all(&(frame.len() as u32).to_be_bytes()).await?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<NetworkMessage> {
        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(SeederError::Wire(format!(
                "incoming frame of {} bytes exceeds the limit",
                len
            )));
        }
        let mut frame = vec![0u8; len];
        self.stream.read_exact(&mut frame).await?;
        bincode::deserialize(&frame).map_err(|e| SeederError::Wire(e.to_string()))
    }

    /// Waits up to the node timeout for a message of the given type,
    /// skipping anything else the peer sends in between.
    pub async fn wait_for_message(&mut self, command: &'static str) -> Result<NetworkMessage> {
        let result = timeout(NODE_TIMEOUT, self.wait_for(command)).await;
        match result {
            Ok(result) => result,
            Err(_) => Err(SeederError::Timeout {
                peer: self.peer.clone(),
                command,
            }),
        }
    }

    async fn wait_for(&mut self, command: &str) -> Result<NetworkMessage> {
        loop {
            let message = self.recv().await?;
            if message.command == command {
                return Ok(message);
            }
            debug!("Ignoring {} message from {}", message.command, self.peer);
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NetAddress, SF_NODE_NETWORK};
    use tokio::net::TcpListener;

    const NETWORK: &str = "kaspa-mainnet";

    fn peer_version(network: &str) -> VersionMessage {
        VersionMessage {
            protocol_version: PROTOCOL_VERSION,
            network: network.to_string(),
            services: SF_NODE_NETWORK,
            timestamp: unix_now(),
            id: Uuid::new_v4().as_bytes().to_vec(),
            user_agent: "/kaspad:0.12.0/".to_string(),
            disable_relay_tx: false,
            subnetwork_id: None,
        }
    }

    /// Accepts one connection and plays the server side of the handshake,
    /// then answers a single getaddr with the given addresses.
    async fn fake_peer(listener: TcpListener, network: &str, addresses: Option<Vec<NetAddress>>) {
        let (stream, addr) = listener.accept().await.unwrap();
        let mut routes = Routes::new(stream, addr.to_string());

        routes.wait_for_message(CMD_VERSION).await.unwrap();
        routes
            .send(&NetworkMessage::version(&peer_version(network)).unwrap())
            .await
            .unwrap();
        routes.wait_for_message(CMD_VERACK).await.unwrap();
        routes.send(&NetworkMessage::verack()).await.unwrap();

        if let Some(addresses) = addresses {
            routes.wait_for_message(crate::types::CMD_GET_ADDRESSES).await.unwrap();
            routes
                .send(&NetworkMessage::addresses(&AddressesMessage { addresses }).unwrap())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn connect_and_request_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap();
        let advertised = vec![
            NetAddress::with_services("1.2.3.4".parse().unwrap(), 16111, SF_NODE_NETWORK),
            NetAddress::with_services("2.3.4.5".parse().unwrap(), 16111, SF_NODE_NETWORK),
        ];
        let server = tokio::spawn(fake_peer(listener, NETWORK, Some(advertised.clone())));

        let adapter = NetAdapter::new(NETWORK);
        let (mut routes, version) = adapter.connect(&peer_addr.to_string()).await.unwrap();
        assert_eq!(version.user_agent, "/kaspad:0.12.0/");

        let response = adapter.request_addresses(&mut routes).await.unwrap();
        assert_eq!(response.addresses, advertised);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_rejects_wrong_network() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap();
        let server = tokio::spawn(fake_peer(listener, "kaspa-testnet-11", None));

        let adapter = NetAdapter::new(NETWORK);
        let err = adapter.connect(&peer_addr.to_string()).await.unwrap_err();
        assert!(matches!(err, SeederError::Handshake { .. }));

        server.abort();
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap();
        // Accept and say nothing.
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(NODE_TIMEOUT * 2).await;
        });

        let adapter = NetAdapter::new(NETWORK);
        let err = adapter.connect(&peer_addr.to_string()).await.unwrap_err();
        assert!(matches!(
            err,
            SeederError::Timeout {
                command: CMD_VERSION,
                ..
            }
        ));

        server.abort();
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Claim a frame far past the limit.
            stream
                .write_all(&((MAX_FRAME_SIZE as u32 + 1).to_be_bytes()))
                .await
                .unwrap();
            tokio::time::sleep(NODE_TIMEOUT).await;
        });

        let stream = TcpStream::connect(peer_addr).await.unwrap();
        let mut routes = Routes::new(stream, peer_addr.to_string());
        let err = routes.recv().await.unwrap_err();
        assert!(matches!(err, SeederError::Wire(_)));

        server.abort();
    }
}
