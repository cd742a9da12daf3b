use crate::errors::{Result, SeederError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::SystemTime;

/// Service bit advertised by peers that relay network traffic.
pub const SF_NODE_NETWORK: u64 = 1;

/// Length of a subnetwork identifier in bytes.
pub const SUBNETWORK_ID_SIZE: usize = 20;

// Wire message commands.
pub const CMD_VERSION: &str = "version";
pub const CMD_VERACK: &str = "verack";
pub const CMD_GET_ADDRESSES: &str = "getaddr";
pub const CMD_ADDRESSES: &str = "addr";

/// RFC-3339 encoding for `SystemTime` fields. `UNIX_EPOCH` is the zero
/// value and round-trips as `1970-01-01T00:00:00+00:00`.
pub mod rfc3339 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::SystemTime;

    pub fn serialize<S>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let dt: DateTime<Utc> = (*t).into();
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let dt = DateTime::parse_from_rfc3339(&s).map_err(serde::de::Error::custom)?;
        Ok(dt.with_timezone(&Utc).into())
    }
}

/// A network endpoint as peers advertise it: IP, port, service bits, and the
/// time the network last observed it. The JSON field names match the peers
/// snapshot format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddress {
    #[serde(rename = "IP")]
    pub ip: IpAddr,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Services")]
    pub services: u64,
    #[serde(rename = "Timestamp", with = "rfc3339")]
    pub timestamp: SystemTime,
}

impl NetAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self::with_services(ip, port, 0)
    }

    pub fn with_services(ip: IpAddr, port: u16, services: u64) -> Self {
        Self {
            ip,
            port,
            services,
            timestamp: SystemTime::now(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for NetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.socket_addr().fmt(f)
    }
}

/// Opaque 20-byte identifier of the subnetwork a peer serves. Hex-encoded in
/// text contexts (DNS labels, the peers snapshot); raw bytes on the RPC wire.
/// `None` everywhere means the peer serves all subnetworks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetworkId([u8; SUBNETWORK_ID_SIZE]);

impl SubnetworkId {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SUBNETWORK_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| SeederError::Subnetwork(format!("expected {} bytes, got {}", SUBNETWORK_ID_SIZE, bytes.len())))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SUBNETWORK_ID_SIZE] {
        &self.0
    }
}

impl FromStr for SubnetworkId {
    type Err = SeederError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| SeederError::Subnetwork(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for SubnetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for SubnetworkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SubnetworkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// First message of the wire handshake, sent by both sides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMessage {
    pub protocol_version: u32,
    pub network: String,
    pub services: u64,
    pub timestamp: i64,
    pub id: Vec<u8>,
    pub user_agent: String,
    pub disable_relay_tx: bool,
    pub subnetwork_id: Option<SubnetworkId>,
}

/// Asks a peer for the addresses it knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAddressesMessage {
    pub include_all_subnetworks: bool,
    pub subnetwork_id: Option<SubnetworkId>,
}

/// The peer's answer to `getaddr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressesMessage {
    pub addresses: Vec<NetAddress>,
}

/// Envelope for every frame on the wire: a command string plus a
/// bincode-encoded payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub command: String,
    pub payload: Vec<u8>,
}

impl NetworkMessage {
    fn encode<T: Serialize>(command: &str, body: &T) -> Result<Self> {
        let payload = bincode::serialize(body).map_err(|e| SeederError::Wire(e.to_string()))?;
        Ok(Self {
            command: command.to_string(),
            payload,
        })
    }

    pub fn version(version: &VersionMessage) -> Result<Self> {
        Self::encode(CMD_VERSION, version)
    }

    pub fn verack() -> Self {
        Self {
            command: CMD_VERACK.to_string(),
            payload: Vec::new(),
        }
    }

    pub fn request_addresses(request: &RequestAddressesMessage) -> Result<Self> {
        Self::encode(CMD_GET_ADDRESSES, request)
    }

    pub fn addresses(addresses: &AddressesMessage) -> Result<Self> {
        Self::encode(CMD_ADDRESSES, addresses)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        bincode::deserialize(&self.payload).map_err(|e| SeederError::Wire(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn subnetwork_id_hex_round_trip() {
        let hex = "00000000000000000000000000000000000000aa";
        let id: SubnetworkId = hex.parse().unwrap();
        assert_eq!(id.to_string(), hex);
        assert_eq!(id.as_bytes()[19], 0xaa);
    }

    #[test]
    fn subnetwork_id_rejects_bad_input() {
        assert!("zz".parse::<SubnetworkId>().is_err());
        assert!("aabb".parse::<SubnetworkId>().is_err());
        assert!(SubnetworkId::from_bytes(&[0u8; 19]).is_err());
        assert!(SubnetworkId::from_bytes(&[0u8; 20]).is_ok());
    }

    #[test]
    fn net_address_uses_snapshot_field_names() {
        let addr = NetAddress::with_services(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 16111, 1);
        let value = serde_json::to_value(&addr).unwrap();
        assert_eq!(value["IP"], "1.2.3.4");
        assert_eq!(value["Port"], 16111);
        assert_eq!(value["Services"], 1);
        assert!(value["Timestamp"].is_string());
    }

    #[test]
    fn network_message_payload_round_trip() {
        let request = RequestAddressesMessage {
            include_all_subnetworks: true,
            subnetwork_id: None,
        };
        let msg = NetworkMessage::request_addresses(&request).unwrap();
        assert_eq!(msg.command, CMD_GET_ADDRESSES);
        let decoded: RequestAddressesMessage = msg.decode_payload().unwrap();
        assert!(decoded.include_all_subnetworks);
        assert!(decoded.subnetwork_id.is_none());
    }

    #[test]
    fn version_message_round_trip_keeps_subnetwork() {
        let version = VersionMessage {
            protocol_version: 5,
            network: "kaspa-mainnet".to_string(),
            services: SF_NODE_NETWORK,
            timestamp: 1_700_000_000,
            id: vec![1, 2, 3],
            user_agent: "/dnsseeder:0.1.0/".to_string(),
            disable_relay_tx: true,
            subnetwork_id: Some(SubnetworkId::from_bytes(&[7u8; 20]).unwrap()),
        };
        let msg = NetworkMessage::version(&version).unwrap();
        let decoded: VersionMessage = msg.decode_payload().unwrap();
        assert_eq!(decoded.network, "kaspa-mainnet");
        assert_eq!(decoded.subnetwork_id, version.subnetwork_id);
    }
}
