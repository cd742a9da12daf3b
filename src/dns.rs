use crate::constants::{DNS_BUFFER_SIZE, DNS_NS_TTL, DNS_READ_TIMEOUT, DNS_RECORD_TTL};
use crate::manager::AddressManager;
use crate::types::{SubnetworkId, SF_NODE_NETWORK};
use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use trust_dns_proto::op::{Message, MessageType, OpCode, ResponseCode};
use trust_dns_proto::rr::rdata::{A, AAAA, NS};
use trust_dns_proto::rr::{Name, RData, Record, RecordType};
use trust_dns_proto::serialize::binary::{BinEncodable, BinEncoder};

/// Filters a query carries in its subdomain labels:
/// `[n<subnetwork-hex>.][x<services-decimal>.]<zone>`.
#[derive(Debug, PartialEq, Eq)]
struct QueryFilters {
    services: u64,
    subnetwork_id: Option<SubnetworkId>,
}

/// Authoritative DNS responder. Serves A/AAAA answers drawn from the good
/// view of the address manager, plus the zone's NS record.
pub struct DnsServer {
    hostname: String,
    zone_name: Name,
    ns_name: Name,
    listen: String,
    manager: Arc<AddressManager>,
    shutdown: Arc<AtomicBool>,
}

impl DnsServer {
    pub fn new(
        hostname: &str,
        nameserver: &str,
        listen: &str,
        manager: Arc<AddressManager>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut hostname = hostname.to_ascii_lowercase();
        if !hostname.ends_with('.') {
            hostname.push('.');
        }
        let mut nameserver = nameserver.to_ascii_lowercase();
        if !nameserver.ends_with('.') {
            nameserver.push('.');
        }

        let zone_name =
            Name::from_str(&hostname).with_context(|| format!("invalid host {:?}", hostname))?;
        let ns_name = Name::from_str(&nameserver)
            .with_context(|| format!("invalid nameserver {:?}", nameserver))?;

        Ok(Self {
            hostname,
            zone_name,
            ns_name,
            listen: listen.to_string(),
            manager,
            shutdown,
        })
    }

    /// Binds the UDP socket and serves until the shutdown flag is set. The
    /// read deadline is short so the flag is polled about once a second.
    pub async fn run(self) -> Result<()> {
        let socket = Arc::new(
            UdpSocket::bind(&self.listen)
                .await
                .with_context(|| format!("failed to bind DNS listener on {}", self.listen))?,
        );
        info!("DNS server listening on {}", self.listen);

        let server = Arc::new(self);
        let mut buffer = [0u8; DNS_BUFFER_SIZE];
        loop {
            match tokio::time::timeout(DNS_READ_TIMEOUT, socket.recv_from(&mut buffer)).await {
                Err(_) => {
                    if server.shutdown.load(Ordering::SeqCst) {
                        info!("DNS server shutdown");
                        return Ok(());
                    }
                }
                Ok(Err(e)) => warn!("DNS read error: {}", e),
                Ok(Ok((len, src))) => {
                    // The handler owns a copy so the buffer can be reused
                    // for the next read immediately.
                    let datagram = buffer[..len].to_vec();
                    let server = server.clone();
                    let socket = socket.clone();
                    tokio::spawn(async move {
                        server.handle_request(&socket, &datagram, src).await;
                    });
                }
            }
        }
    }

    async fn handle_request(&self, socket: &UdpSocket, datagram: &[u8], src: SocketAddr) {
        let Some(response) = self.build_response(datagram, src) else {
            return;
        };
        if let Err(e) = socket.send_to(&response, src).await {
            warn!("{}: failed to write response: {}", src, e);
        }
    }

    /// Parses one request and builds the wire response. Anything malformed,
    /// out of zone, or unsupported is dropped with a log line; no error
    /// responses are emitted.
    fn build_response(&self, datagram: &[u8], src: SocketAddr) -> Option<Vec<u8>> {
        let request = match Message::from_vec(datagram) {
            Ok(request) => request,
            Err(e) => {
                debug!("{}: invalid dns message: {}", src, e);
                return None;
            }
        };
        if request.queries().len() != 1 {
            debug!("{} sent {} questions", src, request.queries().len());
            return None;
        }
        let query = &request.queries()[0];

        let qname = query.name().to_string().to_ascii_lowercase();
        if !qname.ends_with(&self.hostname) {
            debug!("{}: invalid name: {}", src, qname);
            return None;
        }

        let prefix = &qname[..qname.len() - self.hostname.len()];
        let filters = match parse_filters(prefix) {
            Ok(filters) => filters,
            Err(reason) => {
                debug!("{}: {}: {}", src, qname, reason);
                return None;
            }
        };

        let mut response = Message::new();
        response.set_id(request.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_response_code(ResponseCode::NoError);
        response.set_authoritative(true);
        response.set_recursion_desired(request.recursion_desired());
        response.set_recursion_available(false);
        response.add_query(query.clone());

        let qtype = query.query_type();
        match qtype {
            RecordType::A | RecordType::AAAA => {
                response.add_name_server(self.ns_record(self.zone_name.clone()));

                let include_all = filters.subnetwork_id.is_none();
                let addrs = self.manager.good_addresses(
                    u16::from(qtype),
                    filters.services,
                    include_all,
                    filters.subnetwork_id,
                );
                debug!(
                    "{}: query {:?} for services {}: {} answers",
                    src,
                    qtype,
                    filters.services,
                    addrs.len()
                );

                for addr in addrs {
                    let rdata = match addr.ip {
                        IpAddr::V4(ip) => RData::A(A(ip)),
                        IpAddr::V6(ip) => RData::AAAA(AAAA(ip)),
                    };
                    response.add_answer(Record::from_rdata(
                        query.name().clone(),
                        DNS_RECORD_TTL,
                        rdata,
                    ));
                }
            }
            RecordType::NS => {
                response.add_answer(self.ns_record(query.name().clone()));
            }
            other => {
                debug!("{}: invalid qtype: {:?}", src, other);
                return None;
            }
        }

        let mut bytes = Vec::with_capacity(DNS_BUFFER_SIZE);
        let mut encoder = BinEncoder::new(&mut bytes);
        if let Err(e) = response.emit(&mut encoder) {
            warn!("{}: failed to pack response: {}", src, e);
            return None;
        }
        Some(bytes)
    }

    fn ns_record(&self, owner: Name) -> Record {
        Record::from_rdata(owner, DNS_NS_TTL, RData::NS(NS(self.ns_name.clone())))
    }
}

/// Parses the labels preceding the zone. An optional `n<hex>` label selects
/// a specific subnetwork and must come first; an optional `x<decimal>` label
/// carries the wanted-services bitset. Anything else rejects the query.
fn parse_filters(prefix: &str) -> std::result::Result<QueryFilters, String> {
    let labels: Vec<&str> = prefix.split('.').filter(|l| !l.is_empty()).collect();

    let mut services = SF_NODE_NETWORK;
    let mut subnetwork_id = None;
    let mut idx = 0;

    if idx < labels.len() && labels[idx].len() > 1 && labels[idx].starts_with('n') {
        subnetwork_id = Some(
            SubnetworkId::from_str(&labels[idx][1..]).map_err(|e| e.to_string())?,
        );
        idx += 1;
    }
    if idx < labels.len() && labels[idx].len() > 1 && labels[idx].starts_with('x') {
        services = labels[idx][1..]
            .parse::<u64>()
            .map_err(|e| format!("bad services label: {}", e))?;
        idx += 1;
    }
    if idx != labels.len() {
        return Err(format!("unknown label {:?}", labels[idx]));
    }

    Ok(QueryFilters {
        services,
        subnetwork_id,
    })
}
