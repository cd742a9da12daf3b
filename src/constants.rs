use std::time::Duration;

// Network defaults.

/// Default peer-to-peer port on mainnet.
pub const MAINNET_DEFAULT_PORT: u16 = 16111;
/// Default peer-to-peer port on testnet-11.
pub const TESTNET_11_DEFAULT_PORT: u16 = 16311;

/// Wire protocol version advertised during the handshake.
pub const PROTOCOL_VERSION: u32 = 5;

// DNS query types the registry understands.

pub const QTYPE_A: u16 = 1;
pub const QTYPE_AAAA: u16 = 28;

// Address manager tunables.

/// Maximum number of addresses a single DNS response or `good` query carries.
pub const DEFAULT_MAX_ADDRESSES: usize = 16;
/// Candidate batches run ahead of the answer cap to keep the probe pool busy.
pub const ADDRESS_BATCH_FACTOR: usize = 8;
/// A node whose last success is older than this needs re-probing.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Nodes unseen or unreachable for this long are deleted.
pub const PRUNE_EXPIRE_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);
/// How often the pruner runs.
pub const PRUNE_ADDRESS_INTERVAL: Duration = Duration::from_secs(60);
/// How often the address cache is dumped to disk.
pub const DUMP_ADDRESS_INTERVAL: Duration = Duration::from_secs(30);

// Crawler tunables.

/// TCP dial timeout for a probe.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout waiting for a single message from a node.
pub const NODE_TIMEOUT: Duration = Duration::from_secs(3);
/// Upper bound on concurrently running probes.
pub const MAX_CONCURRENT_POLLS: usize = 100;
/// Idle sleep is 1-second ticks so shutdown is noticed promptly.
pub const CRAWLER_IDLE_TICKS: usize = 600;

// DNS server tunables.

/// Read deadline on the UDP socket; the shutdown flag is polled at this rate.
pub const DNS_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// DNS over UDP payload limit.
pub const DNS_BUFFER_SIZE: usize = 512;
/// TTL of answer records.
pub const DNS_RECORD_TTL: u32 = 30;
/// TTL of the NS record.
pub const DNS_NS_TTL: u32 = 86400;

// Wire framing.

/// Largest frame a peer may send us.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
