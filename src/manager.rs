use crate::constants::{
    ADDRESS_BATCH_FACTOR, DEFAULT_MAX_ADDRESSES, DEFAULT_STALE_TIMEOUT, DUMP_ADDRESS_INTERVAL,
    PRUNE_ADDRESS_INTERVAL, PRUNE_EXPIRE_TIMEOUT, QTYPE_A, QTYPE_AAAA,
};
use crate::types::{rfc3339, NetAddress, SubnetworkId};
use anyhow::Result;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const PEERS_FILENAME: &str = "nodes.json";

/// One known peer. Field names follow the on-disk snapshot format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "Addr")]
    pub address: NetAddress,
    #[serde(rename = "LastAttempt", with = "rfc3339")]
    pub last_attempt: SystemTime,
    #[serde(rename = "LastSuccess", with = "rfc3339")]
    pub last_success: SystemTime,
    #[serde(rename = "LastSeen", with = "rfc3339")]
    pub last_seen: SystemTime,
    #[serde(rename = "SubnetworkID")]
    pub subnetwork_id: Option<SubnetworkId>,
}

impl Node {
    fn new(address: NetAddress) -> Self {
        Self {
            address,
            last_attempt: UNIX_EPOCH,
            last_success: UNIX_EPOCH,
            last_seen: SystemTime::now(),
            subnetwork_id: None,
        }
    }

    /// Attempted at least once and never answered. Eligible for pruning.
    fn tried_and_failed(&self) -> bool {
        self.last_attempt != UNIX_EPOCH && self.last_success == UNIX_EPOCH
    }
}

/// The address manager is the single source of truth for known peers.
///
/// The node table is keyed by the IP string alone; a second observation of
/// the same IP updates the existing entry in place. All reads hold the
/// shared side of one reader-writer lock, all mutations the exclusive side.
pub struct AddressManager {
    nodes: RwLock<HashMap<String, Node>>,
    peers_file: PathBuf,
    default_port: u16,
    filter_services: bool,
    quit_tx: mpsc::Sender<()>,
    quit_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl AddressManager {
    pub fn new(app_dir: &Path, default_port: u16, filter_services: bool) -> Result<Self> {
        std::fs::create_dir_all(app_dir)?;
        let (quit_tx, quit_rx) = mpsc::channel(1);

        let manager = Self {
            nodes: RwLock::new(HashMap::new()),
            peers_file: app_dir.join(PEERS_FILENAME),
            default_port,
            filter_services,
            quit_tx,
            quit_rx: Mutex::new(Some(quit_rx)),
        };

        manager.deserialize_peers();

        Ok(manager)
    }

    /// Spawns the background handler that dumps and prunes the node table.
    /// Call once after creation; the returned handle completes after the
    /// final snapshot triggered by `shutdown`.
    pub fn start(self: std::sync::Arc<Self>) -> JoinHandle<()> {
        let quit_rx = self
            .quit_rx
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(quit_rx) = quit_rx else {
            warn!("address handler already started");
            return tokio::spawn(async {});
        };
        tokio::spawn(async move { self.address_handler(quit_rx).await })
    }

    /// Adds addresses, returning how many were newly inserted. An entry that
    /// already exists only has its last-seen time refreshed. Unroutable
    /// addresses are dropped unless the caller vouches for them
    /// (operator-supplied peers).
    pub fn add_addresses(&self, addresses: Vec<NetAddress>, accept_unroutable: bool) -> usize {
        let mut count = 0;
        let mut nodes = self.write_nodes();

        for address in addresses {
            if !accept_unroutable && !is_routable(&address) {
                continue;
            }
            match nodes.entry(address.ip.to_string()) {
                Entry::Occupied(mut entry) => entry.get_mut().last_seen = SystemTime::now(),
                Entry::Vacant(entry) => {
                    entry.insert(Node::new(address));
                    count += 1;
                }
            }
        }

        count
    }

    /// Returns addresses that need to be tested again: both the last success
    /// and the last attempt are older than the stale timeout.
    pub fn addresses(&self) -> Vec<NetAddress> {
        let max_count = DEFAULT_MAX_ADDRESSES * ADDRESS_BATCH_FACTOR;
        let now = SystemTime::now();
        let nodes = self.read_nodes();

        let mut addrs = Vec::with_capacity(max_count);
        for node in nodes.values() {
            if addrs.len() >= max_count {
                break;
            }
            if elapsed(now, node.last_success) < DEFAULT_STALE_TIMEOUT
                || elapsed(now, node.last_attempt) < DEFAULT_STALE_TIMEOUT
            {
                continue;
            }
            addrs.push(node.address.clone());
        }

        addrs
    }

    pub fn address_count(&self) -> usize {
        self.read_nodes().len()
    }

    /// Returns up to 16 good addresses matching the query: right port, right
    /// address family for the qtype, recent successful probe, and matching
    /// subnetwork unless the caller wants all of them. The wanted-services
    /// mask is applied only when the manager was built with the services
    /// filter enabled. Selection is randomized so successive queries surface
    /// different subsets.
    pub fn good_addresses(
        &self,
        qtype: u16,
        services: u64,
        include_all_subnetworks: bool,
        subnetwork_id: Option<SubnetworkId>,
    ) -> Vec<NetAddress> {
        if qtype != QTYPE_A && qtype != QTYPE_AAAA {
            return Vec::new();
        }

        let now = SystemTime::now();
        let nodes = self.read_nodes();
        let eligible: Vec<&Node> = nodes
            .values()
            .filter(|node| {
                if node.address.port != self.default_port {
                    return false;
                }
                if !include_all_subnetworks && node.subnetwork_id != subnetwork_id {
                    return false;
                }
                let is_ipv4 = node.address.ip.is_ipv4();
                if (qtype == QTYPE_A && !is_ipv4) || (qtype == QTYPE_AAAA && is_ipv4) {
                    return false;
                }
                if node.last_success == UNIX_EPOCH
                    || elapsed(now, node.last_success) > DEFAULT_STALE_TIMEOUT
                {
                    return false;
                }
                if self.filter_services && node.address.services & services != services {
                    return false;
                }
                true
            })
            .collect();

        let mut rng = rand::thread_rng();
        eligible
            .choose_multiple(&mut rng, DEFAULT_MAX_ADDRESSES)
            .map(|node| node.address.clone())
            .collect()
    }

    /// Records a dial attempt. Unknown IPs are ignored.
    pub fn attempt(&self, ip: &IpAddr) {
        if let Some(node) = self.write_nodes().get_mut(&ip.to_string()) {
            node.last_attempt = SystemTime::now();
        }
    }

    /// Records a successful probe and the subnetwork the peer advertised.
    pub fn good(&self, ip: &IpAddr, subnetwork_id: Option<SubnetworkId>) {
        if let Some(node) = self.write_nodes().get_mut(&ip.to_string()) {
            node.subnetwork_id = subnetwork_id;
            node.last_success = SystemTime::now();
        }
    }

    /// Signals the background handler to flush once more and exit.
    pub async fn shutdown(&self) {
        let _ = self.quit_tx.send(()).await;
    }

    async fn address_handler(&self, mut quit_rx: mpsc::Receiver<()>) {
        let start = tokio::time::Instant::now();
        let mut dump_ticker =
            tokio::time::interval_at(start + DUMP_ADDRESS_INTERVAL, DUMP_ADDRESS_INTERVAL);
        let mut prune_ticker =
            tokio::time::interval_at(start + PRUNE_ADDRESS_INTERVAL, PRUNE_ADDRESS_INTERVAL);

        loop {
            tokio::select! {
                _ = dump_ticker.tick() => self.save_peers(),
                _ = prune_ticker.tick() => self.prune_peers(),
                _ = quit_rx.recv() => break,
            }
        }
        self.save_peers();
        info!("Address handler shutdown");
    }

    /// Removes nodes that are long unseen, long unreachable, or were tried
    /// and never answered.
    fn prune_peers(&self) {
        let now = SystemTime::now();
        let mut pruned = 0;
        let mut good = 0;
        let mut ipv4 = 0;
        let mut ipv6 = 0;

        let mut nodes = self.write_nodes();
        nodes.retain(|_, node| {
            let expired = elapsed(now, node.last_seen) > PRUNE_EXPIRE_TIMEOUT
                || node.tried_and_failed()
                || (node.last_success != UNIX_EPOCH
                    && elapsed(now, node.last_success) > PRUNE_EXPIRE_TIMEOUT);
            if expired {
                pruned += 1;
                return false;
            }
            if node.last_success != UNIX_EPOCH
                && elapsed(now, node.last_success) <= DEFAULT_STALE_TIMEOUT
            {
                good += 1;
                if node.address.ip.is_ipv4() {
                    ipv4 += 1;
                } else {
                    ipv6 += 1;
                }
            }
            true
        });

        let total = nodes.len();
        drop(nodes);

        debug!("Pruned {} addresses, {} left", pruned, total);
        info!(
            "Known nodes: {} Good: {} [4: {}, 6: {}]",
            total, good, ipv4, ipv6
        );
    }

    /// Writes the node table to `<peers_file>.new` and renames it into
    /// place. Failures are logged and retried at the next tick.
    fn save_peers(&self) {
        let tmp_file = {
            let mut os = self.peers_file.clone().into_os_string();
            os.push(".new");
            PathBuf::from(os)
        };

        let nodes = self.read_nodes();
        let file = match std::fs::File::create(&tmp_file) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to create {}: {}", tmp_file.display(), e);
                return;
            }
        };
        let mut writer = std::io::BufWriter::new(file);
        if let Err(e) = serde_json::to_writer(&mut writer, &*nodes) {
            error!("Failed to encode {}: {}", tmp_file.display(), e);
            return;
        }
        if let Err(e) = writer.flush() {
            error!("Failed to flush {}: {}", tmp_file.display(), e);
            return;
        }
        drop(writer);
        drop(nodes);

        if let Err(e) = std::fs::rename(&tmp_file, &self.peers_file) {
            error!(
                "Failed to rename {} to {}: {}",
                tmp_file.display(),
                self.peers_file.display(),
                e
            );
            if let Err(e) = std::fs::remove_file(&tmp_file) {
                error!("Failed to remove {}: {}", tmp_file.display(), e);
            }
        }
    }

    /// Loads the node table from disk. A malformed file is deleted and the
    /// manager starts empty; load failures never abort startup.
    fn deserialize_peers(&self) {
        if !self.peers_file.exists() {
            return;
        }

        let loaded: std::result::Result<HashMap<String, Node>, String> =
            std::fs::read_to_string(&self.peers_file)
                .map_err(|e| e.to_string())
                .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()));

        match loaded {
            Ok(loaded) => {
                let count = loaded.len();
                *self.write_nodes() = loaded;
                info!("{} nodes loaded", count);
            }
            Err(e) => {
                warn!(
                    "Failed to parse {}: {}; starting with an empty node table",
                    self.peers_file.display(),
                    e
                );
                if let Err(e) = std::fs::remove_file(&self.peers_file) {
                    warn!(
                        "Failed to remove corrupt peers file {}: {}",
                        self.peers_file.display(),
                        e
                    );
                }
            }
        }
    }

    fn read_nodes(&self) -> RwLockReadGuard<'_, HashMap<String, Node>> {
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, HashMap<String, Node>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn elapsed(now: SystemTime, since: SystemTime) -> std::time::Duration {
    now.duration_since(since).unwrap_or_default()
}

/// Whether an address is reachable from the public internet. Private,
/// loopback, link-local, multicast, benchmarking, and documentation ranges
/// are not; neither is port zero.
pub fn is_routable(address: &NetAddress) -> bool {
    if address.port == 0 {
        return false;
    }

    match address.ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            !ipv4.is_private()
                && !ipv4.is_loopback()
                && !ipv4.is_unspecified()
                && !ipv4.is_multicast()
                && !ipv4.is_broadcast()
                && !ipv4.is_link_local()
                && !(octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
                && !(octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
                && !(octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
                && !(octets[0] == 198 && (octets[1] & 0xfe) == 18)
        }
        IpAddr::V6(ipv6) => {
            let segments = ipv6.segments();
            !ipv6.is_loopback()
                && !ipv6.is_unspecified()
                && !ipv6.is_multicast()
                && (segments[0] & 0xfe00) != 0xfc00
                && (segments[0] & 0xffc0) != 0xfe80
                && !(segments[0] == 0x2001 && segments[1] == 0xdb8)
                && !(segments[0] == 0x2001 && segments[1] == 0x2 && segments[2] == 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SF_NODE_NETWORK;
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    const TEST_PORT: u16 = 16111;

    fn new_manager(dir: &TempDir) -> AddressManager {
        AddressManager::new(dir.path(), TEST_PORT, false).unwrap()
    }

    fn addr(s: &str) -> NetAddress {
        NetAddress::with_services(s.parse().unwrap(), TEST_PORT, SF_NODE_NETWORK)
    }

    fn mark_good(manager: &AddressManager, ip: &str, subnetwork_id: Option<SubnetworkId>) {
        let ip: IpAddr = ip.parse().unwrap();
        manager.attempt(&ip);
        manager.good(&ip, subnetwork_id);
    }

    #[test]
    fn add_addresses_dedups_by_ip() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);

        let added = manager.add_addresses(vec![addr("1.2.3.4"), addr("2.3.4.5")], false);
        assert_eq!(added, 2);
        assert_eq!(manager.address_count(), 2);

        // Same IP on a different port still collapses onto one entry.
        let mut dup = addr("1.2.3.4");
        dup.port = TEST_PORT + 1;
        let added = manager.add_addresses(vec![dup], false);
        assert_eq!(added, 0);
        assert_eq!(manager.address_count(), 2);
    }

    #[test]
    fn add_addresses_skips_unroutable() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);

        let added = manager.add_addresses(
            vec![addr("127.0.0.1"), addr("10.0.0.1"), addr("1.2.3.4")],
            false,
        );
        assert_eq!(added, 1);

        // Operator-supplied peers bypass the routability check.
        let added = manager.add_addresses(vec![addr("127.0.0.1")], true);
        assert_eq!(added, 1);
    }

    #[test]
    fn add_refreshes_last_seen_only() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_addresses(vec![addr("1.2.3.4")], false);
        mark_good(&manager, "1.2.3.4", None);

        let before = manager.read_nodes()["1.2.3.4"].clone();
        manager.add_addresses(vec![addr("1.2.3.4")], false);
        let after = manager.read_nodes()["1.2.3.4"].clone();

        assert!(after.last_seen >= before.last_seen);
        assert_eq!(after.last_success, before.last_success);
        assert_eq!(after.last_attempt, before.last_attempt);
    }

    #[test]
    fn addresses_returns_only_stale_candidates() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_addresses(vec![addr("1.2.3.4"), addr("2.3.4.5")], false);

        // Never tried: both timestamps are at the epoch, so both qualify.
        assert_eq!(manager.addresses().len(), 2);

        // A fresh attempt takes a node out of the candidate set.
        manager.attempt(&"1.2.3.4".parse().unwrap());
        let candidates = manager.addresses();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ip.to_string(), "2.3.4.5");

        // Once the attempt ages past the stale timeout it qualifies again.
        manager.write_nodes().get_mut("1.2.3.4").unwrap().last_attempt =
            SystemTime::now() - Duration::from_secs(2 * 60 * 60);
        assert_eq!(manager.addresses().len(), 2);
    }

    #[test]
    fn good_addresses_filters_port_family_and_freshness() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);

        manager.add_addresses(vec![addr("1.2.3.4"), addr("2.3.4.5"), addr("2001:db9::1")], false);
        let mut wrong_port = addr("3.4.5.6");
        wrong_port.port = TEST_PORT + 1;
        manager.add_addresses(vec![wrong_port], false);

        mark_good(&manager, "1.2.3.4", None);
        mark_good(&manager, "2001:db9::1", None);
        mark_good(&manager, "3.4.5.6", None);
        // 2.3.4.5 never succeeded.

        let v4 = manager.good_addresses(QTYPE_A, SF_NODE_NETWORK, true, None);
        assert_eq!(v4.len(), 1);
        assert_eq!(v4[0].ip.to_string(), "1.2.3.4");

        let v6 = manager.good_addresses(QTYPE_AAAA, SF_NODE_NETWORK, true, None);
        assert_eq!(v6.len(), 1);
        assert!(v6[0].ip.is_ipv6());

        // A stale success no longer counts as good.
        manager.write_nodes().get_mut("1.2.3.4").unwrap().last_success =
            SystemTime::now() - Duration::from_secs(2 * 60 * 60);
        assert!(manager
            .good_addresses(QTYPE_A, SF_NODE_NETWORK, true, None)
            .is_empty());

        // Unsupported qtypes yield nothing.
        assert!(manager.good_addresses(2, SF_NODE_NETWORK, true, None).is_empty());
    }

    #[test]
    fn good_addresses_filters_subnetworks() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        let id_aa: SubnetworkId = "00000000000000000000000000000000000000aa".parse().unwrap();
        let id_bb: SubnetworkId = "00000000000000000000000000000000000000bb".parse().unwrap();

        manager.add_addresses(vec![addr("1.2.3.4"), addr("2.3.4.5"), addr("3.4.5.6")], false);
        mark_good(&manager, "1.2.3.4", Some(id_aa));
        mark_good(&manager, "2.3.4.5", Some(id_bb));
        mark_good(&manager, "3.4.5.6", None);

        let all = manager.good_addresses(QTYPE_A, SF_NODE_NETWORK, true, None);
        assert_eq!(all.len(), 3);

        let only_aa = manager.good_addresses(QTYPE_A, SF_NODE_NETWORK, false, Some(id_aa));
        assert_eq!(only_aa.len(), 1);
        assert_eq!(only_aa[0].ip.to_string(), "1.2.3.4");

        // None compares equal to None.
        let no_subnetwork = manager.good_addresses(QTYPE_A, SF_NODE_NETWORK, false, None);
        assert_eq!(no_subnetwork.len(), 1);
        assert_eq!(no_subnetwork[0].ip.to_string(), "3.4.5.6");
    }

    #[test]
    fn services_mask_applies_only_when_enabled() {
        let dir = TempDir::new().unwrap();
        let filtering = AddressManager::new(dir.path().join("a").as_path(), TEST_PORT, true).unwrap();
        let permissive = AddressManager::new(dir.path().join("b").as_path(), TEST_PORT, false).unwrap();

        for (services, ip) in [(1u64, "1.0.0.1"), (8, "1.0.0.8"), (9, "1.0.0.9"), (15, "1.0.0.15")] {
            for manager in [&filtering, &permissive] {
                let address = NetAddress::with_services(ip.parse().unwrap(), TEST_PORT, services);
                manager.add_addresses(vec![address], false);
                mark_good(manager, ip, None);
            }
        }

        // (services & 9) == 9 holds only for 9 and 15.
        let masked = filtering.good_addresses(QTYPE_A, 9, true, None);
        let mut ips: Vec<String> = masked.iter().map(|a| a.ip.to_string()).collect();
        ips.sort();
        assert_eq!(ips, ["1.0.0.15", "1.0.0.9"]);

        let unmasked = permissive.good_addresses(QTYPE_A, 9, true, None);
        assert_eq!(unmasked.len(), 4);
    }

    #[test]
    fn good_addresses_caps_at_sixteen() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        for i in 0..40u8 {
            let ip = format!("1.1.{}.1", i);
            manager.add_addresses(vec![addr(&ip)], false);
            mark_good(&manager, &ip, None);
        }
        let good = manager.good_addresses(QTYPE_A, SF_NODE_NETWORK, true, None);
        assert_eq!(good.len(), DEFAULT_MAX_ADDRESSES);
    }

    #[test]
    fn prune_removes_failed_and_expired_nodes() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_addresses(vec![addr("1.2.3.4"), addr("2.3.4.5"), addr("3.4.5.6")], false);

        // X: tried, never worked.
        manager.attempt(&"1.2.3.4".parse().unwrap());

        // Y: succeeded nine hours ago.
        mark_good(&manager, "2.3.4.5", None);
        {
            let mut nodes = manager.write_nodes();
            let node = nodes.get_mut("2.3.4.5").unwrap();
            node.last_success = SystemTime::now() - Duration::from_secs(9 * 60 * 60);
            node.last_seen = SystemTime::now() - Duration::from_secs(9 * 60 * 60);
        }

        // Z: succeeded 59 minutes ago.
        mark_good(&manager, "3.4.5.6", None);
        manager.write_nodes().get_mut("3.4.5.6").unwrap().last_success =
            SystemTime::now() - Duration::from_secs(59 * 60);

        manager.prune_peers();
        let nodes = manager.read_nodes();
        assert!(!nodes.contains_key("1.2.3.4"));
        assert!(!nodes.contains_key("2.3.4.5"));
        assert!(nodes.contains_key("3.4.5.6"));
        drop(nodes);

        // Pruning again within the same tick changes nothing.
        manager.prune_peers();
        assert_eq!(manager.address_count(), 1);
    }

    #[test]
    fn fresh_nodes_survive_the_pruner() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_addresses(vec![addr("1.2.3.4")], false);
        manager.prune_peers();
        assert_eq!(manager.address_count(), 1);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        let id: SubnetworkId = "00000000000000000000000000000000000000aa".parse().unwrap();
        manager.add_addresses(vec![addr("1.2.3.4"), addr("2001:db9::1")], false);
        mark_good(&manager, "1.2.3.4", Some(id));
        manager.save_peers();

        let restored = new_manager(&dir);
        assert_eq!(*restored.read_nodes(), *manager.read_nodes());
    }

    #[test]
    fn snapshot_has_reference_field_names() {
        let dir = TempDir::new().unwrap();
        let manager = new_manager(&dir);
        manager.add_addresses(vec![addr("1.2.3.4")], false);
        manager.save_peers();

        let content = std::fs::read_to_string(dir.path().join(PEERS_FILENAME)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        let node = &value["1.2.3.4"];
        assert!(node["Addr"]["IP"].is_string());
        assert_eq!(node["Addr"]["Port"], TEST_PORT);
        assert_eq!(node["LastSuccess"], "1970-01-01T00:00:00+00:00");
        assert!(node["LastSeen"].is_string());
        assert!(node["SubnetworkID"].is_null());
    }

    #[test]
    fn corrupt_snapshot_is_deleted_and_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PEERS_FILENAME), b"{not json").unwrap();

        let manager = new_manager(&dir);
        assert_eq!(manager.address_count(), 0);
        assert!(!dir.path().join(PEERS_FILENAME).exists());
    }

    #[tokio::test]
    async fn shutdown_flushes_a_final_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(new_manager(&dir));
        let handle = manager.clone().start();

        manager.add_addresses(vec![addr("1.2.3.4")], false);
        manager.shutdown().await;
        handle.await.unwrap();

        assert!(dir.path().join(PEERS_FILENAME).exists());
    }

    #[test]
    fn routability_predicate() {
        let routable = |ip: &str| is_routable(&addr(ip));
        assert!(routable("1.2.3.4"));
        assert!(routable("2607:f8b0::1"));
        assert!(!routable("10.1.2.3"));
        assert!(!routable("127.0.0.1"));
        assert!(!routable("169.254.0.1"));
        assert!(!routable("192.0.2.1"));
        assert!(!routable("198.18.0.1"));
        assert!(!routable("203.0.113.5"));
        assert!(!routable("224.0.0.1"));
        assert!(!routable("::1"));
        assert!(!routable("fe80::1"));
        assert!(!routable("fc00::1"));
        assert!(!routable("2001:db8::1"));

        let mut zero_port = addr("1.2.3.4");
        zero_port.port = 0;
        assert!(!is_routable(&zero_port));
    }
}
