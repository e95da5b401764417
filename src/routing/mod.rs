//! Route table and advertised-prefix frame, the mesh's only routing
//! protocol: every dock periodically broadcasts its whole table, and a
//! neighbor that hears a strictly-longer prefix than the one it already
//! has for a destination adopts the new one.
//!
//! The wire format and "longer prefix wins" policy are grounded on the
//! original's `RoutingTable` (`rtable.hpp`): a `Command` byte
//! (`Call`/`Response`), an address-length byte that must read `16`, an
//! entry count, then that many 17-byte `(address, prefix_length)` pairs.
//! The `BTreeMap<u8, Vec<RouteEntry>>` keyed by prefix length, with
//! longest-match found by walking the map in reverse, is the teacher's
//! `routing.rs` data structure, generalized from a single flat IPv4 table
//! to one with per-entry aging and split-horizon.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

use ipnetwork::Ipv6Network;
use log::warn;

use crate::error::RoutingError;
use crate::hal::Clock;

/// Address width this crate speaks. The wire format carries this
/// explicitly (`address_length` byte) so a future non-IPv6 revision of the
/// firmware would be rejected rather than misparsed.
pub const ADDRESS_LENGTH: u8 = 16;

/// Bytes occupied by one entry: a 16-byte address plus a 1-byte prefix
/// length.
pub const ENTRY_SIZE: usize = 17;

/// How often the routing core broadcasts its table, per spec.
pub const ADVERTISEMENT_PERIOD: Duration = Duration::from_secs(5);

/// Route entries older than this are pruned on the next broadcast tick.
/// Three missed advertisement periods is long enough to absorb one lost
/// frame without flapping the route.
pub const ROUTE_TTL: Duration = Duration::from_secs(ADVERTISEMENT_PERIOD.as_secs() * 3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Call = 0,
    Response = 1,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Command> {
        match b {
            0 => Some(Command::Call),
            1 => Some(Command::Response),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: Ipv6Addr,
    pub prefix_length: u8,
    pub via_interface: usize,
}

struct TableEntry {
    entry: RouteEntry,
    last_heard: Duration,
}

/// Longest-prefix-match route table, keyed by prefix length for O(log n)
/// access to the next-shorter bucket, same shape as the teacher's
/// `BTreeMap<u8, Vec<RouteEntry>>`.
pub struct RouteTable {
    buckets: BTreeMap<u8, Vec<TableEntry>>,
    clock: std::sync::Arc<dyn Clock>,
}

impl RouteTable {
    pub fn new(clock: std::sync::Arc<dyn Clock>) -> RouteTable {
        RouteTable {
            buckets: BTreeMap::new(),
            clock,
        }
    }

    /// Registers a locally-owned prefix (one this module itself is
    /// authoritative for, e.g. its own link-local address) so it never
    /// ages out and is always the best match within its prefix.
    pub fn add_local_route(&mut self, prefix: Ipv6Addr, prefix_length: u8, via_interface: usize) {
        self.insert(prefix, prefix_length, via_interface, Duration::MAX);
    }

    /// Learns a route from a received advertisement.
    pub fn learn_route(&mut self, prefix: Ipv6Addr, prefix_length: u8, via_interface: usize) {
        let now = self.clock.now();
        self.insert(prefix, prefix_length, via_interface, now);
    }

    fn insert(&mut self, prefix: Ipv6Addr, prefix_length: u8, via_interface: usize, last_heard: Duration) {
        let bucket = self.buckets.entry(prefix_length).or_default();
        if let Some(existing) = bucket
            .iter_mut()
            .find(|e| e.entry.prefix == prefix && e.entry.prefix_length == prefix_length)
        {
            // Spec §4.5: "better" means strictly longer prefix match; for
            // equal length the incumbent is kept. A second interface
            // advertising the same (prefix, prefix_length) must not steal
            // the route — only refresh the staleness timestamp, and only
            // when it's the same interface that owns the incumbent
            // re-advertising (a keepalive).
            if existing.entry.via_interface == via_interface {
                existing.last_heard = last_heard;
            }
            return;
        }
        bucket.push(TableEntry {
            entry: RouteEntry {
                prefix,
                prefix_length,
                via_interface,
            },
            last_heard,
        });
    }

    /// Drops entries whose age exceeds [`ROUTE_TTL`]. Locally-owned routes
    /// (inserted with `Duration::MAX`) never age out.
    pub fn prune_expired(&mut self) {
        let now = self.clock.now();
        for bucket in self.buckets.values_mut() {
            bucket.retain(|e| e.last_heard == Duration::MAX || now.saturating_sub(e.last_heard) < ROUTE_TTL);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
    }

    /// Finds the longest-prefix-match route for `destination`, walking
    /// prefix-length buckets from longest to shortest.
    pub fn longest_match(&self, destination: Ipv6Addr) -> Option<RouteEntry> {
        for (&prefix_length, bucket) in self.buckets.iter().rev() {
            for entry in bucket {
                if prefix_contains(entry.entry.prefix, prefix_length, destination) {
                    return Some(entry.entry);
                }
            }
        }
        None
    }

    /// All routes currently held, longest prefix first — the order the
    /// original's `getRecord(i, ...)` walk implicitly produces via
    /// `ip_get_record`.
    pub fn all_routes(&self) -> Vec<RouteEntry> {
        self.buckets
            .iter()
            .rev()
            .flat_map(|(_, bucket)| bucket.iter().map(|e| e.entry))
            .collect()
    }
}

/// Longest-prefix-match arithmetic delegated to `ipnetwork`, the teacher's
/// own CIDR crate, rather than hand-rolled octet masking. A `prefix_length`
/// outside 0..=128 can only arrive from a corrupt advertisement frame;
/// treated as a non-match rather than panicking.
fn prefix_contains(prefix: Ipv6Addr, prefix_length: u8, addr: Ipv6Addr) -> bool {
    match Ipv6Network::new(prefix, prefix_length) {
        Ok(network) => network.contains(addr),
        Err(e) => {
            warn!("route with invalid prefix length {}: {}", prefix_length, e);
            false
        }
    }
}

/// An advertised-prefix frame: the only message the routing core ever
/// sends, and the only non-IP6 content type a dock interface expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedPrefixFrame {
    pub command: Command,
    pub entries: Vec<(Ipv6Addr, u8)>,
}

impl AdvertisedPrefixFrame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.entries.len() * ENTRY_SIZE);
        out.push(self.command as u8);
        out.push(ADDRESS_LENGTH);
        out.push(self.entries.len() as u8);
        for (addr, prefix_length) in &self.entries {
            out.extend_from_slice(&addr.octets());
            out.push(*prefix_length);
        }
        out
    }

    pub fn parse(data: &[u8]) -> Result<AdvertisedPrefixFrame, RoutingError> {
        if data.len() < 3 {
            return Err(RoutingError::FrameTooShort);
        }
        let command = Command::from_byte(data[0]).unwrap_or(Command::Response);
        let address_length = data[1];
        if address_length != ADDRESS_LENGTH {
            return Err(RoutingError::UnsupportedAddressLength(address_length));
        }
        let count = data[2] as usize;
        let expected_len = 3 + count * ENTRY_SIZE;
        if data.len() != expected_len {
            return Err(RoutingError::EntryCountMismatch {
                declared: count,
                actual_len: data.len(),
            });
        }
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let offset = 3 + i * ENTRY_SIZE;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[offset..offset + 16]);
            let prefix_length = data[offset + 16];
            entries.push((Ipv6Addr::from(octets), prefix_length));
        }
        Ok(AdvertisedPrefixFrame { command, entries })
    }

    /// Builds the Response frame advertised out `exclude_interface`,
    /// omitting any route that was learned on that same interface
    /// (split-horizon: don't tell a neighbor about the route you only
    /// know because of them).
    pub fn for_interface(table: &RouteTable, exclude_interface: usize) -> AdvertisedPrefixFrame {
        let entries = table
            .all_routes()
            .into_iter()
            .filter(|r| r.via_interface != exclude_interface)
            .map(|r| (r.prefix, r.prefix_length))
            .collect();
        AdvertisedPrefixFrame {
            command: Command::Response,
            entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SystemClock;
    use std::sync::Arc;

    fn table() -> RouteTable {
        RouteTable::new(Arc::new(SystemClock::new()))
    }

    #[test]
    fn empty_table_has_no_route() {
        let t = table();
        assert!(t.longest_match(Ipv6Addr::LOCALHOST).is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let mut t = table();
        t.learn_route(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 16, 0);
        t.learn_route(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 64, 1);
        let dest = Ipv6Addr::new(0xfe80, 0, 0, 0, 1, 2, 3, 4);
        let route = t.longest_match(dest).unwrap();
        assert_eq!(route.via_interface, 1);
        assert_eq!(route.prefix_length, 64);
    }

    #[test]
    fn equal_length_advertisement_does_not_steal_the_incumbent_route() {
        let mut t = table();
        let prefix = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0);
        t.learn_route(prefix, 64, 0);
        // A second interface advertises the same prefix and length; spec
        // §4.5 says the incumbent is kept, so the route must still resolve
        // via interface 0.
        t.learn_route(prefix, 64, 1);
        let route = t.longest_match(Ipv6Addr::new(0xfe80, 0, 0, 0, 1, 2, 3, 4)).unwrap();
        assert_eq!(route.via_interface, 0);
    }

    #[test]
    fn no_match_outside_prefix() {
        let mut t = table();
        t.learn_route(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 64, 0);
        let dest = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x1f);
        assert!(t.longest_match(dest).is_none());
    }

    #[test]
    fn frame_round_trips() {
        let frame = AdvertisedPrefixFrame {
            command: Command::Response,
            entries: vec![
                (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1), 64),
                (Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x1f), 128),
            ],
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), 3 + 2 * ENTRY_SIZE);
        let decoded = AdvertisedPrefixFrame::parse(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_rejects_wrong_address_length() {
        let mut bad = vec![Command::Response as u8, 4, 0];
        bad.truncate(3);
        assert_eq!(
            AdvertisedPrefixFrame::parse(&bad),
            Err(RoutingError::UnsupportedAddressLength(4))
        );
    }

    #[test]
    fn frame_rejects_mismatched_entry_count() {
        let bad = vec![Command::Response as u8, ADDRESS_LENGTH, 2, 0, 0];
        assert!(matches!(
            AdvertisedPrefixFrame::parse(&bad),
            Err(RoutingError::EntryCountMismatch { declared: 2, .. })
        ));
    }

    #[test]
    fn split_horizon_excludes_learned_interface() {
        let mut t = table();
        t.learn_route(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 64, 0);
        t.learn_route(Ipv6Addr::new(0xfe90, 0, 0, 0, 0, 0, 0, 0), 64, 1);
        let out = AdvertisedPrefixFrame::for_interface(&t, 0);
        assert_eq!(out.entries.len(), 1);
        assert_eq!(out.entries[0].0, Ipv6Addr::new(0xfe90, 0, 0, 0, 0, 0, 0, 0));
    }
}
