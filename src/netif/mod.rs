//! Network interfaces: one per dock, binding a physical SPI link into an
//! IPv6 link, plus a module-level aggregator that fans packets out to
//! whichever dock interface's route is the longest match for the
//! destination.
//!
//! Grounded on the original's `Netif`/`RoIF6` pair
//! (`universalModule/software/RoFIDriver/src/roif6.hpp`): a per-dock class
//! that joins the `ff05::1f` link-local multicast group and exposes
//! `output`/`input`, owned by an aggregator that keeps a `vector<Netif>`
//! and periodically broadcasts the route table. The Rust-side "interface
//! that owns its own Tx state, registered into a bigger owning stack" shape
//! follows the teacher's `StackInterface`/`NetworkStack` split in
//! `stack.rs`.

use std::net::Ipv6Addr;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::buffer::PacketBuffer;
use crate::dock::serializer::{LinkJob, LinkSerializer};
use crate::dock::DockEvent;
use crate::routing::{AdvertisedPrefixFrame, RouteTable};

/// MTU advertised by every dock interface.
pub const MTU: usize = 120;

/// Content type used for plain IPv6 datagrams handed to the external host
/// stack.
pub const CONTENT_TYPE_IP6: u16 = 0;

/// Content type used for routing-core advertisement frames.
pub const CONTENT_TYPE_ADVERTISEMENT: u16 = 1;

/// Sentinel `via_interface` value meaning "this module itself", used for
/// addresses the module is directly authoritative for (spec §3/§4.4: "a
/// loopback interface represents addresses assigned to this module
/// itself"). No real dock ever takes this index.
pub const LOOPBACK: usize = usize::MAX;

/// Mesh-wide link-local multicast group every interface joins, matching
/// the original's `ff05::1f`.
pub fn multicast_group() -> Ipv6Addr {
    Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x1f)
}

/// Interface flag bits, matching the original's `LINK_UP|MLD6|UP|IGMP`.
/// Four flags don't warrant a bitflags-crate dependency; plain `u8`
/// constants read just as clearly.
pub const FLAG_LINK_UP: u8 = 1 << 0;
pub const FLAG_MLD6: u8 = 1 << 1;
pub const FLAG_UP: u8 = 1 << 2;
pub const FLAG_IGMP: u8 = 1 << 3;

/// Derives the EUI-64 link-local address for a dock interface from the
/// module's 6-byte physical address, following the standard
/// insert-`fffe`-and-flip-universal-bit procedure the original's firmware
/// relies on its network stack to perform.
pub fn eui64_link_local(physical_address: [u8; 6]) -> Ipv6Addr {
    let mut eui = [0u8; 8];
    eui[0] = physical_address[0] ^ 0x02;
    eui[1] = physical_address[1];
    eui[2] = physical_address[2];
    eui[3] = 0xff;
    eui[4] = 0xfe;
    eui[5] = physical_address[3];
    eui[6] = physical_address[4];
    eui[7] = physical_address[5];
    Ipv6Addr::new(
        0xfe80,
        0,
        0,
        0,
        u16::from_be_bytes([eui[0], eui[1]]),
        u16::from_be_bytes([eui[2], eui[3]]),
        u16::from_be_bytes([eui[4], eui[5]]),
        u16::from_be_bytes([eui[6], eui[7]]),
    )
}

/// Destination for IPv6 datagrams this crate hands off to the host IP
/// stack it is deliberately not implementing (spec's Non-goals).
///
/// `Sync` as well as `Send`: a sink is shared behind `Arc` across the dock
/// worker threads in [`DockInterface::bind`] and the routing core's
/// broadcast thread, so `Arc<dyn Ip6Sink>` itself needs to be `Send`, which
/// requires the pointee to be `Send + Sync`.
pub trait Ip6Sink: Send + Sync {
    fn accept(&self, packet: PacketBuffer);
}

/// An `Ip6Sink` backed by a channel, for callers that would rather poll a
/// receiver than implement the trait. `mpsc::Sender` is `!Sync`, so it's
/// kept behind a `Mutex` to satisfy `Ip6Sink`'s supertrait bound — sends
/// are already serialized in practice (one sink shared across workers), so
/// the lock is never contended for long.
pub struct ChannelIp6Sink(Mutex<mpsc::Sender<PacketBuffer>>);

impl ChannelIp6Sink {
    pub fn new(sender: mpsc::Sender<PacketBuffer>) -> Self {
        ChannelIp6Sink(Mutex::new(sender))
    }
}

impl Ip6Sink for ChannelIp6Sink {
    fn accept(&self, packet: PacketBuffer) {
        let _ = self.0.lock().unwrap().send(packet);
    }
}

/// One dock bound into an IPv6 interface.
pub struct DockInterface {
    pub name: String,
    pub link_local: Ipv6Addr,
    pub flags: u8,
    serializer: Arc<LinkSerializer>,
    worker: Option<JoinHandle<()>>,
}

impl DockInterface {
    /// Binds a dock into an interface. `events` is the dock's event
    /// channel (see `Dock::new`); a worker thread drains it for the
    /// lifetime of the interface, dispatching received blobs by content
    /// type the same way the original's `Netif::_onPacket` does.
    pub fn bind(
        index: usize,
        physical_address: [u8; 6],
        serializer: Arc<LinkSerializer>,
        events: mpsc::Receiver<DockEvent>,
        ip6_sink: Arc<dyn Ip6Sink>,
        learned_from: mpsc::Sender<(usize, AdvertisedPrefixFrame)>,
    ) -> DockInterface {
        let name = format!("ro{}", index);
        let link_local = eui64_link_local(physical_address);
        let worker = thread::spawn(move || {
            for event in events {
                if let DockEvent::Received { content_type, blob } = event {
                    match content_type {
                        CONTENT_TYPE_IP6 => ip6_sink.accept(blob),
                        CONTENT_TYPE_ADVERTISEMENT => match AdvertisedPrefixFrame::parse(&blob.to_vec())
                        {
                            Ok(frame) => {
                                let _ = learned_from.send((index, frame));
                            }
                            Err(e) => warn!("malformed advertisement frame on {}: {}", name_for_log(index), e),
                        },
                        other => debug!("dropping frame with unknown content type {}", other),
                    }
                }
            }
        });

        DockInterface {
            name,
            link_local,
            flags: FLAG_LINK_UP | FLAG_MLD6 | FLAG_UP | FLAG_IGMP,
            serializer,
            worker: Some(worker),
        }
    }

    /// Sends an IPv6 datagram out this interface.
    pub fn output_ip6(&self, packet: PacketBuffer) {
        let job = LinkJob::SendBlob {
            content_type: CONTENT_TYPE_IP6,
            blob: packet,
        };
        if self.serializer.submit(job).is_err() {
            warn!("dropping outbound packet on {}: link queue full", self.name);
        }
    }

    /// Sends a routing advertisement out this interface.
    pub fn send_advertisement(&self, frame: &AdvertisedPrefixFrame) {
        let blob = PacketBuffer::from_slice(&frame.encode());
        let job = LinkJob::SendBlob {
            content_type: CONTENT_TYPE_ADVERTISEMENT,
            blob,
        };
        if self.serializer.submit(job).is_err() {
            warn!("dropping advertisement on {}: link queue full", self.name);
        }
    }

    /// The raw link transmit primitive. Never call this directly: outbound
    /// traffic must go through [`Self::output_ip6`] (or the module
    /// aggregator's forwarding path), which is what actually frames and
    /// queues the blob. This exists only so a miswired host stack that
    /// tries to call a netif's link-level output function directly fails
    /// loudly instead of bypassing dock framing (spec §6: "Link output is
    /// never called directly and must assert/fail if invoked").
    pub fn link_output(&self, _packet: PacketBuffer) -> Result<(), crate::error::LinkError> {
        debug_assert!(false, "link_output called directly on {}", self.name);
        Err(crate::error::LinkError::DirectLinkOutput)
    }
}

impl Drop for DockInterface {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn name_for_log(index: usize) -> String {
    format!("ro{}", index)
}

/// The module-level aggregator: owns every dock interface and, for a given
/// destination, forwards to whichever interface the route table names as
/// the longest-prefix-match via-interface. Mirrors the original's `RoIF6`.
pub struct ModuleInterfaces {
    interfaces: Vec<DockInterface>,
    route_table: Arc<Mutex<RouteTable>>,
    loopback_sink: Arc<dyn Ip6Sink>,
}

impl ModuleInterfaces {
    pub fn new(
        interfaces: Vec<DockInterface>,
        route_table: Arc<Mutex<RouteTable>>,
        loopback_sink: Arc<dyn Ip6Sink>,
    ) -> Self {
        ModuleInterfaces {
            interfaces,
            route_table,
            loopback_sink,
        }
    }

    pub fn interfaces(&self) -> &[DockInterface] {
        &self.interfaces
    }

    /// Looks up the route for `destination` and either delivers the packet
    /// locally (the route's next hop is the loopback interface, i.e. the
    /// destination is one of this module's own addresses) or forwards it
    /// over the matched dock interface. Silently drops the packet if no
    /// route matches, matching spec's "unreachable destination" handling.
    pub fn forward(&self, destination: Ipv6Addr, packet: PacketBuffer) {
        let table = self.route_table.lock().unwrap();
        match table.longest_match(destination) {
            Some(route) if route.via_interface == LOOPBACK => {
                drop(table);
                self.loopback_sink.accept(packet);
            }
            Some(route) => {
                if let Some(interface) = self.interfaces.get(route.via_interface) {
                    interface.output_ip6(packet);
                } else {
                    warn!("route names interface {} which no longer exists", route.via_interface);
                }
            }
            None => debug!("no route to {}, dropping packet", destination),
        }
    }

    /// Broadcasts the current route table out every interface except
    /// `except_index` when that interface is the one a route was learned
    /// on (split-horizon — see the routing module for the rest of that
    /// policy).
    pub fn broadcast(&self, frames_by_interface: Vec<(usize, AdvertisedPrefixFrame)>) {
        for (index, frame) in frames_by_interface {
            if let Some(interface) = self.interfaces.get(index) {
                interface.send_advertisement(&frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::SystemClock;
    use crate::routing::RouteTable;

    struct RecordingSink(Mutex<Vec<PacketBuffer>>);

    impl Ip6Sink for RecordingSink {
        fn accept(&self, packet: PacketBuffer) {
            self.0.lock().unwrap().push(packet);
        }
    }

    #[test]
    fn forward_to_own_address_delivers_locally_via_loopback() {
        let clock: Arc<dyn crate::hal::Clock> = Arc::new(SystemClock::new());
        let mut table = RouteTable::new(clock);
        let own_address = Ipv6Addr::new(0xfc07, 0, 0, 0, 0, 0, 0, 1);
        table.add_local_route(own_address, 128, LOOPBACK);
        let table = Arc::new(Mutex::new(table));

        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        let interfaces = ModuleInterfaces::new(Vec::new(), table, Arc::clone(&sink) as Arc<dyn Ip6Sink>);

        interfaces.forward(own_address, PacketBuffer::from_slice(b"local"));
        let delivered = sink.0.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].to_vec(), b"local");
    }

    #[test]
    fn eui64_flips_universal_local_bit() {
        let addr = eui64_link_local([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(addr.segments()[0], 0xfe80);
        assert_eq!(addr.segments()[4], 0x0211);
        assert_eq!(addr.segments()[5], 0x22ff);
        assert_eq!(addr.segments()[6], 0xfe33);
        assert_eq!(addr.segments()[7], 0x4455);
    }

    #[test]
    fn multicast_group_matches_mesh_constant() {
        assert_eq!(multicast_group(), Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 0, 0x1f));
    }
}
