// Copyright (c) 2016 Linus Färnstrand <faern@faern.net>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A self-healing IPv6 mesh network stack for physically-reconfigurable
//! robotic modules, networked together over per-dock SPI links.
//!
//! A module is a set of docks (physical connectors, each a half-duplex SPI
//! link with a GPIO line doing double duty as chip select and interrupt
//! input). Each dock is bound into an IPv6 [`netif`] interface; a
//! [`routing`] core periodically floods the module's route table across
//! every dock so that a change anywhere in the mesh — a new module
//! docking, an old one disconnecting — converges without any central
//! coordinator. This crate owns the dock protocol, the per-dock interfaces,
//! and the routing core; it deliberately does not implement the host IPv6
//! stack that actually parses and routes application traffic (see
//! [`netif::Ip6Sink`]) — that's handled by whatever embeds this crate.
//!
//! Concurrency follows the original firmware's layering: a wait-free
//! interrupt signal (`ChipSelect::is_interrupt_pending`) is deferred onto a
//! small queue ([`dock::serializer::IsrDeferrer`]), which submits ordinary
//! jobs to a single cooperative worker per dock
//! ([`dock::serializer::LinkSerializer`]) that is the only thing allowed to
//! touch that dock's SPI bus.

pub mod buffer;
pub mod config;
pub mod dock;
pub mod error;
pub mod hal;
pub mod netif;
pub mod routing;
pub mod testing;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::debug;

use config::ModuleConfig;
use dock::serializer::{IsrDeferrer, LinkSerializer};
use dock::Dock;
use hal::{ChipSelect, Clock, SpiBus, SystemClock};
use netif::{DockInterface, Ip6Sink, ModuleInterfaces};
use routing::{AdvertisedPrefixFrame, RouteTable, ADVERTISEMENT_PERIOD};

/// The HAL handles a dock needs at bring-up: one SPI device and one
/// chip-select/interrupt line.
pub struct DockHardware {
    pub bus: Box<dyn SpiBus>,
    pub cs: Box<dyn ChipSelect>,
}

/// A fully brought-up module: its docks, their interfaces, and the
/// background routing core. Dropping it tears down every worker thread.
pub struct Module {
    interfaces: Arc<ModuleInterfaces>,
    #[allow(dead_code)]
    serializers: Vec<Arc<LinkSerializer>>,
    isr_deferrers: Vec<IsrDeferrer>,
    routing_core: RoutingCore,
}

impl Module {
    /// Brings up one dock per entry in `hardware`, matching `config`'s dock
    /// list by index, and starts the routing core's periodic broadcast.
    pub fn bring_up(
        config: ModuleConfig,
        hardware: Vec<DockHardware>,
        ip6_sink: Arc<dyn Ip6Sink>,
    ) -> Module {
        Self::bring_up_with_clock(config, hardware, ip6_sink, Arc::new(SystemClock::new()))
    }

    /// Like [`Self::bring_up`] but with an injectable clock, so tests can
    /// drive route aging and the broadcast period deterministically.
    pub fn bring_up_with_clock(
        config: ModuleConfig,
        hardware: Vec<DockHardware>,
        ip6_sink: Arc<dyn Ip6Sink>,
        clock: Arc<dyn Clock>,
    ) -> Module {
        assert_eq!(
            config.docks.len(),
            hardware.len(),
            "one hardware handle is required per configured dock"
        );

        let mut route_table = RouteTable::new(Arc::clone(&clock));
        for &(address, prefix_length) in &config.addresses {
            route_table.add_local_route(address, prefix_length, netif::LOOPBACK);
        }
        let route_table = Arc::new(Mutex::new(route_table));

        let (learned_tx, learned_rx) = mpsc::channel::<(usize, AdvertisedPrefixFrame)>();

        let mut serializers = Vec::with_capacity(hardware.len());
        let mut isr_deferrers = Vec::with_capacity(hardware.len());
        let mut interfaces = Vec::with_capacity(hardware.len());

        for (index, hw) in hardware.into_iter().enumerate() {
            let (dock, events) = Dock::new(hw.bus, hw.cs, Arc::clone(&clock));
            let serializer = Arc::new(LinkSerializer::spawn(dock));
            let deferrer = IsrDeferrer::spawn(Arc::clone(&serializer));

            let interface = DockInterface::bind(
                index,
                config.physical_address,
                Arc::clone(&serializer),
                events,
                Arc::clone(&ip6_sink),
                learned_tx.clone(),
            );

            serializers.push(serializer);
            isr_deferrers.push(deferrer);
            interfaces.push(interface);
        }

        let interfaces = Arc::new(ModuleInterfaces::new(
            interfaces,
            Arc::clone(&route_table),
            Arc::clone(&ip6_sink),
        ));
        let routing_core = RoutingCore::spawn(route_table, Arc::clone(&interfaces), clock, learned_rx);

        Module {
            interfaces,
            serializers,
            isr_deferrers,
            routing_core,
        }
    }

    /// Forwards a packet toward `destination` using the current route
    /// table's longest-prefix-match entry.
    pub fn forward(&self, destination: std::net::Ipv6Addr, packet: buffer::PacketBuffer) {
        self.interfaces.forward(destination, packet);
    }

    pub fn interfaces(&self) -> &ModuleInterfaces {
        &self.interfaces
    }

    /// Call this from the real interrupt handler for dock `index` — it is
    /// wait-free, matching the original's `csInterruptHandler` contract.
    pub fn notify_interrupt(&self, index: usize) {
        if let Some(deferrer) = self.isr_deferrers.get(index) {
            deferrer.notify();
        } else {
            debug!("interrupt notification for unknown dock index {}", index);
        }
    }
}

/// The periodic route-table broadcast loop, grounded on the original's
/// `RoIF6::_mappingTimer` (a 5 second periodic timer calling
/// `_broadcastRTable`).
struct RoutingCore {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl RoutingCore {
    fn spawn(
        table: Arc<Mutex<RouteTable>>,
        interfaces: Arc<ModuleInterfaces>,
        clock: Arc<dyn Clock>,
        learned: mpsc::Receiver<(usize, AdvertisedPrefixFrame)>,
    ) -> RoutingCore {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || loop {
            while let Ok((via_interface, frame)) = learned.try_recv() {
                let mut t = table.lock().unwrap();
                for (prefix, prefix_length) in frame.entries {
                    t.learn_route(prefix, prefix_length, via_interface);
                }
            }

            {
                let mut t = table.lock().unwrap();
                t.prune_expired();
            }

            let count = interfaces.interfaces().len();
            let frames = (0..count)
                .map(|index| {
                    let t = table.lock().unwrap();
                    (index, AdvertisedPrefixFrame::for_interface(&t, index))
                })
                .collect();
            interfaces.broadcast(frames);

            if stop_flag.load(Ordering::Acquire) {
                break;
            }
            clock.sleep(ADVERTISEMENT_PERIOD);
        });

        RoutingCore {
            handle: Some(handle),
            stop,
        }
    }
}

impl Drop for RoutingCore {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
