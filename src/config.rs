//! Boot-time configuration: the handful of values a module needs before it
//! can bring up its docks, namely its physical address, which GPIO line
//! backs each dock's chip-select/interrupt pin, and the IPv6 addresses this
//! module itself is authoritative for.
//!
//! Grounded on the original's `RoIF6` constructor parameter list
//! (`roif6.hpp`), which takes exactly these three things (address, physical
//! address, dock pin vector). There is no configuration file format or CLI
//! in scope (spec names persistence and a CLI surface as out of scope) — a
//! `ModuleConfig` is assembled programmatically by whatever embeds this
//! crate.

use std::net::Ipv6Addr;

/// A module's 6-byte physical address, used to derive each dock
/// interface's EUI-64 link-local address.
pub type PhysicalAddress = [u8; 6];

/// Configuration for a single dock: which chip-select/interrupt GPIO pin
/// it's wired to.
#[derive(Debug, Clone, Copy)]
pub struct DockConfig {
    pub chip_select_pin: u32,
}

/// Full boot configuration for one module.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub physical_address: PhysicalAddress,
    pub docks: Vec<DockConfig>,

    /// This module's own routable addresses, each with the prefix length it
    /// is assigned under (§6: "one or more IPv6 addresses with prefix
    /// lengths"). The routing core inserts each of these at start-up
    /// pointing at the loopback interface.
    pub addresses: Vec<(Ipv6Addr, u8)>,
}

impl ModuleConfig {
    pub fn new(
        physical_address: PhysicalAddress,
        docks: Vec<DockConfig>,
        addresses: Vec<(Ipv6Addr, u8)>,
    ) -> ModuleConfig {
        ModuleConfig {
            physical_address,
            docks,
            addresses,
        }
    }
}
