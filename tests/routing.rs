//! Routing-core properties spanning a serialize/parse round trip and
//! repeated application of the same advertisement, independent of any
//! particular dock or interface wiring.

use std::net::Ipv6Addr;
use std::sync::Arc;

use dockmesh::hal::SystemClock;
use dockmesh::routing::{AdvertisedPrefixFrame, Command, RouteTable};

fn table() -> RouteTable {
    RouteTable::new(Arc::new(SystemClock::new()))
}

#[test]
fn serialize_then_parse_preserves_the_advertised_table() {
    let mut source = table();
    source.learn_route(Ipv6Addr::new(0xfc07, 0, 0, 0, 0, 0, 0, 1), 64, 0);
    source.learn_route(Ipv6Addr::new(0xfc07, 0, 0, 0, 0, 0, 0, 2), 128, 0);

    let frame = AdvertisedPrefixFrame::for_interface(&source, usize::MAX);
    let encoded = frame.encode();
    let decoded = AdvertisedPrefixFrame::parse(&encoded).unwrap();
    assert_eq!(decoded, frame);

    let mut sink = table();
    for (prefix, prefix_length) in decoded.entries {
        sink.learn_route(prefix, prefix_length, 3);
    }

    for route in source.all_routes() {
        let matched = sink.longest_match(route.prefix).unwrap();
        assert_eq!(matched.prefix, route.prefix);
        assert_eq!(matched.prefix_length, route.prefix_length);
    }
}

#[test]
fn applying_the_same_advertisement_twice_is_a_no_op() {
    let mut t = table();
    let prefix = Ipv6Addr::new(0xfc07, 0, 0, 0, 0, 0, 0, 9);
    t.learn_route(prefix, 64, 1);
    let before = t.all_routes();

    // The same (prefix, prefix_length) re-arriving on the same interface
    // must not grow the table or change which interface it resolves to.
    t.learn_route(prefix, 64, 1);
    let after = t.all_routes();

    assert_eq!(before.len(), after.len());
    assert_eq!(t.longest_match(prefix).unwrap().via_interface, 1);
}

#[test]
fn frame_command_byte_round_trips() {
    assert_eq!(Command::from_byte(0), Some(Command::Call));
    assert_eq!(Command::from_byte(1), Some(Command::Response));
}
