use std::sync::Arc;

use dockmesh::dock::frame::{DockVersion, MAX_BLOB_SIZE};
use dockmesh::dock::DockEvent;
use dockmesh::dock::Dock;
use dockmesh::buffer::PacketBuffer;
use dockmesh::testing::{ManualChipSelect, PeerBoardBus};

fn dock_with_peer() -> (Dock, std::sync::mpsc::Receiver<DockEvent>, std::sync::mpsc::Receiver<(u16, Vec<u8>)>) {
    let (bus, received) = PeerBoardBus::new(DockVersion {
        variant: 1,
        protocol_revision: 2,
    });
    let (cs, _pending) = ManualChipSelect::new();
    let clock = Arc::new(dockmesh::hal::SystemClock::new());
    let (dock, events) = Dock::new(Box::new(bus), Box::new(cs), clock);
    (dock, events, received)
}

#[test]
fn version_exchange_reports_peer_version() {
    let (mut dock, events, _received) = dock_with_peer();
    dock.request_version().unwrap();
    match events.recv().unwrap() {
        DockEvent::Version(v) => {
            assert_eq!(v.variant, 1);
            assert_eq!(v.protocol_revision, 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn send_blob_reaches_peer() {
    let (mut dock, _events, received) = dock_with_peer();
    let payload = PacketBuffer::from_slice(b"hello mesh");
    dock.send_blob(7, payload).unwrap();

    let (content_type, bytes) = received.recv().unwrap();
    assert_eq!(content_type, 7);
    assert_eq!(bytes, b"hello mesh");
}

#[test]
fn oversize_send_is_rejected_without_touching_the_wire() {
    let (mut dock, _events, received) = dock_with_peer();
    let payload = PacketBuffer::allocate(MAX_BLOB_SIZE + 1).unwrap();
    let err = dock.send_blob(0, payload).unwrap_err();
    assert!(matches!(
        err,
        dockmesh::error::LinkError::PayloadTooLarge { size } if size == MAX_BLOB_SIZE + 1
    ));
    assert!(received.try_recv().is_err());
}

#[test]
fn status_check_drains_pending_receives() {
    let (mut dock, events, _received) = dock_with_peer();
    // queue_inbound happens via the PeerBoardBus; rebuild with access to it.
    let (mut bus, _received2) = PeerBoardBus::new(DockVersion {
        variant: 0,
        protocol_revision: 0,
    });
    bus.queue_inbound(0, b"payload-a".to_vec());
    bus.queue_inbound(0, b"payload-b".to_vec());
    let (cs, _pending) = ManualChipSelect::new();
    let clock = Arc::new(dockmesh::hal::SystemClock::new());
    let (mut dock2, events2) = Dock::new(Box::new(bus), Box::new(cs), clock);
    dock2.check_status().unwrap();

    let mut received_blobs = Vec::new();
    while let Ok(event) = events2.try_recv() {
        if let DockEvent::Received { blob, .. } = event {
            received_blobs.push(blob.to_vec());
        }
    }
    assert_eq!(received_blobs.len(), 2);
    assert_eq!(received_blobs[0], b"payload-a");
    assert_eq!(received_blobs[1], b"payload-b");

    // Exercise the other dock so it's not considered unused.
    dock.request_version().unwrap();
    assert!(matches!(events.recv().unwrap(), DockEvent::Version(_)));
}

#[test]
fn zero_size_receive_is_a_silent_no_op() {
    let (mut dock, events, _received) = dock_with_peer();
    // No blobs queued: the peer reports header.size == 0 and the dock
    // should neither error nor emit a Received event.
    dock.receive_blob().unwrap();
    assert!(events.try_recv().is_err());
}
