//! A single dock: one SPI device plus the GPIO line that doubles as chip
//! select and interrupt input, wired through the Version/Status/Interrupt/
//! Send/Receive exchange sequence described in spec §4.2.
//!
//! A `Dock` does not own a worker thread itself — [`serializer::LinkSerializer`]
//! is the single cooperative worker that calls into it, one exchange at a
//! time, the same way the original's `SequentialExecutor` ran one lambda at
//! a time off its job queue. The five semaphores below bound how many of
//! each exchange kind may be outstanding, providing backpressure rather than
//! mutual exclusion (the serializer already guarantees mutual exclusion).

pub mod frame;
pub mod semaphore;
pub mod serializer;

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::PacketBuffer;
use crate::error::LinkError;
use crate::hal::{ChipSelect, Clock, SpiBus};

use frame::{BlobHeader, Command, DockStatus, DockVersion};
use semaphore::CountingSemaphore;

/// Gap observed between the header phase and the payload phase of an
/// exchange, and again after releasing chip select. Matches the original's
/// half-tick `slaveDelay()`.
const SLAVE_DELAY: Duration = Duration::from_micros(500);

/// Events a dock reports back to whoever is driving it (normally
/// [`crate::netif`]).
#[derive(Debug)]
pub enum DockEvent {
    Version(DockVersion),
    Status(DockStatus),
    Interrupt(u16),
    Received {
        content_type: u16,
        blob: PacketBuffer,
    },
}

pub struct Dock {
    bus: Box<dyn SpiBus>,
    cs: Box<dyn ChipSelect>,
    clock: Arc<dyn Clock>,
    events: mpsc::Sender<DockEvent>,

    version_sem: Arc<CountingSemaphore>,
    isr_sem: Arc<CountingSemaphore>,
    status_sem: Arc<CountingSemaphore>,
    send_sem: Arc<CountingSemaphore>,
    recv_sem: Arc<CountingSemaphore>,
}

impl Dock {
    /// Builds a dock and its event channel. The semaphore capacities
    /// (1/2/2/2/10) match the original's `Dock` constructor exactly.
    pub fn new(
        bus: Box<dyn SpiBus>,
        cs: Box<dyn ChipSelect>,
        clock: Arc<dyn Clock>,
    ) -> (Dock, mpsc::Receiver<DockEvent>) {
        let (tx, rx) = mpsc::channel();
        let dock = Dock {
            bus,
            cs,
            clock,
            events: tx,
            version_sem: Arc::new(CountingSemaphore::new(1)),
            isr_sem: Arc::new(CountingSemaphore::new(2)),
            status_sem: Arc::new(CountingSemaphore::new(2)),
            send_sem: Arc::new(CountingSemaphore::new(2)),
            recv_sem: Arc::new(CountingSemaphore::new(10)),
        };
        (dock, rx)
    }

    /// True if the chip-select/interrupt line has a pending interrupt —
    /// the signal that drives the ISR-deferral worker in
    /// [`serializer::LinkSerializer`].
    pub fn interrupt_pending(&self) -> bool {
        self.cs.is_interrupt_pending()
    }

    fn transaction<T, F>(&mut self, body: F) -> Result<T, LinkError>
    where
        F: FnOnce(&mut Self) -> Result<T, LinkError>,
    {
        self.cs.assert_low();
        let result = body(self);
        self.cs.release();
        self.clock.sleep(SLAVE_DELAY);
        result
    }

    /// Requests the peer's firmware variant and protocol revision.
    pub fn request_version(&mut self) -> Result<(), LinkError> {
        let _permit = self.version_sem.take_guard();
        let version = self.transaction(|dock| {
            let mut discard = [0u8; 1];
            dock.bus.transfer(&[Command::Version as u8], &mut discard)?;
            dock.clock.sleep(SLAVE_DELAY);

            let mut payload = [0u8; 4];
            dock.bus.transfer(&[0u8; 4], &mut payload)?;
            Ok(DockVersion::parse(&payload))
        })?;
        let _ = self.events.send(DockEvent::Version(version));
        Ok(())
    }

    /// Sends one blob. Blocks on `send_sem` — at most two sends may be
    /// queued against the serializer at once.
    pub fn send_blob(&mut self, content_type: u16, blob: PacketBuffer) -> Result<(), LinkError> {
        let _permit = self.send_sem.take_guard();
        let header = BlobHeader::checked(content_type, blob.len())?;

        self.transaction(|dock| {
            let mut discard = [0u8; 1];
            dock.bus.transfer(&[Command::Send as u8], &mut discard)?;
            dock.clock.sleep(SLAVE_DELAY);

            let encoded = header.encode();
            let mut discard4 = [0u8; 4];
            dock.bus.transfer(&encoded, &mut discard4)?;

            for chunk in blob.chunks() {
                let mut discard_chunk = vec![0u8; chunk.len()];
                dock.bus.transfer(chunk, &mut discard_chunk)?;
            }
            Ok(())
        })
    }

    /// Reads one waiting blob off the wire, if the receive-permit budget
    /// allows it. A full budget means the caller should back off rather
    /// than block — mirrors the original's `tryTake()` + silent return.
    pub fn receive_blob(&mut self) -> Result<(), LinkError> {
        let Some(_permit) = self.recv_sem.try_take_guard() else {
            return Ok(());
        };

        let received = self.transaction(|dock| {
            let mut discard = [0u8; 1];
            dock.bus.transfer(&[Command::Receive as u8], &mut discard)?;
            dock.clock.sleep(SLAVE_DELAY);

            let mut header_buf = [0u8; 4];
            dock.bus.transfer(&[0u8; 4], &mut header_buf)?;
            let header = BlobHeader::parse(&header_buf);

            if header.size == 0 || header.size as usize > frame::MAX_BLOB_SIZE {
                return Ok(None);
            }

            let mut blob = PacketBuffer::allocate(header.size as usize)?;
            {
                let chunks = blob
                    .chunks_mut()
                    .expect("freshly allocated buffer has exactly one owner");
                for chunk in chunks {
                    let tx = vec![0u8; chunk.len()];
                    dock.bus.transfer(&tx, chunk)?;
                }
            }
            Ok(Some((header.content_type, blob)))
        })?;

        if let Some((content_type, blob)) = received {
            let _ = self.events.send(DockEvent::Received { content_type, blob });
        }
        Ok(())
    }

    /// Polls pending send/receive counts and services any blobs the peer
    /// says are waiting for us.
    pub fn check_status(&mut self) -> Result<(), LinkError> {
        let Some(_permit) = self.status_sem.try_take_guard() else {
            return Ok(());
        };

        let status = self.transaction(|dock| {
            let mut discard = [0u8; 5];
            let mut request = [0u8; 5];
            request[0] = Command::Status as u8;
            dock.bus.transfer(&request, &mut discard)?;
            dock.clock.sleep(SLAVE_DELAY);

            let mut payload = [0u8; 12];
            dock.bus.transfer(&[0u8; 12], &mut payload)?;
            Ok(DockStatus::parse(&payload))
        })?;

        for _ in 0..status.pending_receive {
            self.receive_blob()?;
        }
        let _ = self.events.send(DockEvent::Status(status));
        Ok(())
    }

    /// Acknowledges a pending interrupt and reads back which conditions
    /// caused it. A `BLOB` condition triggers an immediate status check,
    /// same as the original.
    pub fn check_interrupt(&mut self) -> Result<(), LinkError> {
        let Some(_permit) = self.isr_sem.try_take_guard() else {
            return Ok(());
        };

        let flags = self.transaction(|dock| {
            let mut discard = [0u8; 3];
            let mut request = [0u8; 3];
            request[0] = Command::Interrupt as u8;
            let mask = frame::interrupt_flag::CONNECT | frame::interrupt_flag::BLOB;
            request[1..3].copy_from_slice(&mask.to_le_bytes());
            dock.bus.transfer(&request, &mut discard)?;
            dock.clock.sleep(SLAVE_DELAY);

            let mut payload = [0u8; 2];
            dock.bus.transfer(&[0u8; 2], &mut payload)?;
            Ok(u16::from_le_bytes(payload))
        })?;

        if flags & frame::interrupt_flag::BLOB != 0 {
            self.check_status()?;
        }
        let _ = self.events.send(DockEvent::Interrupt(flags));
        Ok(())
    }
}
