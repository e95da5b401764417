//! Software test doubles for the HAL traits, letting dock/netif/routing
//! logic run against a scripted peer instead of real hardware.
//!
//! Grounded on `tests/mockpnet/mod.rs`'s `MockPnet` (a fake datalink
//! channel pair the teacher's own integration tests drive librips with):
//! same role, one level lower in the stack — a fake SPI peer instead of a
//! fake Ethernet channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::dock::frame::{BlobHeader, Command, DockStatus, DockVersion};
use crate::hal::{ChipSelect, Clock, SpiBus};

enum Phase {
    Idle,
    Version,
    Status,
    Interrupt,
    SendHeader,
    SendPayload {
        content_type: u16,
        remaining: usize,
        buf: Vec<u8>,
    },
    ReceiveHeader,
    ReceivePayload {
        payload: Vec<u8>,
        offset: usize,
    },
}

/// A scripted peer board: replies to the Version/Status/Interrupt/Send/
/// Receive sequence the way a real dock on the other end of the SPI link
/// would, without needing real hardware.
///
/// Blobs queued with [`PeerBoardBus::queue_inbound`] are handed to the real
/// `Dock` the next time it polls status/receive; blobs the real `Dock`
/// sends arrive on the channel returned by [`PeerBoardBus::new`].
pub struct PeerBoardBus {
    phase: Phase,
    version: DockVersion,
    outbox: VecDeque<(u16, Vec<u8>)>,
    received: mpsc::Sender<(u16, Vec<u8>)>,
}

impl PeerBoardBus {
    pub fn new(version: DockVersion) -> (PeerBoardBus, mpsc::Receiver<(u16, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel();
        (
            PeerBoardBus {
                phase: Phase::Idle,
                version,
                outbox: VecDeque::new(),
                received: tx,
            },
            rx,
        )
    }

    /// Queues a blob the real dock will receive on its next status/receive
    /// poll.
    pub fn queue_inbound(&mut self, content_type: u16, payload: Vec<u8>) {
        self.outbox.push_back((content_type, payload));
    }
}

impl SpiBus for PeerBoardBus {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> std::io::Result<()> {
        match &mut self.phase {
            Phase::Idle => {
                if let Some(cmd) = tx.first().copied().and_then(Command::from_byte) {
                    self.phase = match cmd {
                        Command::Version => Phase::Version,
                        Command::Status => Phase::Status,
                        Command::Interrupt => Phase::Interrupt,
                        Command::Send => Phase::SendHeader,
                        Command::Receive => Phase::ReceiveHeader,
                    };
                }
            }
            Phase::Version => {
                let encoded = [
                    self.version.variant.to_le_bytes(),
                    self.version.protocol_revision.to_le_bytes(),
                ]
                .concat();
                copy_into(rx, &encoded);
                self.phase = Phase::Idle;
            }
            Phase::Status => {
                let status = DockStatus {
                    flags: 0,
                    pending_send: 0,
                    pending_receive: self.outbox.len().min(u8::MAX as usize) as u8,
                    internal_voltage: 0.0,
                    internal_current: 0.0,
                    external_voltage: 0.0,
                    external_current: 0.0,
                };
                copy_into(rx, &encode_status(&status));
                self.phase = Phase::Idle;
            }
            Phase::Interrupt => {
                let flags: u16 = if self.outbox.is_empty() { 0 } else { crate::dock::frame::interrupt_flag::BLOB };
                copy_into(rx, &flags.to_le_bytes());
                self.phase = Phase::Idle;
            }
            Phase::SendHeader => {
                let mut header_bytes = [0u8; 4];
                let n = tx.len().min(4);
                header_bytes[..n].copy_from_slice(&tx[..n]);
                let header = BlobHeader::parse(&header_bytes);
                self.phase = Phase::SendPayload {
                    content_type: header.content_type,
                    remaining: header.size as usize,
                    buf: Vec::with_capacity(header.size as usize),
                };
            }
            Phase::SendPayload {
                content_type,
                remaining,
                buf,
            } => {
                buf.extend_from_slice(tx);
                *remaining = remaining.saturating_sub(tx.len());
                if *remaining == 0 {
                    let _ = self.received.send((*content_type, std::mem::take(buf)));
                    self.phase = Phase::Idle;
                }
            }
            Phase::ReceiveHeader => {
                if let Some((content_type, payload)) = self.outbox.pop_front() {
                    let header = BlobHeader {
                        content_type,
                        size: payload.len() as u16,
                    };
                    copy_into(rx, &header.encode());
                    self.phase = Phase::ReceivePayload { payload, offset: 0 };
                } else {
                    copy_into(rx, &[0u8; 4]);
                    self.phase = Phase::Idle;
                }
            }
            Phase::ReceivePayload { payload, offset } => {
                let n = tx.len().min(payload.len() - *offset);
                rx[..n].copy_from_slice(&payload[*offset..*offset + n]);
                *offset += n;
                if *offset >= payload.len() {
                    self.phase = Phase::Idle;
                }
            }
        }
        Ok(())
    }
}

fn copy_into(rx: &mut [u8], data: &[u8]) {
    let n = rx.len().min(data.len());
    rx[..n].copy_from_slice(&data[..n]);
}

fn encode_status(status: &DockStatus) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..2].copy_from_slice(&status.flags.to_le_bytes());
    out[2] = status.pending_send;
    out[3] = status.pending_receive;
    let scale = |v: f32| ((v * 255.0) as i16).to_le_bytes();
    out[4..6].copy_from_slice(&scale(status.internal_voltage));
    out[6..8].copy_from_slice(&scale(status.internal_current));
    out[8..10].copy_from_slice(&scale(status.external_voltage));
    out[10..12].copy_from_slice(&scale(status.external_current));
    out
}

/// A chip-select line with no real hardware underneath: drives/releases
/// are no-ops, and interrupt-pending state is a plain flag a test can set
/// directly to simulate the peer requesting the bus.
pub struct ManualChipSelect {
    pending: Arc<AtomicBool>,
}

impl ManualChipSelect {
    pub fn new() -> (ManualChipSelect, Arc<AtomicBool>) {
        let pending = Arc::new(AtomicBool::new(false));
        (
            ManualChipSelect {
                pending: Arc::clone(&pending),
            },
            pending,
        )
    }
}

impl ChipSelect for ManualChipSelect {
    fn assert_low(&mut self) {}
    fn release(&mut self) {}

    fn is_interrupt_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn clear_interrupt(&mut self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// A deterministic clock for tests that exercise route aging without
/// sleeping real wall-clock time.
pub struct FakeClock {
    now: Mutex<Duration>,
}

impl FakeClock {
    pub fn new() -> FakeClock {
        FakeClock {
            now: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, dur: Duration) {
        self.advance(dur);
        // A real (tiny) pause keeps a caller that loops on this clock, such
        // as the routing core's broadcast loop, from spinning a CPU core
        // flat out for the duration of a test.
        std::thread::sleep(Duration::from_millis(1));
    }
}
