//! The link serializer: a single cooperative worker thread that owns a
//! dock's SPI bus and runs one exchange at a time, plus a small
//! ISR-deferral worker that turns "the peer pulled CS low" signals into
//! ordinary jobs on that same queue.
//!
//! Grounded directly on the original's `SequentialExecutor` (one task, one
//! bounded job queue, pop-and-run forever) and `rtos::IsrDeferrer` (a
//! second, smaller queue that exists purely so the real interrupt handler
//! never does anything but push a wait-free signal), expressed with the
//! `mpsc` worker-thread idiom the teacher uses in `stack.rs`/`rx.rs`.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use log::warn;

use super::Dock;
use crate::buffer::PacketBuffer;

/// Capacity of the link serializer's job queue, matching the original's
/// `SequentialExecutor<void()>` constructed with `30`.
pub const JOB_QUEUE_CAPACITY: usize = 30;

/// Capacity of the ISR-deferral queue, matching the original's
/// `IsrDeferrer(10)`.
pub const ISR_QUEUE_CAPACITY: usize = 10;

/// One unit of work the serializer thread can run against its dock.
pub enum LinkJob {
    RequestVersion,
    SendBlob { content_type: u16, blob: PacketBuffer },
    CheckStatus,
    /// What the ISR-deferral worker submits: service any waiting blob, then
    /// re-arm and inspect the interrupt line, same order as the original's
    /// `csInterruptHandler` callback.
    HandleInterrupt,
    Shutdown,
}

/// Owns the worker thread driving one [`Dock`]. Dropping it asks the
/// worker to shut down and waits for it to exit.
pub struct LinkSerializer {
    jobs: mpsc::SyncSender<LinkJob>,
    handle: Option<JoinHandle<()>>,
}

impl LinkSerializer {
    pub fn spawn(mut dock: Dock) -> LinkSerializer {
        let (tx, rx) = mpsc::sync_channel(JOB_QUEUE_CAPACITY);
        let handle = thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    LinkJob::Shutdown => break,
                    LinkJob::RequestVersion => {
                        if let Err(e) = dock.request_version() {
                            warn!("dock version request failed: {}", e);
                        }
                    }
                    LinkJob::SendBlob { content_type, blob } => {
                        if let Err(e) = dock.send_blob(content_type, blob) {
                            warn!("dock send failed: {}", e);
                        }
                    }
                    LinkJob::CheckStatus => {
                        if let Err(e) = dock.check_status() {
                            warn!("dock status check failed: {}", e);
                        }
                    }
                    LinkJob::HandleInterrupt => {
                        if let Err(e) = dock.receive_blob() {
                            warn!("dock receive failed: {}", e);
                        }
                        if let Err(e) = dock.check_interrupt() {
                            warn!("dock interrupt check failed: {}", e);
                        }
                    }
                }
            }
        });
        LinkSerializer {
            jobs: tx,
            handle: Some(handle),
        }
    }

    /// Queues a job. Non-blocking: a full queue means the caller backs off
    /// rather than stalls whatever context submitted the job (normal
    /// context only — never called from the ISR-deferral path, which uses
    /// its own smaller queue instead).
    pub fn submit(&self, job: LinkJob) -> Result<(), LinkJob> {
        self.jobs.try_send(job).map_err(|e| match e {
            mpsc::TrySendError::Full(job) => job,
            mpsc::TrySendError::Disconnected(job) => job,
        })
    }
}

impl Drop for LinkSerializer {
    fn drop(&mut self) {
        let _ = self.jobs.try_send(LinkJob::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Converts "CS line pulled low" signals into [`LinkJob::HandleInterrupt`]
/// jobs on a serializer, off a small bounded queue of its own. `notify` is
/// the only method meant to be called from interrupt-like context: it does
/// a single non-blocking, non-allocating channel send and nothing else.
pub struct IsrDeferrer {
    signal: Option<mpsc::SyncSender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl IsrDeferrer {
    pub fn spawn(serializer: std::sync::Arc<LinkSerializer>) -> IsrDeferrer {
        let (tx, rx) = mpsc::sync_channel(ISR_QUEUE_CAPACITY);
        let handle = thread::spawn(move || {
            while rx.recv().is_ok() {
                if serializer.submit(LinkJob::HandleInterrupt).is_err() {
                    warn!("link serializer queue full, dropping interrupt signal");
                }
            }
        });
        IsrDeferrer {
            signal: Some(tx),
            handle: Some(handle),
        }
    }

    /// Wait-free: drops the signal on the floor if the deferral queue is
    /// already full rather than blocking the caller.
    pub fn notify(&self) {
        if let Some(signal) = &self.signal {
            let _ = signal.try_send(());
        }
    }
}

impl Drop for IsrDeferrer {
    fn drop(&mut self) {
        // Dropping the sender closes the channel and unblocks the worker's
        // `rx.recv()`.
        self.signal.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
