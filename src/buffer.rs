//! A reference-counted, chunked byte buffer.
//!
//! Chunks are filled one SPI transfer at a time by [`crate::dock`], so unlike
//! a `Vec<u8>` the data does not need to live in one contiguous allocation.
//! Cloning a `PacketBuffer` bumps a refcount rather than copying bytes —
//! several owners (the dock worker that received it, the netif layer
//! forwarding it, the routing core inspecting it) can hold the same chunk
//! chain at once.

use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::BufferError;

/// One fixed-capacity chunk of bytes plus however many of those bytes are
/// actually in use.
struct Chunk {
    data: Box<[u8]>,
    len: usize,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Chunk {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

struct Inner {
    chunks: Vec<Chunk>,
    refcount: AtomicUsize,
}

/// A refcounted handle onto a chunk chain.
///
/// `PacketBuffer::allocate` creates a fresh chain with one reference.
/// `Clone` (the Rust equivalent of the original's `reference`/copy
/// constructor) increments that count; `Drop` decrements it and frees the
/// chunks once it reaches zero. [`Self::release`] detaches the chain into a
/// [`RawPacketBuffer`] without touching the count — the original's
/// `release()` escape hatch for handing a buffer across a boundary that
/// only deals in raw handles; [`Self::own`] and [`Self::reference`] are the
/// two ways to turn that raw handle back into an owned `PacketBuffer`.
pub struct PacketBuffer {
    inner: Arc<Inner>,
}

/// A `PacketBuffer`'s chunk chain, detached by [`PacketBuffer::release`].
/// Carries the same refcount obligation the `PacketBuffer` it came from
/// did; it must be turned back into one with [`PacketBuffer::own`] (or
/// peeked at with [`PacketBuffer::reference`]) or the chunks it points to
/// leak.
pub struct RawPacketBuffer(*const Inner);

// SAFETY: the pointee is reached only through `Arc`'s own synchronization
// (`Arc::from_raw`/`Arc::increment_strong_count` in `own`/`reference`);
// holding the bare pointer across threads is the same as holding an
// `Arc<Inner>` across threads, which is already `Send` since `Inner`'s
// fields are.
unsafe impl Send for RawPacketBuffer {}

/// Default chunk size used by [`PacketBuffer::allocate`]. Chosen to match
/// one SPI blob transfer (see `dock::frame`); callers that need a different
/// split should use [`PacketBuffer::with_chunk_size`].
pub const DEFAULT_CHUNK_SIZE: usize = 256;

impl PacketBuffer {
    /// Allocates a new buffer able to hold `size` bytes, split into chunks
    /// of [`DEFAULT_CHUNK_SIZE`].
    pub fn allocate(size: usize) -> Result<Self, BufferError> {
        Self::with_chunk_size(size, DEFAULT_CHUNK_SIZE)
    }

    /// Allocates a new buffer able to hold `size` bytes, split into chunks
    /// of at most `chunk_size` bytes each.
    pub fn with_chunk_size(size: usize, chunk_size: usize) -> Result<Self, BufferError> {
        if chunk_size == 0 {
            return Err(BufferError::OutOfMemory);
        }
        let mut chunks = Vec::new();
        let mut remaining = size;
        while remaining > 0 {
            let this_chunk = remaining.min(chunk_size);
            let mut chunk = Chunk::new(this_chunk);
            chunk.len = this_chunk;
            chunks.push(chunk);
            remaining -= this_chunk;
        }
        if chunks.is_empty() {
            chunks.push(Chunk::new(0));
        }
        Ok(PacketBuffer {
            inner: Arc::new(Inner {
                chunks,
                refcount: AtomicUsize::new(1),
            }),
        })
    }

    /// An empty, zero-length buffer. Mirrors the original's `PBuf::empty()`,
    /// used as a sentinel for "nothing received this exchange".
    pub fn empty() -> Self {
        PacketBuffer {
            inner: Arc::new(Inner {
                chunks: Vec::new(),
                refcount: AtomicUsize::new(1),
            }),
        }
    }

    /// Builds a buffer owning a single chunk copied from `data`. Convenient
    /// for tests and for packets that arrive already contiguous (e.g. a
    /// Send blob read off the wire in one SPI transfer).
    pub fn from_slice(data: &[u8]) -> Self {
        let mut chunk = Chunk::new(data.len());
        chunk.as_mut_slice().copy_from_slice(data);
        chunk.len = data.len();
        PacketBuffer {
            inner: Arc::new(Inner {
                chunks: vec![chunk],
                refcount: AtomicUsize::new(1),
            }),
        }
    }

    /// Total length across all chunks.
    pub fn len(&self) -> usize {
        self.inner.chunks.iter().map(|c| c.len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if the whole buffer lives in a single chunk (the original's
    /// `simple()` — worth checking before paying for a chunk-crossing copy).
    pub fn is_simple(&self) -> bool {
        self.inner.chunks.len() <= 1
    }

    /// Number of outstanding handles to this chunk chain.
    pub fn refcount(&self) -> usize {
        self.inner.refcount.load(Ordering::Acquire)
    }

    /// Iterates the chunk chain in order, yielding each chunk's bytes.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.inner.chunks.iter().map(Chunk::as_slice)
    }

    /// Iterates the chunk chain for in-place writes — used while filling a
    /// freshly allocated buffer one SPI transfer per chunk. Returns `None`
    /// if another handle to this buffer exists, since mutating shared
    /// chunks would violate the refcount contract.
    pub fn chunks_mut(&mut self) -> Option<impl Iterator<Item = &mut [u8]>> {
        Arc::get_mut(&mut self.inner).map(|inner| inner.chunks.iter_mut().map(Chunk::as_mut_slice))
    }

    /// Reads the byte at `index`, walking the chunk chain as needed. O(chunk
    /// count), same as the original's traversal in `PBuf::operator[]`.
    pub fn get(&self, index: usize) -> Result<u8, BufferError> {
        let mut remaining = index;
        for chunk in &self.inner.chunks {
            if remaining < chunk.len {
                return Ok(chunk.as_slice()[remaining]);
            }
            remaining -= chunk.len;
        }
        Err(BufferError::IndexOutOfBounds {
            index,
            len: self.len(),
        })
    }

    /// Copies the whole chunk chain into one contiguous `Vec<u8>`. Used at
    /// boundaries that need a flat slice (e.g. handing a Send blob to the
    /// link serializer).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Detaches the raw chunk chain without freeing it, transferring the
    /// obligation to free it to whoever ends up with the returned
    /// [`RawPacketBuffer`]. Mirrors the original's `release()`.
    pub fn release(self) -> RawPacketBuffer {
        // `self` has a `Drop` impl, so its `inner` field can't be moved out
        // directly; `ManuallyDrop` lets us read it without that `Drop`
        // running (which would decrement the refcount we are handing off,
        // not releasing).
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` never drops, so `inner` is read exactly once and
        // nothing double-frees it.
        let inner = unsafe { std::ptr::read(&this.inner) };
        RawPacketBuffer(Arc::into_raw(inner))
    }

    /// Adopts a raw buffer previously detached with [`Self::release`],
    /// without incrementing the refcount — the raw form already represents
    /// the one unit of ownership `release` transferred.
    pub fn own(raw: RawPacketBuffer) -> PacketBuffer {
        // SAFETY: `raw.0` was produced by `Arc::into_raw` inside `release`
        // and is consumed here exactly once, so this exactly reverses it.
        let inner = unsafe { Arc::from_raw(raw.0) };
        PacketBuffer { inner }
    }

    /// Takes a new reference on a raw buffer without consuming it — unlike
    /// [`Self::own`], the caller still holding `raw` keeps their own
    /// obligation to eventually `own` (and free) it.
    pub fn reference(raw: &RawPacketBuffer) -> PacketBuffer {
        // SAFETY: `raw.0` points at a live `Inner` for as long as `raw`
        // exists (its owner hasn't called `own` on it yet); bumping the
        // strong count and reconstructing an `Arc` from the same pointer is
        // the standard pattern for cloning through a raw pointer.
        unsafe {
            Arc::increment_strong_count(raw.0);
            let inner = Arc::from_raw(raw.0);
            inner.refcount.fetch_add(1, Ordering::AcqRel);
            PacketBuffer { inner }
        }
    }
}

impl Clone for PacketBuffer {
    /// Takes a new reference on the same chunk chain — no bytes are copied.
    fn clone(&self) -> Self {
        self.inner.refcount.fetch_add(1, Ordering::AcqRel);
        PacketBuffer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        self.inner.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_splits_into_chunks() {
        let buf = PacketBuffer::with_chunk_size(10, 4).unwrap();
        let sizes: Vec<usize> = buf.chunks().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn empty_buffer_has_zero_length() {
        let buf = PacketBuffer::empty();
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn indexed_access_crosses_chunk_boundaries() {
        let buf = PacketBuffer::from_slice(b"hello world");
        for (i, expected) in b"hello world".iter().enumerate() {
            assert_eq!(buf.get(i).unwrap(), *expected);
        }
        assert!(buf.get(11).is_err());
    }

    #[test]
    fn clone_increments_refcount_and_drop_decrements() {
        let buf = PacketBuffer::from_slice(b"x");
        assert_eq!(buf.refcount(), 1);
        let second = buf.clone();
        assert_eq!(buf.refcount(), 2);
        assert_eq!(second.refcount(), 2);
        drop(second);
        assert_eq!(buf.refcount(), 1);
    }

    #[test]
    fn to_vec_reassembles_chunk_chain() {
        let buf = PacketBuffer::with_chunk_size(6, 2).unwrap();
        assert_eq!(buf.to_vec(), vec![0u8; 6]);
    }

    #[test]
    fn release_then_own_round_trips_without_changing_refcount() {
        let buf = PacketBuffer::from_slice(b"raw round trip");
        assert_eq!(buf.refcount(), 1);
        let raw = buf.release();
        let owned = PacketBuffer::own(raw);
        assert_eq!(owned.refcount(), 1);
        assert_eq!(owned.to_vec(), b"raw round trip");
    }

    #[test]
    fn reference_increments_refcount_leaving_the_raw_handle_valid() {
        let buf = PacketBuffer::from_slice(b"shared");
        let raw = buf.release();
        let peeked = PacketBuffer::reference(&raw);
        assert_eq!(peeked.refcount(), 2);
        assert_eq!(peeked.to_vec(), b"shared");
        drop(peeked);

        // The raw handle itself still carries its own obligation; owning it
        // now sees the count dropped back by the peek above.
        let owned = PacketBuffer::own(raw);
        assert_eq!(owned.refcount(), 1);
    }
}
