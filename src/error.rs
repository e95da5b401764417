use std::fmt;
use std::io;

/// Errors from the buffer pool: running out of chunks, or asking for more
/// than a `PacketBuffer` actually holds.
#[derive(Debug, Eq, PartialEq)]
pub enum BufferError {
    /// The chunk pool has no free chunks left to satisfy an `allocate`.
    OutOfMemory,

    /// An index passed to indexed access fell outside the buffer's length.
    IndexOutOfBounds { index: usize, len: usize },
}

impl fmt::Display for BufferError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BufferError::OutOfMemory => fmt.write_str("out of packet buffer chunks"),
            BufferError::IndexOutOfBounds { index, len } => {
                write!(fmt, "index {} out of bounds for buffer of length {}", index, len)
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// Errors from a single dock exchange (the Version/Status/Interrupt/Send/
/// Receive command sequence over one SPI link).
#[derive(Debug)]
pub enum LinkError {
    /// A `send` payload did not fit in a single blob (larger than 2048
    /// bytes).
    PayloadTooLarge { size: usize },

    /// Underlying I/O error surfaced by the HAL bus implementation.
    Io(io::Error),

    /// A netif's raw link-transmit primitive was called directly instead of
    /// going through `output_ip6`/the module aggregator's forwarding path.
    /// This is an invariant violation (spec §6/§7: "fatal; halt") — a
    /// library cannot halt its host process, so it surfaces this instead;
    /// callers wanting the original's halt behavior should `.expect()` it.
    DirectLinkOutput,

    /// Any other error not covered by the more specific variants.
    Other(String),
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        LinkError::Io(e)
    }
}

impl From<BufferError> for LinkError {
    fn from(e: BufferError) -> Self {
        LinkError::Other(e.to_string())
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LinkError::PayloadTooLarge { size } => {
                write!(fmt, "payload of {} bytes exceeds the 2048 byte blob limit", size)
            }
            LinkError::Io(ref e) => write!(fmt, "dock I/O error: {}", e),
            LinkError::DirectLinkOutput => {
                fmt.write_str("link_output called directly instead of through output_ip6")
            }
            LinkError::Other(ref s) => write!(fmt, "dock error: {}", s),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            LinkError::Io(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Errors from the routing core: malformed advertisement frames, mostly.
#[derive(Debug, Eq, PartialEq)]
pub enum RoutingError {
    /// An advertised-prefix frame was shorter than the 3-byte header.
    FrameTooShort,

    /// The frame's address-length byte was not 16 (the only width this
    /// crate speaks, since it only ever carries IPv6 prefixes).
    UnsupportedAddressLength(u8),

    /// The frame's declared entry count didn't match its actual length.
    EntryCountMismatch { declared: usize, actual_len: usize },
}

impl fmt::Display for RoutingError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RoutingError::FrameTooShort => fmt.write_str("advertisement frame shorter than its header"),
            RoutingError::UnsupportedAddressLength(len) => {
                write!(fmt, "unsupported address length {} (expected 16)", len)
            }
            RoutingError::EntryCountMismatch { declared, actual_len } => write!(
                fmt,
                "frame declares {} entries but has length {}",
                declared, actual_len
            ),
        }
    }
}

impl std::error::Error for RoutingError {}
