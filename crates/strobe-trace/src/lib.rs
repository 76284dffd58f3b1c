#![forbid(unsafe_code)]

//! Trace sinks for the strobe command-stream receiver.
//!
//! A [`TraceSink`] is an append-only recorder of the receiver's side
//! effects: register writes, memory writes, address-space reservations and
//! register-poll requests. Two backends implement the same contract:
//!
//! - [`FileSink`]: a durable block-structured capture file (paired with
//!   [`CaptureReader`] for tooling and tests);
//! - [`TbxSink`]: a live transport that forwards every side effect to a
//!   simulator over TCP, really polls registers, and can read simulated
//!   memory back.
//!
//! The backends diverge on purpose in how the ring tail is padded after a
//!   submission; [`TraceSink::tail_padding`] exposes that policy so the
//! submission algorithm is written once.

mod file;
pub mod format;
mod reader;
mod tbx;

pub use file::FileSink;
pub use reader::{CaptureReader, Record};
pub use tbx::{TbxConfig, TbxSink, tbx_wire};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The capture destination could not be opened or written. Surfaced at
    /// setup time to the caller; never silently ignored.
    #[error("capture io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport protocol violation: {0}")]
    Protocol(&'static str),

    #[error("operation not supported by this sink: {0}")]
    Unsupported(&'static str),
}

/// Which translation table a memory write belongs to in the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpaceTag {
    /// Device-local memory.
    Local,
    /// System memory visible through a translation table.
    Nonlocal,
}

impl AddressSpaceTag {
    pub fn to_raw(self) -> u8 {
        match self {
            AddressSpaceTag::Local => 0,
            AddressSpaceTag::Nonlocal => 1,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(AddressSpaceTag::Local),
            1 => Some(AddressSpaceTag::Nonlocal),
            _ => None,
        }
    }
}

/// Content annotation attached to a memory write so capture consumers can
/// tell workload bytes from control structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentHint {
    None,
    /// Caller-supplied batch buffer bytes.
    BatchBuffer,
    /// Ring-buffer command bytes.
    CommandBuffer,
    /// Logical ring context image.
    LogicalContext,
}

impl ContentHint {
    pub fn to_raw(self) -> u8 {
        match self {
            ContentHint::None => 0,
            ContentHint::BatchBuffer => 1,
            ContentHint::CommandBuffer => 2,
            ContentHint::LogicalContext => 3,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ContentHint::None),
            1 => Some(ContentHint::BatchBuffer),
            2 => Some(ContentHint::CommandBuffer),
            3 => Some(ContentHint::LogicalContext),
            _ => None,
        }
    }
}

/// What a capture consumer (or the live transport itself) does when a
/// register poll never satisfies its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutAction {
    /// Fatal tool failure; there is no notion of a slow-but-alive device.
    Abort,
    /// Record the miss and continue. Never used by the receiver; kept for
    /// capture-format completeness.
    Ignore,
}

impl TimeoutAction {
    pub fn to_raw(self) -> u8 {
        match self {
            TimeoutAction::Abort => 0,
            TimeoutAction::Ignore => 1,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TimeoutAction::Abort),
            1 => Some(TimeoutAction::Ignore),
            _ => None,
        }
    }
}

/// Per-backend ring tail padding policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailPadding {
    /// Pad with no-ops until the tail is 8-byte aligned (file backend).
    QwordAlign,
    /// Always append exactly one no-op after the batch-buffer start,
    /// whatever alignment results (live backend).
    TrailingNoop,
}

/// Append-only recorder of receiver side effects.
///
/// Calls are strictly sequential; sinks are not designed for concurrent
/// mutation and the receiver never shares one across threads.
pub trait TraceSink {
    /// Write the capture header / perform the transport handshake.
    fn init(&mut self, stepping: u8, device_id: u32) -> Result<()>;

    fn write_mmio(&mut self, offset: u32, value: u32) -> Result<()>;

    fn add_memory_write(
        &mut self,
        physical: u64,
        data: &[u8],
        space: AddressSpaceTag,
        hint: ContentHint,
    ) -> Result<()>;

    fn reserve_ggtt(&mut self, virtual_addr: u64, len: u64, physical: u64) -> Result<()>;

    fn reserve_ppgtt(&mut self, virtual_addr: u64, len: u64, physical: u64) -> Result<()>;

    fn register_poll(
        &mut self,
        register: u32,
        mask: u32,
        expected: u32,
        poll_not_equal: bool,
        timeout_action: TimeoutAction,
    ) -> Result<()>;

    /// Diagnostic annotation with no semantic effect. Sinks may drop it.
    fn add_comment(&mut self, text: &str) -> Result<()>;

    /// Read simulated memory back into `dest`. Only the live transport
    /// supports this.
    fn read_memory(&mut self, _physical: u64, dest: &mut [u8]) -> Result<()> {
        let _ = dest;
        Err(SinkError::Unsupported("read_memory"))
    }

    fn close(&mut self) -> Result<()>;

    fn tail_padding(&self) -> TailPadding;
}
