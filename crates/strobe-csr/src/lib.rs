#![forbid(unsafe_code)]

//! Command-stream receiver simulation core.
//!
//! The receiver drives one or more simulated engines: it lazily builds each
//! engine's execution context (logical ring context, ring buffer, status
//! page), appends batch-buffer submissions to the engine's ring, submits a
//! context descriptor through the doorbell port, and waits for the
//! completion poll. All of it happens by emitting side effects into a
//! [`strobe_trace::TraceSink`] rather than touching real hardware.
//!
//! Execution is strictly synchronous and single-threaded: one submission at
//! a time, `flush` does not return until the completion condition is
//! (conceptually) satisfied, and nothing here is safe for concurrent
//! mutation. Callers serialize access and must drop their own locks before
//! flushing, since the completion poll blocks.

mod allocation;
mod engine;
mod receiver;

pub use allocation::{BatchBuffer, GraphicsAllocation, MemoryManager};
pub use engine::EngineContext;
pub use receiver::{CommandStreamReceiver, FlushStamp};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CsrError>;

/// Failures the receiver can surface to its caller.
///
/// This is deliberately narrow: invariant violations and resource
/// exhaustion terminate the process (they indicate a defect, not a
/// transient condition), so the only recoverable channel is sink setup and
/// transport I/O.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error(transparent)]
    Sink(#[from] strobe_trace::SinkError),
}

/// Resolved preemption mode, decided by policy layers above the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptionMode {
    Disabled,
    MidBatch,
    ThreadGroup,
    MidThread,
}

/// Receiver construction parameters.
///
/// Explicit by design: there are no ambient debug flags. The preemption
/// mode and its reserved-region size arrive here already resolved; the
/// receiver consumes them, it never chooses them.
#[derive(Debug, Clone, Copy)]
pub struct CsrConfig {
    pub stepping: strobe_hw::Stepping,
    pub preemption_mode: PreemptionMode,
    /// Size of the per-engine preemption scratch region reserved in the
    /// global space at engine bring-up; zero reserves nothing.
    pub preemption_reserve_bytes: u64,
}

impl Default for CsrConfig {
    fn default() -> Self {
        Self {
            stepping: strobe_hw::Stepping::A,
            preemption_mode: PreemptionMode::Disabled,
            preemption_reserve_bytes: 0,
        }
    }
}
