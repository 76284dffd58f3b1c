//! Per-engine execution context.

use strobe_gtt::PAGE_SIZE;

/// Ring buffer capacity: four pages, fixed across families.
pub const RING_SIZE: u64 = 4 * PAGE_SIZE;

/// Mutable hardware state for one engine, built lazily on the first
/// submission and torn down with the receiver.
///
/// The three buffers form one arena: nothing outside the receiver holds a
/// reference to them, and they are destroyed together. `ring_tail` is the
/// ring's write cursor; it is strictly below [`RING_SIZE`] at all times and
/// zero only right after creation or a wraparound.
#[derive(Debug)]
pub struct EngineContext {
    pub(crate) lrca: Vec<u8>,
    pub(crate) lrca_virtual: u64,
    pub(crate) status_page: Vec<u8>,
    pub(crate) status_virtual: u64,
    pub(crate) ring: Vec<u8>,
    pub(crate) ring_virtual: u64,
    pub(crate) ring_tail: u32,
    /// Preemption scratch region, reserved only when the resolved
    /// preemption configuration asks for one.
    pub(crate) preemption_virtual: Option<u64>,
}

impl EngineContext {
    /// Global virtual address of the logical ring context image.
    pub fn lrca_virtual(&self) -> u64 {
        self.lrca_virtual
    }

    pub fn status_page_virtual(&self) -> u64 {
        self.status_virtual
    }

    pub fn status_page(&self) -> &[u8] {
        &self.status_page
    }

    pub fn ring_virtual(&self) -> u64 {
        self.ring_virtual
    }

    pub fn ring_tail(&self) -> u32 {
        self.ring_tail
    }

    pub fn ring_capacity(&self) -> u64 {
        self.ring.len() as u64
    }

    pub fn preemption_virtual(&self) -> Option<u64> {
        self.preemption_virtual
    }
}
