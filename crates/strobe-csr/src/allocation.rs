//! Graphics allocations and the memory-manager collaborator boundary.

/// A CPU-backed allocation mirrored into the simulated device space.
///
/// Allocations are owned by a memory manager above the receiver; the
/// receiver only reads the contents and maintains the residency stamp. The
/// stamp is the task-counter generation at which the contents were last
/// materialized into the per-context space, or `None` when not resident.
#[derive(Debug)]
pub struct GraphicsAllocation {
    bytes: Vec<u8>,
    gpu_address: u64,
    residency: Option<u32>,
    capture_eligible: bool,
}

impl GraphicsAllocation {
    pub fn new(bytes: Vec<u8>, gpu_address: u64) -> Self {
        Self {
            bytes,
            gpu_address,
            residency: None,
            capture_eligible: true,
        }
    }

    /// Exclude this allocation's contents from capture; residency stamps
    /// still advance for it.
    pub fn set_capture_eligible(&mut self, eligible: bool) {
        self.capture_eligible = eligible;
    }

    pub fn capture_eligible(&self) -> bool {
        self.capture_eligible
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    /// Task generation at which the allocation was last made resident.
    pub fn residency(&self) -> Option<u32> {
        self.residency
    }

    pub(crate) fn set_residency(&mut self, stamp: Option<u32>) {
        self.residency = stamp;
    }
}

/// Read-only view of the region of an allocation submitted for execution.
/// The receiver never owns the backing allocation.
///
/// Both offsets count from the start of the allocation: `used_size` is the
/// exclusive end of the written region (the allocation's fill level), not a
/// byte count, so the submitted span is `[start_offset, used_size)`.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuffer<'a> {
    pub allocation: &'a GraphicsAllocation,
    pub start_offset: u64,
    pub used_size: u64,
}

impl<'a> BatchBuffer<'a> {
    pub fn new(allocation: &'a GraphicsAllocation, start_offset: u64, used_size: u64) -> Self {
        debug_assert!(used_size >= start_offset);
        debug_assert!(used_size <= allocation.len());
        Self {
            allocation,
            start_offset,
            used_size,
        }
    }

    /// Per-context virtual address of the first submitted byte.
    pub fn gpu_start(&self) -> u64 {
        self.allocation.gpu_address() + self.start_offset
    }

    pub fn len(&self) -> u64 {
        self.used_size - self.start_offset
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.allocation.bytes()[self.start_offset as usize..self.used_size as usize]
    }
}

/// Collaborator notified when allocations become resident or evictable.
pub trait MemoryManager {
    fn push_allocation_for_residency(&mut self, allocation: &GraphicsAllocation);

    fn push_allocation_for_eviction(&mut self, allocation: &GraphicsAllocation);

    /// Location of the completion tag compared by layers above the
    /// receiver; the receiver itself never reads it.
    fn tag_address(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn batch_buffer_views_the_submitted_span() {
        let allocation = GraphicsAllocation::new((0u8..64).collect(), 0x10_000);
        let batch = BatchBuffer::new(&allocation, 8, 24);
        assert_eq!(batch.gpu_start(), 0x10_008);
        assert_eq!(batch.len(), 16);
        assert_eq!(batch.bytes(), &(8u8..24).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn new_allocations_start_not_resident() {
        let allocation = GraphicsAllocation::new(vec![0; 16], 0x1000);
        assert_eq!(allocation.residency(), None);
        assert!(allocation.capture_eligible());
    }
}
