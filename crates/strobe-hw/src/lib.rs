#![forbid(unsafe_code)]

//! Hardware-family capability tables for the strobe command-stream receiver.
//!
//! A [`GfxFamily`] bundles everything the receiver needs to know about one
//! hardware generation: per-engine MMIO bases and bring-up register lists,
//! the logical ring context (LRCA) image layout and its ring field setters,
//! and the command encodings appended to the ring. Families are selected at
//! receiver construction time and handed around as `Arc<dyn GfxFamily>`.

mod descriptor;
mod gen8;

pub use descriptor::ContextDescriptor;
pub use gen8::Gen8Family;

/// One MMIO register/value pair from a bring-up list.
pub type MmioPair = (u32, u32);

/// Capture stepping identifier written into the sink header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stepping {
    A,
    B,
    C,
}

impl Stepping {
    pub fn to_raw(self) -> u8 {
        match self {
            Stepping::A => 0,
            Stepping::B => 1,
            Stepping::C => 2,
        }
    }
}

/// Engines a receiver can drive. Each engine has its own MMIO base; all
/// engine-relative register offsets below are added to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Render command streamer.
    Rcs,
    /// Blitter command streamer.
    Bcs,
    /// Video command streamer.
    Vcs,
    /// Video enhancement command streamer.
    Vecs,
}

impl EngineKind {
    pub const ALL: [EngineKind; 4] = [
        EngineKind::Rcs,
        EngineKind::Bcs,
        EngineKind::Vcs,
        EngineKind::Vecs,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Dense index used for per-engine state tables.
    pub fn index(self) -> usize {
        match self {
            EngineKind::Rcs => 0,
            EngineKind::Bcs => 1,
            EngineKind::Vcs => 2,
            EngineKind::Vecs => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::Rcs => "rcs",
            EngineKind::Bcs => "bcs",
            EngineKind::Vcs => "vcs",
            EngineKind::Vecs => "vecs",
        }
    }
}

/// Register offsets relative to an engine's MMIO base.
///
/// These are fixed across the families this crate models; what varies per
/// family is the MMIO base itself and the bring-up value lists.
pub mod engine_regs {
    /// Hardware status page base address register.
    pub const STATUS_PAGE_BASE: u32 = 0x2080;
    /// Execlist submission port; the context descriptor is written here as
    /// four doorbell writes.
    pub const SUBMIT_PORT: u32 = 0x2230;
    /// Execlist status register polled for completion.
    pub const EXEC_STATUS: u32 = 0x2234;
    /// Completion mask applied to [`EXEC_STATUS`]; the engine is idle when
    /// the masked value equals the mask.
    pub const EXEC_STATUS_IDLE_MASK: u32 = 0x100;
    /// Ring-mode control register loaded by the first-submission LRI.
    pub const RING_MODE: u32 = 0x2244;
    /// Value loaded into [`RING_MODE`] on the first submission to an engine.
    pub const RING_MODE_INIT: u32 = 0x0001_0000;
}

/// Static per-engine description supplied by a family.
#[derive(Debug, Clone, Copy)]
pub struct EngineTraits {
    pub mmio_base: u32,
    /// Logical ring context image size in bytes.
    pub lrca_size: usize,
    /// Required LRCA alignment (also the page-index granularity used by the
    /// context descriptor).
    pub lrca_align: usize,
}

/// Capability surface for one hardware generation.
///
/// Implementations are plain static tables; nothing here mutates state. The
/// receiver is generic over this trait at runtime only (trait object), so a
/// new family is a new impl, not a new receiver.
pub trait GfxFamily: Send + Sync {
    fn name(&self) -> &'static str;

    /// Simulated device identifier written into the capture header.
    fn device_id(&self) -> u32;

    /// Virtual address width of the family; anything above 32 flips the
    /// wide-addressing flag in the context descriptor.
    fn addressing_bits(&self) -> u32;

    /// Register writes issued once per sink before any engine is used.
    fn global_mmio(&self) -> &'static [MmioPair];

    /// Register writes issued when bringing up one engine.
    fn engine_mmio(&self, engine: EngineKind) -> &'static [MmioPair];

    fn engine(&self, engine: EngineKind) -> EngineTraits;

    /// Fill a freshly allocated LRCA image with the family's known-good
    /// template. `lrca.len()` equals [`EngineTraits::lrca_size`]. The
    /// template's ring head/tail/base/control defaults are overwritten by
    /// the setters below during engine bring-up.
    fn init_lrca(&self, engine: EngineKind, lrca: &mut [u8]);

    fn set_ring_head(&self, lrca: &mut [u8], head: u32);
    fn set_ring_tail(&self, lrca: &mut [u8], tail: u32);
    fn set_ring_base(&self, lrca: &mut [u8], base: u32);
    fn set_ring_ctrl(&self, lrca: &mut [u8], ctrl: u32);

    /// Byte offset of the ring-tail value within the LRCA image; the
    /// receiver dumps tail updates to this offset after every submission.
    fn ring_tail_offset(&self) -> u64;

    /// Encode MI_NOOP.
    fn encode_noop(&self, out: &mut Vec<u8>);

    /// Encode MI_LOAD_REGISTER_IMM for one register/value pair.
    fn encode_load_register_imm(&self, out: &mut Vec<u8>, reg: u32, value: u32);

    /// Encode MI_BATCH_BUFFER_START targeting a per-context (PPGTT) address.
    fn encode_batch_buffer_start(&self, out: &mut Vec<u8>, gpu_address: u64);

    fn noop_size(&self) -> usize;
    fn load_register_imm_size(&self) -> usize;
    fn batch_buffer_start_size(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn engine_indices_are_dense_and_unique() {
        let mut seen = [false; EngineKind::COUNT];
        for engine in EngineKind::ALL {
            let idx = engine.index();
            assert!(idx < EngineKind::COUNT);
            assert!(!seen[idx], "duplicate index for {engine:?}");
            seen[idx] = true;
        }
    }

    #[test]
    fn idle_mask_is_a_subset_of_exec_status_poll_contract() {
        // The completion protocol polls for masked-equality, so the mask and
        // the expected value are the same constant.
        assert_eq!(engine_regs::EXEC_STATUS_IDLE_MASK, 0x100);
    }
}
