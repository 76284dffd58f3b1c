//! Gen8-class family tables.
//!
//! The LRCA image is two pages: a per-context status page followed by the
//! register state context. The register context opens with a
//! load-register-immediate block that the hardware replays on context
//! restore; the ring head/tail/base/control values live inside that block at
//! fixed byte offsets, which is what lets the receiver dump a tail update as
//! a 4-byte memory write instead of re-dumping the whole image.

use crate::{EngineKind, EngineTraits, GfxFamily, MmioPair};

const PAGE: usize = 4096;

const LRCA_SIZE: usize = 2 * PAGE;
const LRCA_ALIGN: usize = PAGE;

/// Start of the register state context within the LRCA image.
const CTX_BASE: usize = PAGE;

/// Byte offsets of the ring register/value slots inside the LRCA image.
/// Values sit one dword after their register address slot.
const CTX_LRI_HEADER: usize = CTX_BASE + 0x04;
const CTX_CONTEXT_CONTROL_REG: usize = CTX_BASE + 0x08;
const CTX_CONTEXT_CONTROL_VAL: usize = CTX_BASE + 0x0C;
const CTX_RING_HEAD_REG: usize = CTX_BASE + 0x10;
const CTX_RING_HEAD_VAL: usize = CTX_BASE + 0x14;
const CTX_RING_TAIL_REG: usize = CTX_BASE + 0x18;
const CTX_RING_TAIL_VAL: usize = CTX_BASE + 0x1C;
const CTX_RING_BASE_REG: usize = CTX_BASE + 0x20;
const CTX_RING_BASE_VAL: usize = CTX_BASE + 0x24;
const CTX_RING_CTRL_REG: usize = CTX_BASE + 0x28;
const CTX_RING_CTRL_VAL: usize = CTX_BASE + 0x2C;

/// Context-control default: inhibit synchronous context switch, with the
/// matching write-enable mask in the upper half.
const CONTEXT_CONTROL_DEFAULT: u32 = 0x0009_0009;

// Command headers. MI commands carry their dword length minus two in the
// low bits of the header.
const MI_NOOP: u32 = 0x0000_0000;
const MI_LOAD_REGISTER_IMM: u32 = (0x22 << 23) | 1;
const MI_BATCH_BUFFER_START: u32 = (0x31 << 23) | 1;
/// Address-space indicator: the start address is translated through the
/// per-context tables, not the global ones.
const BBS_ADDRESS_SPACE_PPGTT: u32 = 1 << 8;

const MI_NOOP_SIZE: usize = 4;
const MI_LOAD_REGISTER_IMM_SIZE: usize = 12;
const MI_BATCH_BUFFER_START_SIZE: usize = 12;

const RCS_BASE: u32 = 0x0000_0000;
const VCS_BASE: u32 = 0x0001_0000;
const VECS_BASE: u32 = 0x0001_8000;
const BCS_BASE: u32 = 0x0002_0000;

/// Engine-relative offsets of the ring registers named by the LRI block.
const RING_TAIL_REG: u32 = 0x2030;
const RING_HEAD_REG: u32 = 0x2034;
const RING_BASE_REG: u32 = 0x2038;
const RING_CTRL_REG: u32 = 0x203C;
const CONTEXT_CONTROL_REG: u32 = 0x2244;

/// Execlist-mode enable, masked write.
const EXECLIST_MODE_REG: u32 = 0x229C;
const EXECLIST_MODE_ENABLE: u32 = 0xFFFF_8280;
/// Per-engine hardware status mode select.
const HW_STATUS_MODE_REG: u32 = 0x2098;

static GLOBAL_MMIO: [MmioPair; 2] = [
    // FORCEWAKE_MT: grab the kernel wake bit (upper half is the write mask).
    (0x0000_A188, 0x0001_0001),
    // RC state control: hold RC0 for the duration of the capture.
    (0x0000_A090, 0x0000_0000),
];

static RCS_MMIO: [MmioPair; 2] = [
    (RCS_BASE + EXECLIST_MODE_REG, EXECLIST_MODE_ENABLE),
    (RCS_BASE + HW_STATUS_MODE_REG, 0x0000_0000),
];
static VCS_MMIO: [MmioPair; 2] = [
    (VCS_BASE + EXECLIST_MODE_REG, EXECLIST_MODE_ENABLE),
    (VCS_BASE + HW_STATUS_MODE_REG, 0x0000_0000),
];
static VECS_MMIO: [MmioPair; 2] = [
    (VECS_BASE + EXECLIST_MODE_REG, EXECLIST_MODE_ENABLE),
    (VECS_BASE + HW_STATUS_MODE_REG, 0x0000_0000),
];
static BCS_MMIO: [MmioPair; 2] = [
    (BCS_BASE + EXECLIST_MODE_REG, EXECLIST_MODE_ENABLE),
    (BCS_BASE + HW_STATUS_MODE_REG, 0x0000_0000),
];

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Gen8-class hardware family.
#[derive(Debug, Default)]
pub struct Gen8Family;

impl Gen8Family {
    /// Simulated device identifier for this family in capture headers.
    pub const DEVICE_ID: u32 = 0x12;
}

impl GfxFamily for Gen8Family {
    fn name(&self) -> &'static str {
        "gen8"
    }

    fn device_id(&self) -> u32 {
        Self::DEVICE_ID
    }

    fn addressing_bits(&self) -> u32 {
        48
    }

    fn global_mmio(&self) -> &'static [MmioPair] {
        &GLOBAL_MMIO
    }

    fn engine_mmio(&self, engine: EngineKind) -> &'static [MmioPair] {
        match engine {
            EngineKind::Rcs => &RCS_MMIO,
            EngineKind::Bcs => &BCS_MMIO,
            EngineKind::Vcs => &VCS_MMIO,
            EngineKind::Vecs => &VECS_MMIO,
        }
    }

    fn engine(&self, engine: EngineKind) -> EngineTraits {
        let mmio_base = match engine {
            EngineKind::Rcs => RCS_BASE,
            EngineKind::Bcs => BCS_BASE,
            EngineKind::Vcs => VCS_BASE,
            EngineKind::Vecs => VECS_BASE,
        };
        EngineTraits {
            mmio_base,
            lrca_size: LRCA_SIZE,
            lrca_align: LRCA_ALIGN,
        }
    }

    fn init_lrca(&self, engine: EngineKind, lrca: &mut [u8]) {
        assert_eq!(lrca.len(), LRCA_SIZE, "LRCA image has the wrong size");
        let base = self.engine(engine).mmio_base;

        // A zeroed image is all MI_NOOPs.
        lrca.fill(0);

        // LRI block: header plus five register/value pairs (11 dwords).
        put_u32(lrca, CTX_LRI_HEADER, (0x22 << 23) | (11 - 2));
        put_u32(lrca, CTX_CONTEXT_CONTROL_REG, base + CONTEXT_CONTROL_REG);
        put_u32(lrca, CTX_CONTEXT_CONTROL_VAL, CONTEXT_CONTROL_DEFAULT);
        put_u32(lrca, CTX_RING_HEAD_REG, base + RING_HEAD_REG);
        put_u32(lrca, CTX_RING_HEAD_VAL, 0);
        put_u32(lrca, CTX_RING_TAIL_REG, base + RING_TAIL_REG);
        put_u32(lrca, CTX_RING_TAIL_VAL, 0);
        put_u32(lrca, CTX_RING_BASE_REG, base + RING_BASE_REG);
        put_u32(lrca, CTX_RING_BASE_VAL, 0);
        put_u32(lrca, CTX_RING_CTRL_REG, base + RING_CTRL_REG);
        put_u32(lrca, CTX_RING_CTRL_VAL, 0);
    }

    fn set_ring_head(&self, lrca: &mut [u8], head: u32) {
        put_u32(lrca, CTX_RING_HEAD_VAL, head);
    }

    fn set_ring_tail(&self, lrca: &mut [u8], tail: u32) {
        put_u32(lrca, CTX_RING_TAIL_VAL, tail);
    }

    fn set_ring_base(&self, lrca: &mut [u8], base: u32) {
        put_u32(lrca, CTX_RING_BASE_VAL, base);
    }

    fn set_ring_ctrl(&self, lrca: &mut [u8], ctrl: u32) {
        put_u32(lrca, CTX_RING_CTRL_VAL, ctrl);
    }

    fn ring_tail_offset(&self) -> u64 {
        CTX_RING_TAIL_VAL as u64
    }

    fn encode_noop(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MI_NOOP.to_le_bytes());
    }

    fn encode_load_register_imm(&self, out: &mut Vec<u8>, reg: u32, value: u32) {
        out.extend_from_slice(&MI_LOAD_REGISTER_IMM.to_le_bytes());
        out.extend_from_slice(&reg.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn encode_batch_buffer_start(&self, out: &mut Vec<u8>, gpu_address: u64) {
        debug_assert_eq!(gpu_address & 0x3, 0, "batch start must be dword-aligned");
        out.extend_from_slice(&(MI_BATCH_BUFFER_START | BBS_ADDRESS_SPACE_PPGTT).to_le_bytes());
        out.extend_from_slice(&(gpu_address as u32).to_le_bytes());
        out.extend_from_slice(&((gpu_address >> 32) as u32).to_le_bytes());
    }

    fn noop_size(&self) -> usize {
        MI_NOOP_SIZE
    }

    fn load_register_imm_size(&self) -> usize {
        MI_LOAD_REGISTER_IMM_SIZE
    }

    fn batch_buffer_start_size(&self) -> usize {
        MI_BATCH_BUFFER_START_SIZE
    }
}
