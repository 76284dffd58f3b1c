//! Execlist context descriptor packing.
//!
//! The descriptor is a 64-bit doorbell value built fresh for every
//! submission; it is never persisted. Bit layout (low half):
//!
//! ```text
//! 0      valid
//! 1      force page-directory restore
//! 2      force restore
//! 3      legacy context
//! 4      wide addressing (64-bit capable family)
//! 5      LLC coherency
//! 6:7    fault support
//! 8      privileged / per-context translation (PPGTT)
//! 12:31  LRCA page index (global virtual address / 4096)
//! 32:63  context id
//! ```

const VALID: u64 = 1 << 0;
const LEGACY: u64 = 1 << 3;
const WIDE_ADDRESSING: u64 = 1 << 4;
const FAULT_SUPPORT_SHIFT: u32 = 6;
const FAULT_SUPPORT_MASK: u64 = 0b11;
const PPGTT: u64 = 1 << 8;
const LRCA_PAGE_SHIFT: u32 = 12;
const LRCA_PAGE_MASK: u64 = (1 << 20) - 1;
const CONTEXT_ID_SHIFT: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextDescriptor(u64);

impl ContextDescriptor {
    /// Pack a descriptor for a legacy PPGTT submission.
    ///
    /// `lrca_virtual` must be page-aligned; the descriptor carries its page
    /// index, not the raw address.
    pub fn new(lrca_virtual: u64, addressing_bits: u32, context_id: u32) -> Self {
        debug_assert_eq!(lrca_virtual % 4096, 0, "LRCA must be page-aligned");

        let mut raw = VALID | LEGACY | PPGTT;
        if addressing_bits > 32 {
            raw |= WIDE_ADDRESSING;
        }
        raw |= ((lrca_virtual / 4096) & LRCA_PAGE_MASK) << LRCA_PAGE_SHIFT;
        raw |= u64::from(context_id) << CONTEXT_ID_SHIFT;
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn low(self) -> u32 {
        self.0 as u32
    }

    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn is_valid(self) -> bool {
        self.0 & VALID != 0
    }

    pub fn fault_support(self) -> u8 {
        ((self.0 >> FAULT_SUPPORT_SHIFT) & FAULT_SUPPORT_MASK) as u8
    }

    pub fn lrca_page(self) -> u64 {
        (self.0 >> LRCA_PAGE_SHIFT) & LRCA_PAGE_MASK
    }

    pub fn context_id(self) -> u32 {
        (self.0 >> CONTEXT_ID_SHIFT) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn packs_flags_and_page_index() {
        let desc = ContextDescriptor::new(0x3000, 48, 0);
        assert!(desc.is_valid());
        assert_eq!(desc.fault_support(), 0);
        assert_eq!(desc.lrca_page(), 3);
        assert_eq!(desc.context_id(), 0);
        // valid | legacy | wide | ppgtt
        assert_eq!(desc.raw() & 0xFFF, VALID | LEGACY | WIDE_ADDRESSING | PPGTT);
    }

    #[test]
    fn narrow_family_clears_wide_addressing() {
        let desc = ContextDescriptor::new(0x1000, 32, 0);
        assert_eq!(desc.raw() & WIDE_ADDRESSING, 0);
    }

    #[test]
    fn halves_reassemble() {
        let desc = ContextDescriptor::new(0xFFFF_F000, 48, 7);
        let raw = (u64::from(desc.high()) << 32) | u64::from(desc.low());
        assert_eq!(raw, desc.raw());
        assert_eq!(desc.context_id(), 7);
    }
}
