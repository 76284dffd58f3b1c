#![forbid(unsafe_code)]

//! Simulated graphics translation tables.
//!
//! Two independent address spaces back the receiver: a *global* space for
//! fixed per-engine structures (status page, ring, logical context) and a
//! *per-context* space for submitted workloads. Both hand out stable,
//! page-aligned virtual addresses from a non-reclaiming allocator and
//! populate physical backing on first translation, so a fresh region's
//! physical range comes out contiguous and a region's backing never moves
//! once assigned.
//!
//! The [`AddressSpace::page_walk`] visitor is how callers mirror CPU buffers
//! into (or out of) the simulated space: it yields one page-bounded chunk at
//! a time and never crosses a 4 KiB boundary.

use std::collections::BTreeMap;

pub const PAGE_SIZE: u64 = 4096;

/// Round `value` up to the next multiple of `align` (a power of two).
pub fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Which translation table an address space models. Only used for
/// diagnostics; the spaces are structurally identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    /// Global graphics translation table.
    Global,
    /// Per-context translation table.
    Context,
}

impl SpaceKind {
    pub fn name(self) -> &'static str {
        match self {
            SpaceKind::Global => "ggtt",
            SpaceKind::Context => "ppgtt",
        }
    }
}

/// One simulated virtual address space with demand-populated physical pages.
#[derive(Debug)]
pub struct AddressSpace {
    kind: SpaceKind,
    /// Next virtual address handed out by [`map`](Self::map). Never rewinds:
    /// the space is flat and non-reclaiming.
    next_virtual: u64,
    /// Next physical page handed out on first translation.
    next_physical: u64,
    /// Live mappings, virtual base -> length.
    mappings: BTreeMap<u64, u64>,
    /// Virtual page number -> physical page base.
    pages: BTreeMap<u64, u64>,
}

impl AddressSpace {
    const VIRTUAL_BASE: u64 = PAGE_SIZE;

    pub fn new(kind: SpaceKind) -> Self {
        Self {
            kind,
            next_virtual: Self::VIRTUAL_BASE,
            next_physical: 0,
            mappings: BTreeMap::new(),
            pages: BTreeMap::new(),
        }
    }

    pub fn global() -> Self {
        Self::new(SpaceKind::Global)
    }

    pub fn context() -> Self {
        Self::new(SpaceKind::Context)
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    /// Allocate a virtual range for a CPU-owned region of `len` bytes and
    /// return its page-aligned base. The address stays valid until
    /// [`unmap`](Self::unmap); the range itself is never reused either way.
    pub fn map(&mut self, len: u64) -> u64 {
        assert!(len > 0, "mapping an empty region");
        let base = self.next_virtual;
        self.next_virtual = base
            .checked_add(align_up(len, PAGE_SIZE))
            .expect("virtual space exhausted");
        self.mappings.insert(base, len);
        base
    }

    /// Drop the mapping record for `virtual_base`. The virtual range is not
    /// reclaimed and existing physical backing stays in the page table, so a
    /// stale translation still resolves deterministically.
    pub fn unmap(&mut self, virtual_base: u64) {
        self.mappings.remove(&virtual_base);
    }

    pub fn is_mapped(&self, virtual_base: u64) -> bool {
        self.mappings.contains_key(&virtual_base)
    }

    /// Translate `virtual_addr`, populating backing pages for the covered
    /// range on first use. Returns the physical address of `virtual_addr`
    /// itself (not of its page).
    pub fn translate(&mut self, virtual_addr: u64, len: u64) -> u64 {
        let first_page = virtual_addr / PAGE_SIZE;
        let last_page = if len == 0 {
            first_page
        } else {
            (virtual_addr + len - 1) / PAGE_SIZE
        };
        for vpn in first_page..=last_page {
            if !self.pages.contains_key(&vpn) {
                let phys = self.next_physical;
                self.next_physical += PAGE_SIZE;
                self.pages.insert(vpn, phys);
            }
        }
        self.pages[&first_page] + (virtual_addr & (PAGE_SIZE - 1))
    }

    /// Walk `[virtual_addr, virtual_addr + len)` one page-bounded chunk at a
    /// time, invoking `visit(phys_chunk_addr, chunk_len, offset)` where
    /// `offset` counts from `offset_base`. Chunks never straddle a page. A
    /// zero `len` visits nothing.
    pub fn page_walk<F>(&mut self, virtual_addr: u64, len: u64, offset_base: u64, mut visit: F)
    where
        F: FnMut(u64, usize, u64),
    {
        let mut cursor = virtual_addr;
        let end = virtual_addr
            .checked_add(len)
            .expect("page walk range overflows");
        while cursor < end {
            let page_end = (cursor / PAGE_SIZE + 1) * PAGE_SIZE;
            let chunk_len = page_end.min(end) - cursor;
            let phys = self.translate(cursor, chunk_len);
            visit(phys, chunk_len as usize, offset_base + (cursor - virtual_addr));
            cursor += chunk_len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn map_returns_page_aligned_monotonic_addresses() {
        let mut space = AddressSpace::global();
        let a = space.map(10);
        let b = space.map(PAGE_SIZE + 1);
        let c = space.map(1);
        assert_eq!(a % PAGE_SIZE, 0);
        assert_eq!(b, a + PAGE_SIZE);
        assert_eq!(c, b + 2 * PAGE_SIZE);
    }

    #[test]
    fn unmap_does_not_reclaim_the_range() {
        let mut space = AddressSpace::context();
        let a = space.map(100);
        space.unmap(a);
        assert!(!space.is_mapped(a));
        let b = space.map(100);
        assert!(b > a, "virtual ranges are never reused");
    }

    #[test]
    fn translation_is_stable_and_fresh_ranges_are_contiguous() {
        let mut space = AddressSpace::global();
        let va = space.map(3 * PAGE_SIZE);
        let phys = space.translate(va, 3 * PAGE_SIZE);
        assert_eq!(space.translate(va + PAGE_SIZE, PAGE_SIZE), phys + PAGE_SIZE);
        assert_eq!(space.translate(va + 123, 1), phys + 123);
        // Repeat translation does not move the backing.
        assert_eq!(space.translate(va, 3 * PAGE_SIZE), phys);
    }

    #[test]
    fn spaces_are_independent() {
        let mut global = AddressSpace::global();
        let mut context = AddressSpace::context();
        let ga = global.map(PAGE_SIZE);
        let ca = context.map(PAGE_SIZE);
        assert_eq!(ga, ca, "each space starts at its own base");
        assert_eq!(global.translate(ga, 1), context.translate(ca, 1));
    }

    #[test]
    fn page_walk_chunks_never_cross_pages() {
        let mut space = AddressSpace::context();
        let va = space.map(2 * PAGE_SIZE);
        // Start mid-page, end mid-page: expect head, full page, tail.
        let mut chunks = Vec::new();
        space.page_walk(va + 100, PAGE_SIZE + 200, 0, |phys, len, offset| {
            chunks.push((phys, len, offset));
        });
        let lens: Vec<usize> = chunks.iter().map(|c| c.1).collect();
        assert_eq!(lens, [PAGE_SIZE as usize - 100, 300]);
        assert_eq!(chunks[0].2, 0);
        assert_eq!(chunks[1].2, PAGE_SIZE - 100);
        for (phys, len, _) in chunks {
            assert_eq!(phys / PAGE_SIZE, (phys + len as u64 - 1) / PAGE_SIZE);
        }
    }

    #[test]
    fn page_walk_offset_base_is_added_through() {
        let mut space = AddressSpace::context();
        let va = space.map(PAGE_SIZE);
        let mut offsets = Vec::new();
        space.page_walk(va, PAGE_SIZE, 0x800, |_, _, offset| offsets.push(offset));
        assert_eq!(offsets, [0x800]);
    }

    #[test]
    fn zero_length_walk_visits_nothing() {
        let mut space = AddressSpace::context();
        let va = space.map(PAGE_SIZE);
        space.page_walk(va, 0, 0, |_, _, _| panic!("no chunks expected"));
    }
}
