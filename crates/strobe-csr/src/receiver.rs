//! The command-stream receiver: engine bring-up, ring submission,
//! completion, and residency tracking.

use std::sync::Arc;

use tracing::{debug, warn};

use strobe_gtt::{align_up, AddressSpace, PAGE_SIZE};
use strobe_hw::{engine_regs, ContextDescriptor, EngineKind, GfxFamily};
use strobe_trace::{AddressSpaceTag, ContentHint, TailPadding, TimeoutAction, TraceSink};

use crate::engine::{EngineContext, RING_SIZE};
use crate::{BatchBuffer, CsrConfig, GraphicsAllocation, MemoryManager, PreemptionMode, Result};

/// Returned by [`CommandStreamReceiver::flush`]. The model is synchronous:
/// by the time `flush` returns, the submission has (conceptually) executed,
/// so the stamp carries no ordering information.
pub type FlushStamp = u64;

/// Ring-tail alignment unit on the qword-aligning backend.
const TAIL_ALIGN: u64 = 8;

/// Drives simulated engines by emitting their side effects into a trace
/// sink. One receiver may drive several engines; each gets its own
/// [`EngineContext`] on first submission.
pub struct CommandStreamReceiver<S: TraceSink, M: MemoryManager> {
    family: Arc<dyn GfxFamily>,
    sink: S,
    memory_manager: M,
    config: CsrConfig,
    ggtt: AddressSpace,
    ppgtt: AddressSpace,
    engines: [Option<EngineContext>; EngineKind::COUNT],
    task_count: u32,
}

impl<S: TraceSink, M: MemoryManager> CommandStreamReceiver<S, M> {
    /// Build a receiver over an already-opened sink and write the capture
    /// header. A sink that cannot take the header is a setup error.
    pub fn new(
        family: Arc<dyn GfxFamily>,
        mut sink: S,
        memory_manager: M,
        config: CsrConfig,
    ) -> Result<Self> {
        sink.init(config.stepping.to_raw(), family.device_id())?;
        Ok(Self {
            family,
            sink,
            memory_manager,
            config,
            ggtt: AddressSpace::global(),
            ppgtt: AddressSpace::context(),
            engines: Default::default(),
            task_count: 0,
        })
    }

    pub fn family(&self) -> &dyn GfxFamily {
        self.family.as_ref()
    }

    pub fn memory_manager(&self) -> &M {
        &self.memory_manager
    }

    pub fn config(&self) -> &CsrConfig {
        &self.config
    }

    /// Engine state, present once the engine has seen a submission.
    pub fn engine(&self, engine: EngineKind) -> Option<&EngineContext> {
        self.engines[engine.index()].as_ref()
    }

    pub fn task_count(&self) -> u32 {
        self.task_count
    }

    /// Advance the submission generation. Owned by the submission caller;
    /// the residency tracker only reads it. Never decreases.
    pub fn increment_task_count(&mut self) -> u32 {
        self.task_count += 1;
        self.task_count
    }

    /// Hand out a per-context virtual address for a caller-owned region;
    /// used by memory managers to place new allocations.
    pub fn allocate_gpu_address(&mut self, len: u64) -> u64 {
        self.ppgtt.map(len)
    }

    /// Bring up one engine: MMIO programming, status page, logical ring
    /// context and ring buffer. Invoked lazily from [`flush`](Self::flush);
    /// the ordering of steps is load-bearing, later steps depend on the
    /// MMIO and address state set up by earlier ones.
    fn initialize_engine(&mut self, engine: EngineKind) -> Result<()> {
        let traits = self.family.engine(engine);
        assert!(traits.lrca_size > 0, "zero-size engine configuration");
        debug!(engine = engine.name(), "initializing engine");

        for &(offset, value) in self.family.global_mmio() {
            self.sink.write_mmio(offset, value)?;
        }
        for &(offset, value) in self.family.engine_mmio(engine) {
            self.sink.write_mmio(offset, value)?;
        }

        // Global status page: one page, page-aligned, advertised through
        // the per-engine status-page base register.
        let status_page = vec![0u8; PAGE_SIZE as usize];
        let status_virtual = self.ggtt.map(PAGE_SIZE);
        let status_phys = self.ggtt.translate(status_virtual, PAGE_SIZE);
        self.sink.add_comment(&format!("ggtt: {status_virtual:#x}"))?;
        self.sink.reserve_ggtt(status_virtual, PAGE_SIZE, status_phys)?;
        self.sink.write_mmio(
            traits.mmio_base + engine_regs::STATUS_PAGE_BASE,
            status_virtual as u32,
        )?;

        // Logical ring context, template-initialized. The template's ring
        // fields are placeholders until the ring exists below.
        let mut lrca = vec![0u8; traits.lrca_size];
        self.family.init_lrca(engine, &mut lrca);

        // Ring buffer.
        let ring = vec![0u8; RING_SIZE as usize];
        let ring_virtual = self.ggtt.map(RING_SIZE);
        let ring_phys = self.ggtt.translate(ring_virtual, RING_SIZE);
        self.sink.add_comment(&format!("ggtt: {ring_virtual:#x}"))?;
        self.sink.reserve_ggtt(ring_virtual, RING_SIZE, ring_phys)?;

        // Ring registers travel to hardware inside the LRCA image, not via
        // direct MMIO.
        self.family.set_ring_head(&mut lrca, 0);
        self.family.set_ring_tail(&mut lrca, 0);
        self.family.set_ring_base(&mut lrca, ring_virtual as u32);
        self.family
            .set_ring_ctrl(&mut lrca, ((RING_SIZE - PAGE_SIZE) | 1) as u32);

        // Map and dump the finished context image.
        let lrca_virtual = self.ggtt.map(traits.lrca_size as u64);
        debug_assert_eq!(lrca_virtual % traits.lrca_align as u64, 0);
        let lrca_phys = self.ggtt.translate(lrca_virtual, traits.lrca_size as u64);
        self.sink.add_comment(&format!("ggtt: {lrca_virtual:#x}"))?;
        self.sink
            .reserve_ggtt(lrca_virtual, traits.lrca_size as u64, lrca_phys)?;
        self.sink.add_memory_write(
            lrca_phys,
            &lrca,
            AddressSpaceTag::Nonlocal,
            ContentHint::LogicalContext,
        )?;

        let preemption_virtual = if self.config.preemption_mode != PreemptionMode::Disabled
            && self.config.preemption_reserve_bytes > 0
        {
            let reserve = self.config.preemption_reserve_bytes;
            let preemption_virtual = self.ggtt.map(reserve);
            let preemption_phys = self.ggtt.translate(preemption_virtual, reserve);
            self.sink
                .reserve_ggtt(preemption_virtual, reserve, preemption_phys)?;
            Some(preemption_virtual)
        } else {
            None
        };

        self.engines[engine.index()] = Some(EngineContext {
            lrca,
            lrca_virtual,
            status_page,
            status_virtual,
            ring,
            ring_virtual,
            ring_tail: 0,
            preemption_virtual,
        });
        Ok(())
    }

    /// Submit a batch buffer to an engine and wait for completion.
    ///
    /// Writes the batch into the per-context space, appends a
    /// batch-buffer-start to the engine's ring (wrapping if the ring is
    /// nearly full), publishes the new tail through the LRCA, rings the
    /// submission doorbell, and issues the completion poll. Returns only
    /// once the poll is (conceptually) satisfied.
    pub fn flush(&mut self, batch: &BatchBuffer<'_>, engine: EngineKind) -> Result<FlushStamp> {
        if self.engines[engine.index()].is_none() {
            self.initialize_engine(engine)?;
        }
        let traits = self.family.engine(engine);
        debug_assert!(!batch.is_empty(), "flushing an empty batch buffer");

        // Mirror the batch bytes into the per-context space.
        let batch_virtual = batch.gpu_start();
        let batch_len = batch.len();
        let batch_phys = self.ppgtt.translate(batch_virtual, batch_len);
        self.sink.add_comment(&format!("ppgtt: {batch_virtual:#x}"))?;
        self.sink.reserve_ppgtt(batch_virtual, batch_len, batch_phys)?;
        self.sink.add_memory_write(
            batch_phys,
            batch.bytes(),
            AddressSpaceTag::Nonlocal,
            ContentHint::BatchBuffer,
        )?;

        let ctx = self.engines[engine.index()]
            .as_mut()
            .expect("engine context present after initialization");
        let capacity = ctx.ring.len() as u32;

        let padding = self.sink.tail_padding();
        let bbs_size = self.family.batch_buffer_start_size() as u32;
        let lri_size = self.family.load_register_imm_size() as u32;
        let noop_size = self.family.noop_size() as u32;
        // Only an engine's first submission carries the ring-mode LRI; a
        // cursor at zero cannot wrap, so the two cases never overlap.
        let base_size = if ctx.ring_tail == 0 {
            bbs_size + lri_size
        } else {
            bbs_size
        };
        let size_needed = match padding {
            TailPadding::QwordAlign => align_up(u64::from(base_size), TAIL_ALIGN) as u32,
            TailPadding::TrailingNoop => base_size + noop_size,
        };
        let mut previous_tail = ctx.ring_tail;
        let mut wrapped = false;

        if ctx.ring_tail + size_needed >= capacity {
            // Not enough room before the end of the ring: zero-fill the
            // remainder, dump it, and restart from the top. Content before
            // the wrap is abandoned, not preserved.
            let wrap_start = ctx.ring_tail as usize;
            ctx.ring[wrap_start..].fill(0);
            let wrap_virtual = ctx.ring_virtual + u64::from(ctx.ring_tail);
            let wrap_len = u64::from(capacity - ctx.ring_tail);
            let wrap_phys = self.ggtt.translate(wrap_virtual, wrap_len);
            self.sink.add_memory_write(
                wrap_phys,
                &ctx.ring[wrap_start..],
                AddressSpaceTag::Nonlocal,
                ContentHint::CommandBuffer,
            )?;
            previous_tail = 0;
            ctx.ring_tail = 0;
            wrapped = true;
        }

        let mut commands = Vec::with_capacity(size_needed as usize);
        if !wrapped && ctx.ring_tail == 0 {
            // Very first submission on this engine: load the ring-mode
            // register before anything executes.
            self.family.encode_load_register_imm(
                &mut commands,
                traits.mmio_base + engine_regs::RING_MODE,
                engine_regs::RING_MODE_INIT,
            );
        }
        self.family
            .encode_batch_buffer_start(&mut commands, batch_virtual);
        match padding {
            // The live backend always trails exactly one no-op, whatever
            // alignment results; the file backend pads to a qword tail.
            // Observable in the emitted trace, so both are kept as-is.
            TailPadding::TrailingNoop => self.family.encode_noop(&mut commands),
            TailPadding::QwordAlign => {
                while (u64::from(ctx.ring_tail) + commands.len() as u64) % TAIL_ALIGN != 0 {
                    self.family.encode_noop(&mut commands);
                }
            }
        }

        let write_start = ctx.ring_tail as usize;
        ctx.ring[write_start..write_start + commands.len()].copy_from_slice(&commands);
        ctx.ring_tail += commands.len() as u32;

        assert!(ctx.ring_tail < capacity, "ring tail exceeded capacity");
        if padding == TailPadding::QwordAlign {
            assert_eq!(
                u64::from(ctx.ring_tail) % TAIL_ALIGN,
                0,
                "ring tail misaligned"
            );
        }

        // Dump only the newly written ring span.
        let dump_virtual = ctx.ring_virtual + u64::from(previous_tail);
        let dump_len = u64::from(ctx.ring_tail - previous_tail);
        self.sink.add_comment(&format!("ggtt: {dump_virtual:#x}"))?;
        let dump_phys = self.ggtt.translate(dump_virtual, dump_len);
        self.sink.add_memory_write(
            dump_phys,
            &ctx.ring[previous_tail as usize..ctx.ring_tail as usize],
            AddressSpaceTag::Nonlocal,
            ContentHint::CommandBuffer,
        )?;

        // Publish the new tail through the already-mapped context image so
        // the simulated device observes it.
        self.family.set_ring_tail(&mut ctx.lrca, ctx.ring_tail);
        let tail_offset = self.family.ring_tail_offset();
        let lrca_phys = self.ggtt.translate(ctx.lrca_virtual, tail_offset + 4);
        self.sink
            .add_comment(&format!("ggtt: {:#x}", ctx.lrca_virtual + tail_offset))?;
        self.sink.add_memory_write(
            lrca_phys + tail_offset,
            &ctx.ring_tail.to_le_bytes(),
            AddressSpaceTag::Nonlocal,
            ContentHint::None,
        )?;

        // Doorbell handshake: two empty slots, then the descriptor high
        // then low halves.
        let descriptor =
            ContextDescriptor::new(ctx.lrca_virtual, self.family.addressing_bits(), 0);
        let tail = ctx.ring_tail;
        let port = traits.mmio_base + engine_regs::SUBMIT_PORT;
        self.sink.write_mmio(port, 0)?;
        self.sink.write_mmio(port, 0)?;
        self.sink.write_mmio(port, descriptor.high())?;
        self.sink.write_mmio(port, descriptor.low())?;

        self.sink.register_poll(
            traits.mmio_base + engine_regs::EXEC_STATUS,
            engine_regs::EXEC_STATUS_IDLE_MASK,
            engine_regs::EXEC_STATUS_IDLE_MASK,
            false,
            TimeoutAction::Abort,
        )?;

        debug!(engine = engine.name(), tail, "flush complete");
        Ok(0)
    }

    /// Materialize an allocation's contents into the per-context space if
    /// its last-resident generation is older than the current task count.
    ///
    /// Zero-size and capture-ineligible allocations skip the transfer but
    /// still take the current generation stamp, which makes the operation
    /// idempotent within one generation.
    pub fn make_resident(&mut self, allocation: &mut GraphicsAllocation) -> Result<()> {
        let stale = allocation
            .residency()
            .map_or(true, |stamp| stamp < self.task_count);
        if stale && !allocation.is_empty() && allocation.capture_eligible() {
            let gpu_address = allocation.gpu_address();
            self.sink.add_comment(&format!("ppgtt: {gpu_address:#x}"))?;

            let mut chunks = Vec::new();
            self.ppgtt
                .page_walk(gpu_address, allocation.len(), 0, |phys, len, offset| {
                    chunks.push((phys, len, offset));
                });
            for (phys, len, offset) in chunks {
                let page_virtual = (gpu_address + offset) & !(PAGE_SIZE - 1);
                let page_phys = phys & !(PAGE_SIZE - 1);
                self.sink.reserve_ppgtt(page_virtual, PAGE_SIZE, page_phys)?;
                let data = &allocation.bytes()[offset as usize..offset as usize + len];
                self.sink
                    .add_memory_write(phys, data, AddressSpaceTag::Nonlocal, ContentHint::None)?;
            }
            self.memory_manager.push_allocation_for_residency(allocation);
        }
        allocation.set_residency(Some(self.task_count));
        Ok(())
    }

    /// Mark a resident allocation evictable.
    pub fn make_non_resident(&mut self, allocation: &mut GraphicsAllocation) {
        if allocation.residency().is_some() {
            self.memory_manager.push_allocation_for_eviction(allocation);
            allocation.set_residency(None);
        }
    }

    /// Pull an allocation's device-side contents back into its CPU bytes:
    /// the inverse of [`make_resident`](Self::make_resident). Only
    /// meaningful over a sink that supports reads (the live transport). A
    /// zero-length allocation is a no-op.
    pub fn make_coherent(&mut self, allocation: &mut GraphicsAllocation) -> Result<()> {
        let len = allocation.len();
        if len == 0 {
            return Ok(());
        }
        let gpu_address = allocation.gpu_address();
        let mut chunks = Vec::new();
        self.ppgtt
            .page_walk(gpu_address, len, 0, |phys, chunk_len, offset| {
                chunks.push((phys, chunk_len, offset));
            });
        for (phys, chunk_len, offset) in chunks {
            debug_assert!(offset < len);
            let dest = &mut allocation.bytes_mut()[offset as usize..offset as usize + chunk_len];
            self.sink.read_memory(phys, dest)?;
        }
        Ok(())
    }
}

impl<S: TraceSink, M: MemoryManager> Drop for CommandStreamReceiver<S, M> {
    fn drop(&mut self) {
        // Engine arenas go down together with the receiver; nothing else
        // references them once unmapped.
        for slot in &mut self.engines {
            if let Some(ctx) = slot.take() {
                self.ggtt.unmap(ctx.status_virtual);
                self.ggtt.unmap(ctx.ring_virtual);
                self.ggtt.unmap(ctx.lrca_virtual);
                if let Some(preemption_virtual) = ctx.preemption_virtual {
                    self.ggtt.unmap(preemption_virtual);
                }
            }
        }
        if let Err(err) = self.sink.close() {
            warn!(%err, "failed to close trace sink");
        }
    }
}
