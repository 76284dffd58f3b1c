//! Shared test doubles: an in-memory recording sink and a memory manager
//! that remembers which allocations were pushed at it.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use strobe_csr::{CommandStreamReceiver, CsrConfig, GraphicsAllocation, MemoryManager};
use strobe_hw::Gen8Family;
use strobe_trace::{AddressSpaceTag, ContentHint, TailPadding, TimeoutAction, TraceSink};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Init {
        stepping: u8,
        device_id: u32,
    },
    Mmio {
        offset: u32,
        value: u32,
    },
    MemoryWrite {
        physical: u64,
        data: Vec<u8>,
        space: AddressSpaceTag,
        hint: ContentHint,
    },
    ReserveGgtt {
        virtual_addr: u64,
        len: u64,
        physical: u64,
    },
    ReservePpgtt {
        virtual_addr: u64,
        len: u64,
        physical: u64,
    },
    Poll {
        register: u32,
        mask: u32,
        expected: u32,
        poll_not_equal: bool,
        timeout_action: TimeoutAction,
    },
    Comment(String),
    Close,
}

/// Everything a [`RecordingSink`] has observed. `memory` is a flat byte
/// image built from the memory writes, used to serve `read_memory`.
#[derive(Debug, Default)]
pub struct SinkState {
    pub events: Vec<Event>,
    pub memory: BTreeMap<u64, u8>,
}

impl SinkState {
    pub fn mmio_writes_to(&self, offset: u32) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Mmio { offset: o, value } if *o == offset => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn memory_writes_with_hint(&self, hint: ContentHint) -> Vec<(u64, Vec<u8>)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::MemoryWrite {
                    physical,
                    data,
                    hint: h,
                    ..
                } if *h == hint => Some((*physical, data.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn polls(&self) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|event| matches!(event, Event::Poll { .. }))
            .collect()
    }
}

/// Records every sink call; the backing state is shared so tests can
/// inspect it while the receiver owns the sink.
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
    padding: TailPadding,
}

impl RecordingSink {
    pub fn qword_aligning() -> (Self, Arc<Mutex<SinkState>>) {
        Self::with_padding(TailPadding::QwordAlign)
    }

    pub fn trailing_noop() -> (Self, Arc<Mutex<SinkState>>) {
        Self::with_padding(TailPadding::TrailingNoop)
    }

    fn with_padding(padding: TailPadding) -> (Self, Arc<Mutex<SinkState>>) {
        let state = Arc::new(Mutex::new(SinkState::default()));
        (
            Self {
                state: state.clone(),
                padding,
            },
            state,
        )
    }

    fn record(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }
}

impl TraceSink for RecordingSink {
    fn init(&mut self, stepping: u8, device_id: u32) -> strobe_trace::Result<()> {
        self.record(Event::Init {
            stepping,
            device_id,
        });
        Ok(())
    }

    fn write_mmio(&mut self, offset: u32, value: u32) -> strobe_trace::Result<()> {
        self.record(Event::Mmio { offset, value });
        Ok(())
    }

    fn add_memory_write(
        &mut self,
        physical: u64,
        data: &[u8],
        space: AddressSpaceTag,
        hint: ContentHint,
    ) -> strobe_trace::Result<()> {
        let mut state = self.state.lock().unwrap();
        for (i, &byte) in data.iter().enumerate() {
            state.memory.insert(physical + i as u64, byte);
        }
        state.events.push(Event::MemoryWrite {
            physical,
            data: data.to_vec(),
            space,
            hint,
        });
        Ok(())
    }

    fn reserve_ggtt(
        &mut self,
        virtual_addr: u64,
        len: u64,
        physical: u64,
    ) -> strobe_trace::Result<()> {
        self.record(Event::ReserveGgtt {
            virtual_addr,
            len,
            physical,
        });
        Ok(())
    }

    fn reserve_ppgtt(
        &mut self,
        virtual_addr: u64,
        len: u64,
        physical: u64,
    ) -> strobe_trace::Result<()> {
        self.record(Event::ReservePpgtt {
            virtual_addr,
            len,
            physical,
        });
        Ok(())
    }

    fn register_poll(
        &mut self,
        register: u32,
        mask: u32,
        expected: u32,
        poll_not_equal: bool,
        timeout_action: TimeoutAction,
    ) -> strobe_trace::Result<()> {
        self.record(Event::Poll {
            register,
            mask,
            expected,
            poll_not_equal,
            timeout_action,
        });
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> strobe_trace::Result<()> {
        self.record(Event::Comment(text.to_owned()));
        Ok(())
    }

    fn read_memory(&mut self, physical: u64, dest: &mut [u8]) -> strobe_trace::Result<()> {
        let state = self.state.lock().unwrap();
        for (i, slot) in dest.iter_mut().enumerate() {
            *slot = state.memory.get(&(physical + i as u64)).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn close(&mut self) -> strobe_trace::Result<()> {
        self.record(Event::Close);
        Ok(())
    }

    fn tail_padding(&self) -> TailPadding {
        self.padding
    }
}

/// Remembers the addresses of allocations pushed for residency/eviction.
#[derive(Debug, Default)]
pub struct TestMemoryManager {
    pub resident: Vec<u64>,
    pub evicted: Vec<u64>,
}

impl MemoryManager for TestMemoryManager {
    fn push_allocation_for_residency(&mut self, allocation: &GraphicsAllocation) {
        self.resident.push(allocation.gpu_address());
    }

    fn push_allocation_for_eviction(&mut self, allocation: &GraphicsAllocation) {
        self.evicted.push(allocation.gpu_address());
    }

    fn tag_address(&self) -> u64 {
        0
    }
}

pub type TestReceiver = CommandStreamReceiver<RecordingSink, TestMemoryManager>;

pub fn new_receiver(sink: RecordingSink) -> TestReceiver {
    new_receiver_with(sink, CsrConfig::default())
}

pub fn new_receiver_with(sink: RecordingSink, config: CsrConfig) -> TestReceiver {
    CommandStreamReceiver::new(
        Arc::new(Gen8Family),
        sink,
        TestMemoryManager::default(),
        config,
    )
    .expect("recording sink init cannot fail")
}

/// Allocate a per-context address and wrap `bytes` in an allocation at it.
pub fn allocation_with(receiver: &mut TestReceiver, bytes: Vec<u8>) -> GraphicsAllocation {
    let len = bytes.len().max(1) as u64;
    let gpu_address = receiver.allocate_gpu_address(len);
    GraphicsAllocation::new(bytes, gpu_address)
}
