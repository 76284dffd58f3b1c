//! End-to-end: a receiver over the file sink produces a capture the
//! reader fully understands.

mod support;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use strobe_csr::{BatchBuffer, CommandStreamReceiver, CsrConfig};
use strobe_hw::{engine_regs, EngineKind, Gen8Family, Stepping};
use strobe_trace::{CaptureReader, ContentHint, FileSink, Record, TimeoutAction};

use support::TestMemoryManager;

#[test]
fn capture_file_replays_a_full_submission() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("submission.strb");

    let sink = FileSink::create(&path).unwrap();
    let config = CsrConfig {
        stepping: Stepping::B,
        ..CsrConfig::default()
    };
    let mut receiver = CommandStreamReceiver::new(
        Arc::new(Gen8Family),
        sink,
        TestMemoryManager::default(),
        config,
    )
    .unwrap();

    let gpu_address = receiver.allocate_gpu_address(32);
    let allocation = strobe_csr::GraphicsAllocation::new(vec![0xC4; 32], gpu_address);
    let batch = BatchBuffer::new(&allocation, 0, 32);
    receiver.flush(&batch, EngineKind::Rcs).unwrap();
    drop(receiver);

    let capture = CaptureReader::open(std::fs::File::open(&path).unwrap()).unwrap();
    assert_eq!(capture.device_id, Gen8Family::DEVICE_ID);
    assert_eq!(capture.stepping, Stepping::B.to_raw());

    // Bring-up MMIO comes first.
    assert!(matches!(
        capture.records[0],
        Record::MmioWrite { offset: 0xA188, .. }
    ));

    // One context image, one batch mirror, one ring span; the batch bytes
    // survive verbatim.
    let hints: Vec<ContentHint> = capture
        .records
        .iter()
        .filter_map(|record| match record {
            Record::MemoryWrite { hint, .. } => Some(*hint),
            _ => None,
        })
        .collect();
    assert_eq!(
        hints,
        [
            ContentHint::LogicalContext,
            ContentHint::BatchBuffer,
            ContentHint::CommandBuffer,
            ContentHint::None,
        ]
    );
    let batch_bytes = capture.records.iter().find_map(|record| match record {
        Record::MemoryWrite {
            hint: ContentHint::BatchBuffer,
            data,
            ..
        } => Some(data.clone()),
        _ => None,
    });
    assert_eq!(batch_bytes.unwrap(), vec![0xC4; 32]);

    // Reservations exist for both translation tables.
    assert!(capture
        .records
        .iter()
        .any(|record| matches!(record, Record::ReserveGgtt { .. })));
    assert!(capture
        .records
        .iter()
        .any(|record| matches!(
            record,
            Record::ReservePpgtt { virtual_addr, len, .. }
                if *virtual_addr == gpu_address && *len == 32
        )));

    // The capture ends on the completion poll.
    assert_eq!(
        capture.records.last().unwrap(),
        &Record::RegisterPoll {
            register: engine_regs::EXEC_STATUS,
            mask: engine_regs::EXEC_STATUS_IDLE_MASK,
            expected: engine_regs::EXEC_STATUS_IDLE_MASK,
            poll_not_equal: false,
            timeout_action: TimeoutAction::Abort,
        }
    );
}
