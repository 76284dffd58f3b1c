//! Durable capture-file sink.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{format, AddressSpaceTag, ContentHint, Result, TailPadding, TimeoutAction, TraceSink};

/// Block-structured capture file writer.
///
/// Register polls are *recorded*, not executed: a capture consumer replays
/// them against its own device model. Comments carry the simulated
/// addresses of the structures being written, which is what makes captures
/// diffable across runs; they can be switched off for byte-stable output
/// when addresses are expected to differ.
pub struct FileSink {
    out: BufWriter<File>,
    comments: bool,
}

impl FileSink {
    /// Open (truncate) the capture file. A destination that cannot be
    /// opened is a setup error for the caller, not a condition to paper
    /// over.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            out: BufWriter::new(file),
            comments: true,
        })
    }

    pub fn set_comments(&mut self, enabled: bool) {
        self.comments = enabled;
    }

    fn write_record(&mut self, record: Vec<u8>) -> Result<()> {
        self.out.write_all(&record)?;
        Ok(())
    }
}

impl TraceSink for FileSink {
    fn init(&mut self, stepping: u8, device_id: u32) -> Result<()> {
        self.out.write_all(&format::header(device_id, stepping))?;
        Ok(())
    }

    fn write_mmio(&mut self, offset: u32, value: u32) -> Result<()> {
        self.write_record(format::mmio_write(offset, value))
    }

    fn add_memory_write(
        &mut self,
        physical: u64,
        data: &[u8],
        space: AddressSpaceTag,
        hint: ContentHint,
    ) -> Result<()> {
        self.write_record(format::memory_write(
            physical,
            data,
            space.to_raw(),
            hint.to_raw(),
        ))
    }

    fn reserve_ggtt(&mut self, virtual_addr: u64, len: u64, physical: u64) -> Result<()> {
        self.write_record(format::reserve_ggtt(virtual_addr, len, physical))
    }

    fn reserve_ppgtt(&mut self, virtual_addr: u64, len: u64, physical: u64) -> Result<()> {
        self.write_record(format::reserve_ppgtt(virtual_addr, len, physical))
    }

    fn register_poll(
        &mut self,
        register: u32,
        mask: u32,
        expected: u32,
        poll_not_equal: bool,
        timeout_action: TimeoutAction,
    ) -> Result<()> {
        self.write_record(format::register_poll(
            register,
            mask,
            expected,
            poll_not_equal,
            timeout_action.to_raw(),
        ))
    }

    fn add_comment(&mut self, text: &str) -> Result<()> {
        if self.comments {
            self.write_record(format::comment(text))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }

    fn tail_padding(&self) -> TailPadding {
        TailPadding::QwordAlign
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureReader, Record};
    use pretty_assertions::assert_eq;

    #[test]
    fn create_fails_for_unwritable_destination() {
        let err = FileSink::create("/definitely/not/a/real/dir/capture.strb");
        assert!(err.is_err());
    }

    #[test]
    fn records_round_trip_through_the_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.strb");

        let mut sink = FileSink::create(&path).unwrap();
        sink.init(0, 0x12).unwrap();
        sink.write_mmio(0x2080, 0x1000).unwrap();
        sink.reserve_ggtt(0x1000, 4096, 0).unwrap();
        sink.add_memory_write(0x0, &[1, 2, 3, 4], AddressSpaceTag::Nonlocal, ContentHint::CommandBuffer)
            .unwrap();
        sink.register_poll(0x2234, 0x100, 0x100, false, TimeoutAction::Abort)
            .unwrap();
        sink.add_comment("ggtt: 0x1000").unwrap();
        sink.close().unwrap();

        let capture = CaptureReader::open(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(capture.device_id, 0x12);
        assert_eq!(
            capture.records,
            vec![
                Record::MmioWrite {
                    offset: 0x2080,
                    value: 0x1000
                },
                Record::ReserveGgtt {
                    virtual_addr: 0x1000,
                    len: 4096,
                    physical: 0
                },
                Record::MemoryWrite {
                    physical: 0,
                    space: AddressSpaceTag::Nonlocal,
                    hint: ContentHint::CommandBuffer,
                    data: vec![1, 2, 3, 4]
                },
                Record::RegisterPoll {
                    register: 0x2234,
                    mask: 0x100,
                    expected: 0x100,
                    poll_not_equal: false,
                    timeout_action: TimeoutAction::Abort
                },
                Record::Comment("ggtt: 0x1000".to_owned()),
            ]
        );
    }

    #[test]
    fn comments_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.strb");

        let mut sink = FileSink::create(&path).unwrap();
        sink.set_comments(false);
        sink.init(0, 0x12).unwrap();
        sink.add_comment("dropped").unwrap();
        sink.close().unwrap();

        let capture = CaptureReader::open(std::fs::File::open(&path).unwrap()).unwrap();
        assert!(capture.records.is_empty());
    }
}
