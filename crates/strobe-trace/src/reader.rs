//! Capture-file reader used by tooling and tests.

use std::io::Read;

use thiserror::Error;

use crate::format::{
    CAPTURE_MAGIC, CAPTURE_VERSION, HEADER_SIZE, MEMORY_WRITE_PREFIX, RECORD_COMMENT,
    RECORD_HEADER_SIZE, RECORD_MEMORY_WRITE, RECORD_MMIO_WRITE, RECORD_REGISTER_POLL,
    RECORD_RESERVE_GGTT, RECORD_RESERVE_PPGTT,
};
use crate::{AddressSpaceTag, ContentHint, TimeoutAction};

#[derive(Debug, Error)]
pub enum CaptureReadError {
    #[error("capture io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a strobe capture (bad magic)")]
    InvalidMagic,
    /// Newer/unknown container versions are rejected deterministically
    /// before any version-specific field is interpreted.
    #[error("unsupported capture version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
    #[error("malformed record of type {0}")]
    MalformedRecord(u8),
    #[error("truncated capture")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    MmioWrite {
        offset: u32,
        value: u32,
    },
    MemoryWrite {
        physical: u64,
        space: AddressSpaceTag,
        hint: ContentHint,
        data: Vec<u8>,
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
    RegisterPoll {
        register: u32,
        mask: u32,
        expected: u32,
        poll_not_equal: bool,
        timeout_action: TimeoutAction,
    },
    Comment(String),
}

#[derive(Debug)]
pub struct CaptureReader {
    pub device_id: u32,
    pub stepping: u8,
    pub records: Vec<Record>,
}

impl CaptureReader {
    pub fn open<R: Read>(mut reader: R) -> Result<Self, CaptureReadError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CaptureReadError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CaptureReadError::Truncated);
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != CAPTURE_MAGIC {
            return Err(CaptureReadError::InvalidMagic);
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != CAPTURE_VERSION {
            return Err(CaptureReadError::UnsupportedVersion(version));
        }
        let device_id = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let stepping = bytes[12];

        let mut records = Vec::new();
        let mut cursor = HEADER_SIZE;
        while cursor < bytes.len() {
            if bytes.len() - cursor < RECORD_HEADER_SIZE {
                return Err(CaptureReadError::Truncated);
            }
            let record_type = bytes[cursor];
            let payload_len =
                u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
            cursor += RECORD_HEADER_SIZE;
            if bytes.len() - cursor < payload_len {
                return Err(CaptureReadError::Truncated);
            }
            let payload = &bytes[cursor..cursor + payload_len];
            cursor += payload_len;
            records.push(parse_record(record_type, payload)?);
        }

        Ok(Self {
            device_id,
            stepping,
            records,
        })
    }
}

fn parse_record(record_type: u8, payload: &[u8]) -> Result<Record, CaptureReadError> {
    let malformed = || CaptureReadError::MalformedRecord(record_type);
    let u32_at = |off: usize| -> Result<u32, CaptureReadError> {
        payload
            .get(off..off + 4)
            .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
            .ok_or_else(malformed)
    };
    let u64_at = |off: usize| -> Result<u64, CaptureReadError> {
        payload
            .get(off..off + 8)
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
            .ok_or_else(malformed)
    };

    match record_type {
        RECORD_MMIO_WRITE => {
            if payload.len() != 8 {
                return Err(malformed());
            }
            Ok(Record::MmioWrite {
                offset: u32_at(0)?,
                value: u32_at(4)?,
            })
        }
        RECORD_MEMORY_WRITE => {
            if payload.len() < MEMORY_WRITE_PREFIX {
                return Err(malformed());
            }
            Ok(Record::MemoryWrite {
                physical: u64_at(0)?,
                space: AddressSpaceTag::from_raw(payload[8]).ok_or_else(malformed)?,
                hint: ContentHint::from_raw(payload[9]).ok_or_else(malformed)?,
                data: payload[MEMORY_WRITE_PREFIX..].to_vec(),
            })
        }
        RECORD_RESERVE_GGTT | RECORD_RESERVE_PPGTT => {
            if payload.len() != 24 {
                return Err(malformed());
            }
            let virtual_addr = u64_at(0)?;
            let len = u64_at(8)?;
            let physical = u64_at(16)?;
            Ok(if record_type == RECORD_RESERVE_GGTT {
                Record::ReserveGgtt {
                    virtual_addr,
                    len,
                    physical,
                }
            } else {
                Record::ReservePpgtt {
                    virtual_addr,
                    len,
                    physical,
                }
            })
        }
        RECORD_REGISTER_POLL => {
            if payload.len() != 16 {
                return Err(malformed());
            }
            Ok(Record::RegisterPoll {
                register: u32_at(0)?,
                mask: u32_at(4)?,
                expected: u32_at(8)?,
                poll_not_equal: payload[12] != 0,
                timeout_action: TimeoutAction::from_raw(payload[13]).ok_or_else(malformed)?,
            })
        }
        RECORD_COMMENT => {
            let text = std::str::from_utf8(payload).map_err(|_| malformed())?;
            Ok(Record::Comment(text.to_owned()))
        }
        other => Err(CaptureReadError::UnknownRecordType(other)),
    }
}
