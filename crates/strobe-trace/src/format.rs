//! Capture-file container format.
//!
//! Pure builders that return fully formed records as `Vec<u8>`; the sink
//! decides how to write them and the reader mirrors the layout. All integer
//! fields are little-endian.
//!
//! ```text
//! header:  magic (u32) | version (u32) | device_id (u32) | stepping (u8) | pad (3)
//! record:  type (u8) | pad (3) | payload_len (u32) | payload
//! ```

pub const CAPTURE_MAGIC: u32 = 0x4252_5453; // "STRB"
pub const CAPTURE_VERSION: u32 = 1;

pub const HEADER_SIZE: usize = 16;
pub const RECORD_HEADER_SIZE: usize = 8;

pub const RECORD_MMIO_WRITE: u8 = 1;
pub const RECORD_MEMORY_WRITE: u8 = 2;
pub const RECORD_RESERVE_GGTT: u8 = 3;
pub const RECORD_RESERVE_PPGTT: u8 = 4;
pub const RECORD_REGISTER_POLL: u8 = 5;
pub const RECORD_COMMENT: u8 = 6;

/// Fixed-size prefix of a memory-write payload, before the data bytes.
pub const MEMORY_WRITE_PREFIX: usize = 12;

pub fn header(device_id: u32, stepping: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    out.extend_from_slice(&CAPTURE_MAGIC.to_le_bytes());
    out.extend_from_slice(&CAPTURE_VERSION.to_le_bytes());
    out.extend_from_slice(&device_id.to_le_bytes());
    out.push(stepping);
    out.extend_from_slice(&[0u8; 3]);
    out
}

fn record(record_type: u8, payload: &[u8]) -> Vec<u8> {
    let payload_len = u32::try_from(payload.len()).expect("capture record too large");
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    out.push(record_type);
    out.extend_from_slice(&[0u8; 3]);
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn mmio_write(offset: u32, value: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&offset.to_le_bytes());
    payload.extend_from_slice(&value.to_le_bytes());
    record(RECORD_MMIO_WRITE, &payload)
}

pub fn memory_write(physical: u64, data: &[u8], space: u8, hint: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(MEMORY_WRITE_PREFIX + data.len());
    payload.extend_from_slice(&physical.to_le_bytes());
    payload.push(space);
    payload.push(hint);
    payload.extend_from_slice(&[0u8; 2]);
    payload.extend_from_slice(data);
    record(RECORD_MEMORY_WRITE, &payload)
}

fn reserve_payload(virtual_addr: u64, len: u64, physical: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(&virtual_addr.to_le_bytes());
    payload.extend_from_slice(&len.to_le_bytes());
    payload.extend_from_slice(&physical.to_le_bytes());
    payload
}

pub fn reserve_ggtt(virtual_addr: u64, len: u64, physical: u64) -> Vec<u8> {
    record(RECORD_RESERVE_GGTT, &reserve_payload(virtual_addr, len, physical))
}

pub fn reserve_ppgtt(virtual_addr: u64, len: u64, physical: u64) -> Vec<u8> {
    record(RECORD_RESERVE_PPGTT, &reserve_payload(virtual_addr, len, physical))
}

pub fn register_poll(
    register: u32,
    mask: u32,
    expected: u32,
    poll_not_equal: bool,
    timeout_action: u8,
) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16);
    payload.extend_from_slice(&register.to_le_bytes());
    payload.extend_from_slice(&mask.to_le_bytes());
    payload.extend_from_slice(&expected.to_le_bytes());
    payload.push(u8::from(poll_not_equal));
    payload.push(timeout_action);
    payload.extend_from_slice(&[0u8; 2]);
    record(RECORD_REGISTER_POLL, &payload)
}

pub fn comment(text: &str) -> Vec<u8> {
    record(RECORD_COMMENT, text.as_bytes())
}
