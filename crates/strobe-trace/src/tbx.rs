//! Live transport sink.
//!
//! Forwards every side effect to a simulator process over TCP and runs the
//! completion protocol for real: `register_poll` repeatedly reads the
//! register until the masked condition holds, and `read_memory` pulls
//! simulated memory back into a CPU buffer. Every request is acknowledged
//! before the next one is sent, keeping the receiver and the simulator in
//! lockstep.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::{AddressSpaceTag, ContentHint, Result, SinkError, TailPadding, TimeoutAction, TraceSink};

/// Wire framing shared by the sink and simulator implementations.
///
/// ```text
/// frame:  opcode (u8) | pad (3) | payload_len (u32, le) | payload
/// ```
/// A response reuses the request opcode with [`RESPONSE_BIT`] set.
pub mod tbx_wire {
    pub const RESPONSE_BIT: u8 = 0x80;

    pub const OP_HANDSHAKE: u8 = 1;
    pub const OP_MMIO_WRITE: u8 = 2;
    pub const OP_MMIO_READ: u8 = 3;
    pub const OP_MEM_WRITE: u8 = 4;
    pub const OP_MEM_READ: u8 = 5;
    pub const OP_RESERVE_GGTT: u8 = 6;
    pub const OP_RESERVE_PPGTT: u8 = 7;
    pub const OP_GOODBYE: u8 = 8;

    pub const FRAME_HEADER_LEN: usize = 8;

    pub fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let payload_len = u32::try_from(payload.len()).expect("tbx frame too large");
        let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        out.push(opcode);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    pub fn read_frame<R: std::io::Read>(reader: &mut R) -> std::io::Result<(u8, Vec<u8>)> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let opcode = header[0];
        let payload_len = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;
        Ok((opcode, payload))
    }
}

use tbx_wire::*;

#[derive(Debug, Clone, Copy)]
pub struct TbxConfig {
    /// Delay between completion-poll reads.
    pub poll_interval: Duration,
    /// Budget for one register poll; exceeding it is a fatal tool failure,
    /// not a recoverable error.
    pub poll_timeout: Duration,
}

impl Default for TbxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            poll_timeout: Duration::from_secs(30),
        }
    }
}

pub struct TbxSink {
    stream: TcpStream,
    config: TbxConfig,
}

impl TbxSink {
    pub fn connect<A: ToSocketAddrs>(addr: A, config: TbxConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, config })
    }

    /// Send one request and wait for its acknowledgement.
    fn transact(&mut self, opcode: u8, payload: &[u8]) -> Result<Vec<u8>> {
        self.stream.write_all(&frame(opcode, payload))?;
        let (resp_opcode, resp_payload) = read_frame(&mut self.stream)?;
        if resp_opcode != opcode | RESPONSE_BIT {
            return Err(SinkError::Protocol("response opcode mismatch"));
        }
        Ok(resp_payload)
    }

    fn read_register(&mut self, register: u32) -> Result<u32> {
        let resp = self.transact(OP_MMIO_READ, &register.to_le_bytes())?;
        let bytes: [u8; 4] = resp
            .as_slice()
            .try_into()
            .map_err(|_| SinkError::Protocol("short register read response"))?;
        Ok(u32::from_le_bytes(bytes))
    }
}

impl TraceSink for TbxSink {
    fn init(&mut self, stepping: u8, device_id: u32) -> Result<()> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&device_id.to_le_bytes());
        payload.push(stepping);
        payload.extend_from_slice(&[0u8; 3]);
        self.transact(OP_HANDSHAKE, &payload)?;
        Ok(())
    }

    fn write_mmio(&mut self, offset: u32, value: u32) -> Result<()> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(&value.to_le_bytes());
        self.transact(OP_MMIO_WRITE, &payload)?;
        Ok(())
    }

    fn add_memory_write(
        &mut self,
        physical: u64,
        data: &[u8],
        space: AddressSpaceTag,
        hint: ContentHint,
    ) -> Result<()> {
        let mut payload = Vec::with_capacity(12 + data.len());
        payload.extend_from_slice(&physical.to_le_bytes());
        payload.push(space.to_raw());
        payload.push(hint.to_raw());
        payload.extend_from_slice(&[0u8; 2]);
        payload.extend_from_slice(data);
        self.transact(OP_MEM_WRITE, &payload)?;
        Ok(())
    }

    fn reserve_ggtt(&mut self, virtual_addr: u64, len: u64, physical: u64) -> Result<()> {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&virtual_addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(&physical.to_le_bytes());
        self.transact(OP_RESERVE_GGTT, &payload)?;
        Ok(())
    }

    fn reserve_ppgtt(&mut self, virtual_addr: u64, len: u64, physical: u64) -> Result<()> {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&virtual_addr.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(&physical.to_le_bytes());
        self.transact(OP_RESERVE_PPGTT, &payload)?;
        Ok(())
    }

    fn register_poll(
        &mut self,
        register: u32,
        mask: u32,
        expected: u32,
        poll_not_equal: bool,
        timeout_action: TimeoutAction,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.poll_timeout;
        loop {
            let value = self.read_register(register)?;
            let masked = value & mask;
            let done = if poll_not_equal {
                masked != expected
            } else {
                masked == expected
            };
            if done {
                debug!(register, value, "register poll satisfied");
                return Ok(());
            }
            if Instant::now() >= deadline {
                match timeout_action {
                    TimeoutAction::Abort => {
                        error!(
                            register,
                            mask, expected, value, "register poll timed out; aborting"
                        );
                        std::process::abort();
                    }
                    TimeoutAction::Ignore => {
                        debug!(register, mask, "register poll timed out; ignored");
                        return Ok(());
                    }
                }
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    fn add_comment(&mut self, _text: &str) -> Result<()> {
        // The live transport has no annotation channel.
        Ok(())
    }

    fn read_memory(&mut self, physical: u64, dest: &mut [u8]) -> Result<()> {
        let len = u32::try_from(dest.len()).map_err(|_| SinkError::Protocol("read too large"))?;
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&physical.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
        let resp = self.transact(OP_MEM_READ, &payload)?;
        if resp.len() != dest.len() {
            return Err(SinkError::Protocol("short memory read response"));
        }
        dest.copy_from_slice(&resp);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.transact(OP_GOODBYE, &[])?;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        Ok(())
    }

    fn tail_padding(&self) -> TailPadding {
        TailPadding::TrailingNoop
    }
}
