//! Packet framing for the hand controller link.
//!
//! ```text
//! | STX0 | STX1 | type | cmd (le16) | err (le16) | len (le16) | data | csum |
//! ```
//!
//! `csum` is the two's complement of the byte sum from `type` through the
//! last data byte, so summing those bytes plus `csum` gives zero.

use crate::{
    errors::Error,
    tactile::{SensorId, TactileSample, AXIS_COUNT, TAXEL_COUNT},
    Result,
};

pub const STX0: u8 = 0x02;
pub const STX1: u8 = 0xFD;

/// type + cmd + err + len
const HEADER_LEN: usize = 7;
pub const MAX_PAYLOAD: usize = 1024;

pub const CMD_SENSOR_BYPASS: u16 = 0x000B;

/// id, type, length, then the taxel block
const BYPASS_HEADER_LEN: usize = 3;
pub const BYPASS_PAYLOAD_LEN: usize = BYPASS_HEADER_LEN + TAXEL_COUNT * AXIS_COUNT;
const BYPASS_SCALE: i16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Cmd = 0x00,
    Resp = 0x01,
    Ctrl = 0x02,
    Status = 0x03,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(PacketType::Cmd),
            0x01 => Ok(PacketType::Resp),
            0x02 => Ok(PacketType::Ctrl),
            0x03 => Ok(PacketType::Status),
            other => Err(Error::MalformedPacket(format!(
                "unknown packet type {other:#04x}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    /// command id, or status code for status packets
    pub cmd: u16,
    pub err: u16,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn is_sensor_bypass(&self) -> bool {
        self.kind == PacketType::Status && self.cmd == CMD_SENSOR_BYPASS
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

pub fn encode(kind: PacketType, cmd: u16, err: u16, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::MalformedPacket(format!(
            "payload of {} bytes exceeds {MAX_PAYLOAD}",
            payload.len()
        )));
    }
    let mut buf = Vec::with_capacity(2 + HEADER_LEN + payload.len() + 1);
    buf.push(STX0);
    buf.push(STX1);
    buf.push(kind as u8);
    buf.extend_from_slice(&cmd.to_le_bytes());
    buf.extend_from_slice(&err.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.push(checksum(&buf[2..]));
    Ok(buf)
}

/// Outgoing request packet.
pub fn encode_command(cmd: u16, payload: &[u8]) -> Result<Vec<u8>> {
    encode(PacketType::Ctrl, cmd, 0, payload)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stx0,
    Stx1,
    Header,
    Body { len: usize },
}

/// Incremental decoder; feed it whatever the transport returned.
#[derive(Debug)]
pub struct PacketDecoder {
    state: State,
    buf: Vec<u8>,
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Stx0,
            buf: Vec::with_capacity(HEADER_LEN + MAX_PAYLOAD + 1),
        }
    }

    /// Pushes bytes and returns every frame completed by them, in order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Packet>> {
        let mut out = vec![];
        for &b in bytes {
            if let Some(res) = self.push(b) {
                out.push(res);
            }
        }
        out
    }

    fn push(&mut self, b: u8) -> Option<Result<Packet>> {
        match self.state {
            State::Stx0 => {
                if b == STX0 {
                    self.state = State::Stx1;
                }
                None
            }
            State::Stx1 => {
                self.state = match b {
                    STX1 => {
                        self.buf.clear();
                        State::Header
                    }
                    STX0 => State::Stx1,
                    _ => State::Stx0,
                };
                None
            }
            State::Header => {
                self.buf.push(b);
                if self.buf.len() < HEADER_LEN {
                    return None;
                }
                let len = u16::from_le_bytes([self.buf[5], self.buf[6]]) as usize;
                if len > MAX_PAYLOAD {
                    self.state = State::Stx0;
                    return Some(Err(Error::MalformedPacket(format!(
                        "declared length {len} exceeds {MAX_PAYLOAD}"
                    ))));
                }
                self.state = State::Body { len };
                None
            }
            State::Body { len } => {
                self.buf.push(b);
                if self.buf.len() < HEADER_LEN + len + 1 {
                    return None;
                }
                self.state = State::Stx0;
                Some(self.finish(len))
            }
        }
    }

    fn finish(&self, len: usize) -> Result<Packet> {
        let body = &self.buf[..HEADER_LEN + len];
        let csum = self.buf[HEADER_LEN + len];
        if checksum(body) != csum {
            return Err(Error::MalformedPacket("checksum mismatch".into()));
        }
        Ok(Packet {
            kind: PacketType::try_from(body[0])?,
            cmd: u16::from_le_bytes([body[1], body[2]]),
            err: u16::from_le_bytes([body[3], body[4]]),
            data: body[HEADER_LEN..].to_vec(),
        })
    }
}

/// Decodes a sensor bypass status packet into its id and scaled sample.
pub fn decode_tactile_status(packet: &Packet) -> Result<(SensorId, TactileSample)> {
    if !packet.is_sensor_bypass() {
        return Err(Error::MalformedPacket(format!(
            "not a sensor bypass packet: {:?} {:#06x}",
            packet.kind, packet.cmd
        )));
    }
    let data = &packet.data;
    if data.len() != BYPASS_PAYLOAD_LEN {
        return Err(Error::MalformedPacket(format!(
            "bypass payload is {} bytes, expected {BYPASS_PAYLOAD_LEN}",
            data.len()
        )));
    }
    let id = data[0];
    let mut sample = TactileSample::zeros();
    for (taxel, chunk) in sample
        .0
        .iter_mut()
        .zip(data[BYPASS_HEADER_LEN..].chunks_exact(AXIS_COUNT))
    {
        for (v, raw) in taxel.iter_mut().zip(chunk) {
            *v = (*raw as i8) as i16 * BYPASS_SCALE;
        }
    }
    Ok((id, sample))
}

/// Builds a bypass payload from raw signed taxel bytes.
pub fn bypass_payload(id: SensorId, raw: &[[i8; AXIS_COUNT]; TAXEL_COUNT]) -> Vec<u8> {
    let mut data = Vec::with_capacity(BYPASS_PAYLOAD_LEN);
    data.push(id);
    data.push(0);
    data.push((TAXEL_COUNT * AXIS_COUNT) as u8);
    data.extend(raw.iter().flatten().map(|v| *v as u8));
    data
}
