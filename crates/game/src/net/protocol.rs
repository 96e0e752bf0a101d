//! Wire protocol: the packet header and the six message types.
//!
//! Everything on the wire is explicit little-endian with fixed field
//! order; there is no serialization framework and no padding. The first
//! payload byte after the header repeats the message kind, which is what
//! receivers dispatch on.

use thiserror::Error;

use crate::net::quantize::{QuantizedPlayer, QuantizedShot};
use crate::player::MAX_PLAYERS;
use crate::shot::MAX_SHOTS;

pub const SERVER_PORT: u16 = 7777;
pub const MAX_PACKET_SIZE: usize = 1500;
pub const HEADER_SIZE: usize = 10;

pub const PLAYER_NAME_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Snapshot = 1,
    Input = 2,
    PlayerLeft = 3,
    PlayerDied = 4,
    ConnectRequest = 5,
    ConnectAccept = 6,
}

impl MessageKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Snapshot),
            2 => Some(Self::Input),
            3 => Some(Self::PlayerLeft),
            4 => Some(Self::PlayerDied),
            5 => Some(Self::ConnectRequest),
            6 => Some(Self::ConnectAccept),
            _ => None,
        }
    }
}

/// 10-byte header carried by every datagram. The ack fields piggy-back
/// the receive window state so reliable-message acknowledgements ride on
/// whatever traffic already flows the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: u8,
    pub flags: u8,
    pub sequence: u16,
    pub ack_bits: u32,
    pub ack: u16,
}

impl PacketHeader {
    pub const FLAG_RELIABLE: u8 = 0x01;

    pub fn is_reliable(&self) -> bool {
        self.flags & Self::FLAG_RELIABLE != 0
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.kind;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..8].copy_from_slice(&self.ack_bits.to_le_bytes());
        buf[8..10].copy_from_slice(&self.ack.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE,
                got: buf.len(),
            });
        }

        Ok(Self {
            kind: buf[0],
            flags: buf[1],
            sequence: u16::from_le_bytes([buf[2], buf[3]]),
            ack_bits: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ack: u16::from_le_bytes([buf[8], buf[9]]),
        })
    }
}

/// Sequential little-endian writer over a caller-provided buffer.
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }

    pub fn i8(&mut self, v: i8) {
        self.u8(v as u8);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }

    pub fn i16(&mut self, v: i16) {
        self.u16(v as u16);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }

    pub fn f32(&mut self, v: f32) {
        self.u32(v.to_bits());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }
}

/// Sequential little-endian reader; every accessor checks bounds.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.pos + n > self.buf.len() {
            return Err(ProtocolError::Truncated {
                needed: self.pos + n,
                got: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(self.u16()? as i16)
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(n)
    }
}

/// Outbound message: a kind plus a fixed-size payload encoding.
pub trait Encode {
    const KIND: MessageKind;
    /// Payload size in bytes, including the leading kind byte.
    const SIZE: usize;

    fn encode_payload(&self, w: &mut Writer);
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    pub player_name: [u8; PLAYER_NAME_LEN],
}

impl ConnectRequest {
    pub fn new(name: &str) -> Self {
        let mut player_name = [0u8; PLAYER_NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(PLAYER_NAME_LEN - 1);
        player_name[..len].copy_from_slice(&bytes[..len]);
        Self { player_name }
    }

    pub fn name(&self) -> &str {
        let end = self
            .player_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PLAYER_NAME_LEN);
        std::str::from_utf8(&self.player_name[..end]).unwrap_or("")
    }

    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        let mut player_name = [0u8; PLAYER_NAME_LEN];
        player_name.copy_from_slice(r.bytes(PLAYER_NAME_LEN)?);
        Ok(Self { player_name })
    }
}

impl Encode for ConnectRequest {
    const KIND: MessageKind = MessageKind::ConnectRequest;
    const SIZE: usize = 1 + PLAYER_NAME_LEN;

    fn encode_payload(&self, w: &mut Writer) {
        w.u8(Self::KIND as u8);
        w.bytes(&self.player_name);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectAccept {
    pub server_time: f32,
    pub player_index: i8,
}

impl ConnectAccept {
    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            server_time: r.f32()?,
            player_index: r.i8()?,
        })
    }
}

impl Encode for ConnectAccept {
    const KIND: MessageKind = MessageKind::ConnectAccept;
    const SIZE: usize = 1 + 4 + 1;

    fn encode_payload(&self, w: &mut Writer) {
        w.u8(Self::KIND as u8);
        w.f32(self.server_time);
        w.i8(self.player_index);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InputMessage {
    pub sequence: u32,
    pub move_x: f32,
    pub move_z: f32,
    pub look_yaw: f32,
    pub look_pitch: f32,
    pub buttons: u8,
    pub shot_time: f32,
    pub time: f32,
}

impl InputMessage {
    pub const BUTTON_SHOOT: u8 = 0x01;
    pub const BUTTON_JUMP: u8 = 0x02;

    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            sequence: r.u32()?,
            move_x: r.f32()?,
            move_z: r.f32()?,
            look_yaw: r.f32()?,
            look_pitch: r.f32()?,
            buttons: r.u8()?,
            shot_time: r.f32()?,
            time: r.f32()?,
        })
    }
}

impl Encode for InputMessage {
    const KIND: MessageKind = MessageKind::Input;
    const SIZE: usize = 1 + 4 + 4 * 4 + 1 + 4 + 4;

    fn encode_payload(&self, w: &mut Writer) {
        w.u8(Self::KIND as u8);
        w.u32(self.sequence);
        w.f32(self.move_x);
        w.f32(self.move_z);
        w.f32(self.look_yaw);
        w.f32(self.look_pitch);
        w.u8(self.buttons);
        w.f32(self.shot_time);
        w.f32(self.time);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotMessage {
    pub server_time: f32,
    pub player_count: u8,
    pub shot_count: u8,
    pub players: [QuantizedPlayer; MAX_PLAYERS],
    pub shots: [QuantizedShot; MAX_SHOTS],
}

impl Default for SnapshotMessage {
    fn default() -> Self {
        Self {
            server_time: 0.0,
            player_count: 0,
            shot_count: 0,
            players: [QuantizedPlayer::default(); MAX_PLAYERS],
            shots: [QuantizedShot::default(); MAX_SHOTS],
        }
    }
}

impl SnapshotMessage {
    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        let server_time = r.f32()?;
        let player_count = r.u8()?;
        let shot_count = r.u8()?;

        let mut players = [QuantizedPlayer::default(); MAX_PLAYERS];
        for player in &mut players {
            *player = QuantizedPlayer::decode(r)?;
        }

        let mut shots = [QuantizedShot::default(); MAX_SHOTS];
        for shot in &mut shots {
            *shot = QuantizedShot::decode(r)?;
        }

        Ok(Self {
            server_time,
            player_count: player_count.min(MAX_PLAYERS as u8),
            shot_count: shot_count.min(MAX_SHOTS as u8),
            players,
            shots,
        })
    }
}

impl Encode for SnapshotMessage {
    const KIND: MessageKind = MessageKind::Snapshot;
    const SIZE: usize =
        1 + 4 + 1 + 1 + MAX_PLAYERS * QuantizedPlayer::SIZE + MAX_SHOTS * QuantizedShot::SIZE;

    fn encode_payload(&self, w: &mut Writer) {
        w.u8(Self::KIND as u8);
        w.f32(self.server_time);
        w.u8(self.player_count);
        w.u8(self.shot_count);
        for player in &self.players {
            player.encode(w);
        }
        for shot in &self.shots {
            shot.encode(w);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerLeftEvent {
    pub player_idx: i8,
}

impl PlayerLeftEvent {
    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            player_idx: r.i8()?,
        })
    }
}

impl Encode for PlayerLeftEvent {
    const KIND: MessageKind = MessageKind::PlayerLeft;
    const SIZE: usize = 2;

    fn encode_payload(&self, w: &mut Writer) {
        w.u8(Self::KIND as u8);
        w.i8(self.player_idx);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerDiedEvent {
    pub killer_idx: i8,
    pub killed_idx: i8,
}

impl PlayerDiedEvent {
    pub fn decode(r: &mut Reader) -> Result<Self, ProtocolError> {
        Ok(Self {
            killer_idx: r.i8()?,
            killed_idx: r.i8()?,
        })
    }
}

impl Encode for PlayerDiedEvent {
    const KIND: MessageKind = MessageKind::PlayerDied;
    const SIZE: usize = 3;

    fn encode_payload(&self, w: &mut Writer) {
        w.u8(Self::KIND as u8);
        w.i8(self.killer_idx);
        w.i8(self.killed_idx);
    }
}

/// Inbound payloads as a sum type; receivers dispatch by pattern match.
#[derive(Debug, Clone)]
pub enum Message {
    Snapshot(SnapshotMessage),
    Input(InputMessage),
    PlayerLeft(PlayerLeftEvent),
    PlayerDied(PlayerDiedEvent),
    ConnectRequest(ConnectRequest),
    ConnectAccept(ConnectAccept),
}

impl Message {
    /// Decodes a payload (header already stripped).
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        let kind = r.u8()?;
        let kind = MessageKind::from_u8(kind).ok_or(ProtocolError::UnknownKind(kind))?;

        Ok(match kind {
            MessageKind::Snapshot => Message::Snapshot(SnapshotMessage::decode(&mut r)?),
            MessageKind::Input => Message::Input(InputMessage::decode(&mut r)?),
            MessageKind::PlayerLeft => Message::PlayerLeft(PlayerLeftEvent::decode(&mut r)?),
            MessageKind::PlayerDied => Message::PlayerDied(PlayerDiedEvent::decode(&mut r)?),
            MessageKind::ConnectRequest => {
                Message::ConnectRequest(ConnectRequest::decode(&mut r)?)
            }
            MessageKind::ConnectAccept => Message::ConnectAccept(ConnectAccept::decode(&mut r)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = PacketHeader {
            kind: MessageKind::Input as u8,
            flags: PacketHeader::FLAG_RELIABLE,
            sequence: 0xBEEF,
            ack_bits: 0xDEAD_BEEF,
            ack: 0x1234,
        };

        let mut buf = [0u8; HEADER_SIZE];
        header.encode(&mut buf);
        let decoded = PacketHeader::decode(&buf).unwrap();

        assert_eq!(header, decoded);
        assert!(decoded.is_reliable());
    }

    #[test]
    fn header_too_short() {
        assert!(PacketHeader::decode(&[0u8; 5]).is_err());
    }

    #[test]
    fn input_roundtrip() {
        let input = InputMessage {
            sequence: 42,
            move_x: 1.0,
            move_z: -0.5,
            look_yaw: 1.25,
            look_pitch: -0.3,
            buttons: InputMessage::BUTTON_SHOOT | InputMessage::BUTTON_JUMP,
            shot_time: 12.5,
            time: 13.0,
        };

        let mut buf = [0u8; InputMessage::SIZE];
        let mut w = Writer::new(&mut buf);
        input.encode_payload(&mut w);
        assert_eq!(w.written(), InputMessage::SIZE);

        match Message::decode(&buf).unwrap() {
            Message::Input(decoded) => {
                assert_eq!(decoded.sequence, 42);
                assert_eq!(decoded.move_x, 1.0);
                assert_eq!(decoded.buttons, input.buttons);
                assert_eq!(decoded.shot_time, 12.5);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn connect_request_name_is_nul_padded() {
        let req = ConnectRequest::new("p1");
        assert_eq!(req.name(), "p1");
        assert_eq!(req.player_name[2], 0);

        // Over-long names are truncated, keeping the trailing NUL.
        let long = ConnectRequest::new(&"x".repeat(64));
        assert_eq!(long.name().len(), PLAYER_NAME_LEN - 1);
    }

    #[test]
    fn snapshot_fits_in_one_datagram() {
        assert!(HEADER_SIZE + SnapshotMessage::SIZE <= MAX_PACKET_SIZE);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let msg = SnapshotMessage::default();
        let mut buf = [0u8; SnapshotMessage::SIZE];
        let mut w = Writer::new(&mut buf);
        msg.encode_payload(&mut w);

        assert!(Message::decode(&buf[..SnapshotMessage::SIZE / 2]).is_err());
        assert!(Message::decode(&buf).is_ok());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            Message::decode(&[99, 0, 0]),
            Err(ProtocolError::UnknownKind(99))
        ));
    }
}
