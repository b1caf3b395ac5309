//! Wire codec for `Packet`
//!
//! All integers are big-endian. Strings are prefixed with a `u16` byte length.
//!
//! | opcode | body |
//! |---|---|
//! | 1 sound | `seq:u32 len:u16 data` |
//! | 2 end | - |
//! | 3 participant | `sub:u8 count:u8 count*string` |
//! | 4 ack | `sub:u8 port:u16 count:u16 count*string("name;size/cap")` |
//! | 5 error | `kind:u8 has_detail:u8 [string]` |
//! | 6 debug | `string` |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::packet::{ErrorKind, Packet, PacketOpcode, ParticipantOpcode};
use crate::types::RoomSummary;

/// Size of the fixed read buffer; an incomplete frame may not grow past it.
pub const MAX_FRAME_SIZE: usize = 1024;

/// Decode the first packet in `bytes`, ignoring anything after it.
///
/// Returns `None` for unknown opcodes, truncated frames and bad UTF-8;
/// the caller should treat that as "ignore this read".
pub fn decode(bytes: &[u8]) -> Option<Packet> {
    decode_frame(bytes).ok().map(|(packet, _)| packet)
}

/// Decode the first packet in `bytes` and report how many bytes it used.
pub fn decode_frame(bytes: &[u8]) -> Result<(Packet, usize), CodecError> {
    let mut buf = bytes;
    let opcode = PacketOpcode::try_from(read_u16(&mut buf)?)?;

    let packet = match opcode {
        PacketOpcode::Sound => {
            let sequence = read_u32(&mut buf)?;
            let len = read_u16(&mut buf)? as usize;
            ensure(&buf, len)?;
            let data = buf.copy_to_bytes(len).to_vec();
            Packet::SoundFrame { sequence, data }
        }
        PacketOpcode::End => Packet::EndOfStream,
        PacketOpcode::Participant => {
            let opcode = ParticipantOpcode::try_from(read_u8(&mut buf)?)?;
            let count = read_u8(&mut buf)? as usize;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                params.push(read_string(&mut buf)?);
            }
            Packet::ParticipantRequest { opcode, params }
        }
        PacketOpcode::ParticipantAck => {
            let opcode = ParticipantOpcode::try_from(read_u8(&mut buf)?)?;
            let port = read_u16(&mut buf)?;
            let count = read_u16(&mut buf)? as usize;
            let mut rooms = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                rooms.push(read_string(&mut buf)?.parse::<RoomSummary>()?);
            }
            Packet::ParticipantAck {
                opcode,
                port,
                rooms,
            }
        }
        PacketOpcode::Error => {
            let kind = ErrorKind::try_from(read_u8(&mut buf)?)?;
            let detail = match read_u8(&mut buf)? {
                0 => None,
                1 => Some(read_string(&mut buf)?),
                other => return Err(CodecError::InvalidFlag(other)),
            };
            Packet::ErrorReport { kind, detail }
        }
        PacketOpcode::Debug => Packet::DebugMessage {
            message: read_string(&mut buf)?,
        },
    };

    Ok((packet, bytes.len() - buf.remaining()))
}

/// Encode a packet into a single frame.
///
/// Strings must fit a `u16` length and a request may carry at most 255
/// parameters; packets built by this crate always do.
pub fn encode(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u16(packet.opcode() as u16);

    match packet {
        Packet::SoundFrame { sequence, data } => {
            debug_assert!(data.len() <= u16::MAX as usize);
            buf.put_u32(*sequence);
            buf.put_u16(data.len() as u16);
            buf.put_slice(data);
        }
        Packet::EndOfStream => {}
        Packet::ParticipantRequest { opcode, params } => {
            debug_assert!(params.len() <= u8::MAX as usize);
            buf.put_u8(*opcode as u8);
            buf.put_u8(params.len() as u8);
            for param in params {
                write_string(&mut buf, param);
            }
        }
        Packet::ParticipantAck {
            opcode,
            port,
            rooms,
        } => {
            debug_assert!(rooms.len() <= u16::MAX as usize);
            buf.put_u8(*opcode as u8);
            buf.put_u16(*port);
            buf.put_u16(rooms.len() as u16);
            for room in rooms {
                write_string(&mut buf, &room.to_string());
            }
        }
        Packet::ErrorReport { kind, detail } => {
            buf.put_u8(*kind as u8);
            match detail {
                Some(detail) => {
                    buf.put_u8(1);
                    write_string(&mut buf, detail);
                }
                None => buf.put_u8(0),
            }
        }
        Packet::DebugMessage { message } => write_string(&mut buf, message),
    }

    buf.freeze()
}

/// Pull the next complete packet off the front of a stream read buffer.
///
/// - `Ok(Some(packet))`: a frame was consumed.
/// - `Ok(None)`: nothing usable yet; read more. Zero padding is discarded here.
/// - `Err(_)`: the buffered bytes could not be parsed and were dropped.
pub fn take_frame(buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
    skip_padding(buf);

    match decode_frame(&buf[..]) {
        Ok((packet, used)) => {
            buf.advance(used);
            Ok(Some(packet))
        }
        Err(CodecError::Incomplete { .. }) if buf.len() < MAX_FRAME_SIZE => Ok(None),
        Err(e) => {
            buf.clear();
            Err(e)
        }
    }
}

/// How many summaries from the front of `rooms` fit in one ack frame
pub fn rooms_fitting_frame(rooms: &[RoomSummary]) -> usize {
    // opcode, sub-opcode, port, count
    let mut budget = MAX_FRAME_SIZE - (2 + 1 + 2 + 2);

    rooms
        .iter()
        .take_while(|room| {
            let len = 2 + room.to_string().len();
            if len > budget {
                return false;
            }
            budget -= len;
            true
        })
        .count()
}

// Every opcode has a zero high byte, so the zero just before the first
// non-zero byte is kept. A buffer of only zeros keeps its last byte.
fn skip_padding(buf: &mut BytesMut) {
    let padding = match buf.iter().position(|&b| b != 0) {
        Some(first) => first.saturating_sub(1),
        None => buf.len().saturating_sub(1),
    };
    buf.advance(padding);
}

fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::Incomplete {
            needed,
            available: buf.remaining(),
        });
    }
    Ok(())
}

fn read_u8<B: Buf>(buf: &mut B) -> Result<u8, CodecError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u16<B: Buf>(buf: &mut B) -> Result<u16, CodecError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn read_u32<B: Buf>(buf: &mut B) -> Result<u32, CodecError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn read_string<B: Buf>(buf: &mut B) -> Result<String, CodecError> {
    let len = read_u16(buf)? as usize;
    ensure(buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    Ok(std::str::from_utf8(&bytes)?.to_string())
}

fn write_string<B: BufMut>(buf: &mut B, s: &str) {
    debug_assert!(s.len() <= u16::MAX as usize);
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let bytes = encode(&packet);
        assert_eq!(decode(&bytes), Some(packet));
    }

    fn summary(name: &str, size: u32, max_capacity: u32) -> RoomSummary {
        RoomSummary {
            name: name.to_string(),
            size,
            max_capacity,
        }
    }

    #[test]
    fn test_roundtrip_every_variant() {
        roundtrip(Packet::SoundFrame {
            sequence: 7,
            data: vec![1, 2, 3],
        });
        roundtrip(Packet::EndOfStream);
        roundtrip(Packet::request(ParticipantOpcode::CreateRoom, ["lobby", "2"]));
        roundtrip(Packet::request(ParticipantOpcode::ListRooms, Vec::<String>::new()));
        roundtrip(Packet::ParticipantAck {
            opcode: ParticipantOpcode::ListRooms,
            port: 6000,
            rooms: vec![summary("lobby", 1, 2), summary("a;b", 0, 9)],
        });
        roundtrip(Packet::ErrorReport {
            kind: ErrorKind::Undefined,
            detail: None,
        });
        roundtrip(Packet::error(ErrorKind::RoomExists, ""));
        roundtrip(Packet::DebugMessage {
            message: "héllo wörld".to_string(),
        });
    }

    #[test]
    fn test_roundtrip_longest_debug_message_in_buffer() {
        // opcode (2) + length prefix (2) leaves the rest of the read buffer
        let message = "x".repeat(MAX_FRAME_SIZE - 4);
        let packet = Packet::DebugMessage { message };
        let bytes = encode(&packet);
        assert_eq!(bytes.len(), MAX_FRAME_SIZE);
        assert_eq!(decode(&bytes), Some(packet));
    }

    #[test]
    fn test_request_layout() {
        let bytes = encode(&Packet::request(ParticipantOpcode::Join, ["ab"]));
        assert_eq!(&bytes[..], &[0, 3, 3, 1, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_trailing_zero_padding_is_ignored() {
        let packet = Packet::request(ParticipantOpcode::Join, ["lobby"]);
        let mut padded = vec![0u8; MAX_FRAME_SIZE];
        let bytes = encode(&packet);
        padded[..bytes.len()].copy_from_slice(&bytes);

        let (decoded, used) = decode_frame(&padded).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0u8; 16]), None);
        assert_eq!(decode(&[0, 99]), None);
        // participant with unknown sub-opcode
        assert_eq!(decode(&[0, 3, 42, 0]), None);
        // string length past the end of the buffer
        assert_eq!(decode(&[0, 6, 0, 10, b'a']), None);
        // invalid utf-8
        assert_eq!(decode(&[0, 6, 0, 1, 0xff]), None);
        // detail flag out of range
        assert_eq!(decode(&[0, 5, 1, 7]), None);
    }

    #[test]
    fn test_decode_frame_reports_incomplete() {
        let bytes = encode(&Packet::DebugMessage {
            message: "hello".to_string(),
        });
        let err = decode_frame(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Incomplete { .. }));
    }

    #[test]
    fn test_take_frame_splits_coalesced_reads() {
        let first = Packet::request(ParticipantOpcode::ListRooms, Vec::<String>::new());
        let second = Packet::DebugMessage {
            message: "hi".to_string(),
        };

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&first));
        buf.extend_from_slice(&encode(&second));
        buf.extend_from_slice(&[0, 0, 0]);

        assert_eq!(take_frame(&mut buf), Ok(Some(first)));
        assert_eq!(take_frame(&mut buf), Ok(Some(second)));
        assert_eq!(take_frame(&mut buf), Ok(None));
        assert!(buf.len() <= 1);
    }

    #[test]
    fn test_take_frame_skips_padding_between_frames() {
        let first = Packet::request(ParticipantOpcode::ListRooms, Vec::<String>::new());
        let second = Packet::DebugMessage {
            message: "hi".to_string(),
        };

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&first));
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&encode(&second));
        buf.extend_from_slice(&[0u8; 5]);
        buf.extend_from_slice(&encode(&first));

        assert_eq!(take_frame(&mut buf), Ok(Some(first.clone())));
        assert_eq!(take_frame(&mut buf), Ok(Some(second)));
        assert_eq!(take_frame(&mut buf), Ok(Some(first)));
        assert_eq!(take_frame(&mut buf), Ok(None));
    }

    #[test]
    fn test_take_frame_one_byte_at_a_time() {
        let packets = [
            Packet::DebugMessage {
                message: "hi".to_string(),
            },
            Packet::request(ParticipantOpcode::CreateRoom, ["lobby", "2"]),
        ];
        let mut stream = Vec::new();
        for packet in &packets {
            stream.extend_from_slice(&encode(packet));
            stream.extend_from_slice(&[0, 0]);
        }

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in stream {
            buf.extend_from_slice(&[byte]);
            while let Some(packet) = take_frame(&mut buf).unwrap() {
                decoded.push(packet);
            }
        }

        assert_eq!(decoded, packets);
    }

    #[test]
    fn test_take_frame_keeps_partial_opcode() {
        let packet = Packet::DebugMessage {
            message: "hi".to_string(),
        };
        let bytes = encode(&packet);

        let mut buf = BytesMut::from(&bytes[..1]);
        assert_eq!(take_frame(&mut buf), Ok(None));
        assert_eq!(buf.len(), 1);

        buf.extend_from_slice(&bytes[1..]);
        assert_eq!(take_frame(&mut buf), Ok(Some(packet)));
    }

    #[test]
    fn test_rooms_fitting_frame() {
        let rooms: Vec<RoomSummary> = (0..200)
            .map(|i| summary(&format!("room-{:03}", i), 0, 4))
            .collect();

        let fitting = rooms_fitting_frame(&rooms);
        assert!(fitting > 0 && fitting < rooms.len());

        let ack = Packet::ParticipantAck {
            opcode: ParticipantOpcode::ListRooms,
            port: 6000,
            rooms: rooms[..fitting].to_vec(),
        };
        let bytes = encode(&ack);
        assert!(bytes.len() <= MAX_FRAME_SIZE);

        let mut buf = BytesMut::from(&bytes[..]);
        assert_eq!(take_frame(&mut buf), Ok(Some(ack)));

        assert_eq!(rooms_fitting_frame(&rooms[..3]), 3);
        assert_eq!(rooms_fitting_frame(&[]), 0);
    }

    #[test]
    fn test_take_frame_waits_for_rest_of_frame() {
        let packet = Packet::DebugMessage {
            message: "split".to_string(),
        };
        let bytes = encode(&packet);

        let mut buf = BytesMut::from(&bytes[..3]);
        assert_eq!(take_frame(&mut buf), Ok(None));
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&bytes[3..]);
        assert_eq!(take_frame(&mut buf), Ok(Some(packet)));
    }

    #[test]
    fn test_take_frame_drops_unparsable_data() {
        let mut buf = BytesMut::from(&[0u8, 42, 1, 2, 3][..]);
        assert_eq!(take_frame(&mut buf), Err(CodecError::UnknownOpcode(42)));
        assert!(buf.is_empty());
    }
}
