//! Parses the header of every inbound message and, for each message-kind code this
//! crate handles, decodes the tail into a typed record.
//!
//! Nothing here does raw pointer arithmetic over the inbound buffer: every field
//! read goes through [`FieldReader`], which checks the declared size against the
//! remaining buffer length before each read. A short buffer is a
//! [`SimConnectError::MalformedMessage`], never a panic or an out-of-bounds read.

use crate::abi::{RawHeader, RawMessageKind, HEADER_LEN};
use crate::error::SimConnectError;

/// A bounds-checked cursor over an inbound message buffer.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn need(&self, len: usize) -> Result<(), SimConnectError> {
        if self.buf.len() < self.pos + len {
            return Err(SimConnectError::MalformedMessage(format!(
                "need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.buf.len()
            )));
        }
        Ok(())
    }

    fn u32(&mut self) -> Result<u32, SimConnectError> {
        self.need(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], SimConnectError> {
        self.need(len)?;
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Truncates a fixed-width, null-terminated byte array at the first zero byte and
/// decodes it as UTF-8, lossily if the vendor ever sends non-UTF-8 bytes.
fn decode_fixed_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// The decoded header shared by every inbound message.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub size: u32,
    pub version: u32,
    pub kind: RawMessageKind,
}

/// A basic event: an event ID plus a 32-bit payload.
#[derive(Debug, Clone, Copy)]
pub struct BasicEvent {
    pub event_id: u32,
    pub data: u32,
}

/// An object-lifecycle event: a basic event plus the affected object's ID.
#[derive(Debug, Clone, Copy)]
pub struct ObjectEvent {
    pub event_id: u32,
    pub data: u32,
    pub object_id: u32,
}

/// A filename event: a basic event plus a fixed 260-byte null-terminated path.
#[derive(Debug, Clone)]
pub struct FilenameEvent {
    pub event_id: u32,
    pub data: u32,
    pub file_name: String,
}

/// A frame event: a basic event whose payload is a frame-rate measurement.
#[derive(Debug, Clone, Copy)]
pub struct FrameEvent {
    pub event_id: u32,
    pub frame_rate: u32,
}

/// A data-sample record: the current value(s) of an armed data definition.
#[derive(Debug, Clone)]
pub struct DataSample {
    pub request_id: u32,
    pub object_id: u32,
    pub definition_id: u32,
    pub payload: Vec<u8>,
}

impl DataSample {
    /// Interprets the payload as a little-endian `f64` and returns the first
    /// value, since every definition this crate creates is deliberately
    /// single-field. Returns `None` if the payload is shorter than 8 bytes.
    pub fn first_f64(&self) -> Option<f64> {
        let bytes: [u8; 8] = self.payload.get(0..8)?.try_into().ok()?;
        Some(f64::from_le_bytes(bytes))
    }
}

/// A fully decoded inbound message.
#[derive(Debug, Clone)]
pub enum Message {
    Exception { code: u32 },
    Open,
    Quit,
    Event(BasicEvent),
    ObjectEvent(ObjectEvent),
    FilenameEvent(FilenameEvent),
    FrameEvent(FrameEvent),
    SimObjectData(DataSample),
    /// A message-kind code this crate does not interpret; carried through so the
    /// dispatcher can ignore it silently, as specified.
    Unhandled(RawMessageKind),
}

/// Parses the header of `buf` only, without decoding the tail.
pub fn parse_header(buf: &[u8]) -> Result<Header, SimConnectError> {
    if buf.len() < HEADER_LEN {
        return Err(SimConnectError::MalformedMessage(format!(
            "buffer of {} bytes shorter than header ({} bytes)",
            buf.len(),
            HEADER_LEN
        )));
    }
    let mut r = FieldReader::new(buf);
    let size = r.u32()?;
    let version = r.u32()?;
    let kind = RawMessageKind(r.u32()?);

    if (size as usize) < HEADER_LEN {
        return Err(SimConnectError::MalformedMessage(format!(
            "declared size {size} smaller than header size {HEADER_LEN}"
        )));
    }

    Ok(Header {
        size,
        version,
        kind,
    })
}

/// Parses the full message, header and tail, dispatching on the message-kind code.
pub fn parse_message(buf: &[u8]) -> Result<Message, SimConnectError> {
    let header = parse_header(buf)?;
    let mut r = FieldReader::new(buf);
    r.pos = HEADER_LEN;

    Ok(match header.kind {
        RawMessageKind::EXCEPTION => Message::Exception { code: r.u32()? },
        RawMessageKind::OPEN => Message::Open,
        RawMessageKind::QUIT => Message::Quit,
        RawMessageKind::EVENT => Message::Event(BasicEvent {
            event_id: r.u32()?,
            data: r.u32()?,
        }),
        RawMessageKind::EVENT_OBJECT_ADD_REMOVE => Message::ObjectEvent(ObjectEvent {
            event_id: r.u32()?,
            data: r.u32()?,
            object_id: r.u32()?,
        }),
        RawMessageKind::EVENT_FILENAME => {
            let event_id = r.u32()?;
            let data = r.u32()?;
            let file_name = decode_fixed_cstr(r.bytes(260)?);
            Message::FilenameEvent(FilenameEvent {
                event_id,
                data,
                file_name,
            })
        }
        RawMessageKind::EVENT_FRAME => Message::FrameEvent(FrameEvent {
            event_id: r.u32()?,
            frame_rate: r.u32()?,
        }),
        RawMessageKind::SIM_OBJECT_DATA => {
            let request_id = r.u32()?;
            let object_id = r.u32()?;
            let definition_id = r.u32()?;
            let _flags = r.u32()?;
            let _reserved1 = r.u32()?;
            let _reserved2 = r.u32()?;
            let _definition_count = r.u32()?;
            let payload = r.remaining().to_vec();
            Message::SimObjectData(DataSample {
                request_id,
                object_id,
                definition_id,
                payload,
            })
        }
        other => Message::Unhandled(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(size: u32, version: u32, kind: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&version.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf
    }

    #[test]
    fn header_round_trips() {
        let buf = header_bytes(12, 4, RawMessageKind::OPEN.0);
        let header = parse_header(&buf).unwrap();
        assert_eq!(header.size, 12);
        assert_eq!(header.version, 4);
        assert_eq!(header.kind, RawMessageKind::OPEN);
    }

    #[test]
    fn buffer_shorter_than_header_is_malformed() {
        let buf = vec![0u8; HEADER_LEN - 1];
        assert!(matches!(
            parse_header(&buf),
            Err(SimConnectError::MalformedMessage(_))
        ));
    }

    #[test]
    fn declared_size_smaller_than_header_is_malformed() {
        let buf = header_bytes(4, 0, RawMessageKind::OPEN.0);
        assert!(matches!(
            parse_header(&buf),
            Err(SimConnectError::MalformedMessage(_))
        ));
    }

    #[test]
    fn data_sample_short_payload_has_no_first_value() {
        let sample = DataSample {
            request_id: 1,
            object_id: 0,
            definition_id: 1,
            payload: vec![0u8; 4],
        };
        assert_eq!(sample.first_f64(), None);
    }

    #[test]
    fn data_sample_decodes_little_endian_f64() {
        let mut buf = header_bytes(
            (HEADER_LEN + 7 * 4 + 8) as u32,
            0,
            RawMessageKind::SIM_OBJECT_DATA.0,
        );
        buf.extend_from_slice(&42u32.to_le_bytes()); // request_id
        buf.extend_from_slice(&0u32.to_le_bytes()); // object_id
        buf.extend_from_slice(&7u32.to_le_bytes()); // definition_id
        buf.extend_from_slice(&0u32.to_le_bytes()); // flags
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved1
        buf.extend_from_slice(&0u32.to_le_bytes()); // reserved2
        buf.extend_from_slice(&1u32.to_le_bytes()); // definition_count
        buf.extend_from_slice(&1234.5f64.to_le_bytes());

        let msg = parse_message(&buf).unwrap();
        match msg {
            Message::SimObjectData(sample) => {
                assert_eq!(sample.request_id, 42);
                assert_eq!(sample.definition_id, 7);
                assert_eq!(sample.first_f64(), Some(1234.5));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn filename_event_truncates_at_first_nul() {
        let mut buf = header_bytes(
            (HEADER_LEN + 4 + 4 + 260) as u32,
            0,
            RawMessageKind::EVENT_FILENAME.0,
        );
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        let mut name = vec![0u8; 260];
        name[0..8].copy_from_slice(b"test.flt");
        buf.extend_from_slice(&name);

        match parse_message(&buf).unwrap() {
            Message::FilenameEvent(ev) => assert_eq!(ev.file_name, "test.flt"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
