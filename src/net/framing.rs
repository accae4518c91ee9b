//! Wire framing.
//!
//! # Wire Format
//! ```text
//! Duplex frame (on the wire):
//!     ┌──────────────┬──────────────────┬─────────────┐
//!     │ length u32 LE│ correlation id   │ payload     │
//!     │ (4 bytes)    │ (16 bytes, GUID) │ length - 20 │
//!     └──────────────┴──────────────────┴─────────────┘
//!     length counts itself, the id and the payload.
//!
//! Plain mode (on the send pipe only):
//!     ┌──────────────┬─────────────┐
//!     │ marker u32 LE│ payload     │   marker is stripped before the socket;
//!     └──────────────┴─────────────┘   receive boundaries come from the processor.
//! ```
//!
//! Correlation ids use the mixed-endian GUID byte layout
//! (`Uuid::to_bytes_le`), the nil id meaning "no correlation".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use uuid::Uuid;

pub const LENGTH_FIELD_LEN: usize = 4;
pub const CORRELATION_ID_LEN: usize = 16;
pub const DUPLEX_HEADER_LEN: usize = LENGTH_FIELD_LEN + CORRELATION_ID_LEN;

/// Framing violations. All of them are fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared or recognized size is above the configured buffer capacity.
    #[error("frame of {size} bytes exceeds the {capacity} byte buffer")]
    TooLarge { size: usize, capacity: usize },

    /// A self-inclusive duplex length smaller than its own header.
    #[error("declared frame length {0} is shorter than the {header} byte duplex header", header = DUPLEX_HEADER_LEN)]
    TooShort(usize),

    /// The processor reported a message of zero bytes.
    #[error("processor reported a zero-length message")]
    EmptyMessage,

    /// The receive buffer is full and the processor still cannot size a message.
    #[error("no message boundary within the {capacity} byte receive buffer")]
    Unbounded { capacity: usize },
}

/// One recognized duplex frame.
#[derive(Debug)]
pub struct DuplexFrame {
    pub id: Uuid,
    pub payload: BytesMut,
}

fn read_length(buf: &[u8]) -> usize {
    let mut field = [0u8; LENGTH_FIELD_LEN];
    field.copy_from_slice(&buf[..LENGTH_FIELD_LEN]);
    u32::from_le_bytes(field) as usize
}

/// Header queued ahead of a payload on the send pipe.
///
/// Duplex: the real wire header (length + id). Plain: the internal size marker.
pub fn send_header(
    duplex: bool,
    id: Uuid,
    payload_len: usize,
    capacity: usize,
) -> Result<Bytes, FrameError> {
    if duplex {
        let total = payload_len + DUPLEX_HEADER_LEN;
        if total > capacity || total > u32::MAX as usize {
            return Err(FrameError::TooLarge { size: total, capacity });
        }
        let mut header = BytesMut::with_capacity(DUPLEX_HEADER_LEN);
        header.put_u32_le(total as u32);
        header.put_slice(&id.to_bytes_le());
        Ok(header.freeze())
    } else {
        if payload_len > capacity || payload_len > u32::MAX as usize {
            return Err(FrameError::TooLarge { size: payload_len, capacity });
        }
        let mut marker = BytesMut::with_capacity(LENGTH_FIELD_LEN);
        marker.put_u32_le(payload_len as u32);
        Ok(marker.freeze())
    }
}

/// Build a complete duplex frame in one buffer.
pub fn encode_duplex(id: Uuid, payload: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(DUPLEX_HEADER_LEN + payload.len());
    frame.put_u32_le((DUPLEX_HEADER_LEN + payload.len()) as u32);
    frame.put_slice(&id.to_bytes_le());
    frame.put_slice(payload);
    frame
}

/// Pull the next socket-bound frame off the send pipe buffer.
///
/// Returns the exact bytes to write: the whole frame in duplex mode, the
/// payload with its marker stripped in plain mode.
pub fn take_send_frame(
    buf: &mut BytesMut,
    duplex: bool,
    capacity: usize,
) -> Result<Option<BytesMut>, FrameError> {
    if buf.len() < LENGTH_FIELD_LEN {
        return Ok(None);
    }

    let size = read_length(buf);
    if size > capacity {
        return Err(FrameError::TooLarge { size, capacity });
    }

    if duplex {
        if size < DUPLEX_HEADER_LEN {
            return Err(FrameError::TooShort(size));
        }
        if buf.len() < size {
            return Ok(None);
        }
        Ok(Some(buf.split_to(size)))
    } else {
        if buf.len() < LENGTH_FIELD_LEN + size {
            return Ok(None);
        }
        buf.advance(LENGTH_FIELD_LEN);
        Ok(Some(buf.split_to(size)))
    }
}

/// Recognize one duplex frame at the front of the receive buffer.
pub fn take_duplex_frame(
    buf: &mut BytesMut,
    capacity: usize,
) -> Result<Option<DuplexFrame>, FrameError> {
    if buf.len() < DUPLEX_HEADER_LEN {
        return Ok(None);
    }

    let size = read_length(buf);
    if size < DUPLEX_HEADER_LEN {
        return Err(FrameError::TooShort(size));
    }
    if size > capacity {
        return Err(FrameError::TooLarge { size, capacity });
    }
    if buf.len() < size {
        return Ok(None);
    }

    let mut payload = buf.split_to(size);
    let header = payload.split_to(DUPLEX_HEADER_LEN);
    let mut id = [0u8; CORRELATION_ID_LEN];
    id.copy_from_slice(&header[LENGTH_FIELD_LEN..]);

    Ok(Some(DuplexFrame {
        id: Uuid::from_bytes_le(id),
        payload,
    }))
}

/// Recognize one plain message, sized by `size_of`.
///
/// `size_of` sees at most `capacity` leading bytes and answers `None`
/// while it cannot tell the size yet.
pub fn take_plain_frame<F>(
    buf: &mut BytesMut,
    capacity: usize,
    size_of: F,
) -> Result<Option<BytesMut>, FrameError>
where
    F: FnOnce(&[u8]) -> Option<usize>,
{
    if buf.is_empty() {
        return Ok(None);
    }

    let window = buf.len().min(capacity);
    match size_of(&buf[..window]) {
        None if buf.len() >= capacity => Err(FrameError::Unbounded { capacity }),
        None => Ok(None),
        Some(0) => Err(FrameError::EmptyMessage),
        Some(size) if size > capacity => Err(FrameError::TooLarge { size, capacity }),
        Some(size) if size > buf.len() => Ok(None),
        Some(size) => Ok(Some(buf.split_to(size))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplex_header_is_self_inclusive() {
        let id = Uuid::new_v4();
        let header = send_header(true, id, 5, 1024).unwrap();
        assert_eq!(header.len(), DUPLEX_HEADER_LEN);
        assert_eq!(read_length(&header), 25);
        assert_eq!(&header[4..], &id.to_bytes_le());
    }

    #[test]
    fn correlation_id_uses_guid_byte_order() {
        let id = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let frame = encode_duplex(id, b"");
        assert_eq!(
            &frame[4..20],
            &[0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
        );
    }

    #[test]
    fn plain_marker_is_stripped_before_the_wire() {
        let mut queued = BytesMut::new();
        queued.extend_from_slice(&send_header(false, Uuid::nil(), 3, 1024).unwrap());
        queued.extend_from_slice(b"abc");
        queued.extend_from_slice(&send_header(false, Uuid::nil(), 2, 1024).unwrap());

        let first = take_send_frame(&mut queued, false, 1024).unwrap().unwrap();
        assert_eq!(&first[..], b"abc");
        // second marker without its payload yet
        assert!(take_send_frame(&mut queued, false, 1024).unwrap().is_none());
        queued.extend_from_slice(b"de");
        let second = take_send_frame(&mut queued, false, 1024).unwrap().unwrap();
        assert_eq!(&second[..], b"de");
        assert!(queued.is_empty());
    }

    #[test]
    fn duplex_send_frame_keeps_header() {
        let id = Uuid::new_v4();
        let mut queued = encode_duplex(id, b"payload");
        let frame = take_send_frame(&mut queued, true, 1024).unwrap().unwrap();
        assert_eq!(frame.len(), DUPLEX_HEADER_LEN + 7);
        assert!(queued.is_empty());
    }

    #[test]
    fn oversized_payload_is_rejected_at_enqueue() {
        assert_eq!(
            send_header(true, Uuid::nil(), 1010, 1024),
            Err(FrameError::TooLarge { size: 1030, capacity: 1024 })
        );
        assert_eq!(
            send_header(false, Uuid::nil(), 1025, 1024),
            Err(FrameError::TooLarge { size: 1025, capacity: 1024 })
        );
    }

    #[test]
    fn duplex_frame_waits_for_full_length() {
        let id = Uuid::new_v4();
        let full = encode_duplex(id, b"hello world");
        let mut buf = BytesMut::from(&full[..full.len() - 1]);

        assert!(take_duplex_frame(&mut buf, 1024).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - 1..]);

        let frame = take_duplex_frame(&mut buf, 1024).unwrap().unwrap();
        assert_eq!(frame.id, id);
        assert_eq!(&frame.payload[..], b"hello world");
        assert!(buf.is_empty());
    }

    #[test]
    fn back_to_back_duplex_frames_are_split() {
        let a = Uuid::new_v4();
        let mut buf = encode_duplex(a, b"one");
        buf.extend_from_slice(&encode_duplex(Uuid::nil(), b"two"));

        let first = take_duplex_frame(&mut buf, 1024).unwrap().unwrap();
        let second = take_duplex_frame(&mut buf, 1024).unwrap().unwrap();
        assert_eq!((first.id, &first.payload[..]), (a, &b"one"[..]));
        assert_eq!((second.id, &second.payload[..]), (Uuid::nil(), &b"two"[..]));
    }

    #[test]
    fn duplex_length_below_header_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(19);
        buf.put_slice(&[0u8; 16]);
        assert_eq!(take_duplex_frame(&mut buf, 1024).unwrap_err(), FrameError::TooShort(19));
    }

    #[test]
    fn duplex_length_above_capacity_is_an_error() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(4096);
        buf.put_slice(&[0u8; 16]);
        assert_eq!(
            take_duplex_frame(&mut buf, 1024).unwrap_err(),
            FrameError::TooLarge { size: 4096, capacity: 1024 }
        );
    }

    #[test]
    fn plain_frame_delegates_size_to_processor() {
        let mut buf = BytesMut::from(&b"\x01\x00\x00\x00\x02"[..]);
        let frame = take_plain_frame(&mut buf, 1024, |_| Some(4)).unwrap().unwrap();
        assert_eq!(&frame[..], b"\x01\x00\x00\x00");
        assert_eq!(&buf[..], b"\x02");
        assert!(take_plain_frame(&mut buf, 1024, |_| Some(4)).unwrap().is_none());
    }

    #[test]
    fn plain_frame_sees_at_most_capacity_bytes() {
        let mut buf = BytesMut::from(&[7u8; 32][..]);
        let frame = take_plain_frame(&mut buf, 8, |window| {
            assert_eq!(window.len(), 8);
            Some(8)
        })
        .unwrap();
        assert_eq!(frame.unwrap().len(), 8);
    }

    #[test]
    fn plain_frame_errors() {
        let mut buf = BytesMut::from(&[0u8; 16][..]);
        assert_eq!(take_plain_frame(&mut buf, 16, |_| None).unwrap_err(), FrameError::Unbounded { capacity: 16 });
        assert_eq!(take_plain_frame(&mut buf, 64, |_| Some(0)).unwrap_err(), FrameError::EmptyMessage);
        assert_eq!(
            take_plain_frame(&mut buf, 64, |_| Some(65)).unwrap_err(),
            FrameError::TooLarge { size: 65, capacity: 64 }
        );
        assert!(take_plain_frame(&mut buf, 64, |_| None).unwrap().is_none());
    }
}
