//! Modbus/TCP frame codec
//!
//! Splits a byte stream into MBAP frames and serializes frames back,
//! recomputing the length field on every encode.

use bytes::{Buf, BufMut, BytesMut};
use errors::{MitmError, MitmResult};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::constants::{MAX_PDU_SIZE, MBAP_HEADER_LEN, MBAP_LENGTH_OFFSET};
use super::frame::{Frame, MbapHeader};

/// Extract the next complete frame from `buf`.
///
/// Returns `None` when `buf` does not hold a complete frame; the partial
/// bytes stay in place for the next call. A header whose length field is
/// zero cannot describe a frame (the unit id alone needs one byte), so one
/// byte is dropped and decoding resumes from the following offset. Every
/// call therefore either yields a frame, shrinks the buffer, or leaves it
/// untouched because more bytes are needed.
pub fn decode_next(buf: &mut BytesMut) -> Option<Frame> {
    let mut discarded = 0;
    decode_resync(buf, &mut discarded)
}

fn decode_resync(buf: &mut BytesMut, discarded: &mut u64) -> Option<Frame> {
    loop {
        let header = MbapHeader::parse(buf)?;

        let total = MBAP_LENGTH_OFFSET + usize::from(header.length);
        if total < MBAP_HEADER_LEN {
            debug!(
                tid = header.transaction_id,
                length = header.length,
                "Corrupt MBAP length, discarding one byte"
            );
            buf.advance(1);
            *discarded += 1;
            continue;
        }

        if buf.len() < total {
            buf.reserve(total - buf.len());
            return None;
        }

        let mut raw = buf.split_to(total);
        raw.advance(MBAP_HEADER_LEN);
        return Some(Frame {
            transaction_id: header.transaction_id,
            protocol_id: header.protocol_id,
            unit_id: header.unit_id,
            pdu: raw.freeze(),
        });
    }
}

/// Serialize `frame` into `dst`.
///
/// The length field written is always `1 + frame.pdu.len()`.
pub fn encode(frame: &Frame, dst: &mut BytesMut) -> MitmResult<()> {
    if frame.pdu.len() > MAX_PDU_SIZE {
        return Err(MitmError::Frame(format!(
            "PDU too large: {} bytes (max {})",
            frame.pdu.len(),
            MAX_PDU_SIZE
        )));
    }

    dst.reserve(frame.wire_len());
    dst.put_u16(frame.transaction_id);
    dst.put_u16(frame.protocol_id);
    dst.put_u16(frame.length_field());
    dst.put_u8(frame.unit_id);
    dst.put_slice(&frame.pdu);
    Ok(())
}

/// `tokio-util` codec over [`decode_next`] / [`encode`]
///
/// Counts the bytes dropped while resynchronising so the forwarder can report
/// them when the connection closes.
#[derive(Debug, Default)]
pub struct MbapCodec {
    discarded: u64,
}

impl MbapCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes dropped so far (corrupt headers and truncated trailing frames)
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for MbapCodec {
    type Item = Frame;
    type Error = MitmError;

    fn decode(&mut self, src: &mut BytesMut) -> MitmResult<Option<Frame>> {
        Ok(decode_resync(src, &mut self.discarded))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> MitmResult<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            warn!(
                remaining = src.len(),
                "Stream closed mid-frame, dropping partial frame"
            );
            self.discarded += src.len() as u64;
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<Frame> for MbapCodec {
    type Error = MitmError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> MitmResult<()> {
        encode(&frame, dst)
    }
}
