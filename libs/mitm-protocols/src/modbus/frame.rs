//! MBAP-framed Modbus/TCP message

use bytes::Bytes;

use super::constants::{EXCEPTION_FLAG, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (0 for Modbus)
    pub protocol_id: u16,
    /// Length field: unit id + PDU
    pub length: u16,
    /// Unit identifier (slave ID)
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the first 7 bytes of `data`, `None` if fewer are available
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < MBAP_HEADER_LEN {
            return None;
        }
        Some(Self {
            transaction_id: u16::from_be_bytes([data[0], data[1]]),
            protocol_id: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            unit_id: data[6],
        })
    }
}

/// One complete Modbus/TCP frame
///
/// The length field is not stored: it is always `1 + pdu.len()` and is
/// derived whenever the frame is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub unit_id: u8,
    /// Function code followed by its arguments or results
    pub pdu: Bytes,
}

impl Frame {
    /// Build a Modbus frame (protocol id 0)
    pub fn new(transaction_id: u16, unit_id: u8, pdu: impl Into<Bytes>) -> Self {
        Self {
            transaction_id,
            protocol_id: MODBUS_PROTOCOL_ID,
            unit_id,
            pdu: pdu.into(),
        }
    }

    /// Same header, different PDU
    pub fn with_pdu(&self, pdu: impl Into<Bytes>) -> Self {
        Self {
            transaction_id: self.transaction_id,
            protocol_id: self.protocol_id,
            unit_id: self.unit_id,
            pdu: pdu.into(),
        }
    }

    /// Value the length field takes on the wire (saturates for oversized PDUs,
    /// which `encode` rejects)
    #[inline]
    pub fn length_field(&self) -> u16 {
        u16::try_from(self.pdu.len() + 1).unwrap_or(u16::MAX)
    }

    /// Total encoded size in bytes
    #[inline]
    pub fn wire_len(&self) -> usize {
        MBAP_HEADER_LEN + self.pdu.len()
    }

    /// Header as it will be encoded
    pub fn header(&self) -> MbapHeader {
        MbapHeader {
            transaction_id: self.transaction_id,
            protocol_id: self.protocol_id,
            length: self.length_field(),
            unit_id: self.unit_id,
        }
    }

    /// Function code (first PDU byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.pdu.first().copied()
    }

    /// Exception responses carry the function code with bit 0x80 set
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let raw = [0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03];
        let header = MbapHeader::parse(&raw).unwrap();
        assert_eq!(header.transaction_id, 0x1234);
        assert_eq!(header.protocol_id, 0);
        assert_eq!(header.length, 6);
        assert_eq!(header.unit_id, 0x11);

        assert!(MbapHeader::parse(&raw[..6]).is_none());
    }

    #[test]
    fn test_length_field_tracks_pdu() {
        let frame = Frame::new(1, 1, vec![0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(frame.length_field(), 6);
        assert_eq!(frame.wire_len(), 12);

        let grown = frame.with_pdu(vec![0x03; 20]);
        assert_eq!(grown.length_field(), 21);
        assert_eq!(grown.transaction_id, 1);
    }

    #[test]
    fn test_exception_detection() {
        assert!(Frame::new(1, 1, vec![0x83, 0x02]).is_exception());
        assert!(!Frame::new(1, 1, vec![0x03, 0x02, 0x00, 0x01]).is_exception());
        assert!(!Frame::new(1, 1, Vec::new()).is_exception());
        assert_eq!(Frame::new(1, 1, Vec::new()).function_code(), None);
    }
}
