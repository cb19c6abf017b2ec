//! Modbus PDU helpers
//!
//! Just enough PDU knowledge for the proxy: recognise FC03 requests, locate
//! the register block of an FC03 response, and build PDUs for tests and
//! simulators through a fluent builder.

use bytes::{BufMut, Bytes, BytesMut};
use errors::{MitmError, MitmResult};

use super::constants::{EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_READ_REGISTERS};

/// Human-readable function code name for logs
pub fn function_code_description(fc: u8) -> &'static str {
    match fc & !EXCEPTION_FLAG {
        0x01 => "Read Coils",
        0x02 => "Read Discrete Inputs",
        0x03 => "Read Holding Registers",
        0x04 => "Read Input Registers",
        0x05 => "Write Single Coil",
        0x06 => "Write Single Register",
        0x0F => "Write Multiple Coils",
        0x10 => "Write Multiple Registers",
        0x17 => "Read/Write Multiple Registers",
        _ => "Unknown Function",
    }
}

/// Read request arguments: `fc(1) start(2) count(2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegistersRequest {
    pub function_code: u8,
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRegistersRequest {
    /// FC03 request for `quantity` registers from `start_address`
    pub fn holding(start_address: u16, quantity: u16) -> Self {
        Self {
            function_code: FC_READ_HOLDING_REGISTERS,
            start_address,
            quantity,
        }
    }

    /// Parse an FC03 request PDU
    ///
    /// Any other function code, or a PDU shorter than five bytes, is rejected.
    pub fn parse_holding(pdu: &[u8]) -> MitmResult<Self> {
        match pdu.first() {
            Some(&FC_READ_HOLDING_REGISTERS) => {},
            Some(&fc) => {
                return Err(MitmError::Protocol(format!(
                    "Not a read holding registers request: FC{:02X}",
                    fc
                )))
            },
            None => return Err(MitmError::Protocol("Empty PDU".to_string())),
        }
        if pdu.len() < 5 {
            return Err(MitmError::Protocol(format!(
                "Read request too short: {} bytes",
                pdu.len()
            )));
        }

        Ok(Self {
            function_code: pdu[0],
            start_address: u16::from_be_bytes([pdu[1], pdu[2]]),
            quantity: u16::from_be_bytes([pdu[3], pdu[4]]),
        })
    }

    /// Encode as a request PDU
    pub fn to_pdu(&self) -> Bytes {
        PduBuilder::new()
            .function_code(self.function_code)
            .address(self.start_address)
            .quantity(self.quantity)
            .build()
    }
}

/// Register block of a read-registers response: `fc(1) byte_count(1) data(n)`
///
/// Returns the byte offset and length of the data area, after checking that
/// the declared byte count matches the data actually present, is a whole
/// number of registers and covers at least one.
pub fn register_block(pdu: &[u8]) -> MitmResult<std::ops::Range<usize>> {
    let fc = *pdu
        .first()
        .ok_or_else(|| MitmError::Protocol("Empty PDU".to_string()))?;
    if fc & EXCEPTION_FLAG != 0 {
        return Err(MitmError::Protocol(format!(
            "Exception response FC{:02X}",
            fc
        )));
    }
    let byte_count = usize::from(
        *pdu.get(1)
            .ok_or_else(|| MitmError::Protocol("Response has no byte count".to_string()))?,
    );
    let available = pdu.len() - 2;
    if byte_count != available {
        return Err(MitmError::Protocol(format!(
            "Byte count mismatch: declared {}, carried {}",
            byte_count, available
        )));
    }
    if byte_count < 2 {
        return Err(MitmError::Protocol(format!(
            "Byte count {} holds no register",
            byte_count
        )));
    }
    if byte_count % 2 != 0 {
        return Err(MitmError::Protocol(format!(
            "Odd byte count {} splits a register",
            byte_count
        )));
    }
    Ok(2..2 + byte_count)
}

/// Decode the register values of a read-registers response
pub fn parse_register_values(pdu: &[u8]) -> MitmResult<Vec<u16>> {
    let block = register_block(pdu)?;
    Ok(pdu[block]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Read-registers response PDU carrying `registers`
///
/// At most [`MAX_READ_REGISTERS`] fit, the byte count being a single byte.
pub fn build_read_response(function_code: u8, registers: &[u16]) -> MitmResult<Bytes> {
    if registers.len() > MAX_READ_REGISTERS {
        return Err(MitmError::Protocol(format!(
            "{} registers exceed the {} a read response can carry",
            registers.len(),
            MAX_READ_REGISTERS
        )));
    }

    let mut builder = PduBuilder::new()
        .function_code(function_code)
        .byte((registers.len() * 2) as u8);
    for &value in registers {
        builder = builder.quantity(value);
    }
    Ok(builder.build())
}

/// Exception response PDU
pub fn build_exception(function_code: u8, exception_code: u8) -> Bytes {
    PduBuilder::new()
        .function_code(function_code | EXCEPTION_FLAG)
        .byte(exception_code)
        .build()
}

/// PDU builder - fluent API
#[derive(Debug, Default)]
pub struct PduBuilder {
    buf: BytesMut,
}

impl PduBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_code(mut self, fc: u8) -> Self {
        self.buf.put_u8(fc);
        self
    }

    /// Big-endian register address
    pub fn address(mut self, addr: u16) -> Self {
        self.buf.put_u16(addr);
        self
    }

    /// Big-endian 16-bit quantity or register value
    pub fn quantity(mut self, qty: u16) -> Self {
        self.buf.put_u16(qty);
        self
    }

    pub fn byte(mut self, b: u8) -> Self {
        self.buf.put_u8(b);
        self
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_holding_request() {
        let req = ReadRegistersRequest::parse_holding(&[0x03, 0x00, 0x05, 0x00, 0x03]).unwrap();
        assert_eq!(req, ReadRegistersRequest::holding(5, 3));
        assert_eq!(&req.to_pdu()[..], &[0x03, 0x00, 0x05, 0x00, 0x03]);
    }

    #[test]
    fn test_parse_holding_rejects_other_functions() {
        assert!(ReadRegistersRequest::parse_holding(&[0x04, 0x00, 0x00, 0x00, 0x01]).is_err());
        assert!(ReadRegistersRequest::parse_holding(&[0x06, 0x00, 0x02, 0x00, 0x07]).is_err());
        assert!(ReadRegistersRequest::parse_holding(&[0x03, 0x00, 0x05]).is_err());
        assert!(ReadRegistersRequest::parse_holding(&[]).is_err());
    }

    #[test]
    fn test_register_block_valid() {
        let pdu = build_read_response(0x03, &[10, 11, 12]).unwrap();
        assert_eq!(register_block(&pdu).unwrap(), 2..8);
        assert_eq!(parse_register_values(&pdu).unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn test_register_block_rejects_mismatched_byte_count() {
        // declares 6 bytes, carries 4
        let pdu = [0x03, 0x06, 0x00, 0x0A, 0x00, 0x0B];
        assert!(register_block(&pdu).is_err());
    }

    #[test]
    fn test_register_block_rejects_short_and_exception() {
        assert!(register_block(&[0x03, 0x00]).is_err());
        assert!(register_block(&[0x03, 0x01, 0xFF]).is_err());
        assert!(register_block(&[0x03]).is_err());
        assert!(register_block(&build_exception(0x03, 0x02)).is_err());
    }

    #[test]
    fn test_register_block_rejects_odd_byte_count() {
        // byte count agrees with the data but leaves half a register
        let pdu = [0x03, 0x03, 0x00, 0x0A, 0x00];
        assert!(matches!(register_block(&pdu), Err(MitmError::Protocol(_))));
        assert!(parse_register_values(&pdu).is_err());
    }

    #[test]
    fn test_build_read_response_limits() {
        let full = vec![0xABCD; MAX_READ_REGISTERS];
        let pdu = build_read_response(0x03, &full).unwrap();
        assert_eq!(pdu[1], 250);
        assert_eq!(pdu.len(), 2 + 250);

        let too_many = vec![0u16; 128];
        assert!(build_read_response(0x03, &too_many).is_err());
    }

    #[test]
    fn test_build_exception() {
        assert_eq!(&build_exception(0x03, 0x02)[..], &[0x83, 0x02]);
    }

    #[test]
    fn test_function_code_description_masks_exception_bit() {
        assert_eq!(function_code_description(0x03), "Read Holding Registers");
        assert_eq!(function_code_description(0x83), "Read Holding Registers");
        assert_eq!(function_code_description(0x42), "Unknown Function");
    }
}
