//! Modbus/TCP wire constants

/// MBAP header: transaction id (2) + protocol id (2) + length (2) + unit id (1)
pub const MBAP_HEADER_LEN: usize = 7;

/// Bytes preceding the unit id; the length field counts everything after them
pub const MBAP_LENGTH_OFFSET: usize = 6;

/// Protocol identifier carried by every Modbus/TCP frame
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Largest PDU the length field can describe (length counts the unit id too)
pub const MAX_PDU_SIZE: usize = u16::MAX as usize - 1;

/// FC03 Read Holding Registers
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Most registers one read response can carry (byte count 250)
pub const MAX_READ_REGISTERS: usize = 125;

/// Set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;
