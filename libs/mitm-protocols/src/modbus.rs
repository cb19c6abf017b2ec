//! Modbus/TCP Protocol Wire Layer
//!
//! ```text
//! mitm-protocols/modbus
//!     ├── Frame / MbapHeader (one MBAP-framed message)
//!     ├── codec (decode_next / encode, MbapCodec for tokio-util framing)
//!     └── pdu (function codes, FC03 request/response helpers, PduBuilder)
//! ```

mod codec;
mod constants;
mod frame;
pub mod pdu;

pub use codec::{decode_next, encode, MbapCodec};
pub use constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, MAX_PDU_SIZE, MBAP_HEADER_LEN,
    MBAP_LENGTH_OFFSET, MAX_READ_REGISTERS, MODBUS_PROTOCOL_ID,
};
pub use frame::{Frame, MbapHeader};
pub use pdu::{PduBuilder, ReadRegistersRequest};
