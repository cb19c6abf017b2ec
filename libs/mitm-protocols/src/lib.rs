//! Protocol wire layer for the spoofing proxy
//!
//! Only Modbus/TCP is implemented. The proxy needs three things from it:
//! frame boundaries on a byte stream, a length-correct re-encoder, and enough
//! PDU knowledge to recognise and rewrite read-holding-registers traffic.

pub mod modbus;

pub use modbus::{decode_next, encode, Frame, MbapCodec, MbapHeader};
